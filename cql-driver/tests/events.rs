mod common;

use common::{config_builder, eventually, FixedOrderLoadBalancingPolicy, MockServer};
use cql_driver::frame::events::{
    ServerEvent, StatusChange, StatusChangeType, TopologyChange, TopologyChangeType,
};
use cql_driver::Session;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;

fn status_change(change_type: StatusChangeType, addr: SocketAddr) -> ServerEvent {
    ServerEvent::StatusChange(StatusChange { change_type, addr })
}

fn topology_change(change_type: TopologyChangeType, addr: SocketAddr) -> ServerEvent {
    ServerEvent::TopologyChange(TopologyChange { change_type, addr })
}

fn is_up(session: &Session, addr: SocketAddr) -> Option<bool> {
    session.hosts().get(addr).map(|host| host.is_up())
}

#[tokio::test]
async fn should_apply_status_changes() {
    let control = MockServer::start().await;
    let other = MockServer::start().await;

    let servers = [&control, &other];
    let config = config_builder(&servers)
        .with_load_balancing_policy(FixedOrderLoadBalancingPolicy::new(&servers))
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();
    let mut events = session.subscribe_events();

    let down = status_change(StatusChangeType::Down, other.addr());
    control.push_event(down.clone()).await;

    let received = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, down);
    assert!(eventually(|| is_up(&session, other.addr()) == Some(false)).await);

    let result = session.query("SELECT 1").await.unwrap();
    assert_eq!(result.coordinator, Some(control.addr()));

    control
        .push_event(status_change(StatusChangeType::Up, other.addr()))
        .await;
    assert!(eventually(|| is_up(&session, other.addr()) == Some(true)).await);

    session.close().await;
}

#[tokio::test]
async fn should_apply_topology_changes() {
    let control = MockServer::start().await;
    let joining = MockServer::start().await;

    let config = config_builder(&[&control]).build().unwrap();
    let session = Session::connect(config).await.unwrap();
    assert_eq!(session.hosts().len(), 1);

    control
        .push_event(topology_change(TopologyChangeType::NewNode, joining.addr()))
        .await;

    assert!(eventually(|| session.hosts().get(joining.addr()).is_some()).await);
    assert!(eventually(|| joining.connections() > 0).await);

    control
        .push_event(topology_change(TopologyChangeType::RemovedNode, joining.addr()))
        .await;

    assert!(eventually(|| session.hosts().get(joining.addr()).is_none()).await);
    assert_eq!(session.hosts().len(), 1);

    for _ in 0..4 {
        let result = session.query("SELECT 1").await.unwrap();
        assert_eq!(result.coordinator, Some(control.addr()));
    }

    session.close().await;
}
