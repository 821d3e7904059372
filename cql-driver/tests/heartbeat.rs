mod common;

use common::{config_builder, eventually, MockServer};
use cql_driver::Session;
use std::time::Duration;

#[tokio::test]
async fn should_keep_idle_connections_alive() {
    let server = MockServer::start().await;

    let config = config_builder(&[&server])
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_idle_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();
    let connections = server.connections();

    assert!(eventually(|| server.heartbeats() >= 4).await);

    // answered heartbeats keep the connections open
    assert_eq!(server.connections(), connections);
    assert!(session.query("SELECT 1").await.is_ok());

    session.close().await;
}

#[tokio::test]
async fn should_replace_connections_with_unanswered_heartbeats() {
    let server = MockServer::builder().without_heartbeats().start().await;

    let config = config_builder(&[&server])
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_idle_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();
    let connections = server.connections();

    assert!(eventually(|| server.connections() > connections).await);
    assert!(session.metrics().total_connections() > 0);

    session.close().await;
}
