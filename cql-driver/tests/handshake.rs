mod common;

use common::{config_builder, eventually, MockServer};
use cql_driver::error::Error;
use cql_driver::frame::message_error::ErrorType;
use cql_driver::frame::Version;
use cql_driver::Session;

#[tokio::test]
async fn should_negotiate_lower_protocol_version() {
    let server = MockServer::builder()
        .with_max_version(Version::V3)
        .start()
        .await;

    let config = config_builder(&[&server]).build().unwrap();
    let session = Session::connect(config).await.unwrap();

    let result = session.query("SELECT * FROM ks.t").await.unwrap();
    assert_eq!(result.coordinator, Some(server.addr()));

    let received = server.received();
    let query = received
        .iter()
        .find(|received| received.query == "SELECT * FROM ks.t")
        .unwrap();
    assert_eq!(query.version, Version::V3);

    session.close().await;
}

#[tokio::test]
async fn should_fail_with_rejected_forced_version() {
    let server = MockServer::builder()
        .with_max_version(Version::V3)
        .start()
        .await;

    let config = config_builder(&[&server])
        .with_protocol_version(4)
        .build()
        .unwrap();

    match Session::connect(config).await {
        Err(Error::NoHostsAvailable { tried, last_error }) => {
            assert_eq!(tried, vec![server.addr()]);
            let last_error = last_error.unwrap();
            assert_eq!(
                last_error.server_error().map(|body| &body.ty),
                Some(&ErrorType::Protocol)
            );
        }
        Err(error) => panic!("unexpected error: {error}"),
        Ok(_) => panic!("connected with rejected version"),
    }
}

#[tokio::test]
async fn should_switch_to_configured_keyspace() {
    let server = MockServer::start().await;

    let config = config_builder(&[&server])
        .with_keyspace("inventory")
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();

    assert_eq!(session.keyspace().as_deref().map(String::as_str), Some("inventory"));

    // the control connection and the pool connection
    let queries = server.queries();
    let use_queries = queries
        .iter()
        .filter(|query| *query == "USE \"inventory\"")
        .count();
    assert!(use_queries >= 2, "{queries:?}");

    session.close().await;
}

#[tokio::test]
async fn should_track_keyspace_set_by_statements() {
    let server = MockServer::start().await;

    let config = config_builder(&[&server]).build().unwrap();
    let session = Session::connect(config).await.unwrap();
    assert!(session.keyspace().is_none());

    let result = session.use_keyspace("orders").await.unwrap();
    assert_eq!(result.body.as_set_keyspace(), Some("orders"));
    assert_eq!(session.keyspace().as_deref().map(String::as_str), Some("orders"));

    // pooled connections follow with their own USE
    assert!(
        eventually(|| server
            .queries()
            .iter()
            .filter(|query| query.as_str() == "USE \"orders\"")
            .count()
            >= 2)
        .await
    );

    session.close().await;
}

#[tokio::test]
async fn should_fail_requests_after_close() {
    let server = MockServer::start().await;

    let config = config_builder(&[&server]).build().unwrap();
    let session = Session::connect(config).await.unwrap();
    assert!(session.query("SELECT 1").await.is_ok());

    session.close().await;
    assert!(session.is_closed());
    assert!(matches!(
        session.query("SELECT 1").await,
        Err(Error::SessionClosed)
    ));
}
