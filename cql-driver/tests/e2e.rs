//! Tests against a live cluster, reachable at the addresses in `CQL_CONTACT_POINTS`
//! (`127.0.0.1` by default).

#![cfg(feature = "e2e-tests")]

use cql_driver::cluster::ClusterConfigBuilder;
use cql_driver::consistency::Consistency;
use cql_driver::frame::message_query::Value;
use cql_driver::statement::Statement;
use cql_driver::Session;
use futures::future::try_join_all;
use std::env;
use std::time::Duration;
use uuid::Uuid;

const ROW_COUNT: usize = 4096;

fn contact_points() -> String {
    env::var("CQL_CONTACT_POINTS").unwrap_or_else(|_| "127.0.0.1".into())
}

async fn connect() -> Session {
    let config = ClusterConfigBuilder::new()
        .with_contact_points(&contact_points())
        .with_core_connections_per_host(2)
        .with_max_connections_per_host(4)
        .build()
        .unwrap();

    Session::connect(config).await.unwrap()
}

async fn create_table(session: &Session, table: &str) {
    session
        .query(
            "CREATE KEYSPACE IF NOT EXISTS cql_driver_e2e WITH REPLICATION = \
             { 'class' : 'SimpleStrategy', 'replication_factor' : 1 }",
        )
        .await
        .unwrap();
    session
        .query(format!(
            "CREATE TABLE IF NOT EXISTS cql_driver_e2e.{table} (id uuid PRIMARY KEY, name text)"
        ))
        .await
        .unwrap();
    session
        .query(format!("TRUNCATE cql_driver_e2e.{table}"))
        .await
        .unwrap();
}

#[tokio::test]
async fn should_insert_and_select_concurrently() {
    let session = connect().await;
    create_table(&session, "concurrent").await;

    let inserts = (0..ROW_COUNT).map(|n| {
        session.execute(
            Statement::new("INSERT INTO cql_driver_e2e.concurrent (id, name) VALUES (?, ?)")
                .with_values(vec![Value::from(Uuid::new_v4()), Value::from(format!("row {n}"))])
                .with_consistency(Consistency::One)
                .idempotent(true),
        )
    });
    try_join_all(inserts).await.unwrap();

    let result = session
        .query(
            Statement::new("SELECT id, name FROM cql_driver_e2e.concurrent")
                .with_page_size(ROW_COUNT as i32 * 2),
        )
        .await
        .unwrap();

    let rows = result.rows().unwrap();
    assert_eq!(rows.len(), ROW_COUNT);
    assert!(rows
        .rows()
        .all(|row| matches!(row.get_text("name"), Ok(Some(name)) if name.starts_with("row "))));

    session.close().await;
}

#[tokio::test]
async fn should_track_keyspace() {
    let session = connect().await;
    create_table(&session, "keyspaced").await;

    session.use_keyspace("cql_driver_e2e").await.unwrap();
    assert_eq!(session.keyspace().as_deref(), Some("cql_driver_e2e"));

    // unqualified table names resolve on every pooled connection
    for _ in 0..16 {
        session
            .query("SELECT id FROM keyspaced LIMIT 1")
            .await
            .unwrap();
    }

    session.close().await;
}

#[tokio::test]
async fn should_speculate_on_multi_node_clusters() {
    let config = ClusterConfigBuilder::new()
        .with_contact_points(&contact_points())
        .with_constant_speculative_execution(Duration::from_micros(1), 2)
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();
    if session.hosts().len() < 3 {
        session.close().await;
        return;
    }

    for _ in 0..64 {
        session
            .query(Statement::new("SELECT release_version FROM system.local").idempotent(true))
            .await
            .unwrap();
    }

    assert!(session.metrics().speculative_executions() > 0);

    session.close().await;
}
