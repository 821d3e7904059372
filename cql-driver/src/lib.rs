//! **cql-driver** is an asynchronous driver core for Cassandra-compatible databases, speaking
//! native protocol v2 to v4.
//!
//! ## Getting started
//!
//! ```no_run
//! use cql_driver::cluster::ClusterConfigBuilder;
//! use cql_driver::statement::Statement;
//! use cql_driver::Session;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClusterConfigBuilder::new()
//!         .with_contact_point("127.0.0.1")
//!         .build()
//!         .unwrap();
//!     let session = Session::connect(config).await.unwrap();
//!
//!     let create_ks = "CREATE KEYSPACE IF NOT EXISTS test_ks WITH REPLICATION = { \
//!                      'class' : 'SimpleStrategy', 'replication_factor' : 1 };";
//!     session
//!         .query(Statement::new(create_ks))
//!         .await
//!         .expect("Keyspace create error");
//! }
//! ```
//!
//! ## Architecture
//!
//! Every connection lives on one of the session's [event loops](crate::event_loop) and multiplexes
//! requests over protocol stream ids. A request is driven by a request handler on an event loop,
//! following a [query plan](crate::load_balancing) produced by the configured load balancing
//! policy, consulting the [retry policy](crate::retry) on server errors and optionally starting
//! [speculative executions](crate::speculative_execution).

pub mod cluster;
pub mod error;
pub mod event_loop;
pub mod frame_parser;
pub mod future;
pub mod load_balancing;
pub mod metrics;
pub(crate) mod request_handler;
pub mod resolver;
pub mod retry;
pub mod speculative_execution;
pub mod statement;
pub mod transport;

pub use cql_protocol::authenticators;
pub use cql_protocol::compression;
pub use cql_protocol::consistency;
pub use cql_protocol::frame;
pub use cql_protocol::types;

pub use crate::cluster::session::Session;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
