//! Cluster state: configuration, hosts, connection pools, the control connection and the
//! session tying them together.
pub(crate) mod cluster_metadata_manager;
mod config;
pub(crate) mod connection_manager;
pub(crate) mod connection_pool;
mod connector;
pub(crate) mod control_connection;
mod host;
mod host_registry;
mod keyspace_holder;
mod node_address;
pub mod session;

pub use crate::cluster::config::{
    ClusterConfig, ClusterConfigBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RESOLVE_TIMEOUT,
};
pub use crate::cluster::connection_manager::{negotiate_compression, startup, ConnectionManager};
pub use crate::cluster::connection_pool::ConnectionPoolConfig;
pub use crate::cluster::connector::Connector;
pub use crate::cluster::host::{Host, HostInfo, HostState};
pub use crate::cluster::host_registry::{HostRegistry, HostSet};
pub use crate::cluster::keyspace_holder::KeyspaceHolder;
pub use crate::cluster::node_address::NodeAddress;
