use cql_protocol::authenticators::{NoneAuthenticatorProvider, SaslAuthenticatorProvider};
use cql_protocol::compression::Compression;
use cql_protocol::consistency::Consistency;
use cql_protocol::frame::Version;
use derivative::Derivative;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "rust-tls")]
use tokio_rustls::rustls::ClientConfig;

use crate::cluster::{ConnectionPoolConfig, NodeAddress};
use crate::error::{Error, Result};
use crate::load_balancing::{
    DcAwareLoadBalancingPolicy, LoadBalancingPolicy, RoundRobinLoadBalancingPolicy,
};
use crate::retry::{
    ConstantReconnectionPolicy, DefaultRetryPolicy, ExponentialReconnectionPolicy,
    ReconnectionPolicy, RetryPolicy,
};
use crate::speculative_execution::{
    ConstantSpeculativeExecutionPolicy, SpeculativeExecutionPolicy,
};
use crate::transport::ConnectionOptions;

#[cfg(feature = "rust-tls")]
use crate::transport::TlsOptions;

pub const DEFAULT_PORT: u16 = 9042;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable cluster configuration, produced by [`ClusterConfigBuilder`].
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct ClusterConfig {
    pub(crate) contact_points: Vec<NodeAddress>,
    pub(crate) port: u16,
    pub(crate) protocol_version: Option<Version>,
    pub(crate) compression: Compression,
    #[derivative(Debug = "ignore")]
    pub(crate) authenticator_provider: Arc<dyn SaslAuthenticatorProvider>,
    pub(crate) pool: ConnectionPoolConfig,
    pub(crate) connection: ConnectionOptions,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) resolve_timeout: Duration,
    #[derivative(Debug = "ignore")]
    pub(crate) reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    #[derivative(Debug = "ignore")]
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    #[derivative(Debug = "ignore")]
    pub(crate) speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    pub(crate) consistency: Consistency,
    pub(crate) serial_consistency: Option<Consistency>,
    pub(crate) io_threads: usize,
    pub(crate) keyspace: Option<String>,
}

impl ClusterConfig {
    #[inline]
    pub fn contact_points(&self) -> &[NodeAddress] {
        &self.contact_points
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Forced protocol version; `None` means the version is negotiated.
    #[inline]
    pub fn protocol_version(&self) -> Option<Version> {
        self.protocol_version
    }

    #[inline]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPoolConfig {
        &self.pool
    }

    #[inline]
    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.connection
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[inline]
    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }

    #[inline]
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    #[inline]
    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    #[inline]
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }
}

/// Builder of [`ClusterConfig`]. Every parameter is validated by [`build`](Self::build), before
/// any connection is attempted.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ClusterConfigBuilder {
    contact_points: Vec<NodeAddress>,
    port: u16,
    protocol_version: Option<u8>,
    compression: Compression,
    #[derivative(Debug = "ignore")]
    authenticator_provider: Arc<dyn SaslAuthenticatorProvider>,
    pool: ConnectionPoolConfig,
    connection: ConnectionOptions,
    connect_timeout: Duration,
    request_timeout: Duration,
    resolve_timeout: Duration,
    #[derivative(Debug = "ignore")]
    reconnection_policy: Result<Arc<dyn ReconnectionPolicy + Send + Sync>>,
    #[derivative(Debug = "ignore")]
    retry_policy: Arc<dyn RetryPolicy>,
    #[derivative(Debug = "ignore")]
    load_balancing_policy: Result<Arc<dyn LoadBalancingPolicy>>,
    #[derivative(Debug = "ignore")]
    speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    consistency: Consistency,
    serial_consistency: Option<Consistency>,
    io_threads: usize,
    keyspace: Option<String>,
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        ClusterConfigBuilder {
            contact_points: vec![],
            port: DEFAULT_PORT,
            protocol_version: None,
            compression: Compression::None,
            authenticator_provider: Arc::new(NoneAuthenticatorProvider),
            pool: ConnectionPoolConfig::default(),
            connection: ConnectionOptions {
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                ..Default::default()
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            reconnection_policy: Ok(Arc::new(ExponentialReconnectionPolicy::default())),
            retry_policy: Arc::new(DefaultRetryPolicy),
            load_balancing_policy: Ok(Arc::new(RoundRobinLoadBalancingPolicy::new())),
            speculative_execution_policy: None,
            consistency: Consistency::LocalOne,
            serial_consistency: None,
            io_threads: 1,
            keyspace: None,
        }
    }
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a contact point: an ip address, a socket address or a host name.
    #[must_use]
    pub fn with_contact_point(mut self, contact_point: impl Into<NodeAddress>) -> Self {
        self.contact_points.push(contact_point.into());
        self
    }

    /// Adds contact points given as a comma separated list.
    #[must_use]
    pub fn with_contact_points(mut self, contact_points: &str) -> Self {
        self.contact_points.extend(
            contact_points
                .split(',')
                .map(str::trim)
                .filter(|contact_point| !contact_point.is_empty())
                .map(NodeAddress::from),
        );
        self
    }

    /// Port used for contact points given without one and for discovered hosts.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Forces given protocol version instead of negotiating it.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Preferred compression; falls back to none if the server does not support it.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_authenticator_provider(
        mut self,
        authenticator_provider: Arc<dyn SaslAuthenticatorProvider>,
    ) -> Self {
        self.authenticator_provider = authenticator_provider;
        self
    }

    /// Connections opened up front to each local host, on every event loop.
    #[must_use]
    pub fn with_core_connections_per_host(mut self, core_connections: usize) -> Self {
        self.pool.core_connections = core_connections;
        self
    }

    #[must_use]
    pub fn with_max_connections_per_host(mut self, max_connections: usize) -> Self {
        self.pool.max_connections = max_connections;
        self
    }

    /// Pending requests on the least busy connection above which the pool grows.
    #[must_use]
    pub fn with_max_concurrent_requests_threshold(mut self, threshold: usize) -> Self {
        self.pool.max_concurrent_requests_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Default per-request timeout; statements can override it.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Idle time after which a heartbeat is sent. Zero disables heartbeats.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.connection.heartbeat_interval = interval;
        self
    }

    /// Time without a response after which a connection is considered dead. Zero disables the
    /// check.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tcp_nodelay(mut self, tcp_nodelay: bool) -> Self {
        self.connection.tcp_nodelay = tcp_nodelay;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.connection.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_reconnection_policy(
        mut self,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    ) -> Self {
        self.reconnection_policy = Ok(reconnection_policy);
        self
    }

    /// Reconnects at a constant interval. The delay is validated on build.
    #[must_use]
    pub fn with_constant_reconnect(mut self, delay: Duration) -> Self {
        self.reconnection_policy = ConstantReconnectionPolicy::new(delay)
            .map(|policy| Arc::new(policy) as Arc<dyn ReconnectionPolicy + Send + Sync>);
        self
    }

    /// Reconnects with exponential backoff. The delays are validated on build.
    #[must_use]
    pub fn with_exponential_reconnect(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.reconnection_policy = ExponentialReconnectionPolicy::new(base_delay, max_delay)
            .map(|policy| Arc::new(policy) as Arc<dyn ReconnectionPolicy + Send + Sync>);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn with_load_balancing_policy(
        mut self,
        load_balancing_policy: Arc<dyn LoadBalancingPolicy>,
    ) -> Self {
        self.load_balancing_policy = Ok(load_balancing_policy);
        self
    }

    /// Uses datacenter-aware round-robin load balancing. The local datacenter is validated on
    /// build.
    #[must_use]
    pub fn with_dc_aware_load_balancing(
        mut self,
        local_dc: impl Into<String>,
        used_hosts_per_remote_dc: usize,
        skip_remote_dcs_for_local_cl: bool,
    ) -> Self {
        self.load_balancing_policy = DcAwareLoadBalancingPolicy::new(
            local_dc,
            used_hosts_per_remote_dc,
            skip_remote_dcs_for_local_cl,
        )
        .map(|policy| Arc::new(policy) as Arc<dyn LoadBalancingPolicy>);
        self
    }

    #[must_use]
    pub fn with_speculative_execution_policy(
        mut self,
        speculative_execution_policy: Arc<dyn SpeculativeExecutionPolicy>,
    ) -> Self {
        self.speculative_execution_policy = Some(speculative_execution_policy);
        self
    }

    /// Starts up to `max_executions` extra executions of idempotent statements, `delay` apart.
    #[must_use]
    pub fn with_constant_speculative_execution(
        self,
        delay: Duration,
        max_executions: usize,
    ) -> Self {
        self.with_speculative_execution_policy(Arc::new(ConstantSpeculativeExecutionPolicy::new(
            max_executions,
            delay,
        )))
    }

    /// Default consistency of statements which don't set their own.
    #[must_use]
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    #[must_use]
    pub fn with_serial_consistency(mut self, serial_consistency: Consistency) -> Self {
        self.serial_consistency = Some(serial_consistency);
        self
    }

    /// Number of event loops, each with its own thread. Every loop keeps its own connections to
    /// each host.
    #[must_use]
    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads;
        self
    }

    /// Keyspace to switch to after connecting.
    #[must_use]
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Wraps every connection with TLS.
    #[cfg(feature = "rust-tls")]
    #[must_use]
    pub fn with_tls(mut self, config: Arc<ClientConfig>, server_name: Option<String>) -> Self {
        self.connection.tls = Some(TlsOptions {
            config,
            server_name,
        });
        self
    }

    /// Validates the parameters and finalizes the configuration.
    pub fn build(self) -> Result<ClusterConfig> {
        if self.contact_points.is_empty() {
            return Err(Error::BadParameters(
                "At least one contact point is required".into(),
            ));
        }

        let protocol_version = self
            .protocol_version
            .map(|version| {
                if !(u8::from(Version::LOWEST)..=u8::from(Version::HIGHEST)).contains(&version) {
                    return Err(Error::BadParameters(format!(
                        "Protocol version {version} is not supported; supported versions are \
                         {} to {}",
                        Version::LOWEST,
                        Version::HIGHEST
                    )));
                }

                Version::try_from(version).map_err(|error| Error::BadParameters(error.to_string()))
            })
            .transpose()?;

        if self.pool.core_connections == 0 {
            return Err(Error::BadParameters(
                "At least one core connection per host is required".into(),
            ));
        }

        if self.pool.max_connections < self.pool.core_connections {
            return Err(Error::BadParameters(format!(
                "Max connections per host ({}) cannot be lower than core connections ({})",
                self.pool.max_connections, self.pool.core_connections
            )));
        }

        if self.io_threads == 0 {
            return Err(Error::BadParameters(
                "At least one I/O thread is required".into(),
            ));
        }

        for (name, timeout) in [
            ("connect", self.connect_timeout),
            ("request", self.request_timeout),
            ("resolve", self.resolve_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::BadParameters(format!(
                    "The {name} timeout must be positive"
                )));
            }
        }

        let heartbeat_interval = self.connection.heartbeat_interval;
        let idle_timeout = self.connection.idle_timeout;
        if !heartbeat_interval.is_zero() && !idle_timeout.is_zero() && idle_timeout <= heartbeat_interval
        {
            return Err(Error::BadParameters(format!(
                "Idle timeout {idle_timeout:?} must exceed heartbeat interval {heartbeat_interval:?}"
            )));
        }

        if matches!(&self.keyspace, Some(keyspace) if keyspace.is_empty()) {
            return Err(Error::BadParameters("Keyspace name cannot be empty".into()));
        }

        Ok(ClusterConfig {
            contact_points: self.contact_points,
            port: self.port,
            protocol_version,
            compression: self.compression,
            authenticator_provider: self.authenticator_provider,
            pool: self.pool,
            connection: self.connection,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            resolve_timeout: self.resolve_timeout,
            reconnection_policy: self.reconnection_policy?,
            retry_policy: self.retry_policy,
            load_balancing_policy: self.load_balancing_policy?,
            speculative_execution_policy: self.speculative_execution_policy,
            consistency: self.consistency,
            serial_consistency: self.serial_consistency,
            io_threads: self.io_threads,
            keyspace: self.keyspace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new().with_contact_point("127.0.0.1")
    }

    #[test]
    fn should_apply_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.port(), 9042);
        assert_eq!(config.protocol_version(), None);
        assert_eq!(config.compression(), Compression::None);
        assert_eq!(config.pool().core_connections, 1);
        assert_eq!(config.pool().max_connections, 2);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
        assert_eq!(config.resolve_timeout(), Duration::from_secs(2));
        assert_eq!(
            config.connection_options().heartbeat_interval,
            Duration::from_secs(30)
        );
        assert_eq!(
            config.connection_options().idle_timeout,
            Duration::from_secs(60)
        );
        assert!(config.connection_options().tcp_nodelay);
        assert_eq!(config.consistency(), Consistency::LocalOne);
        assert_eq!(config.io_threads(), 1);
        assert!(config.speculative_execution_policy.is_none());
    }

    #[test]
    fn should_require_contact_points() {
        assert!(matches!(
            ClusterConfigBuilder::new().build(),
            Err(Error::BadParameters(_))
        ));
    }

    #[test]
    fn should_split_contact_points() {
        let config = ClusterConfigBuilder::new()
            .with_contact_points("127.0.0.1, 127.0.0.2,,localhost")
            .build()
            .unwrap();

        assert_eq!(
            config.contact_points(),
            &[
                NodeAddress::from("127.0.0.1"),
                NodeAddress::from("127.0.0.2"),
                NodeAddress::from("localhost"),
            ]
        );
    }

    #[test]
    fn should_reject_unsupported_protocol_versions() {
        for version in [0, 1, 5, 0x84] {
            assert!(matches!(
                builder().with_protocol_version(version).build(),
                Err(Error::BadParameters(_))
            ));
        }

        let config = builder().with_protocol_version(3).build().unwrap();
        assert_eq!(config.protocol_version(), Some(Version::V3));
    }

    #[test]
    fn should_reject_bad_reconnection_delays() {
        assert!(matches!(
            builder().with_constant_reconnect(Duration::ZERO).build(),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            builder()
                .with_exponential_reconnect(Duration::ZERO, Duration::from_secs(1))
                .build(),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            builder()
                .with_exponential_reconnect(Duration::from_secs(2), Duration::from_secs(1))
                .build(),
            Err(Error::BadParameters(_))
        ));
    }

    #[test]
    fn should_require_local_dc() {
        assert!(matches!(
            builder().with_dc_aware_load_balancing("", 0, false).build(),
            Err(Error::BadParameters(_))
        ));
        assert!(builder()
            .with_dc_aware_load_balancing("dc1", 1, true)
            .build()
            .is_ok());
    }

    #[test]
    fn should_validate_pool_sizes() {
        assert!(matches!(
            builder().with_core_connections_per_host(0).build(),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            builder()
                .with_core_connections_per_host(3)
                .with_max_connections_per_host(2)
                .build(),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            builder().with_io_threads(0).build(),
            Err(Error::BadParameters(_))
        ));
    }

    #[test]
    fn should_validate_timeouts() {
        assert!(matches!(
            builder().with_request_timeout(Duration::ZERO).build(),
            Err(Error::BadParameters(_))
        ));
        assert!(matches!(
            builder()
                .with_heartbeat_interval(Duration::from_secs(10))
                .with_idle_timeout(Duration::from_secs(5))
                .build(),
            Err(Error::BadParameters(_))
        ));
        assert!(builder()
            .with_heartbeat_interval(Duration::ZERO)
            .with_idle_timeout(Duration::from_secs(5))
            .build()
            .is_ok());
    }
}
