use cql_protocol::frame::events::ServerEvent;
use cql_protocol::frame::Opcode;
use fxhash::FxHashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::*;

use crate::cluster::cluster_metadata_manager::ClusterMetadataManager;
use crate::cluster::connection_pool::ConnectionPoolFactory;
use crate::cluster::control_connection::ControlConnection;
use crate::cluster::{ClusterConfig, Connector, HostSet, KeyspaceHolder};
use crate::error::{Error, Result};
use crate::event_loop::EventLoopGroup;
use crate::future::{result_channel, ResultFuture};
use crate::metrics::Metrics;
use crate::request_handler::{RequestDefaults, RequestHandler};
use crate::statement::{PreparedStatement, QueryResult, Statement};
use crate::transport::Connection;

const EVENT_CHANNEL_CAPACITY: usize = 128;
const IO_THREAD_PREFIX: &str = "cql-io";

/// Entry point for executing statements against a cluster. Holds one connection pool per host,
/// a control connection tracking the cluster topology and the event loops driving both.
///
/// Dropping a session without [closing](Session::close) it stops its event loops, failing any
/// requests still in flight.
pub struct Session {
    cluster: Arc<ClusterMetadataManager<Connection, Connector>>,
    event_loops: Arc<EventLoopGroup>,
    keyspace_holder: Arc<KeyspaceHolder>,
    defaults: RequestDefaults,
    event_sender: broadcast::Sender<ServerEvent>,
    control_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Connects to the cluster: resolves contact points, opens the control connection,
    /// discovers the remaining hosts and creates their pools.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let contact_points = resolve_contact_points(&config).await?;
        debug!(?contact_points, "Contact points resolved.");

        let event_loops = Arc::new(EventLoopGroup::new(config.io_threads, IO_THREAD_PREFIX)?);
        let metrics = Arc::new(Metrics::new());

        let keyspace_holder = Arc::new(KeyspaceHolder::new());
        if let Some(keyspace) = &config.keyspace {
            keyspace_holder.update_current_keyspace(keyspace.clone());
        }

        let connector = Connector::new(
            config.authenticator_provider.clone(),
            config.compression,
            config.connection.clone(),
            config.connect_timeout,
            config.protocol_version,
            keyspace_holder.clone(),
            metrics.clone(),
        );

        // every loop owns a shard of each pool
        let handle = event_loops.next_loop().handle().clone();
        let pool_factory = ConnectionPoolFactory::new(
            config.pool,
            Arc::new(connector),
            keyspace_holder.keyspace_receiver(),
            config.reconnection_policy.clone(),
            handle.clone(),
            event_loops.handles(),
        );

        let cluster = Arc::new(ClusterMetadataManager::new(
            contact_points,
            pool_factory,
            config.load_balancing_policy.clone(),
            config.reconnection_policy.clone(),
            handle,
        ));

        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let control_connection =
            match ControlConnection::connect(cluster.clone(), event_sender.clone()).await {
                Ok(control_connection) => control_connection,
                Err(error) => {
                    error!(%error, "Unable to establish control connection.");
                    cluster.close().await;
                    event_loops.shutdown();
                    return Err(error);
                }
            };

        debug!(address = ?control_connection.address(), "Control connection established.");

        cluster.connect_pools().await;
        info!(
            hosts = cluster.hosts().len(),
            connected = cluster.connected_hosts().await,
            "Session connected."
        );

        let control_task = cluster.handle().spawn(control_connection.run());

        Ok(Session {
            cluster,
            event_loops,
            keyspace_holder,
            defaults: RequestDefaults {
                consistency: config.consistency,
                serial_consistency: config.serial_consistency,
                request_timeout: config.request_timeout,
                retry_policy: config.retry_policy.clone(),
                speculative_execution_policy: config.speculative_execution_policy.clone(),
                metrics,
            },
            event_sender,
            control_task: Mutex::new(Some(control_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Executes a statement on one of the event loops. The returned future can be awaited,
    /// waited on from a blocking thread or given a completion callback.
    pub fn execute(&self, statement: impl Into<Statement>) -> ResultFuture<QueryResult> {
        if self.is_closed() {
            return ResultFuture::ready(Err(Error::SessionClosed));
        }

        // the handler runs on the loop owning the connections it borrows
        let (shard, event_loop) = self.event_loops.next_indexed();
        let handler = RequestHandler::new(
            statement.into(),
            self.keyspace_holder.current_keyspace(),
            self.defaults.clone(),
            self.cluster.clone(),
        )
        .with_shard(shard);

        let (promise, future) = result_channel();
        event_loop.spawn(async move {
            promise.set(handler.run().await);
        });

        future
    }

    /// Executes a statement and waits for the result.
    #[inline]
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<QueryResult> {
        self.execute(statement).await
    }

    /// Executes a statement, blocking the current thread until the result arrives. Must not be
    /// called from an async context.
    #[inline]
    pub fn execute_blocking(&self, statement: impl Into<Statement>) -> Result<QueryResult> {
        self.execute(statement).wait()
    }

    /// Prepares a statement on one of the hosts. Hosts which don't know it yet get it prepared
    /// transparently on first execution.
    pub async fn prepare(&self, query: impl Into<String>) -> Result<Arc<PreparedStatement>> {
        let query = query.into();
        let result = self
            .query(Statement::prepare(query.clone()).idempotent(true))
            .await?;

        match result.body.into_prepared() {
            Some(prepared) => {
                debug!(%query, coordinator = ?result.coordinator, "Statement prepared.");
                Ok(Arc::new(PreparedStatement::new(query, prepared)))
            }
            None => Err(Error::UnexpectedResponse(Opcode::Result)),
        }
    }

    /// Switches the session keyspace. Every connection follows with its own `USE`.
    pub async fn use_keyspace(&self, keyspace: &str) -> Result<QueryResult> {
        self.query(format!("USE \"{keyspace}\"")).await
    }

    /// Current keyspace, as set by configuration or the last `USE` statement.
    #[inline]
    pub fn keyspace(&self) -> Option<Arc<String>> {
        self.keyspace_holder.current_keyspace()
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.defaults.metrics
    }

    /// Snapshot of known hosts.
    #[inline]
    pub fn hosts(&self) -> Arc<HostSet> {
        self.cluster.hosts()
    }

    /// Subscribes to server events received by the control connection.
    #[inline]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_sender.subscribe()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the control connection, closes every pool and stops the event loops. Requests in
    /// flight fail with a connection closed error; new ones fail with [`Error::SessionClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Closing session.");

        self.abort_control_task();
        self.cluster.close().await;
        self.event_loops.shutdown();
    }

    fn abort_control_task(&self) {
        let control_task = self
            .control_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(control_task) = control_task {
            control_task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.abort_control_task();
            self.event_loops.shutdown();
        }
    }
}

async fn resolve_contact_points(config: &ClusterConfig) -> Result<Vec<SocketAddr>> {
    let mut seen = FxHashSet::default();
    let mut contact_points = vec![];
    let mut last_error = None;

    for contact_point in &config.contact_points {
        match contact_point
            .resolve(config.port, config.resolve_timeout)
            .await
        {
            Ok(addrs) => {
                contact_points.extend(addrs.into_iter().filter(|addr| seen.insert(*addr)));
            }
            Err(error) => {
                warn!(%error, ?contact_point, "Unable to resolve contact point.");
                last_error = Some(error);
            }
        }
    }

    match (contact_points.is_empty(), last_error) {
        (true, Some(error)) => Err(error),
        (true, None) => Err(Error::BadParameters(
            "No contact points could be resolved".into(),
        )),
        (false, _) => Ok(contact_points),
    }
}
