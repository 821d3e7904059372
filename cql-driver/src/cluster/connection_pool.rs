use atomic::Atomic;
use bytemuck::NoUninit;
use derive_more::Display;
use futures::future::join_all;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch::Receiver;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::*;

use crate::cluster::connection_manager::use_keyspace_frame;
use crate::cluster::{ConnectionManager, Host};
use crate::error::{Error, Result};
use crate::load_balancing::HostDistance;
use crate::retry::{ReconnectionPolicy, ReconnectionSchedule};
use crate::transport::CqlTransport;

#[derive(Copy, Clone, PartialEq, Eq, Display, Debug, NoUninit)]
#[repr(u8)]
enum ReconnectionState {
    NotRunning,
    InProgress,
    Disabled,
}

async fn new_connection<T: CqlTransport, CM: ConnectionManager<T>>(
    connection_manager: &CM,
    addr: SocketAddr,
    error_handler: mpsc::Sender<Error>,
    handle: &Handle,
) -> Result<T> {
    connection_manager
        .connection(None, Some(error_handler), addr, handle.clone())
        .await
}

/// Pool sizing, per event loop. Local hosts get `core_connections` connections on each loop up
/// front and may grow up to `max_connections` when every connection is busy; remote hosts get a
/// single connection per loop.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionPoolConfig {
    pub core_connections: usize,
    pub max_connections: usize,
    /// Pending requests on the least busy connection above which the pool grows.
    pub max_concurrent_requests_threshold: usize,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        ConnectionPoolConfig {
            core_connections: 1,
            max_connections: 2,
            max_concurrent_requests_threshold: 100,
        }
    }
}

impl ConnectionPoolConfig {
    fn core_size(&self, distance: HostDistance) -> usize {
        match distance {
            HostDistance::Local => self.core_connections,
            HostDistance::Remote => 1,
            HostDistance::Ignored => 0,
        }
    }

    fn max_size(&self, distance: HostDistance) -> usize {
        match distance {
            HostDistance::Local => self.max_connections,
            HostDistance::Remote => 1,
            HostDistance::Ignored => 0,
        }
    }
}

pub(crate) struct ConnectionPoolFactory<
    T: CqlTransport + 'static,
    CM: ConnectionManager<T> + 'static,
> {
    config: ConnectionPoolConfig,
    connection_manager: Arc<CM>,
    keyspace_receiver: Receiver<Option<String>>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    handle: Handle,
    shard_handles: Vec<Handle>,
    _transport: PhantomData<T>,
}

impl<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> ConnectionPoolFactory<T, CM> {
    pub(crate) fn new(
        config: ConnectionPoolConfig,
        connection_manager: Arc<CM>,
        keyspace_receiver: Receiver<Option<String>>,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
        handle: Handle,
        shard_handles: Vec<Handle>,
    ) -> Self {
        let shard_handles = if shard_handles.is_empty() {
            vec![handle.clone()]
        } else {
            shard_handles
        };

        ConnectionPoolFactory {
            config,
            connection_manager,
            keyspace_receiver,
            reconnection_policy,
            handle,
            shard_handles,
            _transport: Default::default(),
        }
    }

    #[inline]
    pub(crate) fn connection_manager(&self) -> &Arc<CM> {
        &self.connection_manager
    }

    pub(crate) async fn create(
        &self,
        distance: HostDistance,
        host: &Arc<Host>,
    ) -> Result<Arc<ConnectionPool<T, CM>>> {
        let max_size = self.config.max_size(distance) * self.shard_handles.len();
        let (error_sender, error_receiver) = mpsc::channel(max_size.max(1));

        let pool = Arc::new(
            ConnectionPool::new(
                &self.connection_manager,
                host.address(),
                self.config,
                distance,
                error_sender,
                self.handle.clone(),
                &self.shard_handles,
            )
            .await?,
        );

        self.monitor_connections(error_receiver, Arc::downgrade(&pool), Arc::downgrade(host));

        // watch for keyspace changes
        let mut keyspace_receiver = self.keyspace_receiver.clone();
        keyspace_receiver.mark_unchanged();

        let weak_pool = Arc::downgrade(&pool);
        let addr = host.address();

        self.handle.spawn(async move {
            while let Ok(()) = keyspace_receiver.changed().await {
                let keyspace = keyspace_receiver.borrow_and_update().clone();
                let pool = match weak_pool.upgrade() {
                    Some(pool) => pool,
                    None => break,
                };

                if let Some(keyspace) = keyspace {
                    pool.use_keyspace(&keyspace).await;
                }
            }

            trace!(?addr, "Keyspace watch stopped.");
        });

        Ok(pool)
    }

    fn monitor_connections(
        &self,
        mut receiver: mpsc::Receiver<Error>,
        pool: Weak<ConnectionPool<T, CM>>,
        host: Weak<Host>,
    ) {
        let reconnection_policy = self.reconnection_policy.clone();
        let handle = self.handle.clone();

        self.handle.spawn(async move {
            let reconnection_state = Arc::new(Atomic::new(ReconnectionState::NotRunning));
            while receiver.recv().await.is_some() {
                // when one connection goes down, all of them will most likely go down, so we need
                // to protect against many reconnection attempts
                // a disabled loop can still be restarted, e.g. by an UP event for the host
                if reconnection_state.load(Ordering::Relaxed) == ReconnectionState::InProgress {
                    continue;
                }

                let (Some(strong_pool), Some(strong_host)) = (pool.upgrade(), host.upgrade()) else {
                    debug!("Pool or host gone when trying to reconnect.");
                    break;
                };

                if strong_pool.is_closed() {
                    break;
                }

                let addr = strong_host.address();
                if !strong_pool.has_live_connections().await {
                    strong_host.set_down();
                }

                warn!(?addr, "Connection down. Starting reconnection.");
                reconnection_state.store(ReconnectionState::InProgress, Ordering::Relaxed);

                let reconnection_schedule = reconnection_policy.new_host_schedule();
                let reconnecting = reconnection_state.clone();
                let pool = pool.clone();
                let host = host.clone();

                handle.spawn(async move {
                    let new_state =
                        Self::run_reconnection_loop(reconnection_schedule, pool, &host).await;

                    reconnecting.store(new_state, Ordering::Relaxed);
                    debug!(?addr, %new_state, "Reconnection loop stopped.");

                    if new_state == ReconnectionState::NotRunning {
                        if let Some(host) = host.upgrade() {
                            debug!(?addr, "All connections reestablished.");
                            host.bring_up();
                        }
                    }
                });
            }

            debug!("Pool monitoring stopped.");
        });
    }

    async fn run_reconnection_loop(
        mut reconnection_schedule: Box<dyn ReconnectionSchedule + Send + Sync>,
        pool: Weak<ConnectionPool<T, CM>>,
        host: &Weak<Host>,
    ) -> ReconnectionState {
        while let Some(delay) = reconnection_schedule.next_delay() {
            sleep(delay).await;

            let pool = match pool.upgrade() {
                None => return ReconnectionState::Disabled, // the pool might be gone
                Some(pool) => pool,
            };

            if pool.is_closed() {
                return ReconnectionState::Disabled;
            }

            match pool.reconnect_broken().await {
                Ok(true) => return ReconnectionState::NotRunning,
                Ok(false) => return ReconnectionState::Disabled,
                Err(error) => {
                    if let Some(host) = host.upgrade() {
                        host.postpone_retry();
                        debug!(%error, addr = ?host.address(), "Reconnection attempt failed.");
                    }
                }
            }
        }

        // the policy doesn't want to reconnect to this host
        ReconnectionState::Disabled
    }
}

/// Connections owned by a single event loop.
struct Shard<T> {
    connections: RwLock<Vec<Arc<T>>>,
    handle: Handle,
    growing: AtomicBool,
}

impl<T: CqlTransport> Shard<T> {
    async fn has_live_connections(&self) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|connection| !connection.is_broken())
    }
}

/// Connections to a single host, split into shards. Each shard's connections are driven by its
/// event loop, and requests running on that loop borrow only from it.
pub(crate) struct ConnectionPool<T: CqlTransport, CM: ConnectionManager<T>> {
    connection_manager: Weak<CM>,
    addr: SocketAddr,
    config: ConnectionPoolConfig,
    shards: Vec<Shard<T>>,
    core_size: usize,
    max_size: usize,
    closed: AtomicBool,
    error_sender: mpsc::Sender<Error>,
    handle: Handle,
}

impl<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> ConnectionPool<T, CM> {
    async fn new(
        connection_manager: &Arc<CM>,
        addr: SocketAddr,
        config: ConnectionPoolConfig,
        distance: HostDistance,
        error_sender: mpsc::Sender<Error>,
        handle: Handle,
        shard_handles: &[Handle],
    ) -> Result<Self> {
        let core_size = config.core_size(distance);

        // initialize every shard
        let results = join_all(shard_handles.iter().enumerate().flat_map(|(index, shard)| {
            let error_sender = error_sender.clone();
            (0..core_size).map(move |_| {
                let error_sender = error_sender.clone();
                async move {
                    let result =
                        new_connection(connection_manager.as_ref(), addr, error_sender, shard)
                            .await;
                    (index, result)
                }
            })
        }))
        .await;

        let mut connections = vec![vec![]; shard_handles.len()];
        let mut errors = vec![];
        for (index, result) in results {
            match result {
                Ok(connection) => connections[index].push(Arc::new(connection)),
                Err(error) => errors.push(error),
            }
        }

        // nothing could be established - let the caller decide what to do with the host
        if connections.iter().all(Vec::is_empty) {
            if let Some(error) = errors.first() {
                return Err(error.clone());
            }
        }

        if !errors.is_empty() {
            // some connections have failed, but can be brought back up, so trigger reconnection
            let _ = error_sender
                .send(Error::NoConnectionsAvailable(addr))
                .await;
        }

        let shards = connections
            .into_iter()
            .zip(shard_handles)
            .map(|(connections, handle)| Shard {
                connections: RwLock::new(connections),
                handle: handle.clone(),
                growing: AtomicBool::new(false),
            })
            .collect();

        Ok(ConnectionPool {
            connection_manager: Arc::downgrade(connection_manager),
            addr,
            config,
            shards,
            core_size,
            max_size: config.max_size(distance),
            closed: AtomicBool::new(false),
            error_sender,
            handle,
        })
    }

    #[inline]
    pub(crate) fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the least busy live connection of the given shard. May schedule growing the
    /// shard if even that one is above the concurrency threshold.
    pub(crate) async fn connection(self: &Arc<Self>, shard: usize) -> Result<Arc<T>> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let index = shard % self.shards.len();
        let connections = self.shards[index].connections.read().await;
        let connection = connections
            .iter()
            .filter(|connection| !connection.is_broken())
            .min_by_key(|connection| connection.pending_requests())
            .cloned();

        let shard_len = connections.len();
        drop(connections);

        match connection {
            Some(connection) => {
                if connection.pending_requests() >= self.config.max_concurrent_requests_threshold
                    && shard_len < self.max_size
                {
                    self.grow(index);
                }

                Ok(connection)
            }
            None => {
                // we've checked the whole shard and everything's down
                warn!(addr = %self.addr, shard = index, "All connections down to host.");
                Err(Error::NoConnectionsAvailable(self.addr))
            }
        }
    }

    pub(crate) async fn has_live_connections(&self) -> bool {
        for shard in &self.shards {
            if shard.has_live_connections().await {
                return true;
            }
        }

        false
    }

    pub(crate) async fn size(&self) -> usize {
        let mut size = 0;
        for shard in &self.shards {
            size += shard.connections.read().await.len();
        }

        size
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every connection; pending requests fail with a connection-closed error.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for shard in &self.shards {
            for connection in shard.connections.write().await.drain(..) {
                connection.close();
            }
        }
    }

    /// Triggers a reconnection of broken connections, e.g. when the host is reported up.
    pub(crate) fn notify_broken(&self) {
        let _ = self
            .error_sender
            .try_send(Error::NoConnectionsAvailable(self.addr));
    }

    async fn use_keyspace(&self, keyspace: &str) {
        for shard in &self.shards {
            let connections = shard.connections.read().await;
            join_all(
                connections
                    .iter()
                    .filter(|connection| !connection.is_broken())
                    .map(|connection| async move {
                        let frame = use_keyspace_frame(keyspace, connection.version());
                        if let Err(error) = connection.write_frame(&frame).await {
                            error!(%error, addr = ?self.addr, "Error setting keyspace for connection!");
                        }
                    }),
            )
            .await;
        }
    }

    fn grow(self: &Arc<Self>, index: usize) {
        if self.shards[index].growing.swap(true, Ordering::AcqRel) {
            return;
        }

        let pool = Arc::downgrade(self);
        self.handle.spawn(async move {
            let Some(pool) = pool.upgrade() else {
                return;
            };

            let shard = &pool.shards[index];
            if let Some(connection_manager) = pool.connection_manager.upgrade() {
                match new_connection(
                    connection_manager.as_ref(),
                    pool.addr,
                    pool.error_sender.clone(),
                    &shard.handle,
                )
                .await
                {
                    Ok(connection) => {
                        let mut connections = shard.connections.write().await;
                        if connections.len() < pool.max_size && !pool.is_closed() {
                            debug!(
                                addr = ?pool.addr,
                                shard = index,
                                size = connections.len() + 1,
                                "Growing pool."
                            );
                            connections.push(Arc::new(connection));
                        }
                    }
                    Err(error) => {
                        warn!(%error, addr = ?pool.addr, "Unable to grow pool.");
                    }
                }
            }

            shard.growing.store(false, Ordering::Release);
        });
    }

    async fn reconnect_broken(&self) -> Result<bool> {
        let Some(connection_manager) = self.connection_manager.upgrade() else {
            // connection manager is gone - we're probably dropping the session
            return Ok(false);
        };

        for shard in &self.shards {
            let mut connections = shard.connections.write().await;

            // 1. try to reconnect broken
            for connection in connections.deref_mut() {
                if connection.is_broken() {
                    *connection = Arc::new(
                        new_connection(
                            connection_manager.as_ref(),
                            self.addr,
                            self.error_sender.clone(),
                            &shard.handle,
                        )
                        .await?,
                    );
                }
            }

            // 2. try to fill missing
            for _ in connections.len()..self.core_size {
                connections.push(Arc::new(
                    new_connection(
                        connection_manager.as_ref(),
                        self.addr,
                        self.error_sender.clone(),
                        &shard.handle,
                    )
                    .await?,
                ));
            }
        }

        // at this point either all connections are up or some might have died in the meantime,
        // which will trigger a new reconnection
        Ok(true)
    }
}
