use arc_swap::ArcSwap;
use futures::future::join_all;
use fxhash::{FxHashMap, FxHashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tracing::*;

use crate::cluster::connection_pool::{ConnectionPool, ConnectionPoolFactory};
use crate::cluster::{ConnectionManager, Host, HostInfo, HostRegistry, HostSet};
use crate::load_balancing::{HostDistance, LoadBalancingPolicy};
use crate::retry::ReconnectionPolicy;
use crate::transport::CqlTransport;

type PoolMap<T, CM> = FxHashMap<SocketAddr, Arc<ConnectionPool<T, CM>>>;

/// Keeps the known hosts and their connection pools in sync: hosts come from contact points,
/// discovery and server events; every host the load balancing policy doesn't ignore gets a pool.
pub(crate) struct ClusterMetadataManager<
    T: CqlTransport + 'static,
    CM: ConnectionManager<T> + 'static,
> {
    registry: HostRegistry,
    pools: ArcSwap<PoolMap<T, CM>>,
    pool_factory: ConnectionPoolFactory<T, CM>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    closed: AtomicBool,
    handle: Handle,
}

impl<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> ClusterMetadataManager<T, CM> {
    pub(crate) fn new(
        contact_points: Vec<SocketAddr>,
        pool_factory: ConnectionPoolFactory<T, CM>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
        handle: Handle,
    ) -> Self {
        let hosts = contact_points
            .into_iter()
            .map(|addr| {
                Arc::new(Host::new(
                    addr,
                    HostInfo::default(),
                    reconnection_policy.clone(),
                ))
            })
            .collect();

        ClusterMetadataManager {
            registry: HostRegistry::new(hosts),
            pools: Default::default(),
            pool_factory,
            load_balancing,
            reconnection_policy,
            closed: AtomicBool::new(false),
            handle,
        }
    }

    #[inline]
    pub(crate) fn hosts(&self) -> Arc<HostSet> {
        self.registry.hosts()
    }

    #[inline]
    pub(crate) fn pool(&self, addr: SocketAddr) -> Option<Arc<ConnectionPool<T, CM>>> {
        self.pools.load().get(&addr).cloned()
    }

    #[inline]
    pub(crate) fn load_balancing(&self) -> &Arc<dyn LoadBalancingPolicy> {
        &self.load_balancing
    }

    #[inline]
    pub(crate) fn connection_manager(&self) -> &Arc<CM> {
        self.pool_factory.connection_manager()
    }

    /// Runtime running cluster bookkeeping: pool monitors and the control connection.
    #[inline]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    #[inline]
    pub(crate) fn reconnection_policy(&self) -> &Arc<dyn ReconnectionPolicy + Send + Sync> {
        &self.reconnection_policy
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Creates pools for every known host which doesn't have one yet.
    pub(crate) async fn connect_pools(self: &Arc<Self>) {
        let hosts = self.hosts();
        join_all(hosts.iter().map(|host| self.ensure_pool(host))).await;
    }

    /// Number of hosts with a pool which has at least one live connection.
    pub(crate) async fn connected_hosts(&self) -> usize {
        let pools = self.pools.load_full();
        let mut connected = 0;
        for pool in pools.values() {
            if pool.has_live_connections().await {
                connected += 1;
            }
        }

        connected
    }

    /// Adds a newly discovered host and connects to it. Returns `false` if it was known.
    pub(crate) async fn add_host(self: &Arc<Self>, addr: SocketAddr, info: HostInfo) -> bool {
        let host = Arc::new(Host::new(addr, info, self.reconnection_policy.clone()));
        if !self.registry.add(host.clone()) {
            return false;
        }

        info!(?addr, "Host added.");
        self.ensure_pool(&host).await;
        true
    }

    /// Removes a host and closes its pool.
    pub(crate) async fn remove_host(&self, addr: SocketAddr) -> bool {
        let removed = self.registry.remove(addr).is_some();
        if removed {
            info!(?addr, "Host removed.");
        }

        self.remove_pool(addr).await;
        removed
    }

    /// Handles a host reported up by the cluster.
    pub(crate) async fn host_up(self: &Arc<Self>, addr: SocketAddr) {
        let Some(host) = self.registry.get(addr) else {
            return;
        };

        match self.pool(addr) {
            Some(pool) => {
                if !pool.has_live_connections().await {
                    // restart reconnection right away instead of waiting for the schedule
                    pool.notify_broken();
                } else {
                    host.bring_up();
                }
            }
            None => {
                host.bring_up();
                self.ensure_pool(&host).await;
            }
        }
    }

    /// Handles a host reported down by the cluster.
    pub(crate) fn host_down(&self, addr: SocketAddr) {
        if let Some(host) = self.registry.get(addr) {
            host.set_down();
        }
    }

    /// Replaces known hosts with the discovered ones: updates the info of known hosts, adds new
    /// ones and removes the ones which are gone.
    pub(crate) async fn refresh(self: &Arc<Self>, discovered: Vec<(SocketAddr, HostInfo)>) {
        if discovered.is_empty() {
            return;
        }

        let discovered_addrs: FxHashSet<_> = discovered.iter().map(|(addr, _)| *addr).collect();
        for host in self.hosts().iter() {
            if !discovered_addrs.contains(&host.address()) {
                self.remove_host(host.address()).await;
            }
        }

        let mut hosts = Vec::with_capacity(discovered.len());
        for (addr, info) in discovered {
            match self.registry.get(addr) {
                Some(host) => {
                    host.update_info(info);
                    hosts.push(host);
                }
                None => {
                    let host = Arc::new(Host::new(addr, info, self.reconnection_policy.clone()));
                    if self.registry.add(host.clone()) {
                        info!(?addr, "Host discovered.");
                    }

                    hosts.push(host);
                }
            }
        }

        // distances might have changed with the datacenter information
        join_all(hosts.iter().map(|host| self.ensure_pool(host))).await;
    }

    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        let pools = self.pools.swap(Default::default());
        join_all(pools.values().map(|pool| pool.close())).await;
    }

    async fn ensure_pool(self: &Arc<Self>, host: &Arc<Host>) {
        let addr = host.address();
        let distance = self.load_balancing.distance(host);

        if distance == HostDistance::Ignored {
            self.remove_pool(addr).await;
            return;
        }

        if self.is_closed() || self.pools.load().contains_key(&addr) {
            return;
        }

        match self.pool_factory.create(distance, host).await {
            Ok(pool) => {
                self.insert_pool(pool).await;
            }
            Err(error) => {
                warn!(%error, ?addr, "Unable to create connection pool.");
                host.set_down();
                self.retry_pool_creation(host);
            }
        }
    }

    async fn insert_pool(&self, pool: Arc<ConnectionPool<T, CM>>) -> bool {
        let addr = pool.address();
        let mut inserted = false;

        self.pools.rcu(|pools| {
            let mut pools = PoolMap::clone(pools);
            inserted = !pools.contains_key(&addr) && self.registry.get(addr).is_some();
            if inserted {
                pools.insert(addr, pool.clone());
            }

            pools
        });

        // lost a race with another pool, a removal or closing the session
        if !inserted || self.is_closed() {
            pool.close().await;
            if self.is_closed() {
                self.remove_pool(addr).await;
            }

            return false;
        }

        debug!(?addr, "Connection pool created.");
        true
    }

    async fn remove_pool(&self, addr: SocketAddr) {
        let mut removed = None;
        self.pools.rcu(|pools| {
            let mut pools = PoolMap::clone(pools);
            removed = pools.remove(&addr);
            pools
        });

        if let Some(pool) = removed {
            debug!(?addr, "Closing connection pool.");
            pool.close().await;
        }
    }

    fn retry_pool_creation(self: &Arc<Self>, host: &Arc<Host>) {
        let manager = Arc::downgrade(self);
        let weak_host = Arc::downgrade(host);
        let addr = host.address();

        self.handle.spawn(async move {
            let mut delay = weak_host.upgrade().and_then(|host| host.last_retry_delay());

            while let Some(current_delay) = delay {
                sleep(current_delay).await;

                let (Some(manager), Some(host)) = (manager.upgrade(), weak_host.upgrade()) else {
                    break;
                };

                if !Self::should_retry(&manager, &host) {
                    break;
                }

                let distance = manager.load_balancing.distance(&host);
                if distance == HostDistance::Ignored {
                    break;
                }

                match manager.pool_factory.create(distance, &host).await {
                    Ok(pool) => {
                        if manager.insert_pool(pool).await {
                            host.bring_up();
                        }

                        break;
                    }
                    Err(error) => {
                        debug!(%error, ?addr, "Connection pool creation attempt failed.");
                        delay = host.postpone_retry();
                    }
                }
            }

            trace!(?addr, "Pool creation retries stopped.");
        });
    }

    fn should_retry(manager: &Arc<Self>, host: &Arc<Host>) -> bool {
        let addr = host.address();
        !manager.is_closed()
            && !manager.pools.load().contains_key(&addr)
            && manager
                .registry
                .get(addr)
                .map(|current| Arc::ptr_eq(&current, host))
                .unwrap_or(false)
    }
}
