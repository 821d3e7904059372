use arc_swap::ArcSwap;
use fxhash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::Host;

/// Immutable snapshot of known hosts, in discovery order.
#[derive(Debug, Default, Clone)]
pub struct HostSet {
    hosts: Vec<Arc<Host>>,
    index: FxHashMap<SocketAddr, usize>,
}

impl HostSet {
    pub fn new(hosts: Vec<Arc<Host>>) -> Self {
        let mut set = HostSet::default();
        for host in hosts {
            set.insert(host);
        }

        set
    }

    #[inline]
    pub fn get(&self, address: SocketAddr) -> Option<&Arc<Host>> {
        self.index.get(&address).map(|index| &self.hosts[*index])
    }

    #[inline]
    pub fn as_slice(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn insert(&mut self, host: Arc<Host>) -> bool {
        if self.index.contains_key(&host.address()) {
            return false;
        }

        self.index.insert(host.address(), self.hosts.len());
        self.hosts.push(host);
        true
    }

    fn without(&self, address: SocketAddr) -> Self {
        HostSet::new(
            self.hosts
                .iter()
                .filter(|host| host.address() != address)
                .cloned()
                .collect(),
        )
    }
}

/// Read-mostly registry of cluster hosts. Readers take lock-free snapshots; topology changes
/// replace the whole set.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: ArcSwap<HostSet>,
}

impl HostRegistry {
    pub fn new(hosts: Vec<Arc<Host>>) -> Self {
        HostRegistry {
            hosts: ArcSwap::from_pointee(HostSet::new(hosts)),
        }
    }

    /// Current snapshot.
    #[inline]
    pub fn hosts(&self) -> Arc<HostSet> {
        self.hosts.load_full()
    }

    #[inline]
    pub fn get(&self, address: SocketAddr) -> Option<Arc<Host>> {
        self.hosts.load().get(address).cloned()
    }

    /// Adds a host unless one with the same address exists. Returns whether it was added.
    pub fn add(&self, host: Arc<Host>) -> bool {
        let mut added = false;
        self.hosts.rcu(|hosts| {
            let mut hosts = HostSet::clone(hosts);
            added = hosts.insert(host.clone());
            hosts
        });

        added
    }

    pub fn remove(&self, address: SocketAddr) -> Option<Arc<Host>> {
        let removed = self.get(address)?;
        self.hosts.rcu(|hosts| hosts.without(address));
        Some(removed)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hosts.load().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hosts.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HostInfo;
    use crate::retry::ConstantReconnectionPolicy;
    use std::time::Duration;

    fn host(port: u16) -> Arc<Host> {
        Arc::new(Host::new(
            SocketAddr::from(([127, 0, 0, 1], port)),
            HostInfo::default(),
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1)).unwrap()),
        ))
    }

    #[test]
    fn should_add_and_remove_hosts() {
        let registry = HostRegistry::new(vec![host(1), host(2)]);
        assert!(!registry.add(host(1)));
        assert!(registry.add(host(3)));
        assert_eq!(registry.len(), 3);

        let snapshot = registry.hosts();
        let removed = registry.remove(SocketAddr::from(([127, 0, 0, 1], 2))).unwrap();
        assert_eq!(removed.address().port(), 2);
        assert_eq!(registry.len(), 2);

        // old snapshots are unaffected
        assert_eq!(snapshot.len(), 3);

        let ports: Vec<_> = registry.hosts().iter().map(|h| h.address().port()).collect();
        assert_eq!(ports, vec![1, 3]);
        assert!(registry.get(SocketAddr::from(([127, 0, 0, 1], 3))).is_some());
    }
}
