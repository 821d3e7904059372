use std::fmt::{Debug, Formatter};
use std::iter;
use std::sync::Arc;

use crate::cluster::Host;

/// Ordered, single-use sequence of candidate hosts for one request. Hosts which are down and
/// not yet eligible for a retry are skipped.
pub struct QueryPlan {
    hosts: Box<dyn Iterator<Item = Arc<Host>> + Send>,
}

impl Debug for QueryPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan").finish_non_exhaustive()
    }
}

impl QueryPlan {
    pub fn new(hosts: impl Iterator<Item = Arc<Host>> + Send + 'static) -> Self {
        QueryPlan {
            hosts: Box::new(hosts),
        }
    }

    pub fn empty() -> Self {
        Self::new(iter::empty())
    }

    pub fn single(host: Arc<Host>) -> Self {
        Self::new(iter::once(host))
    }

    /// Next host to try, `None` when the plan is exhausted.
    pub fn next_host(&mut self) -> Option<Arc<Host>> {
        self.hosts.find(|host| host.is_considerably_up())
    }
}

impl Iterator for QueryPlan {
    type Item = Arc<Host>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.next_host()
    }
}

impl From<Vec<Arc<Host>>> for QueryPlan {
    fn from(hosts: Vec<Arc<Host>>) -> Self {
        Self::new(hosts.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HostInfo;
    use crate::retry::ConstantReconnectionPolicy;
    use std::net::SocketAddr;
    use std::time::Duration;

    #[test]
    fn should_skip_down_hosts() {
        let policy = Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(60)).unwrap());
        let hosts: Vec<_> = (1..=3)
            .map(|port| {
                Arc::new(Host::new(
                    SocketAddr::from(([127, 0, 0, 1], port)),
                    HostInfo::default(),
                    policy.clone(),
                ))
            })
            .collect();

        hosts[1].set_down();

        let ports: Vec<_> = QueryPlan::from(hosts)
            .map(|host| host.address().port())
            .collect();
        assert_eq!(ports, vec![1, 3]);
    }
}
