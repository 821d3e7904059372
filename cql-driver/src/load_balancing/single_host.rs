use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::{Host, HostSet};
use crate::load_balancing::{HostDistance, LoadBalancingPolicy, QueryPlan, Request};

/// Load balancing policy always returning the same host. Every other host is ignored.
#[derive(Debug, Clone, Copy)]
pub struct SingleHostLoadBalancingPolicy {
    address: SocketAddr,
}

impl SingleHostLoadBalancingPolicy {
    pub fn new(address: SocketAddr) -> Self {
        SingleHostLoadBalancingPolicy { address }
    }
}

impl LoadBalancingPolicy for SingleHostLoadBalancingPolicy {
    fn distance(&self, host: &Host) -> HostDistance {
        if host.address() == self.address {
            HostDistance::Local
        } else {
            HostDistance::Ignored
        }
    }

    fn query_plan(&self, _request: &Request, hosts: &Arc<HostSet>) -> QueryPlan {
        hosts
            .get(self.address)
            .cloned()
            .map(QueryPlan::single)
            .unwrap_or_else(QueryPlan::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HostInfo;
    use crate::retry::ConstantReconnectionPolicy;
    use cql_protocol::consistency::Consistency;
    use std::time::Duration;

    #[test]
    fn single_host() {
        let policy = Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1)).unwrap());
        let hosts = Arc::new(HostSet::new(
            (1..=2)
                .map(|port| {
                    Arc::new(Host::new(
                        SocketAddr::from(([127, 0, 0, 1], port)),
                        HostInfo::default(),
                        policy.clone(),
                    ))
                })
                .collect(),
        ));

        let address = SocketAddr::from(([127, 0, 0, 1], 2));
        let load_balancer = SingleHostLoadBalancingPolicy::new(address);
        let request = Request::new(None, Consistency::One, None);

        let mut plan = load_balancer.query_plan(&request, &hosts);
        assert_eq!(plan.next_host().unwrap().address(), address);
        assert!(plan.next_host().is_none());

        // and one more time to check
        let mut plan = load_balancer.query_plan(&request, &hosts);
        assert_eq!(plan.next_host().unwrap().address(), address);

        assert_eq!(
            load_balancer.distance(&hosts.as_slice()[0]),
            HostDistance::Ignored
        );
    }
}
