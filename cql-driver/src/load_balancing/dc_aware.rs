use fxhash::FxHashMap;
use itertools::Itertools;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::{Host, HostSet};
use crate::error::{Error, Result};
use crate::load_balancing::round_robin::rotated;
use crate::load_balancing::{HostDistance, LoadBalancingPolicy, QueryPlan, Request};

/// Datacenter-aware round-robin load balancing. Hosts in the local datacenter are tried first,
/// in round-robin order; then at most `used_hosts_per_remote_dc` hosts from each remote
/// datacenter. Hosts with unknown datacenter (e.g. contact points before discovery) are
/// treated as local.
#[derive(Debug)]
pub struct DcAwareLoadBalancingPolicy {
    local_dc: String,
    used_hosts_per_remote_dc: usize,
    skip_remote_dcs_for_local_cl: bool,
    prev_idx: AtomicUsize,
}

impl DcAwareLoadBalancingPolicy {
    /// Creates new policy. `skip_remote_dcs_for_local_cl` excludes remote hosts for
    /// `LOCAL_*` consistency levels, since they could not satisfy them anyway.
    pub fn new(
        local_dc: impl Into<String>,
        used_hosts_per_remote_dc: usize,
        skip_remote_dcs_for_local_cl: bool,
    ) -> Result<Self> {
        let local_dc = local_dc.into();
        if local_dc.is_empty() {
            return Err(Error::BadParameters(
                "Local datacenter is required for DC-aware load balancing".into(),
            ));
        }

        Ok(DcAwareLoadBalancingPolicy {
            local_dc,
            used_hosts_per_remote_dc,
            skip_remote_dcs_for_local_cl,
            prev_idx: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn local_dc(&self) -> &str {
        &self.local_dc
    }

    fn is_local(&self, host: &Host) -> bool {
        host.info()
            .datacenter
            .as_deref()
            .map(|dc| dc == self.local_dc)
            .unwrap_or(true)
    }
}

impl LoadBalancingPolicy for DcAwareLoadBalancingPolicy {
    fn distance(&self, host: &Host) -> HostDistance {
        if self.is_local(host) {
            HostDistance::Local
        } else if self.used_hosts_per_remote_dc > 0 {
            HostDistance::Remote
        } else {
            HostDistance::Ignored
        }
    }

    fn query_plan(&self, request: &Request, hosts: &Arc<HostSet>) -> QueryPlan {
        let cur_idx = self.prev_idx.fetch_add(1, Ordering::Relaxed);

        let (local, remote): (Vec<_>, Vec<_>) = hosts
            .iter()
            .cloned()
            .partition(|host| self.is_local(host));

        let local = rotated(local, cur_idx);

        if self.used_hosts_per_remote_dc == 0
            || (self.skip_remote_dcs_for_local_cl && request.consistency.is_dc_local())
        {
            return QueryPlan::new(local);
        }

        let mut per_dc: FxHashMap<String, Vec<Arc<Host>>> = FxHashMap::default();
        for host in remote {
            per_dc
                .entry(host.datacenter().unwrap_or_default())
                .or_default()
                .push(host);
        }

        let used_hosts_per_remote_dc = self.used_hosts_per_remote_dc;
        let remote = per_dc
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .flat_map(move |(_, hosts)| {
                rotated(hosts, cur_idx)
                    .take(used_hosts_per_remote_dc)
                    .collect_vec()
            })
            .collect_vec();

        QueryPlan::new(local.chain(remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::HostInfo;
    use crate::retry::ConstantReconnectionPolicy;
    use cql_protocol::consistency::Consistency;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn hosts(dcs: &[&str]) -> Arc<HostSet> {
        let policy = Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1)).unwrap());
        Arc::new(HostSet::new(
            dcs.iter()
                .enumerate()
                .map(|(index, dc)| {
                    Arc::new(Host::new(
                        SocketAddr::from(([127, 0, 0, 1], index as u16)),
                        HostInfo {
                            datacenter: Some(dc.to_string()),
                            ..Default::default()
                        },
                        policy.clone(),
                    ))
                })
                .collect(),
        ))
    }

    fn dcs(plan: QueryPlan) -> Vec<String> {
        plan.map(|host| host.datacenter().unwrap()).collect()
    }

    #[test]
    fn should_reject_empty_local_dc() {
        assert!(matches!(
            DcAwareLoadBalancingPolicy::new("", 1, false),
            Err(Error::BadParameters(_))
        ));
    }

    #[test]
    fn should_prefer_local_hosts() {
        let hosts = hosts(&["dc2", "dc1", "dc3", "dc1", "dc2", "dc3"]);
        let policy = DcAwareLoadBalancingPolicy::new("dc1", 1, false).unwrap();
        let request = Request::new(None, Consistency::Quorum, None);

        assert_eq!(
            dcs(policy.query_plan(&request, &hosts)),
            vec!["dc1", "dc1", "dc2", "dc3"]
        );
    }

    #[test]
    fn should_skip_remote_hosts_for_local_consistency() {
        let hosts = hosts(&["dc1", "dc2", "dc1"]);
        let policy = DcAwareLoadBalancingPolicy::new("dc1", 2, true).unwrap();

        let request = Request::new(None, Consistency::LocalQuorum, None);
        assert_eq!(dcs(policy.query_plan(&request, &hosts)), vec!["dc1", "dc1"]);

        let request = Request::new(None, Consistency::Quorum, None);
        assert_eq!(
            dcs(policy.query_plan(&request, &hosts)),
            vec!["dc1", "dc1", "dc2"]
        );
    }

    #[test]
    fn should_ignore_remote_hosts_without_remote_usage() {
        let hosts = hosts(&["dc1", "dc2"]);
        let policy = DcAwareLoadBalancingPolicy::new("dc1", 0, false).unwrap();

        assert_eq!(policy.distance(&hosts.as_slice()[0]), HostDistance::Local);
        assert_eq!(policy.distance(&hosts.as_slice()[1]), HostDistance::Ignored);
    }
}
