use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::{Host, HostSet};
use crate::load_balancing::{HostDistance, LoadBalancingPolicy, QueryPlan, Request};

/// Simple round-robin load balancing over every known host. Each plan starts one host further
/// than the previous one, so concurrent plans spread evenly.
#[derive(Default, Debug)]
pub struct RoundRobinLoadBalancingPolicy {
    prev_idx: AtomicUsize,
}

impl RoundRobinLoadBalancingPolicy {
    pub fn new() -> Self {
        Default::default()
    }
}

/// Lazily yields `hosts` starting at `start`, wrapping around.
pub(crate) fn rotated(
    hosts: Vec<Arc<Host>>,
    start: usize,
) -> impl Iterator<Item = Arc<Host>> + Send {
    let len = hosts.len();
    let start = if len == 0 { 0 } else { start % len };
    (0..len).map(move |offset| hosts[(start + offset) % len].clone())
}

impl LoadBalancingPolicy for RoundRobinLoadBalancingPolicy {
    #[inline]
    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn query_plan(&self, _request: &Request, hosts: &Arc<HostSet>) -> QueryPlan {
        let cur_idx = self.prev_idx.fetch_add(1, Ordering::Relaxed);
        QueryPlan::new(rotated(hosts.as_slice().to_vec(), cur_idx))
    }
}
