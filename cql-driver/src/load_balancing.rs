//! Load balancing policies decide which hosts serve a request, and in which order.
mod dc_aware;
mod query_plan;
mod request;
mod round_robin;
mod single_host;

use std::sync::Arc;

use crate::cluster::{Host, HostSet};
pub use crate::load_balancing::dc_aware::DcAwareLoadBalancingPolicy;
pub use crate::load_balancing::query_plan::QueryPlan;
pub use crate::load_balancing::request::Request;
pub use crate::load_balancing::round_robin::RoundRobinLoadBalancingPolicy;
pub use crate::load_balancing::single_host::SingleHostLoadBalancingPolicy;

/// Distance of a host, as seen by a policy. Determines pool sizing; ignored hosts never appear
/// in query plans and get no pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostDistance {
    Local,
    Remote,
    Ignored,
}

/// Load balancing policy, producing a fresh query plan for every request.
pub trait LoadBalancingPolicy: Send + Sync {
    /// Returns the distance to given host.
    fn distance(&self, host: &Host) -> HostDistance;

    /// Returns query plan for given request.
    fn query_plan(&self, request: &Request, hosts: &Arc<HostSet>) -> QueryPlan;
}
