use derive_more::Constructor;
use std::net::SocketAddr;

use cql_protocol::consistency::Consistency;

/// A request executed by a `Session`.
#[derive(Constructor, Clone, Debug)]
pub struct Request<'a> {
    pub keyspace: Option<&'a str>,
    pub consistency: Consistency,
    /// Host the request is pinned to.
    pub host: Option<SocketAddr>,
}
