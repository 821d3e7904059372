//! Cassandra native protocol codec: frame headers, message bodies, compression and the
//! primitive notations shared by requests and responses.
//!
//! Built for `cql-driver`, but usable on its own by anything speaking protocol v2 to v4.

pub mod authenticators;
pub mod compression;
pub mod consistency;
pub mod error;
pub mod frame;
pub mod types;

pub type Error = error::Error;
pub type Result<T> = error::Result<T>;
