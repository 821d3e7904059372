use cql_protocol::frame::message_error::{ErrorBody, ErrorType};
use cql_protocol::frame::Opcode;
use cql_protocol::types::CInt;
use derive_more::Display;
use std::io;
use std::net::SocketAddr;
use std::result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Driver error. Cloneable, since a single connection failure is reported to every request
/// waiting on that connection.
#[derive(Debug, Clone, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration, detected before any connection attempt.
    #[error("Bad parameters: {0}")]
    BadParameters(String),
    #[error("Unable to resolve {hostname}: {reason}")]
    Resolve { hostname: String, reason: String },
    #[error("Timed out resolving {0}")]
    ResolveTimeout(String),
    /// The operation was canceled before it completed.
    #[error("Operation canceled")]
    Canceled,
    #[error("Unable to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),
    /// The connection was closed or became defunct while the request was in flight.
    #[error("Connection to {addr} closed: {reason}")]
    ConnectionClosed { addr: SocketAddr, reason: String },
    /// Malformed frame, unsupported version or compression failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] cql_protocol::Error),
    /// Error reported by the server, with its complete diagnostic body.
    #[error("Server error from {addr}: {} (code {:#06x})", body.message, body.code())]
    Server { addr: SocketAddr, body: ErrorBody },
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),
    /// Every stream id of the connection is in use.
    #[error("No streams available on connection to {0}")]
    NoStreamsAvailable(SocketAddr),
    #[error("No connections available to {0}")]
    NoConnectionsAvailable(SocketAddr),
    /// The query plan was exhausted; carries the last error observed, if any.
    #[error("No hosts available (tried {tried:?}){}", last_error_suffix(.last_error))]
    NoHostsAvailable {
        tried: Vec<SocketAddr>,
        last_error: Option<Box<Error>>,
    },
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(Opcode),
    #[error("Session is closed")]
    SessionClosed,
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

fn last_error_suffix(last_error: &Option<Box<Error>>) -> String {
    last_error
        .as_ref()
        .map(|error| format!(", last error: {error}"))
        .unwrap_or_default()
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

/// Broad category of an error, for callers deciding how to react.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transport,
    Protocol,
    Server,
    Configuration,
    ResourceExhaustion,
    Timeout,
}

/// Machine-readable error code.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadParameters,
    Resolve,
    ResolveTimeout,
    Canceled,
    Connect,
    ConnectTimeout,
    ConnectionClosed,
    Protocol,
    /// Server error with the protocol error code.
    #[display("Server({_0:#06x})")]
    Server(CInt),
    RequestTimeout,
    NoStreamsAvailable,
    NoConnectionsAvailable,
    NoHostsAvailable,
    Authentication,
    UnexpectedResponse,
    SessionClosed,
    Io,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BadParameters(_) => ErrorCode::BadParameters,
            Error::Resolve { .. } => ErrorCode::Resolve,
            Error::ResolveTimeout(_) => ErrorCode::ResolveTimeout,
            Error::Canceled => ErrorCode::Canceled,
            Error::Connect { .. } => ErrorCode::Connect,
            Error::ConnectTimeout(_) => ErrorCode::ConnectTimeout,
            Error::ConnectionClosed { .. } => ErrorCode::ConnectionClosed,
            Error::Protocol(_) => ErrorCode::Protocol,
            Error::Server { body, .. } => ErrorCode::Server(body.code()),
            Error::RequestTimeout(_) => ErrorCode::RequestTimeout,
            Error::NoStreamsAvailable(_) => ErrorCode::NoStreamsAvailable,
            Error::NoConnectionsAvailable(_) => ErrorCode::NoConnectionsAvailable,
            Error::NoHostsAvailable { .. } => ErrorCode::NoHostsAvailable,
            Error::Authentication(_) => ErrorCode::Authentication,
            Error::UnexpectedResponse(_) => ErrorCode::UnexpectedResponse,
            Error::SessionClosed => ErrorCode::SessionClosed,
            Error::Io(_) => ErrorCode::Io,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::BadParameters(_) => ErrorClass::Configuration,
            Error::ResolveTimeout(_) | Error::ConnectTimeout(_) | Error::RequestTimeout(_) => {
                ErrorClass::Timeout
            }
            Error::Resolve { .. }
            | Error::Canceled
            | Error::Connect { .. }
            | Error::ConnectionClosed { .. }
            | Error::NoHostsAvailable { .. }
            | Error::SessionClosed
            | Error::Io(_) => ErrorClass::Transport,
            Error::Protocol(_) | Error::UnexpectedResponse(_) => ErrorClass::Protocol,
            Error::Server { .. } | Error::Authentication(_) => ErrorClass::Server,
            Error::NoStreamsAvailable(_) | Error::NoConnectionsAvailable(_) => {
                ErrorClass::ResourceExhaustion
            }
        }
    }

    /// Server error body, if this error was reported by the server.
    pub fn server_error(&self) -> Option<&ErrorBody> {
        match self {
            Error::Server { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Errors after which the same request can be sent to another host without any risk of
    /// it having been applied.
    pub(crate) fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::ConnectTimeout(_)
                | Error::ConnectionClosed { .. }
                | Error::NoConnectionsAvailable(_)
                | Error::Resolve { .. }
                | Error::ResolveTimeout(_)
                | Error::Io(_)
        )
    }

    pub(crate) fn is_protocol_version_rejection(&self) -> bool {
        match self {
            Error::Server { body, .. } => body.ty == ErrorType::Protocol,
            Error::Protocol(cql_protocol::Error::UnsupportedVersion(_)) => true,
            _ => false,
        }
    }
}
