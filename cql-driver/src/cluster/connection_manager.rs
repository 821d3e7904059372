use cql_protocol::authenticators::SaslAuthenticatorProvider;
use cql_protocol::compression::Compression;
use cql_protocol::consistency::Consistency;
use cql_protocol::frame::message_response::ResponseBody;
use cql_protocol::frame::{Frame, Opcode, Version};
use std::net::SocketAddr;
use tokio::runtime::Handle;
use tokio::sync::mpsc::Sender;
use tracing::*;

#[cfg(test)]
use mockall::*;

use crate::cluster::KeyspaceHolder;
use crate::error::{Error, Result};
use crate::future::BoxFuture;
use crate::statement::Statement;
use crate::transport::CqlTransport;

/// Manages establishing connections to hosts.
pub trait ConnectionManager<T: CqlTransport>: Send + Sync {
    /// Tries to establish a new, ready to use connection with optional server event and error
    /// handlers. The connection is driven by the runtime behind `handle` for its whole life.
    /// Dropping the returned future abandons the attempt.
    fn connection<'a>(
        &'a self,
        event_handler: Option<Sender<Frame>>,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
        handle: Handle,
    ) -> BoxFuture<'a, Result<T>>;
}

#[cfg(test)]
mock! {
    pub ConnectionManager<T: CqlTransport> {
    }

    impl<T: CqlTransport> ConnectionManager<T> for ConnectionManager<T> {
        fn connection<'a>(
            &'a self,
            event_handler: Option<Sender<Frame>>,
            error_handler: Option<Sender<Error>>,
            addr: SocketAddr,
            handle: Handle,
        ) -> BoxFuture<'a, Result<T>>;
    }
}

/// Turns an unexpected response into an error, keeping server errors intact.
pub(crate) fn unexpected_response(frame: &Frame, addr: SocketAddr) -> Error {
    if frame.opcode == Opcode::Error {
        if let Ok(ResponseBody::Error(body)) = frame.response_body() {
            return Error::Server { addr, body };
        }
    }

    Error::UnexpectedResponse(frame.opcode)
}

pub(crate) fn use_keyspace_frame(keyspace: &str, version: Version) -> Frame {
    Statement::new(format!("USE \"{}\"", keyspace.replace('"', "\"\"")))
        .to_frame(Consistency::One, version)
}

/// Negotiates compression with `OPTIONS`. Returns the compression to use, which falls back to
/// none if the server does not support the requested one.
pub async fn negotiate_compression<T: CqlTransport + ?Sized>(
    transport: &T,
    compression: Compression,
    version: Version,
) -> Result<Compression> {
    let addr = transport.address();
    let response = transport
        .write_frame(&Frame::new_req_options(version))
        .await?;

    let supported = match response.response_body()? {
        ResponseBody::Supported(supported) => supported,
        _ => return Err(unexpected_response(&response, addr)),
    };

    let negotiated = compression.negotiate(supported.compression());
    if negotiated != compression {
        warn!(
            ?addr,
            %compression,
            supported = ?supported.compression(),
            "Requested compression not supported by server, falling back to none."
        );
    }

    Ok(negotiated)
}

/// Sends `STARTUP` and completes authentication, if the server requests it. Then switches to
/// the current keyspace, if any.
pub async fn startup<T: CqlTransport + ?Sized, A: SaslAuthenticatorProvider + ?Sized>(
    transport: &T,
    authenticator_provider: &A,
    keyspace_holder: &KeyspaceHolder,
    compression: Compression,
    version: Version,
) -> Result<()> {
    let addr = transport.address();
    let startup_frame = Frame::new_req_startup(compression, version);
    let start_response = transport.write_frame(&startup_frame).await?;

    match start_response.opcode {
        Opcode::Ready => {}
        Opcode::Authenticate => {
            authenticate(transport, authenticator_provider, &start_response, version).await?
        }
        _ => return Err(unexpected_response(&start_response, addr)),
    }

    set_keyspace(transport, keyspace_holder, version).await
}

async fn authenticate<T: CqlTransport + ?Sized, A: SaslAuthenticatorProvider + ?Sized>(
    transport: &T,
    authenticator_provider: &A,
    start_response: &Frame,
    version: Version,
) -> Result<()> {
    let addr = transport.address();
    let authenticator = match start_response.response_body()? {
        ResponseBody::Authenticate(authenticate) => authenticate.authenticator,
        _ => return Err(unexpected_response(start_response, addr)),
    };

    match authenticator_provider.name() {
        None => {
            return Err(Error::Authentication(format!(
                "Host {addr} requires authentication ({authenticator}), but no credentials were provided"
            )))
        }
        Some(name) if name != authenticator => {
            return Err(Error::Authentication(format!(
                "Unsupported type of authenticator. {authenticator} got, but {name} is supported."
            )))
        }
        _ => {}
    }

    let mut authenticator = authenticator_provider.create_authenticator();
    let response = authenticator.initial_response();
    let mut frame = transport
        .write_frame(&Frame::new_req_auth_response(response, version))
        .await?;

    loop {
        match frame.response_body()? {
            ResponseBody::AuthChallenge(challenge) => {
                let response = authenticator
                    .evaluate_challenge(challenge.token.as_slice())
                    .map_err(|error| Error::Authentication(error.to_string()))?;

                frame = transport
                    .write_frame(&Frame::new_req_auth_response(response, version))
                    .await?;
            }
            ResponseBody::AuthSuccess(success) => {
                return authenticator
                    .handle_success(success.token.as_slice())
                    .map_err(|error| Error::Authentication(error.to_string()));
            }
            ResponseBody::Error(body) => {
                return Err(Error::Authentication(format!(
                    "{} (code {:#06x})",
                    body.message,
                    body.code()
                )))
            }
            _ => return Err(Error::UnexpectedResponse(frame.opcode)),
        }
    }
}

async fn set_keyspace<T: CqlTransport + ?Sized>(
    transport: &T,
    keyspace_holder: &KeyspaceHolder,
    version: Version,
) -> Result<()> {
    if let Some(current_keyspace) = keyspace_holder.current_keyspace() {
        let response = transport
            .write_frame(&use_keyspace_frame(&current_keyspace, version))
            .await?;

        if response.opcode != Opcode::Result {
            return Err(unexpected_response(&response, transport.address()));
        }
    }

    Ok(())
}
