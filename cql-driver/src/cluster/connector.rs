use atomic::Atomic;
use cql_protocol::authenticators::SaslAuthenticatorProvider;
use cql_protocol::compression::Compression;
use cql_protocol::frame::{Frame, Version};
use derivative::Derivative;
use futures::FutureExt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::*;

use crate::cluster::connection_manager::{negotiate_compression, startup, ConnectionManager};
use crate::cluster::KeyspaceHolder;
use crate::error::{Error, Result};
use crate::future::BoxFuture;
use crate::metrics::Metrics;
use crate::transport::{Connection, ConnectionOptions};

/// Establishes ready to use connections: opens the socket on the requested event loop, performs
/// the handshake and, unless a version is forced, negotiates the protocol version by stepping
/// down on rejection. The negotiated version is shared by every later connection.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Connector {
    #[derivative(Debug = "ignore")]
    authenticator_provider: Arc<dyn SaslAuthenticatorProvider>,
    compression: Compression,
    options: ConnectionOptions,
    connect_timeout: Duration,
    forced_version: Option<Version>,
    version: Arc<Atomic<Version>>,
    keyspace_holder: Arc<KeyspaceHolder>,
    #[derivative(Debug = "ignore")]
    metrics: Arc<Metrics>,
}

impl Connector {
    pub fn new(
        authenticator_provider: Arc<dyn SaslAuthenticatorProvider>,
        compression: Compression,
        options: ConnectionOptions,
        connect_timeout: Duration,
        forced_version: Option<Version>,
        keyspace_holder: Arc<KeyspaceHolder>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Connector {
            authenticator_provider,
            compression,
            options,
            connect_timeout,
            forced_version,
            version: Arc::new(Atomic::new(forced_version.unwrap_or(Version::HIGHEST))),
            keyspace_holder,
            metrics,
        }
    }

    /// Version used for new connections; the negotiated one after the first successful
    /// handshake.
    #[inline]
    pub fn version(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    /// Starts connecting to `addr` on the runtime behind `handle`. The attempt can be canceled
    /// through the returned handle, or by dropping it.
    pub fn connect(
        &self,
        event_handler: Option<Sender<Frame>>,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
        handle: &Handle,
    ) -> ConnectHandle {
        let (cancel_sender, mut cancel_receiver) = oneshot::channel::<()>();
        let connector = self.clone();

        // the socket and its handshake live on the loop which will own the connection
        let task = handle.spawn(async move {
            let connect_timeout = connector.connect_timeout;
            let metrics = connector.metrics.clone();
            let connect = tokio::time::timeout(
                connect_timeout,
                connector.connect_negotiating(event_handler, error_handler, addr),
            );

            tokio::select! {
                biased;

                _ = &mut cancel_receiver => {
                    debug!(?addr, "Connection attempt canceled.");
                    Err(Error::Canceled)
                }
                result = connect => match result {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(?addr, ?connect_timeout, "Connection timed out.");
                        metrics.inc_connection_timeouts();
                        Err(Error::ConnectTimeout(addr))
                    }
                }
            }
        });

        ConnectHandle {
            canceler: ConnectCanceler {
                cancel: Arc::new(Mutex::new(Some(cancel_sender))),
            },
            task,
        }
    }

    async fn connect_negotiating(
        self,
        event_handler: Option<Sender<Frame>>,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
    ) -> Result<Connection> {
        let mut version = self.version();

        loop {
            match self
                .establish_connection(event_handler.clone(), error_handler.clone(), addr, version)
                .await
            {
                Ok(connection) => {
                    if self.version() != version {
                        info!(?addr, %version, "Negotiated protocol version.");
                        self.version.store(version, Ordering::Release);
                    }

                    return Ok(connection);
                }
                Err(error)
                    if self.forced_version.is_none() && error.is_protocol_version_rejection() =>
                {
                    match version.lower() {
                        Some(lower) => {
                            warn!(?addr, %version, %lower, %error, "Protocol version rejected, trying lower version.");
                            version = lower;
                        }
                        None => return Err(error),
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn establish_connection(
        &self,
        event_handler: Option<Sender<Frame>>,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
        version: Version,
    ) -> Result<Connection> {
        let connection = Connection::connect(
            addr,
            version,
            &self.options,
            &Handle::current(),
            self.keyspace_holder.clone(),
            event_handler,
            error_handler,
            Some(self.metrics.clone()),
        )
        .await?;

        let compression = negotiate_compression(&connection, self.compression, version).await?;
        connection.set_compression(compression);

        startup(
            &connection,
            self.authenticator_provider.as_ref(),
            &self.keyspace_holder,
            compression,
            version,
        )
        .await?;

        connection.mark_connected();
        debug!(?addr, %version, %compression, "Connection established.");

        Ok(connection)
    }
}

impl ConnectionManager<Connection> for Connector {
    fn connection<'a>(
        &'a self,
        event_handler: Option<Sender<Frame>>,
        error_handler: Option<Sender<Error>>,
        addr: SocketAddr,
        handle: Handle,
    ) -> BoxFuture<'a, Result<Connection>> {
        self.connect(event_handler, error_handler, addr, &handle)
            .boxed()
    }
}

/// Cancels a pending connection attempt. Can be cloned and used from any thread.
#[derive(Clone, Debug)]
pub struct ConnectCanceler {
    cancel: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ConnectCanceler {
    /// Aborts the attempt, unless it has already finished. Only the first call has any effect.
    pub fn cancel(&self) {
        let sender = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// A connection attempt in progress. Resolves to the connection, or to [`Error::Canceled`] when
/// canceled before the handshake completed. Dropping the handle cancels the attempt.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ConnectHandle {
    canceler: ConnectCanceler,
    #[derivative(Debug = "ignore")]
    task: JoinHandle<Result<Connection>>,
}

impl ConnectHandle {
    #[inline]
    pub fn cancel(&self) {
        self.canceler.cancel();
    }

    #[inline]
    pub fn canceler(&self) -> ConnectCanceler {
        self.canceler.clone()
    }
}

impl Future for ConnectHandle {
    type Output = Result<Connection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.task
            .poll_unpin(cx)
            .map(|result| result.unwrap_or(Err(Error::Canceled)))
    }
}

impl Drop for ConnectHandle {
    fn drop(&mut self) {
        self.canceler.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_protocol::authenticators::NoneAuthenticatorProvider;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn connector() -> Connector {
        Connector::new(
            Arc::new(NoneAuthenticatorProvider),
            Compression::None,
            ConnectionOptions::default(),
            Duration::from_secs(5),
            None,
            Arc::new(KeyspaceHolder::new()),
            Arc::new(Metrics::new()),
        )
    }

    /// Accepts a single connection and returns the first bytes the client sends, if any.
    async fn first_request(listener: &TcpListener) -> Option<Vec<u8>> {
        timeout(Duration::from_millis(300), async {
            let (mut socket, _) = listener.accept().await.ok()?;
            let mut header = vec![0; 9];
            socket.read_exact(&mut header).await.ok()?;
            Some(header)
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn should_cancel_once_when_canceled_twice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = connector().connect(None, None, addr, &Handle::current());
        let canceler = handle.canceler();
        handle.cancel();
        canceler.cancel();

        assert!(matches!(handle.await, Err(Error::Canceled)));

        // the handshake never starts
        assert_eq!(first_request(&listener).await, None);
    }

    #[tokio::test]
    async fn should_ignore_cancel_after_completion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut handle = connector().connect(None, None, addr, &Handle::current());
        let result = (&mut handle).await;
        assert!(matches!(result, Err(Error::Connect { addr: failed, .. }) if failed == addr));

        handle.cancel();
        handle.cancel();
    }

    #[tokio::test]
    async fn should_abandon_attempt_when_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = connector();
        let connection = connector.connection(None, None, addr, Handle::current());
        drop(connection);

        assert_eq!(first_request(&listener).await, None);
    }
}
