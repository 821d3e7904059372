//! This module contains a declaration of `CqlTransport` trait which should be implemented
//! for particular transport in order to be able using it as a transport of the driver.
//!
//! [`Connection`] is the default implementation: a single socket (plain TCP or, with the
//! `rust-tls` feature, TLS) multiplexing concurrent requests over protocol stream ids.
use atomic::Atomic;
use bytemuck::NoUninit;
use cql_protocol::compression::Compression;
use cql_protocol::frame::message_result::ResultKind;
use cql_protocol::frame::message_response::ResponseBody;
use cql_protocol::frame::{Frame, Opcode, StreamId, Version, EVENT_STREAM_ID};
use cql_protocol::types::{try_i32_from_bytes, INT_LEN};
use derive_more::Display;
use futures::FutureExt;
use std::future::pending;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::*;

#[cfg(feature = "rust-tls")]
use tokio_rustls::rustls::pki_types::ServerName;
#[cfg(feature = "rust-tls")]
use tokio_rustls::rustls::ClientConfig;
#[cfg(feature = "rust-tls")]
use tokio_rustls::TlsConnector;

#[cfg(test)]
use mockall::*;

use crate::cluster::KeyspaceHolder;
use crate::frame_parser::{parse_frame, ParsedFrame};
use crate::future::BoxFuture;
use crate::metrics::Metrics;
use crate::Error;
use crate::Result;

pub mod stream_manager;

pub use stream_manager::StreamManager;

/// General transport trait.
pub trait CqlTransport: Send + Sync {
    /// Schedules data frame for writing and waits for a response
    fn write_frame<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Frame>>;

    /// Checks if the connection is broken (e.g. after read or write errors) or closed
    fn is_broken(&self) -> bool;

    /// Returns associated host address
    fn address(&self) -> SocketAddr;

    /// Returns negotiated protocol version
    fn version(&self) -> Version;

    /// Returns the number of requests waiting for a response
    fn pending_requests(&self) -> usize;

    /// Closes the connection, failing pending requests
    fn close(&self);
}

#[cfg(test)]
mock! {
    pub CqlTransport {
    }

    impl CqlTransport for CqlTransport {
        fn write_frame(&self, frame: &Frame) -> BoxFuture<'static, Result<Frame>>;

        fn is_broken(&self) -> bool;

        fn address(&self) -> SocketAddr;

        fn version(&self) -> Version;

        fn pending_requests(&self) -> usize;

        fn close(&self);
    }
}

/// Lifecycle of a connection. `Defunct` is terminal and entered on any unrecoverable I/O or
/// protocol error.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, NoUninit)]
#[repr(u8)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Closing,
    Closed,
    Defunct,
}

/// TLS settings for encrypted connections.
#[cfg(feature = "rust-tls")]
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub config: Arc<ClientConfig>,
    /// Name to verify the server certificate against. The host ip address is used if not set.
    pub server_name: Option<String>,
}

/// Settings of a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub buffer_size: usize,
    pub tcp_nodelay: bool,
    #[cfg(feature = "rust-tls")]
    pub tls: Option<TlsOptions>,
    /// Idle time after which a heartbeat is sent. Zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Time without any response after which the connection is considered dead. Zero disables
    /// the check.
    pub idle_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            buffer_size: 1024,
            tcp_nodelay: true,
            #[cfg(feature = "rust-tls")]
            tls: None,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

type ResponseHandler = oneshot::Sender<Result<Frame>>;

struct Request {
    data: Vec<u8>,
    handler: ResponseHandler,
}

struct SharedState {
    addr: SocketAddr,
    version: Version,
    state: Atomic<ConnectionState>,
    compression: Atomic<Compression>,
    streams: Mutex<StreamManager<ResponseHandler>>,
    created: Instant,
    last_read_millis: AtomicU64,
    close_reason: Mutex<Option<String>>,
    close_notify: Notify,
}

impl SharedState {
    #[inline]
    fn streams(&self) -> MutexGuard<'_, StreamManager<ResponseHandler>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn state(&self) -> ConnectionState {
        self.state.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_read_millis
            .store(self.created.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_time(&self) -> Duration {
        let last_read = Duration::from_millis(self.last_read_millis.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last_read)
    }

    fn closed_error(&self) -> Error {
        let reason = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "connection closed".into());

        Error::ConnectionClosed {
            addr: self.addr,
            reason,
        }
    }

    fn respond(&self, stream_id: StreamId, response: Result<Frame>) -> Result<()> {
        let handler = self.streams().release(stream_id);
        match handler {
            Some(handler) => {
                // a closed receiver means the caller gave up waiting, which is fine
                let _ = handler.send(response);
                Ok(())
            }
            // unmatched stream - probably a bug somewhere
            None => Err(Error::Protocol(
                format!("Unmatched stream id: {stream_id}").into(),
            )),
        }
    }

    fn signal_closed(&self) {
        let error = self.closed_error();
        for (_, handler) in self.streams().drain() {
            let _ = handler.send(Err(error.clone()));
        }
    }
}

/// A single multiplexed connection to a host.
pub struct Connection {
    shared: Arc<SharedState>,
    write_sender: mpsc::Sender<Request>,
    processing_handle: JoinHandle<()>,
    metrics: Option<Arc<Metrics>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.processing_handle.abort();

        if let Some(metrics) = &self.metrics {
            metrics.dec_connections();
        }
    }
}

impl Connection {
    /// Opens a socket (encrypted, if configured) to the given address and starts processing
    /// on it.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        addr: SocketAddr,
        version: Version,
        options: &ConnectionOptions,
        handle: &Handle,
        keyspace_holder: Arc<KeyspaceHolder>,
        event_handler: Option<mpsc::Sender<Frame>>,
        error_handler: Option<mpsc::Sender<Error>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(|error| Error::Connect {
                addr,
                reason: error.to_string(),
            })?;
        socket.set_nodelay(options.tcp_nodelay)?;

        #[cfg(feature = "rust-tls")]
        if let Some(tls) = &options.tls {
            let server_name = match &tls.server_name {
                Some(name) => ServerName::try_from(name.clone()).map_err(|error| {
                    Error::BadParameters(format!("Invalid TLS server name {name}: {error}"))
                })?,
                None => ServerName::from(addr.ip()),
            };

            let connector = TlsConnector::from(tls.config.clone());
            let stream = connector
                .connect(server_name, socket)
                .await
                .map_err(|error| Error::Connect {
                    addr,
                    reason: format!("TLS handshake failed: {error}"),
                })?;

            return Ok(Self::new(
                stream,
                addr,
                version,
                options,
                handle,
                keyspace_holder,
                event_handler,
                error_handler,
                metrics,
            ));
        }

        Ok(Self::new(
            socket,
            addr,
            version,
            options,
            handle,
            keyspace_holder,
            event_handler,
            error_handler,
            metrics,
        ))
    }

    /// Starts processing on an established stream. The connection is usable for the handshake
    /// right away and becomes [`Connected`](ConnectionState::Connected) once
    /// [`mark_connected`](Self::mark_connected) is called.
    #[allow(clippy::too_many_arguments)]
    pub fn new<T: AsyncRead + AsyncWrite + Send + 'static>(
        stream: T,
        addr: SocketAddr,
        version: Version,
        options: &ConnectionOptions,
        handle: &Handle,
        keyspace_holder: Arc<KeyspaceHolder>,
        event_handler: Option<mpsc::Sender<Frame>>,
        error_handler: Option<mpsc::Sender<Error>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (write_sender, write_receiver) = mpsc::channel(options.buffer_size.max(1));
        let shared = Arc::new(SharedState {
            addr,
            version,
            state: Atomic::new(ConnectionState::New),
            compression: Atomic::new(Compression::None),
            streams: Mutex::new(StreamManager::new(version)),
            created: Instant::now(),
            last_read_millis: AtomicU64::new(0),
            close_reason: Mutex::new(None),
            close_notify: Notify::new(),
        });

        let (read_half, write_half) = split(stream);

        shared
            .state
            .store(ConnectionState::Connecting, Ordering::Release);

        if let Some(metrics) = &metrics {
            metrics.inc_connections();
        }

        let processing_handle = handle.spawn(Self::start_processing(
            shared.clone(),
            write_receiver,
            write_sender.clone(),
            read_half,
            write_half,
            options.clone(),
            keyspace_holder,
            event_handler,
            error_handler,
        ));

        Connection {
            shared,
            write_sender,
            processing_handle,
            metrics,
        }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    #[inline]
    pub fn compression(&self) -> Compression {
        self.shared.compression.load(Ordering::Acquire)
    }

    /// Switches compression. Called once STARTUP is about to be sent, since every later frame
    /// may be compressed.
    pub(crate) fn set_compression(&self, compression: Compression) {
        self.shared.compression.store(compression, Ordering::Release);
    }

    /// Marks a successful handshake.
    pub(crate) fn mark_connected(&self) {
        let _ = self.shared.state.compare_exchange(
            ConnectionState::Connecting,
            ConnectionState::Connected,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    #[inline]
    pub fn available_streams(&self) -> usize {
        self.shared.streams().available()
    }

    async fn send_frame(&self, frame: &Frame) -> Result<Frame> {
        if self.is_broken() {
            return Err(self.shared.closed_error());
        }

        let data = frame.encode_with(self.compression())?;
        let (sender, receiver) = oneshot::channel();

        self.write_sender
            .send(Request {
                data,
                handler: sender,
            })
            .await
            .map_err(|_| self.shared.closed_error())?;

        receiver.await.map_err(|_| self.shared.closed_error())?
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_processing<T: AsyncRead + AsyncWrite + Send>(
        shared: Arc<SharedState>,
        write_receiver: mpsc::Receiver<Request>,
        heartbeat_sender: mpsc::Sender<Request>,
        read_half: ReadHalf<T>,
        write_half: WriteHalf<T>,
        options: ConnectionOptions,
        keyspace_holder: Arc<KeyspaceHolder>,
        event_handler: Option<mpsc::Sender<Frame>>,
        error_handler: Option<mpsc::Sender<Error>>,
    ) {
        let addr = shared.addr;

        let writer = Self::start_writing(write_receiver, BufWriter::new(write_half), &shared);
        let reader = Self::start_reading(
            BufReader::new(read_half),
            event_handler,
            keyspace_holder,
            &shared,
        );
        let heartbeat = Self::start_heartbeat(heartbeat_sender, &options, &shared);

        let result = tokio::select! {
            result = writer => result,
            result = reader => result,
            result = heartbeat => result,
            _ = shared.close_notify.notified() => Ok(()),
        };

        match result {
            Ok(()) => {
                debug!(?addr, "Connection closed.");
                shared.state.store(ConnectionState::Closed, Ordering::Release);
                shared.signal_closed();
            }
            Err(error) => {
                error!(%error, ?addr, "Transport error!");

                *shared
                    .close_reason
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());

                shared.state.store(ConnectionState::Defunct, Ordering::Release);
                shared.signal_closed();

                if let Some(error_handler) = error_handler {
                    let _ = error_handler.send(error).await;
                }
            }
        }
    }

    async fn start_reading<R: AsyncRead + Unpin>(
        mut read_half: R,
        event_handler: Option<mpsc::Sender<Frame>>,
        keyspace_holder: Arc<KeyspaceHolder>,
        shared: &SharedState,
    ) -> Result<()> {
        loop {
            let compression = shared.compression.load(Ordering::Acquire);
            let frame = parse_frame(&mut read_half, compression).await?;

            shared.touch();

            match frame {
                ParsedFrame::Frame(frame) if frame.stream_id >= 0 => {
                    // in case we get a SetKeyspace result, we need to store current keyspace
                    // checks are done manually for speed
                    if frame.opcode == Opcode::Result
                        && frame.body.len() >= INT_LEN
                        && ResultKind::try_from(try_i32_from_bytes(&frame.body[..INT_LEN])?)
                            .ok()
                            == Some(ResultKind::SetKeyspace)
                    {
                        if let ResponseBody::Result(result) = frame.response_body()? {
                            if let Some(keyspace) = result.as_set_keyspace() {
                                keyspace_holder.update_current_keyspace(keyspace.to_string());
                            }
                        }
                    }

                    shared.respond(frame.stream_id, Ok(frame))?;
                }
                ParsedFrame::Frame(frame) if frame.stream_id == EVENT_STREAM_ID => {
                    // server event
                    if let Some(event_handler) = &event_handler {
                        let _ = event_handler.send(frame).await;
                    }
                }
                ParsedFrame::Frame(frame) => {
                    warn!(stream_id = frame.stream_id, addr = ?shared.addr, "Ignoring frame with reserved stream id.");
                }
                ParsedFrame::BadBody { stream_id, error } if stream_id >= 0 => {
                    warn!(%error, stream_id, addr = ?shared.addr, "Unable to decode frame body.");
                    shared.respond(stream_id, Err(Error::Protocol(error)))?;
                }
                ParsedFrame::BadBody { stream_id, error } => {
                    // nobody waits on event or reserved streams
                    warn!(%error, stream_id, addr = ?shared.addr, "Dropping undecodable frame.");
                }
            }
        }
    }

    async fn start_writing(
        mut write_receiver: mpsc::Receiver<Request>,
        mut write_half: impl AsyncWrite + Unpin,
        shared: &SharedState,
    ) -> Result<()> {
        while let Some(mut request) = write_receiver.recv().await {
            loop {
                let Request { mut data, handler } = request;

                let stream_id = {
                    let mut streams = shared.streams();
                    if streams.available() > 0 {
                        streams.acquire(handler)
                    } else {
                        let _ = handler.send(Err(Error::NoStreamsAvailable(shared.addr)));
                        None
                    }
                };

                if let Some(stream_id) = stream_id {
                    set_stream_id(&mut data, shared.version, stream_id);
                    if let Err(error) = write_half.write_all(&data).await {
                        let error = Error::from(error);
                        let _ = shared.respond(stream_id, Err(error.clone()));
                        return Err(error);
                    }
                }

                request = match write_receiver.try_recv() {
                    Ok(request) => request,
                    Err(_) => break,
                }
            }

            write_half.flush().await?;
        }

        Ok(())
    }

    async fn start_heartbeat(
        write_sender: mpsc::Sender<Request>,
        options: &ConnectionOptions,
        shared: &SharedState,
    ) -> Result<()> {
        if options.heartbeat_interval.is_zero() {
            return pending().await;
        }

        let mut ticker = tokio::time::interval(options.heartbeat_interval);
        let mut outstanding: Option<oneshot::Receiver<Result<Frame>>> = None;

        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let idle_time = shared.idle_time();
            if !options.idle_timeout.is_zero() && idle_time >= options.idle_timeout {
                warn!(addr = ?shared.addr, ?idle_time, "Heartbeat timed out.");
                return Err(Error::ConnectionClosed {
                    addr: shared.addr,
                    reason: format!("no response for {idle_time:?}"),
                });
            }

            if let Some(receiver) = &mut outstanding {
                match receiver.try_recv() {
                    Err(oneshot::error::TryRecvError::Empty) => continue,
                    Ok(Err(error)) => {
                        warn!(%error, addr = ?shared.addr, "Heartbeat failed.");
                    }
                    _ => {}
                }

                outstanding = None;
            }

            if idle_time >= options.heartbeat_interval && shared.state() == ConnectionState::Connected
            {
                trace!(addr = ?shared.addr, "Sending heartbeat.");

                let (sender, receiver) = oneshot::channel();
                let data = Frame::new_req_options(shared.version)
                    .encode_with(shared.compression.load(Ordering::Acquire))?;

                if write_sender
                    .send(Request {
                        data,
                        handler: sender,
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }

                outstanding = Some(receiver);
            }
        }
    }
}

fn set_stream_id(data: &mut [u8], version: Version, stream_id: StreamId) {
    match version {
        Version::V2 => data[2] = stream_id as i8 as u8,
        Version::V3 | Version::V4 => data[2..4].copy_from_slice(&stream_id.to_be_bytes()),
    }
}

impl CqlTransport for Connection {
    #[inline]
    fn write_frame<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Frame>> {
        self.send_frame(frame).boxed()
    }

    #[inline]
    fn is_broken(&self) -> bool {
        !matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    #[inline]
    fn address(&self) -> SocketAddr {
        self.shared.addr
    }

    #[inline]
    fn version(&self) -> Version {
        self.shared.version
    }

    #[inline]
    fn pending_requests(&self) -> usize {
        self.shared.streams().pending()
    }

    fn close(&self) {
        let closing = self.shared.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            match state {
                ConnectionState::Closed | ConnectionState::Defunct => None,
                _ => Some(ConnectionState::Closing),
            }
        });

        if closing.is_ok() {
            self.shared.close_notify.notify_one();
        }
    }
}
