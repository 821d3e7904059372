//! In-process CQL server speaking just enough of the native protocol to drive the driver:
//! OPTIONS, STARTUP, REGISTER, QUERY, PREPARE, EXECUTE and BATCH, with scripted replies and
//! server pushed events.
#![allow(dead_code)]

use cql_driver::cluster::{ClusterConfigBuilder, Host, HostSet};
use cql_driver::compression::Compression;
use cql_driver::consistency::Consistency;
use cql_driver::frame::events::ServerEvent;
use cql_driver::frame::message_batch::{BatchQuerySubject, BodyReqBatch};
use cql_driver::frame::message_error::{ErrorBody, ErrorType, UnpreparedError};
use cql_driver::frame::message_execute::BodyReqExecute;
use cql_driver::frame::message_prepare::BodyReqPrepare;
use cql_driver::frame::message_query::BodyReqQuery;
use cql_driver::frame::message_result::{
    BodyResResultPrepared, PreparedMetadata, ResResultBody, RowsMetadata,
};
use cql_driver::types::CBytesShort;
use std::collections::HashMap;
use cql_driver::frame::message_supported::BodyResSupported;
use cql_driver::frame::{
    Frame, FromCursor, Opcode, Serialize, StreamId, Version, EVENT_STREAM_ID,
};
use cql_driver::frame_parser::{parse_frame, ParsedFrame};
use cql_driver::load_balancing::{HostDistance, LoadBalancingPolicy, QueryPlan, Request};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// What the server does with a query.
#[derive(Clone, Debug)]
pub enum Reply {
    Result(ResResultBody),
    Error(ErrorType, &'static str),
    /// Replies after a delay, without holding up other streams.
    Delayed(Duration, Box<Reply>),
    /// Never replies.
    Silence,
}

impl Reply {
    pub fn void() -> Self {
        Reply::Result(ResResultBody::Void)
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

type QueryHandler = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

/// A QUERY frame as received by the server.
#[derive(Clone, Debug)]
pub struct ReceivedQuery {
    pub query: String,
    pub consistency: Consistency,
    pub version: Version,
}

/// Answers `USE` with the keyspace, system tables with an error (which makes the driver keep its
/// contact points) and everything else with a void result.
pub fn default_reply(query: &str) -> Reply {
    if let Some(keyspace) = query.strip_prefix("USE ") {
        return Reply::Result(ResResultBody::SetKeyspace(
            keyspace.trim_matches('"').to_string(),
        ));
    }

    if query.contains("system.") {
        return Reply::Error(ErrorType::Invalid, "system tables not available");
    }

    Reply::void()
}

pub struct MockServerBuilder {
    max_version: Version,
    handler: QueryHandler,
    answer_heartbeats: bool,
}

impl MockServerBuilder {
    /// Newest protocol version accepted; newer ones are rejected with a protocol error.
    pub fn with_max_version(mut self, version: Version) -> Self {
        self.max_version = version;
        self
    }

    /// Custom query handling. Return `None` to fall back to the default replies.
    pub fn with_handler(
        mut self,
        handler: impl Fn(&str) -> Option<Reply> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Arc::new(move |query| handler(query).unwrap_or_else(|| default_reply(query)));
        self
    }

    /// Stops answering OPTIONS once the connection is ready.
    pub fn without_heartbeats(mut self) -> Self {
        self.answer_heartbeats = false;
        self
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(ServerState {
            max_version: self.max_version,
            handler: self.handler,
            answer_heartbeats: self.answer_heartbeats,
            queries: Default::default(),
            prepared: Default::default(),
            prepares: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            event_writers: Default::default(),
            connection_tasks: Default::default(),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);

                let connection_state = accept_state.clone();
                let task = tokio::spawn(serve(socket, connection_state));
                lock(&accept_state.connection_tasks).push(task);
            }
        });

        MockServer {
            addr,
            state,
            accept_task,
        }
    }
}

struct ServerState {
    max_version: Version,
    handler: QueryHandler,
    answer_heartbeats: bool,
    queries: Mutex<Vec<ReceivedQuery>>,
    /// Prepared statement ids known to the server, with their CQL.
    prepared: Mutex<HashMap<Vec<u8>, String>>,
    prepares: AtomicUsize,
    connections: AtomicUsize,
    heartbeats: AtomicUsize,
    event_writers: Mutex<Vec<(Version, Arc<AsyncMutex<OwnedWriteHalf>>)>>,
    connection_tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            max_version: Version::V4,
            handler: Arc::new(default_reply),
            answer_heartbeats: true,
        }
    }

    pub async fn start() -> MockServer {
        Self::builder().start().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every query received so far, including `USE` and system table queries.
    pub fn queries(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .map(|received| received.query)
            .collect()
    }

    pub fn received(&self) -> Vec<ReceivedQuery> {
        lock(&self.state.queries).clone()
    }

    /// Queries received so far, excluding the driver's own.
    pub fn user_queries(&self) -> Vec<String> {
        self.queries()
            .into_iter()
            .filter(|query| !query.contains("system.") && !query.starts_with("USE "))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// PREPARE requests received so far.
    pub fn prepares(&self) -> usize {
        self.state.prepares.load(Ordering::SeqCst)
    }

    /// Drops every prepared statement, as a restarted node would.
    pub fn forget_prepared(&self) {
        lock(&self.state.prepared).clear();
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// Sends an event on every connection which registered for events.
    pub async fn push_event(&self, event: ServerEvent) {
        let writers = lock(&self.state.event_writers).clone();
        for (version, writer) in writers {
            let frame = Frame::new_response(
                version,
                Opcode::Event,
                EVENT_STREAM_ID,
                event.serialize_to_vec(version),
            );

            let _ = write_frame(&writer, &frame).await;
        }
    }

    /// Stops accepting connections and drops every open one.
    pub fn stop(&self) {
        self.accept_task.abort();
        for task in lock(&self.state.connection_tasks).drain(..) {
            task.abort();
        }

        lock(&self.state.event_writers).clear();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn write_frame(writer: &AsyncMutex<OwnedWriteHalf>, frame: &Frame) -> std::io::Result<()> {
    let bytes = frame
        .encode_with(Compression::None)
        .map_err(std::io::Error::other)?;

    let mut writer = writer.lock().await;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

async fn serve(socket: TcpStream, state: Arc<ServerState>) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(AsyncMutex::new(write_half));
    let mut ready = false;

    while let Ok(ParsedFrame::Frame(frame)) = parse_frame(&mut reader, Compression::None).await {
        let version = frame.version;
        let stream_id = frame.stream_id;

        let respond = |opcode: Opcode, body: Vec<u8>| {
            Frame::new_response(version, opcode, stream_id, body)
        };

        let error = |ty: ErrorType, message: &str| {
            respond(
                Opcode::Error,
                ErrorBody::new(ty, message).serialize_to_vec(version),
            )
        };

        if u8::from(version) > u8::from(state.max_version) {
            let response = error(ErrorType::Protocol, "Invalid or unsupported protocol version");
            if write_frame(&writer, &response).await.is_err() {
                break;
            }

            continue;
        }

        let response = match frame.opcode {
            Opcode::Options => {
                if ready {
                    state.heartbeats.fetch_add(1, Ordering::SeqCst);
                    if !state.answer_heartbeats {
                        continue;
                    }
                }

                respond(
                    Opcode::Supported,
                    BodyResSupported::default().serialize_to_vec(version),
                )
            }
            Opcode::Startup => {
                ready = true;
                respond(Opcode::Ready, vec![])
            }
            Opcode::Register => {
                lock(&state.event_writers).push((version, writer.clone()));
                respond(Opcode::Ready, vec![])
            }
            Opcode::Prepare => {
                let body = match BodyReqPrepare::from_cursor(&mut Cursor::new(frame.body.as_slice()), version)
                {
                    Ok(body) => body,
                    Err(_) => break,
                };

                state.prepares.fetch_add(1, Ordering::SeqCst);

                // the CQL doubles as the id, so re-preparing yields the same one
                let id = body.query.as_bytes().to_vec();
                lock(&state.prepared).insert(id.clone(), body.query);

                let prepared = ResResultBody::Prepared(BodyResResultPrepared {
                    id: CBytesShort::new(id),
                    metadata: PreparedMetadata::default(),
                    result_metadata: RowsMetadata::default(),
                });
                respond(Opcode::Result, prepared.serialize_to_vec(version))
            }
            Opcode::Query | Opcode::Execute | Opcode::Batch => {
                let cursor = &mut Cursor::new(frame.body.as_slice());
                let received = match frame.opcode {
                    Opcode::Query => BodyReqQuery::from_cursor(cursor, version)
                        .map(|body| Ok((body.query, body.query_params.consistency))),
                    Opcode::Execute => BodyReqExecute::from_cursor(cursor, version).map(|body| {
                        prepared_query(&state, &body.id)
                            .map(|query| (query, body.query_params.consistency))
                    }),
                    _ => BodyReqBatch::from_cursor(cursor, version).map(|body| {
                        batch_queries(&state, &body).map(|queries| (queries, body.consistency))
                    }),
                };

                let reply = match received {
                    Ok(Ok((query, consistency))) => {
                        lock(&state.queries).push(ReceivedQuery {
                            query: query.clone(),
                            consistency,
                            version,
                        });

                        (state.handler)(&query)
                    }
                    Ok(Err(id)) => Reply::Error(
                        ErrorType::Unprepared(UnpreparedError { id }),
                        "Prepared statement not found",
                    ),
                    Err(_) => break,
                };

                let writer = writer.clone();
                tokio::spawn(async move {
                    if let Some(response) = render(reply, version, stream_id).await {
                        let _ = write_frame(&writer, &response).await;
                    }
                });

                continue;
            }
            _ => error(ErrorType::Protocol, "Unsupported opcode"),
        };

        if write_frame(&writer, &response).await.is_err() {
            break;
        }
    }
}

fn prepared_query(state: &ServerState, id: &CBytesShort) -> Result<String, CBytesShort> {
    id.as_slice()
        .and_then(|id| lock(&state.prepared).get(id).cloned())
        .ok_or_else(|| id.clone())
}

/// Statements of a batch joined with `; `, or the first unknown prepared id.
fn batch_queries(state: &ServerState, batch: &BodyReqBatch) -> Result<String, CBytesShort> {
    let queries = batch
        .queries
        .iter()
        .map(|query| match &query.subject {
            BatchQuerySubject::QueryString(query) => Ok(query.clone()),
            BatchQuerySubject::PreparedId(id) => prepared_query(state, id),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(queries.join("; "))
}

async fn render(mut reply: Reply, version: Version, stream_id: StreamId) -> Option<Frame> {
    loop {
        match reply {
            Reply::Result(body) => {
                return Some(Frame::new_response(
                    version,
                    Opcode::Result,
                    stream_id,
                    body.serialize_to_vec(version),
                ));
            }
            Reply::Error(ty, message) => {
                return Some(Frame::new_response(
                    version,
                    Opcode::Error,
                    stream_id,
                    ErrorBody::new(ty, message).serialize_to_vec(version),
                ));
            }
            Reply::Delayed(delay, inner) => {
                sleep(delay).await;
                reply = *inner;
            }
            Reply::Silence => return None,
        }
    }
}

/// Builder with given servers as contact points, one connection per host and a short
/// reconnection delay.
pub fn config_builder(servers: &[&MockServer]) -> ClusterConfigBuilder {
    servers
        .iter()
        .fold(ClusterConfigBuilder::new(), |builder, server| {
            builder.with_contact_point(server.addr())
        })
        .with_max_connections_per_host(1)
        .with_constant_reconnect(Duration::from_millis(100))
}

/// Always tries hosts in the given order, so tests know which host is tried first.
#[derive(Debug)]
pub struct FixedOrderLoadBalancingPolicy {
    order: Vec<SocketAddr>,
}

impl FixedOrderLoadBalancingPolicy {
    pub fn new(servers: &[&MockServer]) -> Arc<Self> {
        Arc::new(FixedOrderLoadBalancingPolicy {
            order: servers.iter().map(|server| server.addr()).collect(),
        })
    }
}

impl LoadBalancingPolicy for FixedOrderLoadBalancingPolicy {
    fn distance(&self, _host: &Host) -> HostDistance {
        HostDistance::Local
    }

    fn query_plan(&self, _request: &Request, hosts: &Arc<HostSet>) -> QueryPlan {
        let hosts: Vec<Arc<Host>> = self
            .order
            .iter()
            .filter_map(|addr| hosts.get(*addr).cloned())
            .collect();

        QueryPlan::from(hosts)
    }
}

/// Polls `condition` until it holds or a few seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }

        sleep(Duration::from_millis(50)).await;
    }

    condition()
}
