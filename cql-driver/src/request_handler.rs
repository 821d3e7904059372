//! Drives a single request through its query plan: acquires a connection from the host's pool,
//! consults the retry policy on server errors, moves to the next host on connection failures and
//! starts speculative executions of idempotent statements.
//!
//! Every execution is a chain of attempts. A single coordinator owns the plan and the attempt
//! bookkeeping, so executions running concurrently never share mutable state.
use cql_protocol::consistency::Consistency;
use cql_protocol::frame::message_error::ErrorType;
use cql_protocol::frame::message_response::ResponseBody;
use futures::future::OptionFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::*;

use crate::cluster::cluster_metadata_manager::ClusterMetadataManager;
use crate::cluster::{ConnectionManager, Host};
use crate::error::{Error, Result};
use crate::load_balancing::{QueryPlan, Request};
use crate::metrics::Metrics;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::speculative_execution::{Context, SpeculativeExecutionPolicy};
use crate::statement::{PreparedStatement, QueryResult, Statement};
use crate::transport::CqlTransport;

/// Session-wide settings used by statements which don't override them.
#[derive(Clone)]
pub(crate) struct RequestDefaults {
    pub(crate) consistency: Consistency,
    pub(crate) serial_consistency: Option<Consistency>,
    pub(crate) request_timeout: Duration,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) speculative_execution_policy: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    pub(crate) metrics: Arc<Metrics>,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone)]
enum Outcome {
    ReturnError,
    Ignore,
    Retry {
        consistency: Consistency,
        same_host: bool,
    },
    /// Move on without consulting the retry policy.
    NextHost,
    /// The host lost the prepared statement; prepare it again and resend.
    Reprepare(Arc<PreparedStatement>),
}

impl From<RetryDecision> for Outcome {
    fn from(decision: RetryDecision) -> Self {
        match decision {
            RetryDecision::ReturnError => Outcome::ReturnError,
            RetryDecision::Ignore => Outcome::Ignore,
            RetryDecision::Retry {
                consistency,
                same_host,
            } => Outcome::Retry {
                consistency,
                same_host,
            },
        }
    }
}

/// A single send of the statement to a host.
struct Attempt {
    host: Arc<Host>,
    consistency: Consistency,
    retry_count: usize,
    reprepare: Option<Arc<PreparedStatement>>,
}

impl Attempt {
    fn new(host: Arc<Host>, consistency: Consistency) -> Self {
        Attempt {
            host,
            consistency,
            retry_count: 0,
            reprepare: None,
        }
    }
}

/// Where an execution goes after a failed attempt.
enum Step {
    Attempt(Attempt),
    Finish(Result<QueryResult>),
    /// The plan has no host left.
    Exhausted,
}

pub(crate) struct RequestHandler<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> {
    statement: Statement,
    consistency: Consistency,
    keyspace: Option<Arc<String>>,
    retry_policy: Arc<dyn RetryPolicy>,
    defaults: RequestDefaults,
    cluster: Arc<ClusterMetadataManager<T, CM>>,
    shard: usize,
}

impl<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> RequestHandler<T, CM> {
    pub(crate) fn new(
        statement: Statement,
        keyspace: Option<Arc<String>>,
        defaults: RequestDefaults,
        cluster: Arc<ClusterMetadataManager<T, CM>>,
    ) -> Self {
        let statement = match (statement.serial_consistency(), defaults.serial_consistency) {
            (None, Some(serial_consistency)) => {
                statement.with_serial_consistency(serial_consistency)
            }
            _ => statement,
        };

        RequestHandler {
            consistency: statement.consistency().unwrap_or(defaults.consistency),
            retry_policy: statement
                .retry_policy()
                .cloned()
                .unwrap_or_else(|| defaults.retry_policy.clone()),
            statement,
            keyspace,
            defaults,
            cluster,
            shard: 0,
        }
    }

    /// Borrows connections from given pool shard, which should be the one owned by the event
    /// loop running this handler.
    pub(crate) fn with_shard(mut self, shard: usize) -> Self {
        self.shard = shard;
        self
    }

    /// Runs the request to completion, within the request timeout.
    pub(crate) async fn run(self) -> Result<QueryResult> {
        let started = Instant::now();
        let timeout = self
            .statement
            .timeout()
            .unwrap_or(self.defaults.request_timeout);

        let metrics = self.defaults.metrics.clone();
        let result = match tokio::time::timeout(timeout, self.execute()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(query = self.statement.query(), ?timeout, "Request timed out.");
                metrics.inc_request_timeouts();
                Err(Error::RequestTimeout(timeout))
            }
        };

        match &result {
            Ok(_) => {
                if let Err(error) = metrics.log_request_latency(started.elapsed()) {
                    warn!(%error, "Unable to record request latency.");
                }
            }
            Err(_) => metrics.inc_errors(),
        }

        result
    }

    async fn execute(&self) -> Result<QueryResult> {
        let mut plan = self.query_plan();
        let mut attempted_hosts = vec![];
        let mut last_error = None;

        let Some(host) = plan.next_host() else {
            return Err(no_hosts_available(attempted_hosts, last_error));
        };

        let speculative_execution_policy = self
            .defaults
            .speculative_execution_policy
            .as_ref()
            .filter(|_| self.statement.is_idempotent());

        let schedule_speculation = |running_executions: usize| {
            speculative_execution_policy
                .and_then(|policy| policy.execution_interval(&Context::new(running_executions)))
                .map(|delay| Box::pin(sleep(delay)))
        };

        let mut executions = FuturesUnordered::new();
        attempted_hosts.push(host.address());
        executions.push(self.attempt(Attempt::new(host, self.consistency)));

        let mut speculative_executions = 0;
        let mut next_speculation = schedule_speculation(speculative_executions);

        loop {
            tokio::select! {
                Some((attempt, result)) = executions.next() => {
                    let error = match result {
                        Ok(result) => {
                            return Ok(self.complete(
                                result,
                                attempted_hosts,
                                speculative_executions,
                                executions.len(),
                            ));
                        }
                        Err(error) => error,
                    };

                    match self.next_step(attempt, error, &mut plan, &mut last_error) {
                        Step::Attempt(attempt) => {
                            attempted_hosts.push(attempt.host.address());
                            executions.push(self.attempt(attempt));
                        }
                        Step::Finish(Ok(result)) => {
                            return Ok(self.complete(
                                result,
                                attempted_hosts,
                                speculative_executions,
                                executions.len(),
                            ));
                        }
                        Step::Finish(Err(error)) => {
                            if executions.is_empty() {
                                return Err(error);
                            }

                            last_error = Some(error);
                        }
                        Step::Exhausted => {
                            if executions.is_empty() {
                                return Err(no_hosts_available(attempted_hosts, last_error));
                            }
                        }
                    }
                },
                Some(()) = OptionFuture::from(next_speculation.as_mut()), if next_speculation.is_some() => {
                    // no host left for another execution
                    let Some(host) = plan.next_host() else {
                        next_speculation = None;
                        continue;
                    };

                    speculative_executions += 1;
                    self.defaults.metrics.inc_speculative_executions();
                    debug!(execution = speculative_executions, "Starting speculative execution.");

                    attempted_hosts.push(host.address());
                    executions.push(self.attempt(Attempt::new(host, self.consistency)));
                    next_speculation = schedule_speculation(speculative_executions);
                }
                else => {
                    return Err(no_hosts_available(attempted_hosts, last_error));
                }
            }
        }
    }

    fn complete(
        &self,
        mut result: QueryResult,
        attempted_hosts: Vec<SocketAddr>,
        speculative_executions: usize,
        aborted: usize,
    ) -> QueryResult {
        if aborted > 0 {
            debug!(aborted, "Aborting remaining executions.");
            for _ in 0..aborted {
                self.defaults.metrics.inc_aborted_speculative_executions();
            }
        }

        result.attempted_hosts = attempted_hosts;
        result.speculative_executions = speculative_executions;
        result
    }

    fn query_plan(&self) -> QueryPlan {
        let hosts = self.cluster.hosts();

        match self.statement.host() {
            Some(addr) => hosts
                .get(addr)
                .cloned()
                .map(QueryPlan::single)
                .unwrap_or_else(QueryPlan::empty),
            None => {
                let request = Request::new(
                    self.keyspace.as_deref().map(String::as_str),
                    self.consistency,
                    None,
                );

                self.cluster
                    .load_balancing()
                    .query_plan(&request, &hosts)
            }
        }
    }

    async fn attempt(&self, attempt: Attempt) -> (Attempt, Result<QueryResult>) {
        let result = self
            .send(&attempt.host, attempt.consistency, attempt.reprepare.as_deref())
            .await;

        (attempt, result)
    }

    /// Decides how the execution owning a failed attempt continues.
    fn next_step(
        &self,
        attempt: Attempt,
        error: Error,
        plan: &mut QueryPlan,
        last_error: &mut Option<Error>,
    ) -> Step {
        let addr = attempt.host.address();

        let (consistency, retry_count) = match self.decide(&error, &attempt) {
            Outcome::ReturnError => {
                debug!(%error, ?addr, "Returning error.");
                return Step::Finish(Err(error));
            }
            Outcome::Ignore => {
                debug!(%error, ?addr, "Ignoring error.");
                return Step::Finish(Ok(QueryResult::ignored(addr)));
            }
            Outcome::Reprepare(prepared) => {
                debug!(
                    ?addr,
                    query = prepared.query(),
                    "Statement unknown to host, preparing again."
                );
                return Step::Attempt(Attempt {
                    reprepare: Some(prepared),
                    ..attempt
                });
            }
            Outcome::Retry {
                consistency,
                same_host,
            } => {
                debug!(%error, ?addr, %consistency, same_host, "Retrying request.");
                self.defaults.metrics.inc_retries();

                if same_host {
                    return Step::Attempt(Attempt {
                        host: attempt.host,
                        consistency,
                        retry_count: attempt.retry_count + 1,
                        reprepare: None,
                    });
                }

                (consistency, attempt.retry_count + 1)
            }
            Outcome::NextHost => {
                debug!(%error, ?addr, "Trying next host.");
                (attempt.consistency, attempt.retry_count)
            }
        };

        *last_error = Some(error);
        match plan.next_host() {
            Some(host) => Step::Attempt(Attempt {
                host,
                consistency,
                retry_count,
                reprepare: None,
            }),
            None => Step::Exhausted,
        }
    }

    async fn send(
        &self,
        host: &Arc<Host>,
        consistency: Consistency,
        reprepare: Option<&PreparedStatement>,
    ) -> Result<QueryResult> {
        let addr = host.address();
        let pool = self
            .cluster
            .pool(addr)
            .ok_or(Error::NoConnectionsAvailable(addr))?;

        let connection = pool.connection(self.shard).await?;
        if let Some(prepared) = reprepare {
            Self::prepare_on(&connection, prepared, addr).await?;
        }

        let frame = self.statement.to_frame(consistency, connection.version());
        let response = connection.write_frame(&frame).await?;

        match response.response_body()? {
            ResponseBody::Result(body) => Ok(QueryResult::new(body, &response, addr)),
            ResponseBody::Error(body) => Err(Error::Server { addr, body }),
            _ => Err(Error::UnexpectedResponse(response.opcode)),
        }
    }

    /// Prepares the statement again on the connection about to execute it.
    async fn prepare_on(
        connection: &T,
        prepared: &PreparedStatement,
        addr: SocketAddr,
    ) -> Result<()> {
        let frame =
            Statement::prepare(prepared.query()).to_frame(Consistency::One, connection.version());
        let response = connection.write_frame(&frame).await?;

        match response.response_body()? {
            ResponseBody::Result(body) => match body.into_prepared() {
                Some(body) => {
                    prepared.set_id(body.id);
                    Ok(())
                }
                None => Err(Error::UnexpectedResponse(response.opcode)),
            },
            ResponseBody::Error(body) => Err(Error::Server { addr, body }),
            _ => Err(Error::UnexpectedResponse(response.opcode)),
        }
    }

    fn decide(&self, error: &Error, attempt: &Attempt) -> Outcome {
        let body = match error {
            Error::Server { body, .. } => body,
            Error::NoStreamsAvailable(_) => return Outcome::NextHost,
            error if error.is_connection_level() => return Outcome::NextHost,
            _ => return Outcome::ReturnError,
        };

        let retry_count = attempt.retry_count;
        let is_idempotent = self.statement.is_idempotent();
        let decision = match &body.ty {
            ErrorType::ReadTimeout(timeout) => self.retry_policy.on_read_timeout(
                timeout.cl,
                timeout.received,
                timeout.block_for,
                timeout.data_present,
                retry_count,
            ),
            // the write might have been applied
            ErrorType::WriteTimeout(timeout) if is_idempotent => {
                self.retry_policy.on_write_timeout(
                    timeout.cl,
                    timeout.received,
                    timeout.block_for,
                    timeout.write_type,
                    retry_count,
                )
            }
            ErrorType::Unavailable(unavailable) => self.retry_policy.on_unavailable(
                unavailable.cl,
                unavailable.required,
                unavailable.alive,
                retry_count,
            ),
            ErrorType::Overloaded | ErrorType::Server | ErrorType::Truncate if is_idempotent => {
                self.retry_policy
                    .on_request_error(self.consistency, body, retry_count)
            }
            ErrorType::IsBootstrapping => return Outcome::NextHost,
            // a second miss right after preparing means the id can't be fixed on this host
            ErrorType::Unprepared(unprepared) if attempt.reprepare.is_none() => {
                return match self.statement.find_prepared(&unprepared.id) {
                    Some(prepared) => Outcome::Reprepare(prepared.clone()),
                    None => Outcome::ReturnError,
                };
            }
            _ => RetryDecision::ReturnError,
        };

        decision.into()
    }
}

fn no_hosts_available(tried: Vec<SocketAddr>, last_error: Option<Error>) -> Error {
    Error::NoHostsAvailable {
        tried,
        last_error: last_error.map(Box::new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::connection_manager::MockConnectionManager;
    use crate::cluster::connection_pool::{ConnectionPoolConfig, ConnectionPoolFactory};
    use crate::cluster::KeyspaceHolder;
    use crate::load_balancing::RoundRobinLoadBalancingPolicy;
    use crate::retry::{ConstantReconnectionPolicy, DefaultRetryPolicy, MockRetryPolicy};
    use crate::speculative_execution::ConstantSpeculativeExecutionPolicy;
    use crate::transport::MockCqlTransport;
    use crate::statement::Batch;
    use cql_protocol::frame::message_batch::BatchType;
    use cql_protocol::frame::message_error::{
        ErrorBody, ReadTimeoutError, UnavailableError, UnpreparedError,
    };
    use cql_protocol::frame::message_result::{
        BodyResResultPrepared, PreparedMetadata, ResResultBody, RowsMetadata,
    };
    use cql_protocol::frame::{Frame, Opcode, Serialize, Version};
    use cql_protocol::types::CBytesShort;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tokio::runtime::Handle;

    type Cluster = ClusterMetadataManager<MockCqlTransport, MockConnectionManager<MockCqlTransport>>;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[derive(Clone)]
    enum Reply {
        Void,
        Prepared(u8),
        ServerError(ErrorType),
        Closed,
        Never,
    }

    fn addr(index: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9000 + index))
    }

    fn respond(reply: Reply, addr: SocketAddr) -> futures::future::BoxFuture<'static, Result<Frame>> {
        match reply {
            Reply::Void => async move {
                Ok(Frame::new_response(Version::V4, Opcode::Result, 0, vec![0, 0, 0, 1]))
            }
            .boxed(),
            Reply::Prepared(id) => async move {
                let body = ResResultBody::Prepared(BodyResResultPrepared {
                    id: CBytesShort::new(vec![id]),
                    metadata: PreparedMetadata::default(),
                    result_metadata: RowsMetadata::default(),
                })
                .serialize_to_vec(Version::V4);
                Ok(Frame::new_response(Version::V4, Opcode::Result, 0, body))
            }
            .boxed(),
            Reply::ServerError(ty) => async move {
                let body = ErrorBody::new(ty, "failure").serialize_to_vec(Version::V4);
                Ok(Frame::new_response(Version::V4, Opcode::Error, 0, body))
            }
            .boxed(),
            Reply::Closed => async move {
                Err(Error::ConnectionClosed {
                    addr,
                    reason: "reset".into(),
                })
            }
            .boxed(),
            Reply::Never => futures::future::pending().boxed(),
        }
    }

    /// Every host answers each request with the next reply of its script, repeating the last.
    async fn cluster(scripts: Vec<Vec<Reply>>) -> Arc<Cluster> {
        sharded_cluster(scripts.into_iter().map(|script| vec![script]).collect(), 1).await
    }

    /// Like [`cluster`], with `shards` pool shards. The n-th connection opened to a host follows
    /// the n-th script of that host.
    async fn sharded_cluster(scripts: Vec<Vec<Vec<Reply>>>, shards: usize) -> Arc<Cluster> {
        let scripts: HashMap<_, _> = scripts
            .into_iter()
            .enumerate()
            .map(|(index, script)| (addr(index as u16), (script, AtomicUsize::new(0))))
            .collect();
        let hosts = (0..scripts.len() as u16).map(addr).collect();

        let mut connection_manager = MockConnectionManager::new();
        connection_manager
            .expect_connection()
            .returning(move |_, _, addr, _| {
                let (host_scripts, opened) = &scripts[&addr];
                let index = opened.fetch_add(1, Ordering::Relaxed) % host_scripts.len();
                let script = Arc::new(Mutex::new(host_scripts[index].clone()));

                let mut transport = MockCqlTransport::new();
                transport.expect_is_broken().return_const(false);
                transport.expect_pending_requests().return_const(0usize);
                transport.expect_address().return_const(addr);
                transport.expect_version().return_const(Version::V4);
                transport.expect_close().return_const(());
                transport.expect_write_frame().returning(move |_| {
                    let mut script = lock(&script);
                    let reply = if script.len() > 1 {
                        script.remove(0)
                    } else {
                        script[0].clone()
                    };

                    respond(reply, addr)
                });

                async move { Ok(transport) }.boxed()
            });

        let reconnection_policy =
            Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1)).unwrap());
        let factory = ConnectionPoolFactory::new(
            ConnectionPoolConfig::default(),
            Arc::new(connection_manager),
            KeyspaceHolder::new().keyspace_receiver(),
            reconnection_policy.clone(),
            Handle::current(),
            (0..shards).map(|_| Handle::current()).collect(),
        );

        let cluster = Arc::new(ClusterMetadataManager::new(
            hosts,
            factory,
            Arc::new(RoundRobinLoadBalancingPolicy::new()),
            reconnection_policy,
            Handle::current(),
        ));

        cluster.connect_pools().await;
        cluster
    }

    fn defaults(speculative: Option<Arc<dyn SpeculativeExecutionPolicy>>) -> RequestDefaults {
        RequestDefaults {
            consistency: Consistency::Quorum,
            serial_consistency: None,
            request_timeout: Duration::from_secs(1),
            retry_policy: Arc::new(DefaultRetryPolicy),
            speculative_execution_policy: speculative,
            metrics: Arc::new(Metrics::new()),
        }
    }

    fn read_timeout() -> ErrorType {
        ErrorType::ReadTimeout(ReadTimeoutError {
            cl: Consistency::Quorum,
            received: 2,
            block_for: 2,
            data_present: false,
        })
    }

    fn unavailable() -> ErrorType {
        ErrorType::Unavailable(UnavailableError {
            cl: Consistency::Quorum,
            required: 3,
            alive: 1,
        })
    }

    #[tokio::test]
    async fn should_retry_read_timeout_on_same_host() {
        let cluster = cluster(vec![vec![Reply::ServerError(read_timeout()), Reply::Void]]).await;
        let defaults = defaults(None);
        let metrics = defaults.metrics.clone();

        let result = RequestHandler::new(Statement::new("SELECT"), None, defaults, cluster)
            .run()
            .await
            .unwrap();

        assert_eq!(result.attempted_hosts, vec![addr(0), addr(0)]);
        assert_eq!(result.coordinator, Some(addr(0)));
        assert_eq!(metrics.retries(), 1);
        assert_eq!(metrics.requests(), 1);
    }

    #[tokio::test]
    async fn should_move_to_next_host_on_unavailable() {
        let cluster = cluster(vec![
            vec![Reply::ServerError(unavailable())],
            vec![Reply::ServerError(unavailable())],
        ])
        .await;

        let statement = Statement::new("SELECT").with_host(addr(0));
        let result = RequestHandler::new(statement, None, defaults(None), cluster.clone())
            .run()
            .await;

        // a pinned host has nowhere else to go
        assert!(matches!(
            result,
            Err(Error::NoHostsAvailable { ref tried, last_error: Some(_) }) if tried == &vec![addr(0)]
        ));

        let result = RequestHandler::new(Statement::new("SELECT"), None, defaults(None), cluster)
            .run()
            .await;

        match result {
            Err(Error::Server { body, .. }) => {
                assert_eq!(body.ty, unavailable());
            }
            result => panic!("unexpected result: {result:?}"),
        }
    }

    #[tokio::test]
    async fn should_keep_server_error_payload() {
        let cluster = cluster(vec![vec![Reply::ServerError(ErrorType::Invalid)]]).await;

        match RequestHandler::new(Statement::new("SELECT"), None, defaults(None), cluster)
            .run()
            .await
        {
            Err(Error::Server { addr: error_addr, body }) => {
                assert_eq!(error_addr, addr(0));
                assert_eq!(body.ty, ErrorType::Invalid);
                assert_eq!(body.message, "failure");
            }
            result => panic!("unexpected result: {result:?}"),
        }
    }

    #[tokio::test]
    async fn should_not_retry_errors_of_non_idempotent_requests() {
        let cluster = cluster(vec![
            vec![Reply::ServerError(ErrorType::Overloaded)],
            vec![Reply::Void],
        ])
        .await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy.expect_on_request_error().never();

        let statement = Statement::new("INSERT").with_retry_policy(Arc::new(retry_policy));
        let result = RequestHandler::new(statement, None, defaults(None), cluster)
            .run()
            .await;
        assert!(matches!(result, Err(Error::Server { .. })));
    }

    #[tokio::test]
    async fn should_ignore_when_policy_says_so() {
        let cluster = cluster(vec![vec![Reply::ServerError(ErrorType::Overloaded)]]).await;

        let mut retry_policy = MockRetryPolicy::new();
        retry_policy
            .expect_on_request_error()
            .times(1)
            .return_const(RetryDecision::Ignore);

        let statement = Statement::new("INSERT")
            .idempotent(true)
            .with_retry_policy(Arc::new(retry_policy));

        let result = RequestHandler::new(statement, None, defaults(None), cluster)
            .run()
            .await
            .unwrap();

        assert_eq!(result.body, cql_protocol::frame::message_result::ResResultBody::Void);
        assert_eq!(result.coordinator, Some(addr(0)));
    }

    #[tokio::test]
    async fn should_fail_over_connection_errors() {
        let cluster = cluster(vec![vec![Reply::Closed], vec![Reply::Closed]]).await;

        match RequestHandler::new(Statement::new("SELECT"), None, defaults(None), cluster)
            .run()
            .await
        {
            Err(Error::NoHostsAvailable { tried, last_error }) => {
                assert_eq!(tried.len(), 2);
                assert!(matches!(
                    last_error.as_deref(),
                    Some(Error::ConnectionClosed { .. })
                ));
            }
            result => panic!("unexpected result: {result:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_requests() {
        let cluster = cluster(vec![vec![Reply::Never]]).await;
        let defaults = defaults(None);
        let metrics = defaults.metrics.clone();

        let statement = Statement::new("SELECT").with_timeout(Duration::from_millis(200));
        let result = RequestHandler::new(statement, None, defaults, cluster).run().await;

        assert!(matches!(result, Err(Error::RequestTimeout(timeout)) if timeout == Duration::from_millis(200)));
        assert_eq!(metrics.request_timeouts(), 1);
        assert_eq!(metrics.errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_start_speculative_executions_for_idempotent_statements() {
        let cluster = cluster(vec![
            vec![Reply::Never],
            vec![Reply::Never],
            vec![Reply::Void],
        ])
        .await;
        let defaults = defaults(Some(Arc::new(ConstantSpeculativeExecutionPolicy::new(
            2,
            Duration::from_millis(100),
        ))));
        let metrics = defaults.metrics.clone();

        let statement = Statement::new("SELECT").idempotent(true);
        let result = RequestHandler::new(statement, None, defaults, cluster)
            .run()
            .await
            .unwrap();

        let mut attempted = result.attempted_hosts.clone();
        attempted.sort();
        assert_eq!(attempted, vec![addr(0), addr(1), addr(2)]);
        assert_eq!(result.coordinator, Some(addr(2)));
        assert_eq!(result.speculative_executions, 2);
        assert_eq!(metrics.speculative_executions(), 2);
        assert_eq!(metrics.aborted_speculative_executions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_speculate_for_non_idempotent_statements() {
        let cluster = cluster(vec![vec![Reply::Never], vec![Reply::Void]]).await;
        let defaults = defaults(Some(Arc::new(ConstantSpeculativeExecutionPolicy::new(
            2,
            Duration::from_millis(100),
        ))));
        let metrics = defaults.metrics.clone();

        let statement = Statement::new("INSERT").with_timeout(Duration::from_millis(500));
        let result = RequestHandler::new(statement, None, defaults, cluster).run().await;

        assert!(matches!(result, Err(Error::RequestTimeout(_))));
        assert_eq!(metrics.speculative_executions(), 0);
    }

    fn prepared(id: u8) -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement::new(
            "SELECT * FROM ks.t WHERE id = ?",
            BodyResResultPrepared {
                id: CBytesShort::new(vec![id]),
                metadata: PreparedMetadata::default(),
                result_metadata: RowsMetadata::default(),
            },
        ))
    }

    fn unprepared(id: u8) -> Reply {
        Reply::ServerError(ErrorType::Unprepared(UnpreparedError {
            id: CBytesShort::new(vec![id]),
        }))
    }

    #[tokio::test]
    async fn should_prepare_again_on_same_host() {
        let cluster = cluster(vec![
            vec![unprepared(1), Reply::Prepared(2), Reply::Void],
            vec![Reply::ServerError(ErrorType::Invalid)],
        ])
        .await;
        let defaults = defaults(None);
        let metrics = defaults.metrics.clone();

        let prepared = prepared(1);
        let result = RequestHandler::new(prepared.bind(vec![1]), None, defaults, cluster)
            .run()
            .await
            .unwrap();

        assert_eq!(prepared.id(), CBytesShort::new(vec![2]));
        assert_eq!(result.attempted_hosts, vec![addr(0), addr(0)]);
        assert_eq!(result.coordinator, Some(addr(0)));
        assert_eq!(metrics.retries(), 0);
    }

    #[tokio::test]
    async fn should_prepare_batch_entries_again() {
        let cluster = cluster(vec![vec![unprepared(4), Reply::Prepared(4), Reply::Void]]).await;

        let other = prepared(3);
        let missing = prepared(4);
        let batch = Batch::new(BatchType::Logged)
            .add_prepared(&other, vec![1])
            .add_prepared(&missing, vec![2]);

        let result = RequestHandler::new(Statement::batch(batch), None, defaults(None), cluster)
            .run()
            .await
            .unwrap();

        assert_eq!(result.attempted_hosts, vec![addr(0), addr(0)]);
    }

    #[tokio::test]
    async fn should_give_up_when_statement_stays_unprepared() {
        let cluster = cluster(vec![vec![unprepared(1), Reply::Prepared(1), unprepared(1)]]).await;

        let prepared = prepared(1);
        let result = RequestHandler::new(prepared.bind(vec![1]), None, defaults(None), cluster)
            .run()
            .await;

        match result {
            Err(Error::Server { body, .. }) => {
                assert!(matches!(body.ty, ErrorType::Unprepared(_)));
            }
            result => panic!("unexpected result: {result:?}"),
        }
    }

    #[tokio::test]
    async fn should_not_prepare_unknown_ids() {
        let cluster = cluster(vec![vec![unprepared(9), Reply::Void]]).await;

        let result = RequestHandler::new(prepared(1).bind(vec![1]), None, defaults(None), cluster)
            .run()
            .await;

        assert!(matches!(result, Err(Error::Server { .. })));
    }

    #[tokio::test]
    async fn should_borrow_connections_from_own_shard() {
        let cluster = sharded_cluster(
            vec![vec![
                vec![Reply::ServerError(ErrorType::Invalid)],
                vec![Reply::Void],
            ]],
            2,
        )
        .await;

        let first = RequestHandler::new(
            Statement::new("SELECT"),
            None,
            defaults(None),
            cluster.clone(),
        )
        .with_shard(0)
        .run()
        .await;
        assert!(matches!(first, Err(Error::Server { .. })));

        let second = RequestHandler::new(Statement::new("SELECT"), None, defaults(None), cluster)
            .with_shard(1)
            .run()
            .await;
        assert!(second.is_ok());
    }
}
