//! Statements sent by the session and the results they produce.
use cql_protocol::consistency::Consistency;
use cql_protocol::frame::message_batch::{
    BatchQuery, BatchQuerySubject, BatchType, BodyReqBatch,
};
use cql_protocol::frame::message_execute::BodyReqExecute;
use cql_protocol::frame::message_query::{BodyReqQuery, QueryParams, QueryValues};
use cql_protocol::frame::message_result::{
    BodyResResultPrepared, BodyResResultRows, PreparedMetadata, ResResultBody, RowsMetadata,
};
use cql_protocol::frame::{Flags, Frame, Version};
use cql_protocol::types::{CBytes, CBytesShort, CInt, CLong};
use derivative::Derivative;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Custom payload key used for proxy execution.
pub const PROXY_EXECUTE_KEY: &str = "ProxyExecute";

/// A statement prepared on the cluster. Executing it sends only the id and the bound values.
///
/// The id is refreshed in place when a host no longer knows it and the statement gets prepared
/// again.
#[derive(Debug)]
pub struct PreparedStatement {
    query: String,
    id: RwLock<CBytesShort>,
    metadata: PreparedMetadata,
    result_metadata: RowsMetadata,
}

impl PreparedStatement {
    pub(crate) fn new(query: impl Into<String>, prepared: BodyResResultPrepared) -> Self {
        PreparedStatement {
            query: query.into(),
            id: RwLock::new(prepared.id),
            metadata: prepared.metadata,
            result_metadata: prepared.result_metadata,
        }
    }

    /// CQL text of the statement.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn id(&self) -> CBytesShort {
        self.id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_id(&self, id: CBytesShort) {
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Bind markers of the statement.
    #[inline]
    pub fn metadata(&self) -> &PreparedMetadata {
        &self.metadata
    }

    /// Columns of the rows returned by executing the statement.
    #[inline]
    pub fn result_metadata(&self) -> &RowsMetadata {
        &self.result_metadata
    }

    /// Creates a statement executing this one with given values.
    pub fn bind(self: &Arc<Self>, values: impl Into<QueryValues>) -> Statement {
        Statement::prepared(self).with_values(values)
    }
}

#[derive(Clone, Debug)]
enum BatchEntry {
    Query(String, QueryValues),
    Prepared(Arc<PreparedStatement>, QueryValues),
}

/// Statements applied together, each with its own positional values.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    batch_type: BatchType,
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new(batch_type: BatchType) -> Self {
        Batch {
            batch_type,
            entries: vec![],
        }
    }

    #[must_use]
    pub fn add_query(mut self, query: impl Into<String>, values: impl Into<QueryValues>) -> Self {
        self.entries
            .push(BatchEntry::Query(query.into(), values.into()));
        self
    }

    #[must_use]
    pub fn add_prepared(
        mut self,
        prepared: &Arc<PreparedStatement>,
        values: impl Into<QueryValues>,
    ) -> Self {
        self.entries
            .push(BatchEntry::Prepared(prepared.clone(), values.into()));
        self
    }

    #[inline]
    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn queries(&self) -> Vec<BatchQuery> {
        self.entries
            .iter()
            .map(|entry| match entry {
                BatchEntry::Query(query, values) => BatchQuery {
                    subject: BatchQuerySubject::QueryString(query.clone()),
                    values: values.clone(),
                },
                BatchEntry::Prepared(prepared, values) => BatchQuery {
                    subject: BatchQuerySubject::PreparedId(prepared.id()),
                    values: values.clone(),
                },
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
enum StatementKind {
    Query(String),
    Prepare(String),
    Execute(Arc<PreparedStatement>),
    Batch(Batch),
}

/// A CQL statement with its parameters and per-request overrides. Settings left unset fall back
/// to the session configuration.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Statement {
    kind: StatementKind,
    values: Option<QueryValues>,
    consistency: Option<Consistency>,
    serial_consistency: Option<Consistency>,
    page_size: Option<CInt>,
    paging_state: Option<CBytes>,
    timestamp: Option<CLong>,
    tracing: bool,
    is_idempotent: bool,
    timeout: Option<Duration>,
    #[derivative(Debug = "ignore")]
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    custom_payload: HashMap<String, Vec<u8>>,
    host: Option<SocketAddr>,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_kind(StatementKind::Query(query.into()))
    }

    /// Executes a prepared statement. Values are bound with [`Statement::with_values`].
    pub fn prepared(prepared: &Arc<PreparedStatement>) -> Self {
        Self::with_kind(StatementKind::Execute(prepared.clone()))
    }

    /// Executes a batch. Values of the batch entries are set on the batch itself.
    pub fn batch(batch: Batch) -> Self {
        Self::with_kind(StatementKind::Batch(batch))
    }

    pub(crate) fn prepare(query: impl Into<String>) -> Self {
        Self::with_kind(StatementKind::Prepare(query.into()))
    }

    fn with_kind(kind: StatementKind) -> Self {
        Statement {
            kind,
            values: None,
            consistency: None,
            serial_consistency: None,
            page_size: None,
            paging_state: None,
            timestamp: None,
            tracing: false,
            is_idempotent: false,
            timeout: None,
            retry_policy: None,
            custom_payload: HashMap::new(),
            host: None,
        }
    }

    /// Sets bound values.
    #[must_use]
    pub fn with_values(mut self, values: impl Into<QueryValues>) -> Self {
        self.values = Some(values.into());
        self
    }

    #[must_use]
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    #[must_use]
    pub fn with_serial_consistency(mut self, serial_consistency: Consistency) -> Self {
        self.serial_consistency = Some(serial_consistency);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: CInt) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Continues paging from a state returned with a previous page.
    #[must_use]
    pub fn with_paging_state(mut self, paging_state: CBytes) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    /// Sets the default timestamp, in microseconds.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: CLong) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Requests server side tracing.
    #[must_use]
    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    /// Marks the statement as idempotent or not. Only idempotent statements are executed
    /// speculatively and retried after write timeouts.
    #[must_use]
    pub fn idempotent(mut self, value: bool) -> Self {
        self.is_idempotent = value;
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Adds a custom payload entry. Custom payloads require protocol v4.
    #[must_use]
    pub fn with_custom_payload(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.custom_payload.insert(key.into(), value);
        self
    }

    /// Executes the statement on given host only, bypassing load balancing.
    #[must_use]
    pub fn with_host(mut self, host: SocketAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Executes the statement on behalf of another role. Requires protocol v4.
    #[must_use]
    pub fn execute_as(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.with_custom_payload(PROXY_EXECUTE_KEY, name.into_bytes())
    }

    /// CQL text of the statement; empty for batches.
    pub fn query(&self) -> &str {
        match &self.kind {
            StatementKind::Query(query) | StatementKind::Prepare(query) => query,
            StatementKind::Execute(prepared) => prepared.query(),
            StatementKind::Batch(_) => "",
        }
    }

    /// Finds the prepared statement carrying given id, if this statement executes one.
    pub(crate) fn find_prepared(&self, id: &CBytesShort) -> Option<&Arc<PreparedStatement>> {
        match &self.kind {
            StatementKind::Execute(prepared) => Some(prepared).filter(|p| p.id() == *id),
            StatementKind::Batch(batch) => batch.entries.iter().find_map(|entry| match entry {
                BatchEntry::Prepared(prepared, _) if prepared.id() == *id => Some(prepared),
                _ => None,
            }),
            _ => None,
        }
    }

    #[inline]
    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    #[inline]
    pub fn serial_consistency(&self) -> Option<Consistency> {
        self.serial_consistency
    }

    #[inline]
    pub fn is_idempotent(&self) -> bool {
        self.is_idempotent
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[inline]
    pub fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    #[inline]
    pub fn host(&self) -> Option<SocketAddr> {
        self.host
    }

    #[inline]
    pub fn custom_payload(&self) -> &HashMap<String, Vec<u8>> {
        &self.custom_payload
    }

    /// Builds the request frame at given consistency. Prepared ids are read at call time, so
    /// a rebuilt frame picks up ids refreshed by a re-prepare.
    pub(crate) fn to_frame(&self, consistency: Consistency, version: Version) -> Frame {
        let flags = if self.tracing {
            Flags::TRACING
        } else {
            Flags::empty()
        };

        let frame = match &self.kind {
            StatementKind::Query(query) => Frame::new_req_query(
                &BodyReqQuery::new(query.clone(), self.query_params(consistency)),
                flags,
                version,
            ),
            StatementKind::Prepare(query) => Frame::new_req_prepare(query, flags, version),
            StatementKind::Execute(prepared) => Frame::new_req_execute(
                &BodyReqExecute::new(prepared.id(), self.query_params(consistency)),
                flags,
                version,
            ),
            StatementKind::Batch(batch) => Frame::new_req_batch(
                &BodyReqBatch {
                    batch_type: batch.batch_type,
                    queries: batch.queries(),
                    consistency,
                    serial_consistency: self.serial_consistency,
                    timestamp: self.timestamp,
                },
                flags,
                version,
            ),
        };

        frame.with_custom_payload(self.custom_payload.clone())
    }

    fn query_params(&self, consistency: Consistency) -> QueryParams {
        QueryParams {
            consistency,
            values: self.values.clone(),
            skip_metadata: false,
            page_size: self.page_size,
            paging_state: self.paging_state.clone(),
            serial_consistency: self.serial_consistency,
            timestamp: self.timestamp,
        }
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::new(query)
    }
}

impl From<String> for Statement {
    fn from(query: String) -> Self {
        Statement::new(query)
    }
}

impl From<Batch> for Statement {
    fn from(batch: Batch) -> Self {
        Statement::batch(batch)
    }
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub body: ResResultBody,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: HashMap<String, Vec<u8>>,
    /// Host which served the request.
    pub coordinator: Option<SocketAddr>,
    /// Every host a request was sent to, in order.
    pub attempted_hosts: Vec<SocketAddr>,
    /// Speculative executions started on top of the initial one.
    pub speculative_executions: usize,
}

impl QueryResult {
    pub(crate) fn new(body: ResResultBody, frame: &Frame, coordinator: SocketAddr) -> Self {
        QueryResult {
            body,
            tracing_id: frame.tracing_id,
            warnings: frame.warnings.clone(),
            custom_payload: frame.custom_payload.clone(),
            coordinator: Some(coordinator),
            attempted_hosts: vec![],
            speculative_executions: 0,
        }
    }

    /// Result standing in for an ignored server error.
    pub(crate) fn ignored(coordinator: SocketAddr) -> Self {
        QueryResult {
            body: ResResultBody::Void,
            tracing_id: None,
            warnings: vec![],
            custom_payload: HashMap::new(),
            coordinator: Some(coordinator),
            attempted_hosts: vec![],
            speculative_executions: 0,
        }
    }

    #[inline]
    pub fn rows(&self) -> Option<&BodyResResultRows> {
        self.body.as_rows()
    }

    #[inline]
    pub fn into_rows(self) -> Option<BodyResResultRows> {
        self.body.into_rows()
    }

    /// Paging state of the next page, if there is one.
    pub fn paging_state(&self) -> Option<&CBytes> {
        self.rows()
            .and_then(|rows| rows.metadata.paging_state.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_protocol::frame::message_query::Value;
    use cql_protocol::frame::message_response::ResponseBody;
    use cql_protocol::frame::{FromCursor, Opcode};
    use std::io::Cursor;

    fn prepared(id: u8) -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement::new(
            "INSERT INTO ks.t (id) VALUES (?)",
            BodyResResultPrepared {
                id: CBytesShort::new(vec![id]),
                metadata: PreparedMetadata::default(),
                result_metadata: RowsMetadata::default(),
            },
        ))
    }

    #[test]
    fn should_build_query_frame() {
        let statement = Statement::new("SELECT * FROM ks.t WHERE id = ?")
            .with_values(vec![5])
            .with_page_size(100)
            .with_tracing(true)
            .execute_as("alice");

        let frame = statement.to_frame(Consistency::LocalQuorum, Version::V4);
        assert_eq!(frame.opcode, Opcode::Query);
        assert!(frame.flags.contains(Flags::TRACING));
        assert_eq!(
            frame.custom_payload.get(PROXY_EXECUTE_KEY),
            Some(&b"alice".to_vec())
        );

        let body = BodyReqQuery::from_cursor(&mut Cursor::new(frame.body.as_slice()), Version::V4)
            .unwrap();
        assert_eq!(body.query, "SELECT * FROM ks.t WHERE id = ?");
        assert_eq!(body.query_params.consistency, Consistency::LocalQuorum);
        assert_eq!(body.query_params.page_size, Some(100));
    }

    #[test]
    fn should_keep_overrides() {
        let statement = Statement::from("SELECT now() FROM system.local")
            .idempotent(true)
            .with_timeout(Duration::from_millis(50))
            .with_host("127.0.0.2:9042".parse().unwrap());

        assert!(statement.is_idempotent());
        assert_eq!(statement.timeout(), Some(Duration::from_millis(50)));
        assert_eq!(statement.host(), Some("127.0.0.2:9042".parse().unwrap()));
        assert_eq!(statement.consistency(), None);
    }

    #[test]
    fn should_expose_rows() {
        let frame = Frame::new_response(Version::V4, Opcode::Result, 0, vec![0, 0, 0, 1]);
        let body = match frame.response_body().unwrap() {
            ResponseBody::Result(body) => body,
            _ => panic!("expected result"),
        };

        let result = QueryResult::new(body, &frame, "127.0.0.1:9042".parse().unwrap());
        assert!(result.rows().is_none());
        assert!(result.paging_state().is_none());
        assert_eq!(result.coordinator, Some("127.0.0.1:9042".parse().unwrap()));
    }

    #[test]
    fn should_build_execute_frame_with_current_id() {
        let prepared = prepared(1);
        let statement = prepared.bind(vec![Value::from(7i32)]);

        prepared.set_id(CBytesShort::new(vec![2]));

        let frame = statement.to_frame(Consistency::Quorum, Version::V4);
        assert_eq!(frame.opcode, Opcode::Execute);

        let body = BodyReqExecute::from_cursor(&mut Cursor::new(frame.body.as_slice()), Version::V4)
            .unwrap();
        assert_eq!(body.id, CBytesShort::new(vec![2]));
        assert_eq!(body.query_params.consistency, Consistency::Quorum);
        assert_eq!(
            body.query_params.values,
            Some(QueryValues::SimpleValues(vec![Value::from(7i32)]))
        );
        assert_eq!(statement.query(), "INSERT INTO ks.t (id) VALUES (?)");
    }

    #[test]
    fn should_build_batch_frame() {
        let prepared = prepared(3);
        let batch = Batch::new(BatchType::Unlogged)
            .add_query("DELETE FROM ks.t WHERE id = ?", vec![1])
            .add_prepared(&prepared, vec![2]);

        let statement = Statement::from(batch).with_serial_consistency(Consistency::LocalSerial);
        let frame = statement.to_frame(Consistency::One, Version::V4);
        assert_eq!(frame.opcode, Opcode::Batch);

        let body = BodyReqBatch::from_cursor(&mut Cursor::new(frame.body.as_slice()), Version::V4)
            .unwrap();
        assert_eq!(body.batch_type, BatchType::Unlogged);
        assert_eq!(body.queries.len(), 2);
        assert_eq!(
            body.queries[1].subject,
            BatchQuerySubject::PreparedId(CBytesShort::new(vec![3]))
        );
        assert_eq!(body.serial_consistency, Some(Consistency::LocalSerial));
    }

    #[test]
    fn should_find_prepared_by_id() {
        let first = prepared(1);
        let second = prepared(2);

        let execute = first.bind(vec![0]);
        assert!(execute.find_prepared(&CBytesShort::new(vec![1])).is_some());
        assert!(execute.find_prepared(&CBytesShort::new(vec![2])).is_none());

        let batch = Statement::batch(
            Batch::new(BatchType::Logged)
                .add_prepared(&first, vec![0])
                .add_prepared(&second, vec![0]),
        );
        let found = batch.find_prepared(&CBytesShort::new(vec![2])).unwrap();
        assert!(Arc::ptr_eq(found, &second));

        assert!(Statement::new("SELECT 1")
            .find_prepared(&CBytesShort::new(vec![1]))
            .is_none());
    }

    #[test]
    fn should_build_prepare_frame() {
        let frame = Statement::prepare("SELECT * FROM ks.t").to_frame(Consistency::One, Version::V3);
        assert_eq!(frame.opcode, Opcode::Prepare);
        assert_eq!(&frame.body[..4], &[0, 0, 0, 18]);
    }
}
