use derive_more::Display;
use std::convert::TryFrom;
use std::io::{Cursor, Read};

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::frame::message_query::{QueryFlags, QueryValues, Value};
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_str_long, serialize_str_long, CBytesShort, CIntShort, CLong};

/// How the server applies a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default)]
pub enum BatchType {
    /// Goes through the batch log, so either every statement applies or none.
    #[default]
    Logged,
    Unlogged,
    /// Counter updates only.
    Counter,
}

impl TryFrom<u8> for BatchType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BatchType::Logged),
            1 => Ok(BatchType::Unlogged),
            2 => Ok(BatchType::Counter),
            _ => Err(Error::General(format!("Unknown batch type: {value}"))),
        }
    }
}

impl From<BatchType> for u8 {
    fn from(value: BatchType) -> Self {
        match value {
            BatchType::Logged => 0,
            BatchType::Unlogged => 1,
            BatchType::Counter => 2,
        }
    }
}

/// What a batch entry runs: inline CQL or a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BatchQuerySubject {
    QueryString(String),
    PreparedId(CBytesShort),
}

/// A single batch entry with its positional values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchQuery {
    pub subject: BatchQuerySubject,
    pub values: QueryValues,
}

impl Serialize for BatchQuery {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match &self.subject {
            BatchQuerySubject::QueryString(query) => {
                0u8.serialize(cursor, version);
                serialize_str_long(cursor, query, version);
            }
            BatchQuerySubject::PreparedId(id) => {
                1u8.serialize(cursor, version);
                id.serialize(cursor, version);
            }
        }

        // batches carry no names; entries are bound by position
        (self.values.len() as CIntShort).serialize(cursor, version);
        match &self.values {
            QueryValues::SimpleValues(values) => {
                for value in values {
                    value.serialize(cursor, version);
                }
            }
            QueryValues::NamedValues(values) => {
                for (_, value) in values {
                    value.serialize(cursor, version);
                }
            }
        }
    }
}

impl FromCursor for BatchQuery {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Self> {
        let mut kind = [0];
        cursor.read_exact(&mut kind)?;

        let subject = match kind[0] {
            0 => BatchQuerySubject::QueryString(from_cursor_str_long(cursor)?.to_string()),
            1 => BatchQuerySubject::PreparedId(CBytesShort::from_cursor(cursor, version)?),
            kind => return Err(Error::General(format!("Unknown batch query kind: {kind}"))),
        };

        let count = CIntShort::from_cursor(cursor, version)?.max(0);
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(Value::from_cursor(cursor, version)?);
        }

        Ok(BatchQuery {
            subject,
            values: QueryValues::SimpleValues(values),
        })
    }
}

/// `BATCH` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyReqBatch {
    pub batch_type: BatchType,
    pub queries: Vec<BatchQuery>,
    pub consistency: Consistency,
    /// Protocol v3 and later.
    pub serial_consistency: Option<Consistency>,
    /// Client side timestamp in microseconds. Protocol v3 and later.
    pub timestamp: Option<CLong>,
}

impl Serialize for BodyReqBatch {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        u8::from(self.batch_type).serialize(cursor, version);
        (self.queries.len() as CIntShort).serialize(cursor, version);
        for query in &self.queries {
            query.serialize(cursor, version);
        }

        self.consistency.serialize(cursor, version);

        // v2 batches end with the consistency
        if version < Version::V3 {
            return;
        }

        let mut flags = QueryFlags::empty();
        flags.set(
            QueryFlags::WITH_SERIAL_CONSISTENCY,
            self.serial_consistency.is_some(),
        );
        flags.set(QueryFlags::WITH_DEFAULT_TIMESTAMP, self.timestamp.is_some());
        flags.bits().serialize(cursor, version);

        if let Some(serial_consistency) = self.serial_consistency {
            serial_consistency.serialize(cursor, version);
        }

        if let Some(timestamp) = self.timestamp {
            timestamp.serialize(cursor, version);
        }
    }
}

impl FromCursor for BodyReqBatch {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Self> {
        let mut batch_type = [0];
        cursor.read_exact(&mut batch_type)?;
        let batch_type = BatchType::try_from(batch_type[0])?;

        let count = CIntShort::from_cursor(cursor, version)?.max(0);
        let mut queries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            queries.push(BatchQuery::from_cursor(cursor, version)?);
        }

        let consistency = Consistency::from_cursor(cursor, version)?;
        let mut body = BodyReqBatch {
            batch_type,
            queries,
            consistency,
            serial_consistency: None,
            timestamp: None,
        };

        if version < Version::V3 {
            return Ok(body);
        }

        let mut flags = [0];
        cursor.read_exact(&mut flags)?;
        let flags = QueryFlags::from_bits_truncate(flags[0]);

        if flags.contains(QueryFlags::WITH_SERIAL_CONSISTENCY) {
            body.serial_consistency = Some(Consistency::from_cursor(cursor, version)?);
        }

        if flags.contains(QueryFlags::WITH_DEFAULT_TIMESTAMP) {
            body.timestamp = Some(CLong::from_cursor(cursor, version)?);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BodyReqBatch {
        BodyReqBatch {
            batch_type: BatchType::Unlogged,
            queries: vec![
                BatchQuery {
                    subject: BatchQuerySubject::QueryString("INSERT INTO t (a) VALUES (?)".into()),
                    values: vec![Value::from(1i32)].into(),
                },
                BatchQuery {
                    subject: BatchQuerySubject::PreparedId(CBytesShort::new(vec![9, 9])),
                    values: QueryValues::SimpleValues(vec![Value::Null]),
                },
            ],
            consistency: Consistency::Quorum,
            serial_consistency: Some(Consistency::LocalSerial),
            timestamp: Some(42),
        }
    }

    #[test]
    fn should_read_written_batch() {
        let body = batch();
        let bytes = body.serialize_to_vec(Version::V4);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(BodyReqBatch::from_cursor(&mut cursor, Version::V4).unwrap(), body);
        assert_eq!(cursor.position() as usize, bytes.len());
    }

    #[test]
    fn should_drop_flags_for_v2() {
        let body = batch();
        let bytes = body.serialize_to_vec(Version::V2);

        // consistency is the last field
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 4]);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let read = BodyReqBatch::from_cursor(&mut cursor, Version::V2).unwrap();
        assert_eq!(read.serial_consistency, None);
        assert_eq!(read.timestamp, None);
        assert_eq!(read.queries, body.queries);
    }

    #[test]
    fn should_send_named_values_by_position() {
        let query = BatchQuery {
            subject: BatchQuerySubject::PreparedId(CBytesShort::new(vec![1])),
            values: QueryValues::NamedValues(vec![("a".into(), Value::from(2i8))]),
        };

        assert_eq!(
            query.serialize_to_vec(Version::V4),
            vec![1, 0, 1, 1, 0, 1, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn should_reject_unknown_batch_type() {
        assert!(BatchType::try_from(3).is_err());
        assert_eq!(BatchType::try_from(2).unwrap(), BatchType::Counter);
    }
}
