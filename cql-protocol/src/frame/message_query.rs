//! `QUERY` request body and its parameters.
use bitflags::bitflags;
use std::io::{Cursor, Read};
use std::net::IpAddr;
use uuid::Uuid;

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::*;

const NULL_INT_VALUE: CInt = -1;
const NOT_SET_INT_VALUE: CInt = -2;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u8 {
        /// Values are present.
        const VALUE = 0x01;
        const SKIP_METADATA = 0x02;
        const PAGE_SIZE = 0x04;
        const WITH_PAGING_STATE = 0x08;
        const WITH_SERIAL_CONSISTENCY = 0x10;
        /// Protocol v3 and later.
        const WITH_DEFAULT_TIMESTAMP = 0x20;
        /// Values are named. Protocol v3 and later.
        const WITH_NAMES_FOR_VALUES = 0x40;
    }
}

/// A bound value, already serialized to its CQL representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Some(Vec<u8>),
    Null,
    /// Leaves the column untouched. Protocol v4 and later; sent as null before that.
    NotSet,
}

impl Serialize for Value {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            Value::Some(value) => {
                let len = value.len() as CInt;
                len.serialize(cursor, version);
                value.serialize(cursor, version);
            }
            Value::NotSet if version >= Version::V4 => {
                NOT_SET_INT_VALUE.serialize(cursor, version)
            }
            Value::Null | Value::NotSet => NULL_INT_VALUE.serialize(cursor, version),
        }
    }
}

impl FromCursor for Value {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Value> {
        match CInt::from_cursor(cursor, version)? {
            NULL_INT_VALUE => Ok(Value::Null),
            NOT_SET_INT_VALUE => Ok(Value::NotSet),
            len if len >= 0 => cursor_next_value(cursor, len as usize).map(Value::Some),
            len => Err(Error::General(format!("Invalid value length: {len}"))),
        }
    }
}

macro_rules! impl_value_from_num {
    ($t:ty) => {
        impl From<$t> for Value {
            #[inline]
            fn from(value: $t) -> Self {
                Value::Some(value.to_be_bytes().to_vec())
            }
        }
    };
}

impl_value_from_num!(i8);
impl_value_from_num!(i16);
impl_value_from_num!(i32);
impl_value_from_num!(i64);
impl_value_from_num!(f32);
impl_value_from_num!(f64);

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Some(vec![value as u8])
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::Some(value.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Value::Some(value.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    #[inline]
    fn from(value: Vec<u8>) -> Self {
        Value::Some(value)
    }
}

impl From<Uuid> for Value {
    #[inline]
    fn from(value: Uuid) -> Self {
        Value::Some(value.as_bytes().to_vec())
    }
}

impl From<IpAddr> for Value {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(ip) => Value::Some(ip.octets().to_vec()),
            IpAddr::V6(ip) => Value::Some(ip.octets().to_vec()),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Positional or named query values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValues {
    SimpleValues(Vec<Value>),
    NamedValues(Vec<(String, Value)>),
}

impl QueryValues {
    #[inline]
    pub fn has_names(&self) -> bool {
        matches!(self, QueryValues::NamedValues(_))
    }

    pub fn len(&self) -> usize {
        match self {
            QueryValues::SimpleValues(values) => values.len(),
            QueryValues::NamedValues(values) => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Into<Value>> From<Vec<T>> for QueryValues {
    fn from(values: Vec<T>) -> Self {
        QueryValues::SimpleValues(values.into_iter().map(Into::into).collect())
    }
}

impl Serialize for QueryValues {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        (self.len() as CIntShort).serialize(cursor, version);

        match self {
            QueryValues::SimpleValues(values) => {
                for value in values {
                    value.serialize(cursor, version);
                }
            }
            QueryValues::NamedValues(values) => {
                for (name, value) in values {
                    serialize_str(cursor, name, version);
                    value.serialize(cursor, version);
                }
            }
        }
    }
}

/// Parameters of a query: everything but the CQL text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    pub consistency: Consistency,
    pub values: Option<QueryValues>,
    pub skip_metadata: bool,
    pub page_size: Option<CInt>,
    pub paging_state: Option<CBytes>,
    pub serial_consistency: Option<Consistency>,
    /// Client side timestamp in microseconds. Ignored below protocol v3.
    pub timestamp: Option<CLong>,
}

impl QueryParams {
    fn flags(&self, version: Version) -> QueryFlags {
        let mut flags = QueryFlags::empty();

        if let Some(values) = &self.values {
            flags.insert(QueryFlags::VALUE);
            if values.has_names() && version >= Version::V3 {
                flags.insert(QueryFlags::WITH_NAMES_FOR_VALUES);
            }
        }

        flags.set(QueryFlags::SKIP_METADATA, self.skip_metadata);
        flags.set(QueryFlags::PAGE_SIZE, self.page_size.is_some());
        flags.set(QueryFlags::WITH_PAGING_STATE, self.paging_state.is_some());
        flags.set(
            QueryFlags::WITH_SERIAL_CONSISTENCY,
            self.serial_consistency.is_some(),
        );
        flags.set(
            QueryFlags::WITH_DEFAULT_TIMESTAMP,
            self.timestamp.is_some() && version >= Version::V3,
        );

        flags
    }
}

impl Serialize for QueryParams {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        let flags = self.flags(version);

        self.consistency.serialize(cursor, version);
        flags.bits().serialize(cursor, version);

        if let Some(values) = &self.values {
            match values {
                // names are a v3 addition; older servers only get the values in order
                QueryValues::NamedValues(named) if version < Version::V3 => {
                    let values: Vec<Value> = named.iter().map(|(_, value)| value.clone()).collect();
                    QueryValues::SimpleValues(values).serialize(cursor, version);
                }
                values => values.serialize(cursor, version),
            }
        }

        if let Some(page_size) = self.page_size {
            page_size.serialize(cursor, version);
        }

        if let Some(paging_state) = &self.paging_state {
            paging_state.serialize(cursor, version);
        }

        if let Some(serial_consistency) = self.serial_consistency {
            serial_consistency.serialize(cursor, version);
        }

        if flags.contains(QueryFlags::WITH_DEFAULT_TIMESTAMP) {
            if let Some(timestamp) = self.timestamp {
                timestamp.serialize(cursor, version);
            }
        }
    }
}

impl FromCursor for QueryParams {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<QueryParams> {
        let consistency = Consistency::from_cursor(cursor, version)?;

        let mut flags = [0];
        cursor.read_exact(&mut flags)?;
        let flags = QueryFlags::from_bits_truncate(flags[0]);

        let values = if flags.contains(QueryFlags::VALUE) {
            let count = CIntShort::from_cursor(cursor, version)?.max(0);
            if flags.contains(QueryFlags::WITH_NAMES_FOR_VALUES) {
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = from_cursor_str(cursor)?.to_string();
                    values.push((name, Value::from_cursor(cursor, version)?));
                }

                Some(QueryValues::NamedValues(values))
            } else {
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(Value::from_cursor(cursor, version)?);
                }

                Some(QueryValues::SimpleValues(values))
            }
        } else {
            None
        };

        let page_size = if flags.contains(QueryFlags::PAGE_SIZE) {
            Some(CInt::from_cursor(cursor, version)?)
        } else {
            None
        };

        let paging_state = if flags.contains(QueryFlags::WITH_PAGING_STATE) {
            Some(CBytes::from_cursor(cursor, version)?)
        } else {
            None
        };

        let serial_consistency = if flags.contains(QueryFlags::WITH_SERIAL_CONSISTENCY) {
            Some(Consistency::from_cursor(cursor, version)?)
        } else {
            None
        };

        let timestamp = if flags.contains(QueryFlags::WITH_DEFAULT_TIMESTAMP) {
            Some(CLong::from_cursor(cursor, version)?)
        } else {
            None
        };

        Ok(QueryParams {
            consistency,
            values,
            skip_metadata: flags.contains(QueryFlags::SKIP_METADATA),
            page_size,
            paging_state,
            serial_consistency,
            timestamp,
        })
    }
}

/// Structure which represents body of Query request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyReqQuery {
    pub query: String,
    pub query_params: QueryParams,
}

impl BodyReqQuery {
    pub fn new(query: impl Into<String>, query_params: QueryParams) -> Self {
        BodyReqQuery {
            query: query.into(),
            query_params,
        }
    }
}

impl Serialize for BodyReqQuery {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str_long(cursor, &self.query, version);
        self.query_params.serialize(cursor, version);
    }
}

impl FromCursor for BodyReqQuery {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<BodyReqQuery> {
        let query = from_cursor_str_long(cursor)?.to_string();
        let query_params = QueryParams::from_cursor(cursor, version)?;

        Ok(BodyReqQuery {
            query,
            query_params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_minimal_query() {
        let body = BodyReqQuery::new("USE ks", QueryParams::default());
        let bytes = body.serialize_to_vec(Version::V4);
        assert_eq!(
            bytes,
            vec![0, 0, 0, 6, 85, 83, 69, 32, 107, 115, 0, 1, 0]
        );
    }

    #[test]
    fn query_params_full() {
        let params = QueryParams {
            consistency: Consistency::LocalQuorum,
            values: Some(vec![Value::from(1i32), Value::Null, Value::NotSet].into()),
            skip_metadata: false,
            page_size: Some(100),
            paging_state: Some(CBytes::new(vec![1, 2])),
            serial_consistency: Some(Consistency::LocalSerial),
            timestamp: Some(1234),
        };

        let body = BodyReqQuery::new("SELECT * FROM t WHERE a = ?", params);
        let bytes = body.serialize_to_vec(Version::V4);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(BodyReqQuery::from_cursor(&mut cursor, Version::V4).unwrap(), body);
    }

    #[test]
    fn timestamp_dropped_for_v2() {
        let params = QueryParams {
            timestamp: Some(1234),
            values: Some(vec![Value::NotSet].into()),
            ..Default::default()
        };

        let bytes = params.serialize_to_vec(Version::V2);
        // consistency, flags (values only), one null value
        assert_eq!(bytes, vec![0, 1, 0x01, 0, 1, 255, 255, 255, 255]);
    }

    #[test]
    fn named_values() {
        let params = QueryParams {
            values: Some(QueryValues::NamedValues(vec![(
                "id".to_string(),
                Value::from("x"),
            )])),
            ..Default::default()
        };

        let bytes = params.serialize_to_vec(Version::V4);
        assert_eq!(bytes[2], 0x41);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(QueryParams::from_cursor(&mut cursor, Version::V4).unwrap(), params);
    }
}
