use std::io::Cursor;

use crate::error;
use crate::frame::message_query::QueryParams;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::CBytesShort;

/// `EXECUTE` request body: a prepared statement id with the parameters to run it with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyReqExecute {
    pub id: CBytesShort,
    pub query_params: QueryParams,
}

impl BodyReqExecute {
    #[inline]
    pub fn new(id: CBytesShort, query_params: QueryParams) -> Self {
        BodyReqExecute { id, query_params }
    }
}

impl Serialize for BodyReqExecute {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.id.serialize(cursor, version);
        self.query_params.serialize(cursor, version);
    }
}

impl FromCursor for BodyReqExecute {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> error::Result<Self> {
        let id = CBytesShort::from_cursor(cursor, version)?;
        let query_params = QueryParams::from_cursor(cursor, version)?;
        Ok(BodyReqExecute { id, query_params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::Consistency;
    use crate::frame::message_query::Value;

    #[test]
    fn should_prefix_params_with_id() {
        let body = BodyReqExecute::new(CBytesShort::new(vec![7, 8]), QueryParams::default());
        assert_eq!(body.serialize_to_vec(Version::V4), vec![0, 2, 7, 8, 0, 1, 0]);
    }

    #[test]
    fn should_read_written_body() {
        let body = BodyReqExecute::new(
            CBytesShort::new(vec![1, 2, 3]),
            QueryParams {
                consistency: Consistency::Quorum,
                values: Some(vec![Value::from(5i32)].into()),
                page_size: Some(10),
                ..Default::default()
            },
        );

        let bytes = body.serialize_to_vec(Version::V3);
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(BodyReqExecute::from_cursor(&mut cursor, Version::V3).unwrap(), body);
    }
}
