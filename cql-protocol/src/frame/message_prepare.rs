use std::io::Cursor;

use crate::error;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_str_long, serialize_str_long};

/// `PREPARE` request body: the CQL text to prepare.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyReqPrepare {
    pub query: String,
}

impl BodyReqPrepare {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        BodyReqPrepare {
            query: query.into(),
        }
    }
}

impl Serialize for BodyReqPrepare {
    #[inline]
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str_long(cursor, &self.query, version);
    }
}

impl FromCursor for BodyReqPrepare {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        from_cursor_str_long(cursor).map(BodyReqPrepare::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_write_query_as_long_string() {
        let body = BodyReqPrepare::new("SELECT 1");
        let bytes = body.serialize_to_vec(Version::V4);
        assert_eq!(bytes, vec![0, 0, 0, 8, 83, 69, 76, 69, 67, 84, 32, 49]);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(BodyReqPrepare::from_cursor(&mut cursor, Version::V4).unwrap(), body);
    }
}
