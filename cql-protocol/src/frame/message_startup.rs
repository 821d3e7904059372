use std::collections::HashMap;
use std::io::Cursor;

use crate::compression::Compression;
use crate::error;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_string_map, serialize_string_map};

const CQL_VERSION: &str = "CQL_VERSION";
const CQL_VERSION_VAL: &str = "3.0.0";
const COMPRESSION: &str = "COMPRESSION";

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct BodyReqStartup {
    pub map: HashMap<String, String>,
}

impl BodyReqStartup {
    pub fn new(compression: Compression) -> BodyReqStartup {
        let mut map = HashMap::new();
        map.insert(CQL_VERSION.into(), CQL_VERSION_VAL.into());
        if let Some(compression) = compression.as_str() {
            map.insert(COMPRESSION.into(), compression.into());
        }

        BodyReqStartup { map }
    }

    /// Compression requested by the client, if any.
    pub fn compression(&self) -> Compression {
        self.map
            .get(COMPRESSION)
            .map(|value| Compression::from(value.as_str()))
            .unwrap_or_default()
    }
}

impl Serialize for BodyReqStartup {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_string_map(cursor, &self.map, version);
    }
}

impl FromCursor for BodyReqStartup {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        from_cursor_string_map(cursor).map(|map| BodyReqStartup { map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_body_req_startup_some_compression() {
        let body = BodyReqStartup::new(Compression::Snappy);
        assert_eq!(body.map.get("CQL_VERSION"), Some(&"3.0.0".into()));
        assert_eq!(body.map.get("COMPRESSION"), Some(&"snappy".into()));
        assert_eq!(body.compression(), Compression::Snappy);
    }

    #[test]
    fn new_body_req_startup_no_compression() {
        let body = BodyReqStartup::new(Compression::None);
        assert_eq!(body.map.len(), 1);
        assert_eq!(body.compression(), Compression::None);
    }

    #[test]
    fn body_req_startup_serialize() {
        let body = BodyReqStartup::new(Compression::None);
        let bytes = body.serialize_to_vec(Version::V4);
        assert_eq!(
            bytes,
            vec![
                0, 1, 0, 11, 67, 81, 76, 95, 86, 69, 82, 83, 73, 79, 78, 0, 5, 51, 46, 48, 46, 48
            ]
        );

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(BodyReqStartup::from_cursor(&mut cursor, Version::V4).unwrap(), body);
    }
}
