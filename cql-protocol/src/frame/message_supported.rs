use std::collections::HashMap;
use std::io::Cursor;

use crate::error;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_string_multimap, serialize_string_multimap};

/// Option key listing the compression algorithms the server accepts.
pub const COMPRESSION: &str = "COMPRESSION";

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct BodyResSupported {
    pub data: HashMap<String, Vec<String>>,
}

impl BodyResSupported {
    /// Compression algorithms advertised by the server.
    pub fn compression(&self) -> &[String] {
        self.data
            .get(COMPRESSION)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Serialize for BodyResSupported {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_string_multimap(cursor, &self.data, version);
    }
}

impl FromCursor for BodyResSupported {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<BodyResSupported> {
        from_cursor_string_multimap(cursor).map(|data| BodyResSupported { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        let bytes = [
            0, 1, // n options
            // 1-st option
            0, 2, 97, 98, // key [string] "ab"
            0, 2, 0, 1, 97, 0, 1, 98, /* value ["a", "b"] */
        ];
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let options = BodyResSupported::from_cursor(&mut cursor, Version::V4)
            .unwrap()
            .data;
        assert_eq!(options.len(), 1);
        let option_ab = options.get(&"ab".to_string()).unwrap();
        assert_eq!(option_ab[0], "a".to_string());
        assert_eq!(option_ab[1], "b".to_string());
    }

    #[test]
    fn test_compression() {
        let mut data = HashMap::new();
        data.insert(COMPRESSION.to_string(), vec!["lz4".to_string()]);
        assert_eq!(BodyResSupported { data }.compression(), ["lz4".to_string()]);
        assert!(BodyResSupported::default().compression().is_empty());
    }
}
