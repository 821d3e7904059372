//! Wire encoding hooks implemented by every protocol structure.
use std::io::{Cursor, Write};

use crate::error::Result;
use crate::frame::Version;

/// Encodes a value into its native protocol representation. Output always goes to an in-memory
/// buffer, so encoding can't fail.
pub trait Serialize {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version);

    fn serialize_to_vec(&self, version: Version) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut Cursor::new(&mut out), version);
        out
    }
}

/// Decodes a value, leaving the cursor right after its last byte.
pub trait FromCursor: Sized {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Self>;
}

// raw bytes go out as they are, without a length prefix
impl Serialize for [u8] {
    #[inline]
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, _version: Version) {
        let _ = cursor.write_all(self);
    }
}

impl Serialize for Vec<u8> {
    #[inline]
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.as_slice().serialize(cursor, version);
    }
}

macro_rules! serialize_big_endian {
    ($($t:ty),*) => {
        $(
            impl Serialize for $t {
                #[inline]
                fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, _version: Version) {
                    let _ = cursor.write_all(&self.to_be_bytes());
                }
            }
        )*
    };
}

serialize_big_endian!(i8, i16, i32, i64, u8, u16, u32, u64);
