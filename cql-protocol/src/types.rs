//! Primitive protocol notations: `[short]`, `[int]`, `[long]`, `[string]`, `[long string]`,
//! `[string list]`, `[bytes]`, `[short bytes]`, `[string map]`, `[string multimap]`,
//! `[bytes map]` and `[inet]`, plus decoders for the handful of cell types the driver reads
//! from system tables.
use std::collections::HashMap;
use std::convert::TryInto;
use std::io::{self, Cursor, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::traits::FromCursor;
use crate::frame::{Serialize, Version};

pub const SHORT_LEN: usize = 2;
pub const INT_LEN: usize = 4;
pub const LONG_LEN: usize = 8;
pub const UUID_LEN: usize = 16;

const NULL_INT_LEN: CInt = -1;
const NULL_SHORT_LEN: CIntShort = -1;

/// Cassandra int type.
pub type CInt = i32;

/// Cassandra int short type.
pub type CIntShort = i16;

/// Cassandra long type.
pub type CLong = i64;

fn convert_to_array<const S: usize>(bytes: &[u8]) -> io::Result<[u8; S]> {
    bytes
        .get(..S)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Not enough bytes"))
}

pub fn try_i64_from_bytes(bytes: &[u8]) -> io::Result<i64> {
    convert_to_array(bytes).map(i64::from_be_bytes)
}

pub fn try_i32_from_bytes(bytes: &[u8]) -> io::Result<i32> {
    convert_to_array(bytes).map(i32::from_be_bytes)
}

pub fn try_i16_from_bytes(bytes: &[u8]) -> io::Result<i16> {
    convert_to_array(bytes).map(i16::from_be_bytes)
}

pub fn serialize_str(cursor: &mut Cursor<&mut Vec<u8>>, value: &str, version: Version) {
    let len = value.len() as CIntShort;
    len.serialize(cursor, version);
    let _ = cursor.write(value.as_bytes());
}

pub fn serialize_str_long(cursor: &mut Cursor<&mut Vec<u8>>, value: &str, version: Version) {
    let len = value.len() as CInt;
    len.serialize(cursor, version);
    let _ = cursor.write(value.as_bytes());
}

pub fn serialize_str_list<'a>(
    cursor: &mut Cursor<&mut Vec<u8>>,
    list: impl ExactSizeIterator<Item = &'a str>,
    version: Version,
) {
    let len = list.len() as CIntShort;
    len.serialize(cursor, version);

    for string in list {
        serialize_str(cursor, string, version);
    }
}

pub fn serialize_string_map(
    cursor: &mut Cursor<&mut Vec<u8>>,
    map: &HashMap<String, String>,
    version: Version,
) {
    let len = map.len() as CIntShort;
    len.serialize(cursor, version);

    for (key, value) in map {
        serialize_str(cursor, key, version);
        serialize_str(cursor, value, version);
    }
}

pub fn serialize_string_multimap(
    cursor: &mut Cursor<&mut Vec<u8>>,
    map: &HashMap<String, Vec<String>>,
    version: Version,
) {
    let len = map.len() as CIntShort;
    len.serialize(cursor, version);

    for (key, values) in map {
        serialize_str(cursor, key, version);
        serialize_str_list(cursor, values.iter().map(String::as_str), version);
    }
}

pub fn serialize_bytes_map(
    cursor: &mut Cursor<&mut Vec<u8>>,
    map: &HashMap<String, Vec<u8>>,
    version: Version,
) {
    let len = map.len() as CIntShort;
    len.serialize(cursor, version);

    for (key, value) in map {
        serialize_str(cursor, key, version);
        CBytes::new(value.clone()).serialize(cursor, version);
    }
}

pub fn from_cursor_str<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a str> {
    let mut buff = [0; SHORT_LEN];
    cursor.read_exact(&mut buff)?;

    let len = CIntShort::from_be_bytes(buff);
    if len < 0 {
        return Err(Error::General(format!("Negative string length: {len}")));
    }

    let body_bytes = cursor_next_value_ref(cursor, len as usize)?;
    std::str::from_utf8(body_bytes).map_err(Into::into)
}

pub fn from_cursor_str_long<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a str> {
    let mut buff = [0; INT_LEN];
    cursor.read_exact(&mut buff)?;

    let len = CInt::from_be_bytes(buff);
    if len < 0 {
        return Err(Error::General(format!("Negative string length: {len}")));
    }

    let body_bytes = cursor_next_value_ref(cursor, len as usize)?;
    std::str::from_utf8(body_bytes).map_err(Into::into)
}

pub fn from_cursor_string_list(cursor: &mut Cursor<&[u8]>) -> Result<Vec<String>> {
    let mut buff = [0; SHORT_LEN];
    cursor.read_exact(&mut buff)?;

    let len = i16::from_be_bytes(buff).max(0);
    let mut list = Vec::with_capacity(len as usize);
    for _ in 0..len {
        list.push(from_cursor_str(cursor)?.to_string());
    }

    Ok(list)
}

pub fn from_cursor_string_map(cursor: &mut Cursor<&[u8]>) -> Result<HashMap<String, String>> {
    let len = CIntShort::from_cursor(cursor, Version::V4)?.max(0);
    let mut map = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let key = from_cursor_str(cursor)?.to_string();
        let value = from_cursor_str(cursor)?.to_string();
        map.insert(key, value);
    }

    Ok(map)
}

pub fn from_cursor_string_multimap(
    cursor: &mut Cursor<&[u8]>,
) -> Result<HashMap<String, Vec<String>>> {
    let len = CIntShort::from_cursor(cursor, Version::V4)?.max(0);
    let mut map = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let key = from_cursor_str(cursor)?.to_string();
        let values = from_cursor_string_list(cursor)?;
        map.insert(key, values);
    }

    Ok(map)
}

pub fn from_cursor_bytes_map(cursor: &mut Cursor<&[u8]>) -> Result<HashMap<String, Vec<u8>>> {
    let len = CIntShort::from_cursor(cursor, Version::V4)?.max(0);
    let mut map = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let key = from_cursor_str(cursor)?.to_string();
        let value = CBytes::from_cursor(cursor, Version::V4)?
            .into_bytes()
            .unwrap_or_default();
        map.insert(key, value);
    }

    Ok(map)
}

/// The `[bytes]` notation: an `[int]` length followed by that many bytes; a negative length
/// stands for null.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Ord, PartialOrd, Default)]
pub struct CBytes {
    bytes: Option<Vec<u8>>,
}

impl CBytes {
    #[inline]
    pub fn new(bytes: Vec<u8>) -> CBytes {
        CBytes { bytes: Some(bytes) }
    }

    /// Creates Cassandra bytes that represent a null value.
    #[inline]
    pub fn new_null() -> CBytes {
        CBytes { bytes: None }
    }

    #[inline]
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.bytes.is_none()
    }

    #[inline]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.bytes
    }
}

impl From<Vec<u8>> for CBytes {
    fn from(bytes: Vec<u8>) -> Self {
        CBytes::new(bytes)
    }
}

impl FromCursor for CBytes {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<CBytes> {
        let len = CInt::from_cursor(cursor, version)?;
        // null or not set value
        if len < 0 {
            return Ok(CBytes { bytes: None });
        }

        cursor_next_value(cursor, len as usize).map(CBytes::new)
    }
}

impl Serialize for CBytes {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match &self.bytes {
            Some(bytes) => {
                let len = bytes.len() as CInt;
                len.serialize(cursor, version);
                bytes.serialize(cursor, version);
            }
            None => NULL_INT_LEN.serialize(cursor, version),
        }
    }
}

/// The `[short bytes]` notation.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct CBytesShort {
    bytes: Option<Vec<u8>>,
}

impl CBytesShort {
    #[inline]
    pub fn new(bytes: Vec<u8>) -> CBytesShort {
        CBytesShort { bytes: Some(bytes) }
    }

    #[inline]
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    #[inline]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.bytes
    }
}

impl FromCursor for CBytesShort {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<CBytesShort> {
        let len = CIntShort::from_cursor(cursor, version)?;

        if len < 0 {
            return Ok(CBytesShort { bytes: None });
        }

        cursor_next_value(cursor, len as usize).map(CBytesShort::new)
    }
}

impl Serialize for CBytesShort {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match &self.bytes {
            Some(bytes) => {
                let len = bytes.len() as CIntShort;
                len.serialize(cursor, version);
                bytes.serialize(cursor, version);
            }
            None => NULL_SHORT_LEN.serialize(cursor, version),
        }
    }
}

impl FromCursor for CInt {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<CInt> {
        let mut buff = [0; INT_LEN];
        cursor.read_exact(&mut buff)?;

        Ok(CInt::from_be_bytes(buff))
    }
}

impl FromCursor for CIntShort {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<CIntShort> {
        let mut buff = [0; SHORT_LEN];
        cursor.read_exact(&mut buff)?;

        Ok(CIntShort::from_be_bytes(buff))
    }
}

impl FromCursor for CLong {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<Self> {
        let mut buff = [0; LONG_LEN];
        cursor.read_exact(&mut buff)?;

        Ok(CLong::from_be_bytes(buff))
    }
}

impl FromCursor for Uuid {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<Self> {
        let mut buff = [0; UUID_LEN];
        cursor.read_exact(&mut buff)?;

        Ok(Uuid::from_bytes(buff))
    }
}

/// The `[inet]` notation: address length byte, address bytes and an `[int]` port.
impl Serialize for SocketAddr {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self.ip() {
            IpAddr::V4(v4) => {
                4u8.serialize(cursor, version);
                v4.octets().as_slice().serialize(cursor, version);
            }
            IpAddr::V6(v6) => {
                16u8.serialize(cursor, version);
                v6.octets().as_slice().serialize(cursor, version);
            }
        }

        CInt::from(self.port()).serialize(cursor, version);
    }
}

impl FromCursor for SocketAddr {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<SocketAddr> {
        let mut buff = [0];
        cursor.read_exact(&mut buff)?;

        let ip = decode_inet(cursor_next_value_ref(cursor, buff[0] as usize)?)?;
        let port = CInt::from_cursor(cursor, version)?;

        Ok(SocketAddr::new(ip, port as u16))
    }
}

/// Decodes an `inet` cell.
pub fn decode_inet(bytes: &[u8]) -> Result<IpAddr> {
    match bytes.len() {
        4 => Ok(IpAddr::V4(Ipv4Addr::new(
            bytes[0], bytes[1], bytes[2], bytes[3],
        ))),
        16 => {
            let octets: [u8; 16] = convert_to_array(bytes)?;
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        len => Err(Error::General(format!("Invalid inet length: {len}"))),
    }
}

/// Decodes a `uuid` or `timeuuid` cell.
pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(Into::into)
}

/// Decodes a `text`, `varchar` or `ascii` cell.
pub fn decode_text(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(Into::into)
}

pub fn cursor_next_value(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    cursor_next_value_ref(cursor, len).map(<[u8]>::to_vec)
}

pub fn cursor_next_value_ref<'a>(cursor: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8]> {
    let start = cursor.position() as usize;
    let data: &'a [u8] = cursor.get_ref();
    let result = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected {len} bytes at offset {start}"),
            ))
        })?;

    cursor.set_position((start + len) as u64);
    Ok(result)
}
