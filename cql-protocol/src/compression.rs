//! Frame body compression, as described in the protocol's "Compression" section.
//!
//! The algorithm is agreed upon in the STARTUP message, so a STARTUP frame is never compressed.
//! Once the server has received it, every frame with a non-empty body may be compressed,
//! including the server's response to STARTUP.
use bytemuck::NoUninit;
use derive_more::Display;
use snap::raw::{Decoder, Encoder};
use std::convert::TryInto;
use std::result;
use thiserror::Error as ThisError;

type Result<T> = result::Result<T, CompressionError>;

pub const LZ4: &str = "lz4";
pub const SNAPPY: &str = "snappy";

/// Failure to compress or decompress a single frame body. It concerns only the frame it was
/// raised for - the connection itself stays usable.
#[derive(Debug, Clone, ThisError)]
pub enum CompressionError {
    #[error("Snappy error: {0}")]
    Snappy(#[from] snap::Error),
    #[error("Lz4 error: {0}")]
    Lz4(String),
}

/// Type of compression. Only non-startup frame bodies can be compressed.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Ord, PartialOrd, Hash, Display, Default, NoUninit)]
#[repr(u8)]
pub enum Compression {
    /// [lz4](https://github.com/lz4/lz4) compression, body prefixed with its uncompressed length
    Lz4,
    /// [snappy](https://github.com/google/snappy) compression
    Snappy,
    /// No compression
    #[default]
    None,
}

impl Compression {
    /// Encodes `bytes` with this compression.
    ///
    /// ```
    /// use cql_protocol::compression::Compression;
    ///
    /// let bytes = b"Hello World".to_vec();
    /// let encoded = Compression::Snappy.encode(&bytes).unwrap();
    /// assert_eq!(Compression::Snappy.decode(encoded).unwrap(), bytes);
    /// ```
    pub fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Compression::Lz4 => Compression::encode_lz4(bytes),
            Compression::Snappy => Compression::encode_snappy(bytes),
            Compression::None => Ok(bytes.into()),
        }
    }

    /// Checks if current compression actually compresses data.
    #[inline]
    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    /// Decodes `bytes` with this compression.
    pub fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        match *self {
            Compression::Lz4 => Compression::decode_lz4(bytes),
            Compression::Snappy => Compression::decode_snappy(bytes),
            Compression::None => Ok(bytes),
        }
    }

    /// Name used in the STARTUP options and SUPPORTED response.
    pub fn as_str(&self) -> Option<&'static str> {
        match *self {
            Compression::Lz4 => Some(LZ4),
            Compression::Snappy => Some(SNAPPY),
            Compression::None => None,
        }
    }

    /// Picks `self` if the server advertises it among `supported`, otherwise no compression.
    pub fn negotiate<S: AsRef<str>>(self, supported: &[S]) -> Compression {
        match self.as_str() {
            Some(name) if supported.iter().any(|option| option.as_ref() == name) => self,
            _ => Compression::None,
        }
    }

    fn encode_snappy(bytes: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = Encoder::new();
        encoder.compress_vec(bytes).map_err(Into::into)
    }

    fn decode_snappy(bytes: Vec<u8>) -> Result<Vec<u8>> {
        let mut decoder = Decoder::new();
        decoder
            .decompress_vec(bytes.as_slice())
            .map_err(Into::into)
    }

    fn encode_lz4(bytes: &[u8]) -> Result<Vec<u8>> {
        let len = 4 + lz4_flex::block::get_maximum_output_size(bytes.len());
        if len > i32::MAX as usize {
            return Err(CompressionError::Lz4(format!(
                "Body too large to compress: {} bytes",
                bytes.len()
            )));
        }

        let mut result = vec![0; len];

        let len = bytes.len() as i32;
        result[..4].copy_from_slice(&len.to_be_bytes());

        let compressed_len = lz4_flex::compress_into(bytes, &mut result[4..])
            .map_err(|error| CompressionError::Lz4(error.to_string()))?;

        result.truncate(4 + compressed_len);
        Ok(result)
    }

    fn decode_lz4(bytes: Vec<u8>) -> Result<Vec<u8>> {
        if bytes.len() < 4 {
            return Err(CompressionError::Lz4(format!(
                "Compressed body too short: {} bytes",
                bytes.len()
            )));
        }

        let uncompressed_size = i32::from_be_bytes(
            bytes[..4]
                .try_into()
                .map_err(|error: std::array::TryFromSliceError| {
                    CompressionError::Lz4(error.to_string())
                })?,
        );
        if uncompressed_size < 0 {
            return Err(CompressionError::Lz4(format!(
                "Invalid uncompressed size: {uncompressed_size}"
            )));
        }

        lz4_flex::decompress(&bytes[4..], uncompressed_size as usize)
            .map_err(|error| CompressionError::Lz4(error.to_string()))
    }
}

impl From<String> for Compression {
    /// Converts a name into `Compression`. Unknown names map to `Compression::None`.
    fn from(compression_string: String) -> Compression {
        Compression::from(compression_string.as_str())
    }
}

impl<'a> From<&'a str> for Compression {
    /// Converts a name into `Compression`. Unknown names map to `Compression::None`.
    fn from(compression_str: &'a str) -> Compression {
        match compression_str {
            LZ4 => Compression::Lz4,
            SNAPPY => Compression::Snappy,
            _ => Compression::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_str() {
        assert_eq!(Compression::from("lz4"), Compression::Lz4);
        assert_eq!(Compression::from("snappy"), Compression::Snappy);
        assert_eq!(Compression::from("x"), Compression::None);
        assert_eq!(Compression::from("lz4".to_string()), Compression::Lz4);
    }

    #[test]
    fn test_compression_decode_snappy() {
        let snappy_compression = Compression::Snappy;
        let bytes = String::from("Hello World").into_bytes().to_vec();
        let encoded = snappy_compression.encode(&bytes).unwrap();
        assert_eq!(snappy_compression.decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn test_compression_decode_lz4() {
        let lz4_compression = Compression::Lz4;
        let bytes = String::from("Hello World").into_bytes().to_vec();
        let encoded = lz4_compression.encode(&bytes).unwrap();
        assert_eq!(&encoded[..4], &[0, 0, 0, 11]);
        assert_eq!(lz4_compression.decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn test_compression_decode_corrupted_body() {
        assert!(Compression::Lz4.decode(vec![0, 0]).is_err());
        assert!(Compression::Lz4.decode(vec![0, 0, 0, 32, 255, 1]).is_err());
        assert!(Compression::Snappy.decode(vec![255, 255, 255, 255]).is_err());
    }

    #[test]
    fn test_compression_negotiate() {
        let supported = vec!["snappy".to_string()];
        assert_eq!(
            Compression::Snappy.negotiate(&supported),
            Compression::Snappy
        );
        assert_eq!(Compression::Lz4.negotiate(&supported), Compression::None);
        assert_eq!(Compression::None.negotiate(&supported), Compression::None);
    }
}
