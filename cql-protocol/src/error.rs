//! Encoding and decoding failures.
//!
//! A server `ERROR` response is a successfully decoded body, so it never shows up here; the
//! driver interprets those.
use std::io;
use std::result;
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use thiserror::Error as ThisError;
use uuid::Error as UuidError;

use crate::compression::CompressionError;
use crate::frame::Opcode;
use crate::types::{CInt, CIntShort};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    // framing
    #[error("protocol version {0} is not supported")]
    UnsupportedVersion(u8),
    #[error("opcode {0:#04x} is not defined by the protocol")]
    UnknownOpcode(u8),
    #[error("{0} frames are requests and can't be decoded as responses")]
    NonResponseOpcode(Opcode),
    #[error("frame body of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Compression(#[from] CompressionError),

    // malformed values; a truncated body surfaces as `UnexpectedEof`
    #[error("failed to read frame body: {0}")]
    Io(#[from] io::Error),
    #[error("string is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),
    #[error("string is not valid UTF-8: {0}")]
    FromUtf8(#[from] FromUtf8Error),
    #[error("invalid uuid: {0}")]
    UuidParse(#[from] UuidError),

    // codes and names outside the known sets
    #[error("no consistency level has code {0}")]
    UnknownConsistency(CIntShort),
    #[error("no error has code {0:#06x}")]
    UnexpectedErrorCode(CInt),
    #[error("no result kind has code {0}")]
    UnexpectedResultKind(CInt),
    #[error("no column type has code {0:#06x}")]
    UnexpectedColumnType(CIntShort),
    #[error("no write type is named {0}")]
    UnexpectedWriteType(String),
    #[error("no server event is named {0}")]
    UnknownServerEvent(String),
    #[error("no topology change is named {0}")]
    UnexpectedTopologyChangeType(String),
    #[error("no status change is named {0}")]
    UnexpectedStatusChangeType(String),
    #[error("no schema change is named {0}")]
    UnexpectedSchemaChangeType(String),
    #[error("no schema change target is named {0}")]
    UnexpectedSchemaChangeTarget(String),

    #[error("{0}")]
    General(String),
}

impl From<String> for Error {
    fn from(message: String) -> Error {
        Error::General(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Error {
        Error::General(message.to_string())
    }
}

// io::Error can't be cloned; the copy keeps its kind and message
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::UnsupportedVersion(version) => Error::UnsupportedVersion(*version),
            Error::UnknownOpcode(opcode) => Error::UnknownOpcode(*opcode),
            Error::NonResponseOpcode(opcode) => Error::NonResponseOpcode(*opcode),
            Error::FrameTooLarge(length) => Error::FrameTooLarge(*length),
            Error::Compression(error) => Error::Compression(error.clone()),
            Error::Io(error) => Error::Io(io::Error::new(error.kind(), error.to_string())),
            Error::Utf8(error) => Error::Utf8(*error),
            Error::FromUtf8(error) => Error::FromUtf8(error.clone()),
            Error::UuidParse(error) => Error::UuidParse(error.clone()),
            Error::UnknownConsistency(code) => Error::UnknownConsistency(*code),
            Error::UnexpectedErrorCode(code) => Error::UnexpectedErrorCode(*code),
            Error::UnexpectedResultKind(code) => Error::UnexpectedResultKind(*code),
            Error::UnexpectedColumnType(code) => Error::UnexpectedColumnType(*code),
            Error::UnexpectedWriteType(name) => Error::UnexpectedWriteType(name.clone()),
            Error::UnknownServerEvent(name) => Error::UnknownServerEvent(name.clone()),
            Error::UnexpectedTopologyChangeType(name) => {
                Error::UnexpectedTopologyChangeType(name.clone())
            }
            Error::UnexpectedStatusChangeType(name) => {
                Error::UnexpectedStatusChangeType(name.clone())
            }
            Error::UnexpectedSchemaChangeType(name) => {
                Error::UnexpectedSchemaChangeType(name.clone())
            }
            Error::UnexpectedSchemaChangeTarget(name) => {
                Error::UnexpectedSchemaChangeTarget(name.clone())
            }
            Error::General(message) => Error::General(message.clone()),
        }
    }
}
