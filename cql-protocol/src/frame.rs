//! Native protocol frames: header layout per protocol version, flags, opcodes and the body
//! preamble (tracing id, warnings, custom payload) that precedes the actual message.
use bitflags::bitflags;
use bytemuck::NoUninit;
use derive_more::Display;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::Cursor;
use uuid::Uuid;

use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::frame::message_auth::BodyReqAuthResponse;
use crate::frame::message_batch::BodyReqBatch;
use crate::frame::message_execute::BodyReqExecute;
use crate::frame::message_prepare::BodyReqPrepare;
use crate::frame::message_query::BodyReqQuery;
use crate::frame::message_register::BodyReqRegister;
use crate::frame::message_response::ResponseBody;
use crate::frame::message_startup::BodyReqStartup;
use crate::types::*;

pub mod events;
pub mod message_auth;
pub mod message_batch;
pub mod message_error;
pub mod message_execute;
pub mod message_prepare;
pub mod message_query;
pub mod message_register;
pub mod message_response;
pub mod message_result;
pub mod message_startup;
pub mod message_supported;
pub mod traits;

pub use traits::*;

/// Stream id of a frame. Negative ids are reserved for server-initiated events.
pub type StreamId = i16;

/// Stream id the server uses for pushed events.
pub const EVENT_STREAM_ID: StreamId = -1;

/// Largest body the protocol accepts (256MB).
pub const MAX_FRAME_BODY_LEN: usize = 256 * 1024 * 1024;

const DIRECTION_MASK: u8 = 0x80;
const VERSION_MASK: u8 = 0x7f;

/// Protocol version.
#[derive(
    Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, NoUninit,
)]
#[repr(u8)]
pub enum Version {
    #[display("v2")]
    V2 = 2,
    #[display("v3")]
    V3 = 3,
    #[default]
    #[display("v4")]
    V4 = 4,
}

impl Version {
    pub const LOWEST: Version = Version::V2;
    pub const HIGHEST: Version = Version::V4;

    /// Number of concurrent request streams a single connection can carry.
    #[inline]
    pub fn max_streams(self) -> usize {
        match self {
            Version::V2 => 128,
            Version::V3 | Version::V4 => 32768,
        }
    }

    /// Size of the frame header in bytes.
    #[inline]
    pub fn header_len(self) -> usize {
        match self {
            Version::V2 => 8,
            Version::V3 | Version::V4 => 9,
        }
    }

    /// The version to try next when the server rejects this one.
    pub fn lower(self) -> Option<Version> {
        match self {
            Version::V2 => None,
            Version::V3 => Some(Version::V2),
            Version::V4 => Some(Version::V3),
        }
    }
}

impl From<Version> for u8 {
    fn from(value: Version) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for Version {
    type Error = Error;

    fn try_from(version: u8) -> Result<Self> {
        match version & VERSION_MASK {
            2 => Ok(Version::V2),
            3 => Ok(Version::V3),
            4 => Ok(Version::V4),
            v => Err(Error::UnsupportedVersion(v)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        if value & DIRECTION_MASK == 0 {
            Direction::Request
        } else {
            Direction::Response
        }
    }
}

bitflags! {
    /// Frame header flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        const COMPRESSION = 0x01;
        const TRACING = 0x02;
        const CUSTOM_PAYLOAD = 0x04;
        const WARNING = 0x08;
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    Error,
    Startup,
    Ready,
    Authenticate,
    Options,
    Supported,
    Query,
    Result,
    Prepare,
    Execute,
    Register,
    Event,
    Batch,
    AuthChallenge,
    AuthResponse,
    AuthSuccess,
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Error => 0x00,
            Opcode::Startup => 0x01,
            Opcode::Ready => 0x02,
            Opcode::Authenticate => 0x03,
            Opcode::Options => 0x05,
            Opcode::Supported => 0x06,
            Opcode::Query => 0x07,
            Opcode::Result => 0x08,
            Opcode::Prepare => 0x09,
            Opcode::Execute => 0x0A,
            Opcode::Register => 0x0B,
            Opcode::Event => 0x0C,
            Opcode::Batch => 0x0D,
            Opcode::AuthChallenge => 0x0E,
            Opcode::AuthResponse => 0x0F,
            Opcode::AuthSuccess => 0x10,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Opcode::Error),
            0x01 => Ok(Opcode::Startup),
            0x02 => Ok(Opcode::Ready),
            0x03 => Ok(Opcode::Authenticate),
            0x05 => Ok(Opcode::Options),
            0x06 => Ok(Opcode::Supported),
            0x07 => Ok(Opcode::Query),
            0x08 => Ok(Opcode::Result),
            0x09 => Ok(Opcode::Prepare),
            0x0A => Ok(Opcode::Execute),
            0x0B => Ok(Opcode::Register),
            0x0C => Ok(Opcode::Event),
            0x0D => Ok(Opcode::Batch),
            0x0E => Ok(Opcode::AuthChallenge),
            0x0F => Ok(Opcode::AuthResponse),
            0x10 => Ok(Opcode::AuthSuccess),
            _ => Err(Error::UnknownOpcode(value)),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: Version,
    pub direction: Direction,
    pub flags: Flags,
    pub stream_id: StreamId,
    pub opcode: Opcode,
    pub body_len: usize,
}

impl FrameHeader {
    /// Decodes a header. `bytes` must hold at least `version.header_len()` bytes, where the
    /// version is taken from the first byte.
    pub fn decode(bytes: &[u8]) -> Result<FrameHeader> {
        let first = *bytes
            .first()
            .ok_or_else(|| Error::General("Empty frame header".into()))?;
        let version = Version::try_from(first)?;
        let direction = Direction::from(first);

        if bytes.len() < version.header_len() {
            return Err(Error::General(format!(
                "Frame header too short: {} bytes",
                bytes.len()
            )));
        }

        let flags = Flags::from_bits_truncate(bytes[1]);
        let (stream_id, rest) = match version {
            Version::V2 => (bytes[2] as i8 as StreamId, &bytes[3..]),
            Version::V3 | Version::V4 => (try_i16_from_bytes(&bytes[2..])?, &bytes[4..]),
        };

        let opcode = Opcode::try_from(rest[0])?;
        let body_len = try_i32_from_bytes(&rest[1..])?;
        if body_len < 0 {
            return Err(Error::General(format!("Negative body length: {body_len}")));
        }

        let body_len = body_len as usize;
        if body_len > MAX_FRAME_BODY_LEN {
            return Err(Error::FrameTooLarge(body_len));
        }

        Ok(FrameHeader {
            version,
            direction,
            flags,
            stream_id,
            opcode,
            body_len,
        })
    }
}

/// A single protocol frame with its body already decompressed and stripped of the preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: Version,
    pub direction: Direction,
    pub flags: Flags,
    pub opcode: Opcode,
    pub stream_id: StreamId,
    pub body: Vec<u8>,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: HashMap<String, Vec<u8>>,
}

impl Frame {
    pub fn new(
        version: Version,
        direction: Direction,
        flags: Flags,
        opcode: Opcode,
        stream_id: StreamId,
        body: Vec<u8>,
    ) -> Self {
        Frame {
            version,
            direction,
            flags,
            opcode,
            stream_id,
            body,
            tracing_id: None,
            warnings: vec![],
            custom_payload: HashMap::new(),
        }
    }

    /// Request frame with stream id 0; the transport assigns the real id.
    #[inline]
    pub fn new_request(version: Version, opcode: Opcode, flags: Flags, body: Vec<u8>) -> Self {
        Self::new(version, Direction::Request, flags, opcode, 0, body)
    }

    #[inline]
    pub fn new_response(version: Version, opcode: Opcode, stream_id: StreamId, body: Vec<u8>) -> Self {
        Self::new(
            version,
            Direction::Response,
            Flags::empty(),
            opcode,
            stream_id,
            body,
        )
    }

    pub fn new_req_options(version: Version) -> Frame {
        Self::new_request(version, Opcode::Options, Flags::empty(), vec![])
    }

    pub fn new_req_startup(compression: Compression, version: Version) -> Frame {
        let body = BodyReqStartup::new(compression);
        Self::new_request(
            version,
            Opcode::Startup,
            Flags::empty(),
            body.serialize_to_vec(version),
        )
    }

    pub fn new_req_query(query: &BodyReqQuery, flags: Flags, version: Version) -> Frame {
        Self::new_request(version, Opcode::Query, flags, query.serialize_to_vec(version))
    }

    pub fn new_req_prepare(query: &str, flags: Flags, version: Version) -> Frame {
        let body = BodyReqPrepare::new(query);
        Self::new_request(version, Opcode::Prepare, flags, body.serialize_to_vec(version))
    }

    pub fn new_req_execute(body: &BodyReqExecute, flags: Flags, version: Version) -> Frame {
        Self::new_request(version, Opcode::Execute, flags, body.serialize_to_vec(version))
    }

    pub fn new_req_batch(body: &BodyReqBatch, flags: Flags, version: Version) -> Frame {
        Self::new_request(version, Opcode::Batch, flags, body.serialize_to_vec(version))
    }

    pub fn new_req_register(body: &BodyReqRegister, version: Version) -> Frame {
        Self::new_request(
            version,
            Opcode::Register,
            Flags::empty(),
            body.serialize_to_vec(version),
        )
    }

    pub fn new_req_auth_response(token: Vec<u8>, version: Version) -> Frame {
        let body = BodyReqAuthResponse::new(CBytes::new(token));
        Self::new_request(
            version,
            Opcode::AuthResponse,
            Flags::empty(),
            body.serialize_to_vec(version),
        )
    }

    /// Attaches a custom payload. Only sent with protocol v4.
    pub fn with_custom_payload(mut self, custom_payload: HashMap<String, Vec<u8>>) -> Self {
        self.custom_payload = custom_payload;
        self
    }

    /// Decodes the body into a response message.
    #[inline]
    pub fn response_body(&self) -> Result<ResponseBody> {
        ResponseBody::try_from(self.body.as_slice(), self.opcode, self.version)
    }

    /// Encodes the whole frame: header, preamble and body, compressed if requested. STARTUP and
    /// empty bodies are never compressed.
    pub fn encode_with(&self, compression: Compression) -> Result<Vec<u8>> {
        let mut flags = self.flags - Flags::COMPRESSION - Flags::CUSTOM_PAYLOAD;
        let mut body = Vec::with_capacity(self.body.len());

        {
            let mut cursor = Cursor::new(&mut body);

            if self.direction == Direction::Response {
                if let Some(tracing_id) = self.tracing_id {
                    flags.insert(Flags::TRACING);
                    tracing_id.into_bytes().serialize(&mut cursor, self.version);
                }

                if !self.warnings.is_empty() && self.version >= Version::V4 {
                    flags.insert(Flags::WARNING);
                    serialize_str_list(
                        &mut cursor,
                        self.warnings.iter().map(String::as_str),
                        self.version,
                    );
                }
            }

            if !self.custom_payload.is_empty() && self.version >= Version::V4 {
                flags.insert(Flags::CUSTOM_PAYLOAD);
                serialize_bytes_map(&mut cursor, &self.custom_payload, self.version);
            }

            self.body.as_slice().serialize(&mut cursor, self.version);
        }

        if compression.is_compressed() && !body.is_empty() && self.opcode != Opcode::Startup {
            body = compression.encode(&body)?;
            flags.insert(Flags::COMPRESSION);
        }

        if body.len() > MAX_FRAME_BODY_LEN {
            return Err(Error::FrameTooLarge(body.len()));
        }

        let mut buffer = Vec::with_capacity(self.version.header_len() + body.len());
        let version_byte = match self.direction {
            Direction::Request => u8::from(self.version),
            Direction::Response => u8::from(self.version) | DIRECTION_MASK,
        };

        buffer.push(version_byte);
        buffer.push(flags.bits());

        match self.version {
            Version::V2 => buffer.push(self.stream_id as i8 as u8),
            Version::V3 | Version::V4 => buffer.extend_from_slice(&self.stream_id.to_be_bytes()),
        }

        buffer.push(self.opcode.into());
        buffer.extend_from_slice(&(body.len() as CInt).to_be_bytes());
        buffer.extend_from_slice(&body);

        Ok(buffer)
    }

    /// Builds a frame from a decoded header and its raw body: decompresses and strips the
    /// tracing id, warnings and custom payload.
    pub fn from_parts(header: FrameHeader, body: Vec<u8>, compression: Compression) -> Result<Frame> {
        let body = if header.flags.contains(Flags::COMPRESSION) {
            if !compression.is_compressed() {
                return Err(Error::General(
                    "Received a compressed frame without negotiated compression".into(),
                ));
            }

            compression.decode(body)?
        } else {
            body
        };

        let mut cursor: Cursor<&[u8]> = Cursor::new(&body);
        let mut tracing_id = None;
        let mut warnings = vec![];
        let mut custom_payload = HashMap::new();

        if header.direction == Direction::Response && header.flags.contains(Flags::TRACING) {
            tracing_id = Some(Uuid::from_cursor(&mut cursor, header.version)?);
        }

        if header.direction == Direction::Response && header.flags.contains(Flags::WARNING) {
            warnings = from_cursor_string_list(&mut cursor)?;
        }

        if header.flags.contains(Flags::CUSTOM_PAYLOAD) {
            custom_payload = from_cursor_bytes_map(&mut cursor)?;
        }

        let body = body[cursor.position() as usize..].to_vec();

        Ok(Frame {
            version: header.version,
            direction: header.direction,
            flags: header.flags - Flags::COMPRESSION,
            opcode: header.opcode,
            stream_id: header.stream_id,
            body,
            tracing_id,
            warnings,
            custom_payload,
        })
    }

    /// Decodes a complete frame held in a single buffer.
    pub fn decode(bytes: &[u8], compression: Compression) -> Result<Frame> {
        let header = FrameHeader::decode(bytes)?;
        let start = header.version.header_len();
        let body = bytes
            .get(start..start + header.body_len)
            .ok_or_else(|| Error::General("Incomplete frame body".into()))?;

        Self::from_parts(header, body.to_vec(), compression)
    }
}
