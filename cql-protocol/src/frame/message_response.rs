use std::io::Cursor;

use crate::error::{Error, Result};
use crate::frame::events::ServerEvent;
use crate::frame::message_auth::{BodyResAuthChallenge, BodyResAuthSuccess, BodyResAuthenticate};
use crate::frame::message_error::ErrorBody;
use crate::frame::message_result::ResResultBody;
use crate::frame::message_supported::BodyResSupported;
use crate::frame::{FromCursor, Opcode, Serialize, Version};

/// Any response the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Error(ErrorBody),
    Ready,
    Authenticate(BodyResAuthenticate),
    Supported(BodyResSupported),
    Result(ResResultBody),
    Event(ServerEvent),
    AuthChallenge(BodyResAuthChallenge),
    AuthSuccess(BodyResAuthSuccess),
}

impl ResponseBody {
    pub fn opcode(&self) -> Opcode {
        match self {
            ResponseBody::Error(_) => Opcode::Error,
            ResponseBody::Ready => Opcode::Ready,
            ResponseBody::Authenticate(_) => Opcode::Authenticate,
            ResponseBody::Supported(_) => Opcode::Supported,
            ResponseBody::Result(_) => Opcode::Result,
            ResponseBody::Event(_) => Opcode::Event,
            ResponseBody::AuthChallenge(_) => Opcode::AuthChallenge,
            ResponseBody::AuthSuccess(_) => Opcode::AuthSuccess,
        }
    }

    pub fn try_from(bytes: &[u8], response_type: Opcode, version: Version) -> Result<ResponseBody> {
        let mut cursor: Cursor<&[u8]> = Cursor::new(bytes);
        match response_type {
            Opcode::Error => ErrorBody::from_cursor(&mut cursor, version).map(ResponseBody::Error),
            Opcode::Ready => Ok(ResponseBody::Ready),
            Opcode::Authenticate => BodyResAuthenticate::from_cursor(&mut cursor, version)
                .map(ResponseBody::Authenticate),
            Opcode::Supported => {
                BodyResSupported::from_cursor(&mut cursor, version).map(ResponseBody::Supported)
            }
            Opcode::Result => {
                ResResultBody::from_cursor(&mut cursor, version).map(ResponseBody::Result)
            }
            Opcode::Event => ServerEvent::from_cursor(&mut cursor, version).map(ResponseBody::Event),
            Opcode::AuthChallenge => BodyResAuthChallenge::from_cursor(&mut cursor, version)
                .map(ResponseBody::AuthChallenge),
            Opcode::AuthSuccess => BodyResAuthSuccess::from_cursor(&mut cursor, version)
                .map(ResponseBody::AuthSuccess),
            _ => Err(Error::NonResponseOpcode(response_type)),
        }
    }

    pub fn into_error(self) -> Option<ErrorBody> {
        match self {
            ResponseBody::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<ResResultBody> {
        match self {
            ResponseBody::Result(result) => Some(result),
            _ => None,
        }
    }

    pub fn into_server_event(self) -> Option<ServerEvent> {
        match self {
            ResponseBody::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl Serialize for ResponseBody {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            ResponseBody::Error(body) => body.serialize(cursor, version),
            ResponseBody::Ready => {}
            ResponseBody::Authenticate(body) => body.serialize(cursor, version),
            ResponseBody::Supported(body) => body.serialize(cursor, version),
            ResponseBody::Result(body) => body.serialize(cursor, version),
            ResponseBody::Event(body) => body.serialize(cursor, version),
            ResponseBody::AuthChallenge(body) => body.serialize(cursor, version),
            ResponseBody::AuthSuccess(body) => body.serialize(cursor, version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::message_error::ErrorType;
    use crate::frame::Frame;
    use crate::compression::Compression;

    #[test]
    fn decode_ready_frame() {
        let frame = Frame::new_response(Version::V4, Opcode::Ready, 1, vec![]);
        assert_eq!(frame.response_body().unwrap(), ResponseBody::Ready);
    }

    #[test]
    fn decode_error_frame() {
        let body = ResponseBody::Error(ErrorBody::new(ErrorType::Overloaded, "busy"));
        let frame = Frame::new_response(
            Version::V3,
            body.opcode(),
            7,
            body.serialize_to_vec(Version::V3),
        );

        let encoded = frame.encode_with(Compression::None).unwrap();
        let decoded = Frame::decode(&encoded, Compression::None).unwrap();
        assert_eq!(decoded.response_body().unwrap(), body);
    }

    #[test]
    fn request_opcode_is_rejected() {
        assert!(matches!(
            ResponseBody::try_from(&[], Opcode::Query, Version::V4),
            Err(Error::NonResponseOpcode(Opcode::Query))
        ));
    }
}
