//! SASL exchange bodies. The server opens with `AUTHENTICATE`, then client `AUTH_RESPONSE` and
//! server `AUTH_CHALLENGE` tokens alternate until `AUTH_SUCCESS`.
use std::io::Cursor;

use crate::error::Result;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_str, serialize_str, CBytes};

/// Names the server-side authenticator class the client must satisfy.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BodyResAuthenticate {
    pub authenticator: String,
}

impl BodyResAuthenticate {
    pub fn new(authenticator: String) -> Self {
        BodyResAuthenticate { authenticator }
    }
}

impl Serialize for BodyResAuthenticate {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str(cursor, &self.authenticator, version);
    }
}

impl FromCursor for BodyResAuthenticate {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<Self> {
        from_cursor_str(cursor).map(|name| BodyResAuthenticate::new(name.to_string()))
    }
}

// the remaining bodies are a single `[bytes]` token, opaque to the protocol layer
macro_rules! token_body {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq, Clone)]
        pub struct $name {
            pub token: CBytes,
        }

        impl $name {
            pub fn new(token: CBytes) -> Self {
                $name { token }
            }
        }

        impl Serialize for $name {
            #[inline]
            fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
                self.token.serialize(cursor, version);
            }
        }

        impl FromCursor for $name {
            fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Self> {
                CBytes::from_cursor(cursor, version).map($name::new)
            }
        }
    };
}

token_body!(
    /// Server token to feed back into the authenticator.
    BodyResAuthChallenge
);
token_body!(
    /// Client token answering `AUTHENTICATE` or a challenge.
    BodyReqAuthResponse
);
token_body!(
    /// Final server token; may be null.
    BodyResAuthSuccess
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_read_authenticator_name() {
        let bytes = [0, 5, b'a', b'b', b'c', b'd', b'e'];
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let body = BodyResAuthenticate::from_cursor(&mut cursor, Version::V4).unwrap();
        assert_eq!(body.authenticator, "abcde");
    }

    #[test]
    fn should_write_response_token_with_length() {
        let body = BodyReqAuthResponse::new(CBytes::new(vec![0, 1, 2]));
        assert_eq!(body.serialize_to_vec(Version::V4), vec![0, 0, 0, 3, 0, 1, 2]);
    }

    #[test]
    fn should_accept_null_success_token() {
        let bytes = [255, 255, 255, 255];
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let body = BodyResAuthSuccess::from_cursor(&mut cursor, Version::V4).unwrap();
        assert!(body.token.is_null());
    }

    #[test]
    fn should_read_challenge_token() {
        let bytes = [0, 0, 0, 2, 7, 8];
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let body = BodyResAuthChallenge::from_cursor(&mut cursor, Version::V4).unwrap();
        assert_eq!(body.token.as_slice(), Some(&[7u8, 8][..]));
    }
}
