use std::io::Cursor;

use crate::error;
use crate::frame::events::SimpleServerEvent;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{from_cursor_string_list, serialize_str_list};

/// The structure which represents a body of a frame of type `register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyReqRegister {
    pub events: Vec<SimpleServerEvent>,
}

impl Serialize for BodyReqRegister {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        let events = self.events.iter().map(SimpleServerEvent::as_str);
        serialize_str_list(cursor, events, version);
    }
}

impl FromCursor for BodyReqRegister {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        let events = from_cursor_string_list(cursor)?
            .iter()
            .map(|event| SimpleServerEvent::try_from(event.as_str()))
            .collect::<error::Result<Vec<_>>>()?;

        Ok(BodyReqRegister { events })
    }
}
