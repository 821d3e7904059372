use derive_more::Display;
use std::io::Cursor;
use std::net::SocketAddr;

use crate::error;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::{
    from_cursor_str, from_cursor_string_list, serialize_str, serialize_str_list,
};

// [string] names used on the wire
const TOPOLOGY_CHANGE: &str = "TOPOLOGY_CHANGE";
const STATUS_CHANGE: &str = "STATUS_CHANGE";
const SCHEMA_CHANGE: &str = "SCHEMA_CHANGE";

const NEW_NODE: &str = "NEW_NODE";
const REMOVED_NODE: &str = "REMOVED_NODE";
const MOVED_NODE: &str = "MOVED_NODE";

const UP: &str = "UP";
const DOWN: &str = "DOWN";

const CREATED: &str = "CREATED";
const UPDATED: &str = "UPDATED";
const DROPPED: &str = "DROPPED";

const KEYSPACE: &str = "KEYSPACE";
const TABLE: &str = "TABLE";
const TYPE: &str = "TYPE";
const FUNCTION: &str = "FUNCTION";
const AGGREGATE: &str = "AGGREGATE";

/// Event type without the details of a concrete change. Used when registering for events.
#[derive(Debug, Display, PartialEq, Copy, Clone, Ord, PartialOrd, Eq, Hash)]
pub enum SimpleServerEvent {
    #[display("TOPOLOGY_CHANGE")]
    TopologyChange,
    #[display("STATUS_CHANGE")]
    StatusChange,
    #[display("SCHEMA_CHANGE")]
    SchemaChange,
}

impl SimpleServerEvent {
    pub fn as_str(&self) -> &'static str {
        match *self {
            SimpleServerEvent::TopologyChange => TOPOLOGY_CHANGE,
            SimpleServerEvent::StatusChange => STATUS_CHANGE,
            SimpleServerEvent::SchemaChange => SCHEMA_CHANGE,
        }
    }
}

impl<'a> From<&'a ServerEvent> for SimpleServerEvent {
    fn from(event: &'a ServerEvent) -> SimpleServerEvent {
        match event {
            ServerEvent::TopologyChange(_) => SimpleServerEvent::TopologyChange,
            ServerEvent::StatusChange(_) => SimpleServerEvent::StatusChange,
            ServerEvent::SchemaChange(_) => SimpleServerEvent::SchemaChange,
        }
    }
}

impl TryFrom<&str> for SimpleServerEvent {
    type Error = error::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            TOPOLOGY_CHANGE => Ok(SimpleServerEvent::TopologyChange),
            STATUS_CHANGE => Ok(SimpleServerEvent::StatusChange),
            SCHEMA_CHANGE => Ok(SimpleServerEvent::SchemaChange),
            _ => Err(error::Error::UnknownServerEvent(value.into())),
        }
    }
}

/// Event pushed by the server on the stream reserved for events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    /// A node joined, left or moved in the token ring.
    TopologyChange(TopologyChange),
    /// A node was marked up or down.
    StatusChange(StatusChange),
    /// A keyspace, table, type, function or aggregate was created, updated or dropped.
    SchemaChange(SchemaChange),
}

impl Serialize for ServerEvent {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match &self {
            ServerEvent::TopologyChange(t) => {
                serialize_str(cursor, TOPOLOGY_CHANGE, version);
                t.serialize(cursor, version);
            }
            ServerEvent::StatusChange(s) => {
                serialize_str(cursor, STATUS_CHANGE, version);
                s.serialize(cursor, version);
            }
            ServerEvent::SchemaChange(s) => {
                serialize_str(cursor, SCHEMA_CHANGE, version);
                s.serialize(cursor, version);
            }
        }
    }
}

impl FromCursor for ServerEvent {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> error::Result<ServerEvent> {
        match from_cursor_str(cursor)? {
            TOPOLOGY_CHANGE => Ok(ServerEvent::TopologyChange(TopologyChange::from_cursor(
                cursor, version,
            )?)),
            STATUS_CHANGE => Ok(ServerEvent::StatusChange(StatusChange::from_cursor(
                cursor, version,
            )?)),
            SCHEMA_CHANGE => Ok(ServerEvent::SchemaChange(SchemaChange::from_cursor(
                cursor, version,
            )?)),
            event => Err(error::Error::UnknownServerEvent(event.into())),
        }
    }
}

/// A node joined, left or moved in the token ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyChange {
    pub change_type: TopologyChangeType,
    pub addr: SocketAddr,
}

impl Serialize for TopologyChange {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.change_type.serialize(cursor, version);
        self.addr.serialize(cursor, version);
    }
}

impl FromCursor for TopologyChange {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> error::Result<TopologyChange> {
        let change_type = TopologyChangeType::from_cursor(cursor, version)?;
        let addr = SocketAddr::from_cursor(cursor, version)?;

        Ok(TopologyChange { change_type, addr })
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyChangeType {
    NewNode,
    RemovedNode,
    MovedNode,
}

impl Serialize for TopologyChangeType {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            TopologyChangeType::NewNode => serialize_str(cursor, NEW_NODE, version),
            TopologyChangeType::RemovedNode => serialize_str(cursor, REMOVED_NODE, version),
            TopologyChangeType::MovedNode => serialize_str(cursor, MOVED_NODE, version),
        }
    }
}

impl FromCursor for TopologyChangeType {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        match from_cursor_str(cursor)? {
            NEW_NODE => Ok(TopologyChangeType::NewNode),
            REMOVED_NODE => Ok(TopologyChangeType::RemovedNode),
            MOVED_NODE => Ok(TopologyChangeType::MovedNode),
            tc => Err(error::Error::UnexpectedTopologyChangeType(tc.into())),
        }
    }
}

/// A node was marked up or down.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusChange {
    pub change_type: StatusChangeType,
    pub addr: SocketAddr,
}

impl Serialize for StatusChange {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.change_type.serialize(cursor, version);
        self.addr.serialize(cursor, version);
    }
}

impl FromCursor for StatusChange {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> error::Result<StatusChange> {
        let change_type = StatusChangeType::from_cursor(cursor, version)?;
        let addr = SocketAddr::from_cursor(cursor, version)?;

        Ok(StatusChange { change_type, addr })
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusChangeType {
    Up,
    Down,
}

impl Serialize for StatusChangeType {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            StatusChangeType::Up => serialize_str(cursor, UP, version),
            StatusChangeType::Down => serialize_str(cursor, DOWN, version),
        }
    }
}

impl FromCursor for StatusChangeType {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        match from_cursor_str(cursor)? {
            UP => Ok(StatusChangeType::Up),
            DOWN => Ok(StatusChangeType::Down),
            sc => Err(error::Error::UnexpectedStatusChangeType(sc.into())),
        }
    }
}

/// A keyspace, table, type, function or aggregate was created, updated or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaChange {
    pub change_type: SchemaChangeType,
    pub target: SchemaChangeTarget,
    pub keyspace: String,
    /// Table, type, function or aggregate name; empty for keyspace changes.
    pub name: String,
    /// Argument types of a changed function or aggregate.
    pub arguments: Vec<String>,
}

impl Serialize for SchemaChange {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.change_type.serialize(cursor, version);

        if version == Version::V2 {
            serialize_str(cursor, &self.keyspace, version);
            serialize_str(cursor, &self.name, version);
            return;
        }

        self.target.serialize(cursor, version);
        serialize_str(cursor, &self.keyspace, version);

        match self.target {
            SchemaChangeTarget::Keyspace => {}
            SchemaChangeTarget::Table | SchemaChangeTarget::Type => {
                serialize_str(cursor, &self.name, version);
            }
            SchemaChangeTarget::Function | SchemaChangeTarget::Aggregate => {
                serialize_str(cursor, &self.name, version);
                serialize_str_list(cursor, self.arguments.iter().map(String::as_str), version);
            }
        }
    }
}

impl FromCursor for SchemaChange {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> error::Result<SchemaChange> {
        let change_type = SchemaChangeType::from_cursor(cursor, version)?;

        // v2 only carries the keyspace and an optional table name
        if version == Version::V2 {
            let keyspace = from_cursor_str(cursor)?.to_string();
            let name = from_cursor_str(cursor)?.to_string();
            let target = if name.is_empty() {
                SchemaChangeTarget::Keyspace
            } else {
                SchemaChangeTarget::Table
            };

            return Ok(SchemaChange {
                change_type,
                target,
                keyspace,
                name,
                arguments: vec![],
            });
        }

        let target = SchemaChangeTarget::from_cursor(cursor, version)?;
        let keyspace = from_cursor_str(cursor)?.to_string();
        let (name, arguments) = match target {
            SchemaChangeTarget::Keyspace => (String::new(), vec![]),
            SchemaChangeTarget::Table | SchemaChangeTarget::Type => {
                (from_cursor_str(cursor)?.to_string(), vec![])
            }
            SchemaChangeTarget::Function | SchemaChangeTarget::Aggregate => {
                let name = from_cursor_str(cursor)?.to_string();
                (name, from_cursor_string_list(cursor)?)
            }
        };

        Ok(SchemaChange {
            change_type,
            target,
            keyspace,
            name,
            arguments,
        })
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

impl Serialize for SchemaChangeType {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            SchemaChangeType::Created => serialize_str(cursor, CREATED, version),
            SchemaChangeType::Updated => serialize_str(cursor, UPDATED, version),
            SchemaChangeType::Dropped => serialize_str(cursor, DROPPED, version),
        }
    }
}

impl FromCursor for SchemaChangeType {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        match from_cursor_str(cursor)? {
            CREATED => Ok(SchemaChangeType::Created),
            UPDATED => Ok(SchemaChangeType::Updated),
            DROPPED => Ok(SchemaChangeType::Dropped),
            sc => Err(error::Error::UnexpectedSchemaChangeType(sc.into())),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaChangeTarget {
    Keyspace,
    Table,
    Type,
    Function,
    Aggregate,
}

impl Serialize for SchemaChangeTarget {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        let target = match self {
            SchemaChangeTarget::Keyspace => KEYSPACE,
            SchemaChangeTarget::Table => TABLE,
            SchemaChangeTarget::Type => TYPE,
            SchemaChangeTarget::Function => FUNCTION,
            SchemaChangeTarget::Aggregate => AGGREGATE,
        };

        serialize_str(cursor, target, version);
    }
}

impl FromCursor for SchemaChangeTarget {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> error::Result<Self> {
        match from_cursor_str(cursor)? {
            KEYSPACE => Ok(SchemaChangeTarget::Keyspace),
            TABLE => Ok(SchemaChangeTarget::Table),
            TYPE => Ok(SchemaChangeTarget::Type),
            FUNCTION => Ok(SchemaChangeTarget::Function),
            AGGREGATE => Ok(SchemaChangeTarget::Aggregate),
            target => Err(error::Error::UnexpectedSchemaChangeTarget(target.into())),
        }
    }
}
