//! Consistency levels, as sent in QUERY requests and reported back in server error bodies.
use std::convert::TryFrom;
use std::io::Cursor;
use std::str::FromStr;

use derive_more::Display;

use crate::error::{Error, Result};
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::CIntShort;

/// How many replicas must acknowledge an operation. Discriminants are the `[consistency]` wire
/// codes.
#[derive(Debug, PartialEq, Clone, Copy, Display, Ord, PartialOrd, Eq, Hash, Default)]
#[repr(i16)]
pub enum Consistency {
    /// Writes only; a stored hint is enough.
    Any = 0x00,
    #[default]
    One = 0x01,
    Two = 0x02,
    Three = 0x03,
    Quorum = 0x04,
    All = 0x05,
    LocalQuorum = 0x06,
    EachQuorum = 0x07,
    /// Paxos phase of lightweight transactions.
    Serial = 0x08,
    LocalSerial = 0x09,
    LocalOne = 0x0A,
}

const LEVELS: [Consistency; 11] = [
    Consistency::Any,
    Consistency::One,
    Consistency::Two,
    Consistency::Three,
    Consistency::Quorum,
    Consistency::All,
    Consistency::LocalQuorum,
    Consistency::EachQuorum,
    Consistency::Serial,
    Consistency::LocalSerial,
    Consistency::LocalOne,
];

impl Consistency {
    /// Name as written in CQL, e.g. `LOCAL_QUORUM`.
    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        }
    }

    /// Only replicas in the coordinator's datacenter take part.
    #[inline]
    pub fn is_dc_local(self) -> bool {
        matches!(
            self,
            Consistency::LocalOne | Consistency::LocalQuorum | Consistency::LocalSerial
        )
    }

    #[inline]
    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

/// Accepts both the CQL spelling (`LOCAL_ONE`) and the variant name (`LocalOne`).
impl FromStr for Consistency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LEVELS
            .iter()
            .copied()
            .find(|level| level.as_str() == s || level.to_string() == s)
            .ok_or_else(|| Error::General(format!("Invalid consistency provided: {s}")))
    }
}

impl TryFrom<CIntShort> for Consistency {
    type Error = Error;

    fn try_from(value: CIntShort) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| LEVELS.get(index).copied())
            .ok_or(Error::UnknownConsistency(value))
    }
}

impl From<Consistency> for CIntShort {
    #[inline]
    fn from(value: Consistency) -> Self {
        value as CIntShort
    }
}

impl Serialize for Consistency {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        CIntShort::from(*self).serialize(cursor, version);
    }
}

impl FromCursor for Consistency {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<Self> {
        CIntShort::from_cursor(cursor, version).and_then(Consistency::try_from)
    }
}
