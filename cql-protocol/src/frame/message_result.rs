//! `RESULT` response bodies. Cells are kept as raw `[bytes]`; decoding individual column
//! types is left to the caller, except for the few helpers the driver itself needs.
use bitflags::bitflags;
use derive_more::Display;
use std::convert::TryFrom;
use std::io::Cursor;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::events::SchemaChange;
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::*;

#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Display)]
pub enum ResultKind {
    Void,
    Rows,
    SetKeyspace,
    Prepared,
    SchemaChange,
}

impl From<ResultKind> for CInt {
    fn from(value: ResultKind) -> Self {
        match value {
            ResultKind::Void => 0x0001,
            ResultKind::Rows => 0x0002,
            ResultKind::SetKeyspace => 0x0003,
            ResultKind::Prepared => 0x0004,
            ResultKind::SchemaChange => 0x0005,
        }
    }
}

impl TryFrom<CInt> for ResultKind {
    type Error = Error;

    fn try_from(value: CInt) -> Result<Self> {
        match value {
            0x0001 => Ok(ResultKind::Void),
            0x0002 => Ok(ResultKind::Rows),
            0x0003 => Ok(ResultKind::SetKeyspace),
            0x0004 => Ok(ResultKind::Prepared),
            0x0005 => Ok(ResultKind::SchemaChange),
            _ => Err(Error::UnexpectedResultKind(value)),
        }
    }
}

/// Decoded `RESULT` body.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ResResultBody {
    Void,
    Rows(BodyResResultRows),
    /// Name of the keyspace that was set by `USE`.
    SetKeyspace(String),
    Prepared(BodyResResultPrepared),
    SchemaChange(SchemaChange),
}

impl ResResultBody {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResResultBody::Void => ResultKind::Void,
            ResResultBody::Rows(_) => ResultKind::Rows,
            ResResultBody::SetKeyspace(_) => ResultKind::SetKeyspace,
            ResResultBody::Prepared(_) => ResultKind::Prepared,
            ResResultBody::SchemaChange(_) => ResultKind::SchemaChange,
        }
    }

    pub fn as_rows(&self) -> Option<&BodyResResultRows> {
        match self {
            ResResultBody::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<BodyResResultRows> {
        match self {
            ResResultBody::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_prepared(&self) -> Option<&BodyResResultPrepared> {
        match self {
            ResResultBody::Prepared(prepared) => Some(prepared),
            _ => None,
        }
    }

    pub fn into_prepared(self) -> Option<BodyResResultPrepared> {
        match self {
            ResResultBody::Prepared(prepared) => Some(prepared),
            _ => None,
        }
    }

    pub fn as_set_keyspace(&self) -> Option<&str> {
        match self {
            ResResultBody::SetKeyspace(keyspace) => Some(keyspace),
            _ => None,
        }
    }
}

impl Serialize for ResResultBody {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        CInt::from(self.kind()).serialize(cursor, version);

        match self {
            ResResultBody::Void => {}
            ResResultBody::Rows(rows) => rows.serialize(cursor, version),
            ResResultBody::SetKeyspace(keyspace) => serialize_str(cursor, keyspace, version),
            ResResultBody::Prepared(prepared) => prepared.serialize(cursor, version),
            ResResultBody::SchemaChange(change) => change.serialize(cursor, version),
        }
    }
}

impl FromCursor for ResResultBody {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<ResResultBody> {
        let kind = CInt::from_cursor(cursor, version)?;

        match ResultKind::try_from(kind)? {
            ResultKind::Void => Ok(ResResultBody::Void),
            ResultKind::Rows => BodyResResultRows::from_cursor(cursor, version).map(ResResultBody::Rows),
            ResultKind::SetKeyspace => Ok(ResResultBody::SetKeyspace(
                from_cursor_str(cursor)?.to_string(),
            )),
            ResultKind::SchemaChange => {
                SchemaChange::from_cursor(cursor, version).map(ResResultBody::SchemaChange)
            }
            ResultKind::Prepared => {
                BodyResResultPrepared::from_cursor(cursor, version).map(ResResultBody::Prepared)
            }
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct RowsMetadataFlags: i32 {
        const GLOBAL_TABLE_SPACE = 0x0001;
        const HAS_MORE_PAGES = 0x0002;
        const NO_METADATA = 0x0004;
    }
}

/// Keyspace and table the columns belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    pub ks_name: String,
    pub table_name: String,
}

impl Serialize for TableSpec {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str(cursor, &self.ks_name, version);
        serialize_str(cursor, &self.table_name, version);
    }
}

impl FromCursor for TableSpec {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<Self> {
        Ok(TableSpec {
            ks_name: from_cursor_str(cursor)?.to_string(),
            table_name: from_cursor_str(cursor)?.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RowsMetadata {
    pub flags: RowsMetadataFlags,
    pub columns_count: CInt,
    pub paging_state: Option<CBytes>,
    pub global_table_spec: Option<TableSpec>,
    pub col_specs: Vec<ColSpec>,
}

impl RowsMetadata {
    /// Metadata for a single table, as produced for a plain `SELECT`.
    pub fn new(table: TableSpec, col_specs: Vec<ColSpec>) -> Self {
        RowsMetadata {
            flags: RowsMetadataFlags::GLOBAL_TABLE_SPACE,
            columns_count: col_specs.len() as CInt,
            paging_state: None,
            global_table_spec: Some(table),
            col_specs,
        }
    }

    #[inline]
    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }
}

impl Serialize for RowsMetadata {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        let mut flags = self.flags - RowsMetadataFlags::HAS_MORE_PAGES;
        flags.set(RowsMetadataFlags::HAS_MORE_PAGES, self.paging_state.is_some());
        flags.set(
            RowsMetadataFlags::GLOBAL_TABLE_SPACE,
            self.global_table_spec.is_some(),
        );

        flags.bits().serialize(cursor, version);
        self.columns_count.serialize(cursor, version);

        if let Some(paging_state) = &self.paging_state {
            paging_state.serialize(cursor, version);
        }

        if flags.contains(RowsMetadataFlags::NO_METADATA) {
            return;
        }

        serialize_col_specs(cursor, &self.global_table_spec, &self.col_specs, version);
    }
}

fn serialize_col_specs(
    cursor: &mut Cursor<&mut Vec<u8>>,
    global_table_spec: &Option<TableSpec>,
    col_specs: &[ColSpec],
    version: Version,
) {
    if let Some(global_table_spec) = global_table_spec {
        global_table_spec.serialize(cursor, version);
    }

    for col_spec in col_specs {
        if global_table_spec.is_none() {
            if let Some(table_spec) = &col_spec.table_spec {
                table_spec.serialize(cursor, version);
            }
        }

        serialize_str(cursor, &col_spec.name, version);
        col_spec.col_type.serialize(cursor, version);
    }
}

/// Reads the optional global table spec followed by `count` column specs.
fn col_specs_from_cursor(
    cursor: &mut Cursor<&[u8]>,
    has_global_table_spec: bool,
    count: CInt,
    version: Version,
) -> Result<(Option<TableSpec>, Vec<ColSpec>)> {
    let global_table_spec = if has_global_table_spec {
        Some(TableSpec::from_cursor(cursor, version)?)
    } else {
        None
    };

    let mut col_specs = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let table_spec = if global_table_spec.is_none() {
            Some(TableSpec::from_cursor(cursor, version)?)
        } else {
            None
        };

        let name = from_cursor_str(cursor)?.to_string();
        let col_type = ColTypeOption::from_cursor(cursor, version)?;

        col_specs.push(ColSpec {
            table_spec,
            name,
            col_type,
        });
    }

    Ok((global_table_spec, col_specs))
}

impl FromCursor for RowsMetadata {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<RowsMetadata> {
        let flags = RowsMetadataFlags::from_bits_truncate(CInt::from_cursor(cursor, version)?);
        let columns_count = CInt::from_cursor(cursor, version)?;

        let paging_state = if flags.contains(RowsMetadataFlags::HAS_MORE_PAGES) {
            Some(CBytes::from_cursor(cursor, version)?)
        } else {
            None
        };

        if flags.contains(RowsMetadataFlags::NO_METADATA) {
            return Ok(RowsMetadata {
                flags,
                columns_count,
                paging_state,
                global_table_spec: None,
                col_specs: vec![],
            });
        }

        let (global_table_spec, col_specs) = col_specs_from_cursor(
            cursor,
            flags.contains(RowsMetadataFlags::GLOBAL_TABLE_SPACE),
            columns_count,
            version,
        )?;

        Ok(RowsMetadata {
            flags,
            columns_count,
            paging_state,
            global_table_spec,
            col_specs,
        })
    }
}

/// Bind markers of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PreparedMetadata {
    /// Indexes of the bind markers forming the partition key. Only sent with protocol v4.
    pub pk_indexes: Vec<i16>,
    pub global_table_spec: Option<TableSpec>,
    pub col_specs: Vec<ColSpec>,
}

impl Serialize for PreparedMetadata {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        let mut flags = RowsMetadataFlags::empty();
        flags.set(
            RowsMetadataFlags::GLOBAL_TABLE_SPACE,
            self.global_table_spec.is_some(),
        );

        flags.bits().serialize(cursor, version);
        (self.col_specs.len() as CInt).serialize(cursor, version);

        if version >= Version::V4 {
            (self.pk_indexes.len() as CInt).serialize(cursor, version);
            for pk_index in &self.pk_indexes {
                pk_index.serialize(cursor, version);
            }
        }

        serialize_col_specs(cursor, &self.global_table_spec, &self.col_specs, version);
    }
}

impl FromCursor for PreparedMetadata {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<PreparedMetadata> {
        let flags = RowsMetadataFlags::from_bits_truncate(CInt::from_cursor(cursor, version)?);
        let columns_count = CInt::from_cursor(cursor, version)?;

        let pk_indexes = if version >= Version::V4 {
            let pk_count = CInt::from_cursor(cursor, version)?;
            let mut pk_indexes = Vec::with_capacity(pk_count.max(0) as usize);
            for _ in 0..pk_count {
                pk_indexes.push(CIntShort::from_cursor(cursor, version)?);
            }

            pk_indexes
        } else {
            vec![]
        };

        let (global_table_spec, col_specs) = col_specs_from_cursor(
            cursor,
            flags.contains(RowsMetadataFlags::GLOBAL_TABLE_SPACE),
            columns_count,
            version,
        )?;

        Ok(PreparedMetadata {
            pk_indexes,
            global_table_spec,
            col_specs,
        })
    }
}

/// Result of a `PREPARE`: the statement id, its bind markers and the metadata of the rows it
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BodyResResultPrepared {
    pub id: CBytesShort,
    pub metadata: PreparedMetadata,
    pub result_metadata: RowsMetadata,
}

impl Serialize for BodyResResultPrepared {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.id.serialize(cursor, version);
        self.metadata.serialize(cursor, version);
        self.result_metadata.serialize(cursor, version);
    }
}

impl FromCursor for BodyResResultPrepared {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<BodyResResultPrepared> {
        let id = CBytesShort::from_cursor(cursor, version)?;
        let metadata = PreparedMetadata::from_cursor(cursor, version)?;
        let result_metadata = RowsMetadata::from_cursor(cursor, version)?;

        Ok(BodyResResultPrepared {
            id,
            metadata,
            result_metadata,
        })
    }
}

/// Single column specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColSpec {
    /// Only present if the metadata has no global table spec.
    pub table_spec: Option<TableSpec>,
    pub name: String,
    pub col_type: ColTypeOption,
}

impl ColSpec {
    pub fn new(name: impl Into<String>, id: ColType) -> Self {
        ColSpec {
            table_spec: None,
            name: name.into(),
            col_type: ColTypeOption { id, value: None },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ColType {
    Custom,
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    Duration,
    List,
    Map,
    Set,
    Udt,
    Tuple,
}

impl From<ColType> for CIntShort {
    fn from(value: ColType) -> Self {
        match value {
            ColType::Custom => 0x0000,
            ColType::Ascii => 0x0001,
            ColType::Bigint => 0x0002,
            ColType::Blob => 0x0003,
            ColType::Boolean => 0x0004,
            ColType::Counter => 0x0005,
            ColType::Decimal => 0x0006,
            ColType::Double => 0x0007,
            ColType::Float => 0x0008,
            ColType::Int => 0x0009,
            ColType::Timestamp => 0x000B,
            ColType::Uuid => 0x000C,
            ColType::Varchar => 0x000D,
            ColType::Varint => 0x000E,
            ColType::Timeuuid => 0x000F,
            ColType::Inet => 0x0010,
            ColType::Date => 0x0011,
            ColType::Time => 0x0012,
            ColType::Smallint => 0x0013,
            ColType::Tinyint => 0x0014,
            ColType::Duration => 0x0015,
            ColType::List => 0x0020,
            ColType::Map => 0x0021,
            ColType::Set => 0x0022,
            ColType::Udt => 0x0030,
            ColType::Tuple => 0x0031,
        }
    }
}

impl TryFrom<CIntShort> for ColType {
    type Error = Error;

    fn try_from(value: CIntShort) -> Result<Self> {
        Ok(match value {
            0x0000 => ColType::Custom,
            0x0001 => ColType::Ascii,
            0x0002 => ColType::Bigint,
            0x0003 => ColType::Blob,
            0x0004 => ColType::Boolean,
            0x0005 => ColType::Counter,
            0x0006 => ColType::Decimal,
            0x0007 => ColType::Double,
            0x0008 => ColType::Float,
            0x0009 => ColType::Int,
            0x000B => ColType::Timestamp,
            0x000C => ColType::Uuid,
            0x000D => ColType::Varchar,
            0x000E => ColType::Varint,
            0x000F => ColType::Timeuuid,
            0x0010 => ColType::Inet,
            0x0011 => ColType::Date,
            0x0012 => ColType::Time,
            0x0013 => ColType::Smallint,
            0x0014 => ColType::Tinyint,
            0x0015 => ColType::Duration,
            0x0020 => ColType::List,
            0x0021 => ColType::Map,
            0x0022 => ColType::Set,
            0x0030 => ColType::Udt,
            0x0031 => ColType::Tuple,
            _ => return Err(Error::UnexpectedColumnType(value)),
        })
    }
}

/// Column type, with the nested types of collections, tuples and user types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColTypeOption {
    pub id: ColType,
    pub value: Option<ColTypeOptionValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColTypeOptionValue {
    /// Java class name of a custom type.
    CString(String),
    /// Element type of a list or a set.
    Elements(Box<ColTypeOption>),
    Map(Box<ColTypeOption>, Box<ColTypeOption>),
    Udt {
        ks: String,
        name: String,
        fields: Vec<(String, ColTypeOption)>,
    },
    Tuple(Vec<ColTypeOption>),
}

impl Serialize for ColTypeOption {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        CIntShort::from(self.id).serialize(cursor, version);

        match &self.value {
            None => {}
            Some(ColTypeOptionValue::CString(class)) => serialize_str(cursor, class, version),
            Some(ColTypeOptionValue::Elements(element)) => element.serialize(cursor, version),
            Some(ColTypeOptionValue::Map(key, value)) => {
                key.serialize(cursor, version);
                value.serialize(cursor, version);
            }
            Some(ColTypeOptionValue::Udt { ks, name, fields }) => {
                serialize_str(cursor, ks, version);
                serialize_str(cursor, name, version);
                (fields.len() as CIntShort).serialize(cursor, version);
                for (field_name, field_type) in fields {
                    serialize_str(cursor, field_name, version);
                    field_type.serialize(cursor, version);
                }
            }
            Some(ColTypeOptionValue::Tuple(types)) => {
                (types.len() as CIntShort).serialize(cursor, version);
                for ty in types {
                    ty.serialize(cursor, version);
                }
            }
        }
    }
}

impl FromCursor for ColTypeOption {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<ColTypeOption> {
        let id = ColType::try_from(CIntShort::from_cursor(cursor, version)?)?;

        let value = match id {
            ColType::Custom => Some(ColTypeOptionValue::CString(
                from_cursor_str(cursor)?.to_string(),
            )),
            ColType::List | ColType::Set => Some(ColTypeOptionValue::Elements(Box::new(
                ColTypeOption::from_cursor(cursor, version)?,
            ))),
            ColType::Map => {
                let key = ColTypeOption::from_cursor(cursor, version)?;
                let value = ColTypeOption::from_cursor(cursor, version)?;
                Some(ColTypeOptionValue::Map(Box::new(key), Box::new(value)))
            }
            ColType::Udt => {
                let ks = from_cursor_str(cursor)?.to_string();
                let name = from_cursor_str(cursor)?.to_string();
                let count = CIntShort::from_cursor(cursor, version)?.max(0);
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let field_name = from_cursor_str(cursor)?.to_string();
                    fields.push((field_name, ColTypeOption::from_cursor(cursor, version)?));
                }

                Some(ColTypeOptionValue::Udt { ks, name, fields })
            }
            ColType::Tuple => {
                let count = CIntShort::from_cursor(cursor, version)?.max(0);
                let mut types = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    types.push(ColTypeOption::from_cursor(cursor, version)?);
                }

                Some(ColTypeOptionValue::Tuple(types))
            }
            _ => None,
        };

        Ok(ColTypeOption { id, value })
    }
}

/// Rows result: metadata followed by `rows_count` rows of raw cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyResResultRows {
    pub metadata: RowsMetadata,
    pub rows_content: Vec<Vec<CBytes>>,
}

impl BodyResResultRows {
    pub fn new(metadata: RowsMetadata, rows_content: Vec<Vec<CBytes>>) -> Self {
        BodyResResultRows {
            metadata,
            rows_content,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows_content.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows_content.is_empty()
    }

    /// Index of the column with given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.metadata
            .col_specs
            .iter()
            .position(|col_spec| col_spec.name == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows_content.iter().map(move |cells| Row {
            metadata: &self.metadata,
            cells,
        })
    }
}

impl Serialize for BodyResResultRows {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.metadata.serialize(cursor, version);
        (self.rows_content.len() as CInt).serialize(cursor, version);

        for row in &self.rows_content {
            for cell in row {
                cell.serialize(cursor, version);
            }
        }
    }
}

impl FromCursor for BodyResResultRows {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<BodyResResultRows> {
        let metadata = RowsMetadata::from_cursor(cursor, version)?;
        let rows_count = CInt::from_cursor(cursor, version)?.max(0) as usize;
        let columns_count = metadata.columns_count.max(0) as usize;

        let mut rows_content = Vec::with_capacity(rows_count);
        for _ in 0..rows_count {
            let mut row = Vec::with_capacity(columns_count);
            for _ in 0..columns_count {
                row.push(CBytes::from_cursor(cursor, version)?);
            }

            rows_content.push(row);
        }

        Ok(BodyResResultRows {
            metadata,
            rows_content,
        })
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    metadata: &'a RowsMetadata,
    cells: &'a [CBytes],
}

impl<'a> Row<'a> {
    /// Raw cell by column name; `None` for unknown columns and null cells.
    pub fn get_raw(&self, name: &str) -> Option<&'a [u8]> {
        let index = self
            .metadata
            .col_specs
            .iter()
            .position(|col_spec| col_spec.name == name)?;

        self.cells.get(index).and_then(CBytes::as_slice)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&'a [u8]> {
        self.cells.get(index).and_then(CBytes::as_slice)
    }

    pub fn get_text(&self, name: &str) -> Result<Option<String>> {
        self.get_raw(name).map(decode_text).transpose()
    }

    pub fn get_inet(&self, name: &str) -> Result<Option<IpAddr>> {
        self.get_raw(name).map(decode_inet).transpose()
    }

    pub fn get_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        self.get_raw(name).map(decode_uuid).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::events::{SchemaChangeTarget, SchemaChangeType};

    fn peers_rows() -> BodyResResultRows {
        let metadata = RowsMetadata::new(
            TableSpec {
                ks_name: "system".into(),
                table_name: "peers".into(),
            },
            vec![
                ColSpec::new("rpc_address", ColType::Inet),
                ColSpec::new("data_center", ColType::Varchar),
                ColSpec::new("host_id", ColType::Uuid),
            ],
        );

        BodyResResultRows::new(
            metadata,
            vec![vec![
                CBytes::new(vec![127, 0, 0, 2]),
                CBytes::new(b"dc1".to_vec()),
                CBytes::new_null(),
            ]],
        )
    }

    #[test]
    fn rows_encode_decode() {
        let body = ResResultBody::Rows(peers_rows());
        let bytes = body.serialize_to_vec(Version::V4);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(ResResultBody::from_cursor(&mut cursor, Version::V4).unwrap(), body);
    }

    #[test]
    fn row_accessors() {
        let rows = peers_rows();
        let row = rows.rows().next().unwrap();

        assert_eq!(
            row.get_inet("rpc_address").unwrap(),
            Some("127.0.0.2".parse().unwrap())
        );
        assert_eq!(row.get_text("data_center").unwrap(), Some("dc1".into()));
        assert_eq!(row.get_uuid("host_id").unwrap(), None);
        assert_eq!(row.get_raw("missing"), None);
        assert_eq!(rows.column_index("host_id"), Some(2));
    }

    #[test]
    fn set_keyspace() {
        let bytes = [0, 0, 0, 3, 0, 2, 107, 115];
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let body = ResResultBody::from_cursor(&mut cursor, Version::V4).unwrap();
        assert_eq!(body.as_set_keyspace(), Some("ks"));
    }

    #[test]
    fn schema_change() {
        let body = ResResultBody::SchemaChange(SchemaChange {
            change_type: SchemaChangeType::Created,
            target: SchemaChangeTarget::Table,
            keyspace: "ks".into(),
            name: "t".into(),
            arguments: vec![],
        });

        let bytes = body.serialize_to_vec(Version::V4);
        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(ResResultBody::from_cursor(&mut cursor, Version::V4).unwrap(), body);
    }

    #[test]
    fn nested_col_type() {
        let col_type = ColTypeOption {
            id: ColType::Map,
            value: Some(ColTypeOptionValue::Map(
                Box::new(ColTypeOption {
                    id: ColType::Varchar,
                    value: None,
                }),
                Box::new(ColTypeOption {
                    id: ColType::List,
                    value: Some(ColTypeOptionValue::Elements(Box::new(ColTypeOption {
                        id: ColType::Int,
                        value: None,
                    }))),
                }),
            )),
        };

        let bytes = col_type.serialize_to_vec(Version::V4);
        assert_eq!(bytes, vec![0, 0x21, 0, 0x0D, 0, 0x20, 0, 0x09]);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        assert_eq!(ColTypeOption::from_cursor(&mut cursor, Version::V4).unwrap(), col_type);
    }

    fn prepared() -> ResResultBody {
        let table = TableSpec {
            ks_name: "ks".into(),
            table_name: "users".into(),
        };

        ResResultBody::Prepared(BodyResResultPrepared {
            id: CBytesShort::new(vec![0xCA, 0xFE]),
            metadata: PreparedMetadata {
                pk_indexes: vec![0],
                global_table_spec: Some(table.clone()),
                col_specs: vec![ColSpec::new("id", ColType::Uuid)],
            },
            result_metadata: RowsMetadata::new(table, vec![ColSpec::new("name", ColType::Varchar)]),
        })
    }

    #[test]
    fn prepared_encode_decode() {
        let body = prepared();
        let bytes = body.serialize_to_vec(Version::V4);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let decoded = ResResultBody::from_cursor(&mut cursor, Version::V4).unwrap();
        assert_eq!(decoded, body);
        assert_eq!(cursor.position() as usize, bytes.len());
        assert_eq!(
            decoded.into_prepared().unwrap().id.into_bytes(),
            Some(vec![0xCA, 0xFE])
        );
    }

    #[test]
    fn prepared_pk_indexes_need_v4() {
        let body = prepared();
        let bytes = body.serialize_to_vec(Version::V3);

        let mut cursor: Cursor<&[u8]> = Cursor::new(&bytes);
        let decoded = ResResultBody::from_cursor(&mut cursor, Version::V3).unwrap();
        let prepared = decoded.as_prepared().unwrap();
        assert!(prepared.metadata.pk_indexes.is_empty());
        assert_eq!(prepared.metadata.col_specs[0].name, "id");
        assert_eq!(prepared.result_metadata.col_specs[0].name, "name");
    }
}
