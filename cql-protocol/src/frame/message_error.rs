//! Server `ERROR` bodies: an error code, a message and code-specific details.
use derive_more::Display;
use std::io::{Cursor, Read};

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::frame::{FromCursor, Serialize, Version};
use crate::types::*;

/// Error returned by the server, as carried in an `ERROR` response.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ErrorBody {
    pub message: String,
    pub ty: ErrorType,
}

impl ErrorBody {
    #[inline]
    pub fn new(ty: ErrorType, message: impl Into<String>) -> Self {
        ErrorBody {
            message: message.into(),
            ty,
        }
    }

    /// Numeric code as sent on the wire.
    #[inline]
    pub fn code(&self) -> CInt {
        self.ty.code()
    }
}

impl Serialize for ErrorBody {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.ty.code().serialize(cursor, version);
        serialize_str(cursor, &self.message, version);
        self.ty.serialize(cursor, version);
    }
}

impl FromCursor for ErrorBody {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<ErrorBody> {
        let error_code = CInt::from_cursor(cursor, version)?;
        let message = from_cursor_str(cursor)?.to_string();
        let ty = ErrorType::from_cursor_with_code(cursor, error_code, version)?;

        Ok(ErrorBody { message, ty })
    }
}

/// Error kind with the additional information some kinds carry.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorType {
    Server,
    Protocol,
    Authentication,
    Unavailable(UnavailableError),
    Overloaded,
    IsBootstrapping,
    Truncate,
    WriteTimeout(WriteTimeoutError),
    ReadTimeout(ReadTimeoutError),
    ReadFailure(ReadFailureError),
    FunctionFailure(FunctionFailureError),
    WriteFailure(WriteFailureError),
    Syntax,
    Unauthorized,
    Invalid,
    Config,
    AlreadyExists(AlreadyExistsError),
    Unprepared(UnpreparedError),
}

impl ErrorType {
    pub fn code(&self) -> CInt {
        match self {
            ErrorType::Server => 0x0000,
            ErrorType::Protocol => 0x000A,
            ErrorType::Authentication => 0x0100,
            ErrorType::Unavailable(_) => 0x1000,
            ErrorType::Overloaded => 0x1001,
            ErrorType::IsBootstrapping => 0x1002,
            ErrorType::Truncate => 0x1003,
            ErrorType::WriteTimeout(_) => 0x1100,
            ErrorType::ReadTimeout(_) => 0x1200,
            ErrorType::ReadFailure(_) => 0x1300,
            ErrorType::FunctionFailure(_) => 0x1400,
            ErrorType::WriteFailure(_) => 0x1500,
            ErrorType::Syntax => 0x2000,
            ErrorType::Unauthorized => 0x2100,
            ErrorType::Invalid => 0x2200,
            ErrorType::Config => 0x2300,
            ErrorType::AlreadyExists(_) => 0x2400,
            ErrorType::Unprepared(_) => 0x2500,
        }
    }

    pub fn from_cursor_with_code(
        cursor: &mut Cursor<&[u8]>,
        error_code: CInt,
        version: Version,
    ) -> Result<ErrorType> {
        match error_code {
            0x0000 => Ok(ErrorType::Server),
            0x000A => Ok(ErrorType::Protocol),
            0x0100 => Ok(ErrorType::Authentication),
            0x1000 => UnavailableError::from_cursor(cursor, version).map(ErrorType::Unavailable),
            0x1001 => Ok(ErrorType::Overloaded),
            0x1002 => Ok(ErrorType::IsBootstrapping),
            0x1003 => Ok(ErrorType::Truncate),
            0x1100 => WriteTimeoutError::from_cursor(cursor, version).map(ErrorType::WriteTimeout),
            0x1200 => ReadTimeoutError::from_cursor(cursor, version).map(ErrorType::ReadTimeout),
            0x1300 => ReadFailureError::from_cursor(cursor, version).map(ErrorType::ReadFailure),
            0x1400 => FunctionFailureError::from_cursor(cursor, version)
                .map(ErrorType::FunctionFailure),
            0x1500 => WriteFailureError::from_cursor(cursor, version).map(ErrorType::WriteFailure),
            0x2000 => Ok(ErrorType::Syntax),
            0x2100 => Ok(ErrorType::Unauthorized),
            0x2200 => Ok(ErrorType::Invalid),
            0x2300 => Ok(ErrorType::Config),
            0x2400 => AlreadyExistsError::from_cursor(cursor, version).map(ErrorType::AlreadyExists),
            0x2500 => UnpreparedError::from_cursor(cursor, version).map(ErrorType::Unprepared),
            _ => Err(Error::UnexpectedErrorCode(error_code)),
        }
    }
}

impl Serialize for ErrorType {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        match self {
            ErrorType::Unavailable(unavailable) => unavailable.serialize(cursor, version),
            ErrorType::WriteTimeout(write_timeout) => write_timeout.serialize(cursor, version),
            ErrorType::ReadTimeout(read_timeout) => read_timeout.serialize(cursor, version),
            ErrorType::ReadFailure(read_failure) => read_failure.serialize(cursor, version),
            ErrorType::FunctionFailure(function_failure) => {
                function_failure.serialize(cursor, version)
            }
            ErrorType::WriteFailure(write_failure) => write_failure.serialize(cursor, version),
            ErrorType::AlreadyExists(already_exists) => already_exists.serialize(cursor, version),
            ErrorType::Unprepared(unprepared) => unprepared.serialize(cursor, version),
            _ => {}
        }
    }
}

/// Not enough live replicas to satisfy the requested consistency.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct UnavailableError {
    pub cl: Consistency,
    /// Number of nodes that should be available to respect `cl`.
    pub required: CInt,
    /// Number of replicas that were known to be alive.
    pub alive: CInt,
}

impl Serialize for UnavailableError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.cl.serialize(cursor, version);
        self.required.serialize(cursor, version);
        self.alive.serialize(cursor, version);
    }
}

impl FromCursor for UnavailableError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<UnavailableError> {
        Ok(UnavailableError {
            cl: Consistency::from_cursor(cursor, version)?,
            required: CInt::from_cursor(cursor, version)?,
            alive: CInt::from_cursor(cursor, version)?,
        })
    }
}

/// Replicas did not acknowledge a write in time.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct WriteTimeoutError {
    pub cl: Consistency,
    /// Number of nodes having acknowledged the request.
    pub received: CInt,
    /// Number of replicas whose acknowledgement is required to achieve `cl`.
    pub block_for: CInt,
    pub write_type: WriteType,
}

impl Serialize for WriteTimeoutError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.cl.serialize(cursor, version);
        self.received.serialize(cursor, version);
        self.block_for.serialize(cursor, version);
        self.write_type.serialize(cursor, version);
    }
}

impl FromCursor for WriteTimeoutError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<WriteTimeoutError> {
        Ok(WriteTimeoutError {
            cl: Consistency::from_cursor(cursor, version)?,
            received: CInt::from_cursor(cursor, version)?,
            block_for: CInt::from_cursor(cursor, version)?,
            write_type: WriteType::from_cursor(cursor, version)?,
        })
    }
}

/// Replicas did not answer a read in time.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct ReadTimeoutError {
    pub cl: Consistency,
    /// Number of nodes having acknowledged the request.
    pub received: CInt,
    /// Number of replicas whose acknowledgement is required to achieve `cl`.
    pub block_for: CInt,
    pub data_present: bool,
}

impl ReadTimeoutError {
    /// Shows if the replica asked for data has responded.
    #[inline]
    pub fn replica_has_responded(&self) -> bool {
        self.data_present
    }
}

impl Serialize for ReadTimeoutError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.cl.serialize(cursor, version);
        self.received.serialize(cursor, version);
        self.block_for.serialize(cursor, version);
        (self.data_present as u8).serialize(cursor, version);
    }
}

impl FromCursor for ReadTimeoutError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<ReadTimeoutError> {
        let cl = Consistency::from_cursor(cursor, version)?;
        let received = CInt::from_cursor(cursor, version)?;
        let block_for = CInt::from_cursor(cursor, version)?;

        let mut buff = [0];
        cursor.read_exact(&mut buff)?;

        Ok(ReadTimeoutError {
            cl,
            received,
            block_for,
            data_present: buff[0] != 0,
        })
    }
}

/// Read failure other than a timeout.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct ReadFailureError {
    pub cl: Consistency,
    pub received: CInt,
    pub block_for: CInt,
    /// Number of nodes that experienced a failure.
    pub num_failures: CInt,
    pub data_present: bool,
}

impl Serialize for ReadFailureError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.cl.serialize(cursor, version);
        self.received.serialize(cursor, version);
        self.block_for.serialize(cursor, version);
        self.num_failures.serialize(cursor, version);
        (self.data_present as u8).serialize(cursor, version);
    }
}

impl FromCursor for ReadFailureError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<ReadFailureError> {
        let cl = Consistency::from_cursor(cursor, version)?;
        let received = CInt::from_cursor(cursor, version)?;
        let block_for = CInt::from_cursor(cursor, version)?;
        let num_failures = CInt::from_cursor(cursor, version)?;

        let mut buff = [0];
        cursor.read_exact(&mut buff)?;

        Ok(ReadFailureError {
            cl,
            received,
            block_for,
            num_failures,
            data_present: buff[0] != 0,
        })
    }
}

/// A user defined function failed during execution.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct FunctionFailureError {
    pub keyspace: String,
    pub function: String,
    /// One string for each argument type (as CQL type) of the failed function.
    pub arg_types: Vec<String>,
}

impl Serialize for FunctionFailureError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str(cursor, &self.keyspace, version);
        serialize_str(cursor, &self.function, version);
        serialize_str_list(cursor, self.arg_types.iter().map(String::as_str), version);
    }
}

impl FromCursor for FunctionFailureError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<FunctionFailureError> {
        Ok(FunctionFailureError {
            keyspace: from_cursor_str(cursor)?.to_string(),
            function: from_cursor_str(cursor)?.to_string(),
            arg_types: from_cursor_string_list(cursor)?,
        })
    }
}

/// Write failure other than a timeout.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct WriteFailureError {
    pub cl: Consistency,
    pub received: CInt,
    pub block_for: CInt,
    pub num_failures: CInt,
    pub write_type: WriteType,
}

impl Serialize for WriteFailureError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.cl.serialize(cursor, version);
        self.received.serialize(cursor, version);
        self.block_for.serialize(cursor, version);
        self.num_failures.serialize(cursor, version);
        self.write_type.serialize(cursor, version);
    }
}

impl FromCursor for WriteFailureError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<WriteFailureError> {
        Ok(WriteFailureError {
            cl: Consistency::from_cursor(cursor, version)?,
            received: CInt::from_cursor(cursor, version)?,
            block_for: CInt::from_cursor(cursor, version)?,
            num_failures: CInt::from_cursor(cursor, version)?,
            write_type: WriteType::from_cursor(cursor, version)?,
        })
    }
}

/// Describes the type of the write that failed or timed out.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Display)]
pub enum WriteType {
    /// Non-batched non-counter write.
    Simple,
    /// Logged batch write. The batch log has been written successfully.
    Batch,
    /// Unlogged batch; no batch log write has been attempted.
    UnloggedBatch,
    /// Counter write, batched or not.
    Counter,
    /// Failure while writing the batch log of a logged batch.
    BatchLog,
    /// Paxos phase of a lightweight transaction.
    Cas,
    /// Materialized view update.
    View,
    /// Change data capture.
    Cdc,
}

impl WriteType {
    fn as_str(&self) -> &'static str {
        match self {
            WriteType::Simple => "SIMPLE",
            WriteType::Batch => "BATCH",
            WriteType::UnloggedBatch => "UNLOGGED_BATCH",
            WriteType::Counter => "COUNTER",
            WriteType::BatchLog => "BATCH_LOG",
            WriteType::Cas => "CAS",
            WriteType::View => "VIEW",
            WriteType::Cdc => "CDC",
        }
    }
}

impl Serialize for WriteType {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str(cursor, self.as_str(), version);
    }
}

impl FromCursor for WriteType {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<WriteType> {
        match from_cursor_str(cursor)? {
            "SIMPLE" => Ok(WriteType::Simple),
            "BATCH" => Ok(WriteType::Batch),
            "UNLOGGED_BATCH" => Ok(WriteType::UnloggedBatch),
            "COUNTER" => Ok(WriteType::Counter),
            "BATCH_LOG" => Ok(WriteType::BatchLog),
            "CAS" => Ok(WriteType::Cas),
            "VIEW" => Ok(WriteType::View),
            "CDC" => Ok(WriteType::Cdc),
            wt => Err(Error::UnexpectedWriteType(wt.into())),
        }
    }
}

/// The query attempted to create a keyspace or a table that already exists.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct AlreadyExistsError {
    pub ks: String,
    /// Empty when the keyspace itself already exists.
    pub table: String,
}

impl Serialize for AlreadyExistsError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        serialize_str(cursor, &self.ks, version);
        serialize_str(cursor, &self.table, version);
    }
}

impl FromCursor for AlreadyExistsError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, _version: Version) -> Result<AlreadyExistsError> {
        Ok(AlreadyExistsError {
            ks: from_cursor_str(cursor)?.to_string(),
            table: from_cursor_str(cursor)?.to_string(),
        })
    }
}

/// A prepared statement id unknown to the host.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct UnpreparedError {
    pub id: CBytesShort,
}

impl Serialize for UnpreparedError {
    fn serialize(&self, cursor: &mut Cursor<&mut Vec<u8>>, version: Version) {
        self.id.serialize(cursor, version);
    }
}

impl FromCursor for UnpreparedError {
    fn from_cursor(cursor: &mut Cursor<&[u8]>, version: Version) -> Result<UnpreparedError> {
        CBytesShort::from_cursor(cursor, version).map(|id| UnpreparedError { id })
    }
}
