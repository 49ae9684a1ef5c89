//! Error types for safetensors operations.

use thiserror::Error;

use crate::models::DType;

/// All errors that can occur when reading or writing safetensors containers.
#[derive(Debug, Error)]
pub enum Error {
    /// Input is shorter than the 8-byte header length prefix.
    #[error("header ({len} bytes) too small")]
    TooSmall { len: usize },

    /// Declared header length exceeds the hard ceiling.
    #[error("header too large: max {limit}, actual {size}")]
    HeaderTooLarge { size: u64, limit: u64 },

    /// Input ends before the declared header does.
    #[error("invalid header length {expected}, only {found} bytes available")]
    TruncatedHeader { expected: u64, found: u64 },

    /// Header is not valid UTF-8 JSON, or its top level is not an object.
    #[error("invalid header deserialization: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A header entry has the wrong structure.
    #[error("invalid header entry '{key}': {reason}")]
    Schema { key: String, reason: String },

    /// Data offsets are not contiguous or decrease.
    #[error(
        "invalid metadata offset for tensor '{name}' (#{index}): [{start}, {end}), expected start {expected_start}"
    )]
    InvalidOffset {
        name: String,
        index: usize,
        start: u64,
        end: u64,
        expected_start: u64,
    },

    /// Declared byte range disagrees with shape and dtype.
    #[error("tensor '{name}' (#{index}) data offsets span {found} bytes, shape requires {expected}")]
    SizeMismatch {
        name: String,
        index: usize,
        expected: u64,
        found: u64,
    },

    /// Shape arithmetic exceeded the 64-bit range.
    #[error("multiplication overflow: {lhs} * {rhs}")]
    Overflow { lhs: u64, rhs: u64 },

    /// Shape arithmetic for a header entry exceeded the 64-bit range.
    #[error("tensor '{name}' (#{index}) size overflows: {lhs} * {rhs}")]
    TensorOverflow {
        name: String,
        index: usize,
        lhs: u64,
        rhs: u64,
    },

    /// Total input length disagrees with header plus payload.
    #[error("metadata incomplete buffer: expected {expected} bytes, found {found}")]
    IncompleteBuffer { expected: u64, found: u64 },

    /// View data length disagrees with shape and dtype.
    #[error("invalid tensor view: dtype={dtype} shape={shape:?} len(data)={len}")]
    ShapeMismatch {
        dtype: DType,
        shape: Vec<u64>,
        len: usize,
    },

    /// Requested tensor is not in the container.
    #[error("tensor not found: {0}")]
    TensorNotFound(String),

    /// The same name was given to more than one tensor.
    #[error("duplicate tensor name: '{0}'")]
    DuplicateTensor(String),

    /// Type mismatch when reading typed data.
    #[error("type mismatch in {context}: expected '{expected}', found '{found}'")]
    TypeMismatch {
        expected: String,
        found: String,
        context: String,
    },

    /// Bytes could not be reinterpreted as the requested element type.
    #[error("data conversion error: {0}")]
    DataConversion(String),

    /// I/O failure with what was being attempted.
    #[error("I/O error {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Attaches a description of the failed operation to an I/O result.
pub(crate) trait IoContext<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T, Error>;

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T, Error>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T, Error> {
        self.map_err(|source| Error::Io {
            context: context.into(),
            source,
        })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T, Error> {
        self.map_err(|source| Error::Io {
            context: f().into(),
            source,
        })
    }
}
