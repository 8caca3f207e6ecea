//! Error types for record decoding, geometry construction and queries.

use crate::types::EntityId;
use thiserror::Error;

/// Malformed or truncated record bytes.
///
/// Fatal for the record being decoded, never for its siblings in a cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unexpected end of buffer at offset {pos} (needed {needed} more bytes)")]
    UnexpectedEof { pos: usize, needed: usize },

    #[error("Varint at offset {pos} overflows {bits} bits")]
    VarintOverflow { pos: usize, bits: u32 },

    #[error("Invalid entity type tag: {0}")]
    InvalidEntityType(u64),

    #[error("Embedded child index {index} out of range (table has {len} entries)")]
    ChildIndexOutOfRange { index: u64, len: usize },

    #[error("Value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Seek to {pos} past end of buffer ({len} bytes)")]
    SeekOutOfBounds { pos: usize, len: usize },
}

/// Failure while building or clipping a geometry.
///
/// The query engine catches these per (entity, timestamp) and drops only
/// that output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Invalid ring for entity {id}: {reason}")]
    InvalidRing { id: EntityId, reason: String },

    #[error("Cannot resolve member {id}: {reason}")]
    Member { id: EntityId, reason: String },

    #[error("Unsupported geometry: {0}")]
    Unsupported(String),

    #[error("Topology error: {0}")]
    Topology(String),
}

/// Main error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid cell format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Query timed out after {processed_cells} of {total_cells} cells")]
    Timeout {
        processed_cells: usize,
        total_cells: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Whether this error leaves partial results behind rather than none.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Whether this error is confined to the record being decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::ChecksumMismatch { .. })
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
