//! Error types for Urbis operations.

use std::io;
use thiserror::Error;

/// Errors surfaced by the Urbis spatial index.
///
/// Every fallible operation in the crate returns one of these kinds; there
/// are no panics on the public surface and no partially constructed results.
#[derive(Debug, Error)]
pub enum UrbisError {
    /// Null/empty input where disallowed, malformed query box, zero k, etc.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Capacity exhaustion in a fixed-size structure.
    #[error("allocation failure: {0}")]
    Alloc(String),

    /// File open/read/write/seek failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed GeoJSON or WKT input.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Id absent in pool or tree, missing file, missing page slot.
    #[error("not found: {0}")]
    NotFound(String),

    /// Page at capacity after retry; bulk insert surfaces the first child error.
    #[error("full: {0}")]
    Full(String),

    /// Geometry rejected at construction (too few vertices, empty ring).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Header magic mismatch, impossible object count, checksum mismatch.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// File written by a newer, unknown format version.
    #[error("unsupported file version {found} (supported up to {supported})")]
    Version { found: u32, supported: u32 },

    /// Recognised but unimplemented input variant (e.g. WKT MULTIPOLYGON).
    #[error("unsupported input: {0}")]
    Unsupported(String),
}

impl UrbisError {
    /// Builds a parse error carrying a source position.
    pub fn parse_at(line: usize, column: usize, message: impl Into<String>) -> Self {
        UrbisError::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Result type for Urbis operations.
pub type UrbisResult<T> = Result<T, UrbisError>;
