//! Error taxonomy for the dump-stream engine.
//!
//! Parsing and encoding failures are ordinary `DumpError`s. Rule violations
//! that mean the ruleset is incoherent with the loaded repository (a filter
//! that would break ancestry, a retrofit target that is a branch, a sorted
//! node-list insertion that would duplicate a key, an impossible root
//! operation) are *not* represented here — they are panics, since they
//! indicate a bug in the user's rules rather than a recoverable error.

use thiserror::Error;

/// Errors produced while parsing or encoding a dump stream.
#[derive(Debug, Error)]
pub enum DumpError {
    /// An optional header/field was absent. Distinguished from corruption so
    /// callers can treat absence as "zero" rather than a hard failure.
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("missing newline {0}")]
    MissingNewline(&'static str),

    #[error("invalid header line: {0}")]
    InvalidHeader(String),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("dump file has windows (CRLF) line endings")]
    WindowsLineEndings,

    #[error("{path}: invalid Node-action: {action}")]
    UnknownNodeAction { path: String, action: String },

    #[error("{path}: invalid Node-kind: {kind}")]
    UnknownNodeKind { path: String, kind: String },

    #[error("duplicate property: {0}")]
    DuplicateProperty(String),

    #[error("dump format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: u32, found: u32 },

    #[error("dump UUID mismatch: expected {expected}, found {found}")]
    UuidMismatch { expected: String, found: String },

    #[error("non-sequential revision: expected {expected}, found {found}")]
    NonSequentialRevision { expected: i64, found: i64 },

    #[error("content-length mismatch: expected {expected}, found {found}")]
    ContentLengthMismatch { expected: u64, found: u64 },

    #[error("invalid integer in {context}: {source}")]
    InvalidInteger {
        context: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DumpError>;
