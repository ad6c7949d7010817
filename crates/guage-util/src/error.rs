//! Core error types for guage-util.

use thiserror::Error;

/// Errors from the symbol interner.
///
/// Interner failures are resource exhaustion and are fatal to the process;
/// callers render one diagnostic and exit.
#[derive(Debug, Error)]
pub enum InternError {
    /// The 16-bit id space is used up.
    #[error("intern id space exhausted: {0} symbols")]
    IdSpaceExhausted(u32),
}

/// Errors from source map operations.
#[derive(Debug, Error)]
pub enum SourceMapError {
    /// No file covers the given byte position.
    #[error("no source file covers byte position {0}")]
    UnmappedPosition(u32),

    /// An interned span index points outside the interner table.
    #[error("interned span index {index} out of range (table has {count})")]
    BadSpanIndex { index: u32, count: u32 },
}

/// Result alias for interner operations.
pub type InternResult<T> = std::result::Result<T, InternError>;

/// Result alias for source map operations.
pub type SourceMapResult<T> = std::result::Result<T, SourceMapError>;
