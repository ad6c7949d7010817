//! JIT error types.

use thiserror::Error;

/// Fatal JIT resource errors. Codegen refusals are not errors; they are the
/// normal fallback path and carry a [`Refusal`](crate::codegen::Refusal).
#[derive(Debug, Error)]
pub enum JitError {
    /// mmap of the executable arena failed.
    #[error("failed to map executable arena: errno {0}")]
    MapFailed(i32),

    /// The bump arena has no room for another trace.
    #[error("executable arena full: {used}/{size} bytes used, {requested} requested")]
    ArenaFull {
        used: usize,
        size: usize,
        requested: usize,
    },

    /// No executable-memory support on this platform.
    #[error("executable memory is not supported on this platform")]
    UnsupportedPlatform,
}

pub type JitResult<T> = std::result::Result<T, JitError>;
