//! guage-ring - Platform-abstracted async I/O ring.
//!
//! One submission/completion surface over three backends:
//!
//! - Linux: io_uring through direct syscalls (no liburing), with mmap'd
//!   submission/completion queues, multishot accept/recv, zero-copy send,
//!   and kernel-shared provided-buffer rings.
//! - macOS/BSD: kqueue, with readiness converted to completions by
//!   performing the syscall at harvest time. Multishot is emulated with
//!   edge-triggered filters; zero-copy send degrades to a plain send.
//! - Elsewhere: every operation reports [`RingError::Unsupported`].
//!
//! Completions always arrive in the same shape, [`RingCqe`]. `user_data`
//! is opaque to the ring; callers use it as an operation tag.
//!
//! Backend skew is real and intentional: tests must not assume `MORE` is
//! set on every platform for the same op sequence.

mod pool;

#[cfg(target_os = "linux")]
mod uring;
#[cfg(target_os = "linux")]
mod uring_sys;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
mod kqueue;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd"
)))]
mod stub;

#[cfg(target_os = "linux")]
pub use uring::EventRing;

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub use kqueue::EventRing;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd"
)))]
pub use stub::EventRing;

pub use pool::FreeStack;

use thiserror::Error;

/// Multishot: more completions are coming for this submission.
pub const CQE_F_MORE: u8 = 0x01;
/// `buffer_id` is valid; the ring filled a provided buffer.
pub const CQE_F_BUFFER: u8 = 0x02;

/// Operation kinds, reported back in every CQE.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingOp {
    Accept = 0,
    Recv = 1,
    Send = 2,
    Connect = 3,
    Close = 4,
    RecvZc = 5,
    SendZc = 6,
}

impl RingOp {
    pub fn from_u8(raw: u8) -> Option<RingOp> {
        Some(match raw {
            0 => RingOp::Accept,
            1 => RingOp::Recv,
            2 => RingOp::Send,
            3 => RingOp::Connect,
            4 => RingOp::Close,
            5 => RingOp::RecvZc,
            6 => RingOp::SendZc,
            _ => return None,
        })
    }
}

/// Unified completion event.
///
/// `result` is bytes transferred, a new descriptor (accept), or a negated
/// errno on failure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingCqe {
    pub result: i32,
    pub user_data: u32,
    pub buffer_id: u16,
    pub flags: u8,
    pub op_type: u8,
}

impl RingCqe {
    #[inline]
    pub fn has_more(&self) -> bool {
        self.flags & CQE_F_MORE != 0
    }

    #[inline]
    pub fn has_buffer(&self) -> bool {
        self.flags & CQE_F_BUFFER != 0
    }

    #[inline]
    pub fn op(&self) -> Option<RingOp> {
        RingOp::from_u8(self.op_type)
    }
}

/// Ring errors. I/O failures of individual operations are reported as
/// negated errno in [`RingCqe::result`], not here.
#[derive(Debug, Error)]
pub enum RingError {
    /// A ring-level syscall failed.
    #[error("ring syscall failed: errno {0}")]
    Os(i32),

    /// The submission queue has no free entry.
    #[error("submission queue full")]
    QueueFull,

    /// No buffer group with that id is registered.
    #[error("unknown buffer group {0}")]
    UnknownGroup(u16),

    /// This platform has no ring backend.
    #[error("async I/O ring is not supported on this platform")]
    Unsupported,
}

pub type RingResult<T> = std::result::Result<T, RingError>;

#[cfg(unix)]
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
