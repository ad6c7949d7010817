//! Placeholder backend for platforms without ring support (IOCP is not
//! implemented). Construction fails; every operation reports
//! `Unsupported`.

use crate::{RingCqe, RingError, RingResult};

/// Always-unsupported event ring.
pub struct EventRing {
    _private: (),
}

impl EventRing {
    pub fn new(_sq_entries: u32) -> RingResult<Self> {
        Err(RingError::Unsupported)
    }

    pub fn pending(&self) -> u32 {
        0
    }

    pub fn prep_accept(&mut self, _fd: i32, _user_data: u32, _multishot: bool) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    /// # Safety
    ///
    /// Never runs; present for signature parity with the real backends.
    pub unsafe fn prep_recv(
        &mut self,
        _fd: i32,
        _buf: &mut [u8],
        _user_data: u32,
    ) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    pub fn prep_recv_provided(
        &mut self,
        _fd: i32,
        _group_id: u16,
        _user_data: u32,
        _multishot: bool,
    ) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    /// # Safety
    ///
    /// Never runs; present for signature parity with the real backends.
    pub unsafe fn prep_send(&mut self, _fd: i32, _buf: &[u8], _user_data: u32) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    /// # Safety
    ///
    /// Never runs; present for signature parity with the real backends.
    pub unsafe fn prep_send_zc(&mut self, _fd: i32, _buf: &[u8], _user_data: u32) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    pub fn prep_connect(
        &mut self,
        _fd: i32,
        _addr: std::net::SocketAddr,
        _user_data: u32,
    ) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    pub fn prep_close(&mut self, _fd: i32, _user_data: u32) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    pub fn submit(&mut self) -> RingResult<u32> {
        Err(RingError::Unsupported)
    }

    pub fn complete(
        &mut self,
        _out: &mut [RingCqe],
        _wait_min: u32,
        _timeout_ms: u32,
    ) -> RingResult<usize> {
        Err(RingError::Unsupported)
    }

    pub fn register_buffers(
        &mut self,
        _group_id: u16,
        _buf_count: u32,
        _buf_size: u32,
    ) -> RingResult<()> {
        Err(RingError::Unsupported)
    }

    pub fn buf_bytes(&self, _group_id: u16, _buf_id: u16, _len: usize) -> RingResult<&[u8]> {
        Err(RingError::Unsupported)
    }

    pub fn buf_return(&mut self, _group_id: u16, _buf_id: u16) -> RingResult<()> {
        Err(RingError::Unsupported)
    }
}
