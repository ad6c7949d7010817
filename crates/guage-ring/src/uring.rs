//! io_uring backend (Linux), direct syscalls.
//!
//! The submission and completion queues are mmap'd from the ring fd; the
//! producer side is single-threaded, so only the kernel-facing head/tail
//! words use acquire/release. Provided buffers go through kernel-shared
//! buffer rings registered with `IORING_REGISTER_PBUF_RING`; on a
//! provided-buffer completion the buffer id rides the CQE flags.

use crate::uring_sys::*;
use crate::{last_errno, RingCqe, RingError, RingOp, RingResult, CQE_F_BUFFER, CQE_F_MORE};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

struct MmapRegion {
    ptr: *mut u8,
    len: usize,
}

impl MmapRegion {
    fn map(len: usize, fd: RawFd, offset: i64) -> RingResult<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RingError::Os(last_errno()));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn map_anon(len: usize) -> RingResult<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RingError::Os(last_errno()));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    unsafe fn at<T>(&self, byte_offset: u32) -> *mut T {
        self.ptr.add(byte_offset as usize) as *mut T
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// Submission bookkeeping: op kind for CQE reporting, plus owned pointees
/// the kernel reads after submit returns.
struct PendingOp {
    user_data: u32,
    op_type: u8,
    multishot: bool,
    /// Keeps the sockaddr alive across an async connect.
    _addr: Option<Box<libc::sockaddr_storage>>,
}

/// One kernel-shared provided-buffer ring plus its backing pool.
struct BufRing {
    group_id: u16,
    pool: MmapRegion,
    ring: MmapRegion,
    buf_count: u32,
    buf_size: u32,
}

impl BufRing {
    /// The ring tail lives in the `resv` half-word of entry 0.
    fn tail(&self) -> &AtomicU16 {
        unsafe { &*(self.ring.ptr.add(14) as *const AtomicU16) }
    }

    fn entries(&self) -> *mut io_uring_buf {
        self.ring.ptr as *mut io_uring_buf
    }

    fn push(&self, buf_id: u16) {
        let tail = self.tail().load(Ordering::Acquire);
        let idx = (tail as u32 & (self.buf_count - 1)) as usize;
        unsafe {
            let entry = self.entries().add(idx);
            (*entry).addr = self.pool.ptr.add(buf_id as usize * self.buf_size as usize) as u64;
            (*entry).len = self.buf_size;
            (*entry).bid = buf_id;
        }
        self.tail().store(tail.wrapping_add(1), Ordering::Release);
    }
}

/// The Linux event ring.
pub struct EventRing {
    ring_fd: RawFd,
    _sq_ring: MmapRegion,
    _cq_ring: MmapRegion,
    sqes: MmapRegion,
    sq_head: *const AtomicU32,
    sq_tail: *const AtomicU32,
    sq_array: *mut u32,
    sq_mask: u32,
    cq_head: *const AtomicU32,
    cq_tail: *const AtomicU32,
    cqes_ptr: *const io_uring_cqe,
    cq_mask: u32,
    sq_entries: u32,
    /// SQEs queued since the last submit.
    to_submit: u32,
    /// In-flight operations.
    pending: u32,
    ops: Vec<PendingOp>,
    bufrings: Vec<BufRing>,
}

impl EventRing {
    /// Set up a ring with `sq_entries` submission slots.
    pub fn new(sq_entries: u32) -> RingResult<Self> {
        let mut params = io_uring_params::default();
        let ring_fd = unsafe { io_uring_setup(sq_entries, &mut params) };
        if ring_fd < 0 {
            return Err(RingError::Os(last_errno()));
        }

        let sq_ring_len =
            params.sq_off.array as usize + params.sq_entries as usize * std::mem::size_of::<u32>();
        let sq_ring = MmapRegion::map(sq_ring_len, ring_fd, IORING_OFF_SQ_RING)?;

        let cq_ring_len = params.cq_off.cqes as usize
            + params.cq_entries as usize * std::mem::size_of::<io_uring_cqe>();
        let cq_ring = MmapRegion::map(cq_ring_len, ring_fd, IORING_OFF_CQ_RING)?;

        let sqes_len = params.sq_entries as usize * std::mem::size_of::<io_uring_sqe>();
        let sqes = MmapRegion::map(sqes_len, ring_fd, IORING_OFF_SQES)?;

        log::debug!(
            "io_uring ready: {} sq entries, {} cq entries",
            params.sq_entries,
            params.cq_entries
        );

        unsafe {
            Ok(Self {
                ring_fd,
                sq_head: sq_ring.at::<AtomicU32>(params.sq_off.head),
                sq_tail: sq_ring.at::<AtomicU32>(params.sq_off.tail),
                sq_array: sq_ring.at::<u32>(params.sq_off.array),
                sq_mask: *sq_ring.at::<u32>(params.sq_off.ring_mask),
                cq_head: cq_ring.at::<AtomicU32>(params.cq_off.head),
                cq_tail: cq_ring.at::<AtomicU32>(params.cq_off.tail),
                cqes_ptr: cq_ring.at::<io_uring_cqe>(params.cq_off.cqes),
                cq_mask: *cq_ring.at::<u32>(params.cq_off.ring_mask),
                sq_entries: params.sq_entries,
                to_submit: 0,
                pending: 0,
                ops: Vec::new(),
                bufrings: Vec::new(),
                _sq_ring: sq_ring,
                _cq_ring: cq_ring,
                sqes,
            })
        }
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    fn track(&mut self, user_data: u32, op_type: RingOp, multishot: bool) {
        self.track_with_addr(user_data, op_type, multishot, None);
    }

    fn track_with_addr(
        &mut self,
        user_data: u32,
        op_type: RingOp,
        multishot: bool,
        addr: Option<Box<libc::sockaddr_storage>>,
    ) {
        // One record per user_data; resubmission replaces.
        self.ops.retain(|op| op.user_data != user_data);
        self.ops.push(PendingOp {
            user_data,
            op_type: op_type as u8,
            multishot,
            _addr: addr,
        });
        self.pending += 1;
    }

    /// Next free SQE, zeroed, or `QueueFull`.
    fn get_sqe(&mut self) -> RingResult<&mut io_uring_sqe> {
        let head = unsafe { (*self.sq_head).load(Ordering::Acquire) };
        let tail = unsafe { (*self.sq_tail).load(Ordering::Relaxed) };
        if tail.wrapping_sub(head) >= self.sq_entries {
            return Err(RingError::QueueFull);
        }
        let idx = (tail & self.sq_mask) as usize;
        unsafe {
            let sqe = (self.sqes.ptr as *mut io_uring_sqe).add(idx);
            *sqe = io_uring_sqe::default();
            Ok(&mut *sqe)
        }
    }

    /// Publish the SQE written at the current tail.
    fn advance_sq(&mut self) {
        let tail = unsafe { (*self.sq_tail).load(Ordering::Relaxed) };
        unsafe {
            *self.sq_array.add((tail & self.sq_mask) as usize) = tail & self.sq_mask;
            (*self.sq_tail).store(tail.wrapping_add(1), Ordering::Release);
        }
        self.to_submit += 1;
    }

    /// Queue an accept, optionally multishot.
    pub fn prep_accept(&mut self, fd: RawFd, user_data: u32, multishot: bool) -> RingResult<()> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_ACCEPT;
        sqe.fd = fd;
        sqe.user_data = user_data as u64;
        if multishot {
            sqe.ioprio = IORING_ACCEPT_MULTISHOT;
        }
        self.advance_sq();
        self.track(user_data, RingOp::Accept, multishot);
        Ok(())
    }

    /// Queue a recv into a caller-owned buffer.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid and unmoved until the matching completion is
    /// harvested; the kernel writes into it asynchronously.
    pub unsafe fn prep_recv(&mut self, fd: RawFd, buf: &mut [u8], user_data: u32) -> RingResult<()> {
        let (ptr, len) = (buf.as_mut_ptr(), buf.len() as u32);
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_RECV;
        sqe.fd = fd;
        sqe.addr = ptr as u64;
        sqe.len = len;
        sqe.user_data = user_data as u64;
        self.advance_sq();
        self.track(user_data, RingOp::Recv, false);
        Ok(())
    }

    /// Queue a recv that picks a slot from a registered buffer group. The
    /// chosen slot arrives in the CQE with the `BUFFER` flag.
    pub fn prep_recv_provided(
        &mut self,
        fd: RawFd,
        group_id: u16,
        user_data: u32,
        multishot: bool,
    ) -> RingResult<()> {
        if !self.bufrings.iter().any(|b| b.group_id == group_id) {
            return Err(RingError::UnknownGroup(group_id));
        }
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_RECV;
        sqe.fd = fd;
        sqe.len = 0;
        sqe.user_data = user_data as u64;
        sqe.buf_group = group_id;
        sqe.flags = IOSQE_BUFFER_SELECT;
        if multishot {
            sqe.ioprio = IORING_RECV_MULTISHOT;
        }
        self.advance_sq();
        self.track(user_data, RingOp::Recv, multishot);
        Ok(())
    }

    /// Queue a send.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid until the matching completion is harvested.
    pub unsafe fn prep_send(&mut self, fd: RawFd, buf: &[u8], user_data: u32) -> RingResult<()> {
        let (ptr, len) = (buf.as_ptr(), buf.len() as u32);
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_SEND;
        sqe.fd = fd;
        sqe.addr = ptr as u64;
        sqe.len = len;
        sqe.user_data = user_data as u64;
        self.advance_sq();
        self.track(user_data, RingOp::Send, false);
        Ok(())
    }

    /// Queue a zero-copy send (kernel 6.0+).
    ///
    /// # Safety
    ///
    /// As [`prep_send`](Self::prep_send); with zero copy the kernel may
    /// read the buffer even later, until the notification CQE.
    pub unsafe fn prep_send_zc(&mut self, fd: RawFd, buf: &[u8], user_data: u32) -> RingResult<()> {
        let (ptr, len) = (buf.as_ptr(), buf.len() as u32);
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_SEND_ZC;
        sqe.fd = fd;
        sqe.addr = ptr as u64;
        sqe.len = len;
        sqe.user_data = user_data as u64;
        self.advance_sq();
        self.track(user_data, RingOp::SendZc, false);
        Ok(())
    }

    /// Queue a connect to `addr`.
    pub fn prep_connect(
        &mut self,
        fd: RawFd,
        addr: std::net::SocketAddr,
        user_data: u32,
    ) -> RingResult<()> {
        let (storage, addrlen) = sockaddr_from(addr);
        let storage = Box::new(storage);
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_CONNECT;
        sqe.fd = fd;
        sqe.addr = &*storage as *const libc::sockaddr_storage as u64;
        sqe.off = addrlen as u64;
        sqe.user_data = user_data as u64;
        self.advance_sq();
        self.track_with_addr(user_data, RingOp::Connect, false, Some(storage));
        Ok(())
    }

    /// Queue a close of `fd`.
    pub fn prep_close(&mut self, fd: RawFd, user_data: u32) -> RingResult<()> {
        let sqe = self.get_sqe()?;
        sqe.opcode = IORING_OP_CLOSE;
        sqe.fd = fd;
        sqe.user_data = user_data as u64;
        self.advance_sq();
        self.track(user_data, RingOp::Close, false);
        Ok(())
    }

    /// Flush queued submissions to the kernel. Returns how many entries
    /// were handed over.
    pub fn submit(&mut self) -> RingResult<u32> {
        if self.to_submit == 0 {
            return Ok(0);
        }
        let ret = unsafe {
            io_uring_enter(self.ring_fd, self.to_submit, 0, 0, std::ptr::null(), 0)
        };
        if ret < 0 {
            return Err(RingError::Os(last_errno()));
        }
        let submitted = self.to_submit;
        self.to_submit = 0;
        Ok(submitted)
    }

    /// Harvest up to `out.len()` completions. Blocks for at least
    /// `wait_min` completions when nonzero, bounded by `timeout_ms`
    /// (0 = no timeout). A timeout yields `Ok(0)`.
    pub fn complete(
        &mut self,
        out: &mut [RingCqe],
        wait_min: u32,
        timeout_ms: u32,
    ) -> RingResult<usize> {
        if wait_min > 0 {
            let ret = if timeout_ms > 0 {
                let ts = __kernel_timespec {
                    tv_sec: (timeout_ms / 1000) as i64,
                    tv_nsec: (timeout_ms % 1000) as i64 * 1_000_000,
                };
                let arg = io_uring_getevents_arg {
                    ts: &ts as *const __kernel_timespec as u64,
                    ..Default::default()
                };
                unsafe {
                    io_uring_enter(
                        self.ring_fd,
                        0,
                        wait_min,
                        IORING_ENTER_GETEVENTS | IORING_ENTER_EXT_ARG,
                        &arg as *const io_uring_getevents_arg as *const libc::c_void,
                        std::mem::size_of::<io_uring_getevents_arg>(),
                    )
                }
            } else {
                unsafe {
                    io_uring_enter(
                        self.ring_fd,
                        0,
                        wait_min,
                        IORING_ENTER_GETEVENTS,
                        std::ptr::null(),
                        0,
                    )
                }
            };
            if ret < 0 {
                let errno = last_errno();
                // A timed-out wait is not an error; the queue drain below
                // reports whatever arrived.
                if errno != libc::ETIME && errno != libc::EINTR {
                    return Err(RingError::Os(errno));
                }
            }
        }

        let mut head = unsafe { (*self.cq_head).load(Ordering::Acquire) };
        let tail = unsafe { (*self.cq_tail).load(Ordering::Acquire) };
        let mut count = 0usize;

        while head != tail && count < out.len() {
            let cqe = unsafe { &*self.cqes_ptr.add((head & self.cq_mask) as usize) };
            let user_data = cqe.user_data as u32;

            let mut flags = 0u8;
            let mut buffer_id = 0u16;
            if cqe.flags & IORING_CQE_F_MORE != 0 {
                flags |= CQE_F_MORE;
            }
            if cqe.flags & IORING_CQE_F_BUFFER != 0 {
                flags |= CQE_F_BUFFER;
                buffer_id = (cqe.flags >> IORING_CQE_BUFFER_SHIFT) as u16;
            }

            // The kernel does not echo the opcode; report it from the
            // submission record.
            let op_type = self
                .ops
                .iter()
                .find(|op| op.user_data == user_data)
                .map(|op| op.op_type)
                .unwrap_or(0);

            out[count] = RingCqe {
                result: cqe.res,
                user_data,
                buffer_id,
                flags,
                op_type,
            };

            if flags & CQE_F_MORE == 0 {
                if let Some(idx) = self.ops.iter().position(|op| op.user_data == user_data) {
                    self.ops.remove(idx);
                }
                self.pending = self.pending.saturating_sub(1);
            }

            head = head.wrapping_add(1);
            count += 1;
        }

        unsafe {
            (*self.cq_head).store(head, Ordering::Release);
        }
        Ok(count)
    }

    /// Register a provided-buffer group: `buf_count` (power of two) slots
    /// of `buf_size` bytes each, all initially free.
    pub fn register_buffers(
        &mut self,
        group_id: u16,
        buf_count: u32,
        buf_size: u32,
    ) -> RingResult<()> {
        debug_assert!(buf_count.is_power_of_two());
        let pool = MmapRegion::map_anon(buf_count as usize * buf_size as usize)?;

        let page = 4096usize;
        let ring_len =
            (buf_count as usize * std::mem::size_of::<io_uring_buf>() + page - 1) & !(page - 1);
        let ring = MmapRegion::map_anon(ring_len)?;

        let reg = io_uring_buf_reg {
            ring_addr: ring.ptr as u64,
            ring_entries: buf_count,
            bgid: group_id,
            ..Default::default()
        };
        let ret = unsafe {
            io_uring_register(
                self.ring_fd,
                IORING_REGISTER_PBUF_RING,
                &reg as *const io_uring_buf_reg as *const libc::c_void,
                1,
            )
        };
        if ret < 0 {
            return Err(RingError::Os(last_errno()));
        }

        let bufring = BufRing {
            group_id,
            pool,
            ring,
            buf_count,
            buf_size,
        };
        // Hand every slot to the kernel.
        for bid in 0..buf_count as u16 {
            bufring.push(bid);
        }
        self.bufrings.push(bufring);
        Ok(())
    }

    fn bufring(&self, group_id: u16) -> RingResult<&BufRing> {
        self.bufrings
            .iter()
            .find(|b| b.group_id == group_id)
            .ok_or(RingError::UnknownGroup(group_id))
    }

    /// Read-only view of one buffer slot.
    pub fn buf_bytes(&self, group_id: u16, buf_id: u16, len: usize) -> RingResult<&[u8]> {
        let bufring = self.bufring(group_id)?;
        if buf_id as u32 >= bufring.buf_count {
            return Err(RingError::UnknownGroup(group_id));
        }
        let len = len.min(bufring.buf_size as usize);
        unsafe {
            Ok(std::slice::from_raw_parts(
                bufring
                    .pool
                    .ptr
                    .add(buf_id as usize * bufring.buf_size as usize),
                len,
            ))
        }
    }

    /// Return a slot to its group so the kernel can pick it again.
    pub fn buf_return(&mut self, group_id: u16, buf_id: u16) -> RingResult<()> {
        let bufring = self.bufring(group_id)?;
        if buf_id as u32 >= bufring.buf_count {
            return Ok(());
        }
        bufring.push(buf_id);
        Ok(())
    }
}

impl Drop for EventRing {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.ring_fd);
        }
    }
}

/// Convert a std socket address to its C representation.
fn sockaddr_from(addr: std::net::SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    match addr {
        std::net::SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        std::net::SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}
