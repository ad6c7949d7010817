//! kqueue backend (macOS/BSD): readiness emulated as completion.
//!
//! kqueue reports readiness, not completion, so the actual syscall happens
//! at harvest time: an accept filter firing triggers `accept(2)`, a recv
//! filter triggers `recv(2)`, a connect filter checks
//! `getsockopt(SO_ERROR)`. Multishot is emulated by leaving edge-triggered
//! filters installed and reporting `MORE` on each completion; zero-copy
//! send degrades silently to a plain send.

use crate::pool::FreeStack;
use crate::{last_errno, RingCqe, RingError, RingOp, RingResult, CQE_F_BUFFER, CQE_F_MORE};
use std::os::fd::RawFd;

/// Metadata for one pending operation, keyed by (fd, user_data).
struct KqOp {
    fd: RawFd,
    user_data: u32,
    op_type: RingOp,
    /// Buffer group for provided-buffer recv; 0 means a caller buffer.
    group_id: u16,
    multishot: bool,
    /// Caller-owned recv buffer.
    recv_buf: Option<(*mut u8, u32)>,
    /// Send payload.
    send_buf: Option<(*const u8, u32)>,
}

/// Provided-buffer pool: contiguous slots plus free-slot accounting.
struct KqBufRing {
    group_id: u16,
    storage: Vec<u8>,
    free: FreeStack,
    buf_size: u32,
}

/// The kqueue event ring.
pub struct EventRing {
    kq_fd: RawFd,
    /// Batched kevent changes, flushed by submit (and by complete).
    changelist: Vec<libc::kevent>,
    ops: Vec<KqOp>,
    bufrings: Vec<KqBufRing>,
    pending: u32,
}

fn kev(ident: RawFd, filter: i16, flags: u16, user_data: u32) -> libc::kevent {
    libc::kevent {
        ident: ident as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: user_data as usize as *mut libc::c_void,
    }
}

impl EventRing {
    pub fn new(_sq_entries: u32) -> RingResult<Self> {
        let kq_fd = unsafe { libc::kqueue() };
        if kq_fd < 0 {
            return Err(RingError::Os(last_errno()));
        }
        log::debug!("kqueue ready: fd {}", kq_fd);
        Ok(Self {
            kq_fd,
            changelist: Vec::with_capacity(64),
            ops: Vec::new(),
            bufrings: Vec::new(),
            pending: 0,
        })
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    fn store_op(&mut self, op: KqOp) {
        self.ops
            .retain(|o| !(o.fd == op.fd && o.user_data == op.user_data));
        self.ops.push(op);
        self.pending += 1;
    }

    pub fn prep_accept(&mut self, fd: RawFd, user_data: u32, multishot: bool) -> RingResult<()> {
        self.changelist.push(kev(
            fd,
            libc::EVFILT_READ,
            libc::EV_ADD | libc::EV_CLEAR,
            user_data,
        ));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Accept,
            group_id: 0,
            multishot,
            recv_buf: None,
            send_buf: None,
        });
        Ok(())
    }

    /// Queue a recv into a caller-owned buffer.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid and unmoved until the matching completion is
    /// harvested.
    pub unsafe fn prep_recv(&mut self, fd: RawFd, buf: &mut [u8], user_data: u32) -> RingResult<()> {
        self.changelist.push(kev(
            fd,
            libc::EVFILT_READ,
            libc::EV_ADD | libc::EV_ONESHOT,
            user_data,
        ));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Recv,
            group_id: 0,
            multishot: false,
            recv_buf: Some((buf.as_mut_ptr(), buf.len() as u32)),
            send_buf: None,
        });
        Ok(())
    }

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
        let mut flags = libc::EV_ADD | libc::EV_CLEAR;
        if !multishot {
            flags |= libc::EV_ONESHOT;
        }
        self.changelist
            .push(kev(fd, libc::EVFILT_READ, flags, user_data));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Recv,
            group_id,
            multishot,
            recv_buf: None,
            send_buf: None,
        });
        Ok(())
    }

    /// Queue a send.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid until the matching completion is harvested;
    /// the write happens when the socket reports readiness.
    pub unsafe fn prep_send(&mut self, fd: RawFd, buf: &[u8], user_data: u32) -> RingResult<()> {
        self.changelist.push(kev(
            fd,
            libc::EVFILT_WRITE,
            libc::EV_ADD | libc::EV_ONESHOT,
            user_data,
        ));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Send,
            group_id: 0,
            multishot: false,
            recv_buf: None,
            send_buf: Some((buf.as_ptr(), buf.len() as u32)),
        });
        Ok(())
    }

    /// Zero-copy send does not exist here; it degrades to a plain send.
    ///
    /// # Safety
    ///
    /// As [`prep_send`](Self::prep_send).
    pub unsafe fn prep_send_zc(&mut self, fd: RawFd, buf: &[u8], user_data: u32) -> RingResult<()> {
        self.prep_send(fd, buf, user_data)
    }

    pub fn prep_connect(
        &mut self,
        fd: RawFd,
        addr: std::net::SocketAddr,
        user_data: u32,
    ) -> RingResult<()> {
        // Kick off a non-blocking connect, then watch for writability.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags & libc::O_NONBLOCK == 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        let (storage, addrlen) = sockaddr_from(addr);
        let rc = unsafe {
            libc::connect(
                fd,
                &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
                addrlen,
            )
        };
        if rc != 0 {
            let errno = last_errno();
            if errno != libc::EINPROGRESS {
                return Err(RingError::Os(errno));
            }
        }
        self.changelist.push(kev(
            fd,
            libc::EVFILT_WRITE,
            libc::EV_ADD | libc::EV_ONESHOT,
            user_data,
        ));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Connect,
            group_id: 0,
            multishot: false,
            recv_buf: None,
            send_buf: None,
        });
        Ok(())
    }

    pub fn prep_close(&mut self, fd: RawFd, user_data: u32) -> RingResult<()> {
        self.changelist.push(kev(
            fd,
            libc::EVFILT_READ,
            libc::EV_ADD | libc::EV_ONESHOT,
            user_data,
        ));
        self.store_op(KqOp {
            fd,
            user_data,
            op_type: RingOp::Close,
            group_id: 0,
            multishot: false,
            recv_buf: None,
            send_buf: None,
        });
        Ok(())
    }

    /// Flush the changelist without harvesting.
    pub fn submit(&mut self) -> RingResult<u32> {
        if self.changelist.is_empty() {
            return Ok(0);
        }
        let rc = unsafe {
            libc::kevent(
                self.kq_fd,
                self.changelist.as_ptr(),
                self.changelist.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        let submitted = self.changelist.len() as u32;
        self.changelist.clear();
        if rc < 0 {
            return Err(RingError::Os(last_errno()));
        }
        Ok(submitted)
    }

    /// Harvest completions, converting readiness to completion by doing
    /// the syscall now.
    pub fn complete(
        &mut self,
        out: &mut [RingCqe],
        wait_min: u32,
        timeout_ms: u32,
    ) -> RingResult<usize> {
        let mut events = vec![unsafe { std::mem::zeroed::<libc::kevent>() }; out.len().min(64)];
        let ts = libc::timespec {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_nsec: (timeout_ms % 1000) as libc::c_long * 1_000_000,
        };
        let tsp: *const libc::timespec = if timeout_ms > 0 || wait_min == 0 {
            &ts
        } else {
            std::ptr::null()
        };

        let rc = unsafe {
            libc::kevent(
                self.kq_fd,
                self.changelist.as_ptr(),
                self.changelist.len() as i32,
                events.as_mut_ptr(),
                events.len() as i32,
                tsp,
            )
        };
        self.changelist.clear();
        if rc < 0 {
            return Err(RingError::Os(last_errno()));
        }

        let mut count = 0usize;
        for event in events.iter().take(rc as usize) {
            if count >= out.len() {
                break;
            }
            let fd = event.ident as RawFd;
            let Some(idx) = self.lookup_op(fd, event.filter) else {
                continue;
            };
            if let Some(cqe) = self.perform(idx) {
                out[count] = cqe;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Find the pending op matching a fired filter.
    fn lookup_op(&self, fd: RawFd, filter: i16) -> Option<usize> {
        self.ops.iter().position(|op| {
            op.fd == fd
                && match filter {
                    libc::EVFILT_READ => {
                        matches!(op.op_type, RingOp::Accept | RingOp::Recv | RingOp::Close)
                    }
                    libc::EVFILT_WRITE => matches!(
                        op.op_type,
                        RingOp::Send | RingOp::SendZc | RingOp::Connect
                    ),
                    _ => false,
                }
        })
    }

    /// Run the deferred syscall for op `idx` and build its CQE.
    fn perform(&mut self, idx: usize) -> Option<RingCqe> {
        let (fd, user_data, op_type, group_id, multishot, recv_buf, send_buf) = {
            let op = &self.ops[idx];
            (
                op.fd,
                op.user_data,
                op.op_type,
                op.group_id,
                op.multishot,
                op.recv_buf,
                op.send_buf,
            )
        };

        let mut cqe = RingCqe {
            result: 0,
            user_data,
            buffer_id: 0,
            flags: 0,
            op_type: op_type as u8,
        };

        let mut done = true;
        match op_type {
            RingOp::Accept => {
                let mut sa: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
                let mut salen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
                let client = unsafe {
                    libc::accept(fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut salen)
                };
                cqe.result = if client < 0 { -last_errno() } else { client };
                if multishot {
                    // EV_CLEAR keeps the filter armed.
                    cqe.flags |= CQE_F_MORE;
                    done = false;
                }
            }
            RingOp::Recv | RingOp::RecvZc => {
                let bytes = if group_id != 0 {
                    match self.alloc_buffer(group_id) {
                        Some((bid, ptr, len)) => {
                            cqe.buffer_id = bid;
                            cqe.flags |= CQE_F_BUFFER;
                            unsafe { libc::recv(fd, ptr as *mut libc::c_void, len as usize, 0) }
                        }
                        None => {
                            cqe.result = -libc::ENOMEM;
                            self.finish_op(idx);
                            return Some(cqe);
                        }
                    }
                } else if let Some((ptr, len)) = recv_buf {
                    unsafe { libc::recv(fd, ptr as *mut libc::c_void, len as usize, 0) }
                } else {
                    cqe.result = -libc::EINVAL;
                    self.finish_op(idx);
                    return Some(cqe);
                };
                cqe.result = if bytes < 0 { -last_errno() } else { bytes as i32 };
                if multishot && bytes > 0 {
                    cqe.flags |= CQE_F_MORE;
                    done = false;
                }
            }
            RingOp::Send | RingOp::SendZc => {
                let Some((ptr, len)) = send_buf else {
                    cqe.result = -libc::EINVAL;
                    self.finish_op(idx);
                    return Some(cqe);
                };
                let bytes =
                    unsafe { libc::send(fd, ptr as *const libc::c_void, len as usize, 0) };
                cqe.result = if bytes < 0 { -last_errno() } else { bytes as i32 };
            }
            RingOp::Connect => {
                let mut err: libc::c_int = 0;
                let mut errlen = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
                unsafe {
                    libc::getsockopt(
                        fd,
                        libc::SOL_SOCKET,
                        libc::SO_ERROR,
                        &mut err as *mut _ as *mut libc::c_void,
                        &mut errlen,
                    );
                }
                cqe.result = -err;
            }
            RingOp::Close => {
                let ret = unsafe { libc::close(fd) };
                cqe.result = if ret < 0 { -last_errno() } else { 0 };
            }
        }

        if done {
            self.finish_op(idx);
        }
        Some(cqe)
    }

    fn finish_op(&mut self, idx: usize) {
        self.ops.remove(idx);
        self.pending = self.pending.saturating_sub(1);
    }

    fn alloc_buffer(&mut self, group_id: u16) -> Option<(u16, *mut u8, u32)> {
        let bufring = self.bufrings.iter_mut().find(|b| b.group_id == group_id)?;
        let bid = bufring.free.alloc()?;
        let offset = bid as usize * bufring.buf_size as usize;
        Some((
            bid,
            bufring.storage[offset..].as_mut_ptr(),
            bufring.buf_size,
        ))
    }

    /// Register a provided-buffer group.
    pub fn register_buffers(
        &mut self,
        group_id: u16,
        buf_count: u32,
        buf_size: u32,
    ) -> RingResult<()> {
        self.bufrings.push(KqBufRing {
            group_id,
            storage: vec![0; buf_count as usize * buf_size as usize],
            free: FreeStack::new(buf_count as u16),
            buf_size,
        });
        Ok(())
    }

    /// Read-only view of one buffer slot.
    pub fn buf_bytes(&self, group_id: u16, buf_id: u16, len: usize) -> RingResult<&[u8]> {
        let bufring = self
            .bufrings
            .iter()
            .find(|b| b.group_id == group_id)
            .ok_or(RingError::UnknownGroup(group_id))?;
        let offset = buf_id as usize * bufring.buf_size as usize;
        let len = len.min(bufring.buf_size as usize);
        Ok(&bufring.storage[offset..offset + len])
    }

    /// Return a slot to its group.
    pub fn buf_return(&mut self, group_id: u16, buf_id: u16) -> RingResult<()> {
        let bufring = self
            .bufrings
            .iter_mut()
            .find(|b| b.group_id == group_id)
            .ok_or(RingError::UnknownGroup(group_id))?;
        bufring.free.free(buf_id);
        Ok(())
    }
}

impl Drop for EventRing {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq_fd);
        }
    }
}

/// Convert a std socket address to its C representation.
fn sockaddr_from(addr: std::net::SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    match addr {
        std::net::SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_len: std::mem::size_of::<libc::sockaddr_in>() as u8,
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
                sin6_len: std::mem::size_of::<libc::sockaddr_in6>() as u8,
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
