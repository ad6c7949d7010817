//! The executable code arena.
//!
//! One process-global bump allocator inside a single read/write/execute
//! mapping. All writes happen on the mutator thread. Platform hygiene:
//! Apple aarch64 maps with `MAP_JIT` and toggles the per-thread write
//! protection around emission, then invalidates the instruction cache for
//! the written range; other aarch64 systems clear the cache through the
//! compiler runtime; x86-64 needs no explicit invalidation.

use crate::error::{JitError, JitResult};

/// Default arena size: 16 MiB of code space.
pub const DEFAULT_ARENA_SIZE: usize = 16 * 1024 * 1024;

/// Bump allocator over an RWX mapping. Unmapped on drop.
pub struct ExecArena {
    base: *mut u8,
    size: usize,
    pos: usize,
}

#[cfg(unix)]
impl ExecArena {
    pub fn new(size: usize) -> JitResult<Self> {
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            flags |= libc::MAP_JIT;
        }
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(JitError::MapFailed(errno));
        }
        Ok(Self {
            base: base as *mut u8,
            size,
            pos: 0,
        })
    }

    /// Copy `code` into the arena and return the executable address.
    pub fn install(&mut self, code: &[u8]) -> JitResult<*const u8> {
        // 16-byte alignment for every entry point.
        let start = (self.pos + 15) & !15;
        if start + code.len() > self.size {
            return Err(JitError::ArenaFull {
                used: self.pos,
                size: self.size,
                requested: code.len(),
            });
        }
        let dst = unsafe { self.base.add(start) };
        jit_write_begin();
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
        }
        jit_write_end(dst, code.len());
        self.pos = start + code.len();
        Ok(dst as *const u8)
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(unix)]
impl Drop for ExecArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(not(unix))]
impl ExecArena {
    pub fn new(_size: usize) -> JitResult<Self> {
        Err(JitError::UnsupportedPlatform)
    }

    pub fn install(&mut self, _code: &[u8]) -> JitResult<*const u8> {
        Err(JitError::UnsupportedPlatform)
    }

    pub fn used(&self) -> usize {
        0
    }

    pub fn size(&self) -> usize {
        0
    }
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
extern "C" {
    fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
}

#[cfg(all(unix, target_arch = "aarch64", not(target_os = "macos")))]
extern "C" {
    fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
fn jit_write_begin() {
    unsafe {
        libc::pthread_jit_write_protect_np(0);
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
fn jit_write_begin() {}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
fn jit_write_end(code: *mut u8, len: usize) {
    unsafe {
        libc::pthread_jit_write_protect_np(1);
        sys_icache_invalidate(code as *mut libc::c_void, len);
    }
}

#[cfg(all(unix, target_arch = "aarch64", not(target_os = "macos")))]
fn jit_write_end(code: *mut u8, len: usize) {
    unsafe {
        __clear_cache(code as *mut libc::c_char, (code as *mut libc::c_char).add(len));
    }
}

#[cfg(not(all(unix, target_arch = "aarch64")))]
fn jit_write_end(_code: *mut u8, _len: usize) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn install_bumps_and_aligns() {
        let mut arena = ExecArena::new(4096).unwrap();
        let a = arena.install(&[0xC3; 5]).unwrap();
        let b = arena.install(&[0xC3; 5]).unwrap();
        assert_eq!(a as usize % 16, 0);
        assert_eq!(b as usize % 16, 0);
        assert_ne!(a, b);
        assert_eq!(arena.used(), 16 + 5);
    }

    #[test]
    fn exhaustion_reports_arena_full() {
        let mut arena = ExecArena::new(4096).unwrap();
        arena.install(&[0; 4000]).unwrap();
        let err = arena.install(&[0; 200]).unwrap_err();
        assert!(matches!(err, JitError::ArenaFull { .. }));
    }

    #[test]
    fn installed_bytes_are_readable() {
        let mut arena = ExecArena::new(4096).unwrap();
        let code = [0x11u8, 0x22, 0x33, 0x44];
        let ptr = arena.install(&code).unwrap();
        let back = unsafe { std::slice::from_raw_parts(ptr, code.len()) };
        assert_eq!(back, &code);
    }
}
