//! Native code generation.
//!
//! Emission treats the IR as a stack machine over virtual FP registers:
//! each operand evaluation pushes one value, each binary op pops two and
//! pushes one. At most eight values may be live at once. A pre-scan refuses
//! any trace whose ops fall outside the double-arithmetic kernel set; the
//! refusal is recorded by the hot map so lowering never reruns.
//!
//! The native contract is `fn(env) -> atom`: the environment pointer goes
//! in the first argument register, the boxed result comes back as an owned
//! atom pointer produced by `atom_from_double`.

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "x86_64")]
mod x86_64;

use crate::arena::ExecArena;
use crate::error::JitResult;
use crate::ir::{Op, Trace};
use guage_atom::{AtomData, EnvData};

/// Signature of an installed trace.
pub type NativeFn = unsafe extern "C" fn(*const EnvData) -> *mut AtomData;

/// Installed native code for one trace.
#[derive(Clone, Copy)]
pub struct NativeCode {
    entry: NativeFn,
    len: usize,
}

impl NativeCode {
    /// Run the trace against `env`.
    ///
    /// # Safety
    ///
    /// `env` must point to a live environment frame; the returned pointer
    /// must be reclaimed exactly once with `Atom::from_raw`.
    #[inline]
    pub unsafe fn call(&self, env: *const EnvData) -> *mut AtomData {
        (self.entry)(env)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Why code generation declined a trace. Not an error; the expression just
/// stays on the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refusal(pub &'static str);

/// Maximum simultaneously live values in a trace.
pub const MAX_LIVE: usize = 8;

/// Check that every op is in the supported kernel set and that the value
/// stack stays within bounds. Shared by all backends.
fn scan(trace: &Trace) -> Result<(), Refusal> {
    if trace.insts().is_empty() {
        return Err(Refusal("empty trace"));
    }
    let mut depth: usize = 0;
    for inst in trace.insts() {
        match inst.op {
            Op::ConstNum | Op::EnvLoad => {
                depth += 1;
                if depth > MAX_LIVE {
                    return Err(Refusal("more than 8 live values"));
                }
            }
            Op::AddDd | Op::SubDd | Op::MulDd | Op::DivDd => {
                if depth < 2 {
                    return Err(Refusal("operand stack underflow"));
                }
                depth -= 1;
            }
            Op::Ret => {}
            // An integer constant would have to widen onto the FP stack
            // and box back as a number, changing the result tag a cold
            // run would produce. Refused until an integer register class
            // is worth the spill machinery.
            Op::ConstInt => return Err(Refusal("integer constants stay on the interpreter")),
            _ => return Err(Refusal("unsupported operation")),
        }
    }
    if depth == 0 {
        return Err(Refusal("trace produces no value"));
    }
    Ok(())
}

/// Generate and install native code for `trace`.
///
/// `Ok(Err(refusal))` is the benign fallback; the outer error is reserved
/// for arena exhaustion and platform failures.
pub fn codegen(trace: &Trace, arena: &mut ExecArena) -> JitResult<Result<NativeCode, Refusal>> {
    if let Err(refusal) = scan(trace) {
        return Ok(Err(refusal));
    }

    let buf = match emit(trace) {
        Ok(buf) => buf,
        Err(refusal) => return Ok(Err(refusal)),
    };

    let ptr = arena.install(buf.as_slice())?;
    // The buffer holds a complete function body starting at offset 0.
    let entry: NativeFn = unsafe { std::mem::transmute(ptr) };
    Ok(Ok(NativeCode {
        entry,
        len: buf.len(),
    }))
}

#[cfg(target_arch = "aarch64")]
use aarch64::emit;
#[cfg(target_arch = "x86_64")]
use x86_64::emit;

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
fn emit(_trace: &Trace) -> Result<crate::emit::CodeBuf, Refusal> {
    Err(Refusal("unsupported architecture"))
}
