//! guage-jit - Tiered compilation for hot expressions.
//!
//! The interpreter records a call count per expression; at the hot
//! threshold the expression is lowered to a small register IR and, when the
//! trace is a pure double-arithmetic kernel, emitted as native code into a
//! process-wide executable arena. Anything the backend cannot prove simple
//! stays on the interpreter, and native code that meets an unsupported
//! input at run time deoptimizes back to it without losing the result.
//!
//! The crate never calls back into the evaluator. Compilation takes
//! expressions in, execution hands results (or a deopt signal) out, and the
//! caller decides what re-interpretation means.

pub mod arena;
pub mod codegen;
pub mod emit;
pub mod error;
pub mod hot;
pub mod ir;
pub mod lower;
pub mod runtime;

pub use codegen::{NativeCode, Refusal};
pub use error::{JitError, JitResult};
pub use hot::{HotEntry, HotMap, HotState};
pub use ir::Trace;

use arena::{ExecArena, DEFAULT_ARENA_SIZE};
use guage_atom::{Atom, Env};

/// Calls before an expression is considered hot.
pub const DEFAULT_HOT_THRESHOLD: u32 = 100;

/// Counters for observability and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct JitStats {
    pub compiles: u64,
    pub refusals: u64,
    pub native_calls: u64,
    pub deopts: u64,
    pub code_bytes: usize,
    pub traces: usize,
}

/// Result of attempting a native execution.
#[derive(Debug)]
pub enum NativeOutcome {
    /// No native code for this expression; interpret.
    NoTrace,
    /// Native code ran to completion.
    Value(Atom),
    /// Native code hit an unsupported input; the caller re-interprets the
    /// expression.
    Deopted,
}

/// The tiered compiler for one interpreter instance.
pub struct Jit {
    hot: HotMap,
    arena: Option<ExecArena>,
    enabled: bool,
    threshold: u32,
    compiles: u64,
    refusals: u64,
    native_calls: u64,
    deopts: u64,
}

impl Jit {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_HOT_THRESHOLD)
    }

    /// Custom threshold; tests use small values to reach heat quickly.
    pub fn with_threshold(threshold: u32) -> Self {
        let arena = match ExecArena::new(DEFAULT_ARENA_SIZE) {
            Ok(arena) => Some(arena),
            Err(e) => {
                log::warn!("JIT disabled: {}", e);
                None
            }
        };
        Self {
            hot: HotMap::new(),
            enabled: arena.is_some(),
            arena,
            threshold: threshold.max(1),
            compiles: 0,
            refusals: 0,
            native_calls: 0,
            deopts: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn the tier off (or back on, when an arena exists).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled && self.arena.is_some();
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one call of `expr`. Crossing the threshold triggers exactly
    /// one compile attempt; refusals are sticky.
    pub fn record_call(&mut self, expr: &Atom) {
        if !self.enabled {
            return;
        }
        let threshold = self.threshold;
        let Some(arena) = self.arena.as_mut() else {
            return;
        };
        let Some(entry) = self.hot.record(expr) else {
            return;
        };
        if entry.count != threshold || !matches!(entry.state, HotState::Warming) {
            return;
        }

        let mut trace = lower::lower(entry.expr());
        match codegen::codegen(&trace, arena) {
            Ok(Ok(native)) => {
                log::debug!(
                    "compiled trace: {} insts, {} bytes",
                    trace.insts().len(),
                    native.len()
                );
                trace.set_native(native);
                self.compiles += 1;
                entry.state = HotState::Compiled {
                    trace,
                    deopted: false,
                };
            }
            Ok(Err(refusal)) => {
                log::debug!("codegen refused: {}", refusal.0);
                self.refusals += 1;
                entry.state = HotState::Refused;
            }
            Err(e) => {
                // Arena exhaustion or platform failure: stop tiering up.
                log::warn!("JIT disabled: {}", e);
                self.refusals += 1;
                entry.state = HotState::Refused;
                self.enabled = false;
            }
        }
    }

    /// Run `expr` natively when a compiled trace exists.
    pub fn try_execute(&mut self, expr: &Atom, env: &Env) -> NativeOutcome {
        if !self.enabled {
            return NativeOutcome::NoTrace;
        }
        let Some(entry) = self.hot.get_mut(expr) else {
            return NativeOutcome::NoTrace;
        };
        let HotState::Compiled { trace, deopted } = &mut entry.state else {
            return NativeOutcome::NoTrace;
        };
        let Some(native) = trace.native().copied() else {
            return NativeOutcome::NoTrace;
        };

        runtime::clear_deopt();
        // The environment handle outlives the call, and the returned
        // pointer is the one strong reference atom_from_double leaked.
        let raw = unsafe { native.call(env.as_ptr()) };
        trace.bump_exec();
        self.native_calls += 1;
        let result = unsafe { Atom::from_raw(raw) };

        if runtime::take_deopt() {
            *deopted = true;
            self.deopts += 1;
            drop(result);
            return NativeOutcome::Deopted;
        }
        NativeOutcome::Value(result)
    }

    /// Heat entry for `expr`, if it has been seen.
    pub fn entry_for(&self, expr: &Atom) -> Option<&HotEntry> {
        self.hot.get(expr)
    }

    pub fn stats(&self) -> JitStats {
        JitStats {
            compiles: self.compiles,
            refusals: self.refusals,
            native_calls: self.native_calls,
            deopts: self.deopts,
            code_bytes: self.arena.as_ref().map(ExecArena::used).unwrap_or(0),
            traces: self.hot.compiled_count(),
        }
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}
