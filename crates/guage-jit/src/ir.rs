//! The register IR traces are lowered to.
//!
//! Instructions have a fixed four-field header (opcode plus three 8-bit
//! register fields) and a 64-bit immediate. Registers come in three classes
//! of eight: doubles (0..8), integers (8..16), pointers (16..24).
//! Allocation is a monotonic counter per class; when a class runs out the
//! counter wraps to the class base. That loses values on long traces, which
//! is acceptable because code generation refuses anything long enough to
//! wrap; a spill pass would be the fix if that ever changes.

use guage_atom::Atom;

/// IR opcodes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Load a double constant from the immediate.
    ConstNum,
    /// Load an integer constant from the immediate.
    ConstInt,
    /// Load a boolean from the immediate.
    ConstBool,
    /// Load nil.
    ConstNil,
    /// Load a retained atom from the constant table.
    ConstCell,
    /// Load an environment slot by De Bruijn index.
    EnvLoad,
    AddDd,
    SubDd,
    MulDd,
    DivDd,
    ModDd,
    LtDd,
    LeDd,
    GtDd,
    GeDd,
    EqDd,
    Car,
    Cdr,
    Cons,
    /// Escape hatch: evaluate a constant-table expression through the
    /// interpreter.
    CallInterp,
    Ret,
}

/// 64-bit immediate payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Imm {
    None,
    Num(f64),
    Int(i64),
    /// Index into the trace's constant table.
    Const(u32),
    /// Environment load coordinates.
    Env { depth: u8, index: u8 },
}

/// One IR instruction.
#[derive(Clone, Copy, Debug)]
pub struct Inst {
    pub op: Op,
    pub dst: u8,
    pub src1: u8,
    pub src2: u8,
    pub imm: Imm,
}

impl Inst {
    pub fn new(op: Op, dst: u8, src1: u8, src2: u8) -> Self {
        Self {
            op,
            dst,
            src1,
            src2,
            imm: Imm::None,
        }
    }

    pub fn with_imm(op: Op, dst: u8, imm: Imm) -> Self {
        Self {
            op,
            dst,
            src1: 0,
            src2: 0,
            imm,
        }
    }
}

/// Base of the double register class.
pub const DREG_BASE: u8 = 0;
/// Base of the integer register class.
pub const IREG_BASE: u8 = 8;
/// Base of the pointer register class.
pub const PREG_BASE: u8 = 16;
/// Registers per class.
pub const REGS_PER_CLASS: u8 = 8;

/// Per-class monotonic register allocator with wrap-at-8.
#[derive(Default)]
pub struct RegAlloc {
    next_d: u8,
    next_i: u8,
    next_p: u8,
}

impl RegAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_d(&mut self) -> u8 {
        let r = DREG_BASE + self.next_d % REGS_PER_CLASS;
        self.next_d = self.next_d.wrapping_add(1);
        r
    }

    pub fn alloc_i(&mut self) -> u8 {
        let r = IREG_BASE + self.next_i % REGS_PER_CLASS;
        self.next_i = self.next_i.wrapping_add(1);
        r
    }

    pub fn alloc_p(&mut self) -> u8 {
        let r = PREG_BASE + self.next_p % REGS_PER_CLASS;
        self.next_p = self.next_p.wrapping_add(1);
        r
    }
}

/// Upper bound on constants retained by one trace.
pub const MAX_CONSTANTS: usize = 64;

/// A lowered expression: IR, retained constants, and (after codegen) native
/// code.
pub struct Trace {
    root: Atom,
    insts: Vec<Inst>,
    constants: Vec<Atom>,
    native: Option<crate::codegen::NativeCode>,
    exec_count: std::cell::Cell<u64>,
}

impl Trace {
    pub fn new(root: Atom) -> Self {
        Self {
            root,
            insts: Vec::with_capacity(32),
            constants: Vec::new(),
            native: None,
            exec_count: std::cell::Cell::new(0),
        }
    }

    #[inline]
    pub fn root(&self) -> &Atom {
        &self.root
    }

    #[inline]
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    #[inline]
    pub fn constants(&self) -> &[Atom] {
        &self.constants
    }

    pub fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Retain `atom` in the constant table, returning its index. Index 0 is
    /// reused once the table is full; lowering keeps traces far below the
    /// cap.
    pub fn add_constant(&mut self, atom: Atom) -> u32 {
        if self.constants.len() >= MAX_CONSTANTS {
            return 0;
        }
        self.constants.push(atom);
        (self.constants.len() - 1) as u32
    }

    pub fn set_native(&mut self, native: crate::codegen::NativeCode) {
        self.native = Some(native);
    }

    #[inline]
    pub fn native(&self) -> Option<&crate::codegen::NativeCode> {
        self.native.as_ref()
    }

    #[inline]
    pub fn exec_count(&self) -> u64 {
        self.exec_count.get()
    }

    pub fn bump_exec(&self) {
        self.exec_count.set(self.exec_count.get() + 1);
    }
}
