//! aarch64 emission.
//!
//! Calling convention: the environment pointer arrives in `x0` and is
//! parked in callee-saved `x19` for the lifetime of the trace. Values live
//! on a virtual stack mapped to `d0..d7`. Helper calls go through a 64-bit
//! absolute address materialized into `x9` with MOVZ/MOVK, because the
//! arena may sit anywhere relative to the runtime.

use super::Refusal;
use crate::emit::CodeBuf;
use crate::ir::{Imm, Op, Trace};
use crate::runtime;

/// MOVZ/MOVK x9 with a full 64-bit immediate.
fn mov_x9_imm64(buf: &mut CodeBuf, bits: u64) {
    buf.emit_u32(0xD280_0009 | (((bits & 0xFFFF) as u32) << 5));
    buf.emit_u32(0xF2A0_0009 | ((((bits >> 16) & 0xFFFF) as u32) << 5));
    buf.emit_u32(0xF2C0_0009 | ((((bits >> 32) & 0xFFFF) as u32) << 5));
    buf.emit_u32(0xF2E0_0009 | ((((bits >> 48) & 0xFFFF) as u32) << 5));
}

/// FADD/FSUB/FMUL/FDIV Dd, Dn, Dm with the top two stack values.
fn fp_binop(buf: &mut CodeBuf, base: u32, depth: &mut usize) -> Result<(), Refusal> {
    if *depth < 2 {
        return Err(Refusal("operand stack underflow"));
    }
    let dst = (*depth - 2) as u32;
    let src = (*depth - 1) as u32;
    buf.emit_u32(base | dst | (dst << 5) | (src << 16));
    *depth -= 1;
    Ok(())
}

pub(super) fn emit(trace: &Trace) -> Result<CodeBuf, Refusal> {
    let mut buf = CodeBuf::new();
    let mut depth: usize = 0;

    // Prologue: save frame/link, park the environment in x19.
    buf.emit_u32(0xA9BE_7BFD); // STP  X29, X30, [SP, #-32]!
    buf.emit_u32(0x9100_03FD); // MOV  X29, SP
    buf.emit_u32(0xF900_0BF3); // STR  X19, [SP, #16]
    buf.emit_u32(0xAA00_03F3); // MOV  X19, X0

    for inst in trace.insts() {
        match inst.op {
            Op::ConstNum => {
                let Imm::Num(value) = inst.imm else {
                    return Err(Refusal("const without immediate"));
                };
                let dreg = depth as u32;
                depth += 1;
                mov_x9_imm64(&mut buf, value.to_bits());
                buf.emit_u32(0x9E67_0120 | dreg); // FMOV Dn, X9
            }
            Op::AddDd => fp_binop(&mut buf, 0x1E60_2800, &mut depth)?,
            Op::SubDd => fp_binop(&mut buf, 0x1E60_3800, &mut depth)?,
            Op::MulDd => fp_binop(&mut buf, 0x1E60_0800, &mut depth)?,
            Op::DivDd => fp_binop(&mut buf, 0x1E60_1800, &mut depth)?,
            Op::EnvLoad => {
                let Imm::Env { index, .. } = inst.imm else {
                    return Err(Refusal("env load without coordinates"));
                };
                let dreg = depth as u32;
                depth += 1;

                // d0..d7 are caller-saved; spill the live ones around the
                // helper call.
                let save_count = depth - 1;
                let stack_adj = ((save_count * 8 + 15) & !15) as u32;
                if save_count > 0 {
                    buf.emit_u32(0xD100_03FF | (stack_adj << 10)); // SUB SP, SP, #adj
                    for d in 0..save_count as u32 {
                        // STR Dd, [SP, #d*8]
                        buf.emit_u32(0xFD00_0000 | d | (31 << 5) | (d << 10));
                    }
                }

                buf.emit_u32(0xAA13_03E0); // MOV X0, X19
                buf.emit_u32(0xD280_0001 | ((index as u32) << 5)); // MOV W1, #index
                mov_x9_imm64(&mut buf, runtime::load_env_double as usize as u64);
                buf.emit_u32(0xD63F_0120); // BLR X9

                if dreg != 0 {
                    buf.emit_u32(0x1E60_4000 | dreg); // FMOV Ddreg, D0
                }

                if save_count > 0 {
                    for d in 0..save_count as u32 {
                        // LDR Dd, [SP, #d*8]
                        buf.emit_u32(0xFD40_0000 | d | (31 << 5) | (d << 10));
                    }
                    buf.emit_u32(0x9100_03FF | (stack_adj << 10)); // ADD SP, SP, #adj
                }
            }
            Op::Ret => {}
            Op::ConstInt => {
                // Deliberately unsupported: see the scan in codegen/mod.rs.
                return Err(Refusal("integer constants stay on the interpreter"));
            }
            _ => return Err(Refusal("unsupported operation")),
        }
    }

    // Box the result: move the top of stack to d0 and call the allocator
    // helper, which returns the atom pointer in x0.
    if depth > 1 {
        let src = (depth - 1) as u32;
        if src != 0 {
            buf.emit_u32(0x1E60_4000 | (src << 5)); // FMOV D0, Dsrc
        }
    }
    mov_x9_imm64(&mut buf, runtime::atom_from_double as usize as u64);
    buf.emit_u32(0xD63F_0120); // BLR X9

    // Epilogue: x0 already holds the boxed result.
    buf.emit_u32(0xF940_0BF3); // LDR  X19, [SP, #16]
    buf.emit_u32(0xA8C2_7BFD); // LDP  X29, X30, [SP], #32
    buf.emit_u32(0xD65F_03C0); // RET

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Inst;
    use guage_atom::Atom;

    fn words(buf: &CodeBuf) -> Vec<u32> {
        buf.as_slice()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn prologue_and_epilogue_frame() {
        let mut t = Trace::new(Atom::nil());
        t.emit(Inst::with_imm(Op::ConstNum, 0, Imm::Num(1.0)));
        t.emit(Inst::new(Op::Ret, 0, 0, 0));
        let buf = emit(&t).unwrap();
        let w = words(&buf);
        assert_eq!(w[0], 0xA9BE7BFD);
        assert_eq!(w[1], 0x910003FD);
        assert_eq!(w[2], 0xF9000BF3);
        assert_eq!(w[3], 0xAA0003F3);
        assert_eq!(*w.last().unwrap(), 0xD65F03C0);
        assert_eq!(w[w.len() - 2], 0xA8C27BFD);
        assert_eq!(w[w.len() - 3], 0xF9400BF3);
    }

    #[test]
    fn add_encodes_fadd() {
        let mut t = Trace::new(Atom::nil());
        t.emit(Inst::with_imm(Op::ConstNum, 0, Imm::Num(1.0)));
        t.emit(Inst::with_imm(Op::ConstNum, 1, Imm::Num(2.0)));
        t.emit(Inst::new(Op::AddDd, 0, 0, 1));
        t.emit(Inst::new(Op::Ret, 0, 0, 0));
        let w = words(&emit(&t).unwrap());
        // FADD D0, D0, D1
        assert!(w.contains(&(0x1E602800 | (1 << 16))));
    }

    #[test]
    fn env_load_calls_helper_through_x9() {
        let mut t = Trace::new(Atom::nil());
        t.emit(Inst::with_imm(Op::EnvLoad, 16, Imm::Env { depth: 0, index: 3 }));
        t.emit(Inst::new(Op::Ret, 16, 0, 0));
        let w = words(&emit(&t).unwrap());
        // MOV X0, X19 and MOV W1, #3 precede a BLR X9.
        assert!(w.contains(&0xAA1303E0));
        assert!(w.contains(&(0xD2800001 | (3 << 5))));
        assert!(w.iter().filter(|&&x| x == 0xD63F0120).count() >= 2);
    }
}
