//! x86-64 (System V) emission.
//!
//! The environment pointer arrives in `rdi` and is parked in callee-saved
//! `rbx`. Values live on a virtual stack mapped to `xmm0..xmm7`. All xmm
//! registers are caller-saved, so live values spill to the stack around
//! helper calls; the spill adjustment also keeps `rsp` 16-byte aligned at
//! every call site.

use super::Refusal;
use crate::emit::CodeBuf;
use crate::ir::{Imm, Op, Trace};
use crate::runtime;

/// MOV RAX, imm64.
fn mov_rax_imm64(buf: &mut CodeBuf, bits: u64) {
    buf.emit_u8(0x48);
    buf.emit_u8(0xB8);
    buf.emit_u64(bits);
}

/// ADDSD/SUBSD/MULSD/DIVSD xmm_dst, xmm_src on the top two stack values.
fn sse_binop(buf: &mut CodeBuf, opcode: u8, depth: &mut usize) -> Result<(), Refusal> {
    if *depth < 2 {
        return Err(Refusal("operand stack underflow"));
    }
    let dst = (*depth - 2) as u8;
    let src = (*depth - 1) as u8;
    buf.emit_u8(0xF2);
    buf.emit_u8(0x0F);
    buf.emit_u8(opcode);
    buf.emit_u8(0xC0 | (dst << 3) | src);
    *depth -= 1;
    Ok(())
}

/// MOVSD between registers.
fn movsd_reg(buf: &mut CodeBuf, dst: u8, src: u8) {
    buf.emit_u8(0xF2);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x10);
    buf.emit_u8(0xC0 | (dst << 3) | src);
}

/// MOVSD [rsp + disp8], xmm_reg.
fn movsd_store(buf: &mut CodeBuf, reg: u8, disp: u8) {
    buf.emit_u8(0xF2);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x11);
    buf.emit_u8(0x44 | (reg << 3));
    buf.emit_u8(0x24);
    buf.emit_u8(disp);
}

/// MOVSD xmm_reg, [rsp + disp8].
fn movsd_load(buf: &mut CodeBuf, reg: u8, disp: u8) {
    buf.emit_u8(0xF2);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x10);
    buf.emit_u8(0x44 | (reg << 3));
    buf.emit_u8(0x24);
    buf.emit_u8(disp);
}

/// SUB RSP, imm8 / ADD RSP, imm8.
fn adjust_rsp(buf: &mut CodeBuf, down: bool, amount: u8) {
    buf.emit_u8(0x48);
    buf.emit_u8(0x83);
    buf.emit_u8(if down { 0xEC } else { 0xC4 });
    buf.emit_u8(amount);
}

pub(super) fn emit(trace: &Trace) -> Result<CodeBuf, Refusal> {
    let mut buf = CodeBuf::new();
    let mut depth: usize = 0;

    // Prologue: frame, park the environment in rbx. After the two pushes
    // rsp is 8 mod 16; every call site below compensates.
    buf.emit_u8(0x55); // push rbp
    buf.emit_u8(0x48);
    buf.emit_u8(0x89);
    buf.emit_u8(0xE5); // mov rbp, rsp
    buf.emit_u8(0x53); // push rbx
    buf.emit_u8(0x48);
    buf.emit_u8(0x89);
    buf.emit_u8(0xFB); // mov rbx, rdi

    for inst in trace.insts() {
        match inst.op {
            Op::ConstNum => {
                let Imm::Num(value) = inst.imm else {
                    return Err(Refusal("const without immediate"));
                };
                let xreg = depth as u8;
                depth += 1;
                mov_rax_imm64(&mut buf, value.to_bits());
                // MOVQ xmm_n, rax
                buf.emit_u8(0x66);
                buf.emit_u8(0x48);
                buf.emit_u8(0x0F);
                buf.emit_u8(0x6E);
                buf.emit_u8(0xC0 | (xreg << 3));
            }
            Op::AddDd => sse_binop(&mut buf, 0x58, &mut depth)?,
            Op::SubDd => sse_binop(&mut buf, 0x5C, &mut depth)?,
            Op::MulDd => sse_binop(&mut buf, 0x59, &mut depth)?,
            Op::DivDd => sse_binop(&mut buf, 0x5E, &mut depth)?,
            Op::EnvLoad => {
                let Imm::Env { index, .. } = inst.imm else {
                    return Err(Refusal("env load without coordinates"));
                };
                let xreg = depth as u8;
                depth += 1;

                // Spill live xmm values; an odd slot count lands rsp on a
                // 16-byte boundary at the call.
                let save_count = xreg as usize;
                let adjust = (save_count * 8 + if save_count % 2 == 0 { 8 } else { 0 }) as u8;
                adjust_rsp(&mut buf, true, adjust);
                for i in 0..save_count as u8 {
                    movsd_store(&mut buf, i, i * 8);
                }

                // rdi = env, esi = index.
                buf.emit_u8(0x48);
                buf.emit_u8(0x89);
                buf.emit_u8(0xDF); // mov rdi, rbx
                buf.emit_u8(0xBE); // mov esi, imm32
                buf.emit_u32(index as u32);

                mov_rax_imm64(&mut buf, runtime::load_env_double as usize as u64);
                buf.emit_u8(0xFF);
                buf.emit_u8(0xD0); // call rax

                // Park the result before restoring the spilled registers.
                if xreg != 0 {
                    movsd_reg(&mut buf, xreg, 0);
                }
                for i in 0..save_count as u8 {
                    movsd_load(&mut buf, i, i * 8);
                }
                adjust_rsp(&mut buf, false, adjust);
            }
            Op::Ret => {}
            Op::ConstInt => {
                // Deliberately unsupported: see the scan in codegen/mod.rs.
                return Err(Refusal("integer constants stay on the interpreter"));
            }
            _ => return Err(Refusal("unsupported operation")),
        }
    }

    // Box the result: top of stack to xmm0, then the allocator helper
    // returns the atom pointer in rax.
    if depth > 1 {
        let src = (depth - 1) as u8;
        if src != 0 {
            movsd_reg(&mut buf, 0, src);
        }
    }
    adjust_rsp(&mut buf, true, 8);
    mov_rax_imm64(&mut buf, runtime::atom_from_double as usize as u64);
    buf.emit_u8(0xFF);
    buf.emit_u8(0xD0); // call rax
    adjust_rsp(&mut buf, false, 8);

    // Epilogue: rax already holds the boxed result.
    buf.emit_u8(0x5B); // pop rbx
    buf.emit_u8(0x5D); // pop rbp
    buf.emit_u8(0xC3); // ret

    Ok(buf)
}
