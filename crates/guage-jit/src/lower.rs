//! Lowering from expression trees to the register IR.
//!
//! Operates on converted expressions: a bare number is a De Bruijn index
//! (variable reference) and number literals arrive wrapped in `(quote n)`,
//! so quote forms are checked before bare numbers. Anything lowering does
//! not understand becomes a `CallInterp` escape; code generation then
//! decides whether the whole trace is worth native code.

use crate::ir::{Imm, Inst, Op, RegAlloc, Trace};
use guage_atom::Atom;
use guage_util::intern::sym;

/// Expression nesting beyond this becomes an interpreter escape.
const MAX_INLINE_DEPTH: u32 = 32;

/// Lower `expr` into a fresh trace ending in `Ret`.
pub fn lower(expr: &Atom) -> Trace {
    let mut trace = Trace::new(expr.clone());
    let mut ra = RegAlloc::new();
    let result = compile_expr(&mut trace, &mut ra, expr, 0);
    trace.emit(Inst::new(Op::Ret, result, 0, 0));
    trace
}

fn emit_call_interp(trace: &mut Trace, ra: &mut RegAlloc, expr: &Atom) -> u8 {
    let idx = trace.add_constant(expr.clone());
    let dst = ra.alloc_p();
    trace.emit(Inst::with_imm(Op::CallInterp, dst, Imm::Const(idx)));
    dst
}

fn compile_expr(trace: &mut Trace, ra: &mut RegAlloc, expr: &Atom, depth: u32) -> u8 {
    if depth > MAX_INLINE_DEPTH {
        return emit_call_interp(trace, ra, expr);
    }

    if let Some(b) = expr.as_bool() {
        let dst = ra.alloc_i();
        trace.emit(Inst::with_imm(Op::ConstBool, dst, Imm::Int(b as i64)));
        return dst;
    }

    if expr.is_nil() {
        let dst = ra.alloc_p();
        trace.emit(Inst::new(Op::ConstNil, dst, 0, 0));
        return dst;
    }

    // Strings and free symbols load from the constant table; the
    // interpreter resolves free symbols at call time.
    if expr.is_string() || expr.is_symbol() {
        let idx = trace.add_constant(expr.clone());
        let dst = ra.alloc_p();
        trace.emit(Inst::with_imm(Op::ConstCell, dst, Imm::Const(idx)));
        return dst;
    }

    if let Some(n) = expr.as_integer() {
        let dst = ra.alloc_i();
        trace.emit(Inst::with_imm(Op::ConstInt, dst, Imm::Int(n)));
        return dst;
    }

    // Bare number in converted code is a variable reference.
    if let Some(n) = expr.as_number() {
        let dst = ra.alloc_p();
        trace.emit(Inst::with_imm(
            Op::EnvLoad,
            dst,
            Imm::Env {
                depth: 0,
                index: n as u8,
            },
        ));
        return dst;
    }

    if let Some((head, args)) = expr.pair() {
        if let Some(head_sym) = head.as_symbol() {
            let name = head_sym.as_str();

            // (quote datum): how number literals appear after conversion.
            if (head_sym.id() == sym::QUOTE || name == "quote") && args.is_pair() {
                let datum = args.car().expect("pair has car");
                if let Some(n) = datum.as_number() {
                    let dst = ra.alloc_d();
                    trace.emit(Inst::with_imm(Op::ConstNum, dst, Imm::Num(n)));
                    return dst;
                }
                if let Some(n) = datum.as_integer() {
                    let dst = ra.alloc_i();
                    trace.emit(Inst::with_imm(Op::ConstInt, dst, Imm::Int(n)));
                    return dst;
                }
                let idx = trace.add_constant(datum);
                let dst = ra.alloc_p();
                trace.emit(Inst::with_imm(Op::ConstCell, dst, Imm::Const(idx)));
                return dst;
            }

            if let Some(op) = arith_op(name) {
                if let Some((a1, a2)) = two_args(args) {
                    let r1 = compile_expr(trace, ra, &a1, depth + 1);
                    let r2 = compile_expr(trace, ra, &a2, depth + 1);
                    let dst = ra.alloc_d();
                    trace.emit(Inst::new(op, dst, r1, r2));
                    return dst;
                }
            }

            if let Some(op) = cmp_op(name) {
                if let Some((a1, a2)) = two_args(args) {
                    let r1 = compile_expr(trace, ra, &a1, depth + 1);
                    let r2 = compile_expr(trace, ra, &a2, depth + 1);
                    let dst = ra.alloc_i();
                    trace.emit(Inst::new(op, dst, r1, r2));
                    return dst;
                }
            }

            match name {
                "car" | "cdr" if args.is_pair() => {
                    let arg = args.car().expect("pair has car");
                    let r = compile_expr(trace, ra, &arg, depth + 1);
                    let dst = ra.alloc_p();
                    let op = if name == "car" { Op::Car } else { Op::Cdr };
                    trace.emit(Inst::new(op, dst, r, 0));
                    return dst;
                }
                "cons" => {
                    if let Some((a1, a2)) = two_args(args) {
                        let r1 = compile_expr(trace, ra, &a1, depth + 1);
                        let r2 = compile_expr(trace, ra, &a2, depth + 1);
                        let dst = ra.alloc_p();
                        trace.emit(Inst::new(Op::Cons, dst, r1, r2));
                        return dst;
                    }
                }
                _ => {}
            }
        }

        // Generic application: escape to the interpreter.
        return emit_call_interp(trace, ra, expr);
    }

    // Anything else loads as a constant.
    let idx = trace.add_constant(expr.clone());
    let dst = ra.alloc_p();
    trace.emit(Inst::with_imm(Op::ConstCell, dst, Imm::Const(idx)));
    dst
}

fn two_args(args: &Atom) -> Option<(Atom, Atom)> {
    let (a1, rest) = args.pair()?;
    let (a2, _) = rest.pair()?;
    Some((a1.clone(), a2.clone()))
}

/// ASCII and typographic spellings of the double arithmetic ops.
fn arith_op(name: &str) -> Option<Op> {
    match name {
        "+" | "⊕" => Some(Op::AddDd),
        "-" | "⊖" => Some(Op::SubDd),
        "*" | "⊗" => Some(Op::MulDd),
        "/" | "⊘" => Some(Op::DivDd),
        "%" => Some(Op::ModDd),
        _ => None,
    }
}

fn cmp_op(name: &str) -> Option<Op> {
    match name {
        "<" => Some(Op::LtDd),
        "<=" | "≤" => Some(Op::LeDd),
        ">" => Some(Op::GtDd),
        ">=" | "≥" => Some(Op::GeDd),
        "equal?" | "≡" => Some(Op::EqDd),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(n: f64) -> Atom {
        Atom::list([Atom::symbol_from("quote"), Atom::number(n)])
    }

    #[test]
    fn literal_lowers_to_const_num() {
        let trace = lower(&quoted(5.0));
        let ops: Vec<Op> = trace.insts().iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::ConstNum, Op::Ret]);
        assert_eq!(trace.insts()[0].imm, Imm::Num(5.0));
    }

    #[test]
    fn quote_glyph_lowers_like_ascii_quote() {
        let expr = Atom::list([Atom::symbol_from("⌜"), Atom::number(7.0)]);
        let trace = lower(&expr);
        assert_eq!(trace.insts()[0].op, Op::ConstNum);
        assert_eq!(trace.insts()[0].imm, Imm::Num(7.0));
    }

    #[test]
    fn integer_literals_lower_to_const_int() {
        // Self-evaluating and quote-wrapped integers both take the
        // integer-constant path.
        let trace = lower(&Atom::integer(7));
        assert_eq!(trace.insts()[0].op, Op::ConstInt);
        assert_eq!(trace.insts()[0].imm, Imm::Int(7));

        let quoted_int = Atom::list([Atom::symbol_from("quote"), Atom::integer(-3)]);
        let trace = lower(&quoted_int);
        assert_eq!(trace.insts()[0].op, Op::ConstInt);
        assert_eq!(trace.insts()[0].imm, Imm::Int(-3));
    }

    #[test]
    fn bare_number_is_env_load() {
        let trace = lower(&Atom::number(2.0));
        assert_eq!(trace.insts()[0].op, Op::EnvLoad);
        assert_eq!(trace.insts()[0].imm, Imm::Env { depth: 0, index: 2 });
    }

    #[test]
    fn arithmetic_lowers_operands_left_to_right() {
        let expr = Atom::list([Atom::symbol_from("⊕"), quoted(1.0), quoted(2.0)]);
        let trace = lower(&expr);
        let ops: Vec<Op> = trace.insts().iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::ConstNum, Op::ConstNum, Op::AddDd, Op::Ret]);
        assert_eq!(trace.insts()[0].imm, Imm::Num(1.0));
        assert_eq!(trace.insts()[1].imm, Imm::Num(2.0));
    }

    #[test]
    fn ascii_and_typographic_operators_agree() {
        for (a, b) in [("+", "⊕"), ("-", "⊖"), ("*", "⊗"), ("/", "⊘")] {
            let ea = Atom::list([Atom::symbol_from(a), quoted(1.0), quoted(2.0)]);
            let eb = Atom::list([Atom::symbol_from(b), quoted(1.0), quoted(2.0)]);
            assert_eq!(lower(&ea).insts()[2].op, lower(&eb).insts()[2].op);
        }
    }

    #[test]
    fn comparisons_lower() {
        let expr = Atom::list([Atom::symbol_from("≤"), Atom::number(0.0), quoted(1.0)]);
        let trace = lower(&expr);
        let ops: Vec<Op> = trace.insts().iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Op::EnvLoad, Op::ConstNum, Op::LeDd, Op::Ret]);
    }

    #[test]
    fn unknown_form_escapes_to_interpreter() {
        let expr = Atom::list([Atom::symbol_from("?"), Atom::bool(true), quoted(1.0)]);
        let trace = lower(&expr);
        assert_eq!(trace.insts()[0].op, Op::CallInterp);
        assert_eq!(trace.constants().len(), 1);
        assert!(trace.constants()[0].ptr_eq(&expr));
    }

    #[test]
    fn nested_arithmetic() {
        // (⊗ (⊕ 0 (quote 1)) (quote 2))
        let inner = Atom::list([Atom::symbol_from("⊕"), Atom::number(0.0), quoted(1.0)]);
        let expr = Atom::list([Atom::symbol_from("⊗"), inner, quoted(2.0)]);
        let trace = lower(&expr);
        let ops: Vec<Op> = trace.insts().iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Op::EnvLoad,
                Op::ConstNum,
                Op::AddDd,
                Op::ConstNum,
                Op::MulDd,
                Op::Ret
            ]
        );
    }

    #[test]
    fn free_symbol_loads_from_constants() {
        let expr = Atom::symbol_from("some-global");
        let trace = lower(&expr);
        assert_eq!(trace.insts()[0].op, Op::ConstCell);
        assert_eq!(trace.constants().len(), 1);
    }
}
