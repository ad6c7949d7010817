//! End-to-end native execution tests: lower, compile, install, run.
//!
//! Gated to the architectures the backend supports; elsewhere the compile
//! path is still exercised and must refuse cleanly.

use guage_atom::{Atom, Env};
use guage_jit::{Jit, NativeOutcome};

fn quoted(n: f64) -> Atom {
    Atom::list([Atom::symbol_from("quote"), Atom::number(n)])
}

fn op2(op: &str, a: Atom, b: Atom) -> Atom {
    Atom::list([Atom::symbol_from(op), a, b])
}

/// Drive `expr` to the threshold, then execute natively.
#[allow(dead_code)]
fn heat_and_run(jit: &mut Jit, expr: &Atom, env: &Env) -> NativeOutcome {
    for _ in 0..jit.threshold() {
        jit.record_call(expr);
    }
    jit.try_execute(expr, env)
}

#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod native {
    use super::*;

    #[test]
    fn constant_addition() {
        let mut jit = Jit::with_threshold(3);
        let expr = op2("⊕", quoted(1.0), quoted(2.0));
        match heat_and_run(&mut jit, &expr, &Env::empty()) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(3.0)),
            other => panic!("expected native value, got {:?}", other),
        }
        assert_eq!(jit.stats().compiles, 1);
        assert_eq!(jit.stats().native_calls, 1);
    }

    #[test]
    fn nested_arithmetic_matches_ieee() {
        let mut jit = Jit::with_threshold(2);
        // ((1.5 - 0.25) * 8) / 5
        let expr = op2(
            "⊘",
            op2("⊗", op2("⊖", quoted(1.5), quoted(0.25)), quoted(8.0)),
            quoted(5.0),
        );
        let expected = ((1.5f64 - 0.25) * 8.0) / 5.0;
        match heat_and_run(&mut jit, &expr, &Env::empty()) {
            NativeOutcome::Value(v) => {
                assert_eq!(v.as_number().unwrap().to_bits(), expected.to_bits())
            }
            other => panic!("expected native value, got {:?}", other),
        }
    }

    #[test]
    fn environment_load_doubles_parameter() {
        let mut jit = Jit::with_threshold(2);
        // Converted body of (λ (n) (⊕ n n)): indices refer to the frame.
        let expr = op2("⊕", Atom::number(0.0), Atom::number(0.0));
        let env = Env::from_slots(vec![Atom::number(21.0)]);
        match heat_and_run(&mut jit, &expr, &env) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(42.0)),
            other => panic!("expected native value, got {:?}", other),
        }
    }

    #[test]
    fn mixed_env_and_constants() {
        let mut jit = Jit::with_threshold(2);
        // (x * 2) + y with env [3.0, 4.0]
        let expr = op2(
            "⊕",
            op2("⊗", Atom::number(0.0), quoted(2.0)),
            Atom::number(1.0),
        );
        let env = Env::from_slots(vec![Atom::number(3.0), Atom::number(4.0)]);
        match heat_and_run(&mut jit, &expr, &env) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(10.0)),
            other => panic!("expected native value, got {:?}", other),
        }
    }

    #[test]
    fn integer_slot_widens() {
        let mut jit = Jit::with_threshold(2);
        let expr = op2("⊕", Atom::number(0.0), quoted(1.0));
        let env = Env::from_slots(vec![Atom::integer(41)]);
        match heat_and_run(&mut jit, &expr, &env) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(42.0)),
            other => panic!("expected native value, got {:?}", other),
        }
    }

    #[test]
    fn non_numeric_slot_deopts() {
        let mut jit = Jit::with_threshold(2);
        let expr = op2("⊕", Atom::number(0.0), quoted(1.0));
        let bad_env = Env::from_slots(vec![Atom::string("oops")]);
        match heat_and_run(&mut jit, &expr, &bad_env) {
            NativeOutcome::Deopted => {}
            other => panic!("expected deopt, got {:?}", other),
        }
        assert_eq!(jit.stats().deopts, 1);

        // The trace survives a deopt; a good environment runs natively.
        let good_env = Env::from_slots(vec![Atom::number(1.0)]);
        match jit.try_execute(&expr, &good_env) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(2.0)),
            other => panic!("expected native value after deopt, got {:?}", other),
        }
    }

    #[test]
    fn division_by_zero_is_ieee_infinity() {
        let mut jit = Jit::with_threshold(2);
        let expr = op2("⊘", quoted(1.0), quoted(0.0));
        match heat_and_run(&mut jit, &expr, &Env::empty()) {
            NativeOutcome::Value(v) => assert_eq!(v.as_number(), Some(f64::INFINITY)),
            other => panic!("expected native value, got {:?}", other),
        }
    }
}

#[cfg(unix)]
#[test]
fn integer_constants_refuse_not_compile() {
    let mut jit = Jit::with_threshold(3);
    // An integer constant lowers to the IR but is refused by codegen, so
    // the expression stays on the interpreter instead of widening the
    // result tag to a double.
    let expr = op2("⊕", Atom::integer(41), quoted(1.0));
    for _ in 0..10 {
        jit.record_call(&expr);
    }
    assert_eq!(jit.stats().refusals, 1);
    assert_eq!(jit.stats().compiles, 0);
    assert!(matches!(
        jit.try_execute(&expr, &Env::empty()),
        NativeOutcome::NoTrace
    ));
}

#[cfg(unix)]
#[test]
fn unsupported_forms_refuse_not_compile() {
    let mut jit = Jit::with_threshold(3);
    // A conditional cannot compile; the trace must be refused exactly once.
    let expr = Atom::list([
        Atom::symbol_from("?"),
        Atom::bool(true),
        quoted(1.0),
        quoted(2.0),
    ]);
    for _ in 0..10 {
        jit.record_call(&expr);
    }
    assert_eq!(jit.stats().refusals, 1);
    assert_eq!(jit.stats().compiles, 0);
    assert!(matches!(
        jit.try_execute(&expr, &Env::empty()),
        NativeOutcome::NoTrace
    ));
}

#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
#[test]
fn threshold_compiles_exactly_once() {
    let mut jit = Jit::with_threshold(5);
    let expr = op2("⊕", quoted(1.0), quoted(2.0));
    for calls in 1..=4u32 {
        jit.record_call(&expr);
        assert_eq!(jit.stats().compiles, 0, "compiled before threshold at {}", calls);
    }
    jit.record_call(&expr);
    assert_eq!(jit.stats().compiles, 1);
    for _ in 0..20 {
        jit.record_call(&expr);
    }
    assert_eq!(jit.stats().compiles, 1, "recompiled after threshold");
    assert_eq!(jit.stats().traces, 1);
}

#[test]
fn cold_expressions_have_no_trace() {
    let mut jit = Jit::new();
    let expr = op2("⊕", quoted(1.0), quoted(2.0));
    assert!(matches!(
        jit.try_execute(&expr, &Env::empty()),
        NativeOutcome::NoTrace
    ));
    jit.record_call(&expr);
    assert!(matches!(
        jit.try_execute(&expr, &Env::empty()),
        NativeOutcome::NoTrace
    ));
}
