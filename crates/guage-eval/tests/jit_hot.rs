//! Differential tests between the interpreter and the native tier.

use guage_eval::{run_source, Interp};
use guage_jit::Jit;

fn interp_with_threshold(t: u32) -> Interp {
    Interp::with_jit(Jit::with_threshold(t))
}

/// Evaluate `call` repeatedly in a fresh interpreter seeded with `defs`,
/// returning every result.
fn run_repeated(defs: &str, call: &str, times: usize, threshold: u32) -> (Interp, Vec<f64>) {
    let mut interp = interp_with_threshold(threshold);
    run_source(&mut interp, defs, 1).unwrap();
    let mut results = Vec::new();
    for _ in 0..times {
        let vs = run_source(&mut interp, call, 1).unwrap();
        results.push(vs.last().unwrap().as_number().expect("numeric result"));
    }
    (interp, results)
}

#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod native_tier {
    use super::*;

    #[test]
    fn addition_compiles_after_threshold_and_agrees() {
        let (interp, results) = run_repeated("(≔ f (λ (n) (⊕ n n)))", "(f 21)", 150, 100);
        assert!(results.iter().all(|&r| r == 42.0));
        let stats = interp.jit().stats();
        assert_eq!(stats.compiles, 1);
        assert!(stats.native_calls > 0, "native tier never ran");
        assert_eq!(stats.deopts, 0);
    }

    #[test]
    fn differential_over_inputs() {
        // Interpreted oracle results, then the same calls through a hot
        // interpreter; every output must be bitwise identical.
        let defs = "(≔ poly (λ (x y) (⊕ (⊗ x x) (⊖ (⊘ y 4) (⊗ 2 x)))))";
        let inputs = [
            (0.0f64, 0.0f64),
            (1.0, 2.0),
            (-3.5, 7.25),
            (1e10, -2e-3),
            (0.1, 0.2),
        ];

        let mut cold = interp_with_threshold(u32::MAX);
        run_source(&mut cold, defs, 1).unwrap();
        let mut hot = interp_with_threshold(2);
        run_source(&mut hot, defs, 1).unwrap();

        for &(x, y) in &inputs {
            let call = format!("(poly {} {})", x, y);
            let expect = run_source(&mut cold, &call, 1).unwrap();
            let expect = expect.last().unwrap().as_number().unwrap();
            for _ in 0..10 {
                let got = run_source(&mut hot, &call, 1).unwrap();
                let got = got.last().unwrap().as_number().unwrap();
                assert_eq!(
                    got.to_bits(),
                    expect.to_bits(),
                    "poly({}, {}) diverged",
                    x,
                    y
                );
            }
        }
        assert!(hot.jit().stats().native_calls > 0);
    }

    #[test]
    fn deopt_falls_back_without_losing_results() {
        let mut interp = interp_with_threshold(2);
        run_source(&mut interp, "(≔ first (λ (x) x))", 1).unwrap();

        // Heat with numbers so the identity body compiles.
        for _ in 0..5 {
            let vs = run_source(&mut interp, "(first 4)", 1).unwrap();
            assert_eq!(vs[0].as_number(), Some(4.0));
        }
        assert_eq!(interp.jit().stats().compiles, 1);

        // A string argument cannot take the native path; the result must
        // still be correct.
        let vs = run_source(&mut interp, "(first \"s\")", 1).unwrap();
        assert_eq!(vs[0].as_str(), Some("s"));

        // And numeric calls keep working afterwards.
        let vs = run_source(&mut interp, "(first 9)", 1).unwrap();
        assert_eq!(vs[0].as_number(), Some(9.0));
    }

    #[test]
    fn captured_nonnumeric_slot_deopts_cleanly() {
        // Both closures share one compiled body; `h` captures a string, so
        // the argument shape check passes, the environment-load helper
        // raises the deopt latch, and the interpreter reports the same
        // type error a cold run would.
        let defs = "\
(≔ make (λ (s) (λ (n) (⊕ n s))))
(≔ g (make 10))
(≔ h (make \"tag\"))";
        let mut interp = interp_with_threshold(2);
        run_source(&mut interp, defs, 1).unwrap();
        for _ in 0..5 {
            let vs = run_source(&mut interp, "(g 1)", 1).unwrap();
            assert_eq!(vs[0].as_number(), Some(11.0));
        }
        assert_eq!(interp.jit().stats().compiles, 1);

        let vs = run_source(&mut interp, "(h 1)", 1).unwrap();
        assert!(vs[0].is_error());
        assert!(interp.jit().stats().deopts >= 1);

        // The numeric closure still works after the deopt.
        let vs = run_source(&mut interp, "(g 2)", 1).unwrap();
        assert_eq!(vs[0].as_number(), Some(12.0));
    }

    #[test]
    fn branching_bodies_stay_on_the_interpreter() {
        let defs = "(≔ fib (λ (n) (? (< n 2) n (⊕ (fib (⊖ n 1)) (fib (⊖ n 2))))))";
        let (interp, results) = run_repeated(defs, "(fib 10)", 5, 3);
        assert!(results.iter().all(|&r| r == 55.0));
        let stats = interp.jit().stats();
        assert_eq!(stats.compiles, 0);
        assert!(stats.refusals >= 1);
    }

    #[test]
    fn disabled_jit_still_computes() {
        let mut interp = interp_with_threshold(2);
        interp.jit_mut().set_enabled(false);
        run_source(&mut interp, "(≔ f (λ (n) (⊕ n n)))", 1).unwrap();
        for _ in 0..10 {
            let vs = run_source(&mut interp, "(f 21)", 1).unwrap();
            assert_eq!(vs[0].as_number(), Some(42.0));
        }
        assert_eq!(interp.jit().stats().compiles, 0);
        assert_eq!(interp.jit().stats().native_calls, 0);
    }
}

#[cfg(unix)]
#[test]
fn hot_threshold_is_respected() {
    let mut interp = interp_with_threshold(10);
    run_source(&mut interp, "(≔ f (λ (n) (⊕ n 1)))", 1).unwrap();
    for i in 0..9 {
        run_source(&mut interp, "(f 1)", 1).unwrap();
        assert_eq!(
            interp.jit().stats().compiles + interp.jit().stats().refusals,
            0,
            "tier engaged early at call {}",
            i + 1
        );
    }
    run_source(&mut interp, "(f 1)", 1).unwrap();
    let stats = interp.jit().stats();
    assert_eq!(stats.compiles + stats.refusals, 1);
}
