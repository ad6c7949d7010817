//! Interpreter benchmarks: recursive fib, Ackermann, and tail-recursive
//! summation, with and without the native tier.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use guage_eval::{run_source, Interp};
use guage_jit::Jit;

const FIB: &str = "(≔ fib (λ (n) (? (< n 2) n (⊕ (fib (⊖ n 1)) (fib (⊖ n 2))))))";
const ACK: &str = "\
(≔ ack (λ (m n)
  (? (≡ m 0) (⊕ n 1)
     (? (≡ n 0) (ack (⊖ m 1) 1)
        (ack (⊖ m 1) (ack m (⊖ n 1)))))))";
const SUM: &str = "(≔ sum-to (λ (n acc) (? (≡ n 0) acc (∇ (⊖ n 1) (⊕ n acc)))))";

fn prepared(defs: &str, jit: bool) -> Interp {
    let mut interp = Interp::new();
    if !jit {
        interp.jit_mut().set_enabled(false);
    }
    run_source(&mut interp, defs, 1).unwrap();
    interp
}

fn bench_fib(c: &mut Criterion) {
    let mut interp = prepared(FIB, false);
    c.bench_function("fib_15_interp", |b| {
        b.iter(|| black_box(run_source(&mut interp, "(fib 15)", 1).unwrap()))
    });
}

fn bench_ack(c: &mut Criterion) {
    let mut interp = prepared(ACK, false);
    c.bench_function("ack_2_3_interp", |b| {
        b.iter(|| black_box(run_source(&mut interp, "(ack 2 3)", 1).unwrap()))
    });
}

fn bench_tco_sum(c: &mut Criterion) {
    let mut interp = prepared(SUM, false);
    c.bench_function("sum_to_10000_recur", |b| {
        b.iter(|| black_box(run_source(&mut interp, "(sum-to 10000 0)", 1).unwrap()))
    });
}

fn bench_numeric_kernel_hot(c: &mut Criterion) {
    // A compilable kernel driven past the hot threshold.
    let mut interp = Interp::with_jit(Jit::with_threshold(10));
    run_source(&mut interp, "(≔ poly (λ (x) (⊕ (⊗ x x) (⊖ x 3))))", 1).unwrap();
    for _ in 0..20 {
        run_source(&mut interp, "(poly 2)", 1).unwrap();
    }
    c.bench_function("poly_hot", |b| {
        b.iter(|| black_box(run_source(&mut interp, "(poly 2)", 1).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_fib,
    bench_ack,
    bench_tco_sum,
    bench_numeric_kernel_hot
);
criterion_main!(benches);
