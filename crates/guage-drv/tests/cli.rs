//! End-to-end driver tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn source_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".gu")
        .tempfile()
        .expect("tempfile");
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn guage() -> Command {
    Command::cargo_bin("guage").expect("binary")
}

#[test]
fn addition_prints_three() {
    let file = source_file("(⊕ 1 2)");
    guage()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::eq("3\n"));
}

#[test]
fn program_with_defines() {
    let file = source_file(
        "(≔ fib (λ (n) (? (< n 2) n (⊕ (fib (⊖ n 1)) (fib (⊖ n 2))))))\n(fib 10)\n",
    );
    guage()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::eq("55\n"));
}

#[test]
fn defines_are_silent() {
    let file = source_file("(≔ x 5)\n(⊗ x 2)");
    guage()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::eq("10\n"));
}

#[test]
fn undefined_variable_exits_nonzero_with_diagnostic() {
    let file = source_file("(≔ fib (λ (n) n))\n(fbi 3)");
    guage()
        .arg(file.path())
        .env("NO_COLOR", "1")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("undefined variable `fbi`"))
        .stderr(predicate::str::contains("E0017"))
        .stderr(predicate::str::contains("did you mean `fib`?"));
}

#[test]
fn json_diagnostics_shape() {
    let file = source_file("(nope)");
    guage()
        .arg(file.path())
        .arg("--json-diagnostics")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"level\":\"error\""))
        .stderr(predicate::str::contains("\"message\":\"undefined variable `nope`\""))
        .stderr(predicate::str::contains("\"spans\":["));
}

#[test]
fn no_color_strips_ansi() {
    let file = source_file("(nope)");
    let output = guage()
        .arg(file.path())
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains('\x1b'), "ANSI codes with NO_COLOR set");
}

#[test]
fn reader_errors_are_diagnostics() {
    let file = source_file("(⊕ 1");
    guage()
        .arg(file.path())
        .env("NO_COLOR", "1")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unterminated list"));
}

#[test]
fn no_jit_flag_still_computes() {
    let file = source_file(
        "(≔ f (λ (n) (⊕ n n)))\n(f 21)\n",
    );
    guage()
        .arg(file.path())
        .arg("--no-jit")
        .assert()
        .success()
        .stdout(predicate::eq("42\n"));
}

#[test]
fn hot_threshold_flag_accepted() {
    let file = source_file(
        "(≔ sum-to (λ (n acc) (? (≡ n 0) acc (∇ (⊖ n 1) (⊕ n acc)))))\n(sum-to 1000 0)\n",
    );
    guage()
        .arg(file.path())
        .args(["--hot-threshold", "5"])
        .assert()
        .success()
        .stdout(predicate::eq("500500\n"));
}

#[test]
fn dump_converted_shows_marker_form() {
    let file = source_file("(λ (x) (⊕ x 1))");
    guage()
        .arg(file.path())
        .arg("--dump-converted")
        .assert()
        .success()
        .stdout(predicate::str::contains(":λ-converted"))
        .stdout(predicate::str::contains("(⊕ 0 (quote 1))"));
}

#[test]
fn missing_file_reports_cleanly() {
    guage()
        .arg("/definitely/not/here.gu")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot read"));
}
