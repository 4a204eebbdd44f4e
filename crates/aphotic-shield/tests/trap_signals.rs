//! Process-level checks: violations end `shield-probe` with SIGABRT and the
//! report on stderr, clean runs and intentional exits do not.

#![cfg(unix)]

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

const SIGABRT: i32 = 6;

fn run_bin(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shield-probe"))
        .args(args)
        .env_remove("APHOTIC_SHIELD_OPTIONS")
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn shield-probe")
}

fn assert_trapped(args: &[&str], line: &str) {
    let output = run_bin(args);
    assert_eq!(output.status.signal(), Some(SIGABRT), "{args:?}: {:?}", output.status);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("*** APHOTIC-SHIELD detected a memory error ***"),
        "{stderr}"
    );
    assert!(stderr.contains(line), "expected `{line}` in {stderr}");
}

#[test]
fn test_clean_run_exits_zero() {
    let output = run_bin(&["clean"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "clean");
    assert!(output.stderr.is_empty());
}

#[test]
fn test_intentional_exit_code_is_not_a_trap() {
    let output = run_bin(&["exit-code"]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(output.status.signal(), None);
}

#[test]
fn test_overflow_traps() {
    assert_trapped(&["overflow"], "Buffer Overflow on address 0x");
}

#[test]
fn test_underflow_traps() {
    assert_trapped(&["underflow"], "Buffer Underflow on address 0x");
}

#[test]
fn test_use_after_free_traps() {
    assert_trapped(&["use-after-free"], "Use After Free on address 0x");
}

#[test]
fn test_double_free_traps() {
    assert_trapped(&["double-free"], "Double Free on address 0x");
}

#[test]
fn test_invalid_free_traps() {
    assert_trapped(&["invalid-free", "--size", "32"], "Invalid (Wild) Free on address 0x");
}

#[test]
fn test_disabled_shield_lets_overflow_through() {
    let output = Command::new(env!("CARGO_BIN_EXE_shield-probe"))
        .arg("overflow")
        .env("APHOTIC_SHIELD_OPTIONS", "Enabled=0")
        .output()
        .expect("spawn shield-probe");
    assert!(output.status.success(), "{:?}", output.status);
}
