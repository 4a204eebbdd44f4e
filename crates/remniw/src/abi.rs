//! RISC-V LP64 integer ABI constants (registers, stack, immediates).
//!
//! This module centralizes the calling convention so that instruction
//! selection, register allocation, frame lowering, and the simulator agree.

use crate::riscv::PReg;

// ── Register Assignments ──

/// Hard-wired zero (x0).
pub const ZERO: PReg = PReg::new(0);

/// Return address register (ra). Written by `call`, read by `ret`.
pub const RA: PReg = PReg::new(1);

/// Stack pointer (sp). 16-byte aligned at every call boundary.
pub const SP: PReg = PReg::new(2);

/// Global pointer (gp). Never allocated.
pub const GP: PReg = PReg::new(3);

/// Thread pointer (tp). Never allocated.
pub const TP: PReg = PReg::new(4);

pub const T0: PReg = PReg::new(5);
pub const T1: PReg = PReg::new(6);
pub const T2: PReg = PReg::new(7);

/// Frame pointer (s0/fp). Holds the caller's stack pointer for the whole body.
pub const FP: PReg = PReg::new(8);

pub const S1: PReg = PReg::new(9);
pub const A0: PReg = PReg::new(10);
pub const A1: PReg = PReg::new(11);
pub const A2: PReg = PReg::new(12);
pub const A3: PReg = PReg::new(13);
pub const A4: PReg = PReg::new(14);
pub const A5: PReg = PReg::new(15);
pub const A6: PReg = PReg::new(16);
pub const A7: PReg = PReg::new(17);
pub const S2: PReg = PReg::new(18);
pub const S3: PReg = PReg::new(19);
pub const S4: PReg = PReg::new(20);
pub const S5: PReg = PReg::new(21);
pub const S6: PReg = PReg::new(22);
pub const S7: PReg = PReg::new(23);
pub const S8: PReg = PReg::new(24);
pub const S9: PReg = PReg::new(25);
pub const S10: PReg = PReg::new(26);
pub const S11: PReg = PReg::new(27);
pub const T3: PReg = PReg::new(28);
pub const T4: PReg = PReg::new(29);

/// Scratch register 1 (t5).
/// Reserved for spill reloads and the results of spilled definitions.
pub const SCRATCH1: PReg = PReg::new(30);

/// Scratch register 2 (t6).
/// Reserved for the second spilled operand, large frame offsets, and
/// breaking cycles in parallel moves.
pub const SCRATCH2: PReg = PReg::new(31);

/// Integer argument registers, in order.
pub const ARG_REGS: [PReg; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

/// Return value registers.
pub const RET_REGS: [PReg; 2] = [A0, A1];

/// Callee-saved registers available to the allocator (`fp` is managed by the
/// frame lowering itself).
pub const CALLEE_SAVED: [PReg; 11] = [S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];

/// Caller-saved registers available to the allocator, in preference order.
pub const CALLER_SAVED: [PReg; 13] = [T0, T1, T2, T3, T4, A0, A1, A2, A3, A4, A5, A6, A7];

#[must_use]
pub fn is_callee_saved(reg: PReg) -> bool {
    CALLEE_SAVED.contains(&reg) || reg == FP || reg == SP
}

// ── Stack Frame Layout ──

/// Size of one register / stack argument slot in bytes.
pub const XLEN_BYTES: i64 = 8;

/// Stack alignment required at call boundaries.
pub const STACK_ALIGN: i64 = 16;

// ── Immediates ──

/// Range of the signed 12-bit I/S-type immediate.
pub const IMM12_MIN: i64 = -2048;
pub const IMM12_MAX: i64 = 2047;

#[must_use]
pub const fn fits_imm12(value: i64) -> bool {
    value >= IMM12_MIN && value <= IMM12_MAX
}

// ── Runtime Symbols ──

/// Entry points of the aphotic shield runtime called by instrumented code.
pub use aphotic_shield::symbols as shield_symbols;
