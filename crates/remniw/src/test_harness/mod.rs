//! Test harness for remniw unit and integration tests.
//!
//! Two halves:
//!
//! * instruction patterns, for asserting on selected or lowered machine code
//!   without spelling out every register;
//! * a [`Simulator`] that executes the encoded object image, for asserting
//!   on behavior.
//!
//! # Example
//!
//! ```rust
//! use remniw::ir::{BinaryOp, FunctionBuilder, Module, ReturnKind, Signature, Type};
//! use remniw::riscv::AluOp;
//! use remniw::test_harness::*;
//!
//! let mut b = FunctionBuilder::new(
//!     "add",
//!     Signature::new(vec![Type::I32, Type::I32], ReturnKind::Scalar(Type::I32)),
//! );
//! let sum = b.binary(BinaryOp::Add, Type::I32, b.param(0), b.param(1));
//! b.ret(vec![sum.into()]);
//! let mut module = Module::new("demo");
//! module.push_function(b.finish());
//!
//! let compiled = compile_for_test(&module).expect("compile");
//! assert_has_pattern(
//!     &function_insts(&compiled, "add"),
//!     &[InstructionPattern::alu(AluOp::Addw), InstructionPattern::Ret],
//! );
//!
//! let run = run_function(&module, "add", &[2, 40]).expect("run");
//! assert_eq!(run.returned(), Some(42));
//! ```

#![allow(
    clippy::match_same_arms,
    clippy::must_use_candidate,
    clippy::manual_assert,
    clippy::missing_panics_doc,
    clippy::uninlined_format_args
)]

mod simulator;

pub use simulator::{
    DEFAULT_STEP_LIMIT, HEAP_BASE, HOST_BASE, IMAGE_BASE, Outcome, RETURN_ADDRESS, RunResult,
    STACK_TOP, Simulator, host_address,
};

use crate::ir::Module;
use crate::riscv::{AluImmOp, AluOp, BranchCond, LoadOp, Mem, MemBase, MachInst, PReg, Reg, StoreOp};
use crate::{CompileOptions, CompiledModule, Result, compile_module};

/// Compile on the calling thread with default options.
pub fn compile_for_test(module: &Module) -> Result<CompiledModule> {
    compile_module(module, &CompileOptions::default().with_parallel(false))
}

/// The lowered instructions of one function, blocks concatenated.
pub fn function_insts(compiled: &CompiledModule, name: &str) -> Vec<MachInst> {
    compiled
        .function(name)
        .map(|f| f.code.insts().cloned().collect())
        .unwrap_or_default()
}

/// Compile, assemble and call `entry` in a fresh simulator.
pub fn run_with(
    module: &Module,
    options: &CompileOptions,
    entry: &str,
    args: &[i64],
) -> Result<RunResult> {
    let compiled = compile_module(module, options)?;
    let image = compiled.to_object()?;
    Simulator::new(&image)?.call(entry, args)
}

/// [`run_with`] using default options.
pub fn run_function(module: &Module, entry: &str, args: &[i64]) -> Result<RunResult> {
    run_with(module, &CompileOptions::default().with_parallel(false), entry, args)
}

/// [`run_with`] with shield instrumentation on.
pub fn run_shielded(module: &Module, entry: &str, args: &[i64]) -> Result<RunResult> {
    let options = CompileOptions::default()
        .with_parallel(false)
        .with_instrumentation(true);
    run_with(module, &options, entry, args)
}

/// Pattern matching for instruction fields
#[derive(Debug, Clone)]
pub enum Pat<T> {
    /// Match any value
    Any,
    /// Match exact value
    Exact(T),
    /// Match if value satisfies predicate
    Predicate(fn(&T) -> bool),
}

impl<T: PartialEq> Pat<T> {
    /// Check if a value matches this pattern
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Pat::Any => true,
            Pat::Exact(expected) => value == expected,
            Pat::Predicate(pred) => pred(value),
        }
    }
}

/// Exact physical register.
pub fn reg(preg: PReg) -> Pat<Reg> {
    Pat::Exact(Reg::Phys(preg))
}

/// Pattern for matching instructions in tests
///
/// Memory operands match on their base register; a frame-object base only
/// matches `Pat::Any`.
#[derive(Debug, Clone)]
pub enum InstructionPattern {
    /// Match any instruction
    Any,
    Alu {
        op: Pat<AluOp>,
        rd: Pat<Reg>,
        rs1: Pat<Reg>,
        rs2: Pat<Reg>,
    },
    AluImm {
        op: Pat<AluImmOp>,
        rd: Pat<Reg>,
        rs1: Pat<Reg>,
        imm: Pat<i64>,
    },
    Lui {
        rd: Pat<Reg>,
        imm20: Pat<u32>,
    },
    Load {
        op: Pat<LoadOp>,
        rd: Pat<Reg>,
        base: Pat<Reg>,
        offset: Pat<i64>,
    },
    Store {
        op: Pat<StoreOp>,
        src: Pat<Reg>,
        base: Pat<Reg>,
        offset: Pat<i64>,
    },
    Branch {
        cond: Pat<BranchCond>,
        rs1: Pat<Reg>,
        rs2: Pat<Reg>,
    },
    Jump,
    /// Direct call, either form (`Call` pseudo or lowered `CallSym`).
    Call {
        symbol: Pat<String>,
    },
    La {
        rd: Pat<Reg>,
        symbol: Pat<String>,
    },
    /// `ret` after lowering.
    Ret,
}

impl InstructionPattern {
    pub fn alu(op: AluOp) -> Self {
        InstructionPattern::Alu {
            op: Pat::Exact(op),
            rd: Pat::Any,
            rs1: Pat::Any,
            rs2: Pat::Any,
        }
    }

    pub fn alu_imm(op: AluImmOp) -> Self {
        InstructionPattern::AluImm {
            op: Pat::Exact(op),
            rd: Pat::Any,
            rs1: Pat::Any,
            imm: Pat::Any,
        }
    }

    pub fn load(op: LoadOp) -> Self {
        InstructionPattern::Load {
            op: Pat::Exact(op),
            rd: Pat::Any,
            base: Pat::Any,
            offset: Pat::Any,
        }
    }

    pub fn store(op: StoreOp) -> Self {
        InstructionPattern::Store {
            op: Pat::Exact(op),
            src: Pat::Any,
            base: Pat::Any,
            offset: Pat::Any,
        }
    }

    pub fn branch(cond: BranchCond) -> Self {
        InstructionPattern::Branch {
            cond: Pat::Exact(cond),
            rs1: Pat::Any,
            rs2: Pat::Any,
        }
    }

    pub fn call(symbol: &str) -> Self {
        InstructionPattern::Call {
            symbol: Pat::Exact(symbol.to_string()),
        }
    }

    /// Check if an instruction matches this pattern
    pub fn matches(&self, inst: &MachInst) -> bool {
        fn base(pat: &Pat<Reg>, mem: &Mem) -> bool {
            match mem.base {
                MemBase::Reg(r) => pat.matches(&r),
                MemBase::Frame(_) => matches!(pat, Pat::Any),
            }
        }

        match (self, inst) {
            (InstructionPattern::Any, _) => true,
            (
                InstructionPattern::Alu {
                    op: p_op,
                    rd: p_rd,
                    rs1: p_rs1,
                    rs2: p_rs2,
                },
                MachInst::Alu { op, rd, rs1, rs2 },
            ) => p_op.matches(op) && p_rd.matches(rd) && p_rs1.matches(rs1) && p_rs2.matches(rs2),
            (
                InstructionPattern::AluImm {
                    op: p_op,
                    rd: p_rd,
                    rs1: p_rs1,
                    imm: p_imm,
                },
                MachInst::AluImm { op, rd, rs1, imm },
            ) => p_op.matches(op) && p_rd.matches(rd) && p_rs1.matches(rs1) && p_imm.matches(imm),
            (
                InstructionPattern::Lui {
                    rd: p_rd,
                    imm20: p_imm,
                },
                MachInst::Lui { rd, imm20 },
            ) => p_rd.matches(rd) && p_imm.matches(imm20),
            (
                InstructionPattern::Load {
                    op: p_op,
                    rd: p_rd,
                    base: p_base,
                    offset: p_offset,
                },
                MachInst::Load { op, rd, mem },
            ) => {
                p_op.matches(op)
                    && p_rd.matches(rd)
                    && base(p_base, mem)
                    && p_offset.matches(&mem.offset)
            }
            (
                InstructionPattern::Store {
                    op: p_op,
                    src: p_src,
                    base: p_base,
                    offset: p_offset,
                },
                MachInst::Store { op, src, mem },
            ) => {
                p_op.matches(op)
                    && p_src.matches(src)
                    && base(p_base, mem)
                    && p_offset.matches(&mem.offset)
            }
            (
                InstructionPattern::Branch {
                    cond: p_cond,
                    rs1: p_rs1,
                    rs2: p_rs2,
                },
                MachInst::Branch { cond, rs1, rs2, .. },
            ) => p_cond.matches(cond) && p_rs1.matches(rs1) && p_rs2.matches(rs2),
            (InstructionPattern::Jump, MachInst::Jump { .. }) => true,
            (
                InstructionPattern::Call { symbol: p_symbol },
                MachInst::CallSym { symbol } | MachInst::Call { callee: symbol, .. },
            ) => p_symbol.matches(symbol),
            (
                InstructionPattern::La {
                    rd: p_rd,
                    symbol: p_symbol,
                },
                MachInst::La { rd, symbol },
            ) => p_rd.matches(rd) && p_symbol.matches(symbol),
            (InstructionPattern::Ret, inst) => inst.is_return(),
            _ => false,
        }
    }
}

/// Find a pattern in an instruction sequence
///
/// Returns the index of the first match, or None if not found
pub fn find_pattern(instructions: &[MachInst], pattern: &[InstructionPattern]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }

    'outer: for start in 0..=instructions.len().saturating_sub(pattern.len()) {
        for (i, pat) in pattern.iter().enumerate() {
            match instructions.get(start + i) {
                Some(inst) if pat.matches(inst) => {}
                _ => continue 'outer,
            }
        }
        return Some(start);
    }
    None
}

/// Assert that an instruction sequence contains a pattern
///
/// Panics with a descriptive message if the pattern is not found
pub fn assert_has_pattern(instructions: &[MachInst], pattern: &[InstructionPattern]) {
    if find_pattern(instructions, pattern).is_none() {
        panic!(
            "Pattern not found in instruction sequence.\n\nExpected pattern:\n{}\n\nActual instructions:\n{}",
            format_patterns(pattern),
            format_instructions(instructions)
        );
    }
}

/// Assert that instructions match a pattern exactly
pub fn assert_matches(instructions: &[MachInst], pattern: &[InstructionPattern]) {
    if instructions.len() != pattern.len() {
        panic!(
            "Instruction count mismatch: expected {}, got {}.\n\nExpected pattern:\n{}\n\nActual instructions:\n{}",
            pattern.len(),
            instructions.len(),
            format_patterns(pattern),
            format_instructions(instructions)
        );
    }

    for (i, (inst, pat)) in instructions.iter().zip(pattern.iter()).enumerate() {
        if !pat.matches(inst) {
            panic!(
                "Instruction mismatch at index {}:\nExpected: {:?}\nActual:   {}\n\nFull instructions:\n{}",
                i,
                pat,
                inst,
                format_instructions(instructions)
            );
        }
    }
}

fn format_patterns(patterns: &[InstructionPattern]) -> String {
    patterns
        .iter()
        .map(|p| format!("  {:?}", p))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_instructions(instructions: &[MachInst]) -> String {
    instructions
        .iter()
        .map(|i| format!("  {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Count instructions matching a single pattern
pub fn count_matching(instructions: &[MachInst], pattern: &InstructionPattern) -> usize {
    instructions.iter().filter(|i| pattern.matches(i)).count()
}

/// Count instructions with a given assembly mnemonic (`"addw"`, `"call"`, ...)
pub fn count_mnemonic(instructions: &[MachInst], mnemonic: &str) -> usize {
    instructions
        .iter()
        .filter(|i| i.mnemonic() == mnemonic)
        .count()
}

pub fn has_mnemonic(instructions: &[MachInst], mnemonic: &str) -> bool {
    instructions.iter().any(|i| i.mnemonic() == mnemonic)
}

/// Helper extension trait for machine instructions
pub trait InstructionExt {
    /// The mnemonic the instruction prints with.
    fn mnemonic(&self) -> String;
}

impl InstructionExt for MachInst {
    fn mnemonic(&self) -> String {
        let text = self.to_string();
        text.split('\t').next().unwrap_or_default().to_string()
    }
}
