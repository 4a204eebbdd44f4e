//! Functions with more live values than registers: both spill heuristics
//! must produce code that computes the same thing.

use remniw::ir::{BinaryOp, FunctionBuilder, Module, ReturnKind, Signature, Type, Value, VReg};
use remniw::test_harness::*;
use remniw::{CompileOptions, SpillStrategy, compile_module};

const STRATEGIES: [SpillStrategy; 2] = [SpillStrategy::FurthestEnd, SpillStrategy::UseDensity];

fn options(strategy: SpillStrategy) -> CompileOptions {
    CompileOptions::default()
        .with_parallel(false)
        .with_spill_heuristic(strategy)
}

/// `count` values of the form `x * (k + 1) + k`, all live at once, then
/// folded with a non-commutative chain so order matters.
fn build_pressure(b: &mut FunctionBuilder, x: VReg, count: usize) -> VReg {
    let values: Vec<VReg> = (0..count)
        .map(|k| {
            let scaled = b.binary(BinaryOp::Mul, Type::I64, x, k as i64 + 1);
            b.binary(BinaryOp::Add, Type::I64, scaled, k as i64)
        })
        .collect();
    let mut acc = values[count - 1];
    for value in values[..count - 1].iter().rev() {
        acc = b.binary(BinaryOp::Sub, Type::I64, *value, acc);
    }
    acc
}

fn expected_pressure(x: i64, count: usize) -> i64 {
    let values: Vec<i64> = (0..count)
        .map(|k| x.wrapping_mul(k as i64 + 1).wrapping_add(k as i64))
        .collect();
    let mut acc = values[count - 1];
    for value in values[..count - 1].iter().rev() {
        acc = value.wrapping_sub(acc);
    }
    acc
}

fn pressure_module(count: usize) -> Module {
    let mut b = FunctionBuilder::new(
        "pressure",
        Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
    );
    let x = b.param(0);
    let result = build_pressure(&mut b, x, count);
    b.ret(vec![result.into()]);
    let mut module = Module::new("pressure");
    module.push_function(b.finish());
    module
}

#[test]
fn test_high_pressure_spills() {
    let module = pressure_module(40);
    for strategy in STRATEGIES {
        let compiled = compile_module(&module, &options(strategy)).unwrap();
        let function = compiled.function("pressure").unwrap();
        assert!(function.spilled > 0, "{strategy:?} spilled nothing");
        assert!(!function.frame.is_frameless());
    }
}

#[test]
fn test_spilled_code_computes_the_same_result() {
    let module = pressure_module(40);
    for x in [0, 3, -17, 1 << 40] {
        let expected = expected_pressure(x, 40);
        for strategy in STRATEGIES {
            let result = run_with(&module, &options(strategy), "pressure", &[x]).unwrap();
            assert_eq!(result.returned(), Some(expected), "{strategy:?} x={x}");
        }
    }
}

#[test]
fn test_low_pressure_does_not_spill() {
    let module = pressure_module(6);
    for strategy in STRATEGIES {
        let compiled = compile_module(&module, &options(strategy)).unwrap();
        assert_eq!(compiled.function("pressure").unwrap().spilled, 0);
    }
    assert_eq!(
        run_function(&module, "pressure", &[5]).unwrap().returned(),
        Some(expected_pressure(5, 6))
    );
}

#[test]
fn test_values_live_across_calls_under_pressure() {
    let mut module = Module::new("calls");
    module.declare_extern(
        "putchar",
        Signature::new(vec![Type::I32], ReturnKind::Scalar(Type::I32)),
    );

    let mut b = FunctionBuilder::new(
        "main",
        Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
    );
    let x = b.param(0);
    let values: Vec<VReg> = (0..20)
        .map(|k: i64| b.binary(BinaryOp::Add, Type::I64, x, k * 7))
        .collect();
    b.call("putchar", vec![Value::Imm(i64::from(b'.'))], 1);
    let mut acc = values[0];
    for value in &values[1..] {
        acc = b.binary(BinaryOp::Xor, Type::I64, acc, *value);
    }
    b.ret(vec![acc.into()]);
    module.push_function(b.finish());

    let expected = (0..20_i64).map(|k| 100 + k * 7).fold(0, |acc, v| acc ^ v);
    for strategy in STRATEGIES {
        let result = run_with(&module, &options(strategy), "main", &[100]).unwrap();
        assert_eq!(result.returned(), Some(expected), "{strategy:?}");
        assert_eq!(result.stdout(), ".");
    }
}
