//! Property-based tests for the RV64IM back end.
//!
//! Uses `proptest` to generate random inputs and compare compiled code
//! running in the simulator against a Rust reference:
//! - Any 64-bit constant materializes exactly
//! - Binary operations match RISC-V semantics for register and immediate operands
//! - Comparisons agree whether materialized or fused into a branch
//! - Random register pressure never changes the computed value

use proptest::prelude::*;
use remniw::ir::{
    BinaryOp, CastOp, CmpCond, FunctionBuilder, Module, ReturnKind, Signature, Type, Value, VReg,
};
use remniw::test_harness::*;
use remniw::{CompileOptions, SpillStrategy};

const OPS: [BinaryOp; 13] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::SDiv,
    BinaryOp::UDiv,
    BinaryOp::SRem,
    BinaryOp::URem,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
    BinaryOp::Shl,
    BinaryOp::LShr,
    BinaryOp::AShr,
];

const CONDS: [CmpCond; 10] = [
    CmpCond::Eq,
    CmpCond::Ne,
    CmpCond::Slt,
    CmpCond::Sle,
    CmpCond::Sgt,
    CmpCond::Sge,
    CmpCond::Ult,
    CmpCond::Ule,
    CmpCond::Ugt,
    CmpCond::Uge,
];

fn reference_i64(op: BinaryOp, a: i64, b: i64) -> i64 {
    let (ua, ub) = (a as u64, b as u64);
    let shift = (b & 63) as u32;
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::SDiv if b == 0 => -1,
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::UDiv if b == 0 => -1,
        BinaryOp::UDiv => (ua / ub) as i64,
        BinaryOp::SRem if b == 0 => a,
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::URem if b == 0 => a,
        BinaryOp::URem => (ua % ub) as i64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(shift),
        BinaryOp::LShr => (ua >> shift) as i64,
        BinaryOp::AShr => a >> shift,
    }
}

fn reference_i32(op: BinaryOp, a: i32, b: i32) -> i64 {
    let (ua, ub) = (a as u32, b as u32);
    let shift = (b & 31) as u32;
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::SDiv if b == 0 => -1,
        BinaryOp::SDiv => a.wrapping_div(b),
        BinaryOp::UDiv if b == 0 => -1,
        BinaryOp::UDiv => (ua / ub) as i32,
        BinaryOp::SRem if b == 0 => a,
        BinaryOp::SRem => a.wrapping_rem(b),
        BinaryOp::URem if b == 0 => a,
        BinaryOp::URem => (ua % ub) as i32,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(shift),
        BinaryOp::LShr => (ua >> shift) as i32,
        BinaryOp::AShr => a >> shift,
    };
    i64::from(result)
}

/// `f(a, b) = a <op> b`, or `f(a) = a <op> imm` when `imm` is given.
fn binary_module(op: BinaryOp, ty: Type, imm: Option<i64>) -> Module {
    let params = if imm.is_some() { vec![ty] } else { vec![ty, ty] };
    let mut b = FunctionBuilder::new("f", Signature::new(params, ReturnKind::Scalar(ty)));
    let rhs = match imm {
        Some(n) => Value::Imm(n),
        None => Value::Reg(b.param(1)),
    };
    let result = b.binary(op, ty, b.param(0), rhs);
    b.ret(vec![result.into()]);
    let mut module = Module::new("prop");
    module.push_function(b.finish());
    module
}

fn returned(module: &Module, args: &[i64]) -> i64 {
    let result = run_function(module, "f", args).expect("compile and run");
    result
        .returned()
        .unwrap_or_else(|| panic!("no return: {:?}", result.outcome))
}

/// Interesting operands: small values, boundaries and anything.
fn operand_i64() -> impl Strategy<Value = i64> {
    prop_oneof![
        -4i64..=4,
        Just(i64::MIN),
        Just(i64::MAX),
        -2048i64..=2047,
        any::<i64>(),
    ]
}

fn operand_i32() -> impl Strategy<Value = i32> {
    prop_oneof![
        -4i32..=4,
        Just(i32::MIN),
        Just(i32::MAX),
        -2048i32..=2047,
        any::<i32>(),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any constant survives materialization.
    #[test]
    fn constant_materializes_exactly(value in any::<i64>()) {
        let mut b = FunctionBuilder::new(
            "f",
            Signature::new(vec![], ReturnKind::Scalar(Type::I64)),
        );
        let reg = b.copy(Type::I64, value);
        b.ret(vec![reg.into()]);
        let mut module = Module::new("prop");
        module.push_function(b.finish());
        prop_assert_eq!(returned(&module, &[]), value);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(60))]

    #[test]
    fn binary_i64_matches_reference(
        op in proptest::sample::select(OPS.to_vec()),
        a in operand_i64(),
        b in operand_i64(),
    ) {
        let module = binary_module(op, Type::I64, None);
        prop_assert_eq!(returned(&module, &[a, b]), reference_i64(op, a, b));
    }

    #[test]
    fn binary_i64_immediate_matches_reference(
        op in proptest::sample::select(OPS.to_vec()),
        a in operand_i64(),
        b in operand_i64(),
    ) {
        let module = binary_module(op, Type::I64, Some(b));
        prop_assert_eq!(returned(&module, &[a]), reference_i64(op, a, b));
    }

    #[test]
    fn binary_i32_matches_reference(
        op in proptest::sample::select(OPS.to_vec()),
        a in operand_i32(),
        b in operand_i32(),
    ) {
        let module = binary_module(op, Type::I32, None);
        prop_assert_eq!(
            returned(&module, &[i64::from(a), i64::from(b)]),
            reference_i32(op, a, b)
        );
    }

    #[test]
    fn binary_i32_immediate_matches_reference(
        op in proptest::sample::select(OPS.to_vec()),
        a in operand_i32(),
        b in operand_i32(),
    ) {
        let module = binary_module(op, Type::I32, Some(i64::from(b)));
        prop_assert_eq!(returned(&module, &[i64::from(a)]), reference_i32(op, a, b));
    }
}

/// `f(a, b)` twice over: `value` materializes the flag, `branch` branches
/// on it.
fn compare_module(cond: CmpCond) -> Module {
    let sig = || Signature::new(vec![Type::I64, Type::I64], ReturnKind::Scalar(Type::I64));

    let mut value = FunctionBuilder::new("value", sig());
    let flag = value.icmp(cond, Type::I64, value.param(0), value.param(1));
    let wide = value.cast(CastOp::Zext, Type::I1, Type::I64, flag);
    value.ret(vec![wide.into()]);

    let mut branch = FunctionBuilder::new("branch", sig());
    let yes = branch.new_block();
    let no = branch.new_block();
    let flag = branch.icmp(cond, Type::I64, branch.param(0), branch.param(1));
    branch.cond_br(flag, yes, no);
    branch.switch_to(yes);
    branch.ret(vec![Value::Imm(1)]);
    branch.switch_to(no);
    branch.ret(vec![Value::Imm(0)]);

    let mut module = Module::new("cmp");
    module.push_function(value.finish()).push_function(branch.finish());
    module
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(60))]

    #[test]
    fn comparisons_agree_with_reference(
        cond in proptest::sample::select(CONDS.to_vec()),
        a in operand_i64(),
        b in operand_i64(),
    ) {
        let module = compare_module(cond);
        let expected = i64::from(cond.evaluate(a, b));
        let image = compile_for_test(&module).unwrap().to_object().unwrap();
        let mut simulator = Simulator::new(&image).unwrap();
        prop_assert_eq!(simulator.call("value", &[a, b]).unwrap().returned(), Some(expected));
        prop_assert_eq!(simulator.call("branch", &[a, b]).unwrap().returned(), Some(expected));
    }
}

/// Sum of `x * c_k` over random coefficients, every product live until the
/// end.
fn pressure_module(coefficients: &[i64]) -> Module {
    let mut b = FunctionBuilder::new(
        "f",
        Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
    );
    let x = b.param(0);
    let products: Vec<VReg> = coefficients
        .iter()
        .map(|&c| b.binary(BinaryOp::Mul, Type::I64, x, c))
        .collect();
    let mut acc = b.copy(Type::I64, 0);
    for (index, product) in products.iter().enumerate().rev() {
        let scaled = b.binary(BinaryOp::Shl, Type::I64, acc, (index % 3) as i64);
        acc = b.binary(BinaryOp::Xor, Type::I64, scaled, *product);
    }
    b.ret(vec![acc.into()]);
    let mut module = Module::new("pressure");
    module.push_function(b.finish());
    module
}

fn pressure_reference(coefficients: &[i64], x: i64) -> i64 {
    let mut acc = 0i64;
    for (index, c) in coefficients.iter().enumerate().rev() {
        acc = (acc << (index % 3)) ^ x.wrapping_mul(*c);
    }
    acc
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn register_pressure_preserves_values(
        coefficients in prop::collection::vec(-1000i64..1000, 1..48),
        x in any::<i64>(),
        density in any::<bool>(),
    ) {
        let module = pressure_module(&coefficients);
        let strategy = if density { SpillStrategy::UseDensity } else { SpillStrategy::FurthestEnd };
        let options = CompileOptions::default()
            .with_parallel(false)
            .with_spill_heuristic(strategy);
        let result = run_with(&module, &options, "f", &[x]).unwrap();
        prop_assert_eq!(result.returned(), Some(pressure_reference(&coefficients, x)));
    }
}
