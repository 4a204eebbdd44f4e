//! Instrumented code against the simulated shield runtime.

use aphotic_shield::{ShieldOptions, ViolationKind};
use remniw::ir::{BinaryOp, CmpCond, FunctionBuilder, Module, ReturnKind, Signature, Type, Value};
use remniw::test_harness::*;

fn heap_module(body: impl FnOnce(&mut FunctionBuilder)) -> Module {
    let mut module = Module::new("heap");
    module
        .declare_extern(
            "malloc",
            Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::Ptr)),
        )
        .declare_extern("free", Signature::new(vec![Type::Ptr], ReturnKind::Void));

    let mut b = FunctionBuilder::new("main", Signature::new(vec![], ReturnKind::Scalar(Type::I64)));
    body(&mut b);
    module.push_function(b.finish());
    module
}

fn malloc(b: &mut FunctionBuilder, size: i64) -> remniw::ir::VReg {
    b.call("malloc", vec![Value::Imm(size)], 1)[0]
}

fn free(b: &mut FunctionBuilder, ptr: impl Into<Value>) {
    b.call("free", vec![ptr.into()], 0);
}

fn assert_trap(module: &Module, kind: ViolationKind) {
    let result = run_shielded(module, "main", &[]).expect("compile and run");
    let violation = result
        .violation()
        .unwrap_or_else(|| panic!("expected {kind:?}, got {:?}", result.outcome));
    assert_eq!(violation.kind, kind);
    assert!(violation.address >= HEAP_BASE, "{violation}");
}

fn overflow_module() -> Module {
    heap_module(|b| {
        let p = malloc(b, 8);
        b.store(Type::I8, 1, p, 0);
        b.load(Type::I8, p, 8);
        free(b, p);
        b.ret(vec![Value::Imm(0)]);
    })
}

#[test]
fn test_overflow_traps_only_when_instrumented() {
    let module = overflow_module();
    let plain = run_function(&module, "main", &[]).unwrap();
    assert_eq!(plain.returned(), Some(0));

    assert_trap(&module, ViolationKind::BufferOverflow);
}

#[test]
fn test_underflow_traps() {
    let module = heap_module(|b| {
        let p = malloc(b, 16);
        let v = b.load(Type::I64, p, -8);
        b.ret(vec![v.into()]);
    });
    assert_trap(&module, ViolationKind::BufferUnderflow);
}

#[test]
fn test_use_after_free_traps() {
    let module = heap_module(|b| {
        let p = malloc(b, 32);
        b.store(Type::I64, 7, p, 0);
        free(b, p);
        let v = b.load(Type::I64, p, 0);
        b.ret(vec![v.into()]);
    });
    assert_trap(&module, ViolationKind::UseAfterFree);
}

#[test]
fn test_double_free_traps() {
    let module = heap_module(|b| {
        let p = malloc(b, 8);
        free(b, p);
        free(b, p);
        b.ret(vec![Value::Imm(0)]);
    });
    assert_trap(&module, ViolationKind::DoubleFree);
}

#[test]
fn test_interior_free_traps() {
    let module = heap_module(|b| {
        let p = malloc(b, 32);
        let interior = b.binary(BinaryOp::Add, Type::Ptr, p, 8);
        free(b, interior);
        b.ret(vec![Value::Imm(0)]);
    });
    assert_trap(&module, ViolationKind::InvalidFree);
}

#[test]
fn test_free_of_null_is_ignored() {
    let module = heap_module(|b| {
        free(b, Value::Imm(0));
        b.ret(vec![Value::Imm(9)]);
    });
    assert_eq!(run_shielded(&module, "main", &[]).unwrap().returned(), Some(9));
}

/// Fill a 16-byte buffer with 1..=16 and sum it back.
fn in_bounds_module() -> Module {
    heap_module(|b| {
        let fill = b.new_block();
        let sum_header = b.new_block();
        let sum_body = b.new_block();
        let done = b.new_block();

        let p = malloc(b, 16);
        let i = b.copy(Type::I64, 0);
        let total = b.copy(Type::I64, 0);
        b.br(fill);

        b.switch_to(fill);
        let addr = b.binary(BinaryOp::Add, Type::Ptr, p, i);
        let next = b.binary(BinaryOp::Add, Type::I64, i, 1);
        b.store(Type::I8, next, addr, 0);
        b.assign(Type::I64, i, next);
        let more = b.icmp(CmpCond::Ult, Type::I64, i, 16);
        b.cond_br(more, fill, sum_header);

        b.switch_to(sum_header);
        b.assign(Type::I64, i, 0);
        b.br(sum_body);

        b.switch_to(sum_body);
        let addr = b.binary(BinaryOp::Add, Type::Ptr, p, i);
        let byte = b.load(Type::I8, addr, 0);
        let wide = b.cast(remniw::ir::CastOp::Zext, Type::I8, Type::I64, byte);
        let added = b.binary(BinaryOp::Add, Type::I64, total, wide);
        b.assign(Type::I64, total, added);
        let next = b.binary(BinaryOp::Add, Type::I64, i, 1);
        b.assign(Type::I64, i, next);
        let more = b.icmp(CmpCond::Ult, Type::I64, i, 16);
        b.cond_br(more, sum_body, done);

        b.switch_to(done);
        free(b, p);
        b.ret(vec![total.into()]);
    })
}

#[test]
fn test_instrumentation_preserves_clean_programs() {
    let module = in_bounds_module();
    let plain = run_function(&module, "main", &[]).unwrap();
    let shielded = run_shielded(&module, "main", &[]).unwrap();
    assert_eq!(plain.returned(), Some(136));
    assert_eq!(shielded.returned(), Some(136));
    assert!(shielded.steps > plain.steps);
}

#[test]
fn test_instrumented_calls_are_selected() {
    let module = in_bounds_module();
    let options = remniw::CompileOptions::default()
        .with_parallel(false)
        .with_instrumentation(true);
    let compiled = remniw::compile_module(&module, &options).unwrap();
    let insts = function_insts(&compiled, "main");

    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_init")), 1);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_alloc")), 1);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_dealloc")), 1);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_check_store")), 1);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_check_load")), 1);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("malloc")), 0);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("free")), 0);

    let image = compiled.to_object().unwrap();
    let undefined = image.undefined_symbols();
    assert!(undefined.contains("as_check_load"));
    assert!(!undefined.contains("malloc"));
}

#[test]
fn test_stack_accesses_are_not_checked() {
    let mut module = Module::new("stack");
    let mut b = FunctionBuilder::new("main", Signature::new(vec![], ReturnKind::Scalar(Type::I64)));
    let slot = b.alloca(8, 8);
    b.store(Type::I64, 11, slot, 0);
    let v = b.load(Type::I64, slot, 0);
    b.ret(vec![v.into()]);
    module.push_function(b.finish());

    let options = remniw::CompileOptions::default()
        .with_parallel(false)
        .with_instrumentation(true);
    let compiled = remniw::compile_module(&module, &options).unwrap();
    let insts = function_insts(&compiled, "main");
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_check_load")), 0);
    assert_eq!(count_matching(&insts, &InstructionPattern::call("as_check_store")), 0);
    assert_eq!(run_shielded(&module, "main", &[]).unwrap().returned(), Some(11));
}

#[test]
fn test_registry_tracks_simulated_allocations() {
    let module = heap_module(|b| {
        let p = malloc(b, 24);
        let q = malloc(b, 40);
        free(b, q);
        b.ret(vec![p.into()]);
    });
    let options = remniw::CompileOptions::default()
        .with_parallel(false)
        .with_instrumentation(true);
    let image = remniw::compile_module(&module, &options)
        .unwrap()
        .to_object()
        .unwrap();
    let mut simulator = Simulator::new(&image).unwrap();
    let result = simulator.call("main", &[]).unwrap();
    let p = result.returned().unwrap() as u64;

    let registry = simulator.registry();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.live_count(), 1);
    let region = registry.region(p).expect("first allocation registered");
    assert_eq!(region.size, 24);
    assert!(region.live);
}

fn shielded_simulator(module: &Module, shield_options: &str) -> Simulator {
    let options = remniw::CompileOptions::default()
        .with_parallel(false)
        .with_instrumentation(true);
    let image = remniw::compile_module(module, &options)
        .unwrap()
        .to_object()
        .unwrap();
    let shield_options = ShieldOptions::parse(shield_options).unwrap();
    Simulator::with_shield_options(&image, &shield_options).unwrap()
}

#[test]
fn test_far_overflow_traps() {
    let module = heap_module(|b| {
        let p = malloc(b, 8);
        let v = b.load(Type::I64, p, 64);
        b.ret(vec![v.into()]);
    });
    assert_trap(&module, ViolationKind::BufferOverflow);

    let module = heap_module(|b| {
        let p = malloc(b, 8);
        b.store(Type::I64, 5, p, -2048);
        b.ret(vec![Value::Imm(0)]);
    });
    assert_trap(&module, ViolationKind::BufferUnderflow);
}

#[test]
fn test_allocations_past_the_limit_are_unguarded() {
    // Overflow the second block first; it is unguarded and passes, so the
    // trap comes from the first.
    let module = heap_module(|b| {
        let p = malloc(b, 8);
        let q = malloc(b, 8);
        b.load(Type::I8, q, 8);
        b.load(Type::I8, p, 8);
        b.ret(vec![q.into()]);
    });
    let mut simulator = shielded_simulator(&module, "MaxSimultaneousAllocations=1");
    let result = simulator.call("main", &[]).unwrap();
    let violation = result.violation().expect("first block is guarded");
    assert_eq!(violation.kind, ViolationKind::BufferOverflow);
    assert_eq!(simulator.registry().len(), 1);
    assert_eq!(simulator.pool().layout().slots(), 1);

    let mut simulator = shielded_simulator(&module, "Enabled=0");
    assert!(simulator.call("main", &[]).unwrap().violation().is_none());
    assert!(simulator.registry().is_empty());
}

#[test]
fn test_quarantine_budget_evicts_freed_blocks() {
    let module = heap_module(|b| {
        let p = malloc(b, 32);
        let q = malloc(b, 32);
        free(b, p);
        free(b, q);
        b.ret(vec![q.into()]);
    });

    let mut simulator = shielded_simulator(&module, "QuarantineSize=32");
    let q = simulator.call("main", &[]).unwrap().returned().unwrap() as u64;
    let registry = simulator.registry();
    assert_eq!(registry.len(), 1);
    assert!(!registry.region(q).expect("newest block stays quarantined").live);

    let mut simulator = shielded_simulator(&module, "QuarantineSize=0");
    simulator.call("main", &[]).unwrap();
    assert!(simulator.registry().is_empty());
}

#[test]
fn test_reused_slot_is_zeroed() {
    let module = heap_module(|b| {
        let p = malloc(b, 8);
        b.store(Type::I64, 99, p, 0);
        free(b, p);
        let q = malloc(b, 8);
        let v = b.load(Type::I64, q, 0);
        b.ret(vec![v.into()]);
    });
    let mut simulator =
        shielded_simulator(&module, "MaxSimultaneousAllocations=1:QuarantineSize=0");
    assert_eq!(simulator.call("main", &[]).unwrap().returned(), Some(0));
}
