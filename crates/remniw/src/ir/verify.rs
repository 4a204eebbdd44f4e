//! Structural and dataflow checks run before instruction selection.
//!
//! Selection assumes well-formed input; everything it would otherwise have
//! to guard against is rejected here with a precise location.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{
    BlockId, CastOp, CmpCond, Function, GlobalInit, Inst, Module, ReturnKind, Type, VReg, Value,
};
use crate::error::Location;
use crate::{Error, Result};

/// Largest alignment a frame object may request (the ABI stack alignment).
pub const MAX_FRAME_ALIGN: u32 = 16;

pub fn verify_module(module: &Module) -> Result<()> {
    let mut seen = HashSet::new();
    let names = module
        .functions
        .iter()
        .map(|f| f.name.as_str())
        .chain(module.globals.iter().map(|g| g.name.as_str()))
        .chain(module.externs.iter().map(|e| e.name.as_str()));
    for name in names {
        if !seen.insert(name) {
            return Err(Error::malformed(
                Location::function(name),
                "symbol defined more than once",
            ));
        }
    }

    for global in &module.globals {
        let location = Location::function(&global.name);
        if !global.align.is_power_of_two() {
            return Err(Error::malformed(location, "global alignment must be a power of two"));
        }
        if global.init.len() > global.size {
            return Err(Error::malformed(
                location,
                format!(
                    "initializer covers {} bytes but the object is {} bytes",
                    global.init.len(),
                    global.size
                ),
            ));
        }
        if let GlobalInit::Addr { symbol, .. } = &global.init
            && !module.has_symbol(symbol)
        {
            return Err(Error::malformed(location, format!("unknown symbol `{symbol}`")));
        }
    }

    for function in &module.functions {
        verify_function(module, function)?;
    }
    Ok(())
}

pub fn verify_function(module: &Module, func: &Function) -> Result<()> {
    let name = func.name.as_str();
    if func.params.len() != func.signature.params.len() {
        return Err(Error::malformed(
            Location::function(name),
            format!(
                "{} parameter registers for {} declared parameters",
                func.params.len(),
                func.signature.params.len()
            ),
        ));
    }
    if let ReturnKind::Memory { size, align } = func.signature.ret
        && (size == 0 || !align.is_power_of_two())
    {
        return Err(Error::malformed(
            Location::function(name),
            "memory return needs a non-zero size and power-of-two alignment",
        ));
    }

    let Some(entry) = func.entry() else {
        return Err(Error::malformed(Location::function(name), "function has no blocks"));
    };

    let mut ids = HashSet::new();
    for block in &func.blocks {
        if !ids.insert(block.id) {
            return Err(Error::malformed(
                Location::block(name, block.id),
                "duplicate block id",
            ));
        }
    }

    for block in &func.blocks {
        if block.terminator().is_none() {
            return Err(Error::malformed(
                Location::block(name, block.id),
                "block does not end in a terminator",
            ));
        }
        for (index, inst) in block.insts.iter().enumerate() {
            let location = Location::inst(name, block.id, index);
            if inst.is_terminator() && index + 1 != block.insts.len() {
                return Err(Error::malformed(location, "terminator in the middle of a block"));
            }
            for succ in inst.successors() {
                if !ids.contains(&succ) {
                    return Err(Error::malformed(location, format!("unknown branch target {succ}")));
                }
                if succ == entry.id {
                    return Err(Error::malformed(location, "branch to the entry block"));
                }
            }
            check_inst(module, func, inst, location)?;
        }
    }

    check_types(func)?;
    check_definitions(func)
}

fn check_inst(module: &Module, func: &Function, inst: &Inst, location: Location) -> Result<()> {
    for value in inst.operands() {
        if let Value::Global(symbol) = value
            && !module.has_symbol(symbol)
        {
            return Err(Error::malformed(location, format!("unknown symbol `{symbol}`")));
        }
    }

    match inst {
        Inst::Binary { ty, kind, .. } => {
            if !matches!(ty, Type::I32 | Type::I64 | Type::Ptr) {
                return Err(Error::malformed(
                    location,
                    format!("`{kind}` is only defined on i32, i64 and ptr, not {ty}"),
                ));
            }
        }
        Inst::Icmp { cond, ty, .. } => {
            let signed = matches!(cond, CmpCond::Slt | CmpCond::Sle | CmpCond::Sgt | CmpCond::Sge);
            if signed && ty.bits() < 32 {
                return Err(Error::unsupported(
                    location,
                    format!("signed comparison on {ty}; sign-extend to i32 first"),
                ));
            }
        }
        Inst::Cast { kind, from, to, .. } => {
            let ok = match kind {
                CastOp::Zext | CastOp::Sext => from.bits() < to.bits(),
                CastOp::Trunc => from.bits() > to.bits(),
            };
            if !ok {
                return Err(Error::malformed(
                    location,
                    format!("invalid {kind} from {from} to {to}"),
                ));
            }
        }
        Inst::Alloca { size, align, .. } => {
            if *size == 0 || !align.is_power_of_two() || *align > MAX_FRAME_ALIGN {
                return Err(Error::malformed(
                    location,
                    format!("alloca of {size} bytes with alignment {align}"),
                ));
            }
        }
        Inst::Call { callee, args, dsts } => {
            let Some(sig) = module.signature_of(callee) else {
                return Err(Error::malformed(location, format!("call to unknown function `{callee}`")));
            };
            if args.len() != sig.params.len() {
                return Err(Error::malformed(
                    location,
                    format!(
                        "`{callee}` takes {} arguments, {} given",
                        sig.params.len(),
                        args.len()
                    ),
                ));
            }
            if dsts.len() != sig.ret.value_count() {
                return Err(Error::malformed(
                    location,
                    format!(
                        "`{callee}` returns {} values, {} destinations given",
                        sig.ret.value_count(),
                        dsts.len()
                    ),
                ));
            }
        }
        Inst::Ret { values } => {
            if values.len() != func.signature.ret.value_count() {
                return Err(Error::malformed(
                    location,
                    format!(
                        "return of {} values from a function returning {}",
                        values.len(),
                        func.signature.ret
                    ),
                ));
            }
        }
        Inst::Copy { .. }
        | Inst::Load { .. }
        | Inst::Store { .. }
        | Inst::Br { .. }
        | Inst::CondBr { .. } => {}
    }
    Ok(())
}

/// Type produced by the destination of `inst`. Call destinations take their
/// types from the callee and are only checked for count.
fn def_type(inst: &Inst) -> Option<Type> {
    match inst {
        Inst::Binary { ty, .. } | Inst::Copy { ty, .. } | Inst::Load { ty, .. } => Some(*ty),
        Inst::Icmp { .. } => Some(Type::I1),
        Inst::Cast { to, .. } => Some(*to),
        Inst::Alloca { .. } => Some(Type::Ptr),
        Inst::Call { .. }
        | Inst::Store { .. }
        | Inst::Br { .. }
        | Inst::CondBr { .. }
        | Inst::Ret { .. } => None,
    }
}

/// Every definition of a register must agree on its type. `ptr` and `i64`
/// are interchangeable.
fn check_types(func: &Function) -> Result<()> {
    fn class(ty: Type) -> Type {
        if ty == Type::Ptr { Type::I64 } else { ty }
    }

    let mut types: HashMap<VReg, Type> = HashMap::new();
    for (reg, ty) in func.params.iter().zip(&func.signature.params) {
        types.insert(*reg, class(*ty));
    }
    for block in &func.blocks {
        for (index, inst) in block.insts.iter().enumerate() {
            let Some(ty) = def_type(inst) else { continue };
            for reg in inst.defs() {
                if let Some(prev) = types.insert(reg, class(ty))
                    && prev != class(ty)
                {
                    return Err(Error::malformed(
                        Location::inst(&func.name, block.id, index),
                        format!("{reg} redefined as {ty} after being {prev}"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Must-define analysis: a use is legal only if every path from the entry
/// defines the register first.
fn check_definitions(func: &Function) -> Result<()> {
    let index_of: HashMap<BlockId, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id, i))
        .collect();
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); func.blocks.len()];
    for (i, block) in func.blocks.iter().enumerate() {
        if let Some(term) = block.terminator() {
            for succ in term.successors() {
                preds[index_of[&succ]].push(i);
            }
        }
    }

    // `None` is "everything" (not yet reached).
    let mut defined_out: Vec<Option<BTreeSet<VReg>>> = vec![None; func.blocks.len()];
    let params: BTreeSet<VReg> = func.params.iter().copied().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for (i, block) in func.blocks.iter().enumerate() {
            let mut set = if i == 0 {
                Some(params.clone())
            } else {
                meet(preds[i].iter().map(|&p| defined_out[p].as_ref()))
            };
            if let Some(set) = set.as_mut() {
                for inst in &block.insts {
                    set.extend(inst.defs());
                }
            }
            if set != defined_out[i] {
                defined_out[i] = set;
                changed = true;
            }
        }
    }

    for (i, block) in func.blocks.iter().enumerate() {
        let mut defined = if i == 0 {
            params.clone()
        } else {
            match meet(preds[i].iter().map(|&p| defined_out[p].as_ref())) {
                Some(set) => set,
                // unreachable
                None => continue,
            }
        };
        for (index, inst) in block.insts.iter().enumerate() {
            for reg in inst.uses() {
                if !defined.contains(&reg) {
                    return Err(Error::malformed(
                        Location::inst(&func.name, block.id, index),
                        format!("{reg} may be used before it is defined"),
                    ));
                }
            }
            defined.extend(inst.defs());
        }
    }
    Ok(())
}

fn meet<'a>(sets: impl Iterator<Item = Option<&'a BTreeSet<VReg>>>) -> Option<BTreeSet<VReg>> {
    let mut result: Option<BTreeSet<VReg>> = None;
    for set in sets.flatten() {
        result = Some(match result {
            None => set.clone(),
            Some(acc) => acc.intersection(set).copied().collect(),
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, FunctionBuilder, Signature};

    fn module_with(func: Function) -> Module {
        let mut module = Module::new("test");
        module.push_function(func);
        module
    }

    #[test]
    fn test_accepts_loop_with_redefinition() {
        let mut b = FunctionBuilder::new(
            "count",
            Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
        );
        let n = b.param(0);
        let i = b.copy(Type::I64, 0);
        let head = b.new_block();
        let body = b.new_block();
        let exit = b.new_block();
        b.br(head);
        b.switch_to(head);
        let c = b.icmp(CmpCond::Slt, Type::I64, i, n);
        b.cond_br(c, body, exit);
        b.switch_to(body);
        let next = b.binary(BinaryOp::Add, Type::I64, i, 1);
        b.assign(Type::I64, i, next);
        b.br(head);
        b.switch_to(exit);
        b.ret(vec![i.into()]);

        let module = module_with(b.finish());
        verify_module(&module).expect("valid loop");
    }

    #[test]
    fn test_rejects_use_on_one_path_only() {
        let mut b = FunctionBuilder::new(
            "maybe",
            Signature::new(vec![Type::I64], ReturnKind::Scalar(Type::I64)),
        );
        let x = b.param(0);
        let then_bb = b.new_block();
        let join = b.new_block();
        b.cond_br(x, then_bb, join);
        b.switch_to(then_bb);
        let y = b.copy(Type::I64, 7);
        b.br(join);
        b.switch_to(join);
        b.ret(vec![y.into()]);

        let err = verify_module(&module_with(b.finish())).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("function `maybe`, block bb2, instruction #0"), "{text}");
        assert!(text.contains("%1 may be used before it is defined"), "{text}");
    }

    #[test]
    fn test_rejects_missing_terminator_and_narrow_binary() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], ReturnKind::Void));
        b.copy(Type::I64, 1);
        let err = verify_module(&module_with(b.finish())).unwrap_err();
        assert!(err.to_string().contains("does not end in a terminator"));

        let mut b = FunctionBuilder::new("g", Signature::new(vec![], ReturnKind::Void));
        b.binary(BinaryOp::Add, Type::I8, 1, 2);
        b.ret(vec![]);
        let err = verify_module(&module_with(b.finish())).unwrap_err();
        assert!(matches!(err, Error::MalformedIr { .. }));
    }

    #[test]
    fn test_rejects_unknown_callee_and_arity() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], ReturnKind::Void));
        b.call("nowhere", vec![], 0);
        b.ret(vec![]);
        let err = verify_module(&module_with(b.finish())).unwrap_err();
        assert!(err.to_string().contains("unknown function `nowhere`"));

        let mut module = Module::new("m");
        module.declare_extern("putchar", Signature::new(vec![Type::I32], ReturnKind::Scalar(Type::I32)));
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], ReturnKind::Void));
        b.call("putchar", vec![], 1);
        b.ret(vec![]);
        module.push_function(b.finish());
        let err = verify_module(&module).unwrap_err();
        assert!(err.to_string().contains("takes 1 arguments, 0 given"));
    }

    #[test]
    fn test_rejects_branch_to_entry() {
        let mut b = FunctionBuilder::new("spin", Signature::new(vec![], ReturnKind::Void));
        let entry = b.entry_block();
        b.br(entry);
        let err = verify_module(&module_with(b.finish())).unwrap_err();
        assert!(err.to_string().contains("branch to the entry block"));
    }
}
