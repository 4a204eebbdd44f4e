// Calls and incoming parameters.
//
// Both are selected as ABI pseudo-instructions carrying virtual registers;
// the register moves and stack traffic they imply are produced by frame
// lowering once every operand has a location.

use crate::abi::shield_symbols;
use crate::ir::{ReturnKind, Type, VReg, Value};
use crate::riscv::{FrameObjectKind, MachInst, Reg};
use crate::Result;

use super::selector::Selector;

/// Shield replacements for the allocation entry points.
fn redirect(callee: &str) -> &str {
    match callee {
        "malloc" => shield_symbols::ALLOC,
        "free" => shield_symbols::DEALLOC,
        other => other,
    }
}

pub(crate) fn lower_entry(sel: &mut Selector<'_>) {
    let mut dsts = Vec::with_capacity(sel.func.params.len() + 1);
    if matches!(sel.func.signature.ret, ReturnKind::Memory { .. }) {
        let sret = sel.new_vreg();
        sel.sret = Some(sret);
        dsts.push(sret);
    }
    dsts.extend(sel.func.params.iter().map(|p| Reg::Virt(*p)));
    sel.emit(MachInst::EntryArgs { dsts });

    if sel.options.instrument && sel.func.name == "main" {
        sel.emit(MachInst::Call {
            callee: shield_symbols::INIT.to_string(),
            args: Vec::new(),
            rets: Vec::new(),
        });
    }
}

pub(crate) fn lower_call(
    sel: &mut Selector<'_>,
    callee: &str,
    args: &[Value],
    dsts: &[VReg],
) -> Result<()> {
    let Some(signature) = sel.module.signature_of(callee) else {
        return Err(sel.malformed(format!("call to unknown function `{callee}`")));
    };
    if signature.params.len() != args.len() {
        return Err(sel.malformed(format!("argument count mismatch calling `{callee}`")));
    }
    let params: Vec<Type> = signature.params.clone();
    let ret = signature.ret.clone();

    let symbol = if sel.options.instrument {
        redirect(callee)
    } else {
        callee
    };

    let mut arg_regs = Vec::with_capacity(args.len() + 1);
    let mut result_buffer = None;
    if let ReturnKind::Memory { size, align } = ret {
        let index = sel.mf.add_frame_object(FrameObjectKind::CallTemp, size, align);
        let buffer = sel.new_vreg();
        sel.emit(MachInst::FrameAddr { rd: buffer, index });
        arg_regs.push(buffer);
        result_buffer = Some(index);
    }
    for (value, ty) in args.iter().zip(params) {
        arg_regs.push(sel.use_value(value, ty));
    }

    let rets = match result_buffer {
        Some(_) => Vec::new(),
        None => dsts.iter().map(|d| Reg::Virt(*d)).collect(),
    };
    sel.emit(MachInst::Call {
        callee: symbol.to_string(),
        args: arg_regs,
        rets,
    });

    if let (Some(index), Some(dst)) = (result_buffer, dsts.first()) {
        // Recompute rather than keep the buffer address live across the call.
        sel.emit(MachInst::FrameAddr {
            rd: Reg::Virt(*dst),
            index,
        });
    }
    Ok(())
}
