// Instruction selection: IR → RV64IM machine instructions over virtual registers.
//
// This module is organized into submodules:
// - `selector`: Selector state, operand materialization, pre-scan
// - `alu`: Arithmetic, logic, comparisons, casts
// - `memory`: Loads, stores, allocas, shield instrumentation
// - `control_flow`: Branches (with compare fusion) and returns
// - `calls`: Calls and incoming parameters

mod alu;
mod calls;
mod control_flow;
mod memory;
mod selector;

use crate::ir::{Function, Inst, Module};
use crate::riscv::{MachBlock, MachFunction};
use crate::Result;

use selector::Selector;

/// Knobs that change which patterns are selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectOptions {
    /// Insert aphotic shield checks around memory accesses and route
    /// `malloc`/`free` through the guarded allocator.
    pub instrument: bool,
}

/// Select machine instructions for one (verified) function.
pub fn select_function(
    module: &Module,
    func: &Function,
    options: SelectOptions,
) -> Result<MachFunction> {
    let mut sel = Selector::new(module, func, options);
    let mut blocks = Vec::with_capacity(func.blocks.len());

    for (block_index, block) in func.blocks.iter().enumerate() {
        sel.begin_block(block.id, func.blocks.get(block_index + 1).map(|b| b.id));
        if block_index == 0 {
            calls::lower_entry(&mut sel);
        }

        let mut index = 0;
        while index < block.insts.len() {
            sel.inst_index = index;
            let inst = &block.insts[index];
            if let Some(next) = block.insts.get(index + 1)
                && sel.can_fuse(inst, next)
            {
                control_flow::lower_fused_branch(&mut sel, inst, next)?;
                index += 2;
                continue;
            }
            lower_inst(&mut sel, inst)?;
            index += 1;
        }

        blocks.push(MachBlock {
            id: block.id,
            insts: sel.take_insts(),
        });
    }

    tracing::debug!(
        function = %func.name,
        blocks = blocks.len(),
        insts = blocks.iter().map(|b| b.insts.len()).sum::<usize>(),
        "selected"
    );
    Ok(sel.finish(blocks))
}

fn lower_inst(sel: &mut Selector<'_>, inst: &Inst) -> Result<()> {
    match inst {
        Inst::Binary {
            kind,
            ty,
            dst,
            lhs,
            rhs,
        } => alu::lower_binary(sel, *kind, *ty, *dst, lhs, rhs),
        Inst::Icmp {
            cond,
            ty,
            dst,
            lhs,
            rhs,
        } => alu::lower_icmp(sel, *cond, *ty, *dst, lhs, rhs),
        Inst::Cast {
            kind,
            from,
            to,
            dst,
            src,
        } => alu::lower_cast(sel, *kind, *from, *to, *dst, src),
        Inst::Copy { ty, dst, src } => alu::lower_copy(sel, *ty, *dst, src),
        Inst::Load {
            ty,
            dst,
            addr,
            offset,
        } => memory::lower_load(sel, *ty, *dst, addr, *offset),
        Inst::Store {
            ty,
            value,
            addr,
            offset,
        } => memory::lower_store(sel, *ty, value, addr, *offset),
        Inst::Alloca { dst, size, align } => memory::lower_alloca(sel, *dst, *size, *align),
        Inst::Call { callee, args, dsts } => calls::lower_call(sel, callee, args, dsts),
        Inst::Br { target } => {
            control_flow::lower_br(sel, *target);
            Ok(())
        }
        Inst::CondBr {
            cond,
            then_block,
            else_block,
        } => control_flow::lower_cond_br(sel, cond, *then_block, *else_block),
        Inst::Ret { values } => control_flow::lower_ret(sel, values),
    }
}
