// Branches and returns.
//
// A conditional branch becomes a `b<cond>` to one successor followed by a
// `j` to the other. When the taken successor is the next block in layout
// the condition is inverted so that the emitter can drop the jump.

use crate::abi::ZERO;
use crate::ir::{BlockId, CmpCond, Inst, ReturnKind, Type, Value};
use crate::riscv::{BranchCond, MachInst, Reg};
use crate::Result;

use super::memory::copy_memory;
use super::selector::Selector;

pub(crate) fn lower_br(sel: &mut Selector<'_>, target: BlockId) {
    sel.emit(MachInst::Jump { target });
}

fn emit_two_way(
    sel: &mut Selector<'_>,
    cond: BranchCond,
    rs1: Reg,
    rs2: Reg,
    then_block: BlockId,
    else_block: BlockId,
) {
    if then_block == else_block {
        sel.emit(MachInst::Jump { target: then_block });
        return;
    }
    let (cond, taken, other) = if sel.next_block == Some(then_block) {
        (cond.invert(), else_block, then_block)
    } else {
        (cond, then_block, else_block)
    };
    sel.emit(MachInst::Branch {
        cond,
        rs1,
        rs2,
        target: taken,
    });
    sel.emit(MachInst::Jump { target: other });
}

pub(crate) fn lower_cond_br(
    sel: &mut Selector<'_>,
    cond: &Value,
    then_block: BlockId,
    else_block: BlockId,
) -> Result<()> {
    match cond {
        Value::Reg(r) => {
            emit_two_way(
                sel,
                BranchCond::Ne,
                Reg::Virt(*r),
                ZERO.into(),
                then_block,
                else_block,
            );
        }
        Value::Imm(n) => {
            let target = if *n != 0 { then_block } else { else_block };
            sel.emit(MachInst::Jump { target });
        }
        // A symbol address is never null.
        Value::Global(_) => sel.emit(MachInst::Jump { target: then_block }),
    }
    Ok(())
}

/// Branch form of `cond`; `true` means the operands must be swapped.
fn branch_cond(cond: CmpCond) -> (BranchCond, bool) {
    match cond {
        CmpCond::Eq => (BranchCond::Eq, false),
        CmpCond::Ne => (BranchCond::Ne, false),
        CmpCond::Slt => (BranchCond::Lt, false),
        CmpCond::Sge => (BranchCond::Ge, false),
        CmpCond::Sgt => (BranchCond::Lt, true),
        CmpCond::Sle => (BranchCond::Ge, true),
        CmpCond::Ult => (BranchCond::Ltu, false),
        CmpCond::Uge => (BranchCond::Geu, false),
        CmpCond::Ugt => (BranchCond::Ltu, true),
        CmpCond::Ule => (BranchCond::Geu, true),
    }
}

/// `icmp` + `cond_br` on its result, as a single compare-and-branch.
pub(crate) fn lower_fused_branch(sel: &mut Selector<'_>, icmp: &Inst, br: &Inst) -> Result<()> {
    let (
        Inst::Icmp {
            cond, ty, lhs, rhs, ..
        },
        Inst::CondBr {
            then_block,
            else_block,
            ..
        },
    ) = (icmp, br)
    else {
        return Err(sel.malformed("fused branch requires icmp followed by cond_br"));
    };
    let ty: Type = *ty;
    let (bcond, swap) = branch_cond(*cond);
    let a = sel.use_value(lhs, ty);
    let b = sel.use_value(rhs, ty);
    let (rs1, rs2) = if swap { (b, a) } else { (a, b) };
    // The branch is the block terminator; keep the index pointing at it.
    sel.inst_index += 1;
    emit_two_way(sel, bcond, rs1, rs2, *then_block, *else_block);
    Ok(())
}

pub(crate) fn lower_ret(sel: &mut Selector<'_>, values: &[Value]) -> Result<()> {
    let regs = match sel.func.signature.ret.clone() {
        ReturnKind::Void => Vec::new(),
        ReturnKind::Scalar(ty) => {
            let [value] = values else {
                return Err(sel.malformed("scalar return needs one value"));
            };
            vec![sel.use_value(value, ty)]
        }
        ReturnKind::Pair(a, b) => {
            let [first, second] = values else {
                return Err(sel.malformed("pair return needs two values"));
            };
            vec![sel.use_value(first, a), sel.use_value(second, b)]
        }
        ReturnKind::Memory { size, align } => {
            let [source] = values else {
                return Err(sel.malformed("memory return needs one value"));
            };
            let sret = sel.sret_or_err()?;
            let src = sel.use_value(source, Type::Ptr);
            copy_memory(sel, sret, src, size, align);
            vec![sret]
        }
    };
    sel.emit(MachInst::Ret { values: regs });
    Ok(())
}
