// Replace virtual registers with their assigned locations.
//
// Spilled values live in a dedicated frame slot. Ordinary instructions reload
// spilled operands into the scratch pair (t5 first, then t6) and write spilled
// results through t5 followed by a store. The ABI pseudos (entry, call,
// return) take `Reg::Slot` operands directly and resolve them while lowering
// their parallel moves.

use std::collections::BTreeMap;

use crate::abi::{SCRATCH1, SCRATCH2, XLEN_BYTES};
use crate::error::{Error, Result};
use crate::ir::VReg;
use crate::riscv::{FrameIndex, FrameObjectKind, LoadOp, MachFunction, MachInst, Mem, Reg, StoreOp};

use super::linear_scan::Assignment;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub reloads: usize,
    pub spill_stores: usize,
    pub removed_moves: usize,
}

fn is_pseudo(inst: &MachInst) -> bool {
    matches!(
        inst,
        MachInst::EntryArgs { .. } | MachInst::Call { .. } | MachInst::Ret { .. }
    )
}

fn is_identity_move(inst: &MachInst) -> bool {
    matches!(
        inst,
        MachInst::AluImm {
            op: crate::riscv::AluImmOp::Addi,
            rd: Reg::Phys(rd),
            rs1: Reg::Phys(rs1),
            imm: 0,
        } if rd == rs1
    )
}

pub fn rewrite(mf: &mut MachFunction, assignment: &Assignment) -> Result<RewriteStats> {
    let mut slots: BTreeMap<VReg, FrameIndex> = BTreeMap::new();
    for &vreg in &assignment.spilled {
        let index = mf.add_frame_object(FrameObjectKind::Spill, XLEN_BYTES as u32, XLEN_BYTES as u32);
        slots.insert(vreg, index);
    }

    let mut stats = RewriteStats::default();
    let name = mf.name.clone();
    for block in &mut mf.blocks {
        let mut out = Vec::with_capacity(block.insts.len());
        for mut inst in std::mem::take(&mut block.insts) {
            let mut missing: Option<VReg> = None;

            if is_pseudo(&inst) {
                inst.for_each_reg_mut(|reg, _| {
                    if let Reg::Virt(v) = *reg {
                        if let Some(&p) = assignment.registers.get(&v) {
                            *reg = Reg::Phys(p);
                        } else if let Some(&slot) = slots.get(&v) {
                            *reg = Reg::Slot(slot);
                        } else {
                            missing = Some(v);
                        }
                    }
                });
                if let Some(v) = missing {
                    return Err(no_location(&name, v));
                }
                out.push(inst);
                continue;
            }

            let mut reloaded: Vec<(VReg, Reg)> = Vec::new();
            let mut before = Vec::new();
            let mut after = Vec::new();
            inst.for_each_reg_mut(|reg, is_def| {
                let Reg::Virt(v) = *reg else { return };
                if let Some(&p) = assignment.registers.get(&v) {
                    *reg = Reg::Phys(p);
                    return;
                }
                let Some(&slot) = slots.get(&v) else {
                    missing = Some(v);
                    return;
                };
                if is_def {
                    *reg = SCRATCH1.into();
                    after.push(MachInst::Store {
                        op: StoreOp::Sd,
                        src: SCRATCH1.into(),
                        mem: Mem::frame(slot, 0),
                    });
                } else if let Some(&(_, scratch)) = reloaded.iter().find(|(seen, _)| *seen == v) {
                    *reg = scratch;
                } else {
                    let scratch: Reg = if reloaded.is_empty() { SCRATCH1 } else { SCRATCH2 }.into();
                    reloaded.push((v, scratch));
                    before.push(MachInst::Load {
                        op: LoadOp::Ld,
                        rd: scratch,
                        mem: Mem::frame(slot, 0),
                    });
                    *reg = scratch;
                }
            });
            if let Some(v) = missing {
                return Err(no_location(&name, v));
            }

            stats.reloads += before.len();
            stats.spill_stores += after.len();
            out.extend(before);
            if is_identity_move(&inst) {
                stats.removed_moves += 1;
            } else {
                out.push(inst);
            }
            out.extend(after);
        }
        block.insts = out;
    }
    Ok(stats)
}

fn no_location(function: &str, vreg: VReg) -> Error {
    Error::Allocation {
        function: function.to_string(),
        message: format!("{vreg} has no location"),
    }
}
