// Selector state shared by the lowering submodules.
//
// Operands are turned into registers on demand: IR registers map to virtual
// registers of the same number, constants are materialized into fresh
// virtual registers (zero uses `x0`), and global symbols are loaded with `la`.

use std::collections::{HashMap, HashSet};

use crate::abi::ZERO;
use crate::error::Location;
use crate::ir::{BlockId, Function, Inst, Module, Type, VReg, Value};
use crate::riscv::{FrameIndex, FrameObjectKind, MachBlock, MachFunction, MachInst, Reg, imm};
use crate::{Error, Result};

use super::SelectOptions;

pub(crate) struct Selector<'m> {
    pub(crate) module: &'m Module,
    pub(crate) func: &'m Function,
    pub(crate) options: SelectOptions,
    pub(crate) mf: MachFunction,

    insts: Vec<MachInst>,
    pub(crate) block: BlockId,
    /// Block laid out after the current one, if any.
    pub(crate) next_block: Option<BlockId>,
    pub(crate) inst_index: usize,

    use_counts: HashMap<VReg, usize>,
    def_counts: HashMap<VReg, usize>,
    /// Allocas defined exactly once: accesses through them address the frame
    /// object directly.
    pub(crate) frame_slots: HashMap<VReg, FrameIndex>,
    /// Registers used only as load/store addresses.
    pub(crate) address_only: HashSet<VReg>,
    /// Hidden return-buffer pointer for memory-returning functions.
    pub(crate) sret: Option<Reg>,
}

impl<'m> Selector<'m> {
    pub(crate) fn new(module: &'m Module, func: &'m Function, options: SelectOptions) -> Self {
        let mut sel = Self {
            module,
            func,
            options,
            mf: MachFunction {
                name: func.name.clone(),
                linkage: func.linkage,
                blocks: Vec::new(),
                frame_objects: Vec::new(),
                next_vreg: func.vreg_limit(),
            },
            insts: Vec::new(),
            block: BlockId(0),
            next_block: None,
            inst_index: 0,
            use_counts: HashMap::new(),
            def_counts: HashMap::new(),
            frame_slots: HashMap::new(),
            address_only: HashSet::new(),
            sret: None,
        };
        sel.pre_scan();
        sel
    }

    /// Count uses and definitions, and find allocas whose address never
    /// escapes a load/store address operand.
    fn pre_scan(&mut self) {
        let mut non_address_use = HashSet::new();
        for &param in &self.func.params {
            *self.def_counts.entry(param).or_default() += 1;
        }
        for inst in self.func.blocks.iter().flat_map(|b| &b.insts) {
            for reg in inst.uses() {
                *self.use_counts.entry(reg).or_default() += 1;
            }
            for reg in inst.defs() {
                *self.def_counts.entry(reg).or_default() += 1;
            }
            match inst {
                Inst::Load { .. } => {}
                Inst::Store { value, .. } => {
                    if let Some(v) = value.as_reg() {
                        non_address_use.insert(v);
                    }
                }
                _ => non_address_use.extend(inst.uses()),
            }
        }

        for inst in self.func.blocks.iter().flat_map(|b| &b.insts) {
            if let Inst::Alloca { dst, size, align } = inst
                && self.def_counts.get(dst) == Some(&1)
            {
                let index = self.mf.add_frame_object(FrameObjectKind::Local, *size, *align);
                self.frame_slots.insert(*dst, index);
                if !non_address_use.contains(dst) {
                    self.address_only.insert(*dst);
                }
            }
        }
    }

    pub(crate) fn begin_block(&mut self, id: BlockId, next: Option<BlockId>) {
        self.block = id;
        self.next_block = next;
        self.inst_index = 0;
    }

    pub(crate) fn take_insts(&mut self) -> Vec<MachInst> {
        std::mem::take(&mut self.insts)
    }

    pub(crate) fn finish(mut self, blocks: Vec<MachBlock>) -> MachFunction {
        self.mf.blocks = blocks;
        self.mf
    }

    pub(crate) fn emit(&mut self, inst: MachInst) {
        self.insts.push(inst);
    }

    pub(crate) fn emit_all(&mut self, insts: impl IntoIterator<Item = MachInst>) {
        self.insts.extend(insts);
    }

    pub(crate) fn new_vreg(&mut self) -> Reg {
        self.mf.new_vreg()
    }

    pub(crate) fn location(&self) -> Location {
        Location::inst(&self.func.name, self.block, self.inst_index)
    }

    pub(crate) fn malformed(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.location(), message)
    }

    /// An `icmp` can be folded into the branch that immediately follows it
    /// when that branch is its only consumer.
    pub(crate) fn can_fuse(&self, inst: &Inst, next: &Inst) -> bool {
        let (Inst::Icmp { dst, .. }, Inst::CondBr { cond, .. }) = (inst, next) else {
            return false;
        };
        cond.as_reg() == Some(*dst)
            && self.use_counts.get(dst) == Some(&1)
            && self.def_counts.get(dst) == Some(&1)
    }

    /// Put `value` in a register, materializing constants and addresses.
    pub(crate) fn use_value(&mut self, value: &Value, ty: Type) -> Reg {
        match value {
            Value::Reg(r) => Reg::Virt(*r),
            Value::Imm(n) => {
                let n = canonical_imm(ty, *n);
                if n == 0 {
                    return ZERO.into();
                }
                let rd = self.new_vreg();
                self.emit_all(imm::materialize(rd, n));
                rd
            }
            Value::Global(symbol) => {
                let rd = self.new_vreg();
                self.emit(MachInst::La {
                    rd,
                    symbol: symbol.clone(),
                });
                rd
            }
        }
    }

    /// Write `value` into `rd`.
    pub(crate) fn materialize_into(&mut self, rd: Reg, value: &Value, ty: Type) {
        match value {
            Value::Reg(r) => self.emit(MachInst::mv(rd, Reg::Virt(*r))),
            Value::Imm(n) => self.emit_all(imm::materialize(rd, canonical_imm(ty, *n))),
            Value::Global(symbol) => self.emit(MachInst::La {
                rd,
                symbol: symbol.clone(),
            }),
        }
    }

    pub(crate) fn frame_slot(&self, value: &Value) -> Option<FrameIndex> {
        value.as_reg().and_then(|r| self.frame_slots.get(&r).copied())
    }

    pub(crate) fn sret_or_err(&self) -> Result<Reg> {
        self.sret
            .ok_or_else(|| Error::Internal(format!("`{}` has no return buffer", self.func.name)))
    }
}

/// Register representation of a constant of type `ty`: `i32` values are
/// sign-extended, narrower types zero-extended.
#[must_use]
pub(crate) fn canonical_imm(ty: Type, value: i64) -> i64 {
    match ty {
        Type::I1 => value & 1,
        Type::I8 => value & 0xff,
        Type::I16 => value & 0xffff,
        Type::I32 => i64::from(value as i32),
        Type::I64 | Type::Ptr => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_imm() {
        assert_eq!(canonical_imm(Type::I32, 0xffff_ffff), -1);
        assert_eq!(canonical_imm(Type::I32, 0x8000_0000), i64::from(i32::MIN));
        assert_eq!(canonical_imm(Type::I8, -1), 255);
        assert_eq!(canonical_imm(Type::I1, 3), 1);
        assert_eq!(canonical_imm(Type::I64, -1), -1);
    }
}
