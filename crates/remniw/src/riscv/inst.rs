use std::fmt;

use crate::ir::{BlockId, Linkage, VReg};

use super::PReg;

/// Index into [`MachFunction::frame_objects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameIndex(pub u32);

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fi#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameObjectKind {
    /// `alloca` storage.
    Local,
    /// Home of a spilled virtual register.
    Spill,
    /// Caller-side buffer for a memory-returned call result.
    CallTemp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameObject {
    pub kind: FrameObjectKind,
    pub size: u32,
    pub align: u32,
}

/// Register operand. `Slot` only appears in ABI pseudo-instructions after
/// allocation (a spilled value handed to a call, return or entry move).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Phys(PReg),
    Virt(VReg),
    Slot(FrameIndex),
}

impl Reg {
    #[must_use]
    pub fn as_virt(self) -> Option<VReg> {
        match self {
            Reg::Virt(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_phys(self) -> Option<PReg> {
        match self {
            Reg::Phys(p) => Some(p),
            _ => None,
        }
    }
}

impl From<PReg> for Reg {
    fn from(reg: PReg) -> Self {
        Reg::Phys(reg)
    }
}

impl From<VReg> for Reg {
    fn from(reg: VReg) -> Self {
        Reg::Virt(reg)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Phys(p) => write!(f, "{p}"),
            Reg::Virt(v) => write!(f, "%v{}", v.0),
            Reg::Slot(slot) => write!(f, "[{slot}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemBase {
    Reg(Reg),
    /// Frame object, resolved to an `fp`-relative address by frame lowering.
    Frame(FrameIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: MemBase,
    pub offset: i64,
}

impl Mem {
    #[must_use]
    pub fn reg(base: impl Into<Reg>, offset: i64) -> Self {
        Self {
            base: MemBase::Reg(base.into()),
            offset,
        }
    }

    #[must_use]
    pub fn frame(index: FrameIndex, offset: i64) -> Self {
        Self {
            base: MemBase::Frame(index),
            offset,
        }
    }
}

/// Register-register operations (RV64I + M).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Div,
    Divu,
    Rem,
    Remu,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
}

impl AluOp {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Sll => "sll",
            AluOp::Slt => "slt",
            AluOp::Sltu => "sltu",
            AluOp::Xor => "xor",
            AluOp::Srl => "srl",
            AluOp::Sra => "sra",
            AluOp::Or => "or",
            AluOp::And => "and",
            AluOp::Mul => "mul",
            AluOp::Div => "div",
            AluOp::Divu => "divu",
            AluOp::Rem => "rem",
            AluOp::Remu => "remu",
            AluOp::Addw => "addw",
            AluOp::Subw => "subw",
            AluOp::Sllw => "sllw",
            AluOp::Srlw => "srlw",
            AluOp::Sraw => "sraw",
            AluOp::Mulw => "mulw",
            AluOp::Divw => "divw",
            AluOp::Divuw => "divuw",
            AluOp::Remw => "remw",
            AluOp::Remuw => "remuw",
        }
    }
}

/// Register-immediate operations. Shift immediates are shift amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
}

impl AluImmOp {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            AluImmOp::Addi => "addi",
            AluImmOp::Slti => "slti",
            AluImmOp::Sltiu => "sltiu",
            AluImmOp::Xori => "xori",
            AluImmOp::Ori => "ori",
            AluImmOp::Andi => "andi",
            AluImmOp::Slli => "slli",
            AluImmOp::Srli => "srli",
            AluImmOp::Srai => "srai",
            AluImmOp::Addiw => "addiw",
            AluImmOp::Slliw => "slliw",
            AluImmOp::Srliw => "srliw",
            AluImmOp::Sraiw => "sraiw",
        }
    }

    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(
            self,
            AluImmOp::Slli
                | AluImmOp::Srli
                | AluImmOp::Srai
                | AluImmOp::Slliw
                | AluImmOp::Srliw
                | AluImmOp::Sraiw
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

impl LoadOp {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            LoadOp::Lb => "lb",
            LoadOp::Lh => "lh",
            LoadOp::Lw => "lw",
            LoadOp::Ld => "ld",
            LoadOp::Lbu => "lbu",
            LoadOp::Lhu => "lhu",
            LoadOp::Lwu => "lwu",
        }
    }

    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            LoadOp::Lb | LoadOp::Lbu => 1,
            LoadOp::Lh | LoadOp::Lhu => 2,
            LoadOp::Lw | LoadOp::Lwu => 4,
            LoadOp::Ld => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Sb,
    Sh,
    Sw,
    Sd,
}

impl StoreOp {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            StoreOp::Sb => "sb",
            StoreOp::Sh => "sh",
            StoreOp::Sw => "sw",
            StoreOp::Sd => "sd",
        }
    }

    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            StoreOp::Sb => 1,
            StoreOp::Sh => 2,
            StoreOp::Sw => 4,
            StoreOp::Sd => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

impl BranchCond {
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            BranchCond::Eq => "beq",
            BranchCond::Ne => "bne",
            BranchCond::Lt => "blt",
            BranchCond::Ge => "bge",
            BranchCond::Ltu => "bltu",
            BranchCond::Geu => "bgeu",
        }
    }

    #[must_use]
    pub const fn invert(self) -> Self {
        match self {
            BranchCond::Eq => BranchCond::Ne,
            BranchCond::Ne => BranchCond::Eq,
            BranchCond::Lt => BranchCond::Ge,
            BranchCond::Ge => BranchCond::Lt,
            BranchCond::Ltu => BranchCond::Geu,
            BranchCond::Geu => BranchCond::Ltu,
        }
    }
}

/// Machine instruction over virtual or physical registers.
///
/// `EntryArgs`, `Call`, `Ret` and `FrameAddr` are pseudo-instructions that
/// exist between selection and frame lowering; after lowering only real
/// instructions (plus the `La`/`CallSym` assembler pseudos) remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachInst {
    Alu {
        op: AluOp,
        rd: Reg,
        rs1: Reg,
        rs2: Reg,
    },
    AluImm {
        op: AluImmOp,
        rd: Reg,
        rs1: Reg,
        imm: i64,
    },
    /// `rd = sext(imm20 << 12)`.
    Lui {
        rd: Reg,
        imm20: u32,
    },
    Load {
        op: LoadOp,
        rd: Reg,
        mem: Mem,
    },
    Store {
        op: StoreOp,
        src: Reg,
        mem: Mem,
    },
    /// Address of a symbol (`auipc` + `addi`).
    La {
        rd: Reg,
        symbol: String,
    },
    Branch {
        cond: BranchCond,
        rs1: Reg,
        rs2: Reg,
        target: BlockId,
    },
    Jump {
        target: BlockId,
    },
    /// Direct call (`auipc ra` + `jalr ra`).
    CallSym {
        symbol: String,
    },
    Jalr {
        rd: Reg,
        rs1: Reg,
        imm: i64,
    },

    // === Pseudo-instructions ===
    FrameAddr {
        rd: Reg,
        index: FrameIndex,
    },
    /// Defines the incoming parameters (hidden return pointer first).
    EntryArgs {
        dsts: Vec<Reg>,
    },
    Call {
        callee: String,
        args: Vec<Reg>,
        rets: Vec<Reg>,
    },
    Ret {
        values: Vec<Reg>,
    },
}

impl MachInst {
    /// `addi rd, rs, 0`.
    #[must_use]
    pub fn mv(rd: impl Into<Reg>, rs: impl Into<Reg>) -> Self {
        MachInst::AluImm {
            op: AluImmOp::Addi,
            rd: rd.into(),
            rs1: rs.into(),
            imm: 0,
        }
    }

    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            MachInst::Branch { .. } | MachInst::Jump { .. } | MachInst::Ret { .. }
        ) || self.is_return()
    }

    /// `ret` after lowering.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            MachInst::Jalr {
                rd: Reg::Phys(rd),
                rs1: Reg::Phys(rs1),
                imm: 0,
            } if rd.hw() == 0 && rs1.hw() == 1
        )
    }

    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, MachInst::Call { .. } | MachInst::CallSym { .. })
    }

    #[must_use]
    pub fn branch_target(&self) -> Option<BlockId> {
        match self {
            MachInst::Branch { target, .. } | MachInst::Jump { target } => Some(*target),
            _ => None,
        }
    }

    /// Visit every register operand; the flag is `true` for definitions.
    /// Uses are visited before definitions.
    pub fn for_each_reg_mut(&mut self, mut f: impl FnMut(&mut Reg, bool)) {
        fn mem_base(mem: &mut Mem, f: &mut dyn FnMut(&mut Reg, bool)) {
            if let MemBase::Reg(base) = &mut mem.base {
                f(base, false);
            }
        }
        match self {
            MachInst::Alu { rd, rs1, rs2, .. } => {
                f(rs1, false);
                f(rs2, false);
                f(rd, true);
            }
            MachInst::AluImm { rd, rs1, .. } | MachInst::Jalr { rd, rs1, .. } => {
                f(rs1, false);
                f(rd, true);
            }
            MachInst::Lui { rd, .. } | MachInst::La { rd, .. } | MachInst::FrameAddr { rd, .. } => {
                f(rd, true);
            }
            MachInst::Load { rd, mem, .. } => {
                mem_base(mem, &mut f);
                f(rd, true);
            }
            MachInst::Store { src, mem, .. } => {
                f(src, false);
                mem_base(mem, &mut f);
            }
            MachInst::Branch { rs1, rs2, .. } => {
                f(rs1, false);
                f(rs2, false);
            }
            MachInst::Jump { .. } | MachInst::CallSym { .. } => {}
            MachInst::EntryArgs { dsts } => dsts.iter_mut().for_each(|r| f(r, true)),
            MachInst::Call { args, rets, .. } => {
                args.iter_mut().for_each(|r| f(r, false));
                rets.iter_mut().for_each(|r| f(r, true));
            }
            MachInst::Ret { values } => values.iter_mut().for_each(|r| f(r, false)),
        }
    }

    #[must_use]
    pub fn uses(&self) -> Vec<Reg> {
        let mut out = Vec::new();
        self.clone().for_each_reg_mut(|r, def| {
            if !def {
                out.push(*r);
            }
        });
        out
    }

    #[must_use]
    pub fn defs(&self) -> Vec<Reg> {
        let mut out = Vec::new();
        self.clone().for_each_reg_mut(|r, def| {
            if def {
                out.push(*r);
            }
        });
        out
    }

    /// Assembly text, with `label` naming branch targets.
    pub fn write_asm(
        &self,
        f: &mut dyn fmt::Write,
        label: &dyn Fn(BlockId) -> String,
    ) -> fmt::Result {
        let mem = |m: &Mem| match m.base {
            MemBase::Reg(r) => format!("{}({r})", m.offset),
            MemBase::Frame(fi) => format!("{}({fi})", m.offset),
        };
        let list = |regs: &[Reg]| {
            regs.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            MachInst::Alu { op, rd, rs1, rs2 } => {
                write!(f, "{}\t{rd}, {rs1}, {rs2}", op.mnemonic())
            }
            MachInst::AluImm {
                op: AluImmOp::Addi,
                rd,
                rs1: Reg::Phys(zero),
                imm,
            } if zero.hw() == 0 => write!(f, "li\t{rd}, {imm}"),
            MachInst::AluImm {
                op: AluImmOp::Addi,
                rd,
                rs1,
                imm: 0,
            } => write!(f, "mv\t{rd}, {rs1}"),
            MachInst::AluImm {
                op: AluImmOp::Addiw,
                rd,
                rs1,
                imm: 0,
            } => write!(f, "sext.w\t{rd}, {rs1}"),
            MachInst::AluImm { op, rd, rs1, imm } => {
                write!(f, "{}\t{rd}, {rs1}, {imm}", op.mnemonic())
            }
            MachInst::Lui { rd, imm20 } => write!(f, "lui\t{rd}, {imm20}"),
            MachInst::Load { op, rd, mem: m } => write!(f, "{}\t{rd}, {}", op.mnemonic(), mem(m)),
            MachInst::Store { op, src, mem: m } => {
                write!(f, "{}\t{src}, {}", op.mnemonic(), mem(m))
            }
            MachInst::La { rd, symbol } => write!(f, "la\t{rd}, {symbol}"),
            MachInst::Branch {
                cond,
                rs1,
                rs2,
                target,
            } => write!(f, "{}\t{rs1}, {rs2}, {}", cond.mnemonic(), label(*target)),
            MachInst::Jump { target } => write!(f, "j\t{}", label(*target)),
            MachInst::CallSym { symbol } => write!(f, "call\t{symbol}"),
            MachInst::Jalr { rd, rs1, imm } => {
                if self.is_return() {
                    write!(f, "ret")
                } else {
                    write!(f, "jalr\t{rd}, {imm}({rs1})")
                }
            }
            MachInst::FrameAddr { rd, index } => write!(f, "frameaddr\t{rd}, {index}"),
            MachInst::EntryArgs { dsts } => write!(f, "entry_args\t{}", list(dsts)),
            MachInst::Call { callee, args, rets } => {
                write!(f, "call.abi\t{callee}({}) -> ({})", list(args), list(rets))
            }
            MachInst::Ret { values } => write!(f, "ret.abi\t{}", list(values)),
        }
    }
}

impl fmt::Display for MachInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_asm(f, &|b: BlockId| b.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachBlock {
    pub id: BlockId,
    pub insts: Vec<MachInst>,
}

/// A function in machine form, from selection through frame lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachFunction {
    pub name: String,
    pub linkage: Linkage,
    pub blocks: Vec<MachBlock>,
    pub frame_objects: Vec<FrameObject>,
    /// Next unused virtual register number.
    pub next_vreg: u32,
}

impl MachFunction {
    pub fn new_vreg(&mut self) -> Reg {
        let reg = VReg(self.next_vreg);
        self.next_vreg += 1;
        Reg::Virt(reg)
    }

    pub fn add_frame_object(&mut self, kind: FrameObjectKind, size: u32, align: u32) -> FrameIndex {
        let index = FrameIndex(self.frame_objects.len() as u32);
        self.frame_objects.push(FrameObject { kind, size, align });
        index
    }

    pub fn insts(&self) -> impl Iterator<Item = &MachInst> {
        self.blocks.iter().flat_map(|b| &b.insts)
    }

    #[must_use]
    pub fn has_calls(&self) -> bool {
        self.insts().any(MachInst::is_call)
    }
}

impl fmt::Display for MachFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.insts {
                writeln!(f, "\t{inst}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{A0, A1, FP, RA, ZERO};

    #[test]
    fn test_uses_before_defs() {
        let inst = MachInst::Alu {
            op: AluOp::Add,
            rd: Reg::Virt(VReg(2)),
            rs1: Reg::Virt(VReg(0)),
            rs2: Reg::Virt(VReg(1)),
        };
        assert_eq!(inst.uses(), vec![Reg::Virt(VReg(0)), Reg::Virt(VReg(1))]);
        assert_eq!(inst.defs(), vec![Reg::Virt(VReg(2))]);

        let store = MachInst::Store {
            op: StoreOp::Sd,
            src: A0.into(),
            mem: Mem::reg(FP, -24),
        };
        assert_eq!(store.uses(), vec![Reg::Phys(A0), Reg::Phys(FP)]);
        assert!(store.defs().is_empty());
    }

    #[test]
    fn test_asm_aliases() {
        assert_eq!(MachInst::mv(A0, A1).to_string(), "mv\ta0, a1");
        let li = MachInst::AluImm {
            op: AluImmOp::Addi,
            rd: A0.into(),
            rs1: ZERO.into(),
            imm: -5,
        };
        assert_eq!(li.to_string(), "li\ta0, -5");
        let ret = MachInst::Jalr {
            rd: ZERO.into(),
            rs1: RA.into(),
            imm: 0,
        };
        assert!(ret.is_return());
        assert!(ret.is_terminator());
        assert_eq!(ret.to_string(), "ret");
        let load = MachInst::Load {
            op: LoadOp::Ld,
            rd: A0.into(),
            mem: Mem::reg(FP, -24),
        };
        assert_eq!(load.to_string(), "ld\ta0, -24(s0)");
    }
}
