use serde::{Deserialize, Serialize};

use super::{BlockId, Type, VReg, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpCond {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl CmpCond {
    /// Predicate with the operands exchanged (`a < b` becomes `b > a`).
    #[must_use]
    pub const fn swapped(self) -> Self {
        match self {
            CmpCond::Eq => CmpCond::Eq,
            CmpCond::Ne => CmpCond::Ne,
            CmpCond::Slt => CmpCond::Sgt,
            CmpCond::Sle => CmpCond::Sge,
            CmpCond::Sgt => CmpCond::Slt,
            CmpCond::Sge => CmpCond::Sle,
            CmpCond::Ult => CmpCond::Ugt,
            CmpCond::Ule => CmpCond::Uge,
            CmpCond::Ugt => CmpCond::Ult,
            CmpCond::Uge => CmpCond::Ule,
        }
    }

    /// Evaluate on 64-bit operands.
    #[must_use]
    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        let (ul, ur) = (lhs as u64, rhs as u64);
        match self {
            CmpCond::Eq => lhs == rhs,
            CmpCond::Ne => lhs != rhs,
            CmpCond::Slt => lhs < rhs,
            CmpCond::Sle => lhs <= rhs,
            CmpCond::Sgt => lhs > rhs,
            CmpCond::Sge => lhs >= rhs,
            CmpCond::Ult => ul < ur,
            CmpCond::Ule => ul <= ur,
            CmpCond::Ugt => ul > ur,
            CmpCond::Uge => ul >= ur,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastOp {
    Zext,
    Sext,
    Trunc,
}

/// IR instruction. The last instruction of every block is a terminator
/// (`Br`, `CondBr`, `Ret`) and no other instruction is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Inst {
    // === Arithmetic ===
    Binary {
        kind: BinaryOp,
        ty: Type,
        dst: VReg,
        lhs: Value,
        rhs: Value,
    },
    /// Produces an `i1` (0 or 1).
    Icmp {
        cond: CmpCond,
        ty: Type,
        dst: VReg,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        kind: CastOp,
        from: Type,
        to: Type,
        dst: VReg,
        src: Value,
    },
    Copy {
        ty: Type,
        dst: VReg,
        src: Value,
    },

    // === Memory ===
    Load {
        ty: Type,
        dst: VReg,
        addr: Value,
        #[serde(default)]
        offset: i64,
    },
    Store {
        ty: Type,
        value: Value,
        addr: Value,
        #[serde(default)]
        offset: i64,
    },
    /// Reserve `size` bytes in the current frame; `dst` receives the address.
    Alloca { dst: VReg, size: u32, align: u32 },

    // === Calls ===
    /// `dsts` holds one register per returned value (see `ReturnKind::value_count`).
    Call {
        callee: String,
        args: Vec<Value>,
        #[serde(default)]
        dsts: Vec<VReg>,
    },

    // === Terminators ===
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret {
        #[serde(default)]
        values: Vec<Value>,
    },
}

impl Inst {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
    }

    /// Registers written by this instruction.
    #[must_use]
    pub fn defs(&self) -> Vec<VReg> {
        match self {
            Inst::Binary { dst, .. }
            | Inst::Icmp { dst, .. }
            | Inst::Cast { dst, .. }
            | Inst::Copy { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::Alloca { dst, .. } => vec![*dst],
            Inst::Call { dsts, .. } => dsts.clone(),
            Inst::Store { .. } | Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. } => {
                Vec::new()
            }
        }
    }

    /// Operand values in order.
    #[must_use]
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Inst::Binary { lhs, rhs, .. } | Inst::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Cast { src, .. } | Inst::Copy { src, .. } => vec![src],
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { value, addr, .. } => vec![value, addr],
            Inst::Call { args, .. } => args.iter().collect(),
            Inst::CondBr { cond, .. } => vec![cond],
            Inst::Ret { values } => values.iter().collect(),
            Inst::Alloca { .. } | Inst::Br { .. } => Vec::new(),
        }
    }

    /// Registers read by this instruction.
    #[must_use]
    pub fn uses(&self) -> Vec<VReg> {
        self.operands().into_iter().filter_map(Value::as_reg).collect()
    }

    /// Successor blocks of a terminator, in branch order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Br { target } => vec![*target],
            Inst::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }
}
