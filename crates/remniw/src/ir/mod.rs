//! Typed intermediate representation consumed by the back end.
//!
//! A [`Module`] is built once (by a front end, the [`FunctionBuilder`], or by
//! deserializing JSON) and is only read from then on. Virtual registers are
//! plain numbers scoped to their function and may be defined more than once;
//! the verifier only requires that every use is reached by a definition on
//! all paths.

mod builder;
mod display;
mod instruction;
mod verify;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use builder::FunctionBuilder;
pub use instruction::{BinaryOp, CastOp, CmpCond, Inst};
pub use verify::{verify_function, verify_module};

/// Scalar value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    Ptr,
}

impl Type {
    /// Width of the value in bits (`i1` counts as one bit).
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Type::I1 => 1,
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 | Type::Ptr => 64,
        }
    }

    /// Bytes occupied in memory.
    #[must_use]
    pub const fn store_size(self) -> u32 {
        match self {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::Ptr => 8,
        }
    }

    /// Types that fit a full register (64-bit arithmetic).
    #[must_use]
    pub const fn is_word(self) -> bool {
        matches!(self, Type::I64 | Type::Ptr)
    }
}

/// Virtual register, unique within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VReg(pub u32);

/// Basic block identifier, unique within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Reg(VReg),
    Imm(i64),
    /// Address of a function or global data object.
    Global(String),
}

impl Value {
    #[must_use]
    pub fn as_reg(&self) -> Option<VReg> {
        match self {
            Value::Reg(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<VReg> for Value {
    fn from(reg: VReg) -> Self {
        Value::Reg(reg)
    }
}

impl From<i64> for Value {
    fn from(imm: i64) -> Self {
        Value::Imm(imm)
    }
}

/// How a function hands its result back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Void,
    /// One value in `a0`.
    Scalar(Type),
    /// Two values in `a0` and `a1`.
    Pair(Type, Type),
    /// Aggregate written through a hidden pointer passed in `a0`.
    Memory { size: u32, align: u32 },
}

impl ReturnKind {
    /// Number of values a `ret` in a function of this kind carries.
    #[must_use]
    pub fn value_count(&self) -> usize {
        match self {
            ReturnKind::Void => 0,
            ReturnKind::Scalar(_) | ReturnKind::Memory { .. } => 1,
            ReturnKind::Pair(..) => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: ReturnKind,
}

impl Signature {
    #[must_use]
    pub fn new(params: Vec<Type>, ret: ReturnKind) -> Self {
        Self { params, ret }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    Export,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Inst>,
}

impl Block {
    #[must_use]
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|inst| inst.is_terminator())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    /// Registers receiving the incoming arguments, one per parameter.
    pub params: Vec<VReg>,
    /// The first block is the entry block.
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub linkage: Linkage,
}

impl Function {
    #[must_use]
    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// One past the highest virtual register number mentioned anywhere.
    #[must_use]
    pub fn vreg_limit(&self) -> u32 {
        let mut limit = self.params.iter().map(|r| r.0 + 1).max().unwrap_or(0);
        for inst in self.blocks.iter().flat_map(|b| &b.insts) {
            for reg in inst.defs().into_iter().chain(inst.uses()) {
                limit = limit.max(reg.0 + 1);
            }
        }
        limit
    }
}

/// Initial contents of a global data object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalInit {
    /// All zero; emitted to `.bss`.
    Zero,
    Bytes(Vec<u8>),
    /// Little-endian integers of one type, packed without padding.
    Ints { ty: Type, values: Vec<i64> },
    /// A 64-bit address of another symbol.
    Addr { symbol: String, addend: i64 },
}

impl GlobalInit {
    /// Bytes covered by the initializer; the rest of the object is zero.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            GlobalInit::Zero => 0,
            GlobalInit::Bytes(bytes) => bytes.len() as u64,
            GlobalInit::Ints { ty, values } => u64::from(ty.store_size()) * values.len() as u64,
            GlobalInit::Addr { .. } => 8,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalData {
    pub name: String,
    pub size: u64,
    pub align: u32,
    pub init: GlobalInit,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub linkage: Linkage,
}

/// A function defined outside the module (libc, the shield runtime, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub globals: Vec<GlobalData>,
    #[serde(default)]
    pub externs: Vec<ExternDecl>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&GlobalData> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Signature of a callable symbol, defined or declared.
    #[must_use]
    pub fn signature_of(&self, name: &str) -> Option<&Signature> {
        self.function(name)
            .map(|f| &f.signature)
            .or_else(|| self.externs.iter().find(|e| e.name == name).map(|e| &e.signature))
    }

    /// Whether `name` names anything addressable in this module.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.signature_of(name).is_some() || self.global(name).is_some()
    }

    pub fn push_function(&mut self, function: Function) -> &mut Self {
        self.functions.push(function);
        self
    }

    pub fn push_global(&mut self, global: GlobalData) -> &mut Self {
        self.globals.push(global);
        self
    }

    pub fn declare_extern(&mut self, name: impl Into<String>, signature: Signature) -> &mut Self {
        self.externs.push(ExternDecl {
            name: name.into(),
            signature,
        });
        self
    }
}
