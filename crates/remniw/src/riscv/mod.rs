//! RV64IM target description: registers, machine instructions, constant
//! materialization, and binary encodings.

pub mod encoding;
pub mod imm;
mod inst;
mod reg;

pub use inst::{
    AluImmOp, AluOp, BranchCond, FrameIndex, FrameObject, FrameObjectKind, LoadOp, MachBlock,
    MachFunction, MachInst, Mem, MemBase, Reg, StoreOp,
};
pub use reg::PReg;
