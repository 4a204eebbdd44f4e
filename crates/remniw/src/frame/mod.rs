// Frame and ABI lowering.
//
// Runs after register allocation. Assigns every frame object an fp-relative
// offset, inserts the prologue at function entry and an epilogue before every
// return, and expands the ABI pseudo-instructions into parallel moves and
// real calls:
//
//   - `layout`: frame object placement and frame size
//   - `moves`: parallel move sequencing
//
// After this pass the function contains only instructions the emitter can
// encode.

pub mod layout;
pub mod moves;

use crate::abi::{ARG_REGS, FP, RA, RET_REGS, SCRATCH2, SP, ZERO, fits_imm12};
use crate::error::{Error, Result};
use crate::riscv::imm::materialize;
use crate::riscv::{AluImmOp, AluOp, FrameIndex, MachFunction, MachInst, Mem, MemBase, PReg, Reg};

pub use layout::{FrameLayout, compute_layout};
use moves::MoveLoc;

struct Lowering<'a> {
    layout: &'a FrameLayout,
    function: &'a str,
}

impl Lowering<'_> {
    fn internal(&self, message: impl Into<String>) -> Error {
        Error::Internal(format!("{}: {}", self.function, message.into()))
    }

    fn object(&self, index: FrameIndex) -> Result<i64> {
        self.layout
            .object_offset(index)
            .ok_or_else(|| self.internal(format!("unknown frame object {index}")))
    }

    fn phys(&self, reg: Reg) -> Result<PReg> {
        reg.as_phys()
            .ok_or_else(|| self.internal(format!("unallocated operand {reg}")))
    }

    /// Location of a pseudo operand after allocation.
    fn operand(&self, reg: Reg) -> Result<MoveLoc> {
        match reg {
            Reg::Phys(p) => Ok(MoveLoc::Reg(p)),
            Reg::Slot(index) => Ok(MoveLoc::Stack {
                base: FP,
                offset: self.object(index)?,
            }),
            Reg::Virt(_) => Err(self.internal(format!("unallocated operand {reg}"))),
        }
    }

    fn prologue(&self, out: &mut Vec<MachInst>) {
        let layout = self.layout;
        if layout.is_frameless() {
            return;
        }
        let n = layout.size;
        if fits_imm12(n) {
            out.push(addi(SP, SP, -n));
            if let Some(ra) = layout.ra_offset {
                out.push(sd(RA, SP, n + ra));
            }
            out.push(sd(FP, SP, n + layout.fp_offset));
            out.push(addi(FP, SP, n));
        } else {
            // Save area first, then drop sp the rest of the way.
            out.push(addi(SP, SP, -16));
            if let Some(ra) = layout.ra_offset {
                out.push(sd(RA, SP, 16 + ra));
            }
            out.push(sd(FP, SP, 16 + layout.fp_offset));
            out.push(addi(FP, SP, 16));
            out.extend(materialize(SCRATCH2.into(), n - 16));
            out.push(MachInst::Alu {
                op: AluOp::Sub,
                rd: SP.into(),
                rs1: SP.into(),
                rs2: SCRATCH2.into(),
            });
        }
        for &(reg, offset) in &layout.saved {
            out.push(sd(reg, FP, offset));
        }
    }

    fn epilogue(&self, out: &mut Vec<MachInst>) {
        let layout = self.layout;
        if !layout.is_frameless() {
            for &(reg, offset) in &layout.saved {
                out.push(ld(reg, FP, offset));
            }
            let n = layout.size;
            if fits_imm12(n) {
                if let Some(ra) = layout.ra_offset {
                    out.push(ld(RA, SP, n + ra));
                }
                out.push(ld(FP, SP, n + layout.fp_offset));
                out.push(addi(SP, SP, n));
            } else {
                out.push(addi(SP, FP, -16));
                if let Some(ra) = layout.ra_offset {
                    out.push(ld(RA, SP, 16 + ra));
                }
                out.push(ld(FP, SP, 16 + layout.fp_offset));
                out.push(addi(SP, SP, 16));
            }
        }
        out.push(MachInst::Jalr {
            rd: ZERO.into(),
            rs1: RA.into(),
            imm: 0,
        });
    }

    /// Resolve a frame-based memory operand to `fp + offset`.
    fn frame_mem(&self, mem: Mem, out: &mut Vec<MachInst>) -> Result<Mem> {
        match mem.base {
            MemBase::Reg(_) => Ok(mem),
            MemBase::Frame(index) => {
                let offset = self.object(index)? + mem.offset;
                Ok(moves::address(FP, offset, SCRATCH2, out))
            }
        }
    }

    fn lower_inst(&self, inst: MachInst, out: &mut Vec<MachInst>) -> Result<()> {
        match inst {
            MachInst::EntryArgs { dsts } => {
                let mut pairs = Vec::with_capacity(dsts.len());
                for (i, dst) in dsts.into_iter().enumerate() {
                    let src = match ARG_REGS.get(i) {
                        Some(&reg) => MoveLoc::Reg(reg),
                        None => MoveLoc::Stack {
                            base: FP,
                            offset: layout::stack_argument_bytes(i),
                        },
                    };
                    pairs.push((self.operand(dst)?, src));
                }
                out.extend(moves::resolve(&pairs));
            }
            MachInst::Call { callee, args, rets } => {
                let mut pairs = Vec::with_capacity(args.len());
                for (i, arg) in args.into_iter().enumerate() {
                    let dst = match ARG_REGS.get(i) {
                        Some(&reg) => MoveLoc::Reg(reg),
                        None => MoveLoc::Stack {
                            base: SP,
                            offset: layout::stack_argument_bytes(i),
                        },
                    };
                    pairs.push((dst, self.operand(arg)?));
                }
                out.extend(moves::resolve(&pairs));
                out.push(MachInst::CallSym { symbol: callee });

                let mut results = Vec::with_capacity(rets.len());
                for (i, ret) in rets.into_iter().enumerate() {
                    let Some(&reg) = RET_REGS.get(i) else {
                        return Err(self.internal("more than two register results"));
                    };
                    results.push((self.operand(ret)?, MoveLoc::Reg(reg)));
                }
                out.extend(moves::resolve(&results));
            }
            MachInst::Ret { values } => {
                let mut pairs = Vec::with_capacity(values.len());
                for (i, value) in values.into_iter().enumerate() {
                    let Some(&reg) = RET_REGS.get(i) else {
                        return Err(self.internal("more than two register results"));
                    };
                    pairs.push((MoveLoc::Reg(reg), self.operand(value)?));
                }
                out.extend(moves::resolve(&pairs));
                self.epilogue(out);
            }
            MachInst::FrameAddr { rd, index } => {
                let rd = self.phys(rd)?;
                let offset = self.object(index)?;
                if fits_imm12(offset) {
                    out.push(addi(rd, FP, offset));
                } else {
                    out.extend(materialize(rd.into(), offset));
                    out.push(MachInst::Alu {
                        op: AluOp::Add,
                        rd: rd.into(),
                        rs1: rd.into(),
                        rs2: FP.into(),
                    });
                }
            }
            MachInst::Load { op, rd, mem } => {
                let mem = self.frame_mem(mem, out)?;
                out.push(MachInst::Load { op, rd, mem });
            }
            MachInst::Store { op, src, mem } => {
                let mem = self.frame_mem(mem, out)?;
                out.push(MachInst::Store { op, src, mem });
            }
            other => out.push(other),
        }
        Ok(())
    }
}

fn addi(rd: PReg, rs1: PReg, imm: i64) -> MachInst {
    MachInst::AluImm {
        op: AluImmOp::Addi,
        rd: rd.into(),
        rs1: rs1.into(),
        imm,
    }
}

fn sd(src: PReg, base: PReg, offset: i64) -> MachInst {
    MachInst::Store {
        op: crate::riscv::StoreOp::Sd,
        src: src.into(),
        mem: Mem::reg(base, offset),
    }
}

fn ld(rd: PReg, base: PReg, offset: i64) -> MachInst {
    MachInst::Load {
        op: crate::riscv::LoadOp::Ld,
        rd: rd.into(),
        mem: Mem::reg(base, offset),
    }
}

/// Lay out the frame and lower every pseudo-instruction in `mf`.
pub fn lower_frame(mf: &mut MachFunction, used_callee_saved: &[PReg]) -> Result<FrameLayout> {
    let layout = compute_layout(mf, used_callee_saved);
    let lowering = Lowering {
        layout: &layout,
        function: &mf.name,
    };

    let mut blocks = std::mem::take(&mut mf.blocks);
    for (position, block) in blocks.iter_mut().enumerate() {
        let mut out = Vec::with_capacity(block.insts.len() + 8);
        if position == 0 {
            lowering.prologue(&mut out);
        }
        for inst in std::mem::take(&mut block.insts) {
            lowering.lower_inst(inst, &mut out)?;
        }
        block.insts = out;
    }
    mf.blocks = blocks;

    tracing::debug!(
        function = %mf.name,
        frame_size = layout.size,
        saved = layout.saved.len(),
        "frame lowered"
    );
    Ok(layout)
}
