// Parallel move resolution for argument and return marshaling.
//
// A parallel move reads every source before any destination is written.
// It is sequentialized in three phases: stores to memory destinations first,
// then register-to-register moves in dependency order with cycles broken
// through t6, then loads from memory sources.

use crate::abi::{SCRATCH1, SCRATCH2, fits_imm12};
use crate::riscv::imm::materialize;
use crate::riscv::{AluOp, LoadOp, MachInst, Mem, PReg, StoreOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveLoc {
    Reg(PReg),
    Stack { base: PReg, offset: i64 },
}

/// Access `offset(base)`, going through `temp` when the offset does not fit
/// a 12-bit immediate. Returns the memory operand to use.
pub(crate) fn address(base: PReg, offset: i64, temp: PReg, out: &mut Vec<MachInst>) -> Mem {
    if fits_imm12(offset) {
        return Mem::reg(base, offset);
    }
    out.extend(materialize(temp.into(), offset));
    out.push(MachInst::Alu {
        op: AluOp::Add,
        rd: temp.into(),
        rs1: temp.into(),
        rs2: base.into(),
    });
    Mem::reg(temp, 0)
}

pub(crate) fn load(rd: PReg, base: PReg, offset: i64, temp: PReg, out: &mut Vec<MachInst>) {
    let mem = address(base, offset, temp, out);
    out.push(MachInst::Load {
        op: LoadOp::Ld,
        rd: rd.into(),
        mem,
    });
}

pub(crate) fn store(src: PReg, base: PReg, offset: i64, temp: PReg, out: &mut Vec<MachInst>) {
    let mem = address(base, offset, temp, out);
    out.push(MachInst::Store {
        op: StoreOp::Sd,
        src: src.into(),
        mem,
    });
}

/// Sequentialize `(destination, source)` pairs. Destinations must be unique;
/// memory destinations must not overlap memory sources.
#[must_use]
pub fn resolve(moves: &[(MoveLoc, MoveLoc)]) -> Vec<MachInst> {
    // t6 carries values, t5 addresses.
    let (value_temp, address_temp) = (SCRATCH2, SCRATCH1);
    let mut out = Vec::new();

    for &(dst, src) in moves {
        let MoveLoc::Stack { base, offset } = dst else { continue };
        let value = match src {
            MoveLoc::Reg(reg) => reg,
            MoveLoc::Stack {
                base: src_base,
                offset: src_offset,
            } => {
                load(value_temp, src_base, src_offset, address_temp, &mut out);
                value_temp
            }
        };
        store(value, base, offset, address_temp, &mut out);
    }

    let mut pending: Vec<(PReg, PReg)> = moves
        .iter()
        .filter_map(|&(dst, src)| match (dst, src) {
            (MoveLoc::Reg(d), MoveLoc::Reg(s)) if d != s => Some((d, s)),
            _ => None,
        })
        .collect();
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|&(d, _)| pending.iter().all(|&(_, s)| s != d));
        match ready {
            Some(i) => {
                let (d, s) = pending.remove(i);
                out.push(MachInst::mv(d, s));
            }
            None => {
                // Every destination is still needed as a source: a cycle.
                let (d, _) = pending[0];
                out.push(MachInst::mv(value_temp, d));
                for (_, s) in &mut pending {
                    if *s == d {
                        *s = value_temp;
                    }
                }
            }
        }
    }

    for &(dst, src) in moves {
        if let (MoveLoc::Reg(rd), MoveLoc::Stack { base, offset }) = (dst, src) {
            load(rd, base, offset, address_temp, &mut out);
        }
    }
    out
}
