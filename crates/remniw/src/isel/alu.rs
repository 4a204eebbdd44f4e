// Arithmetic, logic, comparison, and conversion patterns.
//
// Register values follow one representation per type: `i64`/`ptr` use all
// 64 bits, `i32` is kept sign-extended (so the `*w` instructions apply
// directly), `i1`/`i8`/`i16` are kept zero-extended.

use crate::abi::{ZERO, fits_imm12};
use crate::ir::{BinaryOp, CastOp, CmpCond, Type, VReg, Value};
use crate::riscv::{AluImmOp, AluOp, MachInst, Reg};
use crate::Result;

use super::selector::{Selector, canonical_imm};

fn alu_op(kind: BinaryOp, word32: bool) -> AluOp {
    match (kind, word32) {
        (BinaryOp::Add, false) => AluOp::Add,
        (BinaryOp::Add, true) => AluOp::Addw,
        (BinaryOp::Sub, false) => AluOp::Sub,
        (BinaryOp::Sub, true) => AluOp::Subw,
        (BinaryOp::Mul, false) => AluOp::Mul,
        (BinaryOp::Mul, true) => AluOp::Mulw,
        (BinaryOp::SDiv, false) => AluOp::Div,
        (BinaryOp::SDiv, true) => AluOp::Divw,
        (BinaryOp::UDiv, false) => AluOp::Divu,
        (BinaryOp::UDiv, true) => AluOp::Divuw,
        (BinaryOp::SRem, false) => AluOp::Rem,
        (BinaryOp::SRem, true) => AluOp::Remw,
        (BinaryOp::URem, false) => AluOp::Remu,
        (BinaryOp::URem, true) => AluOp::Remuw,
        (BinaryOp::And, _) => AluOp::And,
        (BinaryOp::Or, _) => AluOp::Or,
        (BinaryOp::Xor, _) => AluOp::Xor,
        (BinaryOp::Shl, false) => AluOp::Sll,
        (BinaryOp::Shl, true) => AluOp::Sllw,
        (BinaryOp::LShr, false) => AluOp::Srl,
        (BinaryOp::LShr, true) => AluOp::Srlw,
        (BinaryOp::AShr, false) => AluOp::Sra,
        (BinaryOp::AShr, true) => AluOp::Sraw,
    }
}

/// I-type form for `kind` with right-hand constant `n`, if one exists.
fn imm_form(kind: BinaryOp, word32: bool, n: i64) -> Option<(AluImmOp, i64)> {
    let shift_mask = if word32 { 31 } else { 63 };
    let add = if word32 { AluImmOp::Addiw } else { AluImmOp::Addi };
    match kind {
        BinaryOp::Add if fits_imm12(n) => Some((add, n)),
        BinaryOp::Sub if n != i64::MIN && fits_imm12(-n) => Some((add, -n)),
        BinaryOp::And if fits_imm12(n) => Some((AluImmOp::Andi, n)),
        BinaryOp::Or if fits_imm12(n) => Some((AluImmOp::Ori, n)),
        BinaryOp::Xor if fits_imm12(n) => Some((AluImmOp::Xori, n)),
        BinaryOp::Shl => Some((
            if word32 { AluImmOp::Slliw } else { AluImmOp::Slli },
            n & shift_mask,
        )),
        BinaryOp::LShr => Some((
            if word32 { AluImmOp::Srliw } else { AluImmOp::Srli },
            n & shift_mask,
        )),
        BinaryOp::AShr => Some((
            if word32 { AluImmOp::Sraiw } else { AluImmOp::Srai },
            n & shift_mask,
        )),
        _ => None,
    }
}

pub(crate) fn lower_binary(
    sel: &mut Selector<'_>,
    kind: BinaryOp,
    ty: Type,
    dst: VReg,
    lhs: &Value,
    rhs: &Value,
) -> Result<()> {
    if !matches!(ty, Type::I32 | Type::I64 | Type::Ptr) {
        return Err(sel.malformed(format!("`{kind}` on {ty}")));
    }
    let word32 = ty == Type::I32;
    let rd = Reg::Virt(dst);

    // Constants go on the right when the operation allows it.
    let (lhs, rhs) = match (lhs, rhs) {
        (Value::Imm(_), Value::Reg(_)) if kind.is_commutative() => (rhs, lhs),
        _ => (lhs, rhs),
    };

    if let Value::Imm(n) = rhs
        && let Some((op, imm)) = imm_form(kind, word32, canonical_imm(ty, *n))
    {
        let rs1 = sel.use_value(lhs, ty);
        sel.emit(MachInst::AluImm { op, rd, rs1, imm });
        return Ok(());
    }

    let rs1 = sel.use_value(lhs, ty);
    let rs2 = sel.use_value(rhs, ty);
    sel.emit(MachInst::Alu {
        op: alu_op(kind, word32),
        rd,
        rs1,
        rs2,
    });
    Ok(())
}

/// A register that is zero exactly when `lhs == rhs`.
fn difference(sel: &mut Selector<'_>, ty: Type, lhs: &Value, rhs: &Value) -> Reg {
    match (lhs, rhs) {
        (_, Value::Imm(n)) if canonical_imm(ty, *n) == 0 => sel.use_value(lhs, ty),
        (Value::Imm(n), _) if canonical_imm(ty, *n) == 0 => sel.use_value(rhs, ty),
        (_, Value::Imm(n))
            if canonical_imm(ty, *n)
                .checked_neg()
                .is_some_and(fits_imm12) =>
        {
            let rs1 = sel.use_value(lhs, ty);
            let rd = sel.new_vreg();
            sel.emit(MachInst::AluImm {
                op: AluImmOp::Addi,
                rd,
                rs1,
                imm: -canonical_imm(ty, *n),
            });
            rd
        }
        _ => {
            let rs1 = sel.use_value(lhs, ty);
            let rs2 = sel.use_value(rhs, ty);
            let rd = sel.new_vreg();
            sel.emit(MachInst::Alu {
                op: AluOp::Xor,
                rd,
                rs1,
                rs2,
            });
            rd
        }
    }
}

/// `rd = lhs < rhs` (signed or unsigned), using `slti[u]` when possible.
fn set_less_than(
    sel: &mut Selector<'_>,
    rd: Reg,
    unsigned: bool,
    ty: Type,
    lhs: &Value,
    rhs: &Value,
) {
    if let Value::Imm(n) = rhs {
        let n = canonical_imm(ty, *n);
        if fits_imm12(n) {
            let rs1 = sel.use_value(lhs, ty);
            let op = if unsigned { AluImmOp::Sltiu } else { AluImmOp::Slti };
            sel.emit(MachInst::AluImm { op, rd, rs1, imm: n });
            return;
        }
    }
    let rs1 = sel.use_value(lhs, ty);
    let rs2 = sel.use_value(rhs, ty);
    let op = if unsigned { AluOp::Sltu } else { AluOp::Slt };
    sel.emit(MachInst::Alu { op, rd, rs1, rs2 });
}

pub(crate) fn lower_icmp(
    sel: &mut Selector<'_>,
    cond: CmpCond,
    ty: Type,
    dst: VReg,
    lhs: &Value,
    rhs: &Value,
) -> Result<()> {
    let rd = Reg::Virt(dst);
    let unsigned = matches!(cond, CmpCond::Ult | CmpCond::Ule | CmpCond::Ugt | CmpCond::Uge);
    match cond {
        CmpCond::Eq => {
            // seqz
            let diff = difference(sel, ty, lhs, rhs);
            sel.emit(MachInst::AluImm {
                op: AluImmOp::Sltiu,
                rd,
                rs1: diff,
                imm: 1,
            });
        }
        CmpCond::Ne => {
            // snez
            let diff = difference(sel, ty, lhs, rhs);
            sel.emit(MachInst::Alu {
                op: AluOp::Sltu,
                rd,
                rs1: ZERO.into(),
                rs2: diff,
            });
        }
        CmpCond::Slt | CmpCond::Ult => set_less_than(sel, rd, unsigned, ty, lhs, rhs),
        CmpCond::Sgt | CmpCond::Ugt => set_less_than(sel, rd, unsigned, ty, rhs, lhs),
        CmpCond::Sge | CmpCond::Uge | CmpCond::Sle | CmpCond::Ule => {
            // !(a < b) / !(b < a)
            let (a, b) = if matches!(cond, CmpCond::Sge | CmpCond::Uge) {
                (lhs, rhs)
            } else {
                (rhs, lhs)
            };
            let tmp = sel.new_vreg();
            set_less_than(sel, tmp, unsigned, ty, a, b);
            sel.emit(MachInst::AluImm {
                op: AluImmOp::Xori,
                rd,
                rs1: tmp,
                imm: 1,
            });
        }
    }
    Ok(())
}

fn shift_pair(sel: &mut Selector<'_>, rd: Reg, rs: Reg, amount: i64, arithmetic: bool) {
    let tmp = sel.new_vreg();
    sel.emit(MachInst::AluImm {
        op: AluImmOp::Slli,
        rd: tmp,
        rs1: rs,
        imm: amount,
    });
    sel.emit(MachInst::AluImm {
        op: if arithmetic { AluImmOp::Srai } else { AluImmOp::Srli },
        rd,
        rs1: tmp,
        imm: amount,
    });
}

/// Zero-extend the low `bits` of `rs` into `rd`.
fn zero_extend(sel: &mut Selector<'_>, rd: Reg, rs: Reg, bits: u32) {
    match bits {
        1 => sel.emit(MachInst::AluImm {
            op: AluImmOp::Andi,
            rd,
            rs1: rs,
            imm: 1,
        }),
        8 => sel.emit(MachInst::AluImm {
            op: AluImmOp::Andi,
            rd,
            rs1: rs,
            imm: 0xff,
        }),
        _ => shift_pair(sel, rd, rs, i64::from(64 - bits), false),
    }
}

pub(crate) fn lower_cast(
    sel: &mut Selector<'_>,
    kind: CastOp,
    from: Type,
    to: Type,
    dst: VReg,
    src: &Value,
) -> Result<()> {
    let rd = Reg::Virt(dst);
    if let Value::Imm(n) = src {
        // Fold: the verifier guarantees the widths are consistent.
        let wide = match kind {
            CastOp::Sext => {
                let bits = from.bits();
                (canonical_imm(from, *n) << (64 - bits)) >> (64 - bits)
            }
            CastOp::Zext | CastOp::Trunc => canonical_imm(from, *n),
        };
        sel.materialize_into(rd, &Value::Imm(canonical_imm(to, wide)), to);
        return Ok(());
    }

    let rs = sel.use_value(src, from);
    match kind {
        CastOp::Zext => {
            if from == Type::I32 {
                zero_extend(sel, rd, rs, 32);
            } else {
                // Narrow types are already zero-extended.
                sel.emit(MachInst::mv(rd, rs));
            }
        }
        CastOp::Sext => {
            let signed = if to.bits() >= 32 { rd } else { sel.new_vreg() };
            match from {
                Type::I1 => sel.emit(MachInst::Alu {
                    op: AluOp::Sub,
                    rd: signed,
                    rs1: ZERO.into(),
                    rs2: rs,
                }),
                Type::I8 | Type::I16 => {
                    shift_pair(sel, signed, rs, i64::from(64 - from.bits()), true);
                }
                Type::I32 | Type::I64 | Type::Ptr => sel.emit(MachInst::mv(signed, rs)),
            }
            if to.bits() < 32 {
                zero_extend(sel, rd, signed, to.bits());
            }
        }
        CastOp::Trunc => match to {
            Type::I32 => sel.emit(MachInst::AluImm {
                op: AluImmOp::Addiw,
                rd,
                rs1: rs,
                imm: 0,
            }),
            Type::I1 | Type::I8 | Type::I16 => zero_extend(sel, rd, rs, to.bits()),
            Type::I64 | Type::Ptr => {
                return Err(sel.malformed(format!("trunc from {from} to {to}")));
            }
        },
    }
    Ok(())
}

pub(crate) fn lower_copy(sel: &mut Selector<'_>, ty: Type, dst: VReg, src: &Value) -> Result<()> {
    sel.materialize_into(Reg::Virt(dst), src, ty);
    Ok(())
}
