//! Constant materialization.
//!
//! * 12-bit signed constants: one `addi rd, zero, imm`.
//! * 32-bit signed constants: `lui` (rounded upper 20 bits) then `addiw`
//!   for the low 12 bits, omitted when they are zero.
//! * Anything wider: materialize the value shifted right past its trailing
//!   zeros, `slli` it back into place, then `addi` the low 12 bits.

use crate::abi::{ZERO, fits_imm12};

use super::{AluImmOp, MachInst, Reg};

/// Sign-extend the low `bits` bits of `value`.
#[must_use]
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

#[must_use]
pub fn fits_i32(value: i64) -> bool {
    i32::try_from(value).is_ok()
}

/// Split a 32-bit value into the `lui` immediate and the signed low part.
#[must_use]
pub fn split_hi_lo(value: i64) -> (u32, i64) {
    let lo = sign_extend(value as u64 & 0xfff, 12);
    let hi = ((value.wrapping_sub(lo) >> 12) as u64 & 0xf_ffff) as u32;
    (hi, lo)
}

/// Instructions that leave `value` in `rd`.
#[must_use]
pub fn materialize(rd: Reg, value: i64) -> Vec<MachInst> {
    let mut out = Vec::new();
    generate(rd, value, &mut out);
    out
}

fn generate(rd: Reg, value: i64, out: &mut Vec<MachInst>) {
    if fits_imm12(value) {
        out.push(MachInst::AluImm {
            op: AluImmOp::Addi,
            rd,
            rs1: ZERO.into(),
            imm: value,
        });
        return;
    }

    if fits_i32(value) {
        let (hi, lo) = split_hi_lo(value);
        out.push(MachInst::Lui { rd, imm20: hi });
        if lo != 0 {
            out.push(MachInst::AluImm {
                op: AluImmOp::Addiw,
                rd,
                rs1: rd,
                imm: lo,
            });
        }
        return;
    }

    let lo = sign_extend(value as u64 & 0xfff, 12);
    let hi52 = (value as u64).wrapping_add(0x800) >> 12;
    let shift = 12 + hi52.trailing_zeros();
    let upper = sign_extend(hi52 >> (shift - 12), 64 - shift);

    generate(rd, upper, out);
    out.push(MachInst::AluImm {
        op: AluImmOp::Slli,
        rd,
        rs1: rd,
        imm: i64::from(shift),
    });
    if lo != 0 {
        out.push(MachInst::AluImm {
            op: AluImmOp::Addi,
            rd,
            rs1: rd,
            imm: lo,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::A0;

    /// Evaluate a materialization sequence the way the hardware would.
    pub(crate) fn evaluate(seq: &[MachInst]) -> i64 {
        let mut acc: i64 = 0;
        for inst in seq {
            acc = match inst {
                MachInst::Lui { imm20, .. } => i64::from((*imm20 << 12) as i32),
                MachInst::AluImm { op, rs1, imm, .. } => {
                    let src = if *rs1 == Reg::Phys(ZERO) { 0 } else { acc };
                    match op {
                        AluImmOp::Addi => src.wrapping_add(*imm),
                        AluImmOp::Addiw => i64::from((src as i32).wrapping_add(*imm as i32)),
                        AluImmOp::Slli => src << imm,
                        other => panic!("unexpected {other:?}"),
                    }
                }
                other => panic!("unexpected {other}"),
            };
        }
        acc
    }

    #[test]
    fn test_small_constant_is_single_addi() {
        for value in [0, 1, -1, 2047, -2048] {
            let seq = materialize(A0.into(), value);
            assert_eq!(seq.len(), 1, "{value}");
            assert_eq!(seq[0].to_string(), format!("li\ta0, {value}"));
        }
    }

    #[test]
    fn test_32bit_constants() {
        let seq = materialize(A0.into(), 0x1234_5678);
        assert_eq!(
            seq,
            vec![
                MachInst::Lui {
                    rd: A0.into(),
                    imm20: 0x12345
                },
                MachInst::AluImm {
                    op: AluImmOp::Addiw,
                    rd: A0.into(),
                    rs1: A0.into(),
                    imm: 0x678
                },
            ]
        );

        // Low part rounds the upper part up.
        let seq = materialize(A0.into(), 0x1234_5fff);
        assert!(matches!(seq[0], MachInst::Lui { imm20: 0x12346, .. }));
        assert!(matches!(seq[1], MachInst::AluImm { imm: -1, .. }));

        // Exact multiple of 4096: no addiw.
        assert_eq!(materialize(A0.into(), 4096).len(), 1);
        assert_eq!(materialize(A0.into(), 2048).len(), 2);
        assert_eq!(evaluate(&materialize(A0.into(), 2048)), 2048);
        assert_eq!(evaluate(&materialize(A0.into(), i64::from(i32::MAX))), i64::from(i32::MAX));
        assert_eq!(evaluate(&materialize(A0.into(), i64::from(i32::MIN))), i64::from(i32::MIN));
    }

    #[test]
    fn test_64bit_constants() {
        for value in [
            i64::MIN,
            i64::MAX,
            0x1_0000_0000,
            0x8000_0000,
            -0x8000_0001,
            0x1234_5678_9abc_def0,
            -0x1234_5678_9abc_def0,
        ] {
            let seq = materialize(A0.into(), value);
            assert_eq!(evaluate(&seq), value, "{value:#x}");
            assert!(seq.len() <= 8, "{value:#x}: {} instructions", seq.len());
        }
        // 1 << 32: li 1, slli 32.
        assert_eq!(materialize(A0.into(), 1 << 32).len(), 2);
    }

    #[test]
    fn test_split_hi_lo() {
        assert_eq!(split_hi_lo(0x1000), (1, 0));
        assert_eq!(split_hi_lo(0x800), (1, -2048));
        assert_eq!(split_hi_lo(-1), (0, -1));
    }
}
