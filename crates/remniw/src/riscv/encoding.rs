//! RV64IM binary instruction formats.

use super::{AluImmOp, AluOp, BranchCond, LoadOp, PReg, StoreOp};

pub const OPCODE_LOAD: u32 = 0b000_0011;
pub const OPCODE_OP_IMM: u32 = 0b001_0011;
pub const OPCODE_AUIPC: u32 = 0b001_0111;
pub const OPCODE_OP_IMM_32: u32 = 0b001_1011;
pub const OPCODE_STORE: u32 = 0b010_0011;
pub const OPCODE_OP: u32 = 0b011_0011;
pub const OPCODE_LUI: u32 = 0b011_0111;
pub const OPCODE_OP_32: u32 = 0b011_1011;
pub const OPCODE_BRANCH: u32 = 0b110_0011;
pub const OPCODE_JALR: u32 = 0b110_0111;
pub const OPCODE_JAL: u32 = 0b110_1111;
pub const OPCODE_SYSTEM: u32 = 0b111_0011;

fn reg(r: PReg) -> u32 {
    u32::from(r.hw())
}

#[must_use]
pub fn r_type(opcode: u32, rd: PReg, funct3: u32, rs1: PReg, rs2: PReg, funct7: u32) -> u32 {
    (funct7 << 25) | (reg(rs2) << 20) | (reg(rs1) << 15) | (funct3 << 12) | (reg(rd) << 7) | opcode
}

#[must_use]
pub fn i_type(opcode: u32, rd: PReg, funct3: u32, rs1: PReg, imm: i64) -> u32 {
    let imm = (imm as u32) & 0xfff;
    (imm << 20) | (reg(rs1) << 15) | (funct3 << 12) | (reg(rd) << 7) | opcode
}

#[must_use]
pub fn s_type(opcode: u32, funct3: u32, rs1: PReg, rs2: PReg, imm: i64) -> u32 {
    let imm = (imm as u32) & 0xfff;
    ((imm >> 5) << 25)
        | (reg(rs2) << 20)
        | (reg(rs1) << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | opcode
}

#[must_use]
pub fn b_type(funct3: u32, rs1: PReg, rs2: PReg, offset: i64) -> u32 {
    let imm = offset as u32;
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | (reg(rs2) << 20)
        | (reg(rs1) << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 1) << 7)
        | OPCODE_BRANCH
}

#[must_use]
pub fn u_type(opcode: u32, rd: PReg, imm20: u32) -> u32 {
    ((imm20 & 0xf_ffff) << 12) | (reg(rd) << 7) | opcode
}

#[must_use]
pub fn j_type(rd: PReg, offset: i64) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | (reg(rd) << 7)
        | OPCODE_JAL
}

#[must_use]
pub fn encode_alu(op: AluOp, rd: PReg, rs1: PReg, rs2: PReg) -> u32 {
    let (opcode, funct3, funct7) = match op {
        AluOp::Add => (OPCODE_OP, 0b000, 0),
        AluOp::Sub => (OPCODE_OP, 0b000, 0x20),
        AluOp::Sll => (OPCODE_OP, 0b001, 0),
        AluOp::Slt => (OPCODE_OP, 0b010, 0),
        AluOp::Sltu => (OPCODE_OP, 0b011, 0),
        AluOp::Xor => (OPCODE_OP, 0b100, 0),
        AluOp::Srl => (OPCODE_OP, 0b101, 0),
        AluOp::Sra => (OPCODE_OP, 0b101, 0x20),
        AluOp::Or => (OPCODE_OP, 0b110, 0),
        AluOp::And => (OPCODE_OP, 0b111, 0),
        AluOp::Mul => (OPCODE_OP, 0b000, 1),
        AluOp::Div => (OPCODE_OP, 0b100, 1),
        AluOp::Divu => (OPCODE_OP, 0b101, 1),
        AluOp::Rem => (OPCODE_OP, 0b110, 1),
        AluOp::Remu => (OPCODE_OP, 0b111, 1),
        AluOp::Addw => (OPCODE_OP_32, 0b000, 0),
        AluOp::Subw => (OPCODE_OP_32, 0b000, 0x20),
        AluOp::Sllw => (OPCODE_OP_32, 0b001, 0),
        AluOp::Srlw => (OPCODE_OP_32, 0b101, 0),
        AluOp::Sraw => (OPCODE_OP_32, 0b101, 0x20),
        AluOp::Mulw => (OPCODE_OP_32, 0b000, 1),
        AluOp::Divw => (OPCODE_OP_32, 0b100, 1),
        AluOp::Divuw => (OPCODE_OP_32, 0b101, 1),
        AluOp::Remw => (OPCODE_OP_32, 0b110, 1),
        AluOp::Remuw => (OPCODE_OP_32, 0b111, 1),
    };
    r_type(opcode, rd, funct3, rs1, rs2, funct7)
}

/// Shift immediates carry the arithmetic flag in the upper immediate bits.
#[must_use]
pub fn encode_alu_imm(op: AluImmOp, rd: PReg, rs1: PReg, imm: i64) -> u32 {
    match op {
        AluImmOp::Addi => i_type(OPCODE_OP_IMM, rd, 0b000, rs1, imm),
        AluImmOp::Slti => i_type(OPCODE_OP_IMM, rd, 0b010, rs1, imm),
        AluImmOp::Sltiu => i_type(OPCODE_OP_IMM, rd, 0b011, rs1, imm),
        AluImmOp::Xori => i_type(OPCODE_OP_IMM, rd, 0b100, rs1, imm),
        AluImmOp::Ori => i_type(OPCODE_OP_IMM, rd, 0b110, rs1, imm),
        AluImmOp::Andi => i_type(OPCODE_OP_IMM, rd, 0b111, rs1, imm),
        AluImmOp::Slli => i_type(OPCODE_OP_IMM, rd, 0b001, rs1, imm & 0x3f),
        AluImmOp::Srli => i_type(OPCODE_OP_IMM, rd, 0b101, rs1, imm & 0x3f),
        AluImmOp::Srai => i_type(OPCODE_OP_IMM, rd, 0b101, rs1, 0x400 | (imm & 0x3f)),
        AluImmOp::Addiw => i_type(OPCODE_OP_IMM_32, rd, 0b000, rs1, imm),
        AluImmOp::Slliw => i_type(OPCODE_OP_IMM_32, rd, 0b001, rs1, imm & 0x1f),
        AluImmOp::Srliw => i_type(OPCODE_OP_IMM_32, rd, 0b101, rs1, imm & 0x1f),
        AluImmOp::Sraiw => i_type(OPCODE_OP_IMM_32, rd, 0b101, rs1, 0x400 | (imm & 0x1f)),
    }
}

#[must_use]
pub fn encode_load(op: LoadOp, rd: PReg, base: PReg, offset: i64) -> u32 {
    let funct3 = match op {
        LoadOp::Lb => 0b000,
        LoadOp::Lh => 0b001,
        LoadOp::Lw => 0b010,
        LoadOp::Ld => 0b011,
        LoadOp::Lbu => 0b100,
        LoadOp::Lhu => 0b101,
        LoadOp::Lwu => 0b110,
    };
    i_type(OPCODE_LOAD, rd, funct3, base, offset)
}

#[must_use]
pub fn encode_store(op: StoreOp, src: PReg, base: PReg, offset: i64) -> u32 {
    let funct3 = match op {
        StoreOp::Sb => 0b000,
        StoreOp::Sh => 0b001,
        StoreOp::Sw => 0b010,
        StoreOp::Sd => 0b011,
    };
    s_type(OPCODE_STORE, funct3, base, src, offset)
}

#[must_use]
pub fn branch_funct3(cond: BranchCond) -> u32 {
    match cond {
        BranchCond::Eq => 0b000,
        BranchCond::Ne => 0b001,
        BranchCond::Lt => 0b100,
        BranchCond::Ge => 0b101,
        BranchCond::Ltu => 0b110,
        BranchCond::Geu => 0b111,
    }
}

#[must_use]
pub fn encode_branch(cond: BranchCond, rs1: PReg, rs2: PReg, offset: i64) -> u32 {
    b_type(branch_funct3(cond), rs1, rs2, offset)
}

#[must_use]
pub fn encode_jal(rd: PReg, offset: i64) -> u32 {
    j_type(rd, offset)
}

#[must_use]
pub fn encode_jalr(rd: PReg, rs1: PReg, imm: i64) -> u32 {
    i_type(OPCODE_JALR, rd, 0b000, rs1, imm)
}

#[must_use]
pub fn encode_lui(rd: PReg, imm20: u32) -> u32 {
    u_type(OPCODE_LUI, rd, imm20)
}

#[must_use]
pub fn encode_auipc(rd: PReg, imm20: u32) -> u32 {
    u_type(OPCODE_AUIPC, rd, imm20)
}

/// Conditional branch reach (B-type, ±4 KiB).
#[must_use]
pub fn branch_in_range(offset: i64) -> bool {
    (-4096..4096).contains(&offset) && offset % 2 == 0
}

/// `jal` reach (J-type, ±1 MiB).
#[must_use]
pub fn jal_in_range(offset: i64) -> bool {
    (-(1 << 20)..(1 << 20)).contains(&offset) && offset % 2 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{A0, A1, RA, SP, ZERO};

    #[test]
    fn test_encode_arithmetic() {
        assert_eq!(encode_alu_imm(AluImmOp::Addi, A0, A0, 1), 0x0015_0513);
        assert_eq!(encode_alu(AluOp::Add, A0, A0, A1), 0x00b5_0533);
        assert_eq!(encode_alu(AluOp::Mul, A0, A0, A1), 0x02b5_0533);
        assert_eq!(encode_alu(AluOp::Addw, A0, A0, A1), 0x00b5_053b);
        assert_eq!(encode_lui(A0, 0x12345), 0x1234_5537);
    }

    #[test]
    fn test_encode_memory_and_control() {
        assert_eq!(encode_load(LoadOp::Ld, RA, SP, 8), 0x0081_3083);
        assert_eq!(encode_store(StoreOp::Sd, RA, SP, 8), 0x0011_3423);
        assert_eq!(encode_jalr(ZERO, RA, 0), 0x0000_8067);
        assert_eq!(encode_branch(BranchCond::Eq, A0, A1, 8), 0x00b5_0463);
        assert_eq!(encode_jal(ZERO, 16), 0x0100_006f);
    }

    #[test]
    fn test_negative_offsets() {
        // addi sp, sp, -16
        assert_eq!(encode_alu_imm(AluImmOp::Addi, SP, SP, -16), 0xff01_0113);
        // sd ra, -8(sp)
        assert_eq!(encode_store(StoreOp::Sd, RA, SP, -8), 0xfe11_3c23);
        // j -4
        assert_eq!(encode_jal(ZERO, -4), 0xffdf_f06f);
    }

    #[test]
    fn test_ranges() {
        assert!(branch_in_range(4094));
        assert!(!branch_in_range(4096));
        assert!(branch_in_range(-4096));
        assert!(jal_in_range(-(1 << 20)));
        assert!(!jal_in_range(1 << 20));
    }
}
