// Loads, stores, stack allocations, and aphotic shield access checks.

use crate::abi::{fits_imm12, shield_symbols};
use crate::ir::{Type, VReg, Value};
use crate::riscv::{AluImmOp, AluOp, FrameObjectKind, LoadOp, MachInst, Mem, Reg, StoreOp, imm};
use crate::Result;

use super::selector::Selector;

fn load_op(ty: Type) -> LoadOp {
    match ty {
        Type::I1 | Type::I8 => LoadOp::Lbu,
        Type::I16 => LoadOp::Lhu,
        Type::I32 => LoadOp::Lw,
        Type::I64 | Type::Ptr => LoadOp::Ld,
    }
}

fn store_op(ty: Type) -> StoreOp {
    match ty {
        Type::I1 | Type::I8 => StoreOp::Sb,
        Type::I16 => StoreOp::Sh,
        Type::I32 => StoreOp::Sw,
        Type::I64 | Type::Ptr => StoreOp::Sd,
    }
}

/// `base + offset` in a fresh register.
pub(crate) fn add_offset(sel: &mut Selector<'_>, base: Reg, offset: i64) -> Reg {
    let rd = sel.new_vreg();
    if fits_imm12(offset) {
        sel.emit(MachInst::AluImm {
            op: AluImmOp::Addi,
            rd,
            rs1: base,
            imm: offset,
        });
    } else {
        let tmp = sel.new_vreg();
        sel.emit_all(imm::materialize(tmp, offset));
        sel.emit(MachInst::Alu {
            op: AluOp::Add,
            rd,
            rs1: base,
            rs2: tmp,
        });
    }
    rd
}

#[derive(Clone, Copy)]
enum Access {
    Load,
    Store,
}

/// Memory operand for an access of `width` bytes at `addr + offset`.
///
/// Frame objects and globals are addressed directly. Accesses through any
/// other pointer are checked by the shield runtime first when
/// instrumentation is on.
fn address(sel: &mut Selector<'_>, addr: &Value, offset: i64, access: Access, width: u32) -> Mem {
    if let Some(index) = sel.frame_slot(addr) {
        return Mem::frame(index, offset);
    }

    let base = sel.use_value(addr, Type::Ptr);
    let checked = sel.options.instrument && matches!(addr, Value::Reg(_));
    if checked {
        let ea = if offset == 0 {
            base
        } else {
            add_offset(sel, base, offset)
        };
        let width_reg = sel.new_vreg();
        sel.emit_all(imm::materialize(width_reg, i64::from(width)));
        let callee = match access {
            Access::Load => shield_symbols::CHECK_LOAD,
            Access::Store => shield_symbols::CHECK_STORE,
        };
        sel.emit(MachInst::Call {
            callee: callee.to_string(),
            args: vec![ea, width_reg],
            rets: Vec::new(),
        });
        return Mem::reg(ea, 0);
    }

    if fits_imm12(offset) {
        Mem::reg(base, offset)
    } else {
        Mem::reg(add_offset(sel, base, offset), 0)
    }
}

pub(crate) fn lower_load(
    sel: &mut Selector<'_>,
    ty: Type,
    dst: VReg,
    addr: &Value,
    offset: i64,
) -> Result<()> {
    let mem = address(sel, addr, offset, Access::Load, ty.store_size());
    sel.emit(MachInst::Load {
        op: load_op(ty),
        rd: Reg::Virt(dst),
        mem,
    });
    Ok(())
}

pub(crate) fn lower_store(
    sel: &mut Selector<'_>,
    ty: Type,
    value: &Value,
    addr: &Value,
    offset: i64,
) -> Result<()> {
    let src = sel.use_value(value, ty);
    let mem = address(sel, addr, offset, Access::Store, ty.store_size());
    sel.emit(MachInst::Store {
        op: store_op(ty),
        src,
        mem,
    });
    Ok(())
}

pub(crate) fn lower_alloca(sel: &mut Selector<'_>, dst: VReg, size: u32, align: u32) -> Result<()> {
    let index = match sel.frame_slots.get(&dst) {
        Some(_) if sel.address_only.contains(&dst) => return Ok(()),
        Some(index) => *index,
        None => sel.mf.add_frame_object(FrameObjectKind::Local, size, align),
    };
    sel.emit(MachInst::FrameAddr {
        rd: Reg::Virt(dst),
        index,
    });
    Ok(())
}

/// Copy `size` bytes from `src` to `dst`, in the widest chunks `align`
/// permits.
pub(crate) fn copy_memory(sel: &mut Selector<'_>, dst: Reg, src: Reg, size: u32, align: u32) {
    let (mut dst, mut src) = (dst, src);
    let mut offset: i64 = 0;
    let mut remaining = size;
    for (width, load, store) in [
        (8, LoadOp::Ld, StoreOp::Sd),
        (4, LoadOp::Lwu, StoreOp::Sw),
        (2, LoadOp::Lhu, StoreOp::Sh),
        (1, LoadOp::Lbu, StoreOp::Sb),
    ] {
        if width > align.max(1) && width > 1 {
            continue;
        }
        while remaining >= width {
            if !fits_imm12(offset + i64::from(width)) {
                dst = add_offset(sel, dst, offset);
                src = add_offset(sel, src, offset);
                offset = 0;
            }
            let tmp = sel.new_vreg();
            sel.emit(MachInst::Load {
                op: load,
                rd: tmp,
                mem: Mem::reg(src, offset),
            });
            sel.emit(MachInst::Store {
                op: store,
                src: tmp,
                mem: Mem::reg(dst, offset),
            });
            offset += i64::from(width);
            remaining -= width;
        }
    }
}
