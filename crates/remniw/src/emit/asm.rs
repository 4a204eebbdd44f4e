// GNU `as` assembly output.
//
// Functions come first in declaration order, then global data. Block labels
// are `.LBB<function>_<block>`; a jump to the block laid out next is dropped.

use std::fmt::{self, Write};

use crate::ir::{BlockId, GlobalData, GlobalInit, Linkage, Type};
use crate::riscv::{MachFunction, MachInst};

/// Label naming scheme shared with the object emitter's diagnostics.
#[must_use]
pub fn block_label(function_index: usize, block: BlockId) -> String {
    format!(".LBB{function_index}_{}", block.0)
}

/// True when `inst` is a jump to the block placed immediately after it.
pub(crate) fn is_fallthrough(inst: &MachInst, next: Option<BlockId>) -> bool {
    matches!(inst, MachInst::Jump { target } if Some(*target) == next)
}

fn write_function(out: &mut String, index: usize, mf: &MachFunction) -> fmt::Result {
    let name = &mf.name;
    writeln!(out, "\t.text")?;
    if mf.linkage == Linkage::Export {
        writeln!(out, "\t.globl\t{name}")?;
    }
    writeln!(out, "\t.p2align\t2")?;
    writeln!(out, "\t.type\t{name},@function")?;
    writeln!(out, "{name}:")?;

    let label = |b: BlockId| block_label(index, b);
    for (position, block) in mf.blocks.iter().enumerate() {
        if position > 0 {
            writeln!(out, "{}:", label(block.id))?;
        }
        let next = mf.blocks.get(position + 1).map(|b| b.id);
        for inst in &block.insts {
            if is_fallthrough(inst, next) {
                continue;
            }
            out.push('\t');
            inst.write_asm(out, &label)?;
            out.push('\n');
        }
    }
    writeln!(out, ".Lfunc_end{index}:")?;
    writeln!(out, "\t.size\t{name}, .Lfunc_end{index}-{name}")?;
    writeln!(out)
}

fn directive(ty: Type) -> &'static str {
    match ty {
        Type::I1 | Type::I8 => ".byte",
        Type::I16 => ".half",
        Type::I32 => ".word",
        Type::I64 | Type::Ptr => ".quad",
    }
}

fn section(global: &GlobalData) -> &'static str {
    match (&global.init, global.readonly) {
        (_, true) => ".section\t.rodata",
        (GlobalInit::Zero, false) => ".bss",
        (_, false) => ".data",
    }
}

fn write_global(out: &mut String, global: &GlobalData) -> fmt::Result {
    let name = &global.name;
    writeln!(out, "\t{}", section(global))?;
    if global.linkage == Linkage::Export {
        writeln!(out, "\t.globl\t{name}")?;
    }
    writeln!(out, "\t.type\t{name},@object")?;
    writeln!(out, "\t.p2align\t{}", global.align.max(1).trailing_zeros())?;
    writeln!(out, "{name}:")?;
    match &global.init {
        GlobalInit::Zero => {}
        GlobalInit::Bytes(bytes) => {
            for row in bytes.chunks(16) {
                let items: Vec<String> = row.iter().map(ToString::to_string).collect();
                writeln!(out, "\t.byte\t{}", items.join(", "))?;
            }
        }
        GlobalInit::Ints { ty, values } => {
            let bits = ty.store_size() * 8;
            for value in values {
                let masked = if bits >= 64 {
                    *value
                } else {
                    value & ((1i64 << bits) - 1)
                };
                writeln!(out, "\t{}\t{masked}", directive(*ty))?;
            }
        }
        GlobalInit::Addr { symbol, addend } => {
            if *addend == 0 {
                writeln!(out, "\t.quad\t{symbol}")?;
            } else {
                writeln!(out, "\t.quad\t{symbol}{addend:+}")?;
            }
        }
    }
    let rest = global.size.saturating_sub(global.init.len());
    if rest > 0 {
        writeln!(out, "\t.zero\t{rest}")?;
    }
    writeln!(out, "\t.size\t{name}, {}", global.size)?;
    writeln!(out)
}

/// Render one module as assembly text.
pub fn write_assembly(
    module_name: &str,
    functions: &[MachFunction],
    globals: &[GlobalData],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "\t.file\t\"{module_name}\"")?;
    writeln!(out, "\t.option\tnopic")?;
    for (index, mf) in functions.iter().enumerate() {
        write_function(&mut out, index, mf)?;
    }
    for global in globals {
        write_global(&mut out, global)?;
    }
    Ok(out)
}
