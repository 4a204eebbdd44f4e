// Relocatable object image.
//
// The image is a single address space: machine code at offset 0 and the data
// segment at the next page boundary. Emission is two passes:
//
//   1. Layout: every function is relaxed to a fixed point (branches that
//      cannot reach their block are rewritten to an inverted branch over a
//      `jal`, or over `auipc`+`jalr` for very long distances) and block
//      offsets are recorded in a table keyed by block id. Function and data
//      addresses then go into the module symbol table.
//   2. Encoding: instructions are encoded against those tables. References
//      to symbols the module does not define become relocations.

use std::collections::{BTreeSet, HashMap};

use crate::abi::{RA, SCRATCH2, ZERO};
use crate::error::{Error, Result};
use crate::ir::{BlockId, GlobalData, GlobalInit, Linkage};
use crate::riscv::encoding::{
    branch_in_range, encode_alu, encode_alu_imm, encode_auipc, encode_branch, encode_jal,
    encode_jalr, encode_load, encode_lui, encode_store, jal_in_range,
};
use crate::riscv::imm::{fits_i32, split_hi_lo};
use crate::riscv::{AluImmOp, MachFunction, MachInst, Mem, MemBase, PReg, Reg};

use super::asm::is_fallthrough;

pub const PAGE_SIZE: u64 = 4096;

/// Largest image accepted by [`ObjectImage::decode`] and
/// [`ObjectImage::relocate`].
pub const MAX_IMAGE_BYTES: u64 = 1 << 32;
/// Bytes patched by any relocation: `auipc` + `jalr`/`addi`, or a `.quad`.
const RELOCATION_BYTES: u64 = 8;
const MAGIC: &[u8; 5] = b"RWOBJ";
const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Image offset.
    pub offset: u64,
    pub size: u64,
    pub global: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// `auipc ra` + `jalr ra` pair.
    Call,
    /// `auipc rd` + `addi rd` pair.
    PcrelAddr,
    /// Eight-byte absolute address.
    Abs64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Image offset of the patched bytes.
    pub offset: u64,
    pub kind: RelocKind,
    pub symbol: String,
    pub addend: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectImage {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub data_offset: u64,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
}

const fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

// ── Pass one: layout and relaxation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Form {
    /// Jump to the next block, not emitted.
    Elided,
    Short,
    /// Inverted branch over `jal`, or `auipc`+`jalr` for a jump.
    Long,
    /// Inverted branch over `auipc`+`jalr`.
    Far,
}

fn size_of(inst: &MachInst, form: Form) -> u64 {
    match (inst, form) {
        (_, Form::Elided) => 0,
        (MachInst::Branch { .. }, Form::Long) | (MachInst::Jump { .. }, Form::Long | Form::Far) => 8,
        (MachInst::Branch { .. }, Form::Far) => 12,
        (MachInst::CallSym { .. } | MachInst::La { .. }, _) => 8,
        _ => 4,
    }
}

fn required_form(inst: &MachInst, pc: u64, dest: u64) -> Form {
    let distance = dest as i64 - pc as i64;
    match inst {
        MachInst::Branch { .. } if branch_in_range(distance) => Form::Short,
        MachInst::Branch { .. } if jal_in_range(distance - 4) => Form::Long,
        MachInst::Branch { .. } => Form::Far,
        MachInst::Jump { .. } if jal_in_range(distance) => Form::Short,
        _ => Form::Long,
    }
}

struct FunctionLayout {
    forms: Vec<Vec<Form>>,
    block_offsets: HashMap<BlockId, u64>,
    size: u64,
}

fn block_offsets(mf: &MachFunction, forms: &[Vec<Form>]) -> (HashMap<BlockId, u64>, u64) {
    let mut offsets = HashMap::with_capacity(mf.blocks.len());
    let mut pc = 0;
    for (block, block_forms) in mf.blocks.iter().zip(forms) {
        offsets.insert(block.id, pc);
        for (inst, &form) in block.insts.iter().zip(block_forms) {
            pc += size_of(inst, form);
        }
    }
    (offsets, pc)
}

fn relax(mf: &MachFunction) -> Result<FunctionLayout> {
    let mut forms: Vec<Vec<Form>> = mf
        .blocks
        .iter()
        .enumerate()
        .map(|(position, block)| {
            let next = mf.blocks.get(position + 1).map(|b| b.id);
            block
                .insts
                .iter()
                .map(|inst| {
                    if is_fallthrough(inst, next) {
                        Form::Elided
                    } else {
                        Form::Short
                    }
                })
                .collect()
        })
        .collect();

    // Forms only grow, so this terminates.
    loop {
        let (offsets, size) = block_offsets(mf, &forms);
        let mut changed = false;
        let mut pc = 0;
        for (b, block) in mf.blocks.iter().enumerate() {
            for (i, inst) in block.insts.iter().enumerate() {
                let form = forms[b][i];
                if let Some(target) = inst.branch_target()
                    && form != Form::Elided
                {
                    let dest = *offsets.get(&target).ok_or_else(|| {
                        Error::Internal(format!("{}: branch to missing block {target}", mf.name))
                    })?;
                    let wanted = required_form(inst, pc, dest);
                    if wanted > form {
                        forms[b][i] = wanted;
                        changed = true;
                    }
                }
                pc += size_of(inst, form);
            }
        }
        if !changed {
            return Ok(FunctionLayout {
                forms,
                block_offsets: offsets,
                size,
            });
        }
    }
}

// ── Pass two: encoding ──

struct Encoder<'a> {
    text: Vec<u8>,
    relocations: Vec<Relocation>,
    addresses: &'a HashMap<String, u64>,
}

impl Encoder<'_> {
    fn pc(&self) -> u64 {
        self.text.len() as u64
    }

    fn word(&mut self, word: u32) {
        self.text.extend(word.to_le_bytes());
    }

    /// Signed distance from the current pc (plus `skew`) to `dest`.
    fn distance(&self, dest: u64, skew: u64) -> i64 {
        dest as i64 - (self.pc() + skew) as i64
    }

    /// Emit an `auipc`-based pair reaching `symbol`, or a relocation for it.
    fn pcrel_pair(
        &mut self,
        function: &str,
        symbol: &str,
        kind: RelocKind,
        hi_rd: PReg,
        second: impl Fn(i64) -> u32,
    ) -> Result<()> {
        match self.addresses.get(symbol) {
            Some(&dest) => {
                let distance = self.distance(dest, 0);
                if !fits_i32(distance) {
                    return Err(Error::Internal(format!(
                        "{function}: `{symbol}` out of pc-relative range"
                    )));
                }
                let (hi, lo) = split_hi_lo(distance);
                self.word(encode_auipc(hi_rd, hi));
                self.word(second(lo));
            }
            None => {
                self.relocations.push(Relocation {
                    offset: self.pc(),
                    kind,
                    symbol: symbol.to_string(),
                    addend: 0,
                });
                self.word(encode_auipc(hi_rd, 0));
                self.word(second(0));
            }
        }
        Ok(())
    }

    fn function(&mut self, mf: &MachFunction, layout: &FunctionLayout) -> Result<()> {
        let start = self.pc();
        let phys = |reg: Reg| {
            reg.as_phys().ok_or_else(|| {
                Error::Internal(format!("{}: operand {reg} reached the emitter", mf.name))
            })
        };
        let base = |mem: &Mem| match mem.base {
            MemBase::Reg(reg) => phys(reg),
            MemBase::Frame(index) => Err(Error::Internal(format!(
                "{}: unresolved frame reference {index}",
                mf.name
            ))),
        };
        let target = |block: BlockId| {
            layout
                .block_offsets
                .get(&block)
                .map(|offset| start + offset)
                .ok_or_else(|| Error::Internal(format!("{}: missing block {block}", mf.name)))
        };

        for (block, forms) in mf.blocks.iter().zip(&layout.forms) {
            for (inst, &form) in block.insts.iter().zip(forms) {
                match inst {
                    _ if form == Form::Elided => {}
                    MachInst::Alu { op, rd, rs1, rs2 } => {
                        self.word(encode_alu(*op, phys(*rd)?, phys(*rs1)?, phys(*rs2)?));
                    }
                    MachInst::AluImm { op, rd, rs1, imm } => {
                        self.word(encode_alu_imm(*op, phys(*rd)?, phys(*rs1)?, *imm));
                    }
                    MachInst::Lui { rd, imm20 } => self.word(encode_lui(phys(*rd)?, *imm20)),
                    MachInst::Load { op, rd, mem } => {
                        self.word(encode_load(*op, phys(*rd)?, base(mem)?, mem.offset));
                    }
                    MachInst::Store { op, src, mem } => {
                        self.word(encode_store(*op, phys(*src)?, base(mem)?, mem.offset));
                    }
                    MachInst::Jalr { rd, rs1, imm } => {
                        self.word(encode_jalr(phys(*rd)?, phys(*rs1)?, *imm));
                    }
                    MachInst::La { rd, symbol } => {
                        let rd = phys(*rd)?;
                        self.pcrel_pair(&mf.name, symbol, RelocKind::PcrelAddr, rd, |lo| {
                            encode_alu_imm(AluImmOp::Addi, rd, rd, lo)
                        })?;
                    }
                    MachInst::CallSym { symbol } => {
                        self.pcrel_pair(&mf.name, symbol, RelocKind::Call, RA, |lo| {
                            encode_jalr(RA, RA, lo)
                        })?;
                    }
                    MachInst::Branch {
                        cond,
                        rs1,
                        rs2,
                        target: block,
                    } => {
                        let (rs1, rs2, dest) = (phys(*rs1)?, phys(*rs2)?, target(*block)?);
                        match form {
                            Form::Short => {
                                let distance = self.distance(dest, 0);
                                self.word(encode_branch(*cond, rs1, rs2, distance));
                            }
                            Form::Long => {
                                self.word(encode_branch(cond.invert(), rs1, rs2, 8));
                                let distance = self.distance(dest, 0);
                                self.word(encode_jal(ZERO, distance));
                            }
                            _ => {
                                self.word(encode_branch(cond.invert(), rs1, rs2, 12));
                                self.far_jump(dest);
                            }
                        }
                    }
                    MachInst::Jump { target: block } => {
                        let dest = target(*block)?;
                        if form == Form::Short {
                            let distance = self.distance(dest, 0);
                            self.word(encode_jal(ZERO, distance));
                        } else {
                            self.far_jump(dest);
                        }
                    }
                    MachInst::FrameAddr { .. }
                    | MachInst::EntryArgs { .. }
                    | MachInst::Call { .. }
                    | MachInst::Ret { .. } => {
                        return Err(Error::Internal(format!(
                            "{}: pseudo-instruction `{inst}` reached the emitter",
                            mf.name
                        )));
                    }
                }
            }
        }

        let emitted = self.pc() - start;
        if emitted != layout.size {
            return Err(Error::Internal(format!(
                "{}: emitted {emitted} bytes, layout expected {}",
                mf.name, layout.size
            )));
        }
        Ok(())
    }

    fn far_jump(&mut self, dest: u64) {
        let (hi, lo) = split_hi_lo(self.distance(dest, 0));
        self.word(encode_auipc(SCRATCH2, hi));
        self.word(encode_jalr(ZERO, SCRATCH2, lo));
    }
}

fn write_init(data: &mut [u8], global: &GlobalData) {
    match &global.init {
        GlobalInit::Zero | GlobalInit::Addr { .. } => {}
        GlobalInit::Bytes(bytes) => data[..bytes.len()].copy_from_slice(bytes),
        GlobalInit::Ints { ty, values } => {
            let width = ty.store_size() as usize;
            for (chunk, value) in data.chunks_mut(width).zip(values) {
                chunk.copy_from_slice(&value.to_le_bytes()[..width]);
            }
        }
    }
}

/// Build the object image for already-lowered functions and module data.
pub fn assemble(functions: &[MachFunction], globals: &[GlobalData]) -> Result<ObjectImage> {
    let layouts = functions.iter().map(relax).collect::<Result<Vec<_>>>()?;

    let mut symbols = Vec::with_capacity(functions.len() + globals.len());
    let mut addresses = HashMap::new();
    let mut cursor = 0;
    for (mf, layout) in functions.iter().zip(&layouts) {
        addresses.insert(mf.name.clone(), cursor);
        symbols.push(Symbol {
            name: mf.name.clone(),
            kind: SymbolKind::Function,
            offset: cursor,
            size: layout.size,
            global: mf.linkage == Linkage::Export,
        });
        cursor += layout.size;
    }

    let data_offset = align_up(cursor, PAGE_SIZE);
    let mut data = Vec::new();
    let mut relocations = Vec::new();
    for global in globals {
        let at = align_up(data.len() as u64, u64::from(global.align.max(1)));
        let end = usize::try_from(at + global.size)
            .map_err(|_| Error::ObjectFormat(format!("global `{}` too large", global.name)))?;
        data.resize(end, 0);
        write_init(&mut data[at as usize..end], global);
        if let GlobalInit::Addr { symbol, addend } = &global.init {
            relocations.push(Relocation {
                offset: data_offset + at,
                kind: RelocKind::Abs64,
                symbol: symbol.clone(),
                addend: *addend,
            });
        }
        addresses.insert(global.name.clone(), data_offset + at);
        symbols.push(Symbol {
            name: global.name.clone(),
            kind: SymbolKind::Data,
            offset: data_offset + at,
            size: global.size,
            global: global.linkage == Linkage::Export,
        });
    }

    let mut encoder = Encoder {
        text: Vec::with_capacity(cursor as usize),
        relocations: Vec::new(),
        addresses: &addresses,
    };
    for (mf, layout) in functions.iter().zip(&layouts) {
        encoder.function(mf, layout)?;
    }
    let mut all_relocations = encoder.relocations;
    all_relocations.extend(relocations);

    tracing::debug!(
        text = encoder.text.len(),
        data = data.len(),
        relocations = all_relocations.len(),
        "object image assembled"
    );
    Ok(ObjectImage {
        text: encoder.text,
        data,
        data_offset,
        symbols,
        relocations: all_relocations,
    })
}

// ── Image queries and loading ──

fn patch_word(bytes: &mut [u8], at: usize, update: impl Fn(u32) -> u32) -> Result<()> {
    let slot = bytes
        .get_mut(at..at.saturating_add(4))
        .ok_or_else(|| Error::ObjectFormat(format!("relocation at {at:#x} outside image")))?;
    let word = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
    slot.copy_from_slice(&update(word).to_le_bytes());
    Ok(())
}

impl ObjectImage {
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Total bytes spanned by the image.
    #[must_use]
    pub fn len(&self) -> u64 {
        if self.data.is_empty() {
            self.text.len() as u64
        } else {
            self.data_offset.saturating_add(self.data.len() as u64)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symbols referenced by relocations but not defined here.
    #[must_use]
    pub fn undefined_symbols(&self) -> BTreeSet<&str> {
        self.relocations
            .iter()
            .map(|r| r.symbol.as_str())
            .filter(|name| self.symbol(name).is_none())
            .collect()
    }

    /// Lay the image out at `base` with every relocation applied. `resolve`
    /// supplies addresses for undefined symbols.
    pub fn relocate(&self, base: u64, resolve: impl Fn(&str) -> Option<u64>) -> Result<Vec<u8>> {
        self.check_layout()?;
        let len = usize::try_from(self.len())
            .map_err(|_| Error::ObjectFormat("image does not fit in memory".into()))?;
        let mut bytes = vec![0u8; len];
        bytes[..self.text.len()].copy_from_slice(&self.text);
        if !self.data.is_empty() {
            let start = usize::try_from(self.data_offset)
                .map_err(|_| Error::ObjectFormat("image does not fit in memory".into()))?;
            bytes[start..start + self.data.len()].copy_from_slice(&self.data);
        }

        for reloc in &self.relocations {
            let target = match self.symbol(&reloc.symbol) {
                Some(symbol) => base.wrapping_add(symbol.offset),
                None => resolve(&reloc.symbol).ok_or_else(|| {
                    Error::ObjectFormat(format!("undefined symbol `{}`", reloc.symbol))
                })?,
            }
            .wrapping_add_signed(reloc.addend);
            let at = usize::try_from(reloc.offset).map_err(|_| {
                Error::ObjectFormat(format!("relocation at {:#x} outside image", reloc.offset))
            })?;
            match reloc.kind {
                RelocKind::Abs64 => {
                    let slot = bytes.get_mut(at..at.saturating_add(8)).ok_or_else(|| {
                        Error::ObjectFormat(format!("relocation at {at:#x} outside image"))
                    })?;
                    slot.copy_from_slice(&target.to_le_bytes());
                }
                RelocKind::Call | RelocKind::PcrelAddr => {
                    let distance = target.wrapping_sub(base.wrapping_add(reloc.offset)) as i64;
                    if !fits_i32(distance) {
                        return Err(Error::ObjectFormat(format!(
                            "`{}` out of pc-relative range",
                            reloc.symbol
                        )));
                    }
                    let (hi, lo) = split_hi_lo(distance);
                    patch_word(&mut bytes, at, |w| (w & 0xfff) | (hi << 12))?;
                    patch_word(&mut bytes, at.saturating_add(4), |w| {
                        (w & 0x000f_ffff) | ((lo as u32 & 0xfff) << 20)
                    })?;
                }
            }
        }
        Ok(bytes)
    }

    // ── Container format ──
    //
    // "RWOBJ", version byte, then varint-prefixed sections: text, data
    // offset, data, symbols, relocations.

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend(encode_varint(self.text.len() as u64));
        out.extend(&self.text);
        out.extend(encode_varint(self.data_offset));
        out.extend(encode_varint(self.data.len() as u64));
        out.extend(&self.data);

        out.extend(encode_varint(self.symbols.len() as u64));
        for symbol in &self.symbols {
            put_str(&mut out, &symbol.name);
            out.push(match symbol.kind {
                SymbolKind::Function => 0,
                SymbolKind::Data => 1,
            });
            out.push(u8::from(symbol.global));
            out.extend(encode_varint(symbol.offset));
            out.extend(encode_varint(symbol.size));
        }

        out.extend(encode_varint(self.relocations.len() as u64));
        for reloc in &self.relocations {
            out.push(match reloc.kind {
                RelocKind::Call => 0,
                RelocKind::PcrelAddr => 1,
                RelocKind::Abs64 => 2,
            });
            out.extend(encode_varint(reloc.offset));
            put_str(&mut out, &reloc.symbol);
            out.extend(reloc.addend.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(MAGIC.len())? != MAGIC {
            return Err(Error::ObjectFormat("bad magic".into()));
        }
        let version = r.byte()?;
        if version != FORMAT_VERSION {
            return Err(Error::ObjectFormat(format!("unsupported version {version}")));
        }
        let text_len = r.length()?;
        let text = r.take(text_len)?.to_vec();
        let data_offset = r.varint()?;
        let data_len = r.length()?;
        let data = r.take(data_len)?.to_vec();

        let symbol_count = r.length()?;
        let mut symbols = Vec::with_capacity(symbol_count.min(1024));
        for _ in 0..symbol_count {
            let name = r.string()?;
            let kind = match r.byte()? {
                0 => SymbolKind::Function,
                1 => SymbolKind::Data,
                other => return Err(Error::ObjectFormat(format!("bad symbol kind {other}"))),
            };
            let global = r.byte()? != 0;
            let offset = r.varint()?;
            let size = r.varint()?;
            symbols.push(Symbol {
                name,
                kind,
                offset,
                size,
                global,
            });
        }

        let reloc_count = r.length()?;
        let mut relocations = Vec::with_capacity(reloc_count.min(1024));
        for _ in 0..reloc_count {
            let kind = match r.byte()? {
                0 => RelocKind::Call,
                1 => RelocKind::PcrelAddr,
                2 => RelocKind::Abs64,
                other => {
                    return Err(Error::ObjectFormat(format!("bad relocation kind {other}")));
                }
            };
            let offset = r.varint()?;
            let symbol = r.string()?;
            let mut addend = [0u8; 8];
            addend.copy_from_slice(r.take(8)?);
            relocations.push(Relocation {
                offset,
                kind,
                symbol,
                addend: i64::from_le_bytes(addend),
            });
        }
        if r.pos != bytes.len() {
            return Err(Error::ObjectFormat("trailing bytes".into()));
        }

        let image = Self {
            text,
            data,
            data_offset,
            symbols,
            relocations,
        };
        image.check_layout()?;
        Ok(image)
    }

    /// Data on a page boundary past the text, every symbol and patched
    /// word inside the image, and the whole image at most
    /// [`MAX_IMAGE_BYTES`].
    fn check_layout(&self) -> Result<()> {
        let text_len = self.text.len() as u64;
        if self.data_offset % PAGE_SIZE != 0 {
            return Err(Error::ObjectFormat(format!(
                "data offset {:#x} is not page aligned",
                self.data_offset
            )));
        }
        if self.data_offset < text_len {
            return Err(Error::ObjectFormat(format!(
                "data offset {:#x} overlaps {text_len:#x} bytes of text",
                self.data_offset
            )));
        }
        let end = self.data_offset.checked_add(self.data.len() as u64);
        if !end.is_some_and(|end| end <= MAX_IMAGE_BYTES) {
            return Err(Error::ObjectFormat(format!(
                "image larger than {MAX_IMAGE_BYTES:#x} bytes"
            )));
        }

        let len = self.len();
        let inside =
            |offset: u64, size: u64| offset.checked_add(size).is_some_and(|end| end <= len);
        if let Some(symbol) = self.symbols.iter().find(|s| !inside(s.offset, s.size)) {
            return Err(Error::ObjectFormat(format!(
                "symbol `{}` at {:#x} outside image",
                symbol.name, symbol.offset
            )));
        }
        if let Some(reloc) = self
            .relocations
            .iter()
            .find(|r| !inside(r.offset, RELOCATION_BYTES))
        {
            return Err(Error::ObjectFormat(format!(
                "relocation at {:#x} outside image",
                reloc.offset
            )));
        }
        Ok(())
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    out.extend(encode_varint(value.len() as u64));
    out.extend(value.as_bytes());
}

/// Variable-length integer: the count of leading one bits in the first byte
/// gives the number of trailing little-endian bytes.
fn encode_varint(value: u64) -> Vec<u8> {
    let max_encoded: u64 = 1 << (7 * 8);
    if value >= max_encoded {
        let mut dest = vec![0xff];
        dest.extend(value.to_le_bytes());
        return dest;
    }

    let mut min_encoded = max_encoded >> 7;
    for l in (1..=7).rev() {
        if value >= min_encoded {
            let mut dest = vec![0u8; l + 1];
            let max_val = 1u64 << (8 * l);
            dest[0] = ((1u64 << 8) - (1u64 << (8 - l)) + value / max_val) as u8;
            let mut rest = value % max_val;
            for item in dest.iter_mut().skip(1) {
                *item = rest as u8;
                rest >>= 8;
            }
            return dest;
        }
        min_encoded >>= 7;
    }
    vec![value as u8]
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::ObjectFormat(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn varint(&mut self) -> Result<u64> {
        let first = self.byte()?;
        let extra = first.leading_ones() as usize;
        if extra == 8 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(self.take(8)?);
            return Ok(u64::from_le_bytes(raw));
        }
        let high = u64::from(first) & ((1u64 << (7 - extra)) - 1);
        let mut rest = 0u64;
        for (i, byte) in self.take(extra)?.iter().enumerate() {
            rest |= u64::from(*byte) << (8 * i);
        }
        Ok((high << (8 * extra)) | rest)
    }

    fn length(&mut self) -> Result<usize> {
        let value = self.varint()?;
        usize::try_from(value).map_err(|_| Error::ObjectFormat(format!("length {value} too large")))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.length()?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::ObjectFormat("symbol name is not UTF-8".into()))
    }
}
