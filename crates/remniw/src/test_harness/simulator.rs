//! RV64IM interpreter for compiled object images.
//!
//! The image is relocated to [`IMAGE_BASE`] and executed word by word from
//! its encoded bytes, so a run checks the encoder as much as the code
//! generator. External symbols resolve to host trampolines: the shield
//! runtime entry points and a few libc functions (`malloc`, `free`,
//! `putchar`, `exit`, `abort`). Returning to [`RETURN_ADDRESS`] ends the run.
//!
//! The shield entry points drive a [`GuardedPool`] laid over the start of the
//! simulated heap, with the same slot limit, quarantine and fallback as the
//! native runtime. Unguarded blocks (fallbacks and plain `malloc`) are bumped
//! from the rest of the heap and never reused.
//!
//! Memory map:
//!
//! | Region | Range |
//! |--------|-------|
//! | image  | `0x0001_0000..` |
//! | pool   | `0x4000_0000..` at most half the heap |
//! | heap   | after the pool `..0x4040_0000` |
//! | hosts  | `0x7000_0000 + 16 * k` |
//! | stack  | `0x7ff0_0000..0x8000_0000` |

use std::collections::HashSet;

use aphotic_shield::{
    Access, GuardRegistry, GuardedPool, PoolLayout, ShieldOptions, Violation, ViolationKind,
    symbols,
};

use crate::emit::{ObjectImage, SymbolKind};
use crate::riscv::encoding::{
    OPCODE_AUIPC, OPCODE_BRANCH, OPCODE_JAL, OPCODE_JALR, OPCODE_LOAD, OPCODE_LUI, OPCODE_OP,
    OPCODE_OP_32, OPCODE_OP_IMM, OPCODE_OP_IMM_32, OPCODE_STORE,
};
use crate::riscv::imm::sign_extend;
use crate::{Error, Result};

pub const IMAGE_BASE: u64 = 0x1_0000;
pub const HEAP_BASE: u64 = 0x4000_0000;
pub const HEAP_SIZE: u64 = 4 << 20;
pub const HOST_BASE: u64 = 0x7000_0000;
/// Initial `ra`; reaching it means the entry function returned.
pub const RETURN_ADDRESS: u64 = HOST_BASE - 16;
pub const STACK_TOP: u64 = 0x8000_0000;
pub const STACK_SIZE: u64 = 1 << 20;
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

const HOST_STRIDE: u64 = 16;
const A0: usize = 10;
const A1: usize = 11;
const RA: usize = 1;
const SP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Host {
    Init,
    Alloc,
    Dealloc,
    CheckLoad,
    CheckStore,
    Malloc,
    Free,
    Putchar,
    Exit,
    Abort,
}

const HOSTS: [(&str, Host); 10] = [
    (symbols::INIT, Host::Init),
    (symbols::ALLOC, Host::Alloc),
    (symbols::DEALLOC, Host::Dealloc),
    (symbols::CHECK_LOAD, Host::CheckLoad),
    (symbols::CHECK_STORE, Host::CheckStore),
    ("malloc", Host::Malloc),
    ("free", Host::Free),
    ("putchar", Host::Putchar),
    ("exit", Host::Exit),
    ("abort", Host::Abort),
];

/// Trampoline address of a host function.
#[must_use]
pub fn host_address(name: &str) -> Option<u64> {
    HOSTS
        .iter()
        .position(|(host, _)| *host == name)
        .map(|index| HOST_BASE + index as u64 * HOST_STRIDE)
}

fn host_at(pc: u64) -> Option<Host> {
    let offset = pc.checked_sub(HOST_BASE)?;
    if offset % HOST_STRIDE != 0 {
        return None;
    }
    HOSTS
        .get(usize::try_from(offset / HOST_STRIDE).ok()?)
        .map(|(_, host)| *host)
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The entry function returned.
    Returned { a0: u64, a1: u64 },
    /// `exit(code)` was called.
    Exited(i32),
    /// The shield stopped the program.
    Trapped(Violation),
    /// `abort()` was called.
    Aborted,
    /// Access outside mapped memory.
    Faulted { pc: u64, address: u64 },
    IllegalInstruction { pc: u64, word: u32 },
    StepLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: Outcome,
    /// Bytes written with `putchar`.
    pub output: Vec<u8>,
    pub steps: u64,
}

impl RunResult {
    /// `a0` as a signed value, if the function returned.
    #[must_use]
    pub fn returned(&self) -> Option<i64> {
        match self.outcome {
            Outcome::Returned { a0, .. } => Some(a0 as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn violation(&self) -> Option<&Violation> {
        match &self.outcome {
            Outcome::Trapped(violation) => Some(violation),
            _ => None,
        }
    }

    #[must_use]
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

struct Segment {
    base: u64,
    bytes: Vec<u8>,
}

struct Memory {
    segments: Vec<Segment>,
}

impl Memory {
    fn slice(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.segments.iter().find_map(|s| {
            let offset = usize::try_from(address.checked_sub(s.base)?).ok()?;
            s.bytes.get(offset..offset.checked_add(len)?)
        })
    }

    fn slice_mut(&mut self, address: u64, len: usize) -> Option<&mut [u8]> {
        self.segments.iter_mut().find_map(|s| {
            let offset = usize::try_from(address.checked_sub(s.base)?).ok()?;
            s.bytes.get_mut(offset..offset.checked_add(len)?)
        })
    }

    fn load(&self, address: u64, width: usize) -> Option<u64> {
        let bytes = self.slice(address, width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    }

    fn store(&mut self, address: u64, width: usize, value: u64) -> Option<()> {
        let slot = self.slice_mut(address, width)?;
        slot.copy_from_slice(&value.to_le_bytes()[..width]);
        Some(())
    }
}

pub struct Simulator {
    regs: [u64; 32],
    pc: u64,
    memory: Memory,
    functions: Vec<(String, u64)>,
    pool: GuardedPool,
    /// Unguarded blocks handed out by the shield allocator.
    plain: HashSet<u64>,
    heap_cursor: u64,
    output: Vec<u8>,
    step_limit: u64,
}

impl Simulator {
    /// Load `image` with default shield options; fails if it references a
    /// symbol no host provides.
    pub fn new(image: &ObjectImage) -> Result<Self> {
        Self::with_shield_options(image, &ShieldOptions::default())
    }

    /// Load `image`, configuring the simulated shield runtime with `options`.
    pub fn with_shield_options(image: &ObjectImage, options: &ShieldOptions) -> Result<Self> {
        let bytes = image.relocate(IMAGE_BASE, host_address)?;
        let functions = image
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Function)
            .map(|s| (s.name.clone(), IMAGE_BASE + s.offset))
            .collect();
        let layout = PoolLayout::for_options(options, HEAP_SIZE / 2);
        tracing::debug!(slots = layout.slots(), "simulated guarded pool");
        Ok(Self {
            regs: [0; 32],
            pc: 0,
            memory: Memory {
                segments: vec![
                    Segment {
                        base: IMAGE_BASE,
                        bytes,
                    },
                    Segment {
                        base: HEAP_BASE,
                        bytes: vec![0; HEAP_SIZE as usize],
                    },
                    Segment {
                        base: STACK_TOP - STACK_SIZE,
                        bytes: vec![0; STACK_SIZE as usize],
                    },
                ],
            },
            functions,
            pool: GuardedPool::new(HEAP_BASE, layout, options),
            plain: HashSet::new(),
            heap_cursor: HEAP_BASE + layout.bytes(),
            output: Vec::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        })
    }

    #[must_use]
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &GuardRegistry {
        self.pool.registry()
    }

    #[must_use]
    pub fn pool(&self) -> &GuardedPool {
        &self.pool
    }

    /// Bytes of simulated memory, if mapped.
    #[must_use]
    pub fn read_memory(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        self.memory.slice(address, len).map(<[u8]>::to_vec)
    }

    /// Call `function` with integer arguments per the LP64 convention
    /// (eight in registers, the rest on the stack).
    pub fn call(&mut self, function: &str, args: &[i64]) -> Result<RunResult> {
        let entry = self
            .functions
            .iter()
            .find(|(name, _)| name == function)
            .map(|(_, address)| *address)
            .ok_or_else(|| Error::Internal(format!("no function `{function}` in image")))?;

        self.regs = [0; 32];
        self.output.clear();
        let stack_args = &args[args.len().min(8)..];
        let sp = STACK_TOP - (8 * stack_args.len() as u64).next_multiple_of(16);
        for (i, arg) in stack_args.iter().enumerate() {
            self.memory
                .store(sp + 8 * i as u64, 8, *arg as u64)
                .ok_or_else(|| Error::Internal("stack arguments overflow the stack".into()))?;
        }
        for (i, arg) in args.iter().take(8).enumerate() {
            self.regs[A0 + i] = *arg as u64;
        }
        self.regs[SP] = sp;
        self.regs[RA] = RETURN_ADDRESS;
        self.pc = entry;

        let mut steps = 0;
        let outcome = loop {
            if steps >= self.step_limit {
                break Outcome::StepLimit;
            }
            steps += 1;
            if self.pc == RETURN_ADDRESS {
                break Outcome::Returned {
                    a0: self.regs[A0],
                    a1: self.regs[A1],
                };
            }
            if let Some(host) = host_at(self.pc) {
                if let Some(outcome) = self.host_call(host) {
                    break outcome;
                }
                self.pc = self.regs[RA];
                continue;
            }
            if let Err(outcome) = self.step() {
                break outcome;
            }
        };

        tracing::trace!(function, steps, ?outcome, "simulation finished");
        Ok(RunResult {
            outcome,
            output: std::mem::take(&mut self.output),
            steps,
        })
    }

    fn bump(&mut self, size: u64) -> Option<u64> {
        let base = self.heap_cursor.next_multiple_of(16);
        let end = base.checked_add(size)?;
        if end > HEAP_BASE + HEAP_SIZE {
            return None;
        }
        self.heap_cursor = end;
        Some(base)
    }

    fn host_call(&mut self, host: Host) -> Option<Outcome> {
        let (a0, a1) = (self.regs[A0], self.regs[A1]);
        match host {
            Host::Init | Host::Free => {}
            Host::Alloc => self.regs[A0] = self.shield_alloc(a0),
            Host::Dealloc => {
                if let Err(violation) = self.shield_dealloc(a0) {
                    return Some(Outcome::Trapped(violation));
                }
            }
            Host::CheckLoad | Host::CheckStore => {
                let access = if host == Host::CheckLoad {
                    Access::Load
                } else {
                    Access::Store
                };
                if let Err(violation) = self.pool.registry().check(a0, a1, access) {
                    return Some(Outcome::Trapped(violation));
                }
            }
            Host::Malloc => self.regs[A0] = self.bump(a0).unwrap_or(0),
            Host::Putchar => self.output.push(a0 as u8),
            Host::Exit => return Some(Outcome::Exited(a0 as i32)),
            Host::Abort => return Some(Outcome::Aborted),
        }
        None
    }

    fn shield_alloc(&mut self, size: u64) -> u64 {
        if let Some(address) = self.pool.alloc(size) {
            // Slots are reused; clear what the previous block left.
            if let Some(bytes) = usize::try_from(size)
                .ok()
                .and_then(|len| self.memory.slice_mut(address, len))
            {
                bytes.fill(0);
            }
            return address;
        }
        let Some(address) = self.bump(size) else {
            return 0;
        };
        tracing::trace!(address, size, "unguarded allocation");
        self.plain.insert(address);
        address
    }

    fn shield_dealloc(&mut self, address: u64) -> std::result::Result<(), Violation> {
        if address == 0 {
            return Ok(());
        }
        if self.pool.contains(address) {
            return self.pool.dealloc(address).map(|_| ());
        }
        if self.plain.remove(&address) {
            Ok(())
        } else {
            Err(Violation::new(ViolationKind::InvalidFree, address))
        }
    }

    fn set(&mut self, rd: usize, value: u64) {
        if rd != 0 {
            self.regs[rd] = value;
        }
    }

    /// Execute the instruction at `pc`.
    fn step(&mut self) -> std::result::Result<(), Outcome> {
        let pc = self.pc;
        let word = self
            .memory
            .load(pc, 4)
            .ok_or(Outcome::Faulted { pc, address: pc })? as u32;
        let illegal = Outcome::IllegalInstruction { pc, word };

        let opcode = word & 0x7f;
        let rd = ((word >> 7) & 0x1f) as usize;
        let funct3 = (word >> 12) & 0x7;
        let funct7 = word >> 25;
        let x1 = self.regs[((word >> 15) & 0x1f) as usize];
        let x2 = self.regs[((word >> 20) & 0x1f) as usize];

        let imm_i = sign_extend(u64::from(word >> 20), 12);
        let imm_s = sign_extend(u64::from(((word >> 25) << 5) | ((word >> 7) & 0x1f)), 12);
        let imm_b = sign_extend(
            u64::from(
                (((word >> 31) & 1) << 12)
                    | (((word >> 7) & 1) << 11)
                    | (((word >> 25) & 0x3f) << 5)
                    | (((word >> 8) & 0xf) << 1),
            ),
            13,
        );
        let imm_u = sign_extend(u64::from(word & 0xffff_f000), 32);
        let imm_j = sign_extend(
            u64::from(
                (((word >> 31) & 1) << 20)
                    | (((word >> 12) & 0xff) << 12)
                    | (((word >> 20) & 1) << 11)
                    | (((word >> 21) & 0x3ff) << 1),
            ),
            21,
        );

        let mut next = pc.wrapping_add(4);
        match opcode {
            OPCODE_LUI => self.set(rd, imm_u as u64),
            OPCODE_AUIPC => self.set(rd, pc.wrapping_add_signed(imm_u)),
            OPCODE_JAL => {
                self.set(rd, next);
                next = pc.wrapping_add_signed(imm_j);
            }
            OPCODE_JALR => {
                let target = x1.wrapping_add_signed(imm_i) & !1;
                self.set(rd, next);
                next = target;
            }
            OPCODE_BRANCH => {
                let taken = match funct3 {
                    0b000 => x1 == x2,
                    0b001 => x1 != x2,
                    0b100 => (x1 as i64) < (x2 as i64),
                    0b101 => (x1 as i64) >= (x2 as i64),
                    0b110 => x1 < x2,
                    0b111 => x1 >= x2,
                    _ => return Err(illegal),
                };
                if taken {
                    next = pc.wrapping_add_signed(imm_b);
                }
            }
            OPCODE_LOAD => {
                let address = x1.wrapping_add_signed(imm_i);
                let (width, signed) = match funct3 {
                    0b000 => (1, true),
                    0b001 => (2, true),
                    0b010 => (4, true),
                    0b011 => (8, false),
                    0b100 => (1, false),
                    0b101 => (2, false),
                    0b110 => (4, false),
                    _ => return Err(illegal),
                };
                let raw = self
                    .memory
                    .load(address, width)
                    .ok_or(Outcome::Faulted { pc, address })?;
                let value = if signed && width < 8 {
                    sign_extend(raw, width as u32 * 8) as u64
                } else {
                    raw
                };
                self.set(rd, value);
            }
            OPCODE_STORE => {
                let address = x1.wrapping_add_signed(imm_s);
                let width = match funct3 {
                    0b000 => 1,
                    0b001 => 2,
                    0b010 => 4,
                    0b011 => 8,
                    _ => return Err(illegal),
                };
                self.memory
                    .store(address, width, x2)
                    .ok_or(Outcome::Faulted { pc, address })?;
            }
            OPCODE_OP_IMM => {
                let shamt = (imm_i & 0x3f) as u32;
                let imm = imm_i as u64;
                let value = match funct3 {
                    0b000 => x1.wrapping_add(imm),
                    0b001 => x1 << shamt,
                    0b010 => u64::from((x1 as i64) < imm_i),
                    0b011 => u64::from(x1 < imm),
                    0b100 => x1 ^ imm,
                    0b101 if word & (1 << 30) != 0 => ((x1 as i64) >> shamt) as u64,
                    0b101 => x1 >> shamt,
                    0b110 => x1 | imm,
                    _ => x1 & imm,
                };
                self.set(rd, value);
            }
            OPCODE_OP_IMM_32 => {
                let shamt = (imm_i & 0x1f) as u32;
                let value = match funct3 {
                    0b000 => (x1 as i32).wrapping_add(imm_i as i32),
                    0b001 => ((x1 as u32) << shamt) as i32,
                    0b101 if word & (1 << 30) != 0 => (x1 as i32) >> shamt,
                    0b101 => ((x1 as u32) >> shamt) as i32,
                    _ => return Err(illegal),
                };
                self.set(rd, i64::from(value) as u64);
            }
            OPCODE_OP => {
                let value = alu64(funct7, funct3, x1, x2).ok_or(illegal)?;
                self.set(rd, value);
            }
            OPCODE_OP_32 => {
                let value = alu32(funct7, funct3, x1 as u32, x2 as u32).ok_or(illegal)?;
                self.set(rd, i64::from(value) as u64);
            }
            _ => return Err(illegal),
        }
        self.pc = next;
        Ok(())
    }
}

/// RV64 register-register operations. Division never traps: a zero divisor
/// yields all ones (quotient) or the dividend (remainder), and overflow
/// wraps.
fn alu64(funct7: u32, funct3: u32, a: u64, b: u64) -> Option<u64> {
    let shamt = (b & 0x3f) as u32;
    let (sa, sb) = (a as i64, b as i64);
    Some(match (funct7, funct3) {
        (0x00, 0b000) => a.wrapping_add(b),
        (0x20, 0b000) => a.wrapping_sub(b),
        (0x00, 0b001) => a << shamt,
        (0x00, 0b010) => u64::from(sa < sb),
        (0x00, 0b011) => u64::from(a < b),
        (0x00, 0b100) => a ^ b,
        (0x00, 0b101) => a >> shamt,
        (0x20, 0b101) => (sa >> shamt) as u64,
        (0x00, 0b110) => a | b,
        (0x00, 0b111) => a & b,
        (0x01, 0b000) => a.wrapping_mul(b),
        (0x01, 0b100) if sb == 0 => u64::MAX,
        (0x01, 0b100) => sa.wrapping_div(sb) as u64,
        (0x01, 0b101) => a.checked_div(b).unwrap_or(u64::MAX),
        (0x01, 0b110) if sb == 0 => a,
        (0x01, 0b110) => sa.wrapping_rem(sb) as u64,
        (0x01, 0b111) => a.checked_rem(b).unwrap_or(a),
        _ => return None,
    })
}

/// The `*w` forms; the result is sign-extended by the caller.
fn alu32(funct7: u32, funct3: u32, a: u32, b: u32) -> Option<i32> {
    let shamt = b & 0x1f;
    let (sa, sb) = (a as i32, b as i32);
    Some(match (funct7, funct3) {
        (0x00, 0b000) => sa.wrapping_add(sb),
        (0x20, 0b000) => sa.wrapping_sub(sb),
        (0x00, 0b001) => (a << shamt) as i32,
        (0x00, 0b101) => (a >> shamt) as i32,
        (0x20, 0b101) => sa >> shamt,
        (0x01, 0b000) => sa.wrapping_mul(sb),
        (0x01, 0b100) if sb == 0 => -1,
        (0x01, 0b100) => sa.wrapping_div(sb),
        (0x01, 0b101) => a.checked_div(b).unwrap_or(u32::MAX) as i32,
        (0x01, 0b110) if sb == 0 => sa,
        (0x01, 0b110) => sa.wrapping_rem(sb),
        (0x01, 0b111) => a.checked_rem(b).unwrap_or(a) as i32,
        _ => return None,
    })
}
