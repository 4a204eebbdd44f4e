// Stack frame layout.
//
// Offsets are relative to the frame pointer, which holds the caller's stack
// pointer. From high to low addresses:
//
//   fp + 0 ..          incoming stack arguments (argument 8 onwards)
//   fp - 8             saved ra          (functions that call)
//   next 8             saved fp
//   next 8 each        used callee-saved registers, ascending
//   ...                locals, spill slots, call temporaries
//   sp + 0 ..          outgoing stack arguments
//
// The total size is a multiple of 16.

use crate::abi::{ARG_REGS, STACK_ALIGN, XLEN_BYTES};
use crate::riscv::{FrameIndex, FrameObjectKind, MachFunction, MachInst, PReg};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes subtracted from sp by the prologue. Zero means no frame at all.
    pub size: i64,
    pub ra_offset: Option<i64>,
    pub fp_offset: i64,
    /// Callee-saved registers with their save offsets, ascending by register.
    pub saved: Vec<(PReg, i64)>,
    /// Offset of each frame object, indexed by `FrameIndex`.
    pub objects: Vec<i64>,
    /// Bytes reserved at `sp` for outgoing stack arguments.
    pub outgoing: i64,
}

impl FrameLayout {
    #[must_use]
    pub fn is_frameless(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub fn object_offset(&self, index: FrameIndex) -> Option<i64> {
        self.objects.get(index.0 as usize).copied()
    }
}

const fn align_up(value: i64, align: i64) -> i64 {
    (value + align - 1) / align * align
}

/// Bytes of stack arguments for a call with `count` arguments.
#[must_use]
pub fn stack_argument_bytes(count: usize) -> i64 {
    count.saturating_sub(ARG_REGS.len()) as i64 * XLEN_BYTES
}

fn needs_frame(mf: &MachFunction, saved: &[PReg]) -> bool {
    let stack_params = mf.insts().any(|inst| {
        matches!(inst, MachInst::EntryArgs { dsts } if dsts.len() > ARG_REGS.len())
    });
    mf.has_calls() || !saved.is_empty() || !mf.frame_objects.is_empty() || stack_params
}

#[must_use]
pub fn compute_layout(mf: &MachFunction, used_callee_saved: &[PReg]) -> FrameLayout {
    let mut saved_regs = used_callee_saved.to_vec();
    saved_regs.sort_unstable();
    saved_regs.dedup();

    if !needs_frame(mf, &saved_regs) {
        return FrameLayout {
            size: 0,
            ra_offset: None,
            fp_offset: 0,
            saved: Vec::new(),
            objects: Vec::new(),
            outgoing: 0,
        };
    }

    let mut cursor: i64 = 0;
    let ra_offset = mf.has_calls().then(|| {
        cursor -= XLEN_BYTES;
        cursor
    });
    cursor -= XLEN_BYTES;
    let fp_offset = cursor;

    let saved = saved_regs
        .into_iter()
        .map(|reg| {
            cursor -= XLEN_BYTES;
            (reg, cursor)
        })
        .collect();

    let mut objects = vec![0; mf.frame_objects.len()];
    for kind in [
        FrameObjectKind::Local,
        FrameObjectKind::Spill,
        FrameObjectKind::CallTemp,
    ] {
        for (index, object) in mf.frame_objects.iter().enumerate() {
            if object.kind != kind {
                continue;
            }
            let align = i64::from(object.align.max(1));
            cursor -= i64::from(object.size);
            // Round down towards lower addresses.
            cursor = -align_up(-cursor, align);
            objects[index] = cursor;
        }
    }

    let outgoing = mf
        .insts()
        .filter_map(|inst| match inst {
            MachInst::Call { args, .. } => Some(stack_argument_bytes(args.len())),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    FrameLayout {
        size: align_up(-cursor + outgoing, STACK_ALIGN),
        ra_offset,
        fp_offset,
        saved,
        objects,
        outgoing,
    }
}
