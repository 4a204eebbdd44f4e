// Liveness over machine blocks and linearized live intervals.
//
// Instructions are numbered in layout order; instruction `k` reads its
// operands at position `2k` and writes its results at `2k + 1`, so a value
// whose last use is at `k` does not interfere with a result defined at `k`.
// Intervals are the hull of every position where a register is live, which
// over-approximates holes but is exact at block boundaries via dataflow.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ir::{BlockId, VReg};
use crate::riscv::MachFunction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    pub vreg: VReg,
    /// First position (definition or block entry).
    pub start: u32,
    /// Last position (use or block exit), inclusive.
    pub end: u32,
    /// Number of operand occurrences.
    pub use_count: u32,
    /// Live across some call: must not sit in a caller-saved register.
    pub crosses_call: bool,
}

impl LiveInterval {
    #[must_use]
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Per-block live-in and live-out sets.
#[derive(Debug, Clone, Default)]
pub struct BlockLiveness {
    pub live_in: Vec<BTreeSet<VReg>>,
    pub live_out: Vec<BTreeSet<VReg>>,
}

fn successors(mf: &MachFunction, index_of: &HashMap<BlockId, usize>, block: usize) -> Vec<usize> {
    mf.blocks[block]
        .insts
        .iter()
        .filter_map(crate::riscv::MachInst::branch_target)
        .filter_map(|target| index_of.get(&target).copied())
        .collect()
}

#[must_use]
pub fn block_liveness(mf: &MachFunction) -> BlockLiveness {
    let n = mf.blocks.len();
    let index_of: HashMap<BlockId, usize> =
        mf.blocks.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
    let succs: Vec<Vec<usize>> = (0..n).map(|b| successors(mf, &index_of, b)).collect();

    let mut gen_sets = vec![BTreeSet::new(); n];
    let mut kill_sets = vec![BTreeSet::new(); n];
    for (b, block) in mf.blocks.iter().enumerate() {
        for inst in &block.insts {
            for reg in inst.uses().into_iter().filter_map(|r| r.as_virt()) {
                if !kill_sets[b].contains(&reg) {
                    gen_sets[b].insert(reg);
                }
            }
            for reg in inst.defs().into_iter().filter_map(|r| r.as_virt()) {
                kill_sets[b].insert(reg);
            }
        }
    }

    let mut live = BlockLiveness {
        live_in: vec![BTreeSet::new(); n],
        live_out: vec![BTreeSet::new(); n],
    };
    let mut changed = true;
    while changed {
        changed = false;
        for b in (0..n).rev() {
            let out: BTreeSet<VReg> = succs[b]
                .iter()
                .flat_map(|&s| live.live_in[s].iter().copied())
                .collect();
            let mut inn = gen_sets[b].clone();
            inn.extend(out.difference(&kill_sets[b]).copied());
            if inn != live.live_in[b] || out != live.live_out[b] {
                live.live_in[b] = inn;
                live.live_out[b] = out;
                changed = true;
            }
        }
    }
    live
}

/// Live intervals of every virtual register, sorted by (start, vreg).
#[must_use]
pub fn compute_intervals(mf: &MachFunction) -> Vec<LiveInterval> {
    let live = block_liveness(mf);
    let mut ranges: BTreeMap<VReg, (u32, u32, u32)> = BTreeMap::new();
    let mut touch = |reg: VReg, pos: u32, counted: bool| {
        let entry = ranges.entry(reg).or_insert((pos, pos, 0));
        entry.0 = entry.0.min(pos);
        entry.1 = entry.1.max(pos);
        if counted {
            entry.2 += 1;
        }
    };

    let mut calls = Vec::new();
    let mut k: u32 = 0;
    for (b, block) in mf.blocks.iter().enumerate() {
        let block_start = 2 * k;
        for inst in &block.insts {
            for reg in inst.uses().into_iter().filter_map(|r| r.as_virt()) {
                touch(reg, 2 * k, true);
            }
            for reg in inst.defs().into_iter().filter_map(|r| r.as_virt()) {
                touch(reg, 2 * k + 1, true);
            }
            if inst.is_call() {
                calls.push(2 * k);
            }
            k += 1;
        }
        let block_end = (2 * k).saturating_sub(1).max(block_start);
        for &reg in &live.live_in[b] {
            touch(reg, block_start, false);
        }
        for &reg in &live.live_out[b] {
            touch(reg, block_end, false);
        }
    }

    let mut intervals: Vec<LiveInterval> = ranges
        .into_iter()
        .map(|(vreg, (start, end, use_count))| LiveInterval {
            vreg,
            start,
            end,
            use_count,
            crosses_call: calls.iter().any(|&c| start < c && end > c + 1),
        })
        .collect();
    intervals.sort_by_key(|i| (i.start, i.vreg));
    intervals
}
