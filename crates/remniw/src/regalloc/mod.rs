// Register allocation for selected machine functions.
//
//   - `liveness`: block dataflow and linearized live intervals
//   - `heuristic`: pluggable spill choice
//   - `linear_scan`: interval-to-register assignment
//   - `check`: post-assignment interference check
//   - `rewrite`: substitute registers, insert spill reloads and stores
//
// The scratch pair t5/t6 and fp are never handed out, so spill code and frame
// lowering always have registers to work with.

pub mod check;
pub mod heuristic;
pub mod linear_scan;
pub mod liveness;
pub mod rewrite;

use std::collections::{BTreeMap, BTreeSet};

use crate::abi::CALLEE_SAVED;
use crate::error::Result;
use crate::ir::VReg;
use crate::riscv::{MachFunction, PReg};

pub use heuristic::{FurthestEnd, LowestUseDensity, SpillCandidate, SpillHeuristic, SpillStrategy};
pub use liveness::LiveInterval;

/// Result of register allocation for one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegAllocResult {
    pub assignments: BTreeMap<VReg, PReg>,
    pub spilled: BTreeSet<VReg>,
    /// Callee-saved registers the prologue must preserve.
    pub used_callee_saved: BTreeSet<PReg>,
    pub reloads: usize,
    pub spill_stores: usize,
}

/// Allocate registers in place. On return `mf` contains no `Reg::Virt`.
pub fn allocate(mf: &mut MachFunction, heuristic: &dyn SpillHeuristic) -> Result<RegAllocResult> {
    let intervals = liveness::compute_intervals(mf);
    let hints = linear_scan::abi_hints(mf);
    let assignment = linear_scan::linear_scan_with_hints(&intervals, heuristic, &hints);
    check::check_assignment(&mf.name, &intervals, &assignment)?;
    let stats = rewrite::rewrite(mf, &assignment)?;

    let used_callee_saved = assignment
        .registers
        .values()
        .copied()
        .filter(|reg| CALLEE_SAVED.contains(reg))
        .collect();

    tracing::debug!(
        function = %mf.name,
        intervals = intervals.len(),
        spilled = assignment.spilled.len(),
        reloads = stats.reloads,
        heuristic = heuristic.name(),
        "register allocation done"
    );

    Ok(RegAllocResult {
        assignments: assignment.registers,
        spilled: assignment.spilled,
        used_callee_saved,
        reloads: stats.reloads,
        spill_stores: stats.spill_stores,
    })
}
