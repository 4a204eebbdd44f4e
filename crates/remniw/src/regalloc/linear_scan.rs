// Linear-scan assignment of physical registers to live intervals.
//
// Intervals are visited by increasing start. The active set is kept ordered
// by end so expiry is a prefix walk. Intervals that cross a call may only take
// callee-saved registers; the rest prefer caller-saved temporaries and fall
// back to callee-saved ones. A value handed to or received from the ABI
// pseudo-instructions is hinted toward its argument or return register so
// frame lowering can drop the move.

use std::collections::{BTreeMap, BTreeSet};

use crate::abi::{ARG_REGS, CALLEE_SAVED, CALLER_SAVED, RET_REGS};
use crate::ir::VReg;
use crate::riscv::{MachFunction, MachInst, PReg, Reg};

use super::heuristic::{SpillCandidate, SpillHeuristic};
use super::liveness::LiveInterval;

/// Outcome of the scan: every interval is either assigned or spilled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub registers: BTreeMap<VReg, PReg>,
    pub spilled: BTreeSet<VReg>,
}

fn allowed_registers(interval: &LiveInterval) -> Vec<PReg> {
    if interval.crosses_call {
        CALLEE_SAVED.to_vec()
    } else {
        CALLER_SAVED.iter().chain(CALLEE_SAVED.iter()).copied().collect()
    }
}

fn candidate(interval: &LiveInterval) -> SpillCandidate {
    SpillCandidate {
        vreg: interval.vreg,
        start: interval.start,
        end: interval.end,
        use_count: interval.use_count,
    }
}

/// Preferred registers from the calling convention; the first mention of a
/// virtual register wins.
#[must_use]
pub fn abi_hints(mf: &MachFunction) -> BTreeMap<VReg, PReg> {
    let mut hints = BTreeMap::new();
    let mut hint = |regs: &[Reg], targets: &[PReg]| {
        for (reg, target) in regs.iter().zip(targets) {
            if let Reg::Virt(v) = reg {
                hints.entry(*v).or_insert(*target);
            }
        }
    };
    for inst in mf.insts() {
        match inst {
            MachInst::EntryArgs { dsts } => hint(dsts, &ARG_REGS),
            MachInst::Call { args, rets, .. } => {
                hint(args, &ARG_REGS);
                hint(rets, &RET_REGS);
            }
            MachInst::Ret { values } => hint(values, &RET_REGS),
            _ => {}
        }
    }
    hints
}

/// Run the scan without hints. `intervals` need not be sorted.
#[must_use]
pub fn linear_scan(intervals: &[LiveInterval], heuristic: &dyn SpillHeuristic) -> Assignment {
    linear_scan_with_hints(intervals, heuristic, &BTreeMap::new())
}

/// Run the scan; a hinted register is taken when it is free and allowed.
#[must_use]
pub fn linear_scan_with_hints(
    intervals: &[LiveInterval],
    heuristic: &dyn SpillHeuristic,
    hints: &BTreeMap<VReg, PReg>,
) -> Assignment {
    let mut order: Vec<usize> = (0..intervals.len()).collect();
    order.sort_by_key(|&i| (intervals[i].start, intervals[i].vreg));

    let mut result = Assignment::default();
    // (end, vreg, index) of intervals currently holding a register.
    let mut active: BTreeSet<(u32, VReg, usize)> = BTreeSet::new();
    let mut free: BTreeSet<PReg> = CALLER_SAVED.iter().chain(CALLEE_SAVED.iter()).copied().collect();

    for i in order {
        let interval = &intervals[i];

        let expired: Vec<_> = active
            .iter()
            .take_while(|(end, _, _)| *end < interval.start)
            .copied()
            .collect();
        for key in expired {
            active.remove(&key);
            if let Some(reg) = result.registers.get(&key.1) {
                free.insert(*reg);
            }
        }

        let allowed = allowed_registers(interval);
        let hinted = hints
            .get(&interval.vreg)
            .filter(|r| free.contains(r) && allowed.contains(r));
        if let Some(&reg) = hinted.or_else(|| allowed.iter().find(|r| free.contains(r))) {
            free.remove(&reg);
            result.registers.insert(interval.vreg, reg);
            active.insert((interval.end, interval.vreg, i));
            continue;
        }

        // No free register: weigh the current interval against every active
        // one whose register it could take.
        let victim = active
            .iter()
            .filter(|(_, vreg, _)| {
                result
                    .registers
                    .get(vreg)
                    .is_some_and(|reg| allowed.contains(reg))
            })
            .map(|&(_, _, idx)| idx)
            .chain(std::iter::once(i))
            .max_by_key(|&idx| {
                let c = candidate(&intervals[idx]);
                (heuristic.rank(&c), c.vreg)
            })
            .unwrap_or(i);

        if victim == i {
            result.spilled.insert(interval.vreg);
            continue;
        }

        let evicted = &intervals[victim];
        if let Some(reg) = result.registers.remove(&evicted.vreg) {
            active.remove(&(evicted.end, evicted.vreg, victim));
            result.spilled.insert(evicted.vreg);
            result.registers.insert(interval.vreg, reg);
            active.insert((interval.end, interval.vreg, i));
        } else {
            result.spilled.insert(interval.vreg);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::heuristic::{FurthestEnd, LowestUseDensity};

    fn interval(vreg: u32, start: u32, end: u32) -> LiveInterval {
        LiveInterval {
            vreg: VReg(vreg),
            start,
            end,
            use_count: 2,
            crosses_call: false,
        }
    }

    #[test]
    fn test_disjoint_intervals_share_register() {
        let intervals = vec![interval(0, 1, 4), interval(1, 5, 8)];
        let result = linear_scan(&intervals, &FurthestEnd);
        assert!(result.spilled.is_empty());
        assert_eq!(result.registers[&VReg(0)], result.registers[&VReg(1)]);
    }

    #[test]
    fn test_prefers_caller_saved_without_calls() {
        let result = linear_scan(&[interval(0, 1, 4)], &FurthestEnd);
        assert_eq!(result.registers[&VReg(0)], CALLER_SAVED[0]);
    }

    #[test]
    fn test_call_crossing_gets_callee_saved() {
        let mut crossing = interval(0, 1, 10);
        crossing.crosses_call = true;
        let result = linear_scan(&[crossing], &FurthestEnd);
        assert_eq!(result.registers[&VReg(0)], CALLEE_SAVED[0]);
    }

    #[test]
    fn test_pressure_spills_furthest_end() {
        let total = CALLER_SAVED.len() + CALLEE_SAVED.len();
        // All intervals overlap; the last one lives longest.
        let mut intervals: Vec<LiveInterval> = (0..=total as u32).map(|n| interval(n, 1, 20)).collect();
        intervals[total].end = 100;
        let result = linear_scan(&intervals, &FurthestEnd);
        assert_eq!(result.spilled.len(), 1);
        assert!(result.spilled.contains(&VReg(total as u32)));
    }

    #[test]
    fn test_pressure_tie_spills_highest_vreg() {
        let total = CALLER_SAVED.len() + CALLEE_SAVED.len();
        let intervals: Vec<LiveInterval> = (0..=total as u32).map(|n| interval(n, 1, 20)).collect();
        let result = linear_scan(&intervals, &FurthestEnd);
        assert_eq!(result.spilled, BTreeSet::from([VReg(total as u32)]));
    }

    #[test]
    fn test_use_density_evicts_sparse_interval() {
        let total = CALLER_SAVED.len() + CALLEE_SAVED.len();
        let mut intervals: Vec<LiveInterval> = (0..total as u32).map(|n| interval(n, 1, 20)).collect();
        // One long, rarely used interval holding a register.
        intervals[3].end = 200;
        intervals[3].use_count = 2;
        let mut hot = interval(total as u32, 2, 200);
        hot.use_count = 40;
        intervals.push(hot);
        let result = linear_scan(&intervals, &LowestUseDensity);
        assert_eq!(result.spilled, BTreeSet::from([VReg(3)]));
        assert!(result.registers.contains_key(&VReg(total as u32)));
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(200))]

        #[test]
        fn prop_assignment_never_interferes(
            raw in proptest::collection::vec((0u32..400, 0u32..60, proptest::bool::weighted(0.2)), 1..80),
            density in proptest::bool::ANY,
        ) {
            let intervals: Vec<LiveInterval> = raw
                .iter()
                .enumerate()
                .map(|(n, &(start, length, crosses_call))| LiveInterval {
                    vreg: VReg(n as u32),
                    start,
                    end: start + length,
                    use_count: 1 + length / 4,
                    crosses_call,
                })
                .collect();
            let result = if density {
                linear_scan(&intervals, &LowestUseDensity)
            } else {
                linear_scan(&intervals, &FurthestEnd)
            };
            proptest::prop_assert!(crate::regalloc::check::check_assignment("prop", &intervals, &result).is_ok());
            proptest::prop_assert_eq!(result.registers.len() + result.spilled.len(), intervals.len());
        }
    }
}
