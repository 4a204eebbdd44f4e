// Post-allocation consistency check: no two overlapping intervals share a
// physical register, and nothing live across a call sits in a caller-saved
// register.

use std::collections::BTreeMap;

use crate::abi::CALLEE_SAVED;
use crate::error::{Error, Result};
use crate::riscv::PReg;

use super::linear_scan::Assignment;
use super::liveness::LiveInterval;

pub fn check_assignment(function: &str, intervals: &[LiveInterval], assignment: &Assignment) -> Result<()> {
    let fail = |message: String| Error::Allocation {
        function: function.to_string(),
        message,
    };

    let mut by_reg: BTreeMap<PReg, Vec<&LiveInterval>> = BTreeMap::new();
    for interval in intervals {
        match assignment.registers.get(&interval.vreg) {
            Some(&reg) => {
                if interval.crosses_call && !CALLEE_SAVED.contains(&reg) {
                    return Err(fail(format!(
                        "{} is live across a call but assigned caller-saved {reg}",
                        interval.vreg
                    )));
                }
                by_reg.entry(reg).or_default().push(interval);
            }
            None if assignment.spilled.contains(&interval.vreg) => {}
            None => return Err(fail(format!("{} has no location", interval.vreg))),
        }
    }

    for (reg, mut group) in by_reg {
        group.sort_by_key(|i| (i.start, i.vreg));
        let mut reach: Option<&LiveInterval> = None;
        for interval in group {
            if let Some(prev) = reach {
                if prev.end >= interval.start {
                    return Err(fail(format!(
                        "{} and {} overlap in {reg}",
                        prev.vreg, interval.vreg
                    )));
                }
            }
            if reach.is_none_or(|prev| interval.end > prev.end) {
                reach = Some(interval);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{S1, T0};
    use crate::ir::VReg;

    fn interval(vreg: u32, start: u32, end: u32, crosses_call: bool) -> LiveInterval {
        LiveInterval {
            vreg: VReg(vreg),
            start,
            end,
            use_count: 1,
            crosses_call,
        }
    }

    #[test]
    fn test_detects_overlap() {
        let intervals = [interval(0, 1, 10, false), interval(1, 5, 12, false)];
        let mut assignment = Assignment::default();
        assignment.registers.insert(VReg(0), T0);
        assignment.registers.insert(VReg(1), T0);
        let err = check_assignment("f", &intervals, &assignment).expect_err("overlap");
        assert!(err.to_string().contains("%0 and %1 overlap in t0"), "{err}");
    }

    #[test]
    fn test_detects_caller_saved_across_call() {
        let intervals = [interval(0, 1, 10, true)];
        let mut assignment = Assignment::default();
        assignment.registers.insert(VReg(0), T0);
        assert!(check_assignment("f", &intervals, &assignment).is_err());
        assignment.registers.insert(VReg(0), S1);
        assert!(check_assignment("f", &intervals, &assignment).is_ok());
    }

    #[test]
    fn test_missing_location() {
        let intervals = [interval(7, 1, 2, false)];
        let err = check_assignment("f", &intervals, &Assignment::default()).expect_err("missing");
        assert!(err.to_string().contains("%7 has no location"), "{err}");
    }
}
