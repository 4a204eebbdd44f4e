// Spill choice for the linear-scan allocator.
//
// When every usable register is taken, the allocator collects the active
// intervals that could give up their register plus the interval being
// allocated, and spills the candidate with the highest rank. Ties go to the
// higher virtual register number so results are reproducible.

use serde::{Deserialize, Serialize};

use crate::ir::VReg;

/// Interval facts a heuristic may weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpillCandidate {
    pub vreg: VReg,
    pub start: u32,
    pub end: u32,
    pub use_count: u32,
}

impl SpillCandidate {
    #[must_use]
    pub fn length(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// Pluggable spill policy. Higher rank means "spill this one first".
pub trait SpillHeuristic: Send + Sync {
    fn name(&self) -> &'static str;
    fn rank(&self, candidate: &SpillCandidate) -> u64;
}

/// Classic Poletto-Sarkar choice: spill whatever stays live the longest.
#[derive(Debug, Clone, Copy, Default)]
pub struct FurthestEnd;

impl SpillHeuristic for FurthestEnd {
    fn name(&self) -> &'static str {
        "furthest-end"
    }

    fn rank(&self, candidate: &SpillCandidate) -> u64 {
        u64::from(candidate.end)
    }
}

/// Spill the interval with the fewest uses per unit of length.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestUseDensity;

impl SpillHeuristic for LowestUseDensity {
    fn name(&self) -> &'static str {
        "use-density"
    }

    fn rank(&self, candidate: &SpillCandidate) -> u64 {
        // Inverse density scaled to keep integer precision.
        u64::from(candidate.length()) * 1024 / u64::from(candidate.use_count.max(1))
    }
}

/// Heuristic selection exposed through compile options and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpillStrategy {
    #[default]
    FurthestEnd,
    UseDensity,
}

impl SpillStrategy {
    #[must_use]
    pub fn heuristic(self) -> &'static dyn SpillHeuristic {
        match self {
            SpillStrategy::FurthestEnd => &FurthestEnd,
            SpillStrategy::UseDensity => &LowestUseDensity,
        }
    }

    /// Parse the CLI spelling (`furthest-end`, `use-density`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "furthest-end" => Some(SpillStrategy::FurthestEnd),
            "use-density" => Some(SpillStrategy::UseDensity),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(vreg: u32, start: u32, end: u32, use_count: u32) -> SpillCandidate {
        SpillCandidate {
            vreg: VReg(vreg),
            start,
            end,
            use_count,
        }
    }

    #[test]
    fn test_furthest_end_prefers_long_tail() {
        let h = FurthestEnd;
        assert!(h.rank(&candidate(0, 0, 100, 50)) > h.rank(&candidate(1, 10, 20, 1)));
    }

    #[test]
    fn test_use_density_prefers_sparse() {
        let h = LowestUseDensity;
        let busy = candidate(0, 0, 100, 50);
        let sparse = candidate(1, 10, 60, 2);
        assert!(h.rank(&sparse) > h.rank(&busy));
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in [SpillStrategy::FurthestEnd, SpillStrategy::UseDensity] {
            assert_eq!(SpillStrategy::parse(strategy.heuristic().name()), Some(strategy));
        }
        assert_eq!(SpillStrategy::parse("random"), None);
    }
}
