//! Registry of guarded regions.
//!
//! Each region is a body `[base, base + size)` with a guard span of
//! `guard_size` bytes on either side. Freed regions stay registered (dead)
//! until their memory leaves quarantine, so late accesses are still
//! attributed to them.
//!
//! Memory the shield hands out from is recorded as owned ranges. Inside an
//! owned range an access must lie wholly within one live body; anything else
//! is reported against the nearest region. Outside owned ranges only the
//! guard spans are checked, so stack, globals and unguarded allocations pass.
//!
//! Registration and release take the write lock, checks take the read lock,
//! so a region is fully visible before any access to it is checked.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Violation, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Load,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub size: u64,
    pub live: bool,
}

impl Region {
    /// One past the last body byte.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

#[derive(Debug, Default)]
struct Regions {
    bodies: BTreeMap<u64, Region>,
    /// Owned ranges, start to end.
    owned: BTreeMap<u64, u64>,
}

impl Regions {
    fn is_owned(&self, start: u64, end: u64) -> bool {
        self.owned
            .range(..end)
            .next_back()
            .is_some_and(|(_, owned_end)| *owned_end > start)
    }

    /// Whether `[start, end)` lies inside one live body.
    fn in_live_body(&self, start: u64, end: u64) -> bool {
        self.bodies
            .range(..=start)
            .next_back()
            .is_some_and(|(_, r)| r.live && r.end() >= end && end > start)
    }

    /// Classify a stray access inside owned memory by the closest region:
    /// before it is an underflow, after it (or running out of it) an
    /// overflow.
    fn nearest(&self, start: u64, end: u64) -> ViolationKind {
        let before = self.bodies.range(..=start).next_back().map(|(_, r)| r);
        let after = self.bodies.range(start.saturating_add(1)..).next().map(|(_, r)| r);
        match (before, after) {
            (Some(region), _) if start < region.end() => {
                if region.live {
                    ViolationKind::BufferOverflow
                } else {
                    ViolationKind::UseAfterFree
                }
            }
            (Some(b), Some(a)) if a.base.saturating_sub(end) < start - b.end() => {
                ViolationKind::BufferUnderflow
            }
            (Some(_), _) => ViolationKind::BufferOverflow,
            (None, Some(_)) => ViolationKind::BufferUnderflow,
            (None, None) => ViolationKind::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct GuardRegistry {
    guard_size: u64,
    regions: RwLock<Regions>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new(guard_size: u64) -> Self {
        Self {
            guard_size,
            regions: RwLock::new(Regions::default()),
        }
    }

    #[must_use]
    pub fn guard_size(&self) -> u64 {
        self.guard_size
    }

    fn read(&self) -> RwLockReadGuard<'_, Regions> {
        self.regions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Regions> {
        self.regions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `range` as memory the shield allocates from.
    pub fn own(&self, range: Range<u64>) {
        tracing::trace!(start = range.start, end = range.end, "own");
        if range.start < range.end {
            self.write().owned.insert(range.start, range.end);
        }
    }

    /// Record a live region. A dead region at the same base is replaced.
    pub fn register(&self, base: u64, size: u64) {
        tracing::trace!(base, size, "register");
        self.write().bodies.insert(
            base,
            Region {
                base,
                size,
                live: true,
            },
        );
    }

    /// Mark the region starting at `address` dead.
    pub fn release(&self, address: u64) -> Result<Region, Violation> {
        let mut regions = self.write();
        match regions.bodies.get_mut(&address) {
            Some(region) if region.live => {
                region.live = false;
                tracing::trace!(base = address, size = region.size, "release");
                Ok(*region)
            }
            Some(_) => Err(Violation::new(ViolationKind::DoubleFree, address)),
            None => Err(Violation::new(ViolationKind::InvalidFree, address)),
        }
    }

    /// Drop a region entirely, once its memory may be reused.
    pub fn forget(&self, base: u64) -> Option<Region> {
        self.write().bodies.remove(&base)
    }

    /// Check an access of `width` bytes at `address`. The whole interval is
    /// checked, so an access that starts in bounds and runs into a guard span
    /// is an overflow.
    pub fn check(&self, address: u64, width: u64, access: Access) -> Result<(), Violation> {
        let end = address.saturating_add(width.max(1));
        let regions = self.read();
        let kind = self.near_guard(&regions, address, end).or_else(|| {
            (regions.is_owned(address, end) && !regions.in_live_body(address, end))
                .then(|| regions.nearest(address, end))
        });
        match kind {
            Some(kind) => {
                tracing::trace!(address, width, ?access, ?kind, "violation");
                Err(Violation::new(kind, address))
            }
            None => Ok(()),
        }
    }

    fn near_guard(&self, regions: &Regions, start: u64, end: u64) -> Option<ViolationKind> {
        // Bodies never overlap, so once a region ends (guard included) below
        // the access every earlier one does too.
        let candidates = regions.bodies.range(..end.saturating_add(self.guard_size));
        for region in candidates.rev().map(|(_, r)| r) {
            if region.end().saturating_add(self.guard_size) <= start {
                break;
            }
            if let Some(kind) = self.classify(region, start, end) {
                return Some(kind);
            }
        }
        None
    }

    fn classify(&self, region: &Region, start: u64, end: u64) -> Option<ViolationKind> {
        let overlaps = |lo: u64, hi: u64| start < hi && end > lo;
        if !region.live && overlaps(region.base, region.end()) {
            return Some(ViolationKind::UseAfterFree);
        }
        if overlaps(region.end(), region.end().saturating_add(self.guard_size)) {
            return Some(ViolationKind::BufferOverflow);
        }
        if overlaps(region.base.saturating_sub(self.guard_size), region.base) {
            return Some(ViolationKind::BufferUnderflow);
        }
        None
    }

    #[must_use]
    pub fn region(&self, base: u64) -> Option<Region> {
        self.read().bodies.get(&base).copied()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.read().bodies.values().filter(|r| r.live).count()
    }

    /// Registered regions, live or quarantined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().bodies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(result: Result<(), Violation>) -> Option<ViolationKind> {
        result.err().map(|v| v.kind)
    }

    #[test]
    fn test_in_bounds_accesses_pass() {
        let registry = GuardRegistry::new(16);
        registry.register(0x1000, 16);
        for offset in 0..16 {
            assert!(registry.check(0x1000 + offset, 1, Access::Load).is_ok());
        }
        assert!(registry.check(0x1008, 8, Access::Store).is_ok());
        // Untracked memory is never reported.
        assert!(registry.check(0x9000, 8, Access::Load).is_ok());
        assert!(registry.check(0x0fe0, 8, Access::Load).is_ok());
    }

    #[test]
    fn test_guard_spans() {
        let registry = GuardRegistry::new(16);
        registry.register(0x1000, 10);
        assert_eq!(
            kind(registry.check(0x100a, 1, Access::Load)),
            Some(ViolationKind::BufferOverflow)
        );
        // Partial overlap with the guard span.
        assert_eq!(
            kind(registry.check(0x1008, 4, Access::Store)),
            Some(ViolationKind::BufferOverflow)
        );
        assert_eq!(
            kind(registry.check(0x0fff, 1, Access::Load)),
            Some(ViolationKind::BufferUnderflow)
        );
        assert_eq!(
            kind(registry.check(0x0ffc, 8, Access::Load)),
            Some(ViolationKind::BufferUnderflow)
        );
        // Past the guard span.
        assert!(registry.check(0x101a, 1, Access::Load).is_ok());
    }

    #[test]
    fn test_lifecycle() {
        let registry = GuardRegistry::new(8);
        registry.register(0x2000, 32);
        assert_eq!(registry.live_count(), 1);

        let region = registry.release(0x2000).unwrap();
        assert_eq!(region.size, 32);
        assert!(!region.live);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(
            kind(registry.check(0x2010, 4, Access::Load)),
            Some(ViolationKind::UseAfterFree)
        );
        assert_eq!(
            registry.release(0x2000).unwrap_err().kind,
            ViolationKind::DoubleFree
        );
        assert_eq!(
            registry.release(0x2008).unwrap_err().kind,
            ViolationKind::InvalidFree
        );

        registry.forget(0x2000);
        assert!(registry.is_empty());
        assert!(registry.check(0x2010, 4, Access::Load).is_ok());
    }

    #[test]
    fn test_zero_sized_region() {
        let registry = GuardRegistry::new(16);
        registry.register(0x3000, 0);
        assert_eq!(
            kind(registry.check(0x3000, 1, Access::Load)),
            Some(ViolationKind::BufferOverflow)
        );
    }

    #[test]
    fn test_owned_memory_outside_bodies() {
        let registry = GuardRegistry::new(16);
        registry.own(0x1000..0x3000);
        registry.register(0x1100, 16);
        registry.register(0x2000, 16);
        assert!(registry.check(0x1100, 16, Access::Load).is_ok());
        // Far beyond the guard spans, still inside owned memory.
        assert_eq!(
            kind(registry.check(0x1200, 8, Access::Load)),
            Some(ViolationKind::BufferOverflow)
        );
        assert_eq!(
            kind(registry.check(0x1f00, 8, Access::Store)),
            Some(ViolationKind::BufferUnderflow)
        );
        assert_eq!(
            kind(registry.check(0x1000, 1, Access::Load)),
            Some(ViolationKind::BufferUnderflow)
        );
        // Starting in bounds and running far out of the body.
        assert_eq!(
            kind(registry.check(0x1108, 64, Access::Load)),
            Some(ViolationKind::BufferOverflow)
        );
        registry.release(0x2000).unwrap();
        assert_eq!(
            kind(registry.check(0x2008, 64, Access::Load)),
            Some(ViolationKind::UseAfterFree)
        );
        // The end of owned memory is not.
        assert!(registry.check(0x3000, 8, Access::Load).is_ok());
        assert!(registry.check(0x0f00, 8, Access::Load).is_ok());
    }

    #[test]
    fn test_owned_memory_without_regions() {
        let registry = GuardRegistry::new(16);
        registry.own(0x1000..0x2000);
        registry.own(0x4000..0x4000);
        assert_eq!(
            kind(registry.check(0x1800, 4, Access::Load)),
            Some(ViolationKind::Unknown)
        );
        assert!(registry.check(0x4000, 4, Access::Load).is_ok());
    }

    #[test]
    fn test_neighbouring_regions() {
        let registry = GuardRegistry::new(16);
        registry.register(0x1000, 16);
        registry.register(0x1040, 16);
        registry.register(0x1080, 16);
        assert!(registry.check(0x1040, 16, Access::Load).is_ok());
        assert_eq!(
            kind(registry.check(0x1010, 1, Access::Load)),
            Some(ViolationKind::BufferOverflow)
        );
        assert_eq!(
            kind(registry.check(0x107f, 1, Access::Load)),
            Some(ViolationKind::BufferUnderflow)
        );
    }
}
