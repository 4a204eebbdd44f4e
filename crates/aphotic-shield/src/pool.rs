//! Slot pool behind every guarded allocation.
//!
//! The pool is one contiguous range split into `MaxSimultaneousAllocations`
//! slots of [`SLOT_SIZE`] bytes, with a guard span before, between and after
//! them:
//!
//! ```text
//! | guard | slot 0 | guard | slot 1 | ... | slot n-1 | guard |
//! ```
//!
//! A block sits at the end of its slot (rounded down to [`ALIGN`]), so a
//! small overflow lands in the slack or the following guard. The whole pool
//! is owned memory in the [`GuardRegistry`], so an access anywhere in it
//! outside a live body is a violation.
//!
//! The pool only does address arithmetic and bookkeeping; the caller
//! provides the bytes at `base`. The native [`Shield`](crate::Shield) backs it
//! with a heap buffer, the remniw simulator with its simulated heap.
//!
//! Slots are handed out in order until each has been used once. Freed slots
//! go through a FIFO quarantine and return to the free list once more than
//! `QuarantineSize` bytes are quarantined, or when every other slot is taken.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Violation, ViolationKind};
use crate::options::ShieldOptions;
use crate::registry::{GuardRegistry, Region};

/// Alignment of every pointer handed out.
pub const ALIGN: u64 = 16;

/// Largest block a slot holds; bigger requests are not guarded.
pub const SLOT_SIZE: u64 = 4096;

/// Size and slot count of a pool, independent of where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    slots: usize,
    guard: u64,
}

impl PoolLayout {
    /// A pool with no slots; every request falls back.
    pub const EMPTY: Self = Self { slots: 0, guard: 0 };

    /// `slots` slots separated by guard spans of `guard_size` bytes rounded
    /// up to [`ALIGN`]. `None` if the pool size does not fit in a `u64`.
    #[must_use]
    pub fn new(slots: usize, guard_size: usize) -> Option<Self> {
        if slots == 0 {
            return Some(Self::EMPTY);
        }
        let guard = u64::try_from(guard_size).ok()?.checked_next_multiple_of(ALIGN)?;
        let layout = Self { slots, guard };
        layout.checked_bytes().map(|_| layout)
    }

    /// The pool for `options`, shrunk to at most `max_bytes`.
    #[must_use]
    pub fn for_options(options: &ShieldOptions, max_bytes: u64) -> Self {
        if !options.enabled {
            return Self::EMPTY;
        }
        let requested = options.max_simultaneous_allocations;
        if let Some(layout) = Self::new(requested, options.guard_size)
            && layout.bytes() <= max_bytes
        {
            return layout;
        }
        let fitting = Self::new(1, options.guard_size)
            .and_then(|one| {
                let stride = one.stride()?;
                let slots = max_bytes.checked_sub(one.guard)? / stride;
                Self::new(usize::try_from(slots).ok()?, options.guard_size)
            })
            .unwrap_or(Self::EMPTY);
        tracing::warn!(
            requested,
            slots = fitting.slots,
            max_bytes,
            "guarded pool does not fit; using fewer slots"
        );
        fitting
    }

    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots
    }

    fn stride(&self) -> Option<u64> {
        self.guard.checked_add(SLOT_SIZE)
    }

    fn checked_bytes(&self) -> Option<u64> {
        let slots = u64::try_from(self.slots).ok()?;
        self.stride()?.checked_mul(slots)?.checked_add(self.guard)
    }

    /// Bytes spanned by the pool, guards included.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        if self.slots == 0 {
            return 0;
        }
        // Validated in `new`.
        self.checked_bytes().unwrap_or(u64::MAX)
    }

    fn slot_offset(&self, slot: usize) -> u64 {
        self.guard + (self.guard + SLOT_SIZE) * slot as u64
    }

    /// Slot whose usable bytes contain `offset`.
    fn slot_at(&self, offset: u64) -> Option<usize> {
        let stride = self.guard + SLOT_SIZE;
        let within = offset.checked_sub(self.guard)?;
        if within % stride >= SLOT_SIZE {
            return None;
        }
        usize::try_from(within / stride)
            .ok()
            .filter(|slot| *slot < self.slots)
    }
}

#[derive(Debug, Default)]
struct Slots {
    /// Slots handed out at least once; the rest are fresh.
    used: usize,
    free: VecDeque<usize>,
    /// Freed blocks as (slot, base, size), oldest first.
    quarantine: VecDeque<(usize, u64, u64)>,
    quarantined_bytes: u64,
}

#[derive(Debug)]
pub struct GuardedPool {
    base: u64,
    layout: PoolLayout,
    quarantine_size: u64,
    registry: GuardRegistry,
    slots: Mutex<Slots>,
}

impl GuardedPool {
    /// A pool over `[base, base + layout.bytes())`.
    #[must_use]
    pub fn new(base: u64, layout: PoolLayout, options: &ShieldOptions) -> Self {
        let registry = GuardRegistry::new(options.guard_size as u64);
        registry.own(base..base.saturating_add(layout.bytes()));
        Self {
            base,
            layout,
            quarantine_size: options.quarantine_size as u64,
            registry,
            slots: Mutex::new(Slots::default()),
        }
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub fn layout(&self) -> PoolLayout {
        self.layout
    }

    #[must_use]
    pub fn registry(&self) -> &GuardRegistry {
        &self.registry
    }

    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address
            .checked_sub(self.base)
            .is_some_and(|offset| offset < self.layout.bytes())
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for a `size`-byte block and register it. `None` when
    /// the block is larger than a slot or every slot holds a live block.
    pub fn alloc(&self, size: u64) -> Option<u64> {
        if size > SLOT_SIZE {
            return None;
        }
        let mut slots = self.lock();
        let slot = self.reserve(&mut slots)?;
        let slot_end = self.base + self.layout.slot_offset(slot) + SLOT_SIZE;
        let address = (slot_end - size.max(1)) & !(ALIGN - 1);
        self.registry.register(address, size);
        Some(address)
    }

    fn reserve(&self, slots: &mut Slots) -> Option<usize> {
        if slots.used < self.layout.slots {
            slots.used += 1;
            return Some(slots.used - 1);
        }
        if let Some(slot) = slots.free.pop_front() {
            return Some(slot);
        }
        let (slot, base, size) = slots.quarantine.pop_front()?;
        slots.quarantined_bytes -= size;
        self.registry.forget(base);
        tracing::trace!(slot, base, "slot taken from quarantine");
        Some(slot)
    }

    /// Free the block at `address`.
    pub fn dealloc(&self, address: u64) -> Result<Region, Violation> {
        let mut slots = self.lock();
        let region = self.registry.release(address)?;
        let slot = address
            .checked_sub(self.base)
            .and_then(|offset| self.layout.slot_at(offset))
            .ok_or(Violation::new(ViolationKind::InvalidFree, address))?;

        slots.quarantine.push_back((slot, address, region.size));
        slots.quarantined_bytes += region.size;
        while slots.quarantined_bytes > self.quarantine_size {
            let Some((slot, base, size)) = slots.quarantine.pop_front() else {
                break;
            };
            slots.quarantined_bytes -= size;
            self.registry.forget(base);
            slots.free.push_back(slot);
        }
        Ok(region)
    }
}
