//! Guarded heap allocator backing the C ABI.
//!
//! Guarded blocks come from a [`GuardedPool`] laid over one heap buffer
//! reserved up front. Requests the pool cannot serve (shield disabled, all
//! slots live, or larger than a slot) get their own unguarded buffer. A
//! request whose size cannot be represented yields null, like `malloc`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Violation, ViolationKind};
use crate::options::ShieldOptions;
pub use crate::pool::ALIGN;
use crate::pool::{GuardedPool, PoolLayout};
use crate::registry::{Access, GuardRegistry};

/// Upper bound on the guarded pool buffer.
pub const MAX_POOL_BYTES: u64 = 1 << 30;

#[derive(Debug, Default)]
struct Memory {
    pool: Vec<u8>,
    plain: HashMap<u64, Vec<u8>>,
}

impl Memory {
    /// Bytes `[address, address + len)` if they lie inside one owned buffer.
    fn bytes_mut(&mut self, address: u64, len: usize) -> Option<&mut [u8]> {
        let pool_start = address_of(&mut self.pool);
        if let Some(offset) = address
            .checked_sub(pool_start)
            .and_then(|offset| usize::try_from(offset).ok())
            && let Some(end) = offset.checked_add(len)
            && end <= self.pool.len()
        {
            return Some(&mut self.pool[offset..end]);
        }
        self.plain.values_mut().find_map(|buffer| {
            let start = address_of(buffer);
            let offset = usize::try_from(address.checked_sub(start)?).ok()?;
            buffer.get_mut(offset..offset.checked_add(len)?)
        })
    }
}

fn address_of(buffer: &mut [u8]) -> u64 {
    buffer.as_mut_ptr().expose_provenance() as u64
}

/// A zeroed buffer of `len` bytes, or `None` if it cannot be allocated.
fn try_zeroed(len: usize) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).ok()?;
    buffer.resize(len, 0);
    Some(buffer)
}

#[derive(Debug)]
pub struct Shield {
    options: ShieldOptions,
    pool: GuardedPool,
    memory: Mutex<Memory>,
}

impl Shield {
    #[must_use]
    pub fn new(options: ShieldOptions) -> Self {
        let mut layout = PoolLayout::for_options(&options, MAX_POOL_BYTES);
        let buffer = match usize::try_from(layout.bytes() + ALIGN).ok().and_then(try_zeroed) {
            Some(buffer) => buffer,
            None => {
                tracing::warn!(bytes = layout.bytes(), "cannot reserve the guarded pool");
                layout = PoolLayout::EMPTY;
                Vec::new()
            }
        };
        let mut memory = Memory {
            pool: buffer,
            plain: HashMap::new(),
        };
        let base = address_of(&mut memory.pool).next_multiple_of(ALIGN);
        tracing::debug!(slots = layout.slots(), base, "guarded pool");
        Self {
            pool: GuardedPool::new(base, layout, &options),
            options,
            memory: Mutex::new(memory),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ShieldOptions {
        &self.options
    }

    #[must_use]
    pub fn registry(&self) -> &GuardRegistry {
        self.pool.registry()
    }

    #[must_use]
    pub fn pool(&self) -> &GuardedPool {
        &self.pool
    }

    fn lock(&self) -> MutexGuard<'_, Memory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `size` zeroed bytes and return their address, or 0 when the
    /// request cannot be satisfied.
    pub fn alloc(&self, size: usize) -> u64 {
        if let Ok(request) = u64::try_from(size)
            && let Some(address) = self.pool.alloc(request)
        {
            // Slots are reused, so clear what a previous block left behind.
            if let Some(bytes) = self.lock().bytes_mut(address, size) {
                bytes.fill(0);
            }
            return address;
        }

        let Some(mut buffer) = size.checked_add(ALIGN as usize).and_then(try_zeroed) else {
            tracing::debug!(size, "allocation failed");
            return 0;
        };
        let base = address_of(&mut buffer).next_multiple_of(ALIGN);
        tracing::trace!(base, size, "unguarded allocation");
        self.lock().plain.insert(base, buffer);
        base
    }

    /// Free the block at `address`; null is ignored.
    pub fn dealloc(&self, address: u64) -> Result<(), Violation> {
        if address == 0 {
            return Ok(());
        }
        if self.pool.contains(address) {
            return self.pool.dealloc(address).map(|_| ());
        }
        match self.lock().plain.remove(&address) {
            Some(_) => Ok(()),
            None => Err(Violation::new(ViolationKind::InvalidFree, address)),
        }
    }

    pub fn check(&self, address: u64, width: u64, access: Access) -> Result<(), Violation> {
        if !self.options.enabled {
            return Ok(());
        }
        self.pool.registry().check(address, width, access)
    }

    /// Checked store into shield-owned memory.
    pub fn write(&self, address: u64, bytes: &[u8]) -> Result<(), Violation> {
        self.check(address, bytes.len() as u64, Access::Store)?;
        let mut memory = self.lock();
        let target = memory
            .bytes_mut(address, bytes.len())
            .ok_or(Violation::new(ViolationKind::Unknown, address))?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Checked load from shield-owned memory.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, Violation> {
        self.check(address, len as u64, Access::Load)?;
        let mut memory = self.lock();
        memory
            .bytes_mut(address, len)
            .map(|bytes| bytes.to_vec())
            .ok_or(Violation::new(ViolationKind::Unknown, address))
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.pool.registry().live_count() + self.lock().plain.len()
    }
}
