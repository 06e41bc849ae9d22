// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted scratch pool over device memory.
//!
//! The [`MemoryPool`] sits between operator dispatch and the device
//! allocator. It:
//!
//! 1. Enforces a ceiling on device bytes held, counting both blocks that are
//!    handed out and blocks cached on the free list.
//! 2. Bins released blocks by size class (next power of two, at least
//!    [`MIN_SIZE_CLASS`]) and serves later requests from that cache.
//! 3. Evicts cached blocks of other classes before refusing a request.
//!
//! A released block is eligible for reuse immediately. Callers submit all
//! work to a single in-order stream, so the kernel that read the block has
//! been queued ahead of any kernel that gets it next.

use crate::{DeviceAllocator, MemoryBudget, MemoryError, PoolStats, ScratchAllocator};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tensor_core::DevicePtr;

/// Smallest block the pool asks the device for.
pub const MIN_SIZE_CLASS: usize = 512;

/// A block currently handed out.
#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    class: usize,
}

#[derive(Default)]
struct PoolState {
    /// Bytes obtained from the device: live plus cached.
    held_bytes: usize,
    /// Bytes (by size class) handed out and not yet released.
    in_use_bytes: usize,
    live: HashMap<DevicePtr, LiveBlock>,
    free: BTreeMap<usize, Vec<DevicePtr>>,
    stats: PoolStats,
}

impl PoolState {
    fn cached_bytes(&self) -> usize {
        self.held_bytes - self.in_use_bytes
    }
}

/// Scratch allocator with a free list and a byte budget.
///
/// # Example
/// ```
/// use memory_manager::{DeviceAllocator, MemoryBudget, MemoryError, MemoryPool, ScratchAllocator};
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
/// use tensor_core::DevicePtr;
///
/// struct Bump(AtomicU64);
/// impl DeviceAllocator for Bump {
///     fn malloc(&self, size: usize) -> Result<DevicePtr, MemoryError> {
///         Ok(DevicePtr(self.0.fetch_add(size as u64, Ordering::Relaxed)))
///     }
///     fn free(&self, _: DevicePtr) -> Result<(), MemoryError> { Ok(()) }
/// }
///
/// let pool = MemoryPool::new(Arc::new(Bump(AtomicU64::new(0x1000))), MemoryBudget::from_mb(1));
/// let a = pool.acquire(100).unwrap();
/// pool.release(a).unwrap();
/// let b = pool.acquire(200).unwrap();
/// assert_eq!(a, b); // same 512-byte class, served from the cache
/// ```
pub struct MemoryPool {
    device: Arc<dyn DeviceAllocator>,
    budget: MemoryBudget,
    state: Mutex<PoolState>,
}

impl MemoryPool {
    /// Creates an empty pool drawing from `device`.
    pub fn new(device: Arc<dyn DeviceAllocator>, budget: MemoryBudget) -> Self {
        Self {
            device,
            budget,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The configured ceiling.
    pub fn budget(&self) -> MemoryBudget {
        self.budget
    }

    /// Bytes held from the device, live and cached.
    pub fn held_bytes(&self) -> usize {
        self.state.lock().held_bytes
    }

    /// Bytes handed out and not yet released, counted by size class.
    pub fn in_use_bytes(&self) -> usize {
        self.state.lock().in_use_bytes
    }

    /// Bytes cached on the free list.
    pub fn cached_bytes(&self) -> usize {
        self.state.lock().cached_bytes()
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    /// Returns every cached block to the device. Live blocks are untouched.
    pub fn shrink(&self) -> Result<(), MemoryError> {
        let mut state = self.state.lock();
        let classes: Vec<usize> = state.free.keys().copied().collect();
        for class in classes {
            self.evict_class(&mut state, class, usize::MAX)?;
        }
        tracing::debug!(held = state.held_bytes, "scratch pool shrunk");
        Ok(())
    }

    /// Frees cached blocks of `class` until `target` bytes are released or the
    /// bin is empty. Returns the number of bytes freed.
    fn evict_class(
        &self,
        state: &mut PoolState,
        class: usize,
        target: usize,
    ) -> Result<usize, MemoryError> {
        let mut freed = 0;
        while freed < target {
            let Some(ptr) = state.free.get_mut(&class).and_then(Vec::pop) else {
                break;
            };
            self.device.free(ptr)?;
            state.held_bytes -= class;
            state.stats.record_device_free();
            freed += class;
        }
        if state.free.get(&class).is_some_and(Vec::is_empty) {
            state.free.remove(&class);
        }
        Ok(freed)
    }

    /// Makes room for `needed` fresh bytes by evicting cached blocks, largest
    /// class first.
    fn make_room(&self, state: &mut PoolState, needed: usize) -> Result<(), MemoryError> {
        let budget = self.budget.as_bytes();
        while state.held_bytes + needed > budget {
            let Some(&class) = state.free.keys().next_back() else {
                break;
            };
            let excess = state.held_bytes + needed - budget;
            self.evict_class(state, class, excess)?;
        }
        Ok(())
    }
}

impl ScratchAllocator for MemoryPool {
    fn acquire(&self, size: usize) -> Result<DevicePtr, MemoryError> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let class = size_class_for(size);
        let mut state = self.state.lock();

        let cached = state.free.get_mut(&class).and_then(Vec::pop);
        let reused = cached.is_some();
        let ptr = match cached {
            Some(ptr) => ptr,
            None => {
                self.make_room(&mut state, class)?;
                let budget = self.budget.as_bytes();
                if state.held_bytes + class > budget {
                    state.stats.record_oom();
                    return Err(MemoryError::OutOfMemory {
                        requested_bytes: size,
                        available_bytes: budget.saturating_sub(state.held_bytes),
                        budget_bytes: budget,
                    });
                }
                let ptr = self.device.malloc(class)?;
                state.held_bytes += class;
                ptr
            }
        };

        state.live.insert(ptr, LiveBlock { class });
        state.in_use_bytes += class;
        let in_use = state.in_use_bytes;
        state.stats.record_acquire(size, reused, in_use);
        tracing::trace!(size, class, reused, %ptr, "scratch acquired");
        Ok(ptr)
    }

    fn release(&self, ptr: DevicePtr) -> Result<(), MemoryError> {
        let mut state = self.state.lock();
        let block = state
            .live
            .remove(&ptr)
            .ok_or(MemoryError::UnknownPointer(ptr))?;
        state.in_use_bytes -= block.class;
        state.free.entry(block.class).or_default().push(ptr);
        state.stats.record_release();
        tracing::trace!(%ptr, class = block.class, "scratch released");
        Ok(())
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.live.is_empty() {
            tracing::warn!(blocks = state.live.len(), "scratch pool dropped with live blocks");
        }
        let blocks = std::mem::take(&mut state.free)
            .into_values()
            .flatten()
            .chain(state.live.drain().map(|(ptr, _)| ptr));
        for ptr in blocks {
            if let Err(e) = self.device.free(ptr) {
                tracing::error!(%ptr, error = %e, "failed to free scratch block");
            }
        }
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryPool")
            .field("budget", &self.budget)
            .field("held_bytes", &state.held_bytes)
            .field("in_use_bytes", &state.in_use_bytes)
            .finish()
    }
}

/// Smallest power of two that is at least `size` and [`MIN_SIZE_CLASS`].
pub fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}
