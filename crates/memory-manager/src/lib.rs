// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Transient device workspace for operator dispatch.
//!
//! Many accelerator kernels need a scratch buffer whose size is only known
//! after the kernel has been planned. This crate supplies it:
//!
//! - [`ScratchAllocator`]: the acquire/release seam dispatch code uses.
//! - [`MemoryPool`]: the standard implementation. Budgeted, binned by size
//!   class, backed by a [`DeviceAllocator`].
//! - [`ScratchGuard`]: RAII wrapper that releases on drop.
//! - [`MemoryBudget`]: a byte ceiling with `"256M"`-style parsing.
//! - [`PoolStats`]: reuse and peak counters.
//!
//! # Lifetime of a block
//!
//! ```text
//! acquire(size) ──► live ──► release(ptr) ──► free list ──► acquire(...)
//!                                                │
//!                                   shrink() / eviction / drop
//!                                                ▼
//!                                     DeviceAllocator::free
//! ```

mod allocator;
mod budget;
mod error;
mod guard;
pub mod pool;
mod stats;

pub use allocator::{DeviceAllocator, ScratchAllocator};
pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::ScratchGuard;
pub use pool::MemoryPool;
pub use stats::PoolStats;
