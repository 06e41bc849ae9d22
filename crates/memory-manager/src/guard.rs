// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII scratch guard.

use crate::{MemoryError, ScratchAllocator};
use tensor_core::DevicePtr;

/// A scratch block that goes back to its allocator when dropped.
///
/// The guard borrows the allocator, so the block cannot outlive the pool it
/// came from.
pub struct ScratchGuard<'a> {
    allocator: &'a dyn ScratchAllocator,
    ptr: DevicePtr,
    size: usize,
}

impl<'a> ScratchGuard<'a> {
    /// Acquires `size` bytes from `allocator`.
    pub fn acquire(allocator: &'a dyn ScratchAllocator, size: usize) -> Result<Self, MemoryError> {
        let ptr = allocator.acquire(size)?;
        Ok(Self {
            allocator,
            ptr,
            size,
        })
    }

    /// Device address of the block.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Releases the block now and reports the outcome, instead of leaving it
    /// to `Drop` where errors can only be logged.
    pub fn release(self) -> Result<(), MemoryError> {
        let this = std::mem::ManuallyDrop::new(self);
        this.allocator.release(this.ptr)
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.release(self.ptr) {
            tracing::error!(ptr = %self.ptr, size = self.size, error = %e, "failed to release scratch block");
        }
    }
}

impl std::fmt::Debug for ScratchGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchGuard")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}
