// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocator seams.
//!
//! [`DeviceAllocator`] is the raw device `malloc`/`free` pair the pool sits
//! on. [`ScratchAllocator`] is what operator dispatch sees: a source of
//! short-lived workspace that is handed back right after the kernel that
//! uses it has been submitted.

use crate::MemoryError;
use tensor_core::DevicePtr;

/// Raw device memory.
pub trait DeviceAllocator: Send + Sync {
    /// Allocates `size` bytes of device memory.
    fn malloc(&self, size: usize) -> Result<DevicePtr, MemoryError>;

    /// Frees memory previously returned by [`malloc`](Self::malloc).
    fn free(&self, ptr: DevicePtr) -> Result<(), MemoryError>;
}

/// Transient workspace for a single kernel submission.
///
/// Implementations may hand a released block to the very next caller. That
/// is sound only because every consumer submits to one in-order stream: the
/// next kernel cannot start before the previous one has finished with the
/// block.
pub trait ScratchAllocator: Send + Sync {
    /// Acquires at least `size` bytes. `size` must be non-zero.
    fn acquire(&self, size: usize) -> Result<DevicePtr, MemoryError>;

    /// Returns a block obtained from [`acquire`](Self::acquire).
    fn release(&self, ptr: DevicePtr) -> Result<(), MemoryError>;
}

impl<T: ScratchAllocator + ?Sized> ScratchAllocator for std::sync::Arc<T> {
    fn acquire(&self, size: usize) -> Result<DevicePtr, MemoryError> {
        (**self).acquire(size)
    }

    fn release(&self, ptr: DevicePtr) -> Result<(), MemoryError> {
        (**self).release(ptr)
    }
}
