// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for scratch memory management.

use tensor_core::DevicePtr;

/// Errors that can occur while acquiring or returning scratch memory.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The request would push device memory held by the pool past its budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A release named an address the pool never handed out, or released it twice.
    #[error("pointer {0} is not a live pool allocation")]
    UnknownPointer(DevicePtr),

    /// The backing device allocator failed.
    #[error("device allocator failed: {0}")]
    Device(String),

    /// A budget string could not be parsed.
    #[error("invalid memory budget '{0}': expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),
}
