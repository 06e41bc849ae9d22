// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scratch pool counters.

/// Cumulative statistics for a [`MemoryPool`](crate::MemoryPool).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Successful acquisitions.
    pub acquires: u64,
    /// Blocks handed back.
    pub releases: u64,
    /// Acquisitions served from the free list.
    pub reuse_hits: u64,
    /// Fresh blocks obtained from the device.
    pub device_mallocs: u64,
    /// Blocks returned to the device by eviction, `shrink` or drop.
    pub device_frees: u64,
    /// Requests refused because of the budget.
    pub oom_count: u64,
    /// Sum of requested sizes, before size-class rounding.
    pub bytes_requested: u64,
    /// High-water mark of bytes handed out and not yet released.
    pub peak_in_use_bytes: usize,
}

impl PoolStats {
    /// Fraction of acquisitions served without touching the device.
    pub fn hit_ratio(&self) -> f64 {
        if self.acquires == 0 {
            return 0.0;
        }
        self.reuse_hits as f64 / self.acquires as f64
    }

    pub(crate) fn record_acquire(&mut self, requested: usize, reused: bool, in_use: usize) {
        self.acquires += 1;
        self.bytes_requested += requested as u64;
        if reused {
            self.reuse_hits += 1;
        } else {
            self.device_mallocs += 1;
        }
        self.peak_in_use_bytes = self.peak_in_use_bytes.max(in_use);
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub(crate) fn record_device_free(&mut self) {
        self.device_frees += 1;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    /// One-line report for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "scratch: {} acquires ({} reused, {:.0}% hit rate), {} releases, \
             {} device mallocs, {} device frees, {} OOMs, peak {} bytes in use",
            self.acquires,
            self.reuse_hits,
            self.hit_ratio() * 100.0,
            self.releases,
            self.device_mallocs,
            self.device_frees,
            self.oom_count,
            self.peak_in_use_bytes,
        )
    }
}
