// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-device dispatch context.
//!
//! A [`DispatchContext`] owns one in-order stream on a runtime and borrows a
//! scratch allocator. Every operator of a graph evaluation is submitted to
//! that stream, which is what makes releasing workspace right after
//! submission safe: a later kernel reusing the block cannot start before the
//! earlier one has finished.

use crate::{check, DispatchError, Phase};
use device_runtime::{DeviceRuntime, StreamId};
use memory_manager::{ScratchAllocator, ScratchGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tensor_core::{DType, TensorDescriptor};

/// Launch counters accumulated since the last [`DispatchContext::take_counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchCounters {
    pub launches: u64,
    pub scratch_bytes: u64,
}

/// Runtime, scratch pool and stream shared by the operators of one evaluation.
pub struct DispatchContext {
    runtime: Arc<dyn DeviceRuntime>,
    pool: Arc<dyn ScratchAllocator>,
    stream: StreamId,
    device_id: u32,
    launches: AtomicU64,
    scratch_bytes: AtomicU64,
}

impl DispatchContext {
    /// Creates a context with a fresh stream on `runtime`.
    pub fn new(
        runtime: Arc<dyn DeviceRuntime>,
        pool: Arc<dyn ScratchAllocator>,
    ) -> Result<Self, DispatchError> {
        Self::with_device_id(runtime, pool, 0)
    }

    /// Like [`new`](Self::new), tagging logs with `device_id`.
    pub fn with_device_id(
        runtime: Arc<dyn DeviceRuntime>,
        pool: Arc<dyn ScratchAllocator>,
        device_id: u32,
    ) -> Result<Self, DispatchError> {
        let stream = runtime
            .create_stream()
            .map_err(|status| DispatchError::Device {
                op: "CreateStream".into(),
                phase: Phase::Stream,
                status,
            })?;
        tracing::debug!(device_id, %stream, "dispatch context created");
        Ok(Self {
            runtime,
            pool,
            stream,
            device_id,
            launches: AtomicU64::new(0),
            scratch_bytes: AtomicU64::new(0),
        })
    }

    pub fn runtime(&self) -> &dyn DeviceRuntime {
        self.runtime.as_ref()
    }

    pub fn pool(&self) -> &dyn ScratchAllocator {
        self.pool.as_ref()
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Blocks until everything submitted so far has run. Kernel failures
    /// raised on the stream surface here.
    pub fn synchronize(&self) -> Result<(), DispatchError> {
        check(self.runtime.synchronize(self.stream), "Synchronize", Phase::Synchronize)
    }

    /// Acquires a packed intermediate tensor from the scratch pool.
    ///
    /// The block goes back to the pool when the returned value is dropped,
    /// which is safe as soon as the last operator using it was submitted.
    pub fn scratch_tensor(&self, dtype: DType, ne: &[usize]) -> Result<ScratchTensor<'_>, DispatchError> {
        let bytes = ne.iter().product::<usize>() * dtype.size_bytes();
        let guard = ScratchGuard::acquire(self.pool(), bytes)?;
        let desc = TensorDescriptor::contiguous(dtype, ne, guard.ptr())?;
        tracing::trace!(%desc, bytes, "scratch tensor");
        Ok(ScratchTensor { guard, desc })
    }

    pub(crate) fn record_launch(&self, scratch_bytes: u64) {
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.scratch_bytes.fetch_add(scratch_bytes, Ordering::Relaxed);
    }

    /// Returns and resets the launch counters.
    pub fn take_counters(&self) -> LaunchCounters {
        LaunchCounters {
            launches: self.launches.swap(0, Ordering::Relaxed),
            scratch_bytes: self.scratch_bytes.swap(0, Ordering::Relaxed),
        }
    }
}

impl Drop for DispatchContext {
    fn drop(&mut self) {
        let status = self.runtime.destroy_stream(self.stream);
        if !status.is_success() {
            tracing::error!(stream = %self.stream, %status, "failed to destroy stream");
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("device_id", &self.device_id)
            .field("stream", &self.stream)
            .finish()
    }
}

/// A pool-backed intermediate tensor.
#[derive(Debug)]
pub struct ScratchTensor<'ctx> {
    guard: ScratchGuard<'ctx>,
    desc: TensorDescriptor,
}

impl ScratchTensor<'_> {
    pub fn desc(&self) -> &TensorDescriptor {
        &self.desc
    }

    /// Bytes held from the pool.
    pub fn size(&self) -> usize {
        self.guard.size()
    }
}
