// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The accelerator runtime boundary.

use crate::{DeviceOp, RawTensor, Status, StreamId, TensorSpec};
use tensor_core::DevicePtr;

/// A planned operator, returned by the workspace query and consumed by
/// exactly one of [`DeviceRuntime::launch`] or [`DeviceRuntime::discard`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Executor(pub u64);

impl Executor {
    /// Runtime-assigned identifier, for logs.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Calls into an accelerator runtime and its operator library.
///
/// Operators run in two phases. [`workspace_size`](Self::workspace_size)
/// validates the arguments and reports how much scratch memory the
/// operator needs; [`launch`](Self::launch) then enqueues it on a stream
/// with exactly that much workspace. Launches return as soon as the work is
/// queued; kernel failures surface at the next
/// [`synchronize`](Self::synchronize).
pub trait DeviceRuntime: Send + Sync {
    fn malloc(&self, size: usize) -> Result<DevicePtr, Status>;

    /// Waits for outstanding work, then frees `ptr`.
    fn free(&self, ptr: DevicePtr) -> Status;

    /// Enqueues a host-to-device copy on `stream`. `src` is captured before
    /// returning.
    fn memcpy_h2d(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> Status;

    /// Waits for outstanding work, then copies `len` bytes back to the host.
    fn memcpy_d2h(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>, Status>;

    fn create_stream(&self) -> Result<StreamId, Status>;

    fn destroy_stream(&self, stream: StreamId) -> Status;

    /// Blocks until every submission on `stream` has finished.
    fn synchronize(&self, stream: StreamId) -> Status;

    /// Registers a tensor view. No data is copied.
    fn create_tensor(&self, spec: &TensorSpec) -> Result<RawTensor, Status>;

    fn destroy_tensor(&self, tensor: RawTensor) -> Status;

    /// Plans `op` and reports its workspace requirement in bytes.
    fn workspace_size(&self, op: &DeviceOp) -> Result<(u64, Executor), Status>;

    /// Enqueues a planned operator. `size` must equal the size reported by
    /// the query, with `workspace` pointing at that many bytes when non-zero.
    fn launch(
        &self,
        workspace: Option<DevicePtr>,
        size: u64,
        executor: Executor,
        stream: StreamId,
    ) -> Status;

    /// Drops a planned operator that will not be launched.
    fn discard(&self, executor: Executor);
}
