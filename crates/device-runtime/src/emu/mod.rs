// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-process device emulator.
//!
//! [`Emulator`] implements [`DeviceRuntime`] entirely in host memory. It
//! keeps the behaviours dispatch code depends on: asynchronous in-order
//! streams, a two-phase plan/launch protocol with exact workspace checks,
//! handle bookkeeping and device-side bounds checks. It also records what
//! was called and can be told to fail specific calls.

mod kernels;
mod memory;
mod stream;

use crate::{DeviceOp, DeviceRuntime, Executor, RawTensor, Status, StreamId, TensorSpec};
use kernels::Prepared;
use memory::DeviceMemory;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream::StreamWorker;
use tensor_core::DevicePtr;

/// Default emulated device capacity: 1 GiB.
pub const DEFAULT_CAPACITY: usize = 1 << 30;

/// A call the emulator should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The workspace query of the named operator returns an error.
    WorkspaceQuery(String),
    /// Launching the named operator is rejected synchronously.
    Launch(String),
    /// The named operator is accepted but fails on the stream.
    Kernel(String),
    /// The tensor creation after `after` successful ones fails, once.
    TensorCreate { after: usize },
}

/// One accepted or rejected launch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LaunchRecord {
    pub op: &'static str,
    /// Workspace size reported by the query.
    pub reported: u64,
    /// Workspace size passed to the launch.
    pub submitted: u64,
}

/// Call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EmulatorStats {
    pub tensors_created: u64,
    pub tensors_destroyed: u64,
    pub workspace_queries: u64,
    pub executors_discarded: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub launches: Vec<LaunchRecord>,
}

impl EmulatorStats {
    /// Tensor handles created and not yet destroyed.
    pub fn live_tensors(&self) -> u64 {
        self.tensors_created - self.tensors_destroyed
    }

    /// Names of launched operators, in submission order.
    pub fn launched_ops(&self) -> Vec<&'static str> {
        self.launches.iter().map(|l| l.op).collect()
    }
}

/// Host-memory stand-in for an accelerator and its operator library.
pub struct Emulator {
    memory: Arc<Mutex<DeviceMemory>>,
    streams: Mutex<HashMap<u64, Arc<StreamWorker>>>,
    tensors: Mutex<HashMap<u64, TensorSpec>>,
    executors: Mutex<HashMap<u64, Prepared>>,
    faults: Mutex<Vec<Fault>>,
    stats: Mutex<EmulatorStats>,
    next_id: AtomicU64,
}

impl Emulator {
    /// An emulator with [`DEFAULT_CAPACITY`] bytes of device memory.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        tracing::debug!(capacity, "starting device emulator");
        Self {
            memory: Arc::new(Mutex::new(DeviceMemory::new(capacity))),
            streams: Mutex::new(HashMap::new()),
            tensors: Mutex::new(HashMap::new()),
            executors: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            stats: Mutex::new(EmulatorStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Arms a fault. Operator faults stay armed until [`clear_faults`](Self::clear_faults).
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn stats(&self) -> EmulatorStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = EmulatorStats::default();
    }

    /// Bytes currently allocated on the emulated device.
    pub fn memory_in_use(&self) -> usize {
        self.memory.lock().used()
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.lock().live_allocations()
    }

    /// Planned executors not yet launched or discarded.
    pub fn pending_executors(&self) -> usize {
        self.executors.lock().len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn op_fault(&self, matches: impl Fn(&Fault) -> bool) -> bool {
        self.faults.lock().iter().any(matches)
    }

    /// Consumes one step of a pending tensor-creation fault; returns `true`
    /// when this creation should fail.
    fn take_create_fault(&self) -> bool {
        let mut faults = self.faults.lock();
        let Some(pos) = faults
            .iter()
            .position(|f| matches!(f, Fault::TensorCreate { .. }))
        else {
            return false;
        };
        let fire = match &mut faults[pos] {
            Fault::TensorCreate { after: 0 } => true,
            Fault::TensorCreate { after } => {
                *after -= 1;
                false
            }
            _ => false,
        };
        if fire {
            faults.remove(pos);
        }
        fire
    }

    fn stream(&self, stream: StreamId) -> Option<Arc<StreamWorker>> {
        self.streams.lock().get(&stream.0).cloned()
    }

    /// Waits for every stream. Stream errors stay with their stream.
    fn drain_streams(&self) {
        let streams: Vec<_> = self.streams.lock().values().cloned().collect();
        for worker in streams {
            let status = worker.synchronize();
            if !status.is_success() {
                tracing::trace!(stream = worker.id(), %status, "stream has a pending error");
            }
        }
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRuntime for Emulator {
    fn malloc(&self, size: usize) -> Result<DevicePtr, Status> {
        let ptr = self.memory.lock().malloc(size)?;
        self.stats.lock().mallocs += 1;
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> Status {
        // Queued kernels may still reference the block.
        self.drain_streams();
        match self.memory.lock().free(ptr) {
            Ok(()) => {
                self.stats.lock().frees += 1;
                Status::SUCCESS
            }
            Err(status) => status,
        }
    }

    fn memcpy_h2d(&self, dst: DevicePtr, src: &[u8], stream: StreamId) -> Status {
        if let Err(status) = self.memory.lock().check(dst, src.len()) {
            return status;
        }
        let Some(worker) = self.stream(stream) else {
            return Status::INVALID_HANDLE;
        };
        let bytes = src.to_vec();
        worker.submit("MemcpyH2D", Box::new(move |mem: &mut DeviceMemory| mem.write(dst, &bytes)))
    }

    fn memcpy_d2h(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>, Status> {
        self.drain_streams();
        let mem = self.memory.lock();
        Ok(mem.read(src, len)?.to_vec())
    }

    fn create_stream(&self) -> Result<StreamId, Status> {
        let id = self.next_id();
        let worker = StreamWorker::spawn(id, Arc::clone(&self.memory))?;
        self.streams.lock().insert(id, Arc::new(worker));
        Ok(StreamId(id))
    }

    fn destroy_stream(&self, stream: StreamId) -> Status {
        match self.streams.lock().remove(&stream.0) {
            Some(_) => Status::SUCCESS,
            None => Status::INVALID_HANDLE,
        }
    }

    fn synchronize(&self, stream: StreamId) -> Status {
        match self.stream(stream) {
            Some(worker) => worker.synchronize(),
            None => Status::INVALID_HANDLE,
        }
    }

    fn create_tensor(&self, spec: &TensorSpec) -> Result<RawTensor, Status> {
        if self.take_create_fault() {
            return Err(Status::INTERNAL);
        }
        spec.validate()?;
        let bytes = spec.storage_len * spec.dtype.size_bytes();
        self.memory.lock().check(spec.data, bytes)?;
        let id = self.next_id();
        self.tensors.lock().insert(id, spec.clone());
        self.stats.lock().tensors_created += 1;
        Ok(RawTensor(id))
    }

    fn destroy_tensor(&self, tensor: RawTensor) -> Status {
        match self.tensors.lock().remove(&tensor.0) {
            Some(_) => {
                self.stats.lock().tensors_destroyed += 1;
                Status::SUCCESS
            }
            None => Status::INVALID_HANDLE,
        }
    }

    fn workspace_size(&self, op: &DeviceOp) -> Result<(u64, Executor), Status> {
        self.stats.lock().workspace_queries += 1;
        let name = op.name();
        if self.op_fault(|f| matches!(f, Fault::WorkspaceQuery(n) if n == name)) {
            return Err(Status::INTERNAL);
        }

        let specs = {
            let tensors = self.tensors.lock();
            let mut specs = HashMap::new();
            for t in op.tensors() {
                let spec = tensors.get(&t.0).ok_or(Status::INVALID_HANDLE)?;
                specs.insert(t, spec.clone());
            }
            specs
        };
        let workspace = kernels::plan(op, &specs)?;

        let id = self.next_id();
        self.executors.lock().insert(
            id,
            Prepared {
                op: op.clone(),
                specs,
                workspace,
            },
        );
        Ok((workspace, Executor(id)))
    }

    fn launch(
        &self,
        workspace: Option<DevicePtr>,
        size: u64,
        executor: Executor,
        stream: StreamId,
    ) -> Status {
        let Some(prepared) = self.executors.lock().remove(&executor.0) else {
            return Status::INVALID_HANDLE;
        };
        let name = prepared.op.name();
        self.stats.lock().launches.push(LaunchRecord {
            op: name,
            reported: prepared.workspace,
            submitted: size,
        });

        if self.op_fault(|f| matches!(f, Fault::Launch(n) if n == name)) {
            return Status::INTERNAL;
        }
        if size != prepared.workspace {
            return Status::INVALID_PARAM;
        }
        let workspace = if size > 0 {
            let Some(ptr) = workspace.filter(|p| !p.is_null()) else {
                return Status::NULL_POINTER;
            };
            if let Err(status) = self.memory.lock().check(ptr, size as usize) {
                return status;
            }
            Some(ptr)
        } else {
            None
        };
        let Some(worker) = self.stream(stream) else {
            return Status::INVALID_HANDLE;
        };

        let fail = self.op_fault(|f| matches!(f, Fault::Kernel(n) if n == name));
        worker.submit(
            name,
            Box::new(move |mem: &mut DeviceMemory| {
                if fail {
                    return Err(Status::KERNEL_FAILED);
                }
                kernels::execute(mem, &prepared, workspace)
            }),
        )
    }

    fn discard(&self, executor: Executor) {
        if self.executors.lock().remove(&executor.0).is_some() {
            self.stats.lock().executors_discarded += 1;
        }
    }
}

#[cfg(test)]
mod tests;
