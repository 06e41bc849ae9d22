// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Two-phase operator invocation.
//!
//! ```text
//! workspace_size(op) ──► (bytes, executor)
//!        │ bytes > 0
//!        ▼
//! pool.acquire(bytes) ──► launch(ws, bytes, executor, stream) ──► pool.release(ws)
//! ```
//!
//! The workspace is handed back as soon as the launch is queued. The stream
//! executes in order, so whoever acquires the block next runs after this
//! operator has finished with it.

use crate::{check, DispatchContext, DispatchError, Phase};
use device_runtime::DeviceOp;
use memory_manager::ScratchGuard;

/// Plans and submits one device operator on the context's stream.
///
/// The workspace acquired is exactly the size the query reported. If it
/// cannot be acquired the planned executor is discarded and the error is
/// returned without launching.
pub fn call_op(ctx: &DispatchContext, op: &DeviceOp) -> Result<(), DispatchError> {
    let name = op.name();
    let runtime = ctx.runtime();

    let (size, executor) = runtime
        .workspace_size(op)
        .map_err(|status| DispatchError::Device {
            op: name.to_string(),
            phase: Phase::WorkspaceQuery,
            status,
        })?;
    tracing::trace!(op = name, workspace = size, executor = executor.id(), "operator planned");

    let scratch = if size > 0 {
        match ScratchGuard::acquire(ctx.pool(), size as usize) {
            Ok(guard) => Some(guard),
            Err(e) => {
                runtime.discard(executor);
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let status = runtime.launch(scratch.as_ref().map(ScratchGuard::ptr), size, executor, ctx.stream());
    ctx.record_launch(size);
    let released = scratch.map_or(Ok(()), ScratchGuard::release);

    check(status, name, Phase::Launch)?;
    released?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_handle;
    use crate::testing::Rig;
    use device_runtime::emu::{Emulator, Fault};
    use device_runtime::{DeviceRuntime, RuntimeAllocator};
    use memory_manager::{MemoryBudget, MemoryPool};
    use std::sync::Arc;

    #[test]
    fn test_submits_reported_workspace() {
        let rig = Rig::new();
        let x = rig.f32(&[4, 2], &[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
        let y = rig.empty(tensor_core::DType::F32, &[4, 2]);
        {
            let src = create_handle(&rig.ctx, &x).unwrap();
            let dst = create_handle(&rig.ctx, &y).unwrap();
            let op = DeviceOp::Softmax {
                src: src.raw(),
                axis: 3,
                dst: dst.raw(),
            };
            call_op(&rig.ctx, &op).unwrap();
        }
        let stats = rig.emu.stats();
        assert_eq!(stats.launches.len(), 1);
        assert!(stats.launches[0].reported > 0);
        assert_eq!(stats.launches[0].reported, stats.launches[0].submitted);
        assert_eq!(rig.ctx.take_counters().scratch_bytes, stats.launches[0].reported);
        assert_eq!(rig.pool.live_blocks(), 0);
        let out = rig.read(&y);
        assert!((out[4] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_scratch_failure_discards_executor() {
        let emu = Arc::new(Emulator::new());
        let runtime: Arc<dyn DeviceRuntime> = emu.clone();
        let pool = Arc::new(MemoryPool::new(
            Arc::new(RuntimeAllocator::new(runtime.clone())),
            MemoryBudget::from_bytes(0),
        ));
        let ctx = DispatchContext::new(runtime.clone(), pool).unwrap();
        let data = runtime.malloc(32).unwrap();
        let desc = tensor_core::TensorDescriptor::contiguous(tensor_core::DType::F32, &[4, 2], data).unwrap();
        {
            let t = create_handle(&ctx, &desc).unwrap();
            let op = DeviceOp::Softmax {
                src: t.raw(),
                axis: 3,
                dst: t.raw(),
            };
            let err = call_op(&ctx, &op).unwrap_err();
            assert!(matches!(err, DispatchError::Memory(_)));
        }
        let stats = emu.stats();
        assert_eq!(stats.executors_discarded, 1);
        assert!(stats.launches.is_empty());
        assert_eq!(emu.pending_executors(), 0);
        assert_eq!(stats.live_tensors(), 0);
        assert!(runtime.free(data).is_success());
    }

    #[test]
    fn test_workspace_query_fault() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[1.0, 2.0]);
        rig.emu.inject(Fault::WorkspaceQuery("Softmax".into()));
        let t = create_handle(&rig.ctx, &x).unwrap();
        let op = DeviceOp::Softmax {
            src: t.raw(),
            axis: 3,
            dst: t.raw(),
        };
        let err = call_op(&rig.ctx, &op).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Device {
                phase: Phase::WorkspaceQuery,
                ..
            }
        ));
        assert!(rig.emu.stats().launches.is_empty());
    }

    #[test]
    fn test_launch_fault_releases_scratch() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[1.0, 2.0]);
        rig.emu.inject(Fault::Launch("Softmax".into()));
        let t = create_handle(&rig.ctx, &x).unwrap();
        let op = DeviceOp::Softmax {
            src: t.raw(),
            axis: 3,
            dst: t.raw(),
        };
        let err = call_op(&rig.ctx, &op).unwrap_err();
        assert!(matches!(err, DispatchError::Device { phase: Phase::Launch, .. }));
        assert_eq!(rig.pool.live_blocks(), 0);
    }
}
