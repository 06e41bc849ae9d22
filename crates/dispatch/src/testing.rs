// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Emulator-backed fixtures for unit tests.

use crate::engine::gather;
use crate::DispatchContext;
use device_runtime::emu::Emulator;
use device_runtime::{DeviceRuntime, RuntimeAllocator};
use graph_ir::{OpKind, OpParams, OperatorNode};
use memory_manager::{MemoryBudget, MemoryPool};
use std::cell::RefCell;
use std::sync::Arc;
use tensor_core::{DType, DevicePtr, Tensor, TensorDescriptor};

pub(crate) struct Rig {
    pub emu: Arc<Emulator>,
    pub pool: Arc<MemoryPool>,
    pub ctx: DispatchContext,
    buffers: RefCell<Vec<DevicePtr>>,
}

impl Rig {
    pub fn new() -> Self {
        let emu = Arc::new(Emulator::new());
        let runtime: Arc<dyn DeviceRuntime> = emu.clone();
        let pool = Arc::new(MemoryPool::new(
            Arc::new(RuntimeAllocator::new(runtime.clone())),
            MemoryBudget::from_mb(64),
        ));
        let ctx = DispatchContext::new(runtime, pool.clone()).unwrap();
        Self {
            emu,
            pool,
            ctx,
            buffers: RefCell::new(Vec::new()),
        }
    }

    /// Uploads `values` as a packed tensor with graph-order extents `ne`.
    pub fn tensor(&self, dtype: DType, ne: &[usize], values: &[f64]) -> TensorDescriptor {
        let desc = self.empty(dtype, ne);
        let host = Tensor::from_values(dtype, ne, values).unwrap();
        assert!(self
            .emu
            .memcpy_h2d(desc.data, host.as_bytes(), self.ctx.stream())
            .is_success());
        desc
    }

    pub fn f32(&self, ne: &[usize], values: &[f64]) -> TensorDescriptor {
        self.tensor(DType::F32, ne, values)
    }

    pub fn empty(&self, dtype: DType, ne: &[usize]) -> TensorDescriptor {
        let n: usize = ne.iter().product();
        let ptr = self.emu.malloc(n.max(1) * dtype.size_bytes()).unwrap();
        self.buffers.borrow_mut().push(ptr);
        TensorDescriptor::contiguous(dtype, ne, ptr).unwrap()
    }

    /// Waits for the stream, then reads `desc` back in graph order.
    pub fn read(&self, desc: &TensorDescriptor) -> Vec<f64> {
        self.ctx.synchronize().unwrap();
        let storage = self
            .emu
            .memcpy_d2h(desc.data, desc.offset + desc.span_bytes())
            .unwrap();
        let packed = gather(desc, &storage);
        Tensor::from_bytes(desc.dtype, &[desc.num_elements()], packed)
            .unwrap()
            .to_f64_vec()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        for ptr in self.buffers.get_mut().drain(..) {
            self.emu.free(ptr);
        }
    }
}

pub(crate) fn node(op: OpKind, srcs: &[TensorDescriptor], dst: TensorDescriptor) -> OperatorNode {
    OperatorNode::new(format!("{op}_0"), op, srcs.to_vec(), dst)
}

pub(crate) fn node_with(
    op: OpKind,
    srcs: &[TensorDescriptor],
    dst: TensorDescriptor,
    params: OpParams,
) -> OperatorNode {
    node(op, srcs, dst).with_params(params)
}

pub(crate) fn assert_close(got: &[f64], expected: &[f64]) {
    assert_eq!(got.len(), expected.len(), "{got:?} vs {expected:?}");
    for (g, e) in got.iter().zip(expected) {
        let ok = if e.is_infinite() { g == e } else { (g - e).abs() < 1e-4 };
        assert!(ok, "{got:?} vs {expected:?}");
    }
}
