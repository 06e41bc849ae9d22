// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use super::*;
use crate::{BinaryKind, UnaryKind, Window2d};
use tensor_core::{DType, Shape, Tensor};

struct Rig {
    emu: Emulator,
    stream: StreamId,
}

impl Rig {
    fn new() -> Self {
        let emu = Emulator::new();
        let stream = emu.create_stream().unwrap();
        Self { emu, stream }
    }

    fn upload(&self, dims: &[usize], values: &[f32]) -> RawTensor {
        let ptr = self.emu.malloc(values.len() * 4).unwrap();
        let host = Tensor::from_f32(&[values.len()], values).unwrap();
        assert!(self.emu.memcpy_h2d(ptr, host.as_bytes(), self.stream).is_success());
        self.emu
            .create_tensor(&TensorSpec::contiguous(DType::F32, dims, ptr))
            .unwrap()
    }

    fn empty(&self, dtype: DType, dims: &[usize]) -> RawTensor {
        let n: usize = dims.iter().product();
        let ptr = self.emu.malloc(n.max(1) * dtype.size_bytes()).unwrap();
        self.emu
            .create_tensor(&TensorSpec::contiguous(dtype, dims, ptr))
            .unwrap()
    }

    fn run(&self, op: DeviceOp) -> Status {
        let (size, exec) = match self.emu.workspace_size(&op) {
            Ok(planned) => planned,
            Err(status) => return status,
        };
        let ws = (size > 0).then(|| self.emu.malloc(size as usize).unwrap());
        let status = self.emu.launch(ws, size, exec, self.stream);
        if !status.is_success() {
            return status;
        }
        self.emu.synchronize(self.stream)
    }

    fn read(&self, t: RawTensor) -> Vec<f64> {
        let spec = self.emu.tensors.lock()[&t.0].clone();
        let bytes = self
            .emu
            .memcpy_d2h(spec.data, spec.storage_len * spec.dtype.size_bytes())
            .unwrap();
        let host = Tensor::from_bytes(spec.dtype, &[spec.storage_len], bytes).unwrap();
        host.to_f64_vec()
    }
}

#[test]
fn test_elementwise_add_with_alpha() {
    let rig = Rig::new();
    let a = rig.upload(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let b = rig.upload(&[2, 2], &[10.0, 20.0, 30.0, 40.0]);
    let out = rig.empty(DType::F32, &[2, 2]);
    let op = DeviceOp::Binary { kind: BinaryKind::Sub, lhs: a, rhs: b, dst: out, alpha: 0.5 };
    assert!(rig.run(op).is_success());
    assert_eq!(rig.read(out), vec![-4.0, -8.0, -12.0, -16.0]);
}

#[test]
fn test_binary_requires_identical_shapes() {
    let rig = Rig::new();
    let a = rig.upload(&[2, 3], &[0.0; 6]);
    let b = rig.upload(&[2, 1], &[0.0; 2]);
    let out = rig.empty(DType::F32, &[2, 3]);
    let op = DeviceOp::Binary { kind: BinaryKind::Add, lhs: a, rhs: b, dst: out, alpha: 1.0 };
    assert_eq!(rig.emu.workspace_size(&op).unwrap_err(), Status::INVALID_PARAM);
}

#[test]
fn test_stride_zero_view_reads_repeated_values() {
    let rig = Rig::new();
    let col = rig.upload(&[2, 1], &[10.0, 20.0]);
    let data = rig.emu.tensors.lock()[&col.0].data;
    let expanded = rig
        .emu
        .create_tensor(&TensorSpec {
            dtype: DType::F32,
            dims: Shape::new(vec![2, 3]),
            strides: vec![1, 0],
            offset: 0,
            storage_len: 2,
            data,
        })
        .unwrap();
    let out = rig.empty(DType::F32, &[2, 3]);
    assert!(rig.run(DeviceOp::Copy { src: expanded, dst: out }).is_success());
    assert_eq!(rig.read(out), vec![10.0, 10.0, 10.0, 20.0, 20.0, 20.0]);
}

#[test]
fn test_unary_kinds() {
    let rig = Rig::new();
    let x = rig.upload(&[3], &[-1.0, 0.0, 4.0]);
    let out = rig.empty(DType::F32, &[3]);
    for (kind, expected) in [
        (UnaryKind::Abs, [1.0, 0.0, 4.0]),
        (UnaryKind::Neg, [1.0, 0.0, -4.0]),
        (UnaryKind::Relu, [0.0, 0.0, 4.0]),
        (UnaryKind::Hardsigmoid, [1.0 / 3.0, 0.5, 1.0]),
    ] {
        assert!(rig.run(DeviceOp::Unary { kind, src: x, dst: out }).is_success());
        let got = rig.read(out);
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-6, "{kind:?}: {got:?}");
        }
    }
}

#[test]
fn test_reduce_sum_needs_workspace() {
    let rig = Rig::new();
    let x = rig.upload(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let out = rig.empty(DType::F32, &[2, 1]);
    let op = DeviceOp::ReduceSum { src: x, axes: vec![1], keep_dims: true, dst: out };
    let (size, exec) = rig.emu.workspace_size(&op).unwrap();
    assert_eq!(size, 16);

    // Under-sized submissions are rejected.
    let ws = rig.emu.malloc(size as usize).unwrap();
    assert_eq!(rig.emu.launch(Some(ws), size - 1, exec, rig.stream), Status::INVALID_PARAM);

    assert!(rig.run(op).is_success());
    assert_eq!(rig.read(out), vec![6.0, 15.0]);
    let launches = rig.emu.stats().launches;
    assert_eq!(launches[0].submitted, 15);
    assert_eq!(launches[1].submitted, launches[1].reported);
}

#[test]
fn test_workspace_pointer_required() {
    let rig = Rig::new();
    let x = rig.upload(&[4], &[1.0, 2.0, 3.0, 4.0]);
    let out = rig.empty(DType::F32, &[4]);
    let (size, exec) = rig
        .emu
        .workspace_size(&DeviceOp::Softmax { src: x, axis: 0, dst: out })
        .unwrap();
    assert!(size > 0);
    assert_eq!(rig.emu.launch(None, size, exec, rig.stream), Status::NULL_POINTER);
}

#[test]
fn test_softmax_rows() {
    let rig = Rig::new();
    let x = rig.upload(&[2, 2], &[0.0, 0.0, 1.0, 1.0]);
    let out = rig.empty(DType::F32, &[2, 2]);
    assert!(rig.run(DeviceOp::Softmax { src: x, axis: 1, dst: out }).is_success());
    assert_eq!(rig.read(out), vec![0.5, 0.5, 0.5, 0.5]);
}

#[test]
fn test_argsort_descending_into_i64() {
    let rig = Rig::new();
    let x = rig.upload(&[1, 4], &[3.0, 1.0, 4.0, 2.0]);
    let out = rig.empty(DType::I64, &[1, 4]);
    assert!(rig
        .run(DeviceOp::Argsort { src: x, descending: true, dst: out })
        .is_success());
    assert_eq!(rig.read(out), vec![2.0, 0.0, 3.0, 1.0]);
}

#[test]
fn test_matmul_with_batch_broadcast() {
    let rig = Rig::new();
    // lhs: 2 batches of [1, 2]; rhs: one [2, 2] identity scaled by 2.
    let lhs = rig.upload(&[2, 1, 2], &[1.0, 2.0, 3.0, 4.0]);
    let rhs = rig.upload(&[1, 2, 2], &[2.0, 0.0, 0.0, 2.0]);
    let out = rig.empty(DType::F32, &[2, 1, 2]);
    assert!(rig.run(DeviceOp::Matmul { lhs, rhs, dst: out }).is_success());
    assert_eq!(rig.read(out), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_im2col_layout() {
    let rig = Rig::new();
    let x = rig.upload(&[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let out = rig.empty(DType::F32, &[1, 4, 1]);
    let window = Window2d {
        kernel: (2, 2),
        stride: (1, 1),
        padding: (0, 0),
        dilation: (1, 1),
    };
    assert!(rig.run(DeviceOp::Im2col { src: x, window, dst: out }).is_success());
    assert_eq!(rig.read(out), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_index_out_of_range_fails_on_stream() {
    let rig = Rig::new();
    let table = rig.upload(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let idx_ptr = rig.emu.malloc(4).unwrap();
    let idx_host = Tensor::from_i32(&[1], &[5]).unwrap();
    assert!(rig.emu.memcpy_h2d(idx_ptr, idx_host.as_bytes(), rig.stream).is_success());
    let index = rig
        .emu
        .create_tensor(&TensorSpec::contiguous(DType::I32, &[1], idx_ptr))
        .unwrap();
    let out = rig.empty(DType::F32, &[1, 2]);
    let op = DeviceOp::IndexSelect { src: table, axis: 0, index, dst: out };
    assert_eq!(rig.run(op), Status::KERNEL_FAILED);
    // The stream stays failed.
    assert_eq!(rig.emu.synchronize(rig.stream), Status::KERNEL_FAILED);
}

#[test]
fn test_fault_injection() {
    let rig = Rig::new();
    let x = rig.upload(&[2], &[1.0, 2.0]);
    let out = rig.empty(DType::F32, &[2]);
    let exp = DeviceOp::Unary { kind: UnaryKind::Exp, src: x, dst: out };

    rig.emu.inject(Fault::WorkspaceQuery("Exp".into()));
    assert_eq!(rig.run(exp.clone()), Status::INTERNAL);
    rig.emu.clear_faults();

    rig.emu.inject(Fault::Launch("Exp".into()));
    assert_eq!(rig.run(exp.clone()), Status::INTERNAL);
    rig.emu.clear_faults();

    let data = rig.emu.tensors.lock()[&x.0].data;
    rig.emu.inject(Fault::TensorCreate { after: 1 });
    assert!(rig.emu.create_tensor(&TensorSpec::contiguous(DType::F32, &[2], data)).is_ok());
    assert_eq!(
        rig.emu.create_tensor(&TensorSpec::contiguous(DType::F32, &[2], data)),
        Err(Status::INTERNAL)
    );
    assert!(rig.emu.create_tensor(&TensorSpec::contiguous(DType::F32, &[2], data)).is_ok());
    assert_eq!(rig.emu.pending_executors(), 0);
}

#[test]
fn test_handle_counters() {
    let rig = Rig::new();
    let t = rig.empty(DType::F32, &[4]);
    assert_eq!(rig.emu.stats().live_tensors(), 1);
    assert!(rig.emu.destroy_tensor(t).is_success());
    assert_eq!(rig.emu.destroy_tensor(t), Status::INVALID_HANDLE);
    assert_eq!(rig.emu.stats().live_tensors(), 0);
}

#[test]
fn test_tensor_outside_allocation_rejected() {
    let rig = Rig::new();
    let ptr = rig.emu.malloc(8).unwrap();
    let spec = TensorSpec::contiguous(DType::F32, &[4], ptr);
    assert_eq!(rig.emu.create_tensor(&spec), Err(Status::INVALID_ADDRESS));
}

#[test]
fn test_free_waits_for_queued_work() {
    let rig = Rig::new();
    let x = rig.upload(&[3], &[1.0, 2.0, 3.0]);
    let out = rig.empty(DType::F32, &[3]);
    let (size, exec) = rig
        .emu
        .workspace_size(&DeviceOp::Muls { src: x, scalar: 2.0, dst: out })
        .unwrap();
    assert!(rig.emu.launch(None, size, exec, rig.stream).is_success());
    let spec = rig.emu.tensors.lock()[&out.0].clone();
    let bytes = rig.emu.memcpy_d2h(spec.data, 12).unwrap();
    let host = Tensor::from_bytes(DType::F32, &[3], bytes).unwrap();
    assert_eq!(host.to_f32_vec(), vec![2.0, 4.0, 6.0]);
    assert!(rig.emu.free(spec.data).is_success());
    assert_eq!(rig.emu.memcpy_d2h(spec.data, 4), Err(Status::INVALID_ADDRESS));
}
