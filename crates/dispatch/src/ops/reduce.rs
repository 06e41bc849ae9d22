// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sums, argmax and argsort.

use super::{ensure_dtype, ensure_shape, param};
use crate::{launch, DispatchContext, DispatchError, HandleRequest};
use device_runtime::DeviceOp;
use graph_ir::OperatorNode;
use tensor_core::DType;

/// Sums each row into a destination of shape `[1, ne1, ne2, ne3]`.
pub fn sum_rows(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_shape(node, dst.ne == [1, src.ne[1], src.ne[2], src.ne[3]], || {
        format!("row sums of {:?} do not fit {:?}", src.ne, dst.ne)
    })?;
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::ReduceSum {
        src,
        axes: vec![3],
        keep_dims: true,
        dst,
    })
}

/// Sums every element into a single-element destination.
pub fn sum(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_shape(node, dst.num_elements() == 1, || {
        format!("a total does not fit {:?}", dst.ne)
    })?;
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::ReduceSum {
        src,
        axes: vec![0, 1, 2, 3],
        keep_dims: true,
        dst,
    })
}

/// Index of the largest element of each row, as `I32`.
///
/// The destination drops the innermost dimension: `[ne1, ne2, ne3]`.
pub fn argmax(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_dtype(node, "output", dst, &[DType::I32])?;
    ensure_shape(
        node,
        src.ne[0] > 0 && dst.ne == [src.ne[1], src.ne[2], src.ne[3], 1],
        || format!("row maxima of {:?} do not fit {:?}", src.ne, dst.ne),
    )?;
    launch(
        ctx,
        [src.into(), HandleRequest::ranked(dst, 3)],
        |[src, dst]| DeviceOp::ArgMax { src, axis: 3, dst },
    )
}

/// Sorting permutation of each row into an `I32` destination.
///
/// `order` is `"asc"` (default) or `"desc"`. The device sorts into `I64`, so
/// the permutation goes through a scratch tensor and is narrowed on copy.
pub fn argsort(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let descending = match param(node, node.params.str_or("order", "asc"))? {
        "asc" => false,
        "desc" => true,
        other => {
            return Err(DispatchError::params(
                node.op,
                format!("order must be 'asc' or 'desc', got '{other}'"),
            ))
        }
    };
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_dtype(node, "output", dst, &[DType::I32])?;
    ensure_shape(node, src.same_shape(dst), || {
        format!("permutation of {:?} does not fit {:?}", src.ne, dst.ne)
    })?;

    let wide = ctx.scratch_tensor(DType::I64, &src.ne)?;
    launch(ctx, [src.into(), wide.desc().into()], |[src, dst]| DeviceOp::Argsort {
        src,
        descending,
        dst,
    })?;
    launch(ctx, [wide.desc().into(), dst.into()], |[src, dst]| DeviceOp::Copy { src, dst })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, node, node_with, Rig};
    use graph_ir::{OpKind, OpParams};

    #[test]
    fn test_sum_rows() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = rig.empty(DType::F32, &[1, 2]);
        sum_rows(&rig.ctx, &node(OpKind::SumRows, &[x], out)).unwrap();
        assert_close(&rig.read(&out), &[6.0, 15.0]);
        let stats = rig.emu.stats();
        assert!(stats.launches[0].reported > 0);
        assert_eq!(stats.launches[0].reported, stats.launches[0].submitted);
    }

    #[test]
    fn test_sum_all() {
        let rig = Rig::new();
        let x = rig.f32(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let out = rig.empty(DType::F32, &[1]);
        sum(&rig.ctx, &node(OpKind::Sum, &[x], out)).unwrap();
        assert_close(&rig.read(&out), &[10.0]);
    }

    #[test]
    fn test_sum_rows_wrong_destination() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[0.0; 6]);
        let out = rig.empty(DType::F32, &[2]);
        let err = sum_rows(&rig.ctx, &node(OpKind::SumRows, &[x], out)).unwrap_err();
        assert!(matches!(err, DispatchError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_argmax_per_row() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[1.0, 9.0, 3.0, 7.0, 5.0, 6.0]);
        let out = rig.empty(DType::I32, &[2]);
        argmax(&rig.ctx, &node(OpKind::Argmax, &[x], out)).unwrap();
        assert_eq!(rig.read(&out), vec![1.0, 0.0]);
    }

    #[test]
    fn test_argmax_requires_i32() {
        let rig = Rig::new();
        let x = rig.f32(&[3], &[0.0; 3]);
        let out = rig.empty(DType::F32, &[1]);
        let err = argmax(&rig.ctx, &node(OpKind::Argmax, &[x], out)).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
    }

    #[test]
    fn test_argsort_descending() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[0.5, 2.0, 1.0, 3.0, -1.0, 0.0]);
        let out = rig.empty(DType::I32, &[3, 2]);
        let params = OpParams::new().with("order", "desc");
        argsort(&rig.ctx, &node_with(OpKind::Argsort, &[x], out, params)).unwrap();
        assert_close(&rig.read(&out), &[1.0, 2.0, 0.0, 0.0, 2.0, 1.0]);
        assert_eq!(rig.emu.stats().launched_ops(), vec!["Argsort", "InplaceCopy"]);
    }

    #[test]
    fn test_argsort_rejects_unknown_order() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[0.0; 2]);
        let out = rig.empty(DType::I32, &[2]);
        let params = OpParams::new().with("order", "sideways");
        let err = argsort(&rig.ctx, &node_with(OpKind::Argsort, &[x], out, params)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { .. }));
    }
}
