// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise arithmetic and activations.

use super::{ensure_same_shape, param};
use crate::{binary_op, call_op, unary_op, Arithmetic, DispatchContext, DispatchError, Elementwise};
use device_runtime::{BinaryKind, DeviceOp, RawTensor, UnaryKind};
use graph_ir::OperatorNode;

pub fn add(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    binary_op(ctx, node, Arithmetic(BinaryKind::Add))
}

pub fn sub(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    binary_op(ctx, node, Arithmetic(BinaryKind::Sub))
}

pub fn mul(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    binary_op(ctx, node, Arithmetic(BinaryKind::Mul))
}

pub fn div(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    binary_op(ctx, node, Arithmetic(BinaryKind::Div))
}

/// Any of the library's single-input functions.
pub fn unary(ctx: &DispatchContext, node: &OperatorNode, kind: UnaryKind) -> Result<(), DispatchError> {
    ensure_same_shape(node, node.src(0)?, &node.dst)?;
    unary_op(ctx, node, Elementwise(kind))
}

/// `x * x`, as a multiply of the source handle with itself.
pub fn sqr(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    ensure_same_shape(node, node.src(0)?, &node.dst)?;
    unary_op(ctx, node, |ctx: &DispatchContext, src: RawTensor, dst: RawTensor| {
        call_op(
            ctx,
            &DeviceOp::Binary {
                kind: BinaryKind::Mul,
                lhs: src,
                rhs: src,
                dst,
                alpha: 1.0,
            },
        )
    })
}

/// `x * scale`. The `scale` parameter is required.
pub fn scale(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let scalar = param(node, node.params.require_f32("scale"))?;
    ensure_same_shape(node, node.src(0)?, &node.dst)?;
    unary_op(ctx, node, move |ctx: &DispatchContext, src: RawTensor, dst: RawTensor| {
        call_op(ctx, &DeviceOp::Muls { src, scalar, dst })
    })
}

/// Clamps into `[min, max]`; both bounds are required.
pub fn clamp(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let min = param(node, node.params.require_f32("min"))?;
    let max = param(node, node.params.require_f32("max"))?;
    if min > max {
        return Err(DispatchError::params(node.op, format!("min {min} exceeds max {max}")));
    }
    ensure_same_shape(node, node.src(0)?, &node.dst)?;
    unary_op(ctx, node, move |ctx: &DispatchContext, src: RawTensor, dst: RawTensor| {
        call_op(ctx, &DeviceOp::Clamp { src, min, max, dst })
    })
}

/// `max(x, 0) + negative_slope * min(x, 0)`, slope defaulting to 0.01.
pub fn leaky_relu(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let negative_slope = param(node, node.params.f32_or("negative_slope", 0.01))?;
    ensure_same_shape(node, node.src(0)?, &node.dst)?;
    unary_op(ctx, node, move |ctx: &DispatchContext, src: RawTensor, dst: RawTensor| {
        call_op(
            ctx,
            &DeviceOp::LeakyRelu {
                src,
                negative_slope,
                dst,
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, node, node_with, Rig};
    use graph_ir::{OpKind, OpParams};
    use tensor_core::DType;

    #[test]
    fn test_add_broadcasts_column() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let y = rig.f32(&[1, 2], &[10.0, 20.0]);
        let out = rig.empty(DType::F32, &[3, 2]);
        add(&rig.ctx, &node(OpKind::Add, &[x, y], out)).unwrap();
        assert_close(&rig.read(&out), &[11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);
    }

    #[test]
    fn test_sub_and_div() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[8.0, 6.0]);
        let y = rig.f32(&[2], &[2.0, 3.0]);
        let out = rig.empty(DType::F32, &[2]);
        sub(&rig.ctx, &node(OpKind::Sub, &[x, y], out)).unwrap();
        assert_close(&rig.read(&out), &[6.0, 3.0]);
        div(&rig.ctx, &node(OpKind::Div, &[x, y], out)).unwrap();
        assert_close(&rig.read(&out), &[4.0, 2.0]);
    }

    #[test]
    fn test_sqr_multiplies_by_itself() {
        let rig = Rig::new();
        let x = rig.f32(&[3], &[-2.0, 0.5, 3.0]);
        let out = rig.empty(DType::F32, &[3]);
        sqr(&rig.ctx, &node(OpKind::Sqr, &[x], out)).unwrap();
        assert_close(&rig.read(&out), &[4.0, 0.25, 9.0]);
        assert_eq!(rig.emu.stats().launched_ops(), vec!["Mul"]);
    }

    #[test]
    fn test_scale_requires_factor() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[1.0, -2.0]);
        let out = rig.empty(DType::F32, &[2]);
        let err = scale(&rig.ctx, &node(OpKind::Scale, &[x], out)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { .. }));

        let n = node_with(OpKind::Scale, &[x], out, OpParams::new().with("scale", 0.5));
        scale(&rig.ctx, &n).unwrap();
        assert_close(&rig.read(&out), &[0.5, -1.0]);
    }

    #[test]
    fn test_clamp_bounds() {
        let rig = Rig::new();
        let x = rig.f32(&[3], &[-1.0, 0.5, 2.0]);
        let out = rig.empty(DType::F32, &[3]);
        let params = OpParams::new().with("min", 0.0).with("max", 1.0);
        clamp(&rig.ctx, &node_with(OpKind::Clamp, &[x], out, params)).unwrap();
        assert_close(&rig.read(&out), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_clamp_rejects_inverted_range_before_device() {
        let rig = Rig::new();
        let x = rig.f32(&[1], &[0.0]);
        let out = rig.empty(DType::F32, &[1]);
        let params = OpParams::new().with("min", 1.0).with("max", 0.0);
        let err = clamp(&rig.ctx, &node_with(OpKind::Clamp, &[x], out, params)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { .. }));
        assert_eq!(rig.emu.stats().tensors_created, 0);
    }

    #[test]
    fn test_leaky_relu_default_slope() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[-10.0, 3.0]);
        let out = rig.empty(DType::F32, &[2]);
        leaky_relu(&rig.ctx, &node(OpKind::LeakyRelu, &[x], out)).unwrap();
        assert_close(&rig.read(&out), &[-0.1, 3.0]);
    }

    #[test]
    fn test_unary_is_idempotent_for_relu_and_abs() {
        let rig = Rig::new();
        let x = rig.f32(&[4], &[-3.0, -0.5, 0.0, 2.0]);
        let once = rig.empty(DType::F32, &[4]);
        let twice = rig.empty(DType::F32, &[4]);
        for kind in [UnaryKind::Relu, UnaryKind::Abs] {
            unary(&rig.ctx, &node(OpKind::Relu, &[x], once), kind).unwrap();
            unary(&rig.ctx, &node(OpKind::Relu, &[once], twice), kind).unwrap();
            assert_eq!(rig.read(&once), rig.read(&twice));
        }
    }

    #[test]
    fn test_unary_shape_mismatch() {
        let rig = Rig::new();
        let x = rig.f32(&[4], &[0.0; 4]);
        let out = rig.empty(DType::F32, &[2, 2]);
        let err = unary(&rig.ctx, &node(OpKind::Exp, &[x], out), UnaryKind::Exp).unwrap_err();
        assert!(matches!(err, DispatchError::ShapeMismatch { .. }));
    }
}
