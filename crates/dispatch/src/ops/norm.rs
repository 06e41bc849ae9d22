// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row, group and RMS normalisation.

use super::{ensure_same_shape, ensure_shape, param, required_size};
use crate::{launch, DispatchContext, DispatchError};
use device_runtime::DeviceOp;
use graph_ir::OperatorNode;

/// Zero mean, unit variance over each row. `eps` is required.
pub fn norm(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let eps = param(node, node.params.require_f32("eps"))?;
    let src = node.src(0)?;
    ensure_same_shape(node, src, &node.dst)?;
    launch(ctx, [src.into(), (&node.dst).into()], |[src, dst]| DeviceOp::LayerNorm {
        src,
        normalized_dims: 1,
        eps,
        dst,
    })
}

/// Normalises `n_groups` groups of channels (graph dimension 2) per batch.
pub fn group_norm(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let groups = required_size(node, "n_groups")?;
    let eps = param(node, node.params.f32_or("eps", 1e-6))?;
    let src = node.src(0)?;
    ensure_same_shape(node, src, &node.dst)?;
    if groups == 0 {
        return Err(DispatchError::params(node.op, "n_groups must be positive"));
    }
    ensure_shape(node, src.ne[2] % groups == 0, || {
        format!("{} channels do not split into {groups} groups", src.ne[2])
    })?;
    launch(ctx, [src.into(), (&node.dst).into()], |[src, dst]| DeviceOp::GroupNorm {
        src,
        groups,
        eps,
        dst,
    })
}

/// Divides each row by its root mean square. `eps` is required.
pub fn rms_norm(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let eps = param(node, node.params.require_f32("eps"))?;
    let src = node.src(0)?;
    ensure_same_shape(node, src, &node.dst)?;
    launch(ctx, [src.into(), (&node.dst).into()], |[src, dst]| DeviceOp::RmsNorm { src, eps, dst })
}
