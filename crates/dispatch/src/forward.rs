// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Opcode routing.

use crate::ops;
use crate::{DispatchContext, DispatchError};
use device_runtime::UnaryKind;
use graph_ir::{OpKind, OperatorNode};

/// Executes one graph node on the context's stream.
///
/// The node's source count is checked against its opcode first. Returns once
/// every device operator for the node has been queued; call
/// [`DispatchContext::synchronize`] to wait for and surface kernel failures.
pub fn compute_forward(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    node.check_arity()?;
    tracing::trace!(node = %node.name, op = %node.op, dst = %node.dst, "compute forward");

    match node.op {
        OpKind::Add => ops::add(ctx, node),
        OpKind::Sub => ops::sub(ctx, node),
        OpKind::Mul => ops::mul(ctx, node),
        OpKind::Div => ops::div(ctx, node),
        OpKind::Sqr => ops::sqr(ctx, node),
        OpKind::Scale => ops::scale(ctx, node),
        OpKind::Clamp => ops::clamp(ctx, node),
        OpKind::LeakyRelu => ops::leaky_relu(ctx, node),
        OpKind::Abs => ops::unary(ctx, node, UnaryKind::Abs),
        OpKind::Neg => ops::unary(ctx, node, UnaryKind::Neg),
        OpKind::Exp => ops::unary(ctx, node, UnaryKind::Exp),
        OpKind::Log => ops::unary(ctx, node, UnaryKind::Log),
        OpKind::Sqrt => ops::unary(ctx, node, UnaryKind::Sqrt),
        OpKind::Sin => ops::unary(ctx, node, UnaryKind::Sin),
        OpKind::Cos => ops::unary(ctx, node, UnaryKind::Cos),
        OpKind::Gelu => ops::unary(ctx, node, UnaryKind::Gelu),
        OpKind::Silu => ops::unary(ctx, node, UnaryKind::Silu),
        OpKind::Tanh => ops::unary(ctx, node, UnaryKind::Tanh),
        OpKind::Relu => ops::unary(ctx, node, UnaryKind::Relu),
        OpKind::Sigmoid => ops::unary(ctx, node, UnaryKind::Sigmoid),
        OpKind::Hardsigmoid => ops::unary(ctx, node, UnaryKind::Hardsigmoid),
        OpKind::Hardswish => ops::unary(ctx, node, UnaryKind::Hardswish),
        OpKind::Repeat => ops::repeat(ctx, node),
        OpKind::Concat => ops::concat(ctx, node),
        OpKind::Arange => ops::arange(ctx, node),
        OpKind::Argsort => ops::argsort(ctx, node),
        OpKind::Upscale => ops::upscale(ctx, node),
        OpKind::Pad => ops::pad(ctx, node),
        OpKind::Dup | OpKind::Cpy | OpKind::Cont => ops::dup(ctx, node),
        OpKind::Acc => ops::acc(ctx, node),
        OpKind::Norm => ops::norm(ctx, node),
        OpKind::GroupNorm => ops::group_norm(ctx, node),
        OpKind::RmsNorm => ops::rms_norm(ctx, node),
        OpKind::SumRows => ops::sum_rows(ctx, node),
        OpKind::Sum => ops::sum(ctx, node),
        OpKind::Argmax => ops::argmax(ctx, node),
        OpKind::DiagMaskInf => ops::diag_mask(ctx, node, f64::NEG_INFINITY),
        OpKind::DiagMaskZero => ops::diag_mask(ctx, node, 0.0),
        OpKind::SoftMax => ops::soft_max(ctx, node),
        OpKind::Rope => ops::rope(ctx, node),
        OpKind::TimestepEmbedding => ops::timestep_embedding(ctx, node),
        OpKind::MulMat => ops::mul_mat(ctx, node),
        OpKind::GetRows => ops::get_rows(ctx, node),
        OpKind::Im2col => ops::im2col(ctx, node),
        OpKind::Pool2d => ops::pool_2d(ctx, node),
    }
}
