// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator catalog.
//!
//! One entry point per opcode. Each decodes the node's parameters, checks
//! shapes and dtypes the device would otherwise reject, and runs one or more
//! device operators through the templates. Pool-backed intermediates live
//! until the entry point returns, by which time every operator that touches
//! them has been queued.

mod attention;
mod conv;
mod elementwise;
mod layout;
mod matmul;
mod norm;
mod reduce;

pub use attention::{diag_mask, rope, soft_max, timestep_embedding};
pub use conv::{im2col, pool_2d};
pub use elementwise::{add, clamp, div, leaky_relu, mul, scale, sqr, sub, unary};
pub use layout::{acc, arange, concat, dup, get_rows, pad, repeat, upscale};
pub use matmul::mul_mat;
pub use norm::{group_norm, norm, rms_norm};
pub use reduce::{argmax, argsort, sum, sum_rows};

use crate::DispatchError;
use graph_ir::{GraphError, OperatorNode};
use tensor_core::{DType, TensorDescriptor};

/// Tags a parameter decoding error with the node's opcode.
pub(crate) fn param<T>(node: &OperatorNode, value: Result<T, GraphError>) -> Result<T, DispatchError> {
    value.map_err(|e| DispatchError::params(node.op, e))
}

/// Reads a non-negative integer parameter as a size.
pub(crate) fn size_param(node: &OperatorNode, key: &str, default: i64) -> Result<usize, DispatchError> {
    let v = param(node, node.params.i64_or(key, default))?;
    usize::try_from(v).map_err(|_| DispatchError::params(node.op, format!("'{key}' must be non-negative, got {v}")))
}

pub(crate) fn ensure_shape(
    node: &OperatorNode,
    ok: bool,
    detail: impl FnOnce() -> String,
) -> Result<(), DispatchError> {
    if ok {
        Ok(())
    } else {
        Err(DispatchError::shape(node.op, detail()))
    }
}

/// Source and destination must have identical extents.
pub(crate) fn ensure_same_shape(
    node: &OperatorNode,
    src: &TensorDescriptor,
    dst: &TensorDescriptor,
) -> Result<(), DispatchError> {
    ensure_shape(node, src.same_shape(dst), || {
        format!("source {:?} and destination {:?} differ", src.ne, dst.ne)
    })
}

pub(crate) fn ensure_dtype(
    node: &OperatorNode,
    what: &str,
    desc: &TensorDescriptor,
    allowed: &[DType],
) -> Result<(), DispatchError> {
    if allowed.contains(&desc.dtype) {
        Ok(())
    } else {
        Err(DispatchError::unsupported(
            node.op,
            format!("{what} of dtype {}", desc.dtype),
        ))
    }
}

/// Reads a required non-negative integer parameter as a size.
pub(crate) fn required_size(node: &OperatorNode, key: &str) -> Result<usize, DispatchError> {
    let v = param(node, node.params.require_i64(key))?;
    usize::try_from(v).map_err(|_| DispatchError::params(node.op, format!("'{key}' must be non-negative, got {v}")))
}
