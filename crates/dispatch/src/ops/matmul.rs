// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batched matrix multiplication.

use super::{ensure_dtype, ensure_shape};
use crate::{launch, DispatchContext, DispatchError};
use device_runtime::DeviceOp;
use graph_ir::OperatorNode;
use tensor_core::DType;

/// `dst = src1 · src0ᵀ` per batch.
///
/// `src0` is `[K, M, A2, A3]`, `src1` is `[K, N, B2, B3]` and the destination
/// is `[M, N, B2, B3]`. Each of `A2`, `A3` must be 1 or equal to its
/// counterpart in `src1`. The transpose of `src0` is a strided view, so
/// nothing is copied.
pub fn mul_mat(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let (a, b) = (node.src(0)?, node.src(1)?);
    let dst = &node.dst;
    for (what, desc) in [("weights", a), ("input", b), ("output", dst)] {
        ensure_dtype(node, what, desc, &[DType::F32, DType::F16])?;
    }
    ensure_shape(node, !a.ne.contains(&0) && !b.ne.contains(&0), || {
        format!("zero extent in {:?} or {:?}", a.ne, b.ne)
    })?;
    ensure_shape(node, a.ne[0] == b.ne[0], || {
        format!("inner dimensions differ: {:?} vs {:?}", a.ne, b.ne)
    })?;
    for i in 2..4 {
        if a.ne[i] != 1 && a.ne[i] != b.ne[i] {
            return if b.ne[i] % a.ne[i] == 0 {
                Err(DispatchError::unsupported(
                    node.op,
                    format!("grouped batch broadcast ({} over {})", a.ne[i], b.ne[i]),
                ))
            } else {
                Err(DispatchError::shape(
                    node.op,
                    format!("batch dimension {i} differs: {} vs {}", a.ne[i], b.ne[i]),
                ))
            };
        }
    }
    ensure_shape(node, dst.ne == [a.ne[1], b.ne[1], b.ne[2], b.ne[3]], || {
        format!("product of {:?} and {:?} does not fit {:?}", a.ne, b.ne, dst.ne)
    })?;

    let transposed = a.view(&[a.ne[1], a.ne[0], a.ne[2], a.ne[3]], &[a.nb[1], a.nb[0], a.nb[2], a.nb[3]], 0)?;
    launch(ctx, [b.into(), (&transposed).into(), dst.into()], |[lhs, rhs, dst]| DeviceOp::Matmul {
        lhs,
        rhs,
        dst,
    })
}
