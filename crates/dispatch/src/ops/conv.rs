// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Patch extraction and 2-D pooling.

use super::{ensure_dtype, ensure_shape, param, required_size, size_param};
use crate::{launch, DispatchContext, DispatchError, HandleRequest};
use device_runtime::{DeviceOp, Window2d};
use graph_ir::OperatorNode;
use tensor_core::DType;

/// Output extent of a sliding window, if at least one position fits.
fn window_extent(input: usize, kernel: usize, stride: usize, pad: usize, dilation: usize) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return None;
    }
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * pad;
    (padded >= span).then(|| (padded - span) / stride + 1)
}

/// Unfolds input patches into rows for a convolution-as-matmul.
///
/// `src0` only supplies the kernel extents: `[KW, KH, IC, ..]` (2-D) or
/// `[KW, IC, ..]` (1-D). `src1` is the input `[IW, IH, IC, N]` or
/// `[IW, IC, N]`. The destination is `[IC * KH * KW, OW, OH, N]` or
/// `[IC * KW, OW, N]`, patch elements ordered channel, then row, then
/// column.
///
/// The library produces `(N, IC * KH * KW, OH * OW)`; a strided copy
/// transposes that into the destination.
pub fn im2col(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let is_2d = param(node, node.params.bool_or("is_2d", true))?;
    let s0 = size_param(node, "s0", 1)?;
    let p0 = size_param(node, "p0", 0)?;
    let d0 = size_param(node, "d0", 1)?;
    let (s1, p1, d1) = if is_2d {
        (size_param(node, "s1", 1)?, size_param(node, "p1", 0)?, size_param(node, "d1", 1)?)
    } else {
        (1, 0, 1)
    };

    let (kernel, input) = (node.src(0)?, node.src(1)?);
    let dst = &node.dst;
    ensure_dtype(node, "output", dst, &[DType::F32, DType::F16])?;
    ensure_dtype(node, "input", input, &[DType::F32, DType::F16])?;

    let kw = kernel.ne[0];
    let (kh, iw, ih, ic, n) = if is_2d {
        (kernel.ne[1], input.ne[0], input.ne[1], input.ne[2], input.ne[3])
    } else {
        ensure_shape(node, input.ne[3] == 1, || format!("1-D input {:?} has four dimensions", input.ne))?;
        (1, input.ne[0], 1, input.ne[1], input.ne[2])
    };
    let window = Window2d {
        kernel: (kh, kw),
        stride: (s1, s0),
        padding: (p1, p0),
        dilation: (d1, d0),
    };
    let (oh, ow) = match (
        window_extent(ih, kh, s1, p1, d1),
        window_extent(iw, kw, s0, p0, d0),
    ) {
        (Some(oh), Some(ow)) => (oh, ow),
        _ => {
            return Err(DispatchError::params(
                node.op,
                format!("window {window:?} does not fit input {:?}", input.ne),
            ))
        }
    };
    let ckk = ic * kh * kw;
    let expected = if is_2d { [ckk, ow, oh, n] } else { [ckk, ow, n, 1] };
    ensure_shape(node, dst.ne == expected && dst.is_contiguous(), || {
        format!("patches {expected:?} do not fit {:?}", dst.ne)
    })?;

    let e = input.dtype.size_bytes();
    let planes = if is_2d {
        *input
    } else {
        input.view(&[iw, 1, ic, n], &[e, input.nb[1], input.nb[1], input.nb[2]], 0)?
    };

    let l = oh * ow;
    let cols = ctx.scratch_tensor(input.dtype, &[l, ckk, n])?;
    launch(
        ctx,
        [(&planes).into(), HandleRequest::ranked(cols.desc(), 3)],
        |[src, dst]| DeviceOp::Im2col { src, window, dst },
    )?;

    let de = dst.dtype.size_bytes();
    let transposed = dst.view(&[l, ckk, n], &[ckk * de, de, l * ckk * de], 0)?;
    launch(
        ctx,
        [
            HandleRequest::ranked(cols.desc(), 3),
            HandleRequest::ranked(&transposed, 3),
        ],
        |[src, dst]| DeviceOp::Copy { src, dst },
    )
}

/// Average or max pooling over the two innermost dimensions.
///
/// `op` is `"avg"` or `"max"`; kernel `k0`/`k1` are required, strides
/// `s0`/`s1` default to the kernel and paddings `p0`/`p1` to 0. Padding
/// counts toward the average's divisor.
pub fn pool_2d(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let is_max = match param(node, node.params.str_or("op", ""))? {
        "avg" => false,
        "max" => true,
        other => {
            return Err(DispatchError::params(
                node.op,
                format!("op must be 'avg' or 'max', got '{other}'"),
            ))
        }
    };
    let k0 = required_size(node, "k0")?;
    let k1 = required_size(node, "k1")?;
    let s0 = size_param(node, "s0", k0 as i64)?;
    let s1 = size_param(node, "s1", k1 as i64)?;
    let p0 = size_param(node, "p0", 0)?;
    let p1 = size_param(node, "p1", 0)?;

    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_dtype(node, "input", src, &[DType::F32, DType::F16])?;
    let (ow, oh) = match (window_extent(src.ne[0], k0, s0, p0, 1), window_extent(src.ne[1], k1, s1, p1, 1)) {
        (Some(ow), Some(oh)) => (ow, oh),
        _ => {
            return Err(DispatchError::params(
                node.op,
                format!("{k0}x{k1} window does not fit input {:?}", src.ne),
            ))
        }
    };
    ensure_shape(node, dst.ne == [ow, oh, src.ne[2], src.ne[3]], || {
        format!("pooled {:?} does not fit {:?}", [ow, oh, src.ne[2], src.ne[3]], dst.ne)
    })?;

    let window = Window2d {
        kernel: (k1, k0),
        stride: (s1, s0),
        padding: (p1, p0),
        dilation: (1, 1),
    };
    launch(ctx, [src.into(), dst.into()], |[src, dst]| {
        if is_max {
            DeviceOp::MaxPool2d { src, window, dst }
        } else {
            DeviceOp::AvgPool2d { src, window, dst }
        }
    })
}
