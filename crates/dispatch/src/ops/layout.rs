// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Copies, tiling, concatenation, padding and gathers.

use super::{ensure_dtype, ensure_same_shape, ensure_shape, param, size_param};
use crate::{apply_binary, launch, Arithmetic, DispatchContext, DispatchError, HandleRequest};
use device_runtime::{BinaryKind, DeviceOp};
use graph_ir::OperatorNode;
use tensor_core::{DType, MAX_DIMS};

/// Tiles the source so every destination extent is a multiple of it.
pub fn repeat(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_shape(
        node,
        (0..MAX_DIMS).all(|i| src.ne[i] > 0 && dst.ne[i] % src.ne[i] == 0),
        || format!("{:?} does not tile {:?}", src.ne, dst.ne),
    )?;
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::Repeat { src, dst })
}

/// Joins two sources along graph dimension `dim` (default 2).
pub fn concat(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let dim = size_param(node, "dim", 2)?;
    if dim >= MAX_DIMS {
        return Err(DispatchError::params(node.op, format!("dim {dim} out of range")));
    }
    let (a, b) = (node.src(0)?, node.src(1)?);
    let dst = &node.dst;
    let fits = (0..MAX_DIMS).all(|i| {
        if i == dim {
            a.ne[i] + b.ne[i] == dst.ne[i]
        } else {
            a.ne[i] == dst.ne[i] && b.ne[i] == dst.ne[i]
        }
    });
    ensure_shape(node, fits, || {
        format!("{:?} and {:?} do not concatenate to {:?} along {dim}", a.ne, b.ne, dst.ne)
    })?;
    launch(ctx, [a.into(), b.into(), dst.into()], |[a, b, dst]| DeviceOp::Concat {
        srcs: vec![a, b],
        dim: MAX_DIMS - 1 - dim,
        dst,
    })
}

/// `start, start + step, ...` up to but excluding `stop`.
pub fn arange(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let start = f64::from(param(node, node.params.require_f32("start"))?);
    let stop = f64::from(param(node, node.params.require_f32("stop"))?);
    let step = f64::from(param(node, node.params.require_f32("step"))?);
    if step == 0.0 || !step.is_finite() {
        return Err(DispatchError::params(node.op, format!("step must be finite and non-zero, got {step}")));
    }
    let count = ((stop - start) / step).ceil().max(0.0) as usize;
    let dst = &node.dst;
    ensure_shape(node, dst.num_elements() == count, || {
        format!("{count} values do not fill {:?}", dst.ne)
    })?;
    launch(ctx, [dst.into()], |[dst]| DeviceOp::Arange {
        start,
        end: stop,
        step,
        dst,
    })
}

/// Zero-pads the high end of every dimension up to the destination extents.
pub fn pad(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_shape(node, (0..MAX_DIMS).all(|i| dst.ne[i] >= src.ne[i]), || {
        format!("{:?} cannot be padded to {:?}", src.ne, dst.ne)
    })?;
    let pads = (0..MAX_DIMS)
        .rev()
        .map(|i| (0, dst.ne[i] - src.ne[i]))
        .collect();
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::ConstantPad {
        src,
        pads,
        value: 0.0,
        dst,
    })
}

/// Nearest-neighbour upsampling of the two innermost dimensions.
pub fn upscale(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_shape(
        node,
        src.ne[2] == dst.ne[2] && src.ne[3] == dst.ne[3] && src.ne[0] > 0 && src.ne[1] > 0,
        || format!("{:?} cannot be upscaled to {:?}", src.ne, dst.ne),
    )?;
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::UpsampleNearest2d { src, dst })
}

/// Copies with dtype conversion. Serves `dup`, `cpy` and `cont`.
///
/// A packed source with the destination's element count but other extents
/// is reinterpreted with the destination's extents first. With two sources
/// (`cpy`), the second names the destination and must match its shape.
pub fn dup(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let src = node.src(0)?;
    let dst = &node.dst;
    if let Some(target) = node.srcs.get(1) {
        ensure_same_shape(node, target, dst)?;
    }
    let src = if src.same_shape(dst) {
        *src
    } else if src.num_elements() == dst.num_elements() && src.is_contiguous() && dst.is_contiguous() {
        src.reshape(&dst.ne[..dst.n_dims])?
    } else {
        return Err(DispatchError::shape(
            node.op,
            format!("cannot copy {:?} into {:?}", src.ne, dst.ne),
        ));
    };
    launch(ctx, [(&src).into(), dst.into()], |[src, dst]| DeviceOp::Copy { src, dst })
}

/// Adds the second source into a strided window of a copy of the first.
///
/// The window has the second source's extents, byte strides `nb1..nb3`
/// (defaulting to the destination's) and a byte `offset` into the
/// destination. With `inplace` set the destination already holds the first
/// source and the copy is skipped.
pub fn acc(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let (src0, src1) = (node.src(0)?, node.src(1)?);
    let dst = &node.dst;
    ensure_same_shape(node, src0, dst)?;

    let nb1 = size_param(node, "nb1", dst.nb[1] as i64)?;
    let nb2 = size_param(node, "nb2", dst.nb[2] as i64)?;
    let nb3 = size_param(node, "nb3", dst.nb[3] as i64)?;
    let offset = size_param(node, "offset", 0)?;
    let inplace = param(node, node.params.bool_or("inplace", false))?;

    let window = dst.view(&src1.ne, &[dst.dtype.size_bytes(), nb1, nb2, nb3], offset)?;
    ensure_shape(node, offset + window.span_bytes() <= dst.span_bytes(), || {
        format!(
            "window {:?} at offset {offset} overruns destination {:?}",
            src1.ne, dst.ne
        )
    })?;

    if !inplace {
        launch(ctx, [src0.into(), dst.into()], |[src, dst]| DeviceOp::Copy { src, dst })?;
    }
    apply_binary(ctx, &window, src1, &window, &Arithmetic(BinaryKind::Add))
}

/// Gathers rows of the first source by the `I32` indices of the second.
///
/// Table `[ne00, ne01, B2, B3]`, indices `[R, B2, B3]`, destination
/// `[ne00, R, B2, B3]`. One index-select runs per batch.
pub fn get_rows(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let (table, index) = (node.src(0)?, node.src(1)?);
    let dst = &node.dst;
    ensure_dtype(node, "table", table, &[DType::F32, DType::F16])?;
    ensure_dtype(node, "indices", index, &[DType::I32])?;
    ensure_dtype(node, "output", dst, &[DType::F32, DType::F16])?;
    ensure_shape(
        node,
        index.ne[3] == 1
            && table.ne[2] == index.ne[1]
            && table.ne[3] == index.ne[2]
            && dst.ne == [table.ne[0], index.ne[0], index.ne[1], index.ne[2]],
        || {
            format!(
                "table {:?} indexed by {:?} does not give {:?}",
                table.ne, index.ne, dst.ne
            )
        },
    )?;

    // The device gathers without converting, so bring the table to the
    // destination dtype first.
    let cast = if table.dtype != dst.dtype {
        let scratch = ctx.scratch_tensor(dst.dtype, &table.ne)?;
        launch(ctx, [table.into(), scratch.desc().into()], |[src, dst]| DeviceOp::Copy { src, dst })?;
        Some(scratch)
    } else {
        None
    };
    let table = cast.as_ref().map_or(table, |s| s.desc());

    for i3 in 0..index.ne[2] {
        for i2 in 0..index.ne[1] {
            let rows = table.view(
                &table.ne[..2],
                &table.nb[..2],
                i2 * table.nb[2] + i3 * table.nb[3],
            )?;
            let idx = index.view(&index.ne[..1], &index.nb[..1], i2 * index.nb[1] + i3 * index.nb[2])?;
            let out = dst.view(&dst.ne[..2], &dst.nb[..2], i2 * dst.nb[2] + i3 * dst.nb[3])?;
            launch(
                ctx,
                [
                    HandleRequest::ranked(&rows, 2),
                    HandleRequest::ranked(&idx, 1),
                    HandleRequest::ranked(&out, 2),
                ],
                |[src, index, dst]| DeviceOp::IndexSelect {
                    src,
                    axis: 0,
                    index,
                    dst,
                },
            )?;
        }
    }
    Ok(())
}
