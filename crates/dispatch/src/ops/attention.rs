// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Causal masking, softmax, rotary embedding and timestep embedding.
//!
//! These operators have no single library counterpart. Each one is composed
//! from elementwise operators over pool-backed intermediates, all queued on
//! the context's stream.

use super::{ensure_dtype, ensure_same_shape, ensure_shape, param, required_size, size_param};
use crate::{
    apply_binary, apply_unary, launch, Arithmetic, BroadcastPlan, DispatchContext, DispatchError, Elementwise,
    ScratchTensor,
};
use device_runtime::{BinaryKind, DeviceOp, UnaryKind};
use graph_ir::OperatorNode;
use tensor_core::{DType, TensorDescriptor};

const F32_BYTES: usize = 4;

fn fill(ctx: &DispatchContext, desc: &TensorDescriptor, value: f64) -> Result<(), DispatchError> {
    launch(ctx, [desc.into()], |[dst]| DeviceOp::Fill { dst, value })
}

fn scale_into(
    ctx: &DispatchContext,
    src: &TensorDescriptor,
    dst: &TensorDescriptor,
    scalar: f32,
) -> Result<(), DispatchError> {
    launch(ctx, [src.into(), dst.into()], |[src, dst]| DeviceOp::Muls { src, scalar, dst })
}

/// `0, 1, ..., n - 1` into a fresh `F32` scratch tensor.
fn iota<'ctx>(ctx: &'ctx DispatchContext, n: usize) -> Result<ScratchTensor<'ctx>, DispatchError> {
    let t = ctx.scratch_tensor(DType::F32, &[n])?;
    launch(ctx, [t.desc().into()], |[dst]| DeviceOp::Arange {
        start: 0.0,
        end: n as f64,
        step: 1.0,
        dst,
    })?;
    Ok(t)
}

/// `base^i` for `i` in `0..n`, computed as `exp(i * ln(base))`.
fn geometric<'ctx>(ctx: &'ctx DispatchContext, n: usize, ln_base: f64) -> Result<ScratchTensor<'ctx>, DispatchError> {
    let t = iota(ctx, n)?;
    scale_into(ctx, t.desc(), t.desc(), ln_base as f32)?;
    apply_unary(ctx, t.desc(), t.desc(), &Elementwise(UnaryKind::Exp))?;
    Ok(t)
}

// ── Causal masks ────────────────────────────────────────────────

/// Replaces every element with `col > row + n_past` by `value`.
///
/// Computed as `src * keep + fill`, where `keep` is a lower-triangular
/// matrix of ones and `fill` holds `value` strictly above the shifted
/// diagonal and zero elsewhere. The fill stage is skipped for `value == 0`.
pub fn diag_mask(ctx: &DispatchContext, node: &OperatorNode, value: f64) -> Result<(), DispatchError> {
    let n_past = param(node, node.params.require_i64("n_past"))?;
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_same_shape(node, src, dst)?;
    ensure_dtype(node, "input", src, &[DType::F32, DType::F16])?;

    let keep = ctx.scratch_tensor(src.dtype, &src.ne)?;
    fill(ctx, keep.desc(), 1.0)?;
    launch(ctx, [keep.desc().into(), keep.desc().into()], |[src, dst]| DeviceOp::Triangular {
        src,
        diagonal: n_past,
        upper: false,
        dst,
    })?;
    apply_binary(ctx, src, keep.desc(), dst, &Arithmetic(BinaryKind::Mul))?;

    if value != 0.0 {
        let masked = ctx.scratch_tensor(src.dtype, &src.ne)?;
        fill(ctx, masked.desc(), value)?;
        launch(ctx, [masked.desc().into(), masked.desc().into()], |[src, dst]| DeviceOp::Triangular {
            src,
            diagonal: n_past + 1,
            upper: true,
            dst,
        })?;
        apply_binary(ctx, dst, masked.desc(), dst, &Arithmetic(BinaryKind::Add))?;
    }
    Ok(())
}

// ── Softmax ─────────────────────────────────────────────────────

/// `softmax(x * scale + mask)` along each row.
///
/// The optional mask has the row length of `x` and at least as many rows;
/// only the first `ne01` rows are used and they broadcast over the outer
/// dimensions. ALiBi slopes (`max_bias != 0`) are not supported.
pub fn soft_max(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let scale = param(node, node.params.f32_or("scale", 1.0))?;
    let max_bias = param(node, node.params.f32_or("max_bias", 0.0))?;
    if max_bias != 0.0 {
        return Err(DispatchError::unsupported(node.op, format!("ALiBi bias (max_bias = {max_bias})")));
    }
    let src = node.src(0)?;
    let dst = &node.dst;
    ensure_same_shape(node, src, dst)?;
    ensure_dtype(node, "input", src, &[DType::F32, DType::F16])?;

    let mask = match node.srcs.get(1) {
        Some(mask) => {
            ensure_dtype(node, "mask", mask, &[DType::F32, DType::F16])?;
            ensure_shape(node, mask.ne[1] >= src.ne[1], || {
                format!("mask {:?} has fewer rows than input {:?}", mask.ne, src.ne)
            })?;
            let mut ne = mask.ne;
            ne[1] = src.ne[1];
            let rows = mask.view(&ne, &mask.nb, 0)?;
            let plan = BroadcastPlan::compute(&dst.ne, &rows.ne)?;
            ensure_shape(node, plan.shape() == dst.ne, || {
                format!("mask {:?} widens input {:?}", mask.ne, src.ne)
            })?;
            Some(rows)
        }
        None => None,
    };

    scale_into(ctx, src, dst, scale)?;
    if let Some(rows) = mask {
        let cast = if rows.dtype != dst.dtype {
            let scratch = ctx.scratch_tensor(dst.dtype, &rows.ne)?;
            launch(ctx, [(&rows).into(), scratch.desc().into()], |[src, dst]| DeviceOp::Copy { src, dst })?;
            Some(scratch)
        } else {
            None
        };
        let rows = cast.as_ref().map_or(&rows, |s| s.desc());
        apply_binary(ctx, dst, rows, dst, &Arithmetic(BinaryKind::Add))?;
    }
    launch(ctx, [dst.into(), dst.into()], |[src, dst]| DeviceOp::Softmax { src, axis: 3, dst })
}

// ── Rotary embedding ────────────────────────────────────────────

/// Rotates pairs of each head by `position * freq_base^(-2i / n_dims)`.
///
/// `src0` is `[head_dim, n_heads, seq, ..]`, `src1` holds one `I32`
/// position per sequence index. `mode & 2` (the NeoX flag) selects the
/// NeoX layout (halves rotated together); otherwise adjacent pairs rotate.
///
/// Partial rotation, frequency factors, frequency scaling and YaRN
/// extrapolation are rejected.
pub fn rope(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let x = node.src(0)?;
    let pos = node.src(1)?;
    let dst = &node.dst;
    let head = x.ne[0];

    let n_dims = size_param(node, "n_dims", head as i64)?;
    let mode = param(node, node.params.i64_or("mode", 0))?;
    let freq_base = param(node, node.params.f32_or("freq_base", 10000.0))?;
    let freq_scale = param(node, node.params.f32_or("freq_scale", 1.0))?;
    let ext_factor = param(node, node.params.f32_or("ext_factor", 0.0))?;
    let attn_factor = param(node, node.params.f32_or("attn_factor", 1.0))?;

    if node.srcs.len() > 2 {
        return Err(DispatchError::unsupported(node.op, "frequency factors"));
    }
    if n_dims != head {
        return Err(DispatchError::unsupported(
            node.op,
            format!("partial rotation ({n_dims} of {head} dims)"),
        ));
    }
    if freq_scale != 1.0 {
        return Err(DispatchError::unsupported(node.op, format!("freq_scale {freq_scale}")));
    }
    if ext_factor != 0.0 {
        return Err(DispatchError::unsupported(node.op, format!("ext_factor {ext_factor}")));
    }
    if freq_base <= 0.0 {
        return Err(DispatchError::params(node.op, format!("freq_base must be positive, got {freq_base}")));
    }
    ensure_same_shape(node, x, dst)?;
    ensure_dtype(node, "input", x, &[DType::F32, DType::F16])?;
    ensure_dtype(node, "positions", pos, &[DType::I32])?;
    let seq = x.ne[2];
    ensure_shape(node, head > 0 && head % 2 == 0, || format!("head size {head} is odd"))?;
    ensure_shape(node, pos.ne == [seq, 1, 1, 1], || {
        format!("positions {:?} do not cover sequence length {seq}", pos.ne)
    })?;

    let neox = mode & 2 != 0;
    let half = head / 2;
    let ln_theta = -2.0 / n_dims as f64 * f64::from(freq_base).ln();

    let freqs = geometric(ctx, half, ln_theta)?;
    let positions = ctx.scratch_tensor(DType::F32, &[seq])?;
    launch(ctx, [pos.into(), positions.desc().into()], |[src, dst]| DeviceOp::Copy { src, dst })?;

    // angles[p][i] = pos[p] * freqs[i], laid out [half, 1, seq].
    let angles = ctx.scratch_tensor(DType::F32, &[half, 1, seq])?;
    let column = positions
        .desc()
        .view(&[1, 1, seq], &[F32_BYTES, F32_BYTES, F32_BYTES], 0)?;
    apply_binary(ctx, freqs.desc(), &column, angles.desc(), &Arithmetic(BinaryKind::Mul))?;

    let cos = rope_table(ctx, angles.desc(), UnaryKind::Cos, attn_factor, head, neox)?;
    let sin = rope_table(ctx, angles.desc(), UnaryKind::Sin, attn_factor, head, neox)?;
    launch(
        ctx,
        [x.into(), cos.desc().into(), sin.desc().into(), dst.into()],
        |[src, cos, sin, dst]| DeviceOp::RotaryEmbedding {
            src,
            cos,
            sin,
            mode: if neox { 0 } else { 1 },
            dst,
        },
    )
}

/// Expands `f(angles)` into a `[head, 1, seq]` table matching the rotation
/// layout: each frequency covers both members of its pair.
fn rope_table<'ctx>(
    ctx: &'ctx DispatchContext,
    angles: &TensorDescriptor,
    kind: UnaryKind,
    attn_factor: f32,
    head: usize,
    neox: bool,
) -> Result<ScratchTensor<'ctx>, DispatchError> {
    let half = head / 2;
    let seq = angles.ne[2];
    let e = F32_BYTES;

    let values = ctx.scratch_tensor(DType::F32, &angles.ne[..3])?;
    apply_unary(ctx, angles, values.desc(), &Elementwise(kind))?;
    if attn_factor != 1.0 {
        scale_into(ctx, values.desc(), values.desc(), attn_factor)?;
    }

    let table = ctx.scratch_tensor(DType::F32, &[head, 1, seq])?;
    let (ne, to_nb, from_nb) = if neox {
        ([half, 2, 1, seq], [e, half * e, head * e, head * e], [e, 0, half * e, half * e])
    } else {
        ([2, half, 1, seq], [e, 2 * e, head * e, head * e], [0, e, half * e, half * e])
    };
    let to = table.desc().view(&ne, &to_nb, 0)?;
    let from = values.desc().view(&ne, &from_nb, 0)?;
    launch(ctx, [(&from).into(), (&to).into()], |[src, dst]| DeviceOp::Copy { src, dst })?;
    Ok(table)
}

// ── Timestep embedding ──────────────────────────────────────────

/// Sinusoidal embedding of one timestep per row: `dim / 2` cosines followed
/// by `dim / 2` sines of `t * max_period^(-j / (dim / 2))`. Columns past
/// those are zeroed.
pub fn timestep_embedding(ctx: &DispatchContext, node: &OperatorNode) -> Result<(), DispatchError> {
    let dim = required_size(node, "dim")?;
    let max_period = param(node, node.params.f32_or("max_period", 10000.0))?;
    if dim < 2 {
        return Err(DispatchError::params(node.op, format!("dim must be at least 2, got {dim}")));
    }
    if max_period <= 0.0 {
        return Err(DispatchError::params(node.op, format!("max_period must be positive, got {max_period}")));
    }
    let steps = node.src(0)?;
    let dst = &node.dst;
    ensure_dtype(node, "timesteps", steps, &[DType::F32])?;
    ensure_dtype(node, "output", dst, &[DType::F32])?;
    let n = steps.ne[0];
    let width = dim + dim % 2;
    ensure_shape(
        node,
        steps.ne[1..] == [1, 1, 1] && dst.ne == [width, n, 1, 1],
        || format!("{n} timesteps of width {width} do not fit {:?}", dst.ne),
    )?;

    let half = dim / 2;
    let freqs = geometric(ctx, half, -f64::from(max_period).ln() / half as f64)?;

    // args[t][j] = steps[t] * freqs[j], laid out [half, n].
    let args = ctx.scratch_tensor(DType::F32, &[half, n])?;
    let column = steps.view(&[1, n], &[F32_BYTES, steps.nb[0]], 0)?;
    apply_binary(ctx, freqs.desc(), &column, args.desc(), &Arithmetic(BinaryKind::Mul))?;

    let cos = ctx.scratch_tensor(DType::F32, &[half, n])?;
    apply_unary(ctx, args.desc(), cos.desc(), &Elementwise(UnaryKind::Cos))?;
    let sin = ctx.scratch_tensor(DType::F32, &[half, n])?;
    apply_unary(ctx, args.desc(), sin.desc(), &Elementwise(UnaryKind::Sin))?;

    let body = dst.view(&[2 * half, n], &[F32_BYTES, dst.nb[1]], 0)?;
    launch(
        ctx,
        [cos.desc().into(), sin.desc().into(), (&body).into()],
        |[cos, sin, dst]| DeviceOp::Concat {
            srcs: vec![cos, sin],
            dim: 3,
            dst,
        },
    )?;
    if width > 2 * half {
        let tail = dst.view(&[width - 2 * half, n], &[F32_BYTES, dst.nb[1]], 2 * half * F32_BYTES)?;
        fill(ctx, &tail, 0.0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_close, node, node_with, Rig};
    use graph_ir::{OpKind, OpParams};

    const NEG_INF: f64 = f64::NEG_INFINITY;

    #[test]
    fn test_diag_mask_inf() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 3], &[1.0; 9]);
        let out = rig.empty(DType::F32, &[3, 3]);
        let params = OpParams::new().with("n_past", 0i64);
        diag_mask(&rig.ctx, &node_with(OpKind::DiagMaskInf, &[x], out, params), NEG_INF).unwrap();
        assert_close(
            &rig.read(&out),
            &[1.0, NEG_INF, NEG_INF, 1.0, 1.0, NEG_INF, 1.0, 1.0, 1.0],
        );
    }

    #[test]
    fn test_diag_mask_zero_with_past() {
        let rig = Rig::new();
        let x = rig.f32(&[3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = rig.empty(DType::F32, &[3, 2]);
        let params = OpParams::new().with("n_past", 1i64);
        diag_mask(&rig.ctx, &node_with(OpKind::DiagMaskZero, &[x], out, params), 0.0).unwrap();
        assert_close(&rig.read(&out), &[1.0, 2.0, 0.0, 4.0, 5.0, 6.0]);
        assert!(!rig.emu.stats().launched_ops().contains(&"Triu"));
    }

    #[test]
    fn test_diag_mask_requires_n_past() {
        let rig = Rig::new();
        let x = rig.f32(&[2, 2], &[0.0; 4]);
        let out = rig.empty(DType::F32, &[2, 2]);
        let err = diag_mask(&rig.ctx, &node(OpKind::DiagMaskInf, &[x], out), NEG_INF).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { .. }));
    }

    #[test]
    fn test_soft_max_scaled_rows() {
        let rig = Rig::new();
        let x = rig.f32(&[2, 2], &[0.0, 0.0, 1.0, 1.0]);
        let out = rig.empty(DType::F32, &[2, 2]);
        let params = OpParams::new().with("scale", 2.0);
        soft_max(&rig.ctx, &node_with(OpKind::SoftMax, &[x], out, params)).unwrap();
        assert_close(&rig.read(&out), &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_soft_max_uses_leading_mask_rows() {
        let rig = Rig::new();
        let x = rig.f32(&[2, 1, 2], &[0.0; 4]);
        // Three mask rows; only the first applies.
        let mask = rig.tensor(DType::F16, &[2, 3], &[0.0, NEG_INF, 5.0, 5.0, 5.0, 5.0]);
        let out = rig.empty(DType::F32, &[2, 1, 2]);
        soft_max(&rig.ctx, &node(OpKind::SoftMax, &[x, mask], out)).unwrap();
        assert_close(&rig.read(&out), &[1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_soft_max_rejects_alibi() {
        let rig = Rig::new();
        let x = rig.f32(&[2], &[0.0; 2]);
        let out = rig.empty(DType::F32, &[2]);
        let params = OpParams::new().with("max_bias", 8.0);
        let err = soft_max(&rig.ctx, &node_with(OpKind::SoftMax, &[x], out, params)).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
        assert_eq!(rig.emu.stats().tensors_created, 0);
    }

    fn rope_case(mode: i64) -> Vec<f64> {
        let rig = Rig::new();
        let x = rig.f32(&[4, 1, 2], &[1.0, 2.0, 3.0, 4.0, 1.0, 0.0, 0.0, 0.0]);
        let pos = rig.tensor(DType::I32, &[2], &[0.0, 1.0]);
        let out = rig.empty(DType::F32, &[4, 1, 2]);
        let params = OpParams::new().with("mode", mode);
        rope(&rig.ctx, &node_with(OpKind::Rope, &[x, pos], out, params)).unwrap();
        assert_eq!(rig.emu.stats().live_tensors(), 0);
        rig.read(&out)
    }

    #[test]
    fn test_rope_neox_rotates_halves() {
        let (c, s) = (1f64.cos(), 1f64.sin());
        assert_close(&rope_case(2), &[1.0, 2.0, 3.0, 4.0, c, 0.0, s, 0.0]);
    }

    #[test]
    fn test_rope_normal_rotates_pairs() {
        let (c, s) = (1f64.cos(), 1f64.sin());
        assert_close(&rope_case(0), &[1.0, 2.0, 3.0, 4.0, c, s, 0.0, 0.0]);
    }

    #[test]
    fn test_rope_rejects_unsupported_features() {
        let rig = Rig::new();
        let x = rig.f32(&[4], &[0.0; 4]);
        let pos = rig.tensor(DType::I32, &[1], &[0.0]);
        let out = rig.empty(DType::F32, &[4]);
        for (key, value) in [("freq_scale", 0.5), ("ext_factor", 1.0)] {
            let params = OpParams::new().with(key, value);
            let err = rope(&rig.ctx, &node_with(OpKind::Rope, &[x, pos], out, params)).unwrap_err();
            assert!(matches!(err, DispatchError::Unsupported { .. }), "{key}");
        }
        let params = OpParams::new().with("n_dims", 2i64);
        let err = rope(&rig.ctx, &node_with(OpKind::Rope, &[x, pos], out, params)).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
        let err = rope(&rig.ctx, &node(OpKind::Rope, &[x, pos, x], out)).unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported { .. }));
        assert_eq!(rig.emu.stats().tensors_created, 0);
    }

    #[test]
    fn test_timestep_embedding_even() {
        let rig = Rig::new();
        let t = rig.f32(&[2], &[0.0, 1.0]);
        let out = rig.empty(DType::F32, &[4, 2]);
        let params = OpParams::new().with("dim", 4i64);
        timestep_embedding(&rig.ctx, &node_with(OpKind::TimestepEmbedding, &[t], out, params)).unwrap();
        assert_close(
            &rig.read(&out),
            &[1.0, 1.0, 0.0, 0.0, 1f64.cos(), 0.01f64.cos(), 1f64.sin(), 0.01f64.sin()],
        );
    }

    #[test]
    fn test_timestep_embedding_odd_zeroes_tail() {
        let rig = Rig::new();
        let t = rig.f32(&[1], &[1.0]);
        let out = rig.tensor(DType::F32, &[4, 1], &[9.0; 4]);
        let params = OpParams::new().with("dim", 3i64);
        timestep_embedding(&rig.ctx, &node_with(OpKind::TimestepEmbedding, &[t], out, params)).unwrap();
        assert_close(&rig.read(&out), &[1f64.cos(), 1f64.sin(), 0.0, 0.0]);
    }
}
