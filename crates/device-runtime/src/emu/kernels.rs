// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference kernels for the emulated operator library.
//!
//! [`plan`] validates an operator against snapshots of its tensor specs and
//! returns the workspace it needs. [`execute`] runs it on the stream thread.
//! Kernels read every input into row-major `f64` buffers before writing any
//! output, so in-place and overlapping views behave.

use super::memory::DeviceMemory;
use crate::{BinaryKind, DeviceOp, RawTensor, Status, TensorSpec, UnaryKind, Window2d};
use std::collections::HashMap;
use tensor_core::{DType, DevicePtr};

/// Bytes of workspace per per-row statistic.
const STAT_BYTES: u64 = 8;

pub(crate) type Specs = HashMap<RawTensor, TensorSpec>;

/// An operator planned by the workspace query and waiting for launch.
pub(crate) struct Prepared {
    pub(crate) op: DeviceOp,
    pub(crate) specs: Specs,
    pub(crate) workspace: u64,
}

fn get(specs: &Specs, t: RawTensor) -> Result<&TensorSpec, Status> {
    specs.get(&t).ok_or(Status::INVALID_HANDLE)
}

fn ensure(cond: bool) -> Result<(), Status> {
    if cond {
        Ok(())
    } else {
        Err(Status::INVALID_PARAM)
    }
}

fn ensure_float(spec: &TensorSpec) -> Result<(), Status> {
    if spec.dtype.is_float() {
        Ok(())
    } else {
        Err(Status::UNSUPPORTED_DTYPE)
    }
}

fn ensure_index(spec: &TensorSpec) -> Result<(), Status> {
    match spec.dtype {
        DType::I32 | DType::I64 => Ok(()),
        _ => Err(Status::UNSUPPORTED_DTYPE),
    }
}

fn dims(spec: &TensorSpec) -> &[usize] {
    spec.dims.dims()
}

fn same_dims(a: &TensorSpec, b: &TensorSpec) -> Result<(), Status> {
    ensure(a.dims == b.dims)
}

fn packed_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

fn unravel(mut flat: usize, dims: &[usize], out: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        out[axis] = flat % dims[axis];
        flat /= dims[axis];
    }
}

fn ravel(idx: &[usize], strides: &[usize]) -> usize {
    idx.iter().zip(strides).map(|(&i, &s)| i * s).sum()
}

/// Independent lines along one axis of a packed row-major tensor.
struct Lines {
    len: usize,
    inner: usize,
    count: usize,
}

impl Lines {
    fn new(dims: &[usize], axis: usize) -> Self {
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        Self {
            len: dims[axis],
            inner,
            count: outer * inner,
        }
    }

    fn at(&self, line: usize, i: usize) -> usize {
        let (o, n) = (line / self.inner, line % self.inner);
        (o * self.len + i) * self.inner + n
    }
}

fn arange_len(start: f64, end: f64, step: f64) -> usize {
    ((end - start) / step).ceil().max(0.0) as usize
}

/// Output extent of a sliding window, if at least one position fits.
fn window_extent(input: usize, kernel: usize, stride: usize, pad: usize, dilation: usize) -> Option<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return None;
    }
    let span = dilation * (kernel - 1) + 1;
    let padded = input + 2 * pad;
    (padded >= span).then(|| (padded - span) / stride + 1)
}

fn reduced_dims(src: &[usize], axes: &[usize], keep_dims: bool) -> Vec<usize> {
    src.iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keep_dims) {
            (true, true) => Some(1),
            (true, false) => None,
            (false, _) => Some(d),
        })
        .collect()
}

/// Validates `op` and returns its workspace requirement in bytes.
pub(crate) fn plan(op: &DeviceOp, specs: &Specs) -> Result<u64, Status> {
    match op {
        DeviceOp::Unary { kind, src, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            if !matches!(kind, UnaryKind::Abs | UnaryKind::Neg | UnaryKind::Relu) {
                ensure_float(s)?;
                ensure_float(d)?;
            }
            Ok(0)
        }
        DeviceOp::Binary { lhs, rhs, dst, .. } => {
            let (l, r, d) = (get(specs, *lhs)?, get(specs, *rhs)?, get(specs, *dst)?);
            same_dims(l, r)?;
            same_dims(l, d)?;
            Ok(0)
        }
        DeviceOp::Muls { src, dst, .. } | DeviceOp::LeakyRelu { src, dst, .. } | DeviceOp::Copy { src, dst } => {
            same_dims(get(specs, *src)?, get(specs, *dst)?)?;
            Ok(0)
        }
        DeviceOp::Clamp { src, min, max, dst } => {
            same_dims(get(specs, *src)?, get(specs, *dst)?)?;
            ensure(min <= max)?;
            Ok(0)
        }
        DeviceOp::Fill { dst, .. } => {
            get(specs, *dst)?;
            Ok(0)
        }
        DeviceOp::Arange { start, end, step, dst } => {
            ensure(*step != 0.0 && step.is_finite() && start.is_finite() && end.is_finite())?;
            ensure(get(specs, *dst)?.num_elements() == arange_len(*start, *end, *step))?;
            Ok(0)
        }
        DeviceOp::Repeat { src, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(s.rank() == d.rank())?;
            for (&sd, &dd) in dims(s).iter().zip(dims(d)) {
                ensure(sd > 0 && dd % sd == 0)?;
            }
            Ok(0)
        }
        DeviceOp::Concat { srcs, dim, dst } => {
            let d = get(specs, *dst)?;
            ensure(!srcs.is_empty() && *dim < d.rank())?;
            let mut total = 0;
            for src in srcs {
                let s = get(specs, *src)?;
                ensure(s.rank() == d.rank())?;
                for (axis, (&sd, &dd)) in dims(s).iter().zip(dims(d)).enumerate() {
                    if axis != *dim {
                        ensure(sd == dd)?;
                    }
                }
                total += dims(s)[*dim];
            }
            ensure(total == dims(d)[*dim])?;
            Ok(0)
        }
        DeviceOp::ConstantPad { src, pads, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(pads.len() == s.rank() && s.rank() == d.rank())?;
            for ((&sd, &dd), &(before, after)) in dims(s).iter().zip(dims(d)).zip(pads) {
                ensure(sd + before + after == dd)?;
            }
            Ok(0)
        }
        DeviceOp::ReduceSum { src, axes, keep_dims, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(!axes.is_empty() && axes.iter().all(|&a| a < s.rank()))?;
            for (i, a) in axes.iter().enumerate() {
                ensure(!axes[..i].contains(a))?;
            }
            ensure(dims(d) == reduced_dims(dims(s), axes, *keep_dims).as_slice())?;
            Ok(STAT_BYTES * d.num_elements().max(1) as u64)
        }
        DeviceOp::ArgMax { src, axis, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(*axis < s.rank() && dims(s)[*axis] > 0)?;
            ensure_index(d)?;
            ensure(dims(d) == reduced_dims(dims(s), &[*axis], false).as_slice())?;
            Ok(STAT_BYTES * d.num_elements().max(1) as u64)
        }
        DeviceOp::Argsort { src, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(s.rank() >= 1)?;
            same_dims(s, d)?;
            ensure(d.dtype == DType::I64).map_err(|_| Status::UNSUPPORTED_DTYPE)?;
            Ok(STAT_BYTES * s.num_elements().max(1) as u64)
        }
        DeviceOp::LayerNorm { src, normalized_dims, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            ensure_float(s)?;
            ensure(*normalized_dims >= 1 && *normalized_dims <= s.rank())?;
            let chunk: usize = dims(s)[s.rank() - normalized_dims..].iter().product();
            let rows = s.num_elements() / chunk.max(1);
            Ok(2 * STAT_BYTES * rows.max(1) as u64)
        }
        DeviceOp::GroupNorm { src, groups, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            ensure_float(s)?;
            ensure(s.rank() >= 2 && *groups > 0 && dims(s)[1] % groups == 0)?;
            Ok(2 * STAT_BYTES * (dims(s)[0] * groups).max(1) as u64)
        }
        DeviceOp::RmsNorm { src, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            ensure_float(s)?;
            ensure(s.rank() >= 1)?;
            let rows = s.num_elements() / s.dims.last_dim().max(1);
            Ok(STAT_BYTES * rows.max(1) as u64)
        }
        DeviceOp::Softmax { src, axis, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            ensure_float(s)?;
            ensure(*axis < s.rank())?;
            Ok(STAT_BYTES * Lines::new(dims(s), *axis).count.max(1) as u64)
        }
        DeviceOp::IndexSelect { src, axis, index, dst } => {
            let (s, i, d) = (get(specs, *src)?, get(specs, *index)?, get(specs, *dst)?);
            ensure_index(i)?;
            ensure(i.rank() == 1 && *axis < s.rank() && s.dtype == d.dtype)?;
            let mut expected = dims(s).to_vec();
            expected[*axis] = i.num_elements();
            ensure(dims(d) == expected.as_slice())?;
            Ok(0)
        }
        DeviceOp::Triangular { src, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            same_dims(s, d)?;
            ensure(s.rank() >= 2)?;
            Ok(0)
        }
        DeviceOp::Im2col { src, window, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(s.rank() == 4 && d.rank() == 3)?;
            let &[n, c, h, w] = dims(s) else {
                return Err(Status::INVALID_PARAM);
            };
            let (oh, ow) = im2col_extent(h, w, window).ok_or(Status::INVALID_PARAM)?;
            let (kh, kw) = window.kernel;
            ensure(dims(d) == [n, c * kh * kw, oh * ow].as_slice())?;
            Ok(0)
        }
        DeviceOp::AvgPool2d { src, window, dst } | DeviceOp::MaxPool2d { src, window, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(s.rank() == 4 && d.rank() == 4)?;
            ensure_float(s)?;
            let (oh, ow) = pool_extent(dims(s)[2], dims(s)[3], window).ok_or(Status::INVALID_PARAM)?;
            ensure(dims(d) == [dims(s)[0], dims(s)[1], oh, ow].as_slice())?;
            Ok(0)
        }
        DeviceOp::UpsampleNearest2d { src, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            ensure(s.rank() == 4 && d.rank() == 4)?;
            ensure(dims(s)[..2] == dims(d)[..2])?;
            ensure(dims(s)[2] > 0 && dims(s)[3] > 0)?;
            Ok(0)
        }
        DeviceOp::Matmul { lhs, rhs, dst } => {
            let (l, r, d) = (get(specs, *lhs)?, get(specs, *rhs)?, get(specs, *dst)?);
            ensure_float(l)?;
            ensure_float(r)?;
            let rank = d.rank();
            ensure(rank >= 2 && l.rank() == rank && r.rank() == rank)?;
            let (ld, rd, dd) = (dims(l), dims(r), dims(d));
            ensure(ld[rank - 1] == rd[rank - 2])?;
            ensure(dd[rank - 2] == ld[rank - 2] && dd[rank - 1] == rd[rank - 1])?;
            for b in 0..rank - 2 {
                let expected = ld[b].max(rd[b]);
                ensure((ld[b] == 1 || ld[b] == expected) && (rd[b] == 1 || rd[b] == expected))?;
                ensure(dd[b] == expected)?;
            }
            Ok(0)
        }
        DeviceOp::RotaryEmbedding { src, cos, sin, mode, dst } => {
            let (s, c, sn, d) = (
                get(specs, *src)?,
                get(specs, *cos)?,
                get(specs, *sin)?,
                get(specs, *dst)?,
            );
            same_dims(s, d)?;
            ensure_float(s)?;
            ensure(matches!(mode, 0 | 1))?;
            ensure(s.rank() >= 1 && s.dims.last_dim() % 2 == 0)?;
            for table in [c, sn] {
                ensure(table.rank() == s.rank())?;
                for (&td, &sd) in dims(table).iter().zip(dims(s)) {
                    ensure(td == 1 || td == sd)?;
                }
            }
            Ok(0)
        }
    }
}

fn im2col_extent(h: usize, w: usize, win: &Window2d) -> Option<(usize, usize)> {
    Some((
        window_extent(h, win.kernel.0, win.stride.0, win.padding.0, win.dilation.0)?,
        window_extent(w, win.kernel.1, win.stride.1, win.padding.1, win.dilation.1)?,
    ))
}

fn pool_extent(h: usize, w: usize, win: &Window2d) -> Option<(usize, usize)> {
    Some((
        window_extent(h, win.kernel.0, win.stride.0, win.padding.0, 1)?,
        window_extent(w, win.kernel.1, win.stride.1, win.padding.1, 1)?,
    ))
}

fn unary(kind: UnaryKind, x: f64) -> f64 {
    let sigmoid = |v: f64| 1.0 / (1.0 + (-v).exp());
    let hardsigmoid = |v: f64| (v / 6.0 + 0.5).clamp(0.0, 1.0);
    match kind {
        UnaryKind::Abs => x.abs(),
        UnaryKind::Neg => -x,
        UnaryKind::Exp => x.exp(),
        UnaryKind::Log => x.ln(),
        UnaryKind::Sqrt => x.sqrt(),
        UnaryKind::Sin => x.sin(),
        UnaryKind::Cos => x.cos(),
        UnaryKind::Gelu => {
            let c = (2.0 / std::f64::consts::PI).sqrt();
            0.5 * x * (1.0 + (c * (x + 0.044715 * x * x * x)).tanh())
        }
        UnaryKind::Silu => x * sigmoid(x),
        UnaryKind::Tanh => x.tanh(),
        UnaryKind::Relu => x.max(0.0),
        UnaryKind::Sigmoid => sigmoid(x),
        UnaryKind::Hardsigmoid => hardsigmoid(x),
        UnaryKind::Hardswish => x * hardsigmoid(x),
    }
}

/// Writes per-row statistics into the workspace, exactly `size` bytes.
fn stash(mem: &mut DeviceMemory, ws: Option<DevicePtr>, size: u64, stats: &[f64]) -> Result<(), Status> {
    let Some(ptr) = ws else {
        return if size == 0 { Ok(()) } else { Err(Status::NULL_POINTER) };
    };
    let mut bytes: Vec<u8> = stats.iter().flat_map(|v| v.to_le_bytes()).collect();
    bytes.resize(size as usize, 0);
    mem.write(ptr, &bytes)
}

fn map_indices(
    dst_dims: &[usize],
    src_dims: &[usize],
    mut map: impl FnMut(&[usize], &mut [usize]) -> bool,
) -> Vec<Option<usize>> {
    let total: usize = dst_dims.iter().product();
    let src_strides = packed_strides(src_dims);
    let mut idx = vec![0usize; dst_dims.len()];
    let mut src_idx = vec![0usize; src_dims.len()];
    (0..total)
        .map(|flat| {
            unravel(flat, dst_dims, &mut idx);
            map(&idx, &mut src_idx).then(|| ravel(&src_idx, &src_strides))
        })
        .collect()
}

/// Runs a planned operator against device memory.
pub(crate) fn execute(mem: &mut DeviceMemory, p: &Prepared, ws: Option<DevicePtr>) -> Result<(), Status> {
    let specs = &p.specs;
    match &p.op {
        DeviceOp::Unary { kind, src, dst } => {
            let x = mem.load(get(specs, *src)?)?;
            let y: Vec<f64> = x.into_iter().map(|v| unary(*kind, v)).collect();
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::Binary { kind, lhs, rhs, dst, alpha } => {
            let l = mem.load(get(specs, *lhs)?)?;
            let r = mem.load(get(specs, *rhs)?)?;
            let alpha = *alpha as f64;
            let y: Vec<f64> = l
                .iter()
                .zip(&r)
                .map(|(&a, &b)| match kind {
                    BinaryKind::Add => a + alpha * b,
                    BinaryKind::Sub => a - alpha * b,
                    BinaryKind::Mul => a * b,
                    BinaryKind::Div => a / b,
                })
                .collect();
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::Muls { src, scalar, dst } => {
            let x = mem.load(get(specs, *src)?)?;
            let s = *scalar as f64;
            mem.store(get(specs, *dst)?, &x.iter().map(|v| v * s).collect::<Vec<_>>())
        }
        DeviceOp::Clamp { src, min, max, dst } => {
            let x = mem.load(get(specs, *src)?)?;
            let (lo, hi) = (*min as f64, *max as f64);
            mem.store(get(specs, *dst)?, &x.iter().map(|v| v.max(lo).min(hi)).collect::<Vec<_>>())
        }
        DeviceOp::LeakyRelu { src, negative_slope, dst } => {
            let x = mem.load(get(specs, *src)?)?;
            let slope = *negative_slope as f64;
            let y: Vec<f64> = x.iter().map(|&v| v.max(0.0) + slope * v.min(0.0)).collect();
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::Copy { src, dst } => {
            let x = mem.load(get(specs, *src)?)?;
            mem.store(get(specs, *dst)?, &x)
        }
        DeviceOp::Fill { dst, value } => {
            let d = get(specs, *dst)?;
            mem.store(d, &vec![*value; d.num_elements()])
        }
        DeviceOp::Arange { start, step, dst, .. } => {
            let d = get(specs, *dst)?;
            let y: Vec<f64> = (0..d.num_elements()).map(|i| start + i as f64 * step).collect();
            mem.store(d, &y)
        }
        DeviceOp::Repeat { src, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let sd = dims(s);
            let y: Vec<f64> = map_indices(dims(d), sd, |idx, out| {
                for (axis, &i) in idx.iter().enumerate() {
                    out[axis] = i % sd[axis];
                }
                true
            })
            .into_iter()
            .map(|i| i.map_or(0.0, |i| x[i]))
            .collect();
            mem.store(d, &y)
        }
        DeviceOp::Concat { srcs, dim, dst } => {
            let d = get(specs, *dst)?;
            let mut parts = Vec::with_capacity(srcs.len());
            for src in srcs {
                let s = get(specs, *src)?;
                parts.push((dims(s).to_vec(), packed_strides(dims(s)), mem.load(s)?));
            }
            let dd = dims(d);
            let mut idx = vec![0usize; dd.len()];
            let mut y = Vec::with_capacity(d.num_elements());
            for flat in 0..d.num_elements() {
                unravel(flat, dd, &mut idx);
                let mut pos = idx[*dim];
                for (sdims, strides, values) in &parts {
                    if pos < sdims[*dim] {
                        let mut local = idx.clone();
                        local[*dim] = pos;
                        y.push(values[ravel(&local, strides)]);
                        break;
                    }
                    pos -= sdims[*dim];
                }
            }
            mem.store(d, &y)
        }
        DeviceOp::ConstantPad { src, pads, value, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let sd = dims(s);
            let y: Vec<f64> = map_indices(dims(d), sd, |idx, out| {
                for (axis, &i) in idx.iter().enumerate() {
                    let before = pads[axis].0;
                    if i < before || i - before >= sd[axis] {
                        return false;
                    }
                    out[axis] = i - before;
                }
                true
            })
            .into_iter()
            .map(|i| i.map_or(*value, |i| x[i]))
            .collect();
            mem.store(d, &y)
        }
        // Dropping size-1 axes leaves the packed order unchanged, so the sums
        // are laid out the same with or without `keep_dims`.
        DeviceOp::ReduceSum { src, axes, dst, .. } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let sd = dims(s);
            let kept: Vec<usize> = reduced_dims(sd, axes, true);
            let kept_strides = packed_strides(&kept);
            let mut sums = vec![0.0f64; d.num_elements()];
            let mut idx = vec![0usize; sd.len()];
            for (flat, v) in x.iter().enumerate() {
                unravel(flat, sd, &mut idx);
                for &a in axes {
                    idx[a] = 0;
                }
                sums[ravel(&idx, &kept_strides)] += v;
            }
            stash(mem, ws, p.workspace, &sums)?;
            mem.store(d, &sums)
        }
        DeviceOp::ArgMax { src, axis, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let lines = Lines::new(dims(s), *axis);
            let mut best = Vec::with_capacity(lines.count);
            let mut maxima = Vec::with_capacity(lines.count);
            for line in 0..lines.count {
                let mut arg = 0;
                for i in 1..lines.len {
                    if x[lines.at(line, i)] > x[lines.at(line, arg)] {
                        arg = i;
                    }
                }
                maxima.push(x[lines.at(line, arg)]);
                best.push(arg as f64);
            }
            stash(mem, ws, p.workspace, &maxima)?;
            mem.store(d, &best)
        }
        DeviceOp::Argsort { src, descending, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let lines = Lines::new(dims(s), s.rank() - 1);
            let mut y = vec![0.0f64; x.len()];
            for line in 0..lines.count {
                let mut order: Vec<usize> = (0..lines.len).collect();
                let key = |i: &usize| x[lines.at(line, *i)];
                order.sort_by(|a, b| {
                    let ord = key(a).total_cmp(&key(b));
                    if *descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
                for (rank, i) in order.into_iter().enumerate() {
                    y[lines.at(line, rank)] = i as f64;
                }
            }
            stash(mem, ws, p.workspace, &x)?;
            mem.store(d, &y)
        }
        DeviceOp::LayerNorm { src, normalized_dims, eps, dst } => {
            let s = get(specs, *src)?;
            let chunk: usize = dims(s)[s.rank() - normalized_dims..].iter().product();
            let mut x = mem.load(s)?;
            let stats = normalize_chunks(&mut x, chunk, *eps as f64);
            stash(mem, ws, p.workspace, &stats)?;
            mem.store(get(specs, *dst)?, &x)
        }
        DeviceOp::GroupNorm { src, groups, eps, dst } => {
            let s = get(specs, *src)?;
            let chunk = s.num_elements() / (dims(s)[0] * groups).max(1);
            let mut x = mem.load(s)?;
            let stats = normalize_chunks(&mut x, chunk, *eps as f64);
            stash(mem, ws, p.workspace, &stats)?;
            mem.store(get(specs, *dst)?, &x)
        }
        DeviceOp::RmsNorm { src, eps, dst } => {
            let s = get(specs, *src)?;
            let chunk = s.dims.last_dim().max(1);
            let mut x = mem.load(s)?;
            let mut rstd = Vec::new();
            for row in x.chunks_mut(chunk) {
                let ms = row.iter().map(|v| v * v).sum::<f64>() / row.len() as f64;
                let r = 1.0 / (ms + *eps as f64).sqrt();
                row.iter_mut().for_each(|v| *v *= r);
                rstd.push(r);
            }
            stash(mem, ws, p.workspace, &rstd)?;
            mem.store(get(specs, *dst)?, &x)
        }
        DeviceOp::Softmax { src, axis, dst } => {
            let s = get(specs, *src)?;
            let x = mem.load(s)?;
            let lines = Lines::new(dims(s), *axis);
            let mut y = vec![0.0f64; x.len()];
            let mut maxima = Vec::with_capacity(lines.count);
            for line in 0..lines.count {
                let max = (0..lines.len)
                    .map(|i| x[lines.at(line, i)])
                    .fold(f64::NEG_INFINITY, f64::max);
                let mut sum = 0.0;
                for i in 0..lines.len {
                    let e = (x[lines.at(line, i)] - max).exp();
                    y[lines.at(line, i)] = e;
                    sum += e;
                }
                for i in 0..lines.len {
                    y[lines.at(line, i)] /= sum;
                }
                maxima.push(max);
            }
            stash(mem, ws, p.workspace, &maxima)?;
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::IndexSelect { src, axis, index, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let picks = mem.load(get(specs, *index)?)?;
            let limit = dims(s)[*axis];
            let mut rows = Vec::with_capacity(picks.len());
            for v in picks {
                if v < 0.0 || v as usize >= limit {
                    return Err(Status::KERNEL_FAILED);
                }
                rows.push(v as usize);
            }
            let y: Vec<f64> = map_indices(dims(d), dims(s), |idx, out| {
                out.copy_from_slice(idx);
                out[*axis] = rows[idx[*axis]];
                true
            })
            .into_iter()
            .map(|i| i.map_or(0.0, |i| x[i]))
            .collect();
            mem.store(d, &y)
        }
        DeviceOp::Triangular { src, diagonal, upper, dst } => {
            let s = get(specs, *src)?;
            let x = mem.load(s)?;
            let sd = dims(s);
            let (rows, cols) = (sd[sd.len() - 2], sd[sd.len() - 1]);
            let y: Vec<f64> = x
                .iter()
                .enumerate()
                .map(|(flat, &v)| {
                    let row = (flat / cols % rows) as i64;
                    let col = (flat % cols) as i64;
                    let keep = if *upper {
                        col - row >= *diagonal
                    } else {
                        col - row <= *diagonal
                    };
                    if keep {
                        v
                    } else {
                        0.0
                    }
                })
                .collect();
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::Im2col { src, window, dst } => {
            let s = get(specs, *src)?;
            let x = mem.load(s)?;
            let &[n, c, h, w] = dims(s) else {
                return Err(Status::INVALID_PARAM);
            };
            let (oh, ow) = im2col_extent(h, w, window).ok_or(Status::INVALID_PARAM)?;
            let (kh, kw) = window.kernel;
            let mut y = Vec::with_capacity(n * c * kh * kw * oh * ow);
            for b in 0..n {
                for ch in 0..c {
                    for ky in 0..kh {
                        for kx in 0..kw {
                            for oy in 0..oh {
                                for ox in 0..ow {
                                    let iy = (oy * window.stride.0 + ky * window.dilation.0) as i64
                                        - window.padding.0 as i64;
                                    let ix = (ox * window.stride.1 + kx * window.dilation.1) as i64
                                        - window.padding.1 as i64;
                                    let inside = (0..h as i64).contains(&iy) && (0..w as i64).contains(&ix);
                                    y.push(if inside {
                                        x[((b * c + ch) * h + iy as usize) * w + ix as usize]
                                    } else {
                                        0.0
                                    });
                                }
                            }
                        }
                    }
                }
            }
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::AvgPool2d { src, window, dst } | DeviceOp::MaxPool2d { src, window, dst } => {
            let is_max = matches!(p.op, DeviceOp::MaxPool2d { .. });
            let s = get(specs, *src)?;
            let x = mem.load(s)?;
            let (planes, h, w) = (dims(s)[0] * dims(s)[1], dims(s)[2], dims(s)[3]);
            let (oh, ow) = pool_extent(h, w, window).ok_or(Status::INVALID_PARAM)?;
            let (kh, kw) = window.kernel;
            let mut y = Vec::with_capacity(planes * oh * ow);
            for plane in 0..planes {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut acc = if is_max { f64::NEG_INFINITY } else { 0.0 };
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = (oy * window.stride.0 + ky) as i64 - window.padding.0 as i64;
                                let ix = (ox * window.stride.1 + kx) as i64 - window.padding.1 as i64;
                                if !(0..h as i64).contains(&iy) || !(0..w as i64).contains(&ix) {
                                    continue;
                                }
                                let v = x[(plane * h + iy as usize) * w + ix as usize];
                                acc = if is_max { acc.max(v) } else { acc + v };
                            }
                        }
                        y.push(if is_max { acc } else { acc / (kh * kw) as f64 });
                    }
                }
            }
            mem.store(get(specs, *dst)?, &y)
        }
        DeviceOp::UpsampleNearest2d { src, dst } => {
            let (s, d) = (get(specs, *src)?, get(specs, *dst)?);
            let x = mem.load(s)?;
            let (h, w) = (dims(s)[2], dims(s)[3]);
            let (oh, ow) = (dims(d)[2], dims(d)[3]);
            let y: Vec<f64> = map_indices(dims(d), dims(s), |idx, out| {
                out[0] = idx[0];
                out[1] = idx[1];
                out[2] = idx[2] * h / oh;
                out[3] = idx[3] * w / ow;
                true
            })
            .into_iter()
            .map(|i| i.map_or(0.0, |i| x[i]))
            .collect();
            mem.store(d, &y)
        }
        DeviceOp::Matmul { lhs, rhs, dst } => {
            let (l, r, d) = (get(specs, *lhs)?, get(specs, *rhs)?, get(specs, *dst)?);
            let (a, b) = (mem.load(l)?, mem.load(r)?);
            let rank = d.rank();
            let (ld, rd, dd) = (dims(l), dims(r), dims(d));
            let (m, k, n) = (ld[rank - 2], ld[rank - 1], rd[rank - 1]);
            let batch_dims = &dd[..rank - 2];
            let l_strides = packed_strides(&ld[..rank - 2]);
            let r_strides = packed_strides(&rd[..rank - 2]);
            let batches: usize = batch_dims.iter().product();
            let mut idx = vec![0usize; rank - 2];
            let mut y = Vec::with_capacity(d.num_elements());
            for batch in 0..batches {
                unravel(batch, batch_dims, &mut idx);
                let mut lb = 0;
                let mut rb = 0;
                for (axis, &i) in idx.iter().enumerate() {
                    if ld[axis] != 1 {
                        lb += i * l_strides[axis];
                    }
                    if rd[axis] != 1 {
                        rb += i * r_strides[axis];
                    }
                }
                let (la, ra) = (lb * m * k, rb * k * n);
                for row in 0..m {
                    for col in 0..n {
                        let dot: f64 = (0..k).map(|t| a[la + row * k + t] * b[ra + t * n + col]).sum();
                        y.push(dot);
                    }
                }
            }
            mem.store(d, &y)
        }
        DeviceOp::RotaryEmbedding { src, cos, sin, mode, dst } => {
            let s = get(specs, *src)?;
            let (cs, ss) = (get(specs, *cos)?, get(specs, *sin)?);
            let x = mem.load(s)?;
            let (cv, sv) = (mem.load(cs)?, mem.load(ss)?);
            let sd = dims(s);
            let head = s.dims.last_dim();
            let half = head / 2;
            let table_index = |table: &TensorSpec| {
                let td = dims(table);
                map_indices(sd, td, |idx, out| {
                    for (axis, &i) in idx.iter().enumerate() {
                        out[axis] = if td[axis] == 1 { 0 } else { i };
                    }
                    true
                })
            };
            let (ci, si) = (table_index(cs), table_index(ss));
            let mut y = Vec::with_capacity(x.len());
            for (flat, &v) in x.iter().enumerate() {
                let d = flat % head;
                let row = flat - d;
                let rotated = match mode {
                    0 if d < half => -x[row + d + half],
                    0 => x[row + d - half],
                    _ if d % 2 == 0 => -x[row + d + 1],
                    _ => x[row + d - 1],
                };
                let c = ci[flat].map_or(0.0, |i| cv[i]);
                let sn = si[flat].map_or(0.0, |i| sv[i]);
                y.push(v * c + rotated * sn);
            }
            mem.store(get(specs, *dst)?, &y)
        }
    }
}

/// Normalizes each `chunk`-sized run to zero mean and unit variance.
/// Returns `(mean, rstd)` pairs.
fn normalize_chunks(x: &mut [f64], chunk: usize, eps: f64) -> Vec<f64> {
    let mut stats = Vec::new();
    for run in x.chunks_mut(chunk.max(1)) {
        let n = run.len() as f64;
        let mean = run.iter().sum::<f64>() / n;
        let var = run.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let rstd = 1.0 / (var + eps).sqrt();
        run.iter_mut().for_each(|v| *v = (*v - mean) * rstd);
        stats.push(mean);
        stats.push(rstd);
    }
    stats
}
