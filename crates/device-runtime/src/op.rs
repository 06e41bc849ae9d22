// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator surface exposed by the runtime.
//!
//! Each [`DeviceOp`] names one library operator together with the tensor
//! handles and scalar arguments it is planned with. Axes and dimension
//! lists are row-major, matching [`TensorSpec`](crate::TensorSpec).

use crate::RawTensor;

/// Elementwise single-input functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryKind {
    Abs,
    Neg,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Gelu,
    Silu,
    Tanh,
    Relu,
    Sigmoid,
    Hardsigmoid,
    Hardswish,
}

impl UnaryKind {
    pub const ALL: [UnaryKind; 14] = [
        UnaryKind::Abs,
        UnaryKind::Neg,
        UnaryKind::Exp,
        UnaryKind::Log,
        UnaryKind::Sqrt,
        UnaryKind::Sin,
        UnaryKind::Cos,
        UnaryKind::Gelu,
        UnaryKind::Silu,
        UnaryKind::Tanh,
        UnaryKind::Relu,
        UnaryKind::Sigmoid,
        UnaryKind::Hardsigmoid,
        UnaryKind::Hardswish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnaryKind::Abs => "Abs",
            UnaryKind::Neg => "Neg",
            UnaryKind::Exp => "Exp",
            UnaryKind::Log => "Log",
            UnaryKind::Sqrt => "Sqrt",
            UnaryKind::Sin => "Sin",
            UnaryKind::Cos => "Cos",
            UnaryKind::Gelu => "Gelu",
            UnaryKind::Silu => "Silu",
            UnaryKind::Tanh => "Tanh",
            UnaryKind::Relu => "Relu",
            UnaryKind::Sigmoid => "Sigmoid",
            UnaryKind::Hardsigmoid => "Hardsigmoid",
            UnaryKind::Hardswish => "Hardswish",
        }
    }
}

/// Elementwise two-input arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    /// `lhs + alpha * rhs`
    Add,
    /// `lhs - alpha * rhs`
    Sub,
    Mul,
    Div,
}

impl BinaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryKind::Add => "Add",
            BinaryKind::Sub => "Sub",
            BinaryKind::Mul => "Mul",
            BinaryKind::Div => "Div",
        }
    }
}

/// Window geometry for 2-D pooling and patch extraction: `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window2d {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
}

/// A planned library operator.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    Unary {
        kind: UnaryKind,
        src: RawTensor,
        dst: RawTensor,
    },
    /// Requires identical shapes on all three tensors.
    Binary {
        kind: BinaryKind,
        lhs: RawTensor,
        rhs: RawTensor,
        dst: RawTensor,
        alpha: f32,
    },
    Muls {
        src: RawTensor,
        scalar: f32,
        dst: RawTensor,
    },
    Clamp {
        src: RawTensor,
        min: f32,
        max: f32,
        dst: RawTensor,
    },
    LeakyRelu {
        src: RawTensor,
        negative_slope: f32,
        dst: RawTensor,
    },
    /// Shape-preserving copy with dtype conversion.
    Copy {
        src: RawTensor,
        dst: RawTensor,
    },
    Fill {
        dst: RawTensor,
        value: f64,
    },
    /// `dst[i] = start + i * step` for every `i` below `ceil((end - start) / step)`.
    Arange {
        start: f64,
        end: f64,
        step: f64,
        dst: RawTensor,
    },
    /// Tiles `src` so each destination extent is a multiple of the source's.
    Repeat {
        src: RawTensor,
        dst: RawTensor,
    },
    Concat {
        srcs: Vec<RawTensor>,
        dim: usize,
        dst: RawTensor,
    },
    /// `(before, after)` padding per dimension.
    ConstantPad {
        src: RawTensor,
        pads: Vec<(usize, usize)>,
        value: f64,
        dst: RawTensor,
    },
    ReduceSum {
        src: RawTensor,
        axes: Vec<usize>,
        keep_dims: bool,
        dst: RawTensor,
    },
    /// Index of the maximum along `axis`; the axis is removed from `dst`.
    ArgMax {
        src: RawTensor,
        axis: usize,
        dst: RawTensor,
    },
    /// Sorting permutation along the last axis into an `I64` destination.
    Argsort {
        src: RawTensor,
        descending: bool,
        dst: RawTensor,
    },
    /// Normalizes over the trailing `normalized_dims` dimensions.
    LayerNorm {
        src: RawTensor,
        normalized_dims: usize,
        eps: f32,
        dst: RawTensor,
    },
    /// `src` is `(N, C, H, W)`; channels split into `groups`.
    GroupNorm {
        src: RawTensor,
        groups: usize,
        eps: f32,
        dst: RawTensor,
    },
    /// Normalizes over the last dimension.
    RmsNorm {
        src: RawTensor,
        eps: f32,
        dst: RawTensor,
    },
    Softmax {
        src: RawTensor,
        axis: usize,
        dst: RawTensor,
    },
    IndexSelect {
        src: RawTensor,
        axis: usize,
        index: RawTensor,
        dst: RawTensor,
    },
    /// Keeps the upper (`col - row >= diagonal`) or lower
    /// (`col - row <= diagonal`) triangle of the last two dimensions and
    /// zeroes the rest.
    Triangular {
        src: RawTensor,
        diagonal: i64,
        upper: bool,
        dst: RawTensor,
    },
    /// `(N, C, H, W)` to `(N, C * kh * kw, OH * OW)`.
    Im2col {
        src: RawTensor,
        window: Window2d,
        dst: RawTensor,
    },
    /// Padding counts toward the divisor.
    AvgPool2d {
        src: RawTensor,
        window: Window2d,
        dst: RawTensor,
    },
    MaxPool2d {
        src: RawTensor,
        window: Window2d,
        dst: RawTensor,
    },
    /// Output size is taken from `dst`.
    UpsampleNearest2d {
        src: RawTensor,
        dst: RawTensor,
    },
    /// `(.., M, K) x (.., K, N)`; batch dimensions broadcast.
    Matmul {
        lhs: RawTensor,
        rhs: RawTensor,
        dst: RawTensor,
    },
    /// `dst = src * cos + rotate(src) * sin`, where mode 0 rotates halves and
    /// mode 1 rotates interleaved pairs. `cos`/`sin` broadcast against `src`.
    RotaryEmbedding {
        src: RawTensor,
        cos: RawTensor,
        sin: RawTensor,
        mode: i64,
        dst: RawTensor,
    },
}

impl DeviceOp {
    /// Library name of the operator.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceOp::Unary { kind, .. } => kind.as_str(),
            DeviceOp::Binary { kind, .. } => kind.as_str(),
            DeviceOp::Muls { .. } => "Muls",
            DeviceOp::Clamp { .. } => "Clamp",
            DeviceOp::LeakyRelu { .. } => "LeakyRelu",
            DeviceOp::Copy { .. } => "InplaceCopy",
            DeviceOp::Fill { .. } => "InplaceFillScalar",
            DeviceOp::Arange { .. } => "Arange",
            DeviceOp::Repeat { .. } => "Repeat",
            DeviceOp::Concat { .. } => "Cat",
            DeviceOp::ConstantPad { .. } => "ConstantPadNd",
            DeviceOp::ReduceSum { .. } => "ReduceSum",
            DeviceOp::ArgMax { .. } => "ArgMax",
            DeviceOp::Argsort { .. } => "Argsort",
            DeviceOp::LayerNorm { .. } => "LayerNorm",
            DeviceOp::GroupNorm { .. } => "GroupNorm",
            DeviceOp::RmsNorm { .. } => "RmsNorm",
            DeviceOp::Softmax { .. } => "Softmax",
            DeviceOp::IndexSelect { .. } => "IndexSelect",
            DeviceOp::Triangular { upper: true, .. } => "Triu",
            DeviceOp::Triangular { upper: false, .. } => "Tril",
            DeviceOp::Im2col { .. } => "Im2col",
            DeviceOp::AvgPool2d { .. } => "AvgPool2d",
            DeviceOp::MaxPool2d { .. } => "MaxPool2d",
            DeviceOp::UpsampleNearest2d { .. } => "UpsampleNearest2d",
            DeviceOp::Matmul { .. } => "Matmul",
            DeviceOp::RotaryEmbedding { .. } => "RotaryPositionEmbedding",
        }
    }

    /// Every tensor handle the operator reads or writes.
    pub fn tensors(&self) -> Vec<RawTensor> {
        match self {
            DeviceOp::Unary { src, dst, .. }
            | DeviceOp::Muls { src, dst, .. }
            | DeviceOp::Clamp { src, dst, .. }
            | DeviceOp::LeakyRelu { src, dst, .. }
            | DeviceOp::Copy { src, dst }
            | DeviceOp::Repeat { src, dst }
            | DeviceOp::ConstantPad { src, dst, .. }
            | DeviceOp::ReduceSum { src, dst, .. }
            | DeviceOp::ArgMax { src, dst, .. }
            | DeviceOp::Argsort { src, dst, .. }
            | DeviceOp::LayerNorm { src, dst, .. }
            | DeviceOp::GroupNorm { src, dst, .. }
            | DeviceOp::RmsNorm { src, dst, .. }
            | DeviceOp::Softmax { src, dst, .. }
            | DeviceOp::Triangular { src, dst, .. }
            | DeviceOp::Im2col { src, dst, .. }
            | DeviceOp::AvgPool2d { src, dst, .. }
            | DeviceOp::MaxPool2d { src, dst, .. }
            | DeviceOp::UpsampleNearest2d { src, dst } => vec![*src, *dst],
            DeviceOp::Binary { lhs, rhs, dst, .. } | DeviceOp::Matmul { lhs, rhs, dst } => {
                vec![*lhs, *rhs, *dst]
            }
            DeviceOp::IndexSelect { src, index, dst, .. } => vec![*src, *index, *dst],
            DeviceOp::RotaryEmbedding { src, cos, sin, dst, .. } => vec![*src, *cos, *sin, *dst],
            DeviceOp::Fill { dst, .. } | DeviceOp::Arange { dst, .. } => vec![*dst],
            DeviceOp::Concat { srcs, dst, .. } => {
                let mut all = srcs.clone();
                all.push(*dst);
                all
            }
        }
    }
}
