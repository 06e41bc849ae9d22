// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Opcodes of the tensor-graph engine.

use std::fmt;

/// The abstract operator a graph node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    // Elementwise binary, broadcast-aware.
    Add,
    Sub,
    Mul,
    Div,
    // Elementwise with parameters.
    Sqr,
    Scale,
    Clamp,
    LeakyRelu,
    // Elementwise unary.
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
    // Layout.
    Repeat,
    Concat,
    Arange,
    Argsort,
    Upscale,
    Pad,
    Dup,
    Cpy,
    Cont,
    Acc,
    // Normalisation.
    Norm,
    GroupNorm,
    RmsNorm,
    // Reductions.
    SumRows,
    Sum,
    Argmax,
    // Attention helpers.
    DiagMaskInf,
    DiagMaskZero,
    SoftMax,
    Rope,
    TimestepEmbedding,
    // Linear algebra and gather.
    MulMat,
    GetRows,
    // Convolution helpers.
    Im2col,
    #[serde(rename = "pool_2d")]
    Pool2d,
}

impl OpKind {
    /// Every opcode, in declaration order.
    pub const ALL: [OpKind; 47] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Sqr,
        Self::Scale,
        Self::Clamp,
        Self::LeakyRelu,
        Self::Abs,
        Self::Neg,
        Self::Exp,
        Self::Log,
        Self::Sqrt,
        Self::Sin,
        Self::Cos,
        Self::Gelu,
        Self::Silu,
        Self::Tanh,
        Self::Relu,
        Self::Sigmoid,
        Self::Hardsigmoid,
        Self::Hardswish,
        Self::Repeat,
        Self::Concat,
        Self::Arange,
        Self::Argsort,
        Self::Upscale,
        Self::Pad,
        Self::Dup,
        Self::Cpy,
        Self::Cont,
        Self::Acc,
        Self::Norm,
        Self::GroupNorm,
        Self::RmsNorm,
        Self::SumRows,
        Self::Sum,
        Self::Argmax,
        Self::DiagMaskInf,
        Self::DiagMaskZero,
        Self::SoftMax,
        Self::Rope,
        Self::TimestepEmbedding,
        Self::MulMat,
        Self::GetRows,
        Self::Im2col,
        Self::Pool2d,
    ];

    /// Returns the manifest spelling of the opcode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Sqr => "sqr",
            Self::Scale => "scale",
            Self::Clamp => "clamp",
            Self::LeakyRelu => "leaky_relu",
            Self::Abs => "abs",
            Self::Neg => "neg",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Gelu => "gelu",
            Self::Silu => "silu",
            Self::Tanh => "tanh",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Hardsigmoid => "hardsigmoid",
            Self::Hardswish => "hardswish",
            Self::Repeat => "repeat",
            Self::Concat => "concat",
            Self::Arange => "arange",
            Self::Argsort => "argsort",
            Self::Upscale => "upscale",
            Self::Pad => "pad",
            Self::Dup => "dup",
            Self::Cpy => "cpy",
            Self::Cont => "cont",
            Self::Acc => "acc",
            Self::Norm => "norm",
            Self::GroupNorm => "group_norm",
            Self::RmsNorm => "rms_norm",
            Self::SumRows => "sum_rows",
            Self::Sum => "sum",
            Self::Argmax => "argmax",
            Self::DiagMaskInf => "diag_mask_inf",
            Self::DiagMaskZero => "diag_mask_zero",
            Self::SoftMax => "soft_max",
            Self::Rope => "rope",
            Self::TimestepEmbedding => "timestep_embedding",
            Self::MulMat => "mul_mat",
            Self::GetRows => "get_rows",
            Self::Im2col => "im2col",
            Self::Pool2d => "pool_2d",
        }
    }

    /// Parses an opcode from a manifest string.
    ///
    /// Case-insensitive; accepts the upper-case graph-engine spelling
    /// (`"MUL_MAT"`) and a few common aliases (`"matmul"`, `"softmax"`,
    /// `"layer_norm"`, `"copy"`).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        let canonical = match lower.as_str() {
            "matmul" => "mul_mat",
            "softmax" => "soft_max",
            "layer_norm" | "layernorm" => "norm",
            "copy" => "cpy",
            "pool2d" => "pool_2d",
            "rmsnorm" => "rms_norm",
            "groupnorm" => "group_norm",
            other => other,
        };
        Self::ALL.iter().copied().find(|op| op.as_str() == canonical)
    }

    /// Minimum and maximum number of source tensors.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::Arange => (0, 0),
            Self::Add | Self::Sub | Self::Mul | Self::Div => (2, 2),
            Self::Concat | Self::Acc | Self::MulMat | Self::GetRows | Self::Im2col => (2, 2),
            Self::Cpy | Self::SoftMax => (1, 2),
            Self::Rope => (2, 3),
            _ => (1, 1),
        }
    }

    /// Returns `true` for the opcodes routed through the binary template.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_round_trips_through_its_name() {
        for op in OpKind::ALL {
            assert_eq!(OpKind::from_str_loose(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_from_str_loose_aliases() {
        assert_eq!(OpKind::from_str_loose("MUL_MAT"), Some(OpKind::MulMat));
        assert_eq!(OpKind::from_str_loose("softmax"), Some(OpKind::SoftMax));
        assert_eq!(OpKind::from_str_loose("layer_norm"), Some(OpKind::Norm));
        assert_eq!(OpKind::from_str_loose("conv3d"), None);
    }

    #[test]
    fn test_arity() {
        assert_eq!(OpKind::Add.arity(), (2, 2));
        assert_eq!(OpKind::Arange.arity(), (0, 0));
        assert_eq!(OpKind::SoftMax.arity(), (1, 2));
        assert_eq!(OpKind::Rope.arity(), (2, 3));
        assert_eq!(OpKind::Gelu.arity(), (1, 1));
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&OpKind::TimestepEmbedding).unwrap();
        assert_eq!(json, "\"timestep_embedding\"");
        let back: OpKind = serde_json::from_str("\"pool_2d\"").unwrap();
        assert_eq!(back, OpKind::Pool2d);
    }
}
