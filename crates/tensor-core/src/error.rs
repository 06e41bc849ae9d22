// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor descriptors and host buffers.

use crate::DType;

/// Errors raised while building or interpreting tensor descriptors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// More dimensions than the graph engine supports.
    #[error("rank {rank} exceeds the maximum of {max}")]
    RankTooLarge { rank: usize, max: usize },

    /// A byte stride or offset is not a whole number of elements.
    #[error("{what} of {bytes} bytes is not a multiple of the {dtype} element size")]
    Misaligned {
        what: &'static str,
        bytes: usize,
        dtype: DType,
    },

    /// A reshape or reinterpretation changes the element count.
    #[error("cannot reshape {from:?} into {to:?}")]
    InvalidReshape { from: Vec<usize>, to: Vec<usize> },

    /// The operation needs a densely packed tensor.
    #[error("operation '{op}' requires a contiguous tensor")]
    NotContiguous { op: &'static str },
}
