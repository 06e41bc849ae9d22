// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for operator dispatch.

use device_runtime::Status;
use std::fmt;

/// The runtime call that reported a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Phase {
    WorkspaceQuery,
    Launch,
    TensorCreate,
    TensorDestroy,
    Synchronize,
    Memcpy,
    Malloc,
    Stream,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::WorkspaceQuery => "workspace query",
            Phase::Launch => "launch",
            Phase::TensorCreate => "tensor create",
            Phase::TensorDestroy => "tensor destroy",
            Phase::Synchronize => "synchronize",
            Phase::Memcpy => "memcpy",
            Phase::Malloc => "malloc",
            Phase::Stream => "stream setup",
        })
    }
}

/// Errors raised while dispatching operators to the device.
///
/// Shape, broadcast and parameter errors are detected before any device
/// call. Device errors are fatal for the enclosing graph evaluation; nothing
/// is retried.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Two extents differ and neither is 1.
    #[error("cannot broadcast dimension {dim}: {lhs} vs {rhs}")]
    Broadcast { dim: usize, lhs: usize, rhs: usize },

    /// Source and destination shapes do not fit the operator.
    #[error("shape mismatch in '{op}': {detail}")]
    ShapeMismatch { op: String, detail: String },

    /// The operator does not support this dtype, rank or feature.
    #[error("'{op}' does not support {detail}")]
    Unsupported { op: String, detail: String },

    /// A node parameter is missing, mistyped or out of range.
    #[error("invalid parameters for '{op}': {detail}")]
    InvalidParams { op: String, detail: String },

    /// A runtime call returned a non-success status.
    #[error("device {phase} failed for '{op}': {status}")]
    Device {
        op: String,
        phase: Phase,
        status: Status,
    },

    /// Scratch memory could not be acquired or returned.
    #[error("memory error: {0}")]
    Memory(#[from] memory_manager::MemoryError),

    /// A tensor descriptor is malformed.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// A graph or node is malformed.
    #[error("graph error: {0}")]
    Graph(#[from] graph_ir::GraphError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    pub(crate) fn shape(op: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            op: op.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported(op: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::Unsupported {
            op: op.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn params(op: impl fmt::Display, detail: impl fmt::Display) -> Self {
        Self::InvalidParams {
            op: op.to_string(),
            detail: detail.to_string(),
        }
    }

    /// The status code, for device failures.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Device { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Converts a runtime status into a `Result` tagged with the operator and phase.
pub fn check(status: Status, op: &str, phase: Phase) -> Result<(), DispatchError> {
    status.into_result().map_err(|status| DispatchError::Device {
        op: op.to_string(),
        phase,
        status,
    })
}
