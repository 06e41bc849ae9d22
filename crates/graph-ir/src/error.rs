// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph manifests and operator parameters.

/// Errors that can occur while loading or validating a compute graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The graph manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    ManifestReadError(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// A node names an opcode this layer does not know.
    #[error("node '{node}': unknown opcode '{op}'")]
    UnknownOp { node: String, op: String },

    /// A node or output refers to a tensor that was never declared.
    #[error("'{context}' refers to unknown tensor '{tensor}'")]
    UnknownTensor { context: String, tensor: String },

    /// A tensor declaration is malformed (bad dtype, rank, data length).
    #[error("invalid tensor '{tensor}': {detail}")]
    InvalidTensor { tensor: String, detail: String },

    /// A node is malformed (wrong number of sources, duplicate name).
    #[error("invalid node '{node}': {detail}")]
    InvalidNode { node: String, detail: String },

    /// A parameter is present but has the wrong type, or is missing.
    #[error("parameter '{key}': {detail}")]
    InvalidParam { key: String, detail: String },

    /// The graph as a whole is malformed.
    #[error("invalid compute graph: {0}")]
    InvalidGraph(String),
}
