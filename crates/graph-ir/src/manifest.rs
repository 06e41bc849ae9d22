// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON graph manifest parsing.
//!
//! A manifest declares the tensors of a small compute graph and the operator
//! nodes that connect them, in execution order.
//!
//! # Format
//! ```json
//! {
//!   "name": "bias-add",
//!   "tensors": [
//!     { "name": "x", "dtype": "f32", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6] },
//!     { "name": "b", "dtype": "f32", "ne": [1, 2], "data": [10, 20] },
//!     { "name": "y", "dtype": "f32", "ne": [3, 2] },
//!     { "name": "yt", "view_of": "y", "ne": [2, 3], "nb": [12, 4] }
//!   ],
//!   "nodes": [
//!     { "name": "add0", "op": "add", "srcs": ["x", "b"], "dst": "y" }
//!   ],
//!   "outputs": ["y"]
//! }
//! ```
//!
//! Extents (`ne`) are innermost-first. A tensor with `view_of` shares the
//! storage of an earlier tensor; `nb` gives its byte strides (packed when
//! omitted) and `offset` its byte offset.

use crate::{GraphError, OpKind, OpParams};
use std::collections::HashSet;
use std::path::Path;

/// Top-level graph manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphManifest {
    /// Human-readable graph name.
    pub name: String,
    /// Tensor declarations.
    pub tensors: Vec<ManifestTensor>,
    /// Operator nodes in execution order.
    pub nodes: Vec<ManifestNode>,
    /// Tensors to read back after evaluation. Defaults to the last node's
    /// destination when empty.
    #[serde(default)]
    pub outputs: Vec<String>,
}

fn default_dtype() -> String {
    "f32".to_string()
}

/// A tensor entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestTensor {
    pub name: String,
    /// Element type (`"f32"`, `"f16"`, `"i32"`, ...). Views inherit their
    /// base tensor's dtype.
    #[serde(default = "default_dtype")]
    pub dtype: String,
    /// Extents, innermost first.
    pub ne: Vec<usize>,
    /// Initial contents, one value per element in packed order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f64>>,
    /// Name of the tensor whose storage this one views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_of: Option<String>,
    /// Byte strides of a view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb: Option<Vec<usize>>,
    /// Byte offset of a view into its base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// An operator node entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestNode {
    pub name: String,
    /// Opcode string (see [`OpKind::from_str_loose`]).
    pub op: String,
    /// Source tensor names.
    #[serde(default)]
    pub srcs: Vec<String>,
    /// Destination tensor name.
    pub dst: String,
    #[serde(default, skip_serializing_if = "OpParams::is_empty")]
    pub params: OpParams,
}

impl GraphManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Serialises the manifest as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the manifest for structural consistency.
    ///
    /// Checks:
    /// - At least one node is defined.
    /// - Tensor and node names are unique.
    /// - Every opcode is recognised.
    ///
    /// Reference and shape checks happen when the graph is validated.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::InvalidGraph("manifest contains no nodes".into()));
        }

        let mut tensors = HashSet::new();
        for t in &self.tensors {
            if !tensors.insert(t.name.as_str()) {
                return Err(GraphError::InvalidTensor {
                    tensor: t.name.clone(),
                    detail: "duplicate tensor name".into(),
                });
            }
        }

        let mut nodes = HashSet::new();
        for n in &self.nodes {
            if !nodes.insert(n.name.as_str()) {
                return Err(GraphError::InvalidNode {
                    node: n.name.clone(),
                    detail: "duplicate node name".into(),
                });
            }
            if OpKind::from_str_loose(&n.op).is_none() {
                return Err(GraphError::UnknownOp {
                    node: n.name.clone(),
                    op: n.op.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest_json() -> &'static str {
        r#"{
            "name": "bias-add",
            "tensors": [
                { "name": "x", "dtype": "f32", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6] },
                { "name": "b", "ne": [1, 2], "data": [10, 20] },
                { "name": "y", "dtype": "f32", "ne": [3, 2] },
                { "name": "z", "dtype": "f32", "ne": [3, 2] }
            ],
            "nodes": [
                { "name": "add0", "op": "add", "srcs": ["x", "b"], "dst": "y" },
                { "name": "scale0", "op": "scale", "srcs": ["y"], "dst": "z", "params": { "scale": 0.5 } }
            ],
            "outputs": ["z"]
        }"#
    }

    #[test]
    fn test_parse_manifest() {
        let m = GraphManifest::from_json(sample_manifest_json()).unwrap();
        assert_eq!(m.name, "bias-add");
        assert_eq!(m.tensors.len(), 4);
        assert_eq!(m.nodes.len(), 2);
        assert_eq!(m.tensors[1].dtype, "f32");
        assert_eq!(m.nodes[1].params.require_f32("scale").unwrap(), 0.5);
    }

    #[test]
    fn test_validate_ok() {
        GraphManifest::from_json(sample_manifest_json())
            .unwrap()
            .validate()
            .unwrap();
    }

    #[test]
    fn test_validate_empty_nodes() {
        let m = GraphManifest::from_json(r#"{ "name": "e", "tensors": [], "nodes": [] }"#).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_op() {
        let json = r#"{
            "name": "bad",
            "tensors": [{ "name": "x", "ne": [4] }],
            "nodes": [{ "name": "n0", "op": "conv3d", "srcs": ["x"], "dst": "x" }]
        }"#;
        let err = GraphManifest::from_json(json).unwrap().validate().unwrap_err();
        assert!(matches!(err, GraphError::UnknownOp { .. }));
    }

    #[test]
    fn test_validate_duplicate_tensor() {
        let json = r#"{
            "name": "dup",
            "tensors": [{ "name": "x", "ne": [4] }, { "name": "x", "ne": [2] }],
            "nodes": [{ "name": "n0", "op": "relu", "srcs": ["x"], "dst": "x" }]
        }"#;
        let err = GraphManifest::from_json(json).unwrap().validate().unwrap_err();
        assert!(matches!(err, GraphError::InvalidTensor { .. }));
    }

    #[test]
    fn test_serde_roundtrip() {
        let m = GraphManifest::from_json(sample_manifest_json()).unwrap();
        let json = m.to_json().unwrap();
        let back = GraphManifest::from_json(&json).unwrap();
        assert_eq!(back.name, m.name);
        assert_eq!(back.nodes[1].params, m.nodes[1].params);
        assert!(back.tensors[2].data.is_none());
    }
}
