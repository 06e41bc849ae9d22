// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph loading from JSON manifests.

use crate::graph::{GraphNode, GraphTensor, TensorView, Validated};
use crate::{ComputeGraph, GraphError, GraphManifest, OpKind};
use std::collections::HashMap;
use std::path::Path;
use tensor_core::DType;

/// Loads a manifest into a validated [`ComputeGraph`].
///
/// # Example
/// ```no_run
/// use graph_ir::GraphLoader;
/// use std::path::Path;
///
/// let graph = GraphLoader::load(Path::new("./graphs/bias_add.json")).unwrap();
/// println!("{}", graph.summary());
/// ```
pub struct GraphLoader;

impl GraphLoader {
    /// Loads and validates a graph from a manifest file.
    pub fn load(path: &Path) -> Result<ComputeGraph<Validated>, GraphError> {
        let manifest = GraphManifest::from_file(path)?;
        tracing::info!(path = %path.display(), graph = %manifest.name, "loaded graph manifest");
        Self::from_manifest(&manifest)
    }

    /// Loads and validates a graph from manifest JSON text.
    pub fn from_json(json: &str) -> Result<ComputeGraph<Validated>, GraphError> {
        Self::from_manifest(&GraphManifest::from_json(json)?)
    }

    /// Resolves names in `manifest` and validates the resulting graph.
    ///
    /// Steps:
    /// 1. Structural manifest checks (names, opcodes).
    /// 2. Tensor declarations: dtype parsing and view bases.
    /// 3. Nodes: opcode parsing and tensor references.
    /// 4. Outputs, defaulting to the last node's destination.
    /// 5. Graph validation.
    pub fn from_manifest(manifest: &GraphManifest) -> Result<ComputeGraph<Validated>, GraphError> {
        manifest.validate()?;

        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut tensors = Vec::with_capacity(manifest.tensors.len());
        for (i, t) in manifest.tensors.iter().enumerate() {
            let view = match &t.view_of {
                Some(base) => Some(TensorView {
                    base: *index.get(base.as_str()).ok_or_else(|| GraphError::UnknownTensor {
                        context: t.name.clone(),
                        tensor: base.clone(),
                    })?,
                    nb: t.nb.clone(),
                    offset: t.offset.unwrap_or(0),
                }),
                None => None,
            };
            let dtype = match &view {
                Some(v) => tensors
                    .get(v.base)
                    .map(|b: &GraphTensor| b.dtype)
                    .unwrap_or(DType::F32),
                None => DType::from_str_loose(&t.dtype).ok_or_else(|| GraphError::InvalidTensor {
                    tensor: t.name.clone(),
                    detail: format!("unsupported dtype '{}'", t.dtype),
                })?,
            };
            tensors.push(GraphTensor {
                name: t.name.clone(),
                dtype,
                ne: t.ne.clone(),
                data: t.data.clone(),
                view,
            });
            index.insert(t.name.as_str(), i);
        }

        let resolve = |context: &str, name: &str| {
            index.get(name).copied().ok_or_else(|| GraphError::UnknownTensor {
                context: context.to_string(),
                tensor: name.to_string(),
            })
        };

        let mut nodes = Vec::with_capacity(manifest.nodes.len());
        for n in &manifest.nodes {
            let op = OpKind::from_str_loose(&n.op).ok_or_else(|| GraphError::UnknownOp {
                node: n.name.clone(),
                op: n.op.clone(),
            })?;
            let srcs = n
                .srcs
                .iter()
                .map(|s| resolve(&n.name, s))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(GraphNode {
                name: n.name.clone(),
                op,
                srcs,
                dst: resolve(&n.name, &n.dst)?,
                params: n.params.clone(),
            });
        }

        let outputs = if manifest.outputs.is_empty() {
            nodes.last().map(|n| vec![n.dst]).unwrap_or_default()
        } else {
            manifest
                .outputs
                .iter()
                .map(|o| resolve("outputs", o))
                .collect::<Result<Vec<_>, _>>()?
        };

        ComputeGraph::new(manifest.name.clone(), tensors, nodes, outputs).validate()
    }
}
