// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compute graph: tensors plus operator nodes in execution order.
//!
//! # Type-State Pattern
//!
//! ```text
//! ComputeGraph<Loaded>     — names resolved, nothing checked.
//!       │  .validate()
//!       ▼
//! ComputeGraph<Validated>  — arity, ranks and initial data verified.
//! ```
//!
//! Only a validated graph can be handed to the executor. Tensors and nodes
//! refer to each other by index into [`ComputeGraph::tensors`].

use crate::{GraphError, OpKind, OpParams, OperatorNode};
use std::collections::HashSet;
use std::fmt;
use tensor_core::{DType, TensorDescriptor, MAX_DIMS};

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been loaded but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and can be executed.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── Graph elements ─────────────────────────────────────────────────

/// Storage sharing for a view tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorView {
    /// Index of the base tensor.
    pub base: usize,
    /// Byte strides; packed when `None`.
    pub nb: Option<Vec<usize>>,
    /// Byte offset into the base.
    pub offset: usize,
}

/// A tensor declared by the graph.
#[derive(Debug, Clone)]
pub struct GraphTensor {
    pub name: String,
    pub dtype: DType,
    /// Extents, innermost first.
    pub ne: Vec<usize>,
    /// Initial contents in packed order.
    pub data: Option<Vec<f64>>,
    /// Set when the tensor aliases another one's storage.
    pub view: Option<TensorView>,
}

impl GraphTensor {
    pub fn num_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Bytes needed to store the tensor densely.
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_bytes()
    }

    pub fn is_view(&self) -> bool {
        self.view.is_some()
    }
}

/// A node of the graph, with tensors referenced by index.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub op: OpKind,
    pub srcs: Vec<usize>,
    pub dst: usize,
    pub params: OpParams,
}

impl GraphNode {
    /// Binds the node to concrete descriptors, indexed like the graph's
    /// tensors.
    pub fn bind(&self, descriptors: &[TensorDescriptor]) -> Result<OperatorNode, GraphError> {
        let lookup = |index: usize| {
            descriptors.get(index).copied().ok_or_else(|| GraphError::InvalidNode {
                node: self.name.clone(),
                detail: format!("tensor #{index} has no descriptor"),
            })
        };
        let srcs = self
            .srcs
            .iter()
            .map(|&i| lookup(i))
            .collect::<Result<Vec<_>, _>>()?;
        let dst = lookup(self.dst)?;
        Ok(OperatorNode::new(self.name.clone(), self.op, srcs, dst).with_params(self.params.clone()))
    }
}

// ── ComputeGraph ───────────────────────────────────────────────────

/// Tensors and nodes of one graph evaluation.
#[derive(Debug, Clone)]
pub struct ComputeGraph<S: GraphState = Loaded> {
    pub name: String,
    pub tensors: Vec<GraphTensor>,
    /// Nodes in execution order.
    pub nodes: Vec<GraphNode>,
    /// Indices of the tensors read back after evaluation.
    pub outputs: Vec<usize>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl ComputeGraph<Loaded> {
    /// Creates a new graph in the `Loaded` state.
    pub fn new(
        name: String,
        tensors: Vec<GraphTensor>,
        nodes: Vec<GraphNode>,
        outputs: Vec<usize>,
    ) -> Self {
        Self {
            name,
            tensors,
            nodes,
            outputs,
            _state: std::marker::PhantomData,
        }
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - At least one node, at least one output.
    /// - Tensor names are unique.
    /// - Every index refers to a declared tensor; views refer to an earlier
    ///   non-view tensor.
    /// - Ranks are 1..=4 with no zero extents.
    /// - Initial data matches the element count; views carry none.
    /// - Each node's source count fits its opcode's arity.
    pub fn validate(self) -> Result<ComputeGraph<Validated>, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::InvalidGraph("compute graph contains no nodes".into()));
        }
        if self.outputs.is_empty() {
            return Err(GraphError::InvalidGraph("compute graph has no outputs".into()));
        }

        let mut names = HashSet::new();
        for (i, t) in self.tensors.iter().enumerate() {
            if !names.insert(t.name.as_str()) {
                return Err(invalid_tensor(t, "duplicate tensor name"));
            }
            if t.ne.is_empty() || t.ne.len() > MAX_DIMS {
                return Err(invalid_tensor(
                    t,
                    format!("rank {} is outside 1..={MAX_DIMS}", t.ne.len()),
                ));
            }
            if t.ne.contains(&0) {
                return Err(invalid_tensor(t, format!("zero extent in {:?}", t.ne)));
            }
            if let Some(data) = &t.data {
                if data.len() != t.num_elements() {
                    return Err(invalid_tensor(
                        t,
                        format!(
                            "{} initial values for {} elements",
                            data.len(),
                            t.num_elements()
                        ),
                    ));
                }
            }
            if let Some(view) = &t.view {
                if t.data.is_some() {
                    return Err(invalid_tensor(t, "a view cannot carry initial data"));
                }
                if view.base >= i || self.tensors[view.base].is_view() {
                    return Err(invalid_tensor(
                        t,
                        "a view must refer to an earlier, non-view tensor",
                    ));
                }
                if let Some(nb) = &view.nb {
                    if nb.len() != t.ne.len() {
                        return Err(invalid_tensor(
                            t,
                            format!("{} strides for rank {}", nb.len(), t.ne.len()),
                        ));
                    }
                }
            }
        }

        for node in &self.nodes {
            let (min, max) = node.op.arity();
            if node.srcs.len() < min || node.srcs.len() > max {
                return Err(GraphError::InvalidNode {
                    node: node.name.clone(),
                    detail: format!(
                        "{} takes {min}..={max} sources, got {}",
                        node.op,
                        node.srcs.len()
                    ),
                });
            }
            for &index in node.srcs.iter().chain(std::iter::once(&node.dst)) {
                if index >= self.tensors.len() {
                    return Err(GraphError::InvalidNode {
                        node: node.name.clone(),
                        detail: format!("tensor index {index} out of range"),
                    });
                }
            }
        }

        for &index in &self.outputs {
            if index >= self.tensors.len() {
                return Err(GraphError::InvalidGraph(format!(
                    "output index {index} out of range"
                )));
            }
        }

        tracing::debug!(
            graph = %self.name,
            tensors = self.tensors.len(),
            nodes = self.nodes.len(),
            "compute graph validated"
        );

        Ok(ComputeGraph {
            name: self.name,
            tensors: self.tensors,
            nodes: self.nodes,
            outputs: self.outputs,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl ComputeGraph<Validated> {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns an iterator over the nodes in execution order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn tensor(&self, index: usize) -> Option<&GraphTensor> {
        self.tensors.get(index)
    }

    /// Looks a tensor up by name.
    pub fn tensor_index(&self, name: &str) -> Option<usize> {
        self.tensors.iter().position(|t| t.name == name)
    }

    /// Bytes of device storage needed for every non-view tensor.
    pub fn total_tensor_bytes(&self) -> usize {
        self.tensors
            .iter()
            .filter(|t| !t.is_view())
            .map(GraphTensor::size_bytes)
            .sum()
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        format!(
            "Graph '{}': {} tensors, {} nodes, {} outputs, {:.1} KB storage",
            self.name,
            self.tensors.len(),
            self.nodes.len(),
            self.outputs.len(),
            self.total_tensor_bytes() as f64 / 1024.0,
        )
    }
}

fn invalid_tensor(t: &GraphTensor, detail: impl Into<String>) -> GraphError {
    GraphError::InvalidTensor {
        tensor: t.name.clone(),
        detail: detail.into(),
    }
}
