// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator nodes: one abstract operator bound to concrete tensors.
//!
//! An [`OperatorNode`] is what the dispatch layer consumes. It carries
//! descriptors, not data; the graph engine owns the storage behind them.

use crate::{GraphError, OpKind, OpParams};
use tensor_core::TensorDescriptor;

/// A single operator invocation.
#[derive(Debug, Clone)]
pub struct OperatorNode {
    /// Node identifier used in logs and errors.
    pub name: String,
    /// The operator to perform.
    pub op: OpKind,
    /// Source tensors, in operator order.
    pub srcs: Vec<TensorDescriptor>,
    /// Destination tensor.
    pub dst: TensorDescriptor,
    /// Operator parameters.
    pub params: OpParams,
}

impl OperatorNode {
    /// Creates a node with no parameters.
    pub fn new(
        name: impl Into<String>,
        op: OpKind,
        srcs: Vec<TensorDescriptor>,
        dst: TensorDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            op,
            srcs,
            dst,
            params: OpParams::new(),
        }
    }

    /// Replaces the parameter block.
    pub fn with_params(mut self, params: OpParams) -> Self {
        self.params = params;
        self
    }

    /// Returns source `index`, or an error naming the node.
    pub fn src(&self, index: usize) -> Result<&TensorDescriptor, GraphError> {
        self.srcs.get(index).ok_or_else(|| GraphError::InvalidNode {
            node: self.name.clone(),
            detail: format!(
                "{} expects source {index} but only {} were given",
                self.op,
                self.srcs.len()
            ),
        })
    }

    /// Checks the source count against the opcode's arity.
    pub fn check_arity(&self) -> Result<(), GraphError> {
        let (min, max) = self.op.arity();
        let n = self.srcs.len();
        if n < min || n > max {
            return Err(GraphError::InvalidNode {
                node: self.name.clone(),
                detail: format!("{} takes {min}..={max} sources, got {n}", self.op),
            });
        }
        Ok(())
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let srcs: Vec<String> = self.srcs.iter().map(|s| s.to_string()).collect();
        format!(
            "{} = {}({}) -> {}",
            self.name,
            self.op,
            srcs.join(", "),
            self.dst
        )
    }
}
