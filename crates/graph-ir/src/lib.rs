// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! The graph engine's side of the dispatch boundary.
//!
//! - [`OpKind`]: the abstract opcodes the dispatch layer understands.
//! - [`OpParams`]: a node's named parameter block.
//! - [`OperatorNode`]: one operator bound to tensor descriptors; the unit
//!   the dispatch layer executes.
//! - [`ComputeGraph`]: tensors and nodes in execution order, with a
//!   **type-state pattern** (`Loaded` → `Validated`).
//! - [`GraphManifest`] and [`GraphLoader`]: JSON graph files.
//!
//! # Example
//! ```no_run
//! use graph_ir::GraphLoader;
//! use std::path::Path;
//!
//! let graph = GraphLoader::load(Path::new("./graphs/bias_add.json")).unwrap();
//! println!("{}", graph.summary());
//! for node in graph.iter_nodes() {
//!     println!("  {} ({})", node.name, node.op);
//! }
//! ```

mod error;
pub mod graph;
mod loader;
mod manifest;
mod node;
mod op;
mod params;

pub use error::GraphError;
pub use graph::{ComputeGraph, GraphNode, GraphTensor, TensorView};
pub use loader::GraphLoader;
pub use manifest::{GraphManifest, ManifestNode, ManifestTensor};
pub use node::OperatorNode;
pub use op::OpKind;
pub use params::{OpParams, ParamValue};
