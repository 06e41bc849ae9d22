// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # npu-dispatch
//!
//! Maps graph operator nodes onto the two-phase operator interface of an
//! NPU runtime.
//!
//! This crate provides:
//! - [`create_handle`]: descriptor to device tensor translation.
//! - [`BroadcastPlan`]: stride-0 broadcast expansion of binary operands.
//! - [`call_op`]: the query, scratch, launch, release protocol.
//! - [`unary_op`] / [`binary_op`]: generic element-wise procedures.
//! - [`ops`]: the operator catalog, one function per graph opcode.
//! - [`compute_forward`]: opcode routing for a single node.
//! - [`GraphExecutor`]: allocation, upload and evaluation of whole graphs.
//!
//! # Design Goals
//! - Every device tensor handle is destroyed exactly once, on every path.
//! - Scratch memory comes from a pooled allocator and is never leaked.
//! - Errors carry the failing operator and phase via `thiserror`.

mod broadcast;
mod config;
mod context;
mod engine;
mod error;
mod forward;
mod handle;
mod invoke;
mod metrics;
pub mod ops;
mod template;

#[cfg(test)]
mod testing;

pub use broadcast::{resolve, BroadcastPlan, Operand, ResolvedOperands};
pub use config::DispatchConfig;
pub use context::{DispatchContext, LaunchCounters, ScratchTensor};
pub use engine::{Bound, ExecutorState, GraphExecutor, GraphOutput, Idle};
pub use error::{check, DispatchError, Phase};
pub use forward::compute_forward;
pub use handle::{create_handle, create_handle_with_rank, tensor_spec, TensorHandle};
pub use invoke::call_op;
pub use metrics::{DispatchMetrics, OpMetrics};
pub use template::{
    apply_binary, apply_unary, binary_op, launch, unary_op, Arithmetic, BinaryProcedure, Elementwise,
    HandleRequest, UnaryProcedure,
};
