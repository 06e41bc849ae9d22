// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-runtime
//!
//! The boundary between operator dispatch and an accelerator runtime.
//!
//! - [`DeviceRuntime`]: memory, streams, tensor handles and the two-phase
//!   operator protocol (workspace query, then launch).
//! - [`DeviceOp`]: the operator library's surface, one variant per
//!   operator with its handles and scalar arguments.
//! - [`TensorSpec`]: row-major, element-strided tensor views.
//! - [`Status`]: runtime status codes.
//! - [`RuntimeAllocator`]: exposes runtime memory to the scratch pool.
//! - [`emu::Emulator`]: an in-process implementation with reference
//!   kernels, call counters and fault injection.

mod allocator;
pub mod emu;
mod op;
mod runtime;
mod status;
mod tensor;

pub use allocator::RuntimeAllocator;
pub use op::{BinaryKind, DeviceOp, UnaryKind, Window2d};
pub use runtime::{DeviceRuntime, Executor};
pub use status::Status;
pub use tensor::{RawTensor, StreamId, TensorSpec};
