// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor metadata shared by every layer of the NPU dispatch stack.
//!
//! This crate provides:
//! - [`TensorDescriptor`]: the graph engine's view of a tensor (dtype, up to
//!   four extents innermost-first, byte strides, device address, offset).
//! - [`DevicePtr`]: an opaque device address.
//! - [`Shape`]: row-major dimensions in the order the device API expects.
//! - [`DType`]: supported element types.
//! - [`Tensor`]: a host staging buffer with dtype-aware encoding.
//!
//! # Design Goals
//! - Descriptors are `Copy` and never own tensor data; views and broadcast
//!   expansions are pure metadata.
//! - Clean error types via `thiserror`.

mod descriptor;
mod dtype;
mod error;
mod shape;
mod tensor;

pub use descriptor::{packed_strides, DevicePtr, TensorDescriptor, MAX_DIMS};
pub use dtype::DType;
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::{read_element, write_element, Tensor};
