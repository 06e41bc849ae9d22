// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime status codes.
//!
//! Every call across the runtime boundary reports a [`Status`]. Zero is
//! success; anything else is a failure the caller must surface.

/// A status code returned by the accelerator runtime.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("{} (status {})", status_name(.0), .0)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    /// A required pointer or handle was null.
    pub const NULL_POINTER: Status = Status(161001);
    /// Shapes, strides or scalar arguments are inconsistent with the operator.
    pub const INVALID_PARAM: Status = Status(161002);
    /// The operator does not accept this element type.
    pub const UNSUPPORTED_DTYPE: Status = Status(161003);
    /// Unknown tensor, stream or executor handle.
    pub const INVALID_HANDLE: Status = Status(107000);
    /// An address or extent falls outside every live allocation.
    pub const INVALID_ADDRESS: Status = Status(107001);
    /// Device memory is exhausted.
    pub const OUT_OF_MEMORY: Status = Status(207001);
    /// A kernel failed while running.
    pub const KERNEL_FAILED: Status = Status(361001);
    /// Internal runtime failure, also used for injected faults.
    pub const INTERNAL: Status = Status(561000);

    /// Returns `true` for [`Status::SUCCESS`].
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Converts into a `Result`, keeping the failing code as the error.
    pub fn into_result(self) -> Result<(), Status> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Symbolic name of the code.
    pub fn name(self) -> &'static str {
        status_name(&self.0)
    }
}

fn status_name(code: &i32) -> &'static str {
    match Status(*code) {
        Status::SUCCESS => "success",
        Status::NULL_POINTER => "null pointer",
        Status::INVALID_PARAM => "invalid parameter",
        Status::UNSUPPORTED_DTYPE => "unsupported dtype",
        Status::INVALID_HANDLE => "invalid handle",
        Status::INVALID_ADDRESS => "invalid address",
        Status::OUT_OF_MEMORY => "out of memory",
        Status::KERNEL_FAILED => "kernel failed",
        Status::INTERNAL => "internal error",
        _ => "unknown status",
    }
}
