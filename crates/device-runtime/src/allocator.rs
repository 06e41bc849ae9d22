// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bridges runtime memory into the scratch pool.

use crate::DeviceRuntime;
use memory_manager::{DeviceAllocator, MemoryError};
use std::sync::Arc;
use tensor_core::DevicePtr;

/// [`DeviceAllocator`] over a [`DeviceRuntime`].
pub struct RuntimeAllocator {
    runtime: Arc<dyn DeviceRuntime>,
}

impl RuntimeAllocator {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self { runtime }
    }
}

impl DeviceAllocator for RuntimeAllocator {
    fn malloc(&self, size: usize) -> Result<DevicePtr, MemoryError> {
        self.runtime
            .malloc(size)
            .map_err(|status| MemoryError::Device(format!("malloc of {size} bytes: {status}")))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), MemoryError> {
        self.runtime
            .free(ptr)
            .into_result()
            .map_err(|status| MemoryError::Device(format!("free of {ptr}: {status}")))
    }
}
