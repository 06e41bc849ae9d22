// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! pool_budget = "256M"
//! device_memory = "1G"
//! device_id = 0
//! enable_profiling = true
//! ```

use crate::DispatchError;
use memory_manager::MemoryBudget;
use std::path::Path;

/// Configuration for a dispatch context and graph executor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatchConfig {
    /// Ceiling on scratch memory held by the pool (human-readable, e.g. `"256M"`).
    #[serde(default = "default_pool_budget")]
    pub pool_budget: String,
    /// Capacity of the emulated device (human-readable, e.g. `"1G"`).
    #[serde(default = "default_device_memory")]
    pub device_memory: String,
    /// Device ordinal, reported in logs.
    #[serde(default)]
    pub device_id: u32,
    /// Whether to synchronize after every node and record per-node timings.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
}

fn default_pool_budget() -> String {
    "256M".to_string()
}

fn default_device_memory() -> String {
    "1G".to_string()
}

fn default_true() -> bool {
    true
}

impl DispatchConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        toml::from_str(toml_str)
            .map_err(|e| DispatchError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, DispatchError> {
        toml::to_string_pretty(self)
            .map_err(|e| DispatchError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses the scratch pool budget.
    pub fn parse_pool_budget(&self) -> Result<MemoryBudget, DispatchError> {
        MemoryBudget::parse(&self.pool_budget)
            .map_err(|e| DispatchError::Config(format!("invalid pool budget: {e}")))
    }

    /// Parses the emulated device capacity.
    pub fn parse_device_memory(&self) -> Result<MemoryBudget, DispatchError> {
        MemoryBudget::parse(&self.device_memory)
            .map_err(|e| DispatchError::Config(format!("invalid device memory: {e}")))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_budget: default_pool_budget(),
            device_memory: default_device_memory(),
            device_id: 0,
            enable_profiling: true,
        }
    }
}
