// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Byte budgets with human-readable parsing.
//!
//! Used for the scratch pool ceiling and for the emulated device capacity.

use crate::MemoryError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Suffixes checked longest first so `"MB"` wins over `"B"`.
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", GB),
    ("MB", MB),
    ("KB", KB),
    ("G", GB),
    ("M", MB),
    ("K", KB),
    ("B", 1),
];

/// A hard ceiling on device bytes.
///
/// ```
/// use memory_manager::MemoryBudget;
///
/// assert_eq!(MemoryBudget::parse("64M").unwrap(), MemoryBudget::from_mb(64));
/// assert_eq!(MemoryBudget::parse("2kb").unwrap().as_bytes(), 2048);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// A budget of `bytes` bytes.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// A budget of `kb` kibibytes.
    pub fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KB }
    }

    /// A budget of `mb` mebibytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    /// A budget of `gb` gibibytes.
    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GB }
    }

    /// The ceiling in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// The ceiling in whole mebibytes.
    pub fn as_mb(&self) -> usize {
        self.bytes / MB
    }

    /// Parses strings such as `"512M"`, `"1GB"`, `"64k"` or `"4096"`.
    ///
    /// Suffixes are case-insensitive; a bare number is a byte count. Zero
    /// budgets are rejected.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (digits, multiplier) = SUFFIXES
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|&(suffix, mult)| (&trimmed[..trimmed.len() - suffix.len()], mult))
            .unwrap_or((trimmed, 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| MemoryError::InvalidBudget(s.to_string()))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidBudget(s.to_string()))?;

        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = [(GB, "GB"), (MB, "MB"), (KB, "KB")];
        for (size, label) in units {
            if self.bytes >= size && self.bytes % size == 0 {
                return write!(f, "{} {label}", self.bytes / size);
            }
        }
        write!(f, "{} B", self.bytes)
    }
}
