// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dispatch profiling metrics.
//!
//! [`DispatchMetrics`] collects per-node timings, device launches and
//! scratch usage for one graph evaluation.

use std::time::Duration;

/// Metrics for a single dispatched node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpMetrics {
    /// Node name.
    pub node: String,
    /// Opcode.
    pub op: String,
    /// Host time from dispatch to completion. Includes device execution only
    /// when profiling synchronizes after each node.
    pub duration: Duration,
    /// Device operators launched for the node.
    pub launches: u64,
    /// Workspace bytes acquired across those launches.
    pub scratch_bytes: u64,
}

/// Aggregate metrics for a complete graph evaluation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatchMetrics {
    /// Wall-clock time for the whole run, including the final synchronize.
    pub total_duration: Duration,
    /// Sum of per-node durations.
    pub total_op_duration: Duration,
    /// Total device operators launched.
    pub total_launches: u64,
    /// Total workspace bytes acquired.
    pub total_scratch_bytes: u64,
    /// Per-node metrics in execution order.
    pub ops: Vec<OpMetrics>,
}

impl DispatchMetrics {
    /// Creates an empty metrics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records metrics for a single node.
    pub fn record_op(&mut self, op: OpMetrics) {
        self.total_op_duration += op.duration;
        self.total_launches += op.launches;
        self.total_scratch_bytes += op.scratch_bytes;
        self.ops.push(op);
    }

    /// Finalises metrics with the total wall-clock time.
    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
    }

    /// The node that took longest, if any ran.
    pub fn slowest(&self) -> Option<&OpMetrics> {
        self.ops.iter().max_by_key(|m| m.duration)
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Dispatch: {:.3}ms total, {} nodes, {} device launches, {:.3}ms in nodes, {} scratch bytes",
            self.total_duration.as_secs_f64() * 1000.0,
            self.ops.len(),
            self.total_launches,
            self.total_op_duration.as_secs_f64() * 1000.0,
            self.total_scratch_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(node: &str, ms: u64, launches: u64, scratch: u64) -> OpMetrics {
        OpMetrics {
            node: node.into(),
            op: "add".into(),
            duration: Duration::from_millis(ms),
            launches,
            scratch_bytes: scratch,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let m = DispatchMetrics::new();
        assert!(m.ops.is_empty());
        assert!(m.slowest().is_none());
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = DispatchMetrics::new();
        m.record_op(op("n0", 2, 1, 0));
        m.record_op(op("n1", 5, 3, 64));
        m.finalise(Duration::from_millis(10));
        assert_eq!(m.total_launches, 4);
        assert_eq!(m.total_scratch_bytes, 64);
        assert_eq!(m.total_op_duration, Duration::from_millis(7));
        assert_eq!(m.slowest().unwrap().node, "n1");
    }

    #[test]
    fn test_summary_format() {
        let mut m = DispatchMetrics::new();
        m.record_op(op("n0", 1, 2, 16));
        m.finalise(Duration::from_millis(3));
        let s = m.summary();
        assert!(s.starts_with("Dispatch:"));
        assert!(s.contains("1 nodes"));
        assert!(s.contains("2 device launches"));
    }

    #[test]
    fn test_serialises_to_json() {
        let mut m = DispatchMetrics::new();
        m.record_op(op("n0", 1, 1, 0));
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"node\":\"n0\""));
    }
}
