// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: graph manifests evaluated on the emulated device.
//!
//! These tests exercise the complete flow from manifest loading → tensor
//! binding → per-node dispatch → output download, and check that device
//! handles and scratch blocks are returned on every path.

use device_runtime::emu::{Emulator, Fault};
use graph_ir::GraphLoader;
use npu_dispatch::{Bound, DispatchConfig, DispatchError, GraphExecutor, Phase};
use std::sync::Arc;

// ── Helpers ────────────────────────────────────────────────────

fn bind(emu: &Arc<Emulator>, json: &str) -> GraphExecutor<Bound> {
    let config = DispatchConfig {
        enable_profiling: true,
        ..DispatchConfig::default()
    };
    let graph = GraphLoader::from_json(json).unwrap();
    GraphExecutor::new(emu.clone(), config).unwrap().bind(graph).unwrap()
}

fn run_f32(json: &str, output: &str) -> Vec<f32> {
    let emu = Arc::new(Emulator::new());
    let exec = bind(&emu, json);
    let out = exec.run().unwrap();
    assert_eq!(emu.stats().live_tensors(), 0);
    out.get(output).unwrap().to_f32_vec()
}

fn assert_close(got: &[f32], expected: &[f32]) {
    assert_eq!(got.len(), expected.len(), "{got:?} vs {expected:?}");
    for (g, e) in got.iter().zip(expected) {
        assert!((g - e).abs() < 1e-5, "{got:?} vs {expected:?}");
    }
}

const BROADCAST_ADD: &str = r#"{
    "name": "broadcast_add",
    "tensors": [
        {"name": "x", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6]},
        {"name": "b", "ne": [1, 2], "data": [10, 20]},
        {"name": "y", "ne": [3, 2]}
    ],
    "nodes": [{"name": "add", "op": "add", "srcs": ["x", "b"], "dst": "y"}]
}"#;

// ── Element-wise ───────────────────────────────────────────────

#[test]
fn test_broadcast_add_column() {
    assert_eq!(
        run_f32(BROADCAST_ADD, "y"),
        vec![11.0, 12.0, 13.0, 24.0, 25.0, 26.0]
    );
}

#[test]
fn test_broadcast_add_row() {
    let json = r#"{
        "name": "row_add",
        "tensors": [
            {"name": "x", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6]},
            {"name": "b", "ne": [3, 1], "data": [100, 200, 300]},
            {"name": "y", "ne": [3, 2]}
        ],
        "nodes": [{"name": "add", "op": "add", "srcs": ["x", "b"], "dst": "y"}]
    }"#;
    assert_eq!(
        run_f32(json, "y"),
        vec![101.0, 202.0, 303.0, 104.0, 205.0, 306.0]
    );
}

#[test]
fn test_incompatible_broadcast_makes_no_device_call() {
    let json = r#"{
        "name": "bad",
        "tensors": [
            {"name": "x", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6]},
            {"name": "w", "ne": [2, 2], "data": [1, 2, 3, 4]},
            {"name": "y", "ne": [3, 2]}
        ],
        "nodes": [{"name": "mul", "op": "mul", "srcs": ["x", "w"], "dst": "y"}]
    }"#;
    let emu = Arc::new(Emulator::new());
    let exec = bind(&emu, json);
    let err = exec.run().unwrap_err();
    assert!(matches!(err, DispatchError::Broadcast { dim: 0, lhs: 3, rhs: 2 }));
    let stats = emu.stats();
    assert_eq!(stats.tensors_created, 0);
    assert_eq!(stats.workspace_queries, 0);
    assert!(stats.launches.is_empty());
}

#[test]
fn test_clamp_from_manifest_params() {
    let json = r#"{
        "name": "clamp",
        "tensors": [
            {"name": "x", "ne": [4], "data": [-2, 0.25, 0.75, 3]},
            {"name": "y", "ne": [4]}
        ],
        "nodes": [
            {"name": "clamp", "op": "clamp", "srcs": ["x"], "dst": "y",
             "params": {"min": 0, "max": 0.5}}
        ]
    }"#;
    assert_eq!(run_f32(json, "y"), vec![0.0, 0.25, 0.5, 0.5]);
}

#[test]
fn test_unary_idempotence() {
    for op in ["relu", "abs"] {
        let json = format!(
            r#"{{
                "name": "twice",
                "tensors": [
                    {{"name": "x", "ne": [4], "data": [-1.5, -0.5, 0.5, 2]}},
                    {{"name": "a", "ne": [4]}},
                    {{"name": "b", "ne": [4]}}
                ],
                "nodes": [
                    {{"name": "first", "op": "{op}", "srcs": ["x"], "dst": "a"}},
                    {{"name": "second", "op": "{op}", "srcs": ["a"], "dst": "b"}}
                ],
                "outputs": ["a", "b"]
            }}"#
        );
        let emu = Arc::new(Emulator::new());
        let out = bind(&emu, &json).run().unwrap();
        assert_eq!(out.get("a").unwrap().to_f32_vec(), out.get("b").unwrap().to_f32_vec());
    }
}

// ── Composite operators ────────────────────────────────────────

#[test]
fn test_masked_attention_scores() {
    let json = r#"{
        "name": "attention",
        "tensors": [
            {"name": "k", "ne": [4, 3], "data": [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]},
            {"name": "q", "ne": [4, 2], "data": [1, 1, 1, 1, 1, 1, 1, 1]},
            {"name": "kq", "ne": [3, 2]},
            {"name": "scaled", "ne": [3, 2]},
            {"name": "masked", "ne": [3, 2]},
            {"name": "probs", "ne": [3, 2]}
        ],
        "nodes": [
            {"name": "kq", "op": "mul_mat", "srcs": ["k", "q"], "dst": "kq"},
            {"name": "scale", "op": "scale", "srcs": ["kq"], "dst": "scaled",
             "params": {"scale": 0.5}},
            {"name": "mask", "op": "diag_mask_inf", "srcs": ["scaled"], "dst": "masked",
             "params": {"n_past": 1}},
            {"name": "softmax", "op": "soft_max", "srcs": ["masked"], "dst": "probs"}
        ],
        "outputs": ["kq", "probs"]
    }"#;
    let emu = Arc::new(Emulator::new());
    let exec = bind(&emu, json);
    let out = exec.run().unwrap();
    assert_eq!(out.get("kq").unwrap().to_f32_vec(), vec![4.0; 6]);
    let third = 1.0 / 3.0;
    assert_close(
        &out.get("probs").unwrap().to_f32_vec(),
        &[0.5, 0.5, 0.0, third, third, third],
    );
    assert_eq!(out.metrics.ops.len(), 4);
    assert!(out.metrics.total_scratch_bytes > 0);
    assert_eq!(emu.stats().live_tensors(), 0);
    let pool = exec.pool_stats();
    assert!(pool.acquires > 0);
    assert_eq!(pool.acquires, pool.releases);
}

#[test]
fn test_norm_then_sum_rows() {
    let json = r#"{
        "name": "norm_sum",
        "tensors": [
            {"name": "x", "ne": [4, 2], "data": [1, 2, 3, 4, 10, 10, 30, 30]},
            {"name": "n", "ne": [4, 2]},
            {"name": "s", "ne": [1, 2]}
        ],
        "nodes": [
            {"name": "norm", "op": "norm", "srcs": ["x"], "dst": "n", "params": {"eps": 1e-5}},
            {"name": "sum", "op": "sum_rows", "srcs": ["n"], "dst": "s"}
        ]
    }"#;
    let sums = run_f32(json, "s");
    assert_close(&sums, &[0.0, 0.0]);
}

// ── Workspace and handle accounting ────────────────────────────

#[test]
fn test_workspace_submitted_equals_reported() {
    let json = r#"{
        "name": "softmax",
        "tensors": [
            {"name": "x", "ne": [4, 3], "data": [0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]},
            {"name": "y", "ne": [4, 3]}
        ],
        "nodes": [{"name": "softmax", "op": "soft_max", "srcs": ["x"], "dst": "y"}]
    }"#;
    let emu = Arc::new(Emulator::new());
    bind(&emu, json).run().unwrap();
    let stats = emu.stats();
    assert!(!stats.launches.is_empty());
    for launch in &stats.launches {
        assert_eq!(launch.reported, launch.submitted, "{}", launch.op);
    }
    assert!(stats.launches.iter().any(|l| l.reported > 0));
}

#[test]
fn test_handles_released_on_tensor_create_failure() {
    for after in 0..3 {
        let emu = Arc::new(Emulator::new());
        let exec = bind(&emu, BROADCAST_ADD);
        emu.inject(Fault::TensorCreate { after });
        let err = exec.run().unwrap_err();
        assert!(
            matches!(err, DispatchError::Device { phase: Phase::TensorCreate, .. }),
            "{err}"
        );
        assert_eq!(emu.stats().live_tensors(), 0);
        assert!(emu.stats().launches.is_empty());
    }
}

/// Every composite operator that creates several handles or scratch
/// tensors per node.
const COMPOSITES: &str = r#"{
    "name": "composites",
    "tensors": [
        {"name": "q", "ne": [4, 1, 2], "data": [1, 0, 1, 0, 0, 1, 0, 1]},
        {"name": "pos", "dtype": "i32", "ne": [2], "data": [0, 1]},
        {"name": "q_rot", "ne": [4, 1, 2]},
        {"name": "s", "ne": [3, 2], "data": [1, 2, 3, 4, 5, 6]},
        {"name": "masked", "ne": [3, 2]},
        {"name": "probs", "ne": [3, 2]},
        {"name": "rows", "dtype": "i32", "ne": [2], "data": [1, 0]},
        {"name": "picked", "ne": [3, 2]},
        {"name": "order", "dtype": "i32", "ne": [3, 2]}
    ],
    "nodes": [
        {"name": "rope", "op": "rope", "srcs": ["q", "pos"], "dst": "q_rot",
         "params": {"n_dims": 4, "mode": 2}},
        {"name": "mask", "op": "diag_mask_inf", "srcs": ["s"], "dst": "masked",
         "params": {"n_past": 1}},
        {"name": "softmax", "op": "soft_max", "srcs": ["masked"], "dst": "probs",
         "params": {"scale": 0.5}},
        {"name": "gather", "op": "get_rows", "srcs": ["s", "rows"], "dst": "picked"},
        {"name": "sort", "op": "argsort", "srcs": ["picked"], "dst": "order",
         "params": {"order": "desc"}}
    ],
    "outputs": ["q_rot", "probs", "order"]
}"#;

#[test]
fn test_composite_handles_released_at_every_create_failure() {
    let mut failures = 0;
    for after in 0..500 {
        let emu = Arc::new(Emulator::new());
        let exec = bind(&emu, COMPOSITES);
        emu.inject(Fault::TensorCreate { after });
        match exec.run() {
            Err(err) => {
                assert!(
                    matches!(err, DispatchError::Device { phase: Phase::TensorCreate, .. }),
                    "after {after}: {err}"
                );
                failures += 1;
            }
            Ok(out) => {
                assert_eq!(out.get("order").unwrap().to_f32_vec().len(), 6);
                break;
            }
        }
        assert_eq!(emu.stats().live_tensors(), 0, "after {after}");
        assert_eq!(emu.pending_executors(), 0, "after {after}");
        let pool = exec.pool_stats();
        assert_eq!(pool.acquires, pool.releases, "after {after}");
    }
    // rope alone needs more than a handful of handles
    assert!(failures > 10, "only {failures} create points");
}

#[test]
fn test_handles_released_on_launch_failure() {
    let emu = Arc::new(Emulator::new());
    let exec = bind(&emu, BROADCAST_ADD);
    emu.inject(Fault::Launch("Add".into()));
    let err = exec.run().unwrap_err();
    assert_eq!(err.status(), Some(device_runtime::Status::INTERNAL));
    assert_eq!(emu.stats().live_tensors(), 0);
    assert_eq!(emu.pending_executors(), 0);
}

#[test]
fn test_kernel_failure_surfaces_on_synchronize() {
    let emu = Arc::new(Emulator::new());
    let exec = bind(&emu, BROADCAST_ADD);
    emu.inject(Fault::Kernel("Add".into()));
    let err = exec.run().unwrap_err();
    assert!(matches!(err, DispatchError::Device { phase: Phase::Synchronize, .. }));
    assert_eq!(emu.stats().live_tensors(), 0);
}

#[test]
fn test_executor_drop_frees_device_memory() {
    let emu = Arc::new(Emulator::new());
    {
        let exec = bind(&emu, BROADCAST_ADD);
        exec.run().unwrap();
    }
    assert_eq!(emu.live_allocations(), 0);
    assert_eq!(emu.memory_in_use(), 0);
}
