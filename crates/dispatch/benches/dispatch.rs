// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for broadcast planning and emulated operator dispatch.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use device_runtime::emu::Emulator;
use graph_ir::GraphLoader;
use npu_dispatch::{BroadcastPlan, DispatchConfig, GraphExecutor};
use std::sync::Arc;

fn bench_broadcast_plan(c: &mut Criterion) {
    let cases: [(&str, [usize; 4], [usize; 4]); 3] = [
        ("same", [64, 32, 8, 2], [64, 32, 8, 2]),
        ("bias", [64, 32, 8, 2], [64, 1, 1, 1]),
        ("outer", [64, 1, 8, 1], [1, 32, 1, 2]),
    ];
    let mut group = c.benchmark_group("broadcast_plan");
    for (name, lhs, rhs) in cases {
        group.bench_function(name, |b| {
            b.iter(|| BroadcastPlan::compute(black_box(&lhs), black_box(&rhs)).unwrap())
        });
    }
    group.finish();
}

fn add_graph(n: usize) -> String {
    let x: Vec<String> = (0..n * n).map(|i| (i % 7).to_string()).collect();
    let b: Vec<String> = (0..n).map(|i| i.to_string()).collect();
    format!(
        r#"{{
            "name": "bench_add",
            "tensors": [
                {{"name": "x", "ne": [{n}, {n}], "data": [{}]}},
                {{"name": "b", "ne": [{n}, 1], "data": [{}]}},
                {{"name": "y", "ne": [{n}, {n}]}}
            ],
            "nodes": [{{"name": "add", "op": "add", "srcs": ["x", "b"], "dst": "y"}}]
        }}"#,
        x.join(", "),
        b.join(", ")
    )
}

fn bench_emulated_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("emulated_add");
    for n in [16usize, 64, 256] {
        let graph = GraphLoader::from_json(&add_graph(n)).unwrap();
        let emu = Arc::new(Emulator::new());
        let config = DispatchConfig {
            enable_profiling: false,
            ..DispatchConfig::default()
        };
        let exec = GraphExecutor::new(emu, config).unwrap().bind(graph).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| exec.run().unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_broadcast_plan, bench_emulated_add);
criterion_main!(benches);
