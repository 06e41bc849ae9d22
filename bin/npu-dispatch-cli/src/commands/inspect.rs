// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `npu-dispatch inspect` command: validate a manifest and list its contents.

use super::truncate;
use std::path::PathBuf;

pub fn execute(graph_path: PathBuf) -> anyhow::Result<()> {
    let graph = graph_ir::GraphLoader::load(&graph_path)
        .map_err(|e| anyhow::anyhow!("failed to load graph from '{}': {e}", graph_path.display()))?;

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             npu-dispatch · Graph Inspector           ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Summary ────────────────────────────────────────────────
    println!("  Graph: {}", graph.name);
    println!("  Nodes: {}", graph.num_nodes());
    println!("  Tensors: {}", graph.tensors.len());
    println!(
        "  Device memory: {:.2} KB",
        graph.total_tensor_bytes() as f64 / 1024.0
    );
    println!();

    // ── Tensors ────────────────────────────────────────────────
    println!("  {:<4} {:<24} {:<6} {:<20} {}", "Idx", "Name", "DType", "Extents", "Storage");
    println!("  {}", "-".repeat(72));
    for (i, t) in graph.tensors.iter().enumerate() {
        let storage = match &t.view {
            Some(v) => {
                let base = graph.tensor(v.base).map_or("?", |b| b.name.as_str());
                format!("view of {base} +{}", v.offset)
            }
            None if t.data.is_some() => "initialised".to_string(),
            None => "uninitialised".to_string(),
        };
        println!(
            "  {:<4} {:<24} {:<6} {:<20} {}",
            i,
            truncate(&t.name, 24),
            t.dtype,
            format!("{:?}", t.ne),
            storage,
        );
    }
    println!();

    // ── Nodes ──────────────────────────────────────────────────
    println!("  {:<4} {:<20} {:<20} {:<28} {}", "Idx", "Name", "Op", "Sources", "Dest");
    println!("  {}", "-".repeat(82));
    let name_of = |i: usize| graph.tensor(i).map_or("?", |t| t.name.as_str());
    for (i, node) in graph.iter_nodes().enumerate() {
        let srcs: Vec<&str> = node.srcs.iter().map(|&s| name_of(s)).collect();
        println!(
            "  {:<4} {:<20} {:<20} {:<28} {}",
            i,
            truncate(&node.name, 20),
            node.op.as_str(),
            truncate(&srcs.join(", "), 28),
            name_of(node.dst),
        );
        for (key, value) in node.params.iter() {
            println!("       {key} = {value}");
        }
    }
    println!();

    let outputs: Vec<&str> = graph.outputs.iter().map(|&o| name_of(o)).collect();
    println!("  Outputs: {}", outputs.join(", "));
    println!();
    Ok(())
}
