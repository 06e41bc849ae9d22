// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `npu-dispatch run` command: evaluate a graph on the emulated device.
//!
//! Walks the executor type-state pipeline:
//! ```text
//! GraphExecutor<Idle> → bind(graph) → <Bound> → run → GraphOutput
//! ```

use super::truncate;
use device_runtime::emu::Emulator;
use npu_dispatch::{DispatchConfig, GraphExecutor, GraphOutput};
use std::path::PathBuf;
use std::sync::Arc;

/// Values printed per output tensor before eliding the rest.
const PREVIEW: usize = 8;

pub fn execute(graph_path: PathBuf, config: DispatchConfig, json: bool) -> anyhow::Result<()> {
    let graph = graph_ir::GraphLoader::load(&graph_path).map_err(|e| {
        tracing::warn!("graph load failed: {e}");
        anyhow::anyhow!("failed to load graph from '{}': {e}", graph_path.display())
    })?;
    tracing::info!(graph = %graph.summary(), "graph loaded");

    let capacity = config.parse_device_memory()?.as_bytes();
    let emu = Arc::new(Emulator::with_capacity(capacity));

    if !json {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║              npu-dispatch · Graph Runner             ║");
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        println!("  Config:");
        println!("   Graph:     {}", graph_path.display());
        println!("   Pool:      {}", config.pool_budget);
        println!("   Device:    {} (id {})", config.device_memory, config.device_id);
        println!("   Profiling: {}", config.enable_profiling);
        println!();
        println!("  [1/2] Binding {}...", graph.summary());
    }

    let bound = GraphExecutor::new(emu.clone(), config)?.bind(graph)?;

    if !json {
        println!("  [2/2] Dispatching...");
        println!();
    }
    let output = bound.run().map_err(|e| {
        tracing::error!(error = %e, "graph run failed");
        e
    })?;
    tracing::debug!(ops = output.metrics.ops.len(), "graph run finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&output.metrics)?);
        return Ok(());
    }

    print_outputs(&output);
    println!("  Metrics:");
    println!("   {}", output.metrics.summary());
    if let Some(slowest) = output.metrics.slowest() {
        println!("   Slowest: {} ({}) {:?}", slowest.node, slowest.op, slowest.duration);
    }
    println!();

    let stats = emu.stats();
    println!("  Device:");
    println!(
        "   {} launches, {} handles created, {} live",
        stats.launches.len(),
        stats.tensors_created,
        stats.live_tensors()
    );
    println!("   Pool: {}", bound.pool_stats().summary());
    println!();
    Ok(())
}

fn print_outputs(output: &GraphOutput) {
    println!("  Outputs:");
    for (name, tensor) in &output.tensors {
        let values = tensor.to_f64_vec();
        let shown: Vec<String> = values.iter().take(PREVIEW).map(|v| format!("{v:.4}")).collect();
        let more = if values.len() > PREVIEW { ", ..." } else { "" };
        println!(
            "   {:<20} {} {:?} [{}{more}]",
            truncate(name, 20),
            tensor.dtype(),
            tensor.ne(),
            shown.join(", "),
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_graph_is_an_error() {
        let err = execute(PathBuf::from("no/such/graph.json"), DispatchConfig::default(), true)
            .unwrap_err();
        assert!(err.to_string().contains("failed to load graph"), "{err}");
    }
}
