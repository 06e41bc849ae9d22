// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # npu-dispatch
//!
//! Command-line interface for the NPU dispatch layer, backed by the device
//! emulator.
//!
//! ## Usage
//! ```bash
//! # Evaluate a graph manifest
//! npu-dispatch run --graph ./graphs/attention.json --pool-budget 64M
//!
//! # Validate a manifest and list its tensors and nodes
//! npu-dispatch inspect --graph ./graphs/attention.json
//!
//! # List supported opcodes
//! npu-dispatch ops
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "npu-dispatch",
    about = "Broadcast-aware operator dispatch onto an emulated NPU",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a graph manifest and print its outputs.
    Run {
        /// Path to the graph manifest (JSON).
        #[arg(short, long)]
        graph: std::path::PathBuf,

        /// Scratch pool budget (e.g., "64M"); overrides the config file.
        #[arg(short = 'b', long)]
        pool_budget: Option<String>,

        /// Print the run metrics as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Validate a graph manifest and list its tensors and nodes.
    Inspect {
        /// Path to the graph manifest (JSON).
        #[arg(short, long)]
        graph: std::path::PathBuf,
    },

    /// List the supported opcodes with their source counts.
    Ops,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            graph,
            pool_budget,
            json,
        } => {
            let config = commands::load_config(cli.config.as_deref(), pool_budget)?;
            commands::run::execute(graph, config, json)
        }
        Commands::Inspect { graph } => commands::inspect::execute(graph),
        Commands::Ops => commands::ops::execute(),
    }
}
