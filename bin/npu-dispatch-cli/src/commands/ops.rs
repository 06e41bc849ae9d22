// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `npu-dispatch ops` command: list supported opcodes.

use graph_ir::OpKind;

pub fn execute() -> anyhow::Result<()> {
    println!("  {:<22} {}", "Opcode", "Sources");
    println!("  {}", "-".repeat(32));
    for op in OpKind::ALL {
        let (min, max) = op.arity();
        let arity = if min == max {
            min.to_string()
        } else {
            format!("{min}-{max}")
        };
        println!("  {:<22} {arity}", op.as_str());
    }
    println!();
    println!("  {} opcodes", OpKind::ALL.len());
    Ok(())
}
