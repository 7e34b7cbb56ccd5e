//! Health check command.

use anyhow::{Result, bail};
use console::style;

use super::check_mark;
use crate::state::AppState;

/// Probe the transport and memory store. Exits non-zero when unhealthy.
pub async fn check(state: &AppState, json: bool) -> Result<()> {
    let health = state.runtime.health().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        println!();
        println!(
            "  {} Transport ({}): {}",
            check_mark(health.transport_error.is_none()),
            health.transport.kind,
            match &health.transport_error {
                None => format!("{} tool(s)", health.transport.tools.len()),
                Some(e) => format!("{}", style(e).red()),
            }
        );
        match &health.memory {
            Some(memory) => println!(
                "  {} Memory ({}): {} message(s), {}ms{}",
                check_mark(memory.healthy),
                memory.backend,
                memory.message_count,
                memory.latency_ms,
                memory
                    .error
                    .as_deref()
                    .map(|e| format!(", {}", style(e).red()))
                    .unwrap_or_default()
            ),
            None => println!("  {} Memory: {}", style("-").dim(), style("not configured").dim()),
        }
        println!(
            "  {} Tools registered: {}",
            check_mark(!state.registry().is_empty()),
            state.registry().len()
        );
        println!();
    }

    if !health.healthy() {
        bail!("runtime is unhealthy");
    }
    Ok(())
}
