//! Metrics snapshot command.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

/// Errors printed in the styled view. `--json` carries the whole ring.
const RECENT_ERRORS_SHOWN: usize = 10;

pub fn show(state: &AppState, json: bool) -> Result<()> {
    let snapshot = state.metrics().snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("── Queries ──").dim());
    println!("  Total:        {}", style(snapshot.total_queries).bold());
    println!("  Failed:       {}", snapshot.failed_queries);
    println!("  Errors:       {}", snapshot.total_errors);
    println!("  Success rate: {:.1}%", snapshot.success_rate * 100.0);
    println!(
        "  Latency:      avg {:.1}ms, p50 {:.1}ms, p95 {:.1}ms",
        snapshot.avg_response_time_ms, snapshot.p50_response_time_ms, snapshot.p95_response_time_ms
    );
    println!();

    println!("  {}", style("── Tokens ──").dim());
    println!("  Total:        {}", snapshot.total_tokens);
    for (kind, count) in &snapshot.tokens_by_type {
        println!("  {kind:<13} {count}");
    }
    println!();

    if !snapshot.tools.is_empty() {
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Tool").fg(Color::White),
            Cell::new("Calls").fg(Color::White),
            Cell::new("Errors").fg(Color::White),
            Cell::new("Avg ms").fg(Color::White),
        ]);
        for (name, stats) in &snapshot.tools {
            table.add_row(vec![
                Cell::new(name).fg(Color::Cyan),
                Cell::new(stats.calls),
                Cell::new(stats.errors),
                Cell::new(format!("{:.1}", stats.avg_duration_ms)),
            ]);
        }
        println!("{table}");
        println!();
    }

    if !snapshot.memory.is_empty() {
        println!("  {}", style("── Memory ──").dim());
        for (op, stats) in &snapshot.memory {
            println!(
                "  {:<13} {} op(s), {} error(s), avg {:.1}ms",
                format!("{op:?}").to_lowercase(),
                stats.count,
                stats.errors,
                stats.avg_duration_ms
            );
        }
        println!();
    }

    if !snapshot.recent_errors.is_empty() {
        println!("  {}", style("── Recent errors ──").dim());
        for error in snapshot.recent_errors.iter().take(RECENT_ERRORS_SHOWN) {
            println!(
                "  {} [{}] {}{}",
                style(error.timestamp.format("%H:%M:%S")).dim(),
                style(&error.kind).red(),
                error.message,
                error
                    .tool
                    .as_deref()
                    .map(|t| format!(" ({t})"))
                    .unwrap_or_default()
            );
        }
        println!();
    }

    println!(
        "  Uptime: {}s, active sessions: {}",
        snapshot.uptime_secs, snapshot.active_sessions
    );
    println!();
    Ok(())
}
