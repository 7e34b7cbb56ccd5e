//! Semantic memory commands: store, recall, history, cleanup.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use blitz_types::memory::{HistoryQuery, MemoryScope, Message, NewMessage, RecallOptions, Role};

use super::check_mark;
use crate::state::AppState;

/// Scope flags shared by every memory command.
#[derive(Args, Debug, Default)]
pub struct ScopeArgs {
    #[arg(long)]
    pub thread: Option<String>,

    #[arg(long)]
    pub resource: Option<String>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub session: Option<String>,
}

impl From<ScopeArgs> for MemoryScope {
    fn from(args: ScopeArgs) -> Self {
        MemoryScope {
            user_id: args.user,
            session_id: args.session,
            thread_id: args.thread,
            resource_id: args.resource,
        }
    }
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Embed and store a message.
    Store {
        content: String,

        /// user, assistant, system or tool.
        #[arg(long, default_value = "user")]
        role: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Find stored messages similar to a query.
    Recall {
        query: String,

        #[arg(long, short = 'k')]
        top_k: Option<usize>,

        /// Minimum cosine similarity in [0, 1].
        #[arg(long, short = 't')]
        threshold: Option<f32>,

        /// Neighbouring messages to include on each side of a match.
        #[arg(long, short = 'r')]
        range: Option<usize>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Most recent messages, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Delete messages past the retention window.
    Cleanup {
        /// Override `memory.storage.max_message_age_days`.
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

pub async fn handle(state: &AppState, action: MemoryCommand, json: bool) -> Result<()> {
    match action {
        MemoryCommand::Store {
            content,
            role,
            scope,
        } => store(state, content, &role, scope.into(), json).await,
        MemoryCommand::Recall {
            query,
            top_k,
            threshold,
            range,
            scope,
        } => {
            let options = RecallOptions {
                scope: scope.into(),
                top_k,
                similarity_threshold: threshold,
                message_range: range,
            };
            recall(state, &query, options, json).await
        }
        MemoryCommand::History {
            limit,
            offset,
            scope,
        } => {
            let query = HistoryQuery {
                scope: scope.into(),
                limit,
                offset,
            };
            history(state, &query, json).await
        }
        MemoryCommand::Cleanup { older_than_days } => cleanup(state, older_than_days, json).await,
    }
}

async fn store(
    state: &AppState,
    content: String,
    role: &str,
    scope: MemoryScope,
    json: bool,
) -> Result<()> {
    let role: Role = match role.parse() {
        Ok(role) => role,
        Err(e) => bail!(e),
    };
    let memory = state.memory()?;
    let message = memory
        .store(NewMessage {
            scope,
            ..NewMessage::new(content, role)
        })
        .await?;

    if json {
        let mut stored = message;
        stored.embedding = None;
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Stored {} ({} message)",
        check_mark(true),
        style(message.id).cyan(),
        message.role
    );
    println!();
    Ok(())
}

async fn recall(state: &AppState, query: &str, options: RecallOptions, json: bool) -> Result<()> {
    let memory = state.memory()?;
    let matches = memory.recall(query, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!();
        println!(
            "  {} Nothing similar to '{}' in memory.",
            style("i").blue().bold(),
            style(query).cyan(),
        );
        println!();
        return Ok(());
    }

    println!();
    for (rank, m) in matches.iter().enumerate() {
        println!(
            "  {} {} {}",
            style(format!("#{}", rank + 1)).bold(),
            style(format!("{:.3}", m.similarity)).green(),
            style(format_time(&m.message)).dim(),
        );
        for before in m.context.iter().filter(|c| c.timestamp < m.message.timestamp) {
            println!("      {} {}", style(before.role.to_string()).dim(), style(&before.content).dim());
        }
        println!("    > {} {}", style(m.message.role.to_string()).yellow(), m.message.content);
        for after in m.context.iter().filter(|c| c.timestamp > m.message.timestamp) {
            println!("      {} {}", style(after.role.to_string()).dim(), style(&after.content).dim());
        }
        println!();
    }
    Ok(())
}

async fn history(state: &AppState, query: &HistoryQuery, json: bool) -> Result<()> {
    let memory = state.memory()?;
    let messages = memory.history(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!();
        println!("  {} No messages stored yet.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("Thread").fg(Color::White),
        Cell::new("Content").fg(Color::White),
    ]);
    for message in &messages {
        table.add_row(vec![
            Cell::new(format_time(message)),
            Cell::new(message.role.to_string()),
            Cell::new(message.scope.thread_id.as_deref().unwrap_or("-")),
            Cell::new(truncate(&message.content, 80)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn cleanup(state: &AppState, older_than_days: Option<u32>, json: bool) -> Result<()> {
    let memory = state.memory()?;
    let deleted = match older_than_days {
        Some(days) => {
            memory
                .cleanup_older_than(chrono::Duration::days(i64::from(days)))
                .await?
        }
        None => memory.cleanup_old_messages().await?,
    };
    let days = older_than_days.unwrap_or(memory.config().storage.max_message_age_days);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "deleted": deleted,
                "older_than_days": days,
            }))?
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} Deleted {} message(s) older than {} day(s)",
        check_mark(true),
        style(deleted).bold(),
        days
    );
    println!();
    Ok(())
}

fn format_time(message: &Message) -> String {
    message.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_args_map_to_memory_scope() {
        let scope: MemoryScope = ScopeArgs {
            thread: Some("t1".into()),
            user: Some("u1".into()),
            ..ScopeArgs::default()
        }
        .into();
        assert_eq!(scope.thread_id.as_deref(), Some("t1"));
        assert_eq!(scope.user_id.as_deref(), Some("u1"));
        assert!(scope.resource_id.is_none());
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 6), "héllo…");
    }
}
