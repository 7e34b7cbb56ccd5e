//! Tool registry commands: list, call, schema, enable, disable.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use blitz_core::tool::registry::ToolFilter;
use blitz_types::tool::ToolSource;

use super::check_mark;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ToolsCommand {
    /// List registered tools.
    #[command(alias = "ls")]
    List {
        /// Only tools in this category.
        #[arg(long)]
        category: Option<String>,

        /// Only tools from this source (local, remote, provider).
        #[arg(long)]
        source: Option<String>,

        /// Include disabled tools.
        #[arg(long)]
        all: bool,
    },

    /// Invoke a tool.
    Call {
        name: String,

        /// Parameters as a JSON object.
        #[arg(long, short)]
        params: Option<String>,
    },

    /// Print a tool's parameter schema as JSON Schema.
    Schema { name: String },

    /// Enable a tool for this process.
    Enable { name: String },

    /// Disable a tool for this process.
    Disable { name: String },
}

pub async fn handle(state: &AppState, action: ToolsCommand, json: bool) -> Result<()> {
    match action {
        ToolsCommand::List {
            category,
            source,
            all,
        } => list_tools(state, category, source.as_deref(), all, json),
        ToolsCommand::Call { name, params } => call_tool(state, &name, params.as_deref(), json).await,
        ToolsCommand::Schema { name } => show_schema(state, &name),
        ToolsCommand::Enable { name } => set_enabled(state, &name, true, json),
        ToolsCommand::Disable { name } => set_enabled(state, &name, false, json),
    }
}

fn parse_source(source: &str) -> Result<ToolSource> {
    match source.to_ascii_lowercase().as_str() {
        "local" => Ok(ToolSource::Local),
        "remote" => Ok(ToolSource::Remote),
        "provider" => Ok(ToolSource::Provider),
        other => bail!("unknown tool source '{other}' (expected local, remote or provider)"),
    }
}

/// Parse `--params`, which must be a JSON object when given.
fn parse_params(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).context("--params is not valid JSON")?;
    if !value.is_object() {
        bail!("--params must be a JSON object");
    }
    Ok(value)
}

fn list_tools(
    state: &AppState,
    category: Option<String>,
    source: Option<&str>,
    all: bool,
    json: bool,
) -> Result<()> {
    let filter = ToolFilter {
        category,
        source: source.map(parse_source).transpose()?,
        enabled_only: !all,
    };
    let tools = state.registry().list(&filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!();
        println!(
            "  {} No tools registered. Is the tool backend reachable? Try {}",
            style("i").blue().bold(),
            style("blitz health").cyan(),
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Category").fg(Color::White),
        Cell::new("Source").fg(Color::White),
        Cell::new("Params").fg(Color::White),
        Cell::new("Enabled").fg(Color::White),
        Cell::new("Description").fg(Color::White),
    ]);

    for tool in &tools {
        let params: Vec<String> = tool
            .schema
            .params()
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}*", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect();
        table.add_row(vec![
            Cell::new(&tool.name).fg(Color::Cyan),
            Cell::new(&tool.category),
            Cell::new(tool.source.to_string()),
            Cell::new(params.join(", ")),
            Cell::new(check_mark(tool.enabled)),
            Cell::new(&tool.description),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} tool(s), categories: {}",
        style(tools.len()).bold(),
        state
            .registry()
            .categories()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    Ok(())
}

async fn call_tool(state: &AppState, name: &str, params: Option<&str>, json: bool) -> Result<()> {
    let params = parse_params(params)?;
    let result = state.registry().execute(name, params).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if result.success {
        println!(
            "  {} {} completed in {}ms",
            check_mark(true),
            style(&result.tool_name).cyan(),
            result.elapsed_ms
        );
        println!();
        let payload = result.payload.unwrap_or(Value::Null);
        match payload {
            Value::String(text) => println!("{text}"),
            other => println!("{}", serde_json::to_string_pretty(&other)?),
        }
    } else {
        println!(
            "  {} {} failed after {}ms: {}",
            check_mark(false),
            style(&result.tool_name).cyan(),
            result.elapsed_ms,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!();
    Ok(())
}

fn show_schema(state: &AppState, name: &str) -> Result<()> {
    let schema = state
        .registry()
        .tool_schema(name)
        .with_context(|| format!("Tool '{name}' not found"))?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn set_enabled(state: &AppState, name: &str, enabled: bool, json: bool) -> Result<()> {
    if enabled {
        state.registry().enable(name)?;
    } else {
        state.registry().disable(name)?;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "name": name, "enabled": enabled }))?
        );
    } else {
        println!();
        println!(
            "  {} {} {}",
            check_mark(true),
            style(name).cyan(),
            if enabled { "enabled" } else { "disabled" }
        );
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_default_to_empty_object() {
        assert_eq!(parse_params(None).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_params(Some(r#"{"table":"orders"}"#)).unwrap(),
            serde_json::json!({"table": "orders"})
        );
    }

    #[test]
    fn params_must_be_object() {
        assert!(parse_params(Some("[1,2]")).is_err());
        assert!(parse_params(Some("{not json")).is_err());
    }

    #[test]
    fn source_names() {
        assert_eq!(parse_source("Remote").unwrap(), ToolSource::Remote);
        assert!(parse_source("cloud").is_err());
    }
}
