use std::sync::Arc;

use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use fal_core::{
    outcome_for_error, CommandContext, CommandStatus, Config, ExecutionOutcome, GlobalOptions,
    SystemEffects,
};
use serde_json::{json, Value};

mod cli;
mod dispatch;
mod style;

use cli::FalCli;
use dispatch::{command_name, dispatch_command};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = FalCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };

    let outcome = match prepare(&global) {
        Ok(ctx) => dispatch_command(&ctx, &cli.command),
        Err(err) => outcome_for_error(&err),
    };
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn prepare(global: &GlobalOptions) -> anyhow::Result<CommandContext<'_>> {
    let config = Config::from_env()?;
    let effects = Arc::new(SystemEffects::from_config(&config)?);
    Ok(CommandContext::new(global, config, effects))
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("fal={level},fal_cli={level},fal_core={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn status_label(status: &CommandStatus) -> &'static str {
    match status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "failure",
    }
}

fn emit_output(cli: &FalCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if cli.json {
        let payload = json!({
            "command": command_name(&cli.command),
            "status": status_label(&outcome.status),
            "message": outcome.message,
            "details": outcome.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(atty::is(Stream::Stdout));
    if outcome.status != CommandStatus::Ok {
        eprintln!("{}", style.status(&outcome.status, &outcome.message));
        return Ok(code);
    }
    if cli.quiet {
        return Ok(code);
    }
    println!("{}", style.status(&outcome.status, &outcome.message));
    if let Some(table) = render_environment_table(&style, &outcome.details) {
        println!("{table}");
    } else if let Some(result) = outcome.details.get("result") {
        println!("{}", style.info(&serde_json::to_string_pretty(result)?));
    } else if outcome.details.get("kind").is_some() {
        println!("{}", serde_json::to_string_pretty(&outcome.details)?);
    }

    Ok(code)
}

fn render_environment_table(style: &Style, details: &Value) -> Option<String> {
    let environments = details.get("environments")?.as_array()?;
    if environments.is_empty() {
        return None;
    }
    let rows: Vec<[String; 3]> = environments
        .iter()
        .map(|env| {
            let text = |key: &str| env.get(key).and_then(Value::as_str).unwrap_or("-").to_string();
            [text("name"), text("type"), text("machine_type")]
        })
        .collect();

    let headers = ["Environment", "Type", "Machine"];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let line = |cells: [&str; 3]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        )
    };

    let mut lines = vec![style.table_header(&line(headers))];
    lines.push(format!(
        "{:-<w0$}  {:-<w1$}  {:-<w2$}",
        "",
        "",
        "",
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
    ));
    for row in &rows {
        lines.push(line([row[0].as_str(), row[1].as_str(), row[2].as_str()]));
    }
    Some(lines.join("\n"))
}
