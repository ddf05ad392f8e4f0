//! Serialwatch - line-oriented serial monitor
//!
//! Reads a serial port line by line, flags lines containing watched patterns,
//! fires reply commands or events from conditions, and plays command scripts.

use anyhow::Context;
use chrono::Local;
use clap::{ArgAction, Args, Parser, Subcommand};
use serialwatch_core::cli::{self, level_for, CliResult, ExitCodes, LogOptions, OutputFormat};
use serialwatch_core::config::{self, AppConfig, ConditionConfig, ConfigError};
use serialwatch_core::{
    ActionKind, Engine, EngineError, EngineEvent, HistoryEntry, LineEnding, PlaybackReport,
    Submission,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Serialwatch CLI
#[derive(Parser, Debug)]
#[command(
    name = "serialwatch",
    version,
    about = "Line-oriented serial monitor with pattern rules",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the per-user config.toml)
    #[arg(short, long, global = true, env = "SERIALWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Monitor a port; stdin lines are sent as commands or played as scripts
    Monitor(MonitorArgs),

    /// Open a port, play one script file and exit
    RunScript(RunScriptArgs),

    /// Print the exit code table
    ExitCodes,
}

/// Endpoint overrides shared by the session commands
#[derive(Args, Debug)]
struct PortArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    #[arg(short, long, env = "SERIALWATCH_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Read timeout in milliseconds
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Line ending for sent commands (cr, lf, crlf)
    #[arg(long)]
    line_ending: Option<LineEnding>,
}

impl PortArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.port.name.clone_from(port);
        }
        if let Some(baud) = self.baud {
            config.port.baud_rate = baud;
        }
        if let Some(timeout) = self.read_timeout_ms {
            config.port.read_timeout_ms = timeout;
        }
        if let Some(ending) = self.line_ending {
            config.engine.line_ending = ending;
        }
    }
}

#[derive(Args, Debug)]
struct MonitorArgs {
    #[command(flatten)]
    port: PortArgs,

    /// Watch for this substring (repeatable)
    #[arg(short = 'P', long = "pattern")]
    patterns: Vec<String>,

    /// Condition as ID:KIND:PATTERN=>ACTION, KIND is command or event (repeatable)
    #[arg(short = 'C', long = "condition", value_parser = parse_condition)]
    conditions: Vec<ConditionConfig>,

    /// Play this script after opening
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Play the stored command list from the config after opening
    #[arg(long)]
    send_stored: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Prefix printed and saved lines with a timestamp
    #[arg(long)]
    timestamps: bool,

    /// Save received traces to this file on exit
    #[arg(long)]
    save_traces: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunScriptArgs {
    #[command(flatten)]
    port: PortArgs,

    /// Script file
    file: PathBuf,

    /// Keep reading this long after the last entry (milliseconds)
    #[arg(long, default_value = "500")]
    drain_ms: u64,
}

/// Parse `ID:KIND:PATTERN=>ACTION`
fn parse_condition(s: &str) -> Result<ConditionConfig, String> {
    let (id, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ID:KIND:PATTERN=>ACTION, got {s:?}"))?;
    let (kind, rule) = rest
        .split_once(':')
        .ok_or_else(|| format!("missing KIND in {s:?}"))?;
    let (pattern, action) = rule
        .split_once("=>")
        .ok_or_else(|| format!("missing => in {s:?}"))?;

    let id = id.trim().parse().map_err(|e| format!("bad id {id:?}: {e}"))?;
    let kind: ActionKind = kind.trim().parse()?;
    if pattern.is_empty() {
        return Err(format!("empty pattern in {s:?}"));
    }

    Ok(ConditionConfig {
        id,
        pattern: pattern.to_string(),
        action: action.to_string(),
        kind,
    })
}

/// Log file from the config, with the data directories created for it
fn configured_log_file(app_config: &AppConfig) -> Option<PathBuf> {
    let file = app_config.logging.resolved_file()?;
    if let Err(e) = config::init_directories() {
        eprintln!("Failed to create data directories: {e}");
    }
    Some(file)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return finish(&cli, CliResult::from(e)),
    };

    let log_options = LogOptions {
        level: level_for(cli.verbose, cli.quiet, &app_config.logging.level),
        json: cli.json_logs || app_config.logging.json,
        file: cli.log_file.clone().or_else(|| configured_log_file(&app_config)),
    };
    let _log_guard = match cli::init_logging(&log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    tracing::debug!("Starting {} v{}", serialwatch_core::NAME, serialwatch_core::VERSION);

    let result = match &cli.command {
        Commands::ListPorts { detailed } => list_ports(&cli, *detailed),
        Commands::Monitor(args) => monitor(&cli, app_config, args).await,
        Commands::RunScript(args) => run_script(&cli, app_config, args).await,
        Commands::ExitCodes => {
            cli::print_exit_codes();
            Ok(CliResult::success())
        }
    };

    finish(&cli, result.unwrap_or_else(into_cli_result))
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => match config::default_config_path() {
            Some(path) if path.exists() => AppConfig::load_from(&path),
            _ => Ok(AppConfig::default()),
        },
    }
}

fn into_cli_result(err: anyhow::Error) -> CliResult {
    if let Some(e) = err.downcast_ref::<EngineError>() {
        return CliResult::from(e);
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return CliResult::error(ExitCodes::CONFIG_ERROR, format!("{err:#}"));
    }
    CliResult::error(ExitCodes::ERROR, format!("{err:#}"))
}

fn finish(cli: &Cli, result: CliResult) -> ExitCode {
    match &result {
        CliResult::Error(_, msg) => eprintln!("Error: {msg}"),
        CliResult::Success(Some(msg)) if !cli.quiet => eprintln!("{msg}"),
        CliResult::Success(_) => {}
    }
    result.to_exit_code()
}

fn list_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = serialwatch_core::list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            eprintln!("No serial ports found.");
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(CliResult::success())
}

async fn monitor(cli: &Cli, mut app_config: AppConfig, args: &MonitorArgs) -> anyhow::Result<CliResult> {
    args.port.apply(&mut app_config);
    app_config.rules.patterns.extend(args.patterns.iter().cloned());
    for condition in &args.conditions {
        app_config.set_condition(condition.clone());
    }
    app_config.validate()?;

    let engine = Engine::open_serial(app_config.engine_config()).await?;
    let cancel = CancellationToken::new();
    install_ctrlc(&cancel)?;

    if !cli.quiet {
        eprintln!("{}. Press Ctrl+C to exit.", engine.session().status_line());
    }

    let printer = spawn_printer(engine.subscribe(), cli.format, args.timestamps, cancel.clone());
    engine.run()?;

    if let Err(e) = play_startup(&engine, &cancel, args.send_stored, args.script.as_deref()).await {
        let _ = printer.await;
        return Err(e.into());
    }

    let submitter = spawn_submitter(engine.clone(), cancel.clone());

    match args.timeout {
        Some(secs) => {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::info!("Timeout reached after {}s", secs);
                }
            }
        }
        None => cancel.cancelled().await,
    }

    cancel.cancel();
    engine.stop().await?;
    submitter.abort();
    let _ = printer.await;

    if let Some(path) = &args.save_traces {
        engine
            .save_traces(path, args.timestamps)
            .with_context(|| format!("saving traces to {}", path.display()))?;
        tracing::info!("Traces saved to {}", path.display());
    }

    Ok(CliResult::success())
}

/// Play stored commands and the startup script; a failure closes the session
async fn play_startup(
    engine: &Engine,
    cancel: &CancellationToken,
    send_stored: bool,
    script: Option<&Path>,
) -> Result<(), EngineError> {
    let played = async {
        if send_stored {
            log_report("stored commands", &engine.send_stored_commands().await?);
        }
        if let Some(script) = script {
            log_report("script", &engine.play_script_file(script).await?);
        }
        Ok::<(), EngineError>(())
    }
    .await;

    if played.is_err() {
        cancel.cancel();
        if let Err(e) = engine.stop().await {
            tracing::warn!("Failed to close session: {}", e);
        }
    }
    played
}

async fn run_script(cli: &Cli, mut app_config: AppConfig, args: &RunScriptArgs) -> anyhow::Result<CliResult> {
    args.port.apply(&mut app_config);
    app_config.validate()?;

    let engine = Engine::open_serial(app_config.engine_config()).await?;
    let cancel = CancellationToken::new();
    install_ctrlc(&cancel)?;

    let printer = spawn_printer(engine.subscribe(), cli.format, false, cancel.clone());
    engine.run()?;

    let played = tokio::select! {
        () = cancel.cancelled() => None,
        played = engine.play_script_file(&args.file) => Some(played),
    };

    if played.is_some() {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(Duration::from_millis(args.drain_ms)) => {}
        }
    }

    cancel.cancel();
    engine.stop().await?;
    let _ = printer.await;

    let Some(played) = played else {
        return Ok(CliResult::error(ExitCodes::CANCELLED, "Interrupted"));
    };
    let report = played?;
    log_report("script", &report);

    if report.is_clean() {
        Ok(CliResult::success_with_message(format!(
            "{} command(s) sent",
            report.sent.len()
        )))
    } else {
        Ok(CliResult::script_failed(report.failures.len()))
    }
}

fn install_ctrlc(cancel: &CancellationToken) -> anyhow::Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || cancel.cancel()).context("installing Ctrl+C handler")
}

fn log_report(what: &str, report: &PlaybackReport) {
    tracing::info!(
        "Played {}: {} sent, {} delay unit(s), {} failure(s)",
        what,
        report.sent.len(),
        report.delayed_units,
        report.failures.len()
    );
    for failure in &report.failures {
        tracing::warn!("  line {} ({:?}): {}", failure.line, failure.entry, failure.error);
    }
}

/// Print notifications until cancelled; buffered events drain first
fn spawn_printer(
    mut events: broadcast::Receiver<EngineEvent>,
    format: OutputFormat,
    timestamps: bool,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                () = cancel.cancelled() => break,
            };

            match event {
                Ok(event) => print_event(&event, format, timestamps),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Output lagged, {} notification(s) skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &EngineEvent, format: OutputFormat, timestamps: bool) {
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("Failed to encode event: {}", e),
        },
        OutputFormat::Text => match event {
            EngineEvent::LineReceived { text, matched } => {
                let entry = HistoryEntry {
                    timestamp: Local::now(),
                    text: text.clone(),
                    matched: *matched,
                };
                println!("{}", entry.to_text(timestamps));
            }
            EngineEvent::PatternDetected { condition_id, payload } => {
                println!("! condition {condition_id}: {payload}");
            }
            EngineEvent::CommandAreaShouldClear => {}
        },
    }
}

/// Feed stdin lines to `Engine::submit`, one at a time
fn spawn_submitter(engine: Engine, cancel: CancellationToken) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<String>(64);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("stdin closed: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            match engine.submit(&line).await {
                Ok(Submission::Script(report)) => log_report("script", &report),
                Ok(Submission::Command | Submission::Ignored) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
    })
}
