//! Command-line driver for the MI breakpoint and process services.

mod script;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use mi_core::{BreakpointEvent, ServiceConfig, ServiceHandle, SimulatedGdb};
use script::{Runner, Script};
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Service configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session id, overriding the configuration
    #[arg(long)]
    session: Option<String>,

    /// Do not print breakpoint events
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a JSON script against the simulated backend
    Run { script: PathBuf },
    /// Run the built-in demo script
    Demo,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(session) = cli.session {
        config.session_id = session;
        config.validate()?;
    }

    let script = match cli.command {
        Commands::Run { script } => Script::load(&script)?,
        Commands::Demo => Script::from_json(script::DEMO)?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
    };

    let (gdb, backend_events) = SimulatedGdb::spawn(script.backend.state())?;
    let handle = ServiceHandle::spawn(&config, gdb.clone())?;
    let printer = (!cli.quiet).then(|| tokio::spawn(print_events(handle.subscribe())));

    let reports = Runner::new(&handle, &gdb, &backend_events)
        .run(&script, |report| match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("failed to render step {}: {err}", report.index),
        })
        .await;

    // Closing the session closes the event stream, which ends the printer.
    handle.shutdown()?;
    if let Some(printer) = printer {
        printer.await?;
    }

    let unexpected = reports.iter().filter(|report| !report.as_expected).count();
    if unexpected > 0 {
        bail!("{unexpected} of {} step(s) did not go as expected", reports.len());
    }
    info!("all {} step(s) went as expected", reports.len());
    Ok(())
}

async fn print_events(events: broadcast::Receiver<BreakpointEvent>) {
    let mut stream = BroadcastStream::new(events);
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                let kind = match event {
                    BreakpointEvent::Added { .. } => "added",
                    BreakpointEvent::Updated { .. } => "updated",
                    BreakpointEvent::Removed { .. } => "removed",
                };
                let breakpoints: Vec<_> = event.breakpoints().iter().map(script::describe_breakpoint).collect();
                println!("{}", json!({ "event": kind, "target": event.target().to_string(), "breakpoints": breakpoints }));
            }
            Err(err) => warn!("event stream: {err}"),
        }
    }
}
