//! CLI entry point for ivium-session
//!
//! Drives one instrument session from a line-based console:
//! - `connect` talks to a remote driver host over gRPC
//! - `simulate` runs against an in-process simulated host
//!
//! # Usage
//!
//! ```bash
//! ivium-session connect --endpoint http://lab-pc:50051
//! ivium-session --log-level debug simulate
//! ```
//!
//! Console commands: `open`, `close`, `device on|off`, `cell on|off`, `status`, `quit`.
//! The driver is closed on `quit`, end of input, or Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ivium_client::{resolve_address, Gateway, GrpcGateway, LoggingGateway};
use ivium_session::config::{SessionConfig, DEFAULT_CONFIG_PATH};
use ivium_session::{logging, Session, SessionEvent, SessionView};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "ivium-session")]
#[command(about = "Control an Ivium potentiostat through IviumSoft", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a driver host over gRPC
    Connect {
        /// Host URL (overrides IVIUM_HOST_URL and the config file)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Run against a simulated driver host
    Simulate,
}

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Open,
    Close,
    Device(bool),
    Cell(bool),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("open", None) => Command::Open,
        ("close", None) => Command::Close,
        ("device", Some(arg)) => Command::Device(parse_switch(arg)?),
        ("cell", Some(arg)) => Command::Cell(parse_switch(arg)?),
        ("status", None) => Command::Status,
        ("help" | "?", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        _ => return None,
    };
    words.next().is_none().then_some(command)
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

const HELP: &str = "commands: open | close | device on|off | cell on|off | status | quit";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SessionConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    let gateway = build_gateway(&cli.command, &config)?;
    let session = Session::new(gateway, &config.poller, tokio::runtime::Handle::current());
    run_console(session).await
}

fn build_gateway(command: &Commands, config: &SessionConfig) -> Result<Arc<dyn Gateway>> {
    let log_calls = config.gateway.log_calls;
    match command {
        Commands::Connect { endpoint } => {
            let address =
                resolve_address(endpoint.as_deref(), config.gateway.endpoint.as_deref());
            tracing::info!(%address, "connecting to driver host");
            let gateway = GrpcGateway::new(&address, &config.channel_config())
                .context("building gRPC gateway")?;
            Ok(wrap(gateway, log_calls))
        }
        Commands::Simulate => {
            tracing::info!(latency = ?config.simulation.latency, "using simulated driver host");
            Ok(wrap(config.simulation.gateway(), log_calls))
        }
    }
}

fn wrap<G: Gateway + 'static>(gateway: G, log_calls: bool) -> Arc<dyn Gateway> {
    if log_calls {
        Arc::new(LoggingGateway::new(gateway))
    } else {
        Arc::new(gateway)
    }
}

async fn run_console(mut session: Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("{HELP}");
    print_view(&session);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => execute(&mut session, command),
                    None => println!("unknown command `{}`; {HELP}", line.trim()),
                }
            }
            Some(event) = session.next_event() => {
                report(&event);
                if !matches!(event, SessionEvent::PotentialUpdated { .. } | SessionEvent::StaleResultDiscarded) {
                    print_view(&session);
                }
            }
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    match session.end().await {
        Some(Ok(())) => println!("driver closed"),
        Some(Err(failure)) => println!("driver close failed: {failure}"),
        None => {}
    }
    Ok(())
}

fn execute(session: &mut Session, command: Command) {
    let controls = session.controls();
    let refused = |what: &str| println!("{what} is not available right now");
    match command {
        Command::Open if controls.open_driver => session.open_driver(),
        Command::Open => refused("open"),
        Command::Close if controls.close_driver => session.close_driver(),
        Command::Close => refused("close"),
        Command::Device(on) if controls.device_toggle => session.connect_device(on),
        Command::Device(_) => refused("device"),
        Command::Cell(on) if controls.cell_toggle => session.set_cell_status(on),
        Command::Cell(_) => refused("cell"),
        Command::Status => {
            match serde_json::to_string_pretty(&session.snapshot()) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::warn!("cannot render snapshot: {err}"),
            }
            return;
        }
        Command::Help => {
            println!("{HELP}");
            return;
        }
        Command::Quit => return,
    }
    print_view(session);
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::MutationFailed { mutation, tag, .. } => {
            println!("{mutation} failed ({tag})");
        }
        SessionEvent::PollFailed { tag, recovery } => {
            println!("potential read failed ({tag}): {}", recovery.hint());
        }
        SessionEvent::AcknowledgementDropped { mutation } => {
            println!("{mutation} acknowledged after the link was lost; ignored");
        }
        SessionEvent::PotentialUpdated { volts } => {
            println!("Potential: {}", ivium_session::format_potential(*volts));
        }
        _ => {}
    }
}

fn print_view(session: &Session) {
    println!("{}", SessionView::from_snapshot(&session.snapshot()));
}
