/*!
# snpx

Command-line client for robot controllers speaking SNPX.

## Usage

```bash
snpx --host 192.168.1.10 read-io "DI[1]" --count 8
snpx --host 192.168.1.10 write-io "DO[1]" 1,0,1
snpx --host 192.168.1.10 position joint
snpx --host 192.168.1.10 read-var '$ANGTOL[1]' real
snpx --host 192.168.1.10 write-var '$ANGTOL[1]' real 1200.13
snpx --host 192.168.1.10 poll --interval-ms 200
```

### Without a controller
```bash
snpx --simulate position cartesian
snpx serve --port 60008
```

Results are printed to stdout as JSON; logs go to stderr.
*/

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use snpx::{PositionKind, Session, SimulatedController, Transport, Value, VarType};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod address;
mod config;
mod poll;
mod serve;

use address::{parse_bools, SignalAddress};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "snpx")]
#[command(about = "Read and write robot controller data over SNPX")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults are used when it does not exist)
    #[arg(short, long, default_value = "snpx.toml")]
    config: PathBuf,

    /// Controller host, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Controller port, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Talk to an in-process simulated controller instead of a real one
    #[arg(long)]
    simulate: bool,

    /// Log filter such as `info` or `snpx=debug`; falls back to RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read digital signals
    ReadIo {
        /// First signal, e.g. DI[1]
        address: SignalAddress,

        /// Number of consecutive signals
        #[arg(short = 'n', long, default_value = "1")]
        count: u16,
    },

    /// Write digital signals
    WriteIo {
        /// First signal, e.g. DO[1]
        address: SignalAddress,

        /// Comma-separated values: 1,0,1 or true,false
        values: String,
    },

    /// Read the current robot position
    Position {
        #[arg(value_enum)]
        kind: PositionArg,
    },

    /// Read a system variable
    ReadVar {
        name: String,
        var_type: VarType,
    },

    /// Write a system variable
    WriteVar {
        name: String,
        var_type: VarType,
        value: String,
    },

    /// Bind a variable to a slot range and print the slot
    Assign {
        name: String,
        var_type: VarType,

        /// First slot (1-80); the lowest free range when omitted
        #[arg(long)]
        slot: Option<u16>,

        /// Size in slot cells; the type default when omitted
        #[arg(long)]
        size: Option<u16>,
    },

    /// Print timestamped positions as JSON lines until Ctrl+C
    Poll {
        /// Delay between samples in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many samples
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Sample Cartesian instead of joint positions
        #[arg(long)]
        cartesian: bool,
    },

    /// Host the simulated controller on TCP
    Serve {
        /// TCP bind address
        #[arg(short, long = "bind")]
        bind_addr: Option<String>,

        /// TCP port to listen on
        #[arg(long = "port")]
        listen_port: Option<u16>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "snpx.toml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PositionArg {
    Joint,
    Cartesian,
}

impl From<PositionArg> for PositionKind {
    fn from(arg: PositionArg) -> Self {
        match arg {
            PositionArg::Joint => PositionKind::Joint,
            PositionArg::Cartesian => PositionKind::Cartesian,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout only carries JSON results
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(host) = cli.host {
        config.controller.host = host;
    }
    if let Some(port) = cli.port {
        config.controller.port = port;
    }

    match cli.command {
        Commands::Config { output } => generate_config_file(&config, output),
        Commands::Serve { bind_addr, listen_port } => {
            let bind_addr = bind_addr.unwrap_or_else(|| config.serve.bind_addr.clone());
            let port = listen_port.unwrap_or(config.serve.port);
            run_simulator(&bind_addr, port)
        }
        command if cli.simulate => {
            info!("🧪 Using the simulated controller");
            let session = Session::open(SimulatedController::with_demo_state(), config.controller.clone())?;
            execute(session, command, &config)
        }
        command => {
            let session = Session::connect_with(config.controller.clone()).with_context(|| {
                format!(
                    "Failed to connect to {}:{}",
                    config.controller.host, config.controller.port
                )
            })?;
            execute(session, command, &config)
        }
    }
}

/// Run one controller command over an open session
fn execute<T: Transport>(mut session: Session<T>, command: Commands, config: &AppConfig) -> Result<()> {
    match command {
        Commands::ReadIo { address, count } => {
            let values = session.signal(address.kind).read(count, address.start)?;
            print_json(&values)?;
        }
        Commands::WriteIo { address, values } => {
            let values = parse_bools(&values)?;
            session.signal(address.kind).write(&values, address.start)?;
            print_json(&json!({
                "kind": address.kind,
                "start": address.start,
                "count": values.len(),
            }))?;
        }
        Commands::Position { kind } => {
            let values = match PositionKind::from(kind) {
                PositionKind::Joint => session.joint_position().read()?,
                PositionKind::Cartesian => session.cartesian_position().read()?,
            };
            print_json(&values)?;
        }
        Commands::ReadVar { name, var_type } => {
            let value = session.read_sys_var(&name, var_type)?;
            print_json(&value)?;
        }
        Commands::WriteVar { name, var_type, value } => {
            let value = Value::parse(var_type, &value)?;
            session.write_sys_var(&name, var_type, &value)?;
            print_json(&json!({ "name": name, "value": value }))?;
        }
        Commands::Assign { name, var_type, slot, size } => {
            let slot = match size {
                Some(size) => session.set_assignment_sized(&name, var_type, slot, size)?,
                None => session.set_assignment(&name, var_type, slot)?,
            };
            print_json(&json!({ "name": name, "slot": slot }))?;
        }
        Commands::Poll { interval_ms, count, cartesian } => {
            let kind = if cartesian { PositionKind::Cartesian } else { config.poll.kind };
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.poll.interval_ms));
            let max_samples = count.unwrap_or(config.poll.max_samples);

            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            ctrlc::set_handler(move || {
                info!("🛑 Received Ctrl+C, stopping");
                let _ = stop_tx.try_send(());
            })?;

            let stdout = std::io::stdout();
            poll::run_poll(&mut session, kind, interval, max_samples, &stop_rx, &mut stdout.lock())?;
        }
        Commands::Serve { .. } | Commands::Config { .. } => {
            bail!("this command does not talk to a controller")
        }
    }

    session.disconnect()?;
    Ok(())
}

fn print_json<S: Serialize + ?Sized>(value: &S) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Host the simulated controller until Ctrl+C
fn run_simulator(bind_addr: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((bind_addr, port))
        .with_context(|| format!("Failed to bind {bind_addr}:{port}"))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down gracefully...");
        flag.store(false, Ordering::SeqCst);
    })?;

    serve::run_server(SimulatedController::with_demo_state(), listener, running)
}

/// Generate a configuration file from the effective settings
fn generate_config_file(config: &AppConfig, output_path: PathBuf) -> Result<()> {
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   snpx --config {} position joint", output_path.display());

    Ok(())
}
