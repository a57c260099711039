//! # piheat
//!
//! Command-line client for piheat-sync heating devices.
//!
//! ## Commands
//!
//! - `status`: Show device status
//! - `watch`: Follow device status until interrupted
//! - `on` / `off` / `cancel`: Override the schedule
//! - `schedule`: Replace the schedule
//! - `ping`: Ask a legacy device to report
//! - `token`: Print a share token
//!
//! ## Example
//!
//! ```bash
//! # Show the device
//! piheat --channel device-42 status
//!
//! # Heat at 21 °C for three hours and wait for the device to confirm
//! piheat --channel device-42 on --temp 21 --hours 3 --wait
//!
//! # Heat 06:00-08:00 and 18:00-22:00 (local time)
//! piheat --channel device-42 schedule 06:00-08:00@20 18:00-22:00@21
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_client::{
    ConfigFile, DweetTransport, MockTransport, Passphrase, SessionConfig, SyncClient, Transport,
    DEFAULT_TURN_ON_HOURS,
};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::send::{self, Action};
use commands::{local_offset_minutes, status, token, watch};

/// Command-line client for piheat-sync heating devices.
#[derive(Parser, Debug)]
#[command(name = "piheat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./piheat.toml if present)
    #[arg(long, short, global = true, env = "PIHEAT_CONFIG")]
    config: Option<PathBuf>,

    /// Relay channel of the device
    #[arg(long, global = true)]
    channel: Option<String>,

    /// Shared passphrase (will prompt if not provided)
    #[arg(long, global = true, env = "PIHEAT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Share token carrying the channel and optionally the passphrase
    #[arg(long, global = true)]
    token: Option<String>,

    /// Speak the legacy cleartext protocol
    #[arg(long, global = true)]
    legacy: bool,

    /// Relay base URL
    #[arg(long, global = true)]
    relay_url: Option<String>,

    /// Use an in-memory relay instead of the network (for testing/demo)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show device status
    Status {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Follow device status until interrupted
    Watch,

    /// Heat now for a while
    On {
        /// Target temperature in °C
        #[arg(long, short)]
        temp: Option<f64>,

        /// Hours to heat (1-23)
        #[arg(
            long,
            default_value_t = DEFAULT_TURN_ON_HOURS,
            value_parser = clap::value_parser!(i64).range(1..24)
        )]
        hours: i64,

        /// Wait for the device to confirm
        #[arg(long)]
        wait: bool,
    },

    /// Stop heating until cancelled
    Off {
        /// Wait for the device to confirm
        #[arg(long)]
        wait: bool,
    },

    /// Cancel the override and follow the schedule
    Cancel {
        /// Wait for the device to confirm
        #[arg(long)]
        wait: bool,
    },

    /// Replace the schedule with HH:MM-HH:MM[@TEMP] intervals (local time)
    Schedule {
        /// Intervals; none clears the schedule
        intervals: Vec<String>,

        /// Wait for the device to confirm
        #[arg(long)]
        wait: bool,
    },

    /// Ask a legacy device to report its status
    Ping,

    /// Print a share token for this channel
    Token {
        /// Include the passphrase in the token
        #[arg(long)]
        with_passphrase: bool,
    },
}

impl Cli {
    fn sources(&self) -> config::Sources {
        config::Sources {
            config: self.config.clone(),
            token: self.token.clone(),
            flags: ConfigFile {
                channel_id: self.channel.clone(),
                passphrase: self.passphrase.clone().map(Passphrase::new),
                wire_mode: self.legacy.then(|| "legacy-cleartext".to_string()),
                relay_url: self.relay_url.clone(),
                ..ConfigFile::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = config::resolve(cli.sources())?;

    match cli.command {
        Commands::Token { with_passphrase } => {
            token::run(&config, with_passphrase);
            Ok(())
        }
        command if cli.mock => run(command, config, MockTransport::new()).await,
        command => {
            let transport = DweetTransport::new(config.relay_url.clone());
            run(command, config, transport).await
        }
    }
}

async fn run<T: Transport + 'static>(
    command: Commands,
    config: SessionConfig,
    transport: T,
) -> Result<()> {
    let client = SyncClient::new(config, transport).context("Failed to start session")?;

    match command {
        Commands::Status { json } => status::run(&client, json).await,
        Commands::Watch => watch::run(&client).await,
        Commands::On { temp, hours, wait } => {
            let action = Action::On {
                temperature: temp,
                hours,
            };
            send::run(&client, action, wait).await
        }
        Commands::Off { wait } => send::run(&client, Action::Off, wait).await,
        Commands::Cancel { wait } => send::run(&client, Action::Cancel, wait).await,
        Commands::Schedule { intervals, wait } => {
            let offset = local_offset_minutes();
            let intervals = intervals
                .iter()
                .map(|text| send::parse_interval(text, offset))
                .collect::<Result<Vec<_>>>()?;
            send::run(&client, Action::Schedule(intervals), wait).await
        }
        Commands::Ping => send::run(&client, Action::Ping, false).await,
        Commands::Token { .. } => Ok(()),
    }
}
