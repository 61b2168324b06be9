use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::Config,
    error::Error,
    sample::{parse_line, DEFAULT_MARKER},
};

/// The command line interface for serial bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// The serial device to read from.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate of the serial device.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Host to listen on.
    /// Overrides the configuration file.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Lines starting with this are samples.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub marker: Option<String>,

    /// Replay the lines of this file instead of opening the serial device.
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Milliseconds between replayed lines.
    #[arg(long, default_value_t = 500)]
    pub replay_interval_ms: u64,

    /// Log level for stdout.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log (at debug level) to daily rotated files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply any overrides given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.serial.path = device.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(host) = &self.host {
            config.listen.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(marker) = &self.marker {
            config.marker = marker.clone();
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),

    /// List the serial ports on this machine.
    Ports,
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example device line and the JSON message clients get for it.
    Message,
}

/// Run a subcommand, printing its output.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(Examples::Config) => {
            println!("{}", Config::example().serialize_pretty());
        }
        Commands::Examples(Examples::Message) => {
            let line = format!("{DEFAULT_MARKER}hr:72,spo2:98,rr:850");

            println!("Device line:\n{line}\n");

            if let Ok(Some(sample)) = parse_line(&line) {
                let serialized = serde_json::to_string_pretty(&sample)
                    .unwrap_or_else(|e| format!("<could not serialize: {e}>"));
                println!("Message to clients:\n{serialized}");
            }
        }
        Commands::Ports => {
            let ports =
                tokio_serial::available_ports().map_err(|e| Error::DeviceUnavailable {
                    device: "serial port enumeration".into(),
                    source: e.into(),
                })?;

            if ports.is_empty() {
                println!("No serial ports found");
            }

            for port in ports {
                println!("{}: {:?}", port.port_name, port.port_type);
            }
        }
    }

    Ok(())
}
