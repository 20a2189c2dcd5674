//! Command-line interface for the headless stackctl host.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Accepted spellings per level; the position in this table is the numeric shorthand.
const LEVELS: [(LevelFilter, &[&str]); 6] = [
    (LevelFilter::OFF, &["off"]),
    (LevelFilter::ERROR, &["error", "err"]),
    (LevelFilter::WARN, &["warn", "warning"]),
    (LevelFilter::INFO, &["info", "information"]),
    (LevelFilter::DEBUG, &["debug"]),
    (LevelFilter::TRACE, &["trace"]),
];

/// A `--log-level` value: a level name or its number (0 = off .. 5 = trace).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(usize);

impl LogLevelArg {
    pub fn level(&self) -> LevelFilter {
        LEVELS[self.0].0
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        if wanted.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = wanted.parse::<usize>() {
            return if number < LEVELS.len() {
                Ok(LogLevelArg(number))
            } else {
                Err(format!("unsupported log level number '{number}' (expected 0-5)"))
            };
        }

        LEVELS
            .iter()
            .position(|(_, names)| names.contains(&wanted.as_str()))
            .map(LogLevelArg)
            .ok_or_else(|| format!("invalid log level '{}'", value.trim()))
    }
}

/// Command-line interface for stackctl.
#[derive(Parser)]
#[command(name = "stackctl", version, author)]
#[command(about = "Start, stop and monitor a local server stack", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the settings file.
    #[arg(short, long, default_value = "stackctl.yaml", global = true)]
    pub settings: String,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for stackctl.
#[derive(Subcommand)]
pub enum Commands {
    /// Autostart flagged daemons, wait for Ctrl-C, then apply the quit policy.
    Run,

    /// Show each daemon's resolved executable, autostart flag and foreign instances.
    Check,

    /// Print the version of every installed daemon.
    Versions,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
