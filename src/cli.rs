//! Command-line interface definition using clap
//!
//! Flags override the config file and the environment.

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Stream a growing log file to browsers over SSE and WebSocket
#[derive(Parser, Debug, Default)]
#[command(name = "logfile-stream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file (default: config.toml beside the executable, then cwd)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// HTTP port (default: 8080)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Log file to stream (logging.file)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Directory holding spring.log (logging.path)
    #[arg(long, value_name = "DIR")]
    pub log_path: Option<String>,

    /// Externally written log file (management.endpoint.logfile.external_file)
    #[arg(long, value_name = "FILE")]
    pub external_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print which log file would be streamed, then exit
    Check,
}

impl Cli {
    /// Overlay the flags that were given onto `config`
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Some(path) = &self.log_path {
            config.logging.path = Some(path.clone());
        }
        if let Some(file) = &self.external_file {
            config.management.endpoint.logfile.external_file = Some(file.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
