//! logfile-stream - live log file tail over SSE and WebSocket
//!
//! Usage:
//!   logfile-stream                          Serve using config.toml
//!   logfile-stream --log-file app.log       Serve a specific file
//!   logfile-stream check                    Show which file would be served

use clap::Parser;
use logfile_stream::cli::{Cli, Command};
use logfile_stream::config::{self, Config, ResolvedLogFile};
use logfile_stream::server::{LogFileEndpoint, Server};
use logfile_stream::{logging, Result, StreamError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let path = config::config_path(cli.config.as_deref());
    let mut cfg = if cli.config.is_some() {
        config::load_from(&path)?
    } else {
        config::load(&path)
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cli.apply_overrides(&mut cfg);
    cfg.validate()?;

    let resolved = resolve(&cfg)?;

    if matches!(cli.command, Some(Command::Check)) {
        match &resolved {
            Some(log_file) => println!(
                "{} (from {} = {})",
                log_file.path.display(),
                log_file.source.key(),
                log_file.value
            ),
            None => println!("logfile endpoint disabled"),
        }
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new().map_err(|e| StreamError::Runtime { source: e })?;
    rt.block_on(serve(cfg, resolved))
}

/// Resolve the log file, `None` when the endpoint stays off
fn resolve(cfg: &Config) -> Result<Option<ResolvedLogFile>> {
    if !cfg.management.endpoint.logfile.enabled {
        info!("logfile endpoint disabled by management.endpoint.logfile.enabled");
        return Ok(None);
    }
    match config::resolve_log_file(cfg) {
        Ok(log_file) => {
            info!(
                "Streaming {} (from {})",
                log_file.path.display(),
                log_file.source.key()
            );
            Ok(Some(log_file))
        }
        Err(StreamError::ConfigurationMissing) => {
            info!("No log file configured, logfile endpoint disabled");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn serve(cfg: Config, resolved: Option<ResolvedLogFile>) -> Result<()> {
    let endpoint = resolved.map(|log_file| LogFileEndpoint::new(log_file, &cfg));
    let server = Server::bind(&cfg, endpoint).await?;

    // Setup shutdown handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).map_err(|e| StreamError::Runtime { source: e })?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
            shutdown_clone.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_clone.store(true, Ordering::SeqCst);
        });
    }

    server.run(shutdown).await
}
