use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::ratelimit::{self, RateLimiter};

/// Per-route admission control with token bucket and fixed window limits.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, env = "TOLLGATE_CONFIG")]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a single request and print the decision
    Check {
        /// Client key, e.g. the caller's address
        client: String,
        /// Request path
        path: String,
    },
    /// Evaluate `<client> <path>` lines from stdin until EOF.
    ///
    /// Lines starting with `!` are admin commands:
    /// `!limit <path> <type>`, `!exempt <prefix>`, `!remove <path>`.
    Replay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(
        rules = config.routing.rules.len(),
        default_algorithm = %config.routing.default_algorithm,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::from_config(&config)?);

    match cli.command {
        Command::Check { client, path } => {
            let decision = limiter.check(&client, &path);
            println!("{}", json!({ "client": client, "path": path, "decision": decision }));
        }
        Command::Replay => {
            let reaper = ratelimit::spawn_from_config(Arc::clone(&limiter), &config.reaper);
            let result = replay(&limiter).await;
            if let Some(reaper) = reaper {
                reaper.abort();
            }
            result?;
        }
    }

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Feed stdin through the limiter until EOF or a shutdown signal.
async fn replay(limiter: &RateLimiter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => handle_line(limiter, line.trim()),
                    None => break,
                }
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

fn handle_line(limiter: &RateLimiter, line: &str) {
    if line.is_empty() || line.starts_with('#') {
        return;
    }

    if let Some(command) = line.strip_prefix('!') {
        let output = match apply_admin(limiter, command) {
            Ok(()) => json!({ "admin": command, "ok": true }),
            Err(e) => {
                warn!(command = %command, error = %e, "Rejected admin command");
                json!({ "admin": command, "ok": false, "error": e.to_string() })
            }
        };
        println!("{}", output);
        return;
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(client), Some(path)) => {
            let decision = limiter.check(client, path);
            println!("{}", json!({ "client": client, "path": path, "decision": decision }));
        }
        _ => warn!(line = %line, "Expected `<client> <path>`"),
    }
}

fn apply_admin(limiter: &RateLimiter, command: &str) -> anyhow::Result<()> {
    let args: Vec<&str> = command.split_whitespace().collect();
    match args.as_slice() {
        ["limit", path, limit_type] => limiter.set_limit_for_path(path, limit_type)?,
        ["exempt", prefix] => limiter.exempt_path(prefix),
        ["remove", path] => {
            limiter.store().remove_rule(path);
        }
        _ => bail!("unrecognized admin command"),
    }
    Ok(())
}

/// Resolve once Ctrl+C or SIGTERM arrives. A signal that cannot be
/// listened for is logged and never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "ctrl_c",
        _ = terminate => "sigterm",
    };
    info!(signal = received, "Shutdown requested, stopping replay");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate::ratelimit::Algorithm;

    #[test]
    fn test_admin_commands() {
        let limiter = RateLimiter::default();

        apply_admin(&limiter, "limit /api token_bucket").unwrap();
        assert_eq!(limiter.evaluate("c", "/api/x", 0.0).algorithm, Algorithm::TokenBucket);

        apply_admin(&limiter, "exempt /api/public").unwrap();
        assert_eq!(limiter.evaluate("c", "/api/public", 0.0).algorithm, Algorithm::None);

        apply_admin(&limiter, "remove /api").unwrap();
        assert_eq!(limiter.evaluate("c", "/api/x", 0.0).algorithm, Algorithm::None);
    }

    #[test]
    fn test_rejected_admin_commands() {
        let limiter = RateLimiter::default();
        assert!(apply_admin(&limiter, "limit /api leaky_bucket").is_err());
        assert!(apply_admin(&limiter, "limit /api").is_err());
        assert!(apply_admin(&limiter, "reload").is_err());
        assert!(limiter.store().snapshot().rules().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_on_sigterm() {
        let shutdown = tokio::spawn(shutdown_signal());
        // Let the task install its handlers before the signal is sent
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown_signal did not resolve")
            .unwrap();
    }
}
