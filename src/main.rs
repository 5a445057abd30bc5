//! db-gateway - command-line front-end.
//!
//! Each subcommand runs one gateway operation against the profile given with
//! `--profile` and prints the JSON envelope the route layer would serve. Logs
//! go to stderr so stdout stays machine-readable.

use clap::Parser;
use db_gateway::config::{Command, Config, parse_params};
use db_gateway::error::{DbError, DbResult};
use db_gateway::gateway::Gateway;
use db_gateway::models::{ColumnsResponse, TablesResponse, TestResponse};
use db_gateway::secret::{EnvSecretResolver, SecretResolver};
use serde::Serialize;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> DbResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn run(gateway: &Gateway, command: &Command) -> DbResult<()> {
    match command {
        Command::Test(target) => {
            let profile = target.to_profile()?;
            let ok = gateway.test_connection(&profile).await;
            print_json(&TestResponse { ok })
        }
        Command::Query {
            target,
            sql,
            params,
        } => {
            let profile = target.to_profile()?;
            let params = parse_params(params)?;
            let result = gateway.execute_with_params(&profile, sql, &params).await?;
            print_json(&result)
        }
        Command::Tables(target) => {
            let profile = target.to_profile()?;
            let tables = gateway.list_tables(&profile).await?;
            print_json(&TablesResponse { tables })
        }
        Command::Columns { target, table } => {
            let profile = target.to_profile()?;
            let columns = gateway.list_columns(&profile, table).await?;
            print_json(&ColumnsResponse { columns })
        }
        Command::Info(target) => {
            let profile = target.to_profile()?;
            let info = gateway.server_info(&profile).await?;
            print_json(&info)
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting db-gateway v{}", env!("CARGO_PKG_VERSION"));

    let secrets: Arc<dyn SecretResolver> = match &config.secret_prefix {
        Some(prefix) => Arc::new(EnvSecretResolver::with_prefix(prefix)),
        None => Arc::new(EnvSecretResolver::new()),
    };

    let result = match config
        .gateway_config()
        .and_then(|gateway_config| Gateway::new(gateway_config, secrets))
    {
        Ok(gateway) => {
            // Dropping the in-flight command discards its handle instead of
            // returning it to the pool.
            let result = tokio::select! {
                result = run(&gateway, &config.command) => result,
                _ = wait_for_signal() => Err(DbError::internal("Interrupted before the command finished")),
            };
            gateway.shutdown().await;
            result
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(kind = %e.kind(), error = %e, "Command failed");
        let body = serde_json::json!({
            "error": {
                "kind": e.kind(),
                "message": e.to_string(),
                "suggestion": e.suggestion(),
                "sqlState": e.sql_state(),
            }
        });
        println!("{}", body);
        std::process::exit(1);
    }
}
