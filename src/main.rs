use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use http_conn_reuse::demo;
use http_conn_reuse::executor::{ExecutorConfig, RequestExecutor};
use http_conn_reuse::pool::{ConnectionPool, PoolConfig, DEFAULT_MAX_IDLE_PER_DESTINATION};
use http_conn_reuse::scenario;
use http_conn_reuse::server::ServerBuilder;

#[derive(Parser)]
#[command(name = "http-conn-reuse", about = "Explore when HTTP/1.1 connections get reused")]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario server (/case1../case4 and /)
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Close connections idle between requests for this long, e.g. "5s"
        #[arg(long, value_parser = humantime::parse_duration)]
        keep_alive_timeout: Option<Duration>,
    },
    /// Walk a scenario server through every reuse / no-reuse case
    Cases {
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
        #[arg(long, default_value = "90s", value_parser = humantime::parse_duration)]
        idle_timeout: Duration,
        #[arg(long, default_value_t = DEFAULT_MAX_IDLE_PER_DESTINATION)]
        max_idle: usize,
    },
    /// Send several requests with keep-alives disabled
    NoReuse {
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
        #[arg(long, default_value_t = 3)]
        count: usize,
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        pause: Duration,
    },
    /// Time DNS, TCP handshake and first byte for a single request
    Timing {
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { host, port, keep_alive_timeout } => {
            let mut builder = ServerBuilder::new();
            builder.host(&host).port(port);
            if let Some(timeout) = keep_alive_timeout {
                builder.keep_alive_timeout(timeout);
            }
            scenario::register(&mut builder)?;

            let listening = builder.build().bind().await?;
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            listening.serve(shutdown).await?;
        }
        Commands::Cases { url, idle_timeout, max_idle } => {
            let pool = Arc::new(ConnectionPool::with_config(PoolConfig {
                idle_timeout,
                max_idle_per_destination: max_idle,
            }));
            let executor = RequestExecutor::with_config(pool.clone(), ExecutorConfig::default());

            for outcome in demo::run_cases(&executor, &url).await {
                let first = match &outcome.first {
                    Ok(true) => "pooled".to_string(),
                    Ok(false) => "not pooled".to_string(),
                    Err(e) => format!("failed ({})", e),
                };
                let second = match outcome.second_reused {
                    Some(reused) => format!("reused={}", reused),
                    None => "failed".to_string(),
                };
                info!("{}: first request {}, follow-up {}", outcome.name, first, second);
            }
            pool.shutdown();
        }
        Commands::NoReuse { url, count, pause } => {
            demo::run_no_reuse(&url, count, pause).await?;
        }
        Commands::Timing { url } => {
            demo::run_timing(&url).await?;
        }
    }

    Ok(())
}
