use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgbreaker::cli::commands;
use pgbreaker::config;

#[derive(Parser)]
#[command(name = "pgbreaker")]
#[command(version, about = "PostgreSQL connection pool with a circuit breaker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (YAML); environment variables are used when absent
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a pool and print its status
    Check {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run SELECT 1 through the pool
    Ping {
        /// Number of pings
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Ping on an interval and report status transitions
    Watch {
        /// Delay between pings in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Stop after this many pings (0 = run until Ctrl-C)
        #[arg(long, default_value = "0")]
        iterations: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // One-shot commands need nothing more than a current_thread runtime
    let runtime = if matches!(cli.command, Commands::Watch { .. }) {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let options = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { json } => commands::cmd_check(options, json).await?,
        Commands::Ping { count } => commands::cmd_ping(options, count).await?,
        Commands::Watch {
            interval_ms,
            iterations,
        } => commands::cmd_watch(options, interval_ms, iterations).await?,
    }

    Ok(())
}
