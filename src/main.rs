use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostgate::config::HostgateConfig;
use hostgate::HostgateError;

/// Check outbound destinations against the configured rate limits.
#[derive(Debug, Parser)]
#[command(name = "hostgate", version, about)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate destinations and print the admission decision for each
    Check {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "hostgate.yaml")]
        config: PathBuf,

        /// Evaluate each destination this many times
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,

        /// Destination URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Check {
            config,
            repeat,
            urls,
        } => {
            let config = HostgateConfig::from_file(&config)?;
            let controller = config.into_controller().await?;
            info!(rules = controller.registry().len(), "Admission controller ready");

            for url in &urls {
                for _ in 0..repeat {
                    match controller.admit(url).await {
                        Ok(()) => println!("{url} admitted"),
                        Err(HostgateError::RateLimited { .. }) => println!("{url} limited"),
                        Err(e) => println!("{url} error: {e}"),
                    }
                }
            }
        }
    }

    Ok(())
}
