//! reqgate CLI — the main entry point.
//!
//! Commands:
//! - `serve`  — Start the HTTP gateway
//! - `doctor` — Check configuration and provider credentials

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use reqgate_config::AppConfig;
use reqgate_engine::Engine;
use reqgate_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "reqgate",
    about = "reqgate — constraint-enforcing completion gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Path to the configuration file
        #[arg(short, long, default_value = "reqgate.toml")]
        config: PathBuf,

        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration and provider construction for every model
    Doctor {
        /// Path to the configuration file
        #[arg(short, long, default_value = "reqgate.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { config, host, port } => serve(config, host, port).await?,
        Commands::Doctor { config } => doctor(config)?,
    }

    Ok(())
}

async fn serve(
    config_path: PathBuf,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_from(&config_path)?;
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!(
        models = config.models.len(),
        config = %config_path.display(),
        "Starting reqgate"
    );

    let engine = Engine::new(config.models.clone());
    let state = GatewayState::new(engine, config, Some(config_path));
    reqgate_gateway::serve(state, &host, port).await?;
    Ok(())
}

fn doctor(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_from(&config_path)?;
    let engine = Engine::new(config.models.clone());

    println!("reqgate doctor — {} model(s) configured", config.models.len());

    let mut failures = 0usize;
    for name in engine.registry().model_names() {
        match engine.registry().provider(&name) {
            Ok(_) => println!("  ok   {name}"),
            Err(e) => {
                failures += 1;
                println!("  FAIL {name}: {e}");
            }
        }
    }

    if failures > 0 {
        Err(format!("{failures} model(s) failed provider construction").into())
    } else {
        println!("All providers constructed successfully.");
        Ok(())
    }
}
