use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common_redis::RedisClient;
use device_registry::{DeviceRegistry, Registration};
use telemetry_forwarder::keys;

/// Manage the device registry read by the telemetry forwarder
#[derive(Parser)]
#[command(version, long_about = None)]
struct Cli {
    /// Store to connect to
    #[arg(long, env = "FOR_REDIS_URL", default_value = "redis://localhost:6379/0")]
    redis_url: String,

    /// Hash holding the wire id to device id mapping
    #[arg(long, default_value = keys::DEVICE_REGISTRY)]
    registry_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device by its address and print the id it was given
    Add { wire_id: String },

    /// Exit with status 0 if the device is registered, 1 otherwise
    Exists { wire_id: String },

    /// Print every registered device, ordered by id
    List,

    /// Write the registry to a JSON file
    Backup {
        #[arg(long, short, default_value = "lb_devices.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let client = RedisClient::new(cli.redis_url.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.redis_url))?;
    let registry = DeviceRegistry::new(Arc::new(client), cli.registry_key);

    match cli.command {
        Commands::Add { wire_id } => match registry.add(&wire_id).await? {
            Registration::Added(id) => println!("{wire_id} registered as {id}"),
            Registration::AlreadyRegistered(id) => {
                println!("{wire_id} was already registered as {id}")
            }
        },
        Commands::Exists { wire_id } => {
            if registry.exists(&wire_id).await? {
                println!("{wire_id} is registered");
            } else {
                println!("{wire_id} is not registered");
                std::process::exit(1);
            }
        }
        Commands::List => {
            for entry in registry.list().await? {
                let seen = if entry.seen { "" } else { " (no telemetry yet)" };
                println!("{:>6}  {}{}", entry.device_id.0, entry.wire_id, seen);
            }
        }
        Commands::Backup { output } => {
            let written = registry
                .backup(&output)
                .await
                .with_context(|| format!("failed to back up to {}", output.display()))?;
            println!("wrote {written} devices to {}", output.display());
        }
    }

    Ok(())
}
