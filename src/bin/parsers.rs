//! parsers CLI - run a snapshot transform once, or as a broker-fed service
//!
//! Exit status is non-zero when the transform name is unknown or the broker
//! connection fails; rejected snapshots are not errors.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cortex_parsers::{
    ArtifactStore, Dispatcher, NatsConnector, ServiceConfig, ServiceLoop, TransformName,
    TransformRegistry,
};

#[derive(Parser)]
#[command(name = "parsers")]
#[command(version, about = "Snapshot parsers for the processed-data pipeline", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for processed image artifacts (overrides config)
    #[arg(long, global = true)]
    processed_dir: Option<PathBuf>,

    /// Write logs to a per-run file in this directory (overrides config)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a parser once on a raw snapshot file and print the result
    Run {
        /// Parser name (e.g. pose, feelings, color_image, depth_image)
        name: String,

        /// Path to a JSON snapshot message
        data: PathBuf,
    },

    /// Consume snapshots from the message queue indefinitely
    Serve {
        /// Parser name; also the queue consumed from
        name: String,

        /// Message queue address (overrides config)
        #[arg(short, long)]
        mq: Option<String>,
    },

    /// List available parsers
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match ServiceConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Some(dir) = cli.processed_dir {
        config.processed_dir = dir;
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = Some(dir);
    }

    let registry = match TransformRegistry::builtin(Arc::new(ArtifactStore::new(config.processed_dir.clone()))) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::List => {
            list_parsers(&registry);
            Ok(())
        }
        Commands::Run { name, data } => {
            let name = resolve_name(&registry, &name);
            init_logging(name, config.log_dir.as_deref())
                .and_then(|_| run_once(Dispatcher::new(registry), name, &data))
        }
        Commands::Serve { name, mq } => {
            let name = resolve_name(&registry, &name);
            if let Some(url) = mq {
                config.broker_url = url;
            }
            match init_logging(name, config.log_dir.as_deref()) {
                Ok(()) => serve(Dispatcher::new(registry), name, &config).await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("Error encountered. please see log for details.");
        process::exit(1);
    }
}

/// Parse the parser name, listing the available ones and exiting if unknown.
fn resolve_name(registry: &TransformRegistry, name: &str) -> TransformName {
    match name.parse::<TransformName>() {
        Ok(parsed) if registry.get(parsed).is_some() => parsed,
        _ => {
            eprintln!("Error: Unknown parser. Available parsers:");
            for (index, name) in registry.names().iter().enumerate() {
                eprintln!("{}. {}", index + 1, name);
            }
            process::exit(1);
        }
    }
}

fn list_parsers(registry: &TransformRegistry) {
    for (index, name) in registry.names().iter().enumerate() {
        println!("{}. {}", index + 1, name);
    }
}

fn run_once(dispatcher: Dispatcher, name: TransformName, data: &Path) -> anyhow::Result<()> {
    let raw = fs::read(data)
        .with_context(|| format!("Raw data file error: {}", data.display()))?;

    if let Some(result) = dispatcher.dispatch(name.as_str(), &raw) {
        println!("{}", String::from_utf8_lossy(&result));
    }
    Ok(())
}

async fn serve(dispatcher: Dispatcher, name: TransformName, config: &ServiceConfig) -> anyhow::Result<()> {
    tracing::info!(
        transform = %name,
        broker = %config.broker_url,
        processed_dir = %config.processed_dir.display(),
        "starting parser service"
    );
    println!("{}: Starting to consume from {}", name, config.broker_url);

    let connector = NatsConnector::new(config.nats_config());
    let error = ServiceLoop::new(name, dispatcher)
        .with_ack_mode(config.ack_mode)
        .run(&connector, &config.broker_url)
        .await;

    Err(error).with_context(|| format!("parser service '{}' stopped", name))
}

/// Log to stderr, or to `{log_dir}/{name}_{timestamp}.log` when a directory is set.
fn init_logging(name: TransformName, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,async_nats=warn"));

    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let stamp = chrono::Local::now().format("%d.%m.%Y-%H:%M:%S");
            let path = dir.join(format!("{}_{}.log", name, stamp));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
