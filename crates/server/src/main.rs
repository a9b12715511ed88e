use anyhow::Context;
use boleta_core::{AppConfig, ReceiptResponse};
use boleta_ocr::{default_backend, ReceiptPipeline};
use boleta_server::{init_tracing, run_server, AppState};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "boleta-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract total, date and identifier from receipt photos", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(long, short, global = true, env = "BOLETA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long, env = "BOLETA_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, short, env = "BOLETA_PORT")]
        port: Option<u16>,
    },
    /// Process one image and print the JSON result
    Extract {
        /// Path of the receipt image
        image: PathBuf,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => Ok(AppConfig::load(path)?),
        None => Ok(AppConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    let pipeline = ReceiptPipeline::new(default_backend(), &config)
        .context("invalid extraction patterns in configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let state = AppState {
                pipeline: Arc::new(pipeline),
                timeout: config.server.request_timeout_secs.map(Duration::from_secs),
            };
            info!(host = %config.server.host, port = config.server.port, "starting server");
            run_server(&config.server, state).await?;
        }
        Commands::Extract { image, pretty } => {
            let data = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let filename = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let record = tokio::task::spawn_blocking(move || pipeline.process_bytes(&filename, &data))
                .await??;
            let response = ReceiptResponse::from(record);
            let json = if pretty {
                serde_json::to_string_pretty(&response)?
            } else {
                serde_json::to_string(&response)?
            };
            println!("{json}");
        }
    }

    Ok(())
}
