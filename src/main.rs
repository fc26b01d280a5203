//! imgcache daemon - serves recently produced image files over UDP
//!
//! A background scanner mirrors an image directory into memory while the
//! main loop answers "latest file" and byte-range requests from peers.

mod client;
mod config;
mod protocol;
mod scanner;
mod store;
mod transport;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use client::{write_atomic, ImageClient};
use config::Config;
use protocol::DatagramServer;
use scanner::DirectoryScanner;
use store::FileStore;

#[derive(Parser, Debug)]
#[command(
    name = "imgcache-daemon",
    version,
    about = "Cache recently produced images and serve them over UDP"
)]
struct Cli {
    /// JSON config file (defaults to <config dir>/imgcache/config.json)
    #[arg(short, long, global = true, value_name = "FILE", env = "IMGCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long, global = true, value_name = "ADDR", env = "IMGCACHE_LISTEN")]
    listen: Option<SocketAddr>,

    /// Directory to scan for images, overrides the config file
    #[arg(short, long, global = true, value_name = "DIR", env = "IMGCACHE_DIR")]
    dir: Option<PathBuf>,

    /// Client: milliseconds to wait for each response
    #[arg(long, global = true, value_name = "MS", default_value_t = 1000)]
    timeout_ms: u64,

    /// Client: times each request is sent before giving up
    #[arg(long, global = true, value_name = "N", default_value_t = 5)]
    attempts: u32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Scan the image directory and answer requests (default)
    Serve,
    /// Ask a server for its most recent file
    Latest {
        /// Server address
        #[arg(short, long)]
        server: SocketAddr,
    },
    /// Download the most recent file from a server
    Fetch {
        /// Server address
        #[arg(short, long)]
        server: SocketAddr,
        /// Where to write the file (defaults to its name in the current directory)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Load the config file and apply command line overrides
    fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(dir) = &self.dir {
            config.image_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }

    async fn connect(&self, server: SocketAddr) -> Result<ImageClient<UdpSocket>> {
        let client = ImageClient::connect(server)
            .await?
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_attempts(self.attempts);
        Ok(client)
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = cli.resolve_config()?;
            serve(config).await
        }
        Command::Latest { server } => {
            let client = cli.connect(server).await?;
            let (name, size) = client.latest().await?;
            println!("{} ({} bytes)", name, size);
            Ok(())
        }
        Command::Fetch { server, output } => {
            let client = cli.connect(server).await?;
            let (name, size) = client.latest().await?;
            info!(name = %name, size = size, "Fetching latest file");

            let content = client.fetch(&name, size).await?;
            let path = match output {
                Some(path) => path,
                None => local_path_for(&name)?,
            };
            write_atomic(&path, &content)?;
            println!("Saved {} ({} bytes) to {}", name, size, path.display());
            Ok(())
        }
    }
}

/// Keep only the final component of a server-provided name
fn local_path_for(name: &str) -> Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .with_context(|| format!("Server sent an unusable file name: {:?}", name))?;
    Ok(PathBuf::from(file_name))
}

async fn serve(config: Config) -> Result<()> {
    info!(
        dir = %config.image_dir.display(),
        suffix = %config.accepted_suffix,
        max_file_age_secs = config.max_file_age_secs,
        grace_period_secs = config.grace_period_secs,
        "Starting imgcache daemon"
    );

    tokio::fs::create_dir_all(&config.image_dir)
        .await
        .with_context(|| format!("Failed to create image directory: {:?}", config.image_dir))?;

    let store = Arc::new(FileStore::new(config.retention(), config.name_rule()));
    let scanner = DirectoryScanner::new(
        config.image_dir.clone(),
        Arc::clone(&store),
        config.scan_interval(),
    );

    // Advertise files already on disk before accepting requests
    scanner.scan_once().await;
    if store.is_empty() {
        info!("No files cached yet");
    } else {
        info!(cached = store.len(), latest = ?store.most_recent_eligible(), "Initial scan complete");
    }

    let server = Arc::new(DatagramServer::bind(Arc::clone(&store), config.listen_addr).await?);
    let scanner_handle = scanner.spawn();
    let server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Datagram server error");
            }
        })
    };

    info!("Daemon ready. Waiting for requests...");

    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, stopping...");
    scanner_handle.abort();
    server_handle.abort();

    store.log_metrics();
    let stats = server.stats();
    info!(
        received = stats.received,
        answered = stats.answered,
        dropped = stats.dropped,
        send_failures = stats.send_failures,
        "Shutdown complete."
    );
    Ok(())
}
