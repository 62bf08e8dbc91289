// CLI entry point for the MIDI-DE pool server.
//
// Loads `ServerConfig` from a TOML file (defaults if absent), applies
// command-line overrides, builds the pool from the enabled sources, and serves
// workers until Ctrl+C.
//
// Usage:
//   mididermi-server [OPTIONS]
//     --config <PATH>        TOML config (default: mididermi.toml)
//     --min-pool/--max-pool  melodies per task
//     --min-epochs/--max-epochs
//     --random <N>, --fractal <N>
//     --load-database, --load-files, --store-database, --store-files
//     --port <PORT>

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mididermi_server::{ServerConfig, build_coordinator, start_server};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive distributed melody evolution: pool server")]
struct Args {
    /// Path to config TOML
    #[arg(long, default_value = "mididermi.toml")]
    config: PathBuf,

    /// Minimum melodies per task
    #[arg(long)]
    min_pool: Option<usize>,

    /// Maximum melodies per task
    #[arg(long)]
    max_pool: Option<usize>,

    /// Minimum epochs per task
    #[arg(long)]
    min_epochs: Option<u32>,

    /// Maximum epochs per task
    #[arg(long)]
    max_epochs: Option<u32>,

    /// Random melodies generated at startup
    #[arg(long)]
    random: Option<usize>,

    /// Fractal melodies generated at startup
    #[arg(long)]
    fractal: Option<usize>,

    /// Load the stored pool snapshot at startup
    #[arg(long)]
    load_database: bool,

    /// Load descriptor files at startup
    #[arg(long)]
    load_files: bool,

    /// Store the pool snapshot after every merge
    #[arg(long)]
    store_database: bool,

    /// Write MIDI files of the pool after every merge
    #[arg(long)]
    store_files: bool,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(n) = self.min_pool {
            config.pool.min_subset = n;
        }
        if let Some(n) = self.max_pool {
            config.pool.max_subset = n;
        }
        if let Some(n) = self.min_epochs {
            config.epochs.min = n;
        }
        if let Some(n) = self.max_epochs {
            config.epochs.max = n;
        }
        if let Some(n) = self.random {
            config.sources.random = n;
        }
        if let Some(n) = self.fractal {
            config.sources.fractal = n;
        }
        config.sources.load_database |= self.load_database;
        config.sources.load_files |= self.load_files;
        config.persistence.store_database |= self.store_database;
        config.persistence.store_files |= self.store_files;
        if let Some(port) = self.port {
            config.network.port = port;
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let coordinator = Arc::new(build_coordinator(&config));
    let (handle, addr) = match start_server(
        Arc::clone(&coordinator),
        &config.network.bind,
        config.network.port,
    ) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start server: {e}");
            std::process::exit(1);
        }
    };
    info!("MIDI-DE server bound on {addr}, Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst)) {
        error!("failed to install Ctrl+C handler: {e}");
        std::process::exit(1);
    }
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down, pool holds {} melodies", coordinator.pool().len());
    handle.stop();
}
