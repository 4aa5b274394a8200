//! Whale Watch - multi-chain large-transfer monitor
//!
//! Polls watched addresses, detects whale movements from balance deltas and
//! posts formatted alerts alongside periodic price updates.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use whale_watch::chain::Chain;
use whale_watch::cli::commands;
use whale_watch::config::Config;

/// Whale Watch - large-transfer alerts across chains
#[derive(Parser)]
#[command(name = "whalewatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler (price updates and whale scans)
    Start {
        /// Log alerts instead of posting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a single whale scan cycle and exit
    Scan {
        /// Log alerts instead of posting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve an address against the entity registry
    Resolve {
        /// Address to look up
        address: String,

        /// Enable chain-specific patterns (bitcoin, ethereum, litecoin, dogecoin)
        #[arg(long)]
        chain: Option<Chain>,
    },

    /// Show persisted address baselines
    Ledger,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.log_json);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = startup_checks(&config) {
        error!("Startup checks failed: {:#}", e);
        std::process::exit(1);
    }

    // Execute command
    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Scan { dry_run } => commands::scan(&config, dry_run).await,
        Commands::Resolve { address, chain } => commands::resolve(&config, &address, chain),
        Commands::Ledger => commands::ledger(&config).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "whale_watch=info".parse() {
        filter = filter.add_directive(directive);
    }

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

/// Perform startup sanity checks
fn startup_checks(config: &Config) -> Result<()> {
    info!("Performing startup checks...");

    for source in &config.entities.sources {
        if !std::path::Path::new(source).exists() {
            return Err(anyhow::anyhow!("Entity source not found: {}", source));
        }
    }

    if config.watch.is_empty() {
        warn!("No watched addresses configured; whale scans will be empty");
    }

    info!(
        "{} assets, {} watched addresses, {} scheduled tasks",
        config.assets.len(),
        config.watch.len(),
        config.scheduler.tasks.len()
    );
    Ok(())
}
