//! # NutriBaby Reminder Daemon
//!
//! Runs the periodic reminder scheduler against the NutriBaby database.
//!
//! Usage:
//!   nutribaby-reminderd                          # Run with ~/.nutribaby/config.toml
//!   nutribaby-reminderd --config ./nutribaby.toml
//!   nutribaby-reminderd --test-mode              # One-minute cadence
//!   nutribaby-reminderd --once                   # Run a single tick and exit

use anyhow::{Context, Result};
use clap::Parser;
use nutribaby_core::{NutriBabyConfig, SystemClock};
use nutribaby_reminder::{DryRunTransport, PushTransport, ReminderService, SqliteStore, WechatTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "nutribaby-reminderd",
    version,
    about = "🍼 NutriBaby reminder dispatch daemon"
)]
struct Cli {
    /// Config file (default: ~/.nutribaby/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overrides `database.path`
    #[arg(long)]
    db: Option<String>,

    /// Use the one-minute test cadence
    #[arg(long)]
    test_mode: bool,

    /// Run one tick, print the report and exit
    #[arg(long)]
    once: bool,

    /// Seconds to wait for an in-flight tick on shutdown
    #[arg(long, default_value = "30")]
    shutdown_grace: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NutriBabyConfig::load_from(&expand_path(path))?,
        None => NutriBabyConfig::load()?,
    };
    if cli.test_mode {
        config.reminder.test_mode = true;
    }
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    // Initialize logging
    let filter = if cli.verbose {
        "nutribaby=debug,nutribaby_reminder=debug,nutribaby_core=debug".to_string()
    } else {
        format!(
            "nutribaby={0},nutribaby_reminder={0},nutribaby_core={0}",
            config.log_level
        )
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    config.validate().context("invalid configuration")?;

    let db_path = config.database.resolved_path();
    let store = Arc::new(
        SqliteStore::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );

    let transport: Arc<dyn PushTransport> = if config.wechat.has_credentials() {
        Arc::new(WechatTransport::new(config.wechat.clone())?)
    } else {
        tracing::warn!("⚠️ No WeChat credentials configured, reminders will only be logged");
        Arc::new(DryRunTransport)
    };

    let service = ReminderService::new(&config.reminder, store, transport, Arc::new(SystemClock))?;

    if cli.once {
        match service.force_scan().await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("⚠️ A tick is already running"),
        }
        return Ok(());
    }

    println!("🍼 NutriBaby reminder daemon v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {}", db_path.display());
    println!(
        "   ⏱️  Cadence:  {}s{}",
        config.reminder.tick_interval().as_secs(),
        if config.reminder.test_mode { " (test mode)" } else { "" }
    );
    println!();

    service.start();
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");

    let drained = service.stop(Duration::from_secs(cli.shutdown_grace)).await;
    let stats = service.stats();
    tracing::info!(
        "📊 Ticks run: {}, failed: {}, dropped: {}",
        stats.ticks_run,
        stats.ticks_failed,
        stats.ticks_dropped
    );
    if !drained {
        anyhow::bail!("in-flight tick did not finish within {}s", cli.shutdown_grace);
    }
    Ok(())
}
