//! # Gramdeck — scheduled Instagram automation on Android devices
//!
//! Usage:
//!   gramdeck init                         # Write ~/.gramdeck/config.toml
//!   gramdeck devices                      # List devices visible to adb
//!   gramdeck run --plan plans/sample.toml # Schedule a plan and run it to completion

mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gramdeck_core::GramdeckConfig;
use gramdeck_device::{AdbBridge, DeviceBridge, InstagramFlows};
use gramdeck_scheduler::{HandlerRegistry, Scheduler, SchedulerStats, TaskStatus};

use crate::plan::Plan;

#[derive(Parser)]
#[command(
    name = "gramdeck",
    version,
    about = "📱 Gramdeck — scheduled Instagram automation on Android devices"
)]
struct Cli {
    /// Config file (default: ~/.gramdeck/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List devices visible to adb
    Devices,
    /// Schedule a job plan and run until every task has finished
    Run {
        /// Plan file (TOML)
        #[arg(short, long)]
        plan: String,

        /// Seconds between progress reports
        #[arg(long, default_value = "30")]
        report_secs: u64,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: &Path) -> Result<GramdeckConfig> {
    if path.exists() {
        Ok(GramdeckConfig::load_from(path)?)
    } else {
        tracing::info!("No config at {}, using defaults", path.display());
        Ok(GramdeckConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "gramdeck=debug,gramdeck_scheduler=debug,gramdeck_device=debug"
    } else {
        "gramdeck=info,gramdeck_scheduler=info,gramdeck_device=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(GramdeckConfig::default_path);

    match cli.command {
        Commands::Init { force } => init(&config_path, force),
        Commands::Devices => {
            let config = load_config(&config_path)?;
            devices(&config).await
        }
        Commands::Run { plan, report_secs } => {
            let config = load_config(&config_path)?;
            let plan = Plan::load(&expand_path(&plan))?;
            run(config, plan, Duration::from_secs(report_secs.max(1))).await
        }
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    GramdeckConfig::default().save_to(path)?;
    println!("✅ Wrote default config to {}", path.display());
    println!("   Set device.default_device and device.accounts before running a plan.");
    Ok(())
}

async fn devices(config: &GramdeckConfig) -> Result<()> {
    let bridge = AdbBridge::from_config(&config.device);
    let devices = bridge.list_devices().await?;
    if devices.is_empty() {
        println!("No devices attached.");
        return Ok(());
    }
    for device in devices {
        let marker = if config.device.default_device.as_deref() == Some(device.serial.as_str()) {
            " (default)"
        } else {
            ""
        };
        let icon = if device.is_online() { "📱" } else { "⚠️ " };
        println!("{icon} {}\t{}{marker}", device.serial, device.state);
    }
    Ok(())
}

async fn run(config: GramdeckConfig, plan: Plan, report_every: Duration) -> Result<()> {
    let flows = InstagramFlows::new(AdbBridge::from_config(&config.device), config.device.clone());
    let scheduler = Scheduler::new(
        config.scheduler.clone(),
        HandlerRegistry::with_handler(Arc::new(flows)),
    );

    let scheduled = plan.schedule(&scheduler)?;
    tracing::info!(
        "📋 Plan scheduled: {} task(s), {} recurring job(s)",
        scheduled.tasks,
        scheduled.recurrences
    );

    let mut ticker = tokio::time::interval(report_every);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = scheduler.get_stats();
                report(&stats);
                if is_idle(&stats) && scheduler.active_recurrences() == 0 {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                tracing::warn!("Interrupted, shutting down");
                break;
            }
        }
    }

    scheduler.shutdown();
    let stats = scheduler.get_stats();
    println!(
        "🏁 Done: {} completed, {} failed, {} unfinished",
        stats.completed,
        stats.failed,
        stats.pending + stats.running + stats.paused
    );
    for task in scheduler.get_tasks_by_status(TaskStatus::Failed) {
        println!(
            "   ❌ {} ({}): {}",
            task.name,
            task.id,
            task.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn is_idle(stats: &SchedulerStats) -> bool {
    stats.pending + stats.running + stats.paused == 0 && stats.in_flight == 0
}

fn report(stats: &SchedulerStats) {
    tracing::info!(
        "📊 {} total | {} pending ({} waiting) | {} running | {} completed | {} failed",
        stats.total,
        stats.pending,
        stats.waiting_for_slot,
        stats.running,
        stats.completed,
        stats.failed
    );
}
