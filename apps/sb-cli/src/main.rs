use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;
use sb_app::{
    AppError, AppResult, CachePublisher, CacheSignalSource, ControllerService, ControllerSettings,
    ReplayOverrides, VacuumSampler, build_relay, build_transport, open_store, prune_once,
    queue_status, reset_all, run_replay, run_sync,
};
use sb_config::DeviceConfig;
use sb_controls::{SignalSnapshot, aux};
use sb_core::{Clock, SystemClock};
use sb_sync::HttpTransport;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sugarbush")]
#[command(
    about = "Sugarbush pump controller, store-and-forward uploader and replay harness",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a device config
    Validate {
        /// Path to the device YAML file
        config: PathBuf,
    },
    /// Run the pump controller against the signal cache
    Controller {
        /// Path to the device YAML file
        config: PathBuf,
    },
    /// Upload queued records
    Sync {
        /// Path to the device YAML file
        config: PathBuf,
        /// One full pass, then exit
        #[arg(long)]
        once: bool,
    },
    /// Replay recorded traces through the controller and queue
    Replay {
        /// Path to the device YAML file
        config: PathBuf,
        /// Virtual seconds per wall second
        #[arg(long)]
        multiplier: Option<f64>,
        /// Stop at the end of the traces instead of looping
        #[arg(long)]
        no_loop: bool,
        /// Queue only; do not start an uploader
        #[arg(long)]
        no_upload: bool,
    },
    /// Run the vacuum sampler
    Vacuum {
        /// Path to the device YAML file
        config: PathBuf,
    },
    /// Write a hand-specified snapshot into the signal cache
    PublishSignals {
        /// Path to the device YAML file
        config: PathBuf,
        #[arg(long)]
        tank_full: bool,
        #[arg(long)]
        manual_start: bool,
        #[arg(long)]
        tank_empty: bool,
        #[arg(long)]
        clear_fatal: bool,
        #[arg(long)]
        vacuum_inhg: Option<f64>,
        /// Keep republishing until interrupted so the cache stays fresh
        #[arg(long)]
        hold: bool,
    },
    /// Show pending and acknowledged counts per stream
    QueueStatus {
        /// Path to the device YAML file
        config: PathBuf,
    },
    /// Delete acknowledged records past retention
    Prune {
        /// Path to the device YAML file
        config: PathBuf,
    },
    /// Clear the local queue and request a remote reset
    Reset {
        /// Path to the device YAML file
        config: PathBuf,
        /// Required; this deletes every queued record
        #[arg(long)]
        yes: bool,
        /// Skip the remote reset request
        #[arg(long)]
        local_only: bool,
    },
}

fn main() -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Controller { config } => cmd_controller(&config),
        Commands::Sync { config, once } => cmd_sync(&config, once),
        Commands::Replay {
            config,
            multiplier,
            no_loop,
            no_upload,
        } => cmd_replay(
            &config,
            ReplayOverrides {
                multiplier,
                loop_enabled: no_loop.then_some(false),
            },
            !no_upload,
        ),
        Commands::Vacuum { config } => cmd_vacuum(&config),
        Commands::PublishSignals {
            config,
            tank_full,
            manual_start,
            tank_empty,
            clear_fatal,
            vacuum_inhg,
            hold,
        } => {
            let mut snapshot =
                SignalSnapshot::new(SystemClock.now(), tank_full, manual_start, tank_empty);
            if clear_fatal {
                snapshot = snapshot.with_aux(aux::CLEAR_FATAL, true);
            }
            if let Some(inhg) = vacuum_inhg {
                snapshot = snapshot.with_aux(aux::VACUUM_INHG, inhg);
            }
            cmd_publish(&config, &snapshot, hold)
        }
        Commands::QueueStatus { config } => cmd_queue_status(&config),
        Commands::Prune { config } => cmd_prune(&config),
        Commands::Reset {
            config,
            yes,
            local_only,
        } => cmd_reset(&config, yes, local_only),
    }
}

fn load(config_path: &Path) -> AppResult<DeviceConfig> {
    Ok(sb_config::load_yaml(config_path)?)
}

fn stale_after(config: &DeviceConfig) -> Duration {
    Duration::milliseconds((config.controller.stale_after_s * 1000.0).round() as i64)
}

/// Stop flag flipped by SIGINT or SIGTERM.
fn install_stop_handler() -> AppResult<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(wait_for_shutdown());
            tracing::info!("shutdown requested");
            flag.store(true, Ordering::Relaxed);
        })?;
    Ok(stop)
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(%err, "SIGTERM handler unavailable, waiting for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

fn cmd_validate(config_path: &Path) -> AppResult<()> {
    println!("Validating config: {}", config_path.display());
    let config = load(config_path)?;
    println!("✓ Config is valid (device {})", config.device_id);
    let enabled = config.replay.streams.iter().filter(|s| s.enabled).count();
    println!("  Replay streams: {enabled} enabled");
    println!("  Queue: {}", config.queue.path.display());
    Ok(())
}

fn cmd_controller(config_path: &Path) -> AppResult<()> {
    let config = load(config_path)?;
    let store = open_store(&config)?;
    let stop = install_stop_handler()?;
    let source =
        CacheSignalSource::new(&config.signal_cache.path, SystemClock, stale_after(&config));
    let relay = build_relay(&config.controller.relay);
    let mut service = ControllerService::new(
        &store,
        source,
        relay,
        SystemClock,
        ControllerSettings::from_config(&config.controller),
    )?;
    let result = service.run(&stop);
    if let Err(err) = &result {
        if err.is_storage_exhausted() {
            tracing::error!(%err, "stopping controller: local storage exhausted");
        }
    }
    result.map(|_| ())
}

fn cmd_sync(config_path: &Path, once: bool) -> AppResult<()> {
    let config = load(config_path)?;
    if !config.sync.enabled {
        println!("Sync is disabled in {}", config_path.display());
        return Ok(());
    }
    let store = open_store(&config)?;
    let transport = build_transport(&config)?;
    let stop = install_stop_handler()?;
    run_sync(&config, &store, transport, SystemClock, &stop, once)
}

fn cmd_replay(config_path: &Path, overrides: ReplayOverrides, upload: bool) -> AppResult<()> {
    let config = load(config_path)?;
    let store = open_store(&config)?;
    let transport = if upload && config.sync.enabled {
        Some(build_transport(&config)?)
    } else {
        None
    };
    let stop = install_stop_handler()?;
    let summary = run_replay(&config, &store, overrides, transport, &stop)?;
    println!(
        "{} replay: {} ticks, {} rows ({} tank, {} pump), {} loops",
        if summary.cancelled { "✗ Cancelled" } else { "✓ Finished" },
        summary.ticks,
        summary.rows,
        summary.tank_rows,
        summary.pump_rows,
        summary.loops
    );
    println!("  Digest: {}", summary.digest);
    Ok(())
}

fn cmd_vacuum(config_path: &Path) -> AppResult<()> {
    let config = load(config_path)?;
    if !config.vacuum.enabled {
        println!("Vacuum sampling is disabled in {}", config_path.display());
        return Ok(());
    }
    let store = open_store(&config)?;
    let stop = install_stop_handler()?;
    VacuumSampler::new(
        &store,
        &config.signal_cache.path,
        SystemClock,
        stale_after(&config),
        &config.vacuum,
    )
    .run(&stop)
}

fn cmd_publish(config_path: &Path, snapshot: &SignalSnapshot, hold: bool) -> AppResult<()> {
    let config = load(config_path)?;
    let mut publisher = CachePublisher::new(&config.signal_cache.path, SystemClock);
    let written = publisher.publish(snapshot)?;
    println!(
        "✓ Published version {} to {}",
        written.version,
        publisher.path().display()
    );
    if !hold {
        return Ok(());
    }
    let stop = install_stop_handler()?;
    let every = StdDuration::from_secs_f64(config.signal_cache.publish_interval_s);
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(every);
        publisher.publish(snapshot)?;
    }
    println!("  Stopped at version {}", publisher.version());
    Ok(())
}

fn cmd_queue_status(config_path: &Path) -> AppResult<()> {
    let config = load(config_path)?;
    let store = open_store(&config)?;
    println!("Queue: {}", config.queue.path.display());
    println!("  {:<10} {:>8} {:>9} {:>8}", "stream", "pending", "in-flight", "acked");
    for s in queue_status(&store)? {
        println!(
            "  {:<10} {:>8} {:>9} {:>8}",
            s.stream.as_str(),
            s.pending,
            s.in_flight,
            s.acked
        );
    }
    Ok(())
}

fn cmd_prune(config_path: &Path) -> AppResult<()> {
    let config = load(config_path)?;
    let store = open_store(&config)?;
    let removed = prune_once(&store, config.queue.retention_days)?;
    println!(
        "✓ Pruned {removed} acknowledged records older than {} days",
        config.queue.retention_days
    );
    Ok(())
}

fn cmd_reset(config_path: &Path, yes: bool, local_only: bool) -> AppResult<()> {
    if !yes {
        return Err(AppError::InvalidInput(
            "reset deletes every queued record; pass --yes to confirm".to_string(),
        ));
    }
    let config = load(config_path)?;
    let store = open_store(&config)?;
    let removed = if local_only || !config.sync.enabled {
        reset_all::<HttpTransport>(&store, None)?
    } else {
        let mut transport = build_transport(&config)?;
        reset_all(&store, Some(&mut transport))?
    };
    println!("✓ Removed {removed} local records");
    Ok(())
}
