//! Subcommand implementations.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use shoal_api::ApiState;
use shoal_autoscale::{
    Autoscaler, CycleReport, HttpInventory, ScaleOutLoop, ScalingLimits, StaticInventory,
    TaskInventory, epoch_secs_f64,
};
use shoal_core::{ConfigSource, Inventory, ServiceAutoscalingInfo, SoaDir, SystemConfig};
use shoal_metrics::{AgentStatsClient, HttpSettings, MetricsProviders};
use shoal_state::{StateStore, records};

type Fleet<I> = ScaleOutLoop<StateStore, AgentStatsClient, I, SoaDir>;

// ── Assembly ───────────────────────────────────────────────────────

fn open_store(system: &SystemConfig) -> anyhow::Result<StateStore> {
    if let Some(parent) = system.state_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(&system.state_path)?.with_lock_lease(system.autoscaler.lock_lease());
    info!(path = ?system.state_path, "state store opened");
    Ok(store)
}

fn soa_dir(system: &SystemConfig) -> SoaDir {
    SoaDir::new(&system.soa_dir, &system.cluster)
}

fn http_inventory(system: &SystemConfig) -> HttpInventory {
    HttpInventory::new(&system.inventory.address, system.inventory.timeout())
}

fn scale_out_loop<I: TaskInventory>(system: &SystemConfig, store: StateStore, inventory: I) -> Fleet<I> {
    let settings = &system.autoscaler;
    let providers = MetricsProviders::new(
        store,
        AgentStatsClient::new(settings.stats_timeout()),
        HttpSettings {
            timeout: settings.http_timeout(),
            stats_timeout: settings.stats_timeout(),
            concurrency: settings.http_concurrency,
        },
    );
    let limits = ScalingLimits {
        max_task_delta: settings.max_task_delta,
        max_downscale_fraction: settings.max_downscale_fraction,
    };
    let autoscaler = Autoscaler::new(providers, limits, settings.lock_timeout());
    ScaleOutLoop::new(Arc::new(autoscaler), inventory, soa_dir(system), settings.workers)
}

/// Flip `shutdown` on Ctrl-C.
fn spawn_ctrl_c(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown.send(true);
    });
}

// ── Scale-out ──────────────────────────────────────────────────────

pub async fn run(system: &SystemConfig) -> anyhow::Result<()> {
    info!(cluster = %system.cluster, "Shoal autoscaler starting");
    let store = open_store(system)?;
    let fleet = scale_out_loop(system, store, http_inventory(system));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_ctrl_c(shutdown_tx);
    fleet.run(system.autoscaler.interval(), shutdown_rx).await;

    info!("Shoal autoscaler stopped");
    Ok(())
}

pub async fn once(
    system: &SystemConfig,
    services: &[String],
    inventory_file: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(system)?;
    let report = match inventory_file {
        Some(path) => {
            let inventory = read_inventory(path)?;
            scale_out_loop(system, store, StaticInventory(inventory))
                .autoscale_services(services, epoch_secs_f64())
                .await?
        }
        None => {
            scale_out_loop(system, store, http_inventory(system))
                .autoscale_services(services, epoch_secs_f64())
                .await?
        }
    };
    print_report(&report);
    Ok(())
}

fn read_inventory(path: &Path) -> anyhow::Result<Inventory> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read inventory file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse inventory file {}", path.display()))
}

fn print_report(report: &CycleReport) {
    if report.paused {
        println!("autoscaling is paused, nothing evaluated");
        return;
    }
    for (job_id, outcome) in &report.outcomes {
        println!("{job_id:<32} {outcome}");
    }
    for (job_id, reason) in &report.failures {
        println!("{job_id:<32} FAILED: {reason}");
    }
    for job_id in &report.not_deployed {
        println!("{job_id:<32} not deployed");
    }
}

// ── Status ─────────────────────────────────────────────────────────

pub async fn status(system: &SystemConfig, services: &[String]) -> anyhow::Result<()> {
    let store = open_store(system)?;
    let now = epoch_secs_f64();
    if let Some(expiry) = records::pause_expiry(&store)?
        && now < expiry
    {
        println!("autoscaling paused for another {:.0}s", expiry - now);
    }

    let fleet = scale_out_loop(system, store, http_inventory(system));
    let infos = fleet.autoscaling_infos(services, now).await?;
    print_infos(&infos);
    Ok(())
}

fn print_infos(infos: &[ServiceAutoscalingInfo]) {
    println!(
        "{:<32} {:>8} {:>5} {:>5} {:>12} {:>8}",
        "INSTANCE", "CURRENT", "MIN", "MAX", "UTILIZATION", "TARGET"
    );
    for info in infos {
        println!(
            "{:<32} {:>8} {:>5} {:>5} {:>12} {:>8}",
            format!("{}.{}", info.service, info.instance),
            info.current_instances,
            info.min_instances,
            info.max_instances,
            info.utilization_display(),
            info.target_display(),
        );
    }
}

// ── Operator overrides ─────────────────────────────────────────────

pub fn pause(system: &SystemConfig, minutes: u64) -> anyhow::Result<()> {
    anyhow::ensure!(minutes > 0, "minutes must be positive");
    let seconds = minutes
        .checked_mul(60)
        .ok_or_else(|| anyhow::anyhow!("minutes is too large"))?;
    let store = open_store(system)?;
    let expiry = epoch_secs_f64() + seconds as f64;
    records::pause_until(&store, expiry)?;
    info!(minutes, "autoscaling paused");
    Ok(())
}

pub fn unpause(system: &SystemConfig) -> anyhow::Result<()> {
    let store = open_store(system)?;
    if records::unpause(&store)? {
        info!("autoscaling unpaused");
    } else {
        info!("autoscaling was not paused");
    }
    Ok(())
}

pub fn set_instances(system: &SystemConfig, service: &str, instance: &str, count: u32) -> anyhow::Result<()> {
    let config = soa_dir(system).load(service, instance)?;
    anyhow::ensure!(
        config.max_instances.is_some(),
        "autoscaling is not enabled for {}",
        config.job_id()
    );

    let (desired, status) = shoal_api::handlers::clamp_desired_instances(&config, count);
    let store = open_store(system)?;
    records::set_instances(&store, service, instance, desired)?;
    if desired != count {
        warn!(job_id = %config.job_id(), requested = count, desired, "{status}");
    }
    println!("{}: desired_instances = {desired} ({status})", config.job_id());
    Ok(())
}

// ── Serve ──────────────────────────────────────────────────────────

pub async fn serve(system: &SystemConfig, listen: SocketAddr) -> anyhow::Result<()> {
    info!(cluster = %system.cluster, "Shoal daemon starting");
    let store = open_store(system)?;
    let fleet = Arc::new(scale_out_loop(system, store.clone(), http_inventory(system)));
    let state = ApiState::new(store, Arc::new(soa_dir(system)));
    let interval = system.autoscaler.interval();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_shutdown = shutdown_rx.clone();
    let refresh_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let loop_fleet = fleet.clone();
    let loop_handle = tokio::spawn(async move {
        loop_fleet.run(interval, loop_shutdown).await;
    });

    let snapshots = state.snapshots.clone();
    let refresh_handle = tokio::spawn(async move {
        refresh_snapshots(fleet, snapshots, interval, refresh_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = shoal_api::build_router(state);
    info!(addr = %listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(listen).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = loop_handle.await;
    let _ = refresh_handle.await;

    info!("Shoal daemon stopped");
    Ok(())
}

/// Recompute the dry-run snapshots served on `/metrics` every `interval`.
async fn refresh_snapshots<I: TaskInventory>(
    fleet: Arc<Fleet<I>>,
    snapshots: Arc<RwLock<Vec<ServiceAutoscalingInfo>>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match fleet.autoscaling_infos(&[], epoch_secs_f64()).await {
                    Ok(infos) => *snapshots.write().await = infos,
                    Err(e) => warn!(error = %e, "failed to refresh autoscaling snapshots"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
