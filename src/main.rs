mod actuator;
mod boot;
mod config;
mod control;
mod heartbeat;
mod kiosk;
mod reconcile;
mod settings;
mod status;

#[cfg(test)]
mod testing;

use actuator::{Actuator, ShellActuator};
use anyhow::{Context, Result};
use boot::{BootOrchestrator, TcpProbe};
use config::AgentConfig;
use control::ControlServer;
use heartbeat::Heartbeat;
use kiosk::KioskEnforcer;
use kiosk_shared::{CommandKind, CommandStore, PostgrestStore};
use reconcile::{KindPoller, KindPolicy};
use settings::LocalSettings;
use status::{AgentHandle, StatusBoard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_MARGIN: Duration = Duration::from_secs(5);

/// Long enough for every poller to finish a cycle it has already started
fn shutdown_drain() -> Duration {
    CommandKind::ALL
        .iter()
        .map(|kind| KindPolicy::for_kind(*kind).max_cycle())
        .max()
        .unwrap_or_default()
        + DRAIN_MARGIN
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AgentConfig::from_env()?;
    let device_id = config.resolve_device_id()?;
    let settings = LocalSettings::load(&config.settings_path).await?;
    let target_package = config.target_package.clone().or(settings.target_package);

    info!("Kiosk agent starting: {}", device_id);
    info!("  Target application: {}", target_package.as_deref().unwrap_or("(none)"));
    if !settings.onboarding_seen {
        warn!("Device setup has not been completed");
    }

    let store: Arc<dyn CommandStore> = Arc::new(
        PostgrestStore::new(config.store.clone()).context("creating backend client")?,
    );
    let actuator: Arc<dyn Actuator> = Arc::new(ShellActuator::new(config.actuator.clone()));
    let status = StatusBoard::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (manual_tx, manual_rx) = mpsc::channel(1);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut manual_rx = Some(manual_rx);

    for kind in CommandKind::ALL {
        let mut poller = KindPoller::new(
            kind,
            device_id.clone(),
            target_package.clone(),
            store.clone(),
            actuator.clone(),
            status.clone(),
        );
        if kind == CommandKind::RestartApp {
            if let Some(rx) = manual_rx.take() {
                poller = poller.with_manual_trigger(rx);
            }
        }
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    let enforcer = KioskEnforcer::new(
        device_id.clone(),
        target_package.clone(),
        store.clone(),
        actuator.clone(),
        status.clone(),
    );
    tasks.push(tokio::spawn(enforcer.run(shutdown_rx.clone())));

    let heartbeat = Heartbeat::new(
        device_id.clone(),
        config::hostname(),
        target_package.clone(),
        store.clone(),
        actuator.clone(),
        status.clone(),
    );
    tasks.push(tokio::spawn(heartbeat.run(shutdown_rx.clone())));

    let handle = AgentHandle::new(
        device_id.clone(),
        target_package.clone(),
        status.clone(),
        manual_tx,
    );
    let control = ControlServer::bind(&config.control_addr, handle).await?;
    tasks.push(tokio::spawn(control.run(shutdown_rx.clone())));

    if config.skip_boot {
        info!("[BOOT] Skipped by configuration");
    } else {
        match TcpProbe::for_url(&config.store.base_url, PROBE_CONNECT_TIMEOUT) {
            Some(probe) => {
                info!("[BOOT] Reachability checks against {}", probe.addr());
                let boot = BootOrchestrator::new(target_package.clone(), Arc::new(probe), actuator.clone());
                let status = status.clone();
                let mut shutdown = shutdown_rx.clone();
                tasks.push(tokio::spawn(async move {
                    tokio::select! {
                        outcome = boot.run() => {
                            info!("[BOOT] Finished: {}", outcome);
                            status.set_boot_outcome(outcome.to_string()).await;
                        }
                        _ = shutdown.changed() => {}
                    }
                }));
            }
            None => error!("[BOOT] Cannot derive a probe address from {}", config.store.base_url),
        }
    }

    status.set_running(true).await;
    info!("Agent running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");

    status.set_running(false).await;
    let _ = shutdown_tx.send(true);

    let limit = shutdown_drain();
    let drain = futures::future::join_all(tasks);
    if tokio::time::timeout(limit, drain).await.is_err() {
        warn!("Tasks still running after {:?}; exiting anyway", limit);
    }

    info!("Stopped");
    Ok(())
}
