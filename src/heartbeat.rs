//! Periodic device heartbeat upsert

use kiosk_shared::{policy, CommandStore, HeartbeatMetadata};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::actuator::Actuator;
use crate::status::StatusBoard;

pub struct Heartbeat {
    device_id: String,
    hostname: String,
    target_package: Option<String>,
    interval: Duration,
    io_timeout: Duration,
    store: Arc<dyn CommandStore>,
    actuator: Arc<dyn Actuator>,
    status: StatusBoard,
    started: Instant,
}

impl Heartbeat {
    pub fn new(
        device_id: String,
        hostname: String,
        target_package: Option<String>,
        store: Arc<dyn CommandStore>,
        actuator: Arc<dyn Actuator>,
        status: StatusBoard,
    ) -> Self {
        Self {
            device_id,
            hostname,
            target_package,
            interval: Duration::from_millis(policy::HEARTBEAT_INTERVAL_MS),
            io_timeout: Duration::from_millis(policy::IO_TIMEOUT_MS),
            store,
            actuator,
            status,
            started: Instant::now(),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn metadata(&self) -> HeartbeatMetadata {
        let snapshot = self.status.snapshot().await;
        HeartbeatMetadata {
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: self.hostname.clone(),
            target_package: self.target_package.clone(),
            kiosk_active: snapshot.kiosk_active,
            uptime_secs: self.started.elapsed().as_secs(),
            reboot_capable: timeout(self.io_timeout, self.actuator.reboot_capability())
                .await
                .unwrap_or(false),
        }
    }

    async fn beat(&self) {
        let metadata = self.metadata().await;
        match timeout(
            self.io_timeout,
            self.store.upsert_heartbeat(&self.device_id, &metadata),
        )
        .await
        {
            Ok(Ok(())) => debug!("Heartbeat sent (uptime {}s)", metadata.uptime_secs),
            Ok(Err(e)) => warn!("Heartbeat failed: {}", e),
            Err(_) => warn!("Heartbeat timed out"),
        }
    }
}
