//! Kiosk Enforcer
//!
//! Polls the device's kiosk flag at a slow cadence and, while kiosk mode is
//! active, runs a fast assertion pass that keeps the target application in
//! the foreground. Backend and platform errors are logged and retried on the
//! next tick; they never stop the loop.

use kiosk_shared::{
    kiosk_state::{FlagObservation, KioskStateMachine, KioskTransition},
    policy, CommandStore, DeviceFlags,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::actuator::{Actuator, LaunchMode};
use crate::status::StatusBoard;

/// Cadences for the enforcer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskTimings {
    pub flag_poll_interval: Duration,
    pub assert_interval: Duration,
    /// Delay before each launch attempt within one assertion pass
    pub launch_backoff: Vec<Duration>,
    pub io_timeout: Duration,
}

impl Default for KioskTimings {
    fn default() -> Self {
        Self {
            flag_poll_interval: Duration::from_millis(policy::KIOSK_FLAG_POLL_MS),
            assert_interval: Duration::from_millis(policy::KIOSK_ASSERT_INTERVAL_MS),
            launch_backoff: policy::KIOSK_LAUNCH_BACKOFF_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            io_timeout: Duration::from_millis(policy::IO_TIMEOUT_MS),
        }
    }
}

pub struct KioskEnforcer {
    device_id: String,
    /// Locally configured target
    configured_target: Option<String>,
    /// Target pushed by the backend alongside the flag, if any
    remote_target: Option<String>,
    machine: KioskStateMachine,
    timings: KioskTimings,
    store: Arc<dyn CommandStore>,
    actuator: Arc<dyn Actuator>,
    status: StatusBoard,
}

impl KioskEnforcer {
    pub fn new(
        device_id: String,
        target_package: Option<String>,
        store: Arc<dyn CommandStore>,
        actuator: Arc<dyn Actuator>,
        status: StatusBoard,
    ) -> Self {
        Self {
            device_id,
            configured_target: target_package,
            remote_target: None,
            machine: KioskStateMachine::new(),
            timings: KioskTimings::default(),
            store,
            actuator,
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.machine.is_active()
    }

    /// Application being enforced; the backend's choice wins over local config
    pub fn target(&self) -> Option<&str> {
        self.remote_target
            .as_deref()
            .or(self.configured_target.as_deref())
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("[KIOSK] Enforcer started for {}", self.device_id);

        let mut flag_ticker = interval(self.timings.flag_poll_interval);
        flag_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut assert_ticker = interval(self.timings.assert_interval);
        assert_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let active = self.is_active();
            tokio::select! {
                _ = flag_ticker.tick() => {
                    self.poll_flags().await;
                }
                _ = assert_ticker.tick(), if active => {
                    self.assert_foreground().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("[KIOSK] Enforcer stopped");
    }

    /// Read the kiosk flag once and apply any transition it causes
    pub async fn poll_flags(&mut self) -> KioskTransition {
        let observation = self.read_flag().await;
        let transition = self.machine.observe(observation);

        match transition {
            KioskTransition::Activated => {
                info!("[KIOSK] Kiosk mode enabled");
                self.on_activated().await;
            }
            KioskTransition::Deactivated => {
                info!("[KIOSK] Kiosk mode disabled");
                self.on_deactivated().await;
            }
            KioskTransition::Unchanged => {
                if observation == FlagObservation::Unavailable {
                    warn!(
                        "[KIOSK] Flag read failed ({} in a row); keeping {:?}",
                        self.machine.consecutive_read_failures(),
                        self.machine.state()
                    );
                }
            }
        }

        self.status.set_kiosk_active(self.is_active()).await;
        transition
    }

    async fn read_flag(&mut self) -> FlagObservation {
        let read = timeout(
            self.timings.io_timeout,
            self.store.fetch_device_flags(&self.device_id),
        )
        .await;

        match read {
            Ok(Ok(lookup)) => {
                if !lookup.is_found() {
                    debug!("[KIOSK] No device row for {}; kiosk off", self.device_id);
                }
                let flags = lookup.unwrap_or_else(|| DeviceFlags::defaults_for(&self.device_id));
                // A cleared remote target falls back to the configured one
                self.remote_target = flags.target_package;
                flags.kiosk_mode.into()
            }
            Ok(Err(e)) => {
                debug!("[KIOSK] Flag read error: {}", e);
                FlagObservation::Unavailable
            }
            Err(_) => FlagObservation::Unavailable,
        }
    }

    async fn on_activated(&self) {
        match self.target() {
            Some(app) => {
                if !self.foreground(app).await {
                    self.launch(app, 1).await;
                }
            }
            None => warn!("[KIOSK] Kiosk mode on but no target application configured"),
        }
        self.set_interception(true).await;
    }

    async fn on_deactivated(&self) {
        self.set_interception(false).await;
    }

    async fn set_interception(&self, enabled: bool) {
        let result = timeout(
            self.timings.io_timeout,
            self.actuator.set_input_interception(enabled),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[KIOSK] Could not set input interception to {}: {}", enabled, e),
            Err(_) => error!("[KIOSK] Setting input interception to {} timed out", enabled),
        }
    }

    /// One assertion pass
    ///
    /// Returns the number of launch attempts made.
    pub async fn assert_foreground(&self) -> usize {
        let Some(app) = self.target() else {
            return 0;
        };

        let mut attempts = 0;
        for (i, delay) in self.timings.launch_backoff.iter().enumerate() {
            if !delay.is_zero() {
                sleep(*delay).await;
            }
            if self.foreground(app).await {
                if i > 0 {
                    debug!("[KIOSK] {} back in foreground after {} launch(es)", app, attempts);
                }
                return attempts;
            }

            attempts += 1;
            debug!("[KIOSK] {} not in foreground; launch attempt {}", app, attempts);
            self.launch(app, attempts).await;
        }

        if attempts > 0 {
            warn!("[KIOSK] {} still not confirmed in foreground after {} attempts", app, attempts);
        }
        attempts
    }

    async fn launch(&self, app: &str, attempt: usize) {
        let launch = timeout(
            self.timings.io_timeout,
            self.actuator.launch(app, LaunchMode::Foreground),
        )
        .await;
        match launch {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[KIOSK] Launch attempt {} of {} failed: {}", attempt, app, e),
            Err(_) => warn!("[KIOSK] Launch attempt {} of {} timed out", attempt, app),
        }
    }

    async fn foreground(&self, app: &str) -> bool {
        timeout(self.timings.io_timeout, self.actuator.is_foreground(app))
            .await
            .unwrap_or(false)
    }
}
