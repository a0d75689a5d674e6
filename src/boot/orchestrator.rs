//! Boot/Launch Orchestrator
//!
//! Waits for the platform to settle, then retries reachability plus launch
//! with fixed spacing until one attempt succeeds, attempts run out, or the
//! absolute ceiling passes. Runs once per process start.

use kiosk_shared::policy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tracing::{error, info, warn};

use super::probe::NetworkProbe;
use crate::actuator::{Actuator, LaunchMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPolicy {
    pub settle_delay: Duration,
    pub attempt_spacing: Duration,
    pub max_attempts: u32,
    /// Absolute bound measured from the start of the sequence
    pub ceiling: Duration,
    pub io_timeout: Duration,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(policy::BOOT_SETTLE_MS),
            attempt_spacing: Duration::from_millis(policy::BOOT_ATTEMPT_SPACING_MS),
            max_attempts: policy::BOOT_MAX_ATTEMPTS,
            ceiling: Duration::from_millis(policy::BOOT_CEILING_MS),
            io_timeout: Duration::from_millis(policy::IO_TIMEOUT_MS),
        }
    }
}

/// How the boot sequence ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Launched { attempt: u32 },
    NoTargetConfigured,
    AttemptsExhausted,
    CeilingReached,
}

impl fmt::Display for BootOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootOutcome::Launched { attempt } => write!(f, "launched on attempt {}", attempt),
            BootOutcome::NoTargetConfigured => write!(f, "no target configured"),
            BootOutcome::AttemptsExhausted => write!(f, "attempts exhausted"),
            BootOutcome::CeilingReached => write!(f, "time ceiling reached"),
        }
    }
}

pub struct BootOrchestrator {
    target_package: Option<String>,
    policy: BootPolicy,
    probe: Arc<dyn NetworkProbe>,
    actuator: Arc<dyn Actuator>,
}

impl BootOrchestrator {
    pub fn new(
        target_package: Option<String>,
        probe: Arc<dyn NetworkProbe>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            target_package,
            policy: BootPolicy::default(),
            probe,
            actuator,
        }
    }

    #[cfg(test)]
    pub fn with_policy(mut self, policy: BootPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the sequence to completion
    pub async fn run(&self) -> BootOutcome {
        let Some(app) = self.target_package.as_deref() else {
            warn!("[BOOT] No target application configured; nothing to launch");
            return BootOutcome::NoTargetConfigured;
        };

        let deadline = Instant::now() + self.policy.ceiling;
        info!(
            "[BOOT] Waiting {:?} for the platform to settle before launching {}",
            self.policy.settle_delay, app
        );
        sleep(self.policy.settle_delay).await;

        for attempt in 1..=self.policy.max_attempts {
            if Instant::now() >= deadline {
                error!("[BOOT] Gave up after {:?}", self.policy.ceiling);
                return BootOutcome::CeilingReached;
            }

            info!("[BOOT] Attempt {}/{}", attempt, self.policy.max_attempts);
            match timeout_at(deadline, self.try_launch(app)).await {
                Ok(true) => {
                    info!("[BOOT] {} launched on attempt {}", app, attempt);
                    return BootOutcome::Launched { attempt };
                }
                Ok(false) => {}
                Err(_) => {
                    error!(
                        "[BOOT] Attempt {} still running at the {:?} ceiling; giving up",
                        attempt, self.policy.ceiling
                    );
                    return BootOutcome::CeilingReached;
                }
            }

            if attempt < self.policy.max_attempts {
                sleep_until(deadline.min(Instant::now() + self.policy.attempt_spacing)).await;
            }
        }

        error!(
            "[BOOT] {} not launched after {} attempts",
            app, self.policy.max_attempts
        );
        BootOutcome::AttemptsExhausted
    }

    async fn try_launch(&self, app: &str) -> bool {
        let reachable = timeout(self.policy.io_timeout, self.probe.reachable())
            .await
            .unwrap_or(false);
        if !reachable {
            warn!("[BOOT] Network not reachable yet");
            return false;
        }

        match timeout(
            self.policy.io_timeout,
            self.actuator.launch(app, LaunchMode::Foreground),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("[BOOT] Launch failed: {}", e);
                false
            }
            Err(_) => {
                warn!("[BOOT] Launch timed out");
                false
            }
        }
    }
}
