//! Per-kind poller - drains pending commands and applies their effect

use futures::future;
use kiosk_shared::{now_ms, Command, CommandKind, CommandStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::policy::KindPolicy;
use super::state::ReconciliationState;
use crate::actuator::{Actuator, ActuatorError, LaunchMode};
use crate::status::StatusBoard;

/// Why pending commands were drained without applying an effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Cooldown,
    InFlight,
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing pending
    Idle,
    /// Effect applied once for `acknowledged` commands
    Applied { acknowledged: usize, confirmed: bool },
    /// Commands acknowledged, effect withheld
    Suppressed {
        reason: SuppressReason,
        acknowledged: usize,
    },
    /// Commands left pending until a capability is granted
    Deferred,
}

/// Errors that end a cycle early; the loop backs off and continues
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl CycleError {
    /// Whether the next cycle can succeed without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            CycleError::Store(e) => e.is_transient(),
            CycleError::Timeout(_) => true,
        }
    }
}

/// What happened to an acknowledgment round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckReport {
    pub requested: usize,
    /// Ids still pending after every attempt
    pub unconfirmed: Vec<i64>,
}

impl AckReport {
    pub fn confirmed(&self) -> bool {
        self.unconfirmed.is_empty()
    }
}

/// Reconciles one command kind for one device
pub struct KindPoller {
    kind: CommandKind,
    device_id: String,
    target_package: Option<String>,
    policy: KindPolicy,
    state: ReconciliationState,
    store: Arc<dyn CommandStore>,
    actuator: Arc<dyn Actuator>,
    status: StatusBoard,
    manual_rx: Option<mpsc::Receiver<()>>,
}

impl KindPoller {
    /// Create a poller with the kind's default policy
    pub fn new(
        kind: CommandKind,
        device_id: String,
        target_package: Option<String>,
        store: Arc<dyn CommandStore>,
        actuator: Arc<dyn Actuator>,
        status: StatusBoard,
    ) -> Self {
        Self {
            kind,
            device_id,
            target_package,
            policy: KindPolicy::for_kind(kind),
            state: ReconciliationState::new(),
            store,
            actuator,
            status,
            manual_rx: None,
        }
    }

    /// Accept manual restart requests on this poller
    pub fn with_manual_trigger(mut self, rx: mpsc::Receiver<()>) -> Self {
        self.manual_rx = Some(rx);
        self
    }

    #[cfg(test)]
    fn state(&self) -> &ReconciliationState {
        &self.state
    }

    #[cfg(test)]
    fn request_bypass(&mut self) {
        self.state.arm_bypass();
    }

    /// Run cycles until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("[ENGINE] {} poller started for {}", self.kind, self.device_id);

        loop {
            let delay = match self.poll_once().await {
                Ok(outcome) => {
                    debug!("[ENGINE] {} cycle: {:?}", self.kind, outcome);
                    self.policy.poll_interval
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "[ENGINE] {} cycle failed: {}; next poll in {:?}",
                        self.kind, e, self.policy.error_backoff
                    );
                    self.policy.error_backoff
                }
                Err(e) => {
                    error!(
                        "[ENGINE] {} cycle failed: {}; check the backend configuration",
                        self.kind, e
                    );
                    self.policy.error_backoff
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                Some(()) = next_manual(&mut self.manual_rx) => {
                    info!("[ENGINE] Manual {} requested", self.kind);
                    self.state.arm_bypass();
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("[ENGINE] {} poller stopped", self.kind);
    }

    /// One reconciliation cycle
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, CycleError> {
        let manual = self.state.take_bypass();

        let pending = match self.fetch_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                // Keep the manual request for the next cycle
                if manual {
                    self.state.arm_bypass();
                }
                return Err(e);
            }
        };
        self.status.record_poll(now_ms()).await;

        if pending.is_empty() {
            self.state.release();
            if manual && self.kind == CommandKind::RestartApp {
                self.apply_and_settle().await;
                return Ok(CycleOutcome::Applied {
                    acknowledged: 0,
                    confirmed: true,
                });
            }
            return Ok(CycleOutcome::Idle);
        }

        info!(
            "[ENGINE] {} {} command(s) pending: {:?}",
            pending.len(),
            self.kind,
            pending.iter().map(|c| c.id).collect::<Vec<_>>()
        );

        let gate = if self.state.action_in_flight() {
            Some(SuppressReason::InFlight)
        } else if !manual && self.state.in_cooldown(Instant::now(), self.policy.cooldown) {
            Some(SuppressReason::Cooldown)
        } else {
            None
        };

        if let Some(reason) = gate {
            let report = self.acknowledge_all(&pending).await;
            if reason == SuppressReason::InFlight {
                // Only a cycle dropped mid-action leaves the guard set
                self.state.release();
            }
            info!(
                "[ENGINE] {} suppressed ({:?}); drained {} command(s)",
                self.kind, reason, report.requested
            );
            return Ok(CycleOutcome::Suppressed {
                reason,
                acknowledged: report.requested,
            });
        }

        if self.kind == CommandKind::Reboot && !self.check_reboot_capability().await {
            return Ok(CycleOutcome::Deferred);
        }

        self.state.begin_action();
        let report = self.acknowledge_all(&pending).await;
        self.apply_and_settle().await;

        Ok(CycleOutcome::Applied {
            acknowledged: report.requested,
            confirmed: report.confirmed(),
        })
    }

    /// Mark every pending command executed and verify by re-querying
    ///
    /// The whole phase ends by `KindPolicy::ack_budget` however many
    /// commands are pending.
    async fn acknowledge_all(&self, pending: &[Command]) -> AckReport {
        let mut outstanding: Vec<i64> = pending.iter().map(|c| c.id).collect();
        let deadline = Instant::now() + self.policy.ack_budget();

        'rounds: for attempt in 1..=self.policy.ack_attempts {
            for id in &outstanding {
                if Instant::now() >= deadline {
                    break 'rounds;
                }
                match self
                    .bounded_until(deadline, "mark_executed", self.store.mark_executed(*id))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("[ENGINE] Failed to mark command {} executed: {}", id, e),
                    Err(e) => warn!("[ENGINE] Command {}: {}", id, e),
                }
            }

            let verify = self
                .bounded_until(
                    deadline,
                    "fetch_pending_commands",
                    self.store.fetch_pending_commands(&self.device_id, self.kind),
                )
                .await;
            match verify {
                Ok(Ok(still_pending)) => {
                    outstanding.retain(|id| still_pending.iter().any(|c| c.id == *id));
                }
                Ok(Err(e)) => warn!("[ENGINE] Could not verify acknowledgment: {}", e),
                Err(e) => warn!("[ENGINE] Could not verify acknowledgment: {}", e),
            }

            if outstanding.is_empty() {
                break;
            }
            if attempt < self.policy.ack_attempts {
                sleep_until(deadline.min(Instant::now() + self.policy.ack_retry_delay)).await;
            }
        }

        if !outstanding.is_empty() {
            error!(
                "[ENGINE] {} command(s) {:?} still pending after {} acknowledgment attempts; applying anyway",
                self.kind, outstanding, self.policy.ack_attempts
            );
        }

        AckReport {
            requested: pending.len(),
            unconfirmed: outstanding,
        }
    }

    /// Apply the effect, then hold the in-flight guard for the settle delay
    async fn apply_and_settle(&mut self) {
        self.state.begin_action();
        self.apply().await;
        self.state.record_action(Instant::now());
        self.status.record_action(self.kind, now_ms()).await;

        sleep(self.policy.settle_delay).await;
        self.state.release();
    }

    async fn apply(&self) {
        for attempt in 1..=self.policy.apply_attempts.max(1) {
            let result = match self.kind {
                CommandKind::Reboot => self.reboot().await,
                CommandKind::RestartApp => match &self.target_package {
                    Some(app) => self.restart(app).await,
                    None => {
                        warn!("[ENGINE] No target application configured; restart skipped");
                        return;
                    }
                },
            };

            match result {
                Ok(()) => {
                    info!("[ENGINE] {} applied", self.kind);
                    return;
                }
                Err(e) if e.is_permanent() => {
                    error!("[ENGINE] {} cannot be applied: {}", self.kind, e);
                    return;
                }
                Err(e) => {
                    warn!(
                        "[ENGINE] {} attempt {}/{} failed: {}",
                        self.kind, attempt, self.policy.apply_attempts, e
                    );
                    if attempt < self.policy.apply_attempts {
                        sleep(self.policy.ack_retry_delay).await;
                    }
                }
            }
        }
    }

    async fn reboot(&self) -> Result<(), ActuatorError> {
        self.bounded("reboot", self.actuator.reboot_device())
            .await
            .unwrap_or_else(|e| Err(ActuatorError::CommandFailed(e.to_string())))
    }

    async fn restart(&self, app: &str) -> Result<(), ActuatorError> {
        self.bounded("launch", self.actuator.launch(app, LaunchMode::Restart))
            .await
            .unwrap_or_else(|e| Err(ActuatorError::CommandFailed(e.to_string())))
    }

    /// False when the reboot grant is missing; prompts once per loss of grant
    async fn check_reboot_capability(&self) -> bool {
        let capable = self
            .bounded("reboot capability", self.actuator.reboot_capability())
            .await
            .unwrap_or(false);

        let changed = self.status.set_reboot_capability_missing(!capable).await;
        if !capable && changed {
            warn!(
                "[ENGINE] Reboot requested but the agent lacks the reboot grant. \
                 Run the agent as root or set KIOSK_AGENT_REBOOT_GRANTED=1; \
                 the command stays pending until then."
            );
        }
        capable
    }

    async fn fetch_pending(&self) -> Result<Vec<Command>, CycleError> {
        let pending = self
            .bounded(
                "fetch_pending_commands",
                self.store.fetch_pending_commands(&self.device_id, self.kind),
            )
            .await??;
        Ok(pending)
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, CycleError> {
        timeout(self.policy.io_timeout, fut)
            .await
            .map_err(|_| CycleError::Timeout(what))
    }

    /// Like `bounded`, but never past `deadline`
    async fn bounded_until<T>(
        &self,
        deadline: Instant,
        what: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, CycleError> {
        let until = deadline.min(Instant::now() + self.policy.io_timeout);
        timeout_at(until, fut)
            .await
            .map_err(|_| CycleError::Timeout(what))
    }
}

async fn next_manual(rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}
