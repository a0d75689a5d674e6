//! Engine-local reconciliation state, one instance per command kind

use std::time::Duration;
use tokio::time::Instant;

/// State owned by exactly one poller task; never shared
#[derive(Debug, Default)]
pub struct ReconciliationState {
    last_action_at: Option<Instant>,
    action_in_flight: bool,
    bypass_cooldown_once: bool,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn last_action_at(&self) -> Option<Instant> {
        self.last_action_at
    }

    pub fn action_in_flight(&self) -> bool {
        self.action_in_flight
    }

    /// Whether an action happened less than `cooldown` before `now`
    pub fn in_cooldown(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_action_at
            .map(|at| now.saturating_duration_since(at) < cooldown)
            .unwrap_or(false)
    }

    pub fn begin_action(&mut self) {
        self.action_in_flight = true;
    }

    pub fn record_action(&mut self, at: Instant) {
        self.last_action_at = Some(at);
    }

    /// Clear the in-flight guard
    pub fn release(&mut self) {
        self.action_in_flight = false;
    }

    /// Let the next cycle ignore the cooldown
    pub fn arm_bypass(&mut self) {
        self.bypass_cooldown_once = true;
    }

    /// Consume a pending bypass
    pub fn take_bypass(&mut self) -> bool {
        std::mem::take(&mut self.bypass_cooldown_once)
    }
}
