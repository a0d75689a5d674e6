//! Per-kind cadence, cooldown and retry configuration

use kiosk_shared::{policy, CommandKind};
use std::time::Duration;

/// Timing and retry knobs for one command kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPolicy {
    /// Delay between cycles after a clean cycle
    pub poll_interval: Duration,
    /// Delay after a cycle that failed
    pub error_backoff: Duration,
    /// Minimum spacing between two applied actions
    pub cooldown: Duration,
    /// Mark-and-verify rounds before giving up on an acknowledgment
    pub ack_attempts: u32,
    pub ack_retry_delay: Duration,
    /// Tries of the effect itself within one cycle
    pub apply_attempts: u32,
    /// Hold on the in-flight guard after an action
    pub settle_delay: Duration,
    /// Bound on each store or actuator call
    pub io_timeout: Duration,
}

impl KindPolicy {
    /// Defaults for a kind
    pub fn for_kind(kind: CommandKind) -> Self {
        let base = Self::default();
        match kind {
            // A failed reboot is either missing its grant or the platform
            // refused; trying again immediately will not help
            CommandKind::Reboot => Self {
                apply_attempts: 1,
                ..base
            },
            CommandKind::RestartApp => base,
        }
    }

    /// Bound on the whole mark-and-verify phase of one cycle
    pub fn ack_budget(&self) -> Duration {
        (self.io_timeout + self.ack_retry_delay) * self.ack_attempts
    }

    /// Bound on applying the effect, retries included
    pub fn apply_budget(&self) -> Duration {
        let attempts = self.apply_attempts.max(1);
        self.io_timeout * attempts + self.ack_retry_delay * (attempts - 1)
    }

    /// Longest a started cycle can take: fetch, capability check,
    /// acknowledgment, apply and settle
    pub fn max_cycle(&self) -> Duration {
        self.io_timeout * 2 + self.ack_budget() + self.apply_budget() + self.settle_delay
    }
}

impl Default for KindPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(policy::COMMAND_POLL_INTERVAL_MS),
            error_backoff: Duration::from_millis(policy::COMMAND_ERROR_BACKOFF_MS),
            cooldown: Duration::from_millis(policy::ACTION_COOLDOWN_MS),
            ack_attempts: policy::ACK_ATTEMPTS,
            ack_retry_delay: Duration::from_millis(policy::ACK_RETRY_DELAY_MS),
            apply_attempts: 3,
            settle_delay: Duration::from_millis(policy::ACTION_SETTLE_MS),
            io_timeout: Duration::from_millis(policy::IO_TIMEOUT_MS),
        }
    }
}
