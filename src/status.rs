//! Agent status shared with the UI surface
//!
//! Loops publish into a `StatusBoard`; the control socket reads snapshots
//! and forwards manual restart requests through an `AgentHandle`.

use anyhow::{anyhow, Result};
use kiosk_shared::{CommandKind, StatusReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Point-in-time view of the agent for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub service_running: bool,
    pub last_poll_at_ms: Option<u64>,
    pub last_action_at_ms: HashMap<CommandKind, u64>,
    pub kiosk_active: bool,
    pub reboot_capability_missing: bool,
    pub boot_outcome: Option<String>,
}

/// Shared, lock-protected status written by the agent loops
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn set_running(&self, running: bool) {
        self.inner.write().await.service_running = running;
    }

    pub async fn record_poll(&self, at_ms: u64) {
        self.inner.write().await.last_poll_at_ms = Some(at_ms);
    }

    pub async fn record_action(&self, kind: CommandKind, at_ms: u64) {
        self.inner.write().await.last_action_at_ms.insert(kind, at_ms);
    }

    pub async fn set_kiosk_active(&self, active: bool) {
        self.inner.write().await.kiosk_active = active;
    }

    /// Returns true when the flag changed, so callers can prompt only once
    pub async fn set_reboot_capability_missing(&self, missing: bool) -> bool {
        let mut status = self.inner.write().await;
        let changed = status.reboot_capability_missing != missing;
        status.reboot_capability_missing = missing;
        changed
    }

    pub async fn set_boot_outcome(&self, outcome: impl Into<String>) {
        self.inner.write().await.boot_outcome = Some(outcome.into());
    }
}

/// Surface exposed to the UI layer
#[derive(Debug, Clone)]
pub struct AgentHandle {
    device_id: String,
    target_package: Option<String>,
    status: StatusBoard,
    manual_tx: mpsc::Sender<()>,
}

impl AgentHandle {
    pub fn new(
        device_id: String,
        target_package: Option<String>,
        status: StatusBoard,
        manual_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            device_id,
            target_package,
            status,
            manual_tx,
        }
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        self.status.snapshot().await
    }

    /// Request one immediate restart cycle that ignores the cooldown
    ///
    /// Requests made while one is already queued collapse into it.
    pub fn trigger_manual_restart(&self) -> Result<()> {
        match self.manual_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => {
                Err(anyhow!("Restart poller is not running"))
            }
        }
    }

    /// Snapshot in wire form for the control socket
    pub async fn status_report(&self) -> StatusReport {
        let snapshot = self.status_snapshot().await;
        let last_action =
            |kind: CommandKind| snapshot.last_action_at_ms.get(&kind).copied().unwrap_or(0);

        StatusReport {
            device_id: self.device_id.clone(),
            service_running: snapshot.service_running,
            last_poll_at_ms: snapshot.last_poll_at_ms.unwrap_or(0),
            last_reboot_at_ms: last_action(CommandKind::Reboot),
            last_restart_at_ms: last_action(CommandKind::RestartApp),
            kiosk_active: snapshot.kiosk_active,
            reboot_capability_missing: snapshot.reboot_capability_missing,
            target_package: self.target_package.clone().unwrap_or_default(),
            boot_outcome: snapshot.boot_outcome.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capability_flag_reports_change_once() {
        let board = StatusBoard::new();
        assert!(board.set_reboot_capability_missing(true).await);
        assert!(!board.set_reboot_capability_missing(true).await);
        assert!(board.set_reboot_capability_missing(false).await);
    }

    #[tokio::test]
    async fn test_manual_triggers_coalesce() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = AgentHandle::new("dev-1".into(), None, StatusBoard::new(), tx);

        handle.trigger_manual_restart().unwrap();
        handle.trigger_manual_restart().unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_manual_trigger_without_poller_fails() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = AgentHandle::new("dev-1".into(), None, StatusBoard::new(), tx);
        assert!(handle.trigger_manual_restart().is_err());
    }

    #[tokio::test]
    async fn test_status_report_fields() {
        let board = StatusBoard::new();
        board.set_running(true).await;
        board.record_poll(1_000).await;
        board.record_action(CommandKind::RestartApp, 900).await;
        board.set_kiosk_active(true).await;

        let (tx, _rx) = mpsc::channel(1);
        let handle = AgentHandle::new("dev-1".into(), Some("kiosk-ui".into()), board, tx);
        let report = handle.status_report().await;

        assert!(report.service_running);
        assert_eq!(report.last_poll_at_ms, 1_000);
        assert_eq!(report.last_restart_at_ms, 900);
        assert_eq!(report.last_reboot_at_ms, 0);
        assert!(report.kiosk_active);
        assert_eq!(report.target_package, "kiosk-ui");
    }
}
