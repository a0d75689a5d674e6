//! Command store trait abstraction for pluggable backends

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Command, CommandKind, DeviceFlags, HeartbeatMetadata, Lookup};

/// Errors returned by a command store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Network or connection level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Call did not complete within its deadline
    #[error("Store call timed out")]
    Timeout,
}

impl StoreError {
    /// Whether retrying on the next cycle can succeed without intervention
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Timeout | StoreError::Decode(_) => true,
            StoreError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Source of truth for commands and device flags
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// All commands for `(device_id, kind)` with `executed = false`
    async fn fetch_pending_commands(
        &self,
        device_id: &str,
        kind: CommandKind,
    ) -> Result<Vec<Command>, StoreError>;

    /// Mark a command executed; marking an executed command again succeeds
    async fn mark_executed(&self, command_id: i64) -> Result<(), StoreError>;

    /// Device-level desired state
    async fn fetch_device_flags(&self, device_id: &str) -> Result<Lookup<DeviceFlags>, StoreError>;

    /// Record that the device is alive
    async fn upsert_heartbeat(
        &self,
        device_id: &str,
        metadata: &HeartbeatMetadata,
    ) -> Result<(), StoreError>;
}
