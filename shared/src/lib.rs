//! Kiosk Fleet Shared Types
//!
//! This crate provides the data model, command store client, kiosk state
//! machine and local control protocol shared by the device agent and the
//! operator tooling.

pub mod codec;
pub mod kiosk_state;
pub mod model;
pub mod proto;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use model::{Command, CommandKind, DeviceFlags, HeartbeatMetadata, Lookup};
pub use proto::*;
pub use store::{CommandStore, PostgrestStore, StoreConfig, StoreError};
pub use reqwest::Url;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing policy shared by the agent loops
pub mod policy {
    /// Steady-state command poll interval
    pub const COMMAND_POLL_INTERVAL_MS: u64 = 30_000;

    /// Poll interval used for the cycle following an error
    pub const COMMAND_ERROR_BACKOFF_MS: u64 = 60_000;

    /// Minimum spacing between two applied actions of the same kind
    pub const ACTION_COOLDOWN_MS: u64 = 5 * 60_000;

    /// Attempts to get an acknowledgment to stick
    pub const ACK_ATTEMPTS: u32 = 3;

    /// Delay between acknowledgment attempts
    pub const ACK_RETRY_DELAY_MS: u64 = 1_000;

    /// Time after an applied action before the in-flight guard is released
    pub const ACTION_SETTLE_MS: u64 = 2_000;

    /// Upper bound on any single backend or platform call
    pub const IO_TIMEOUT_MS: u64 = 15_000;

    /// Kiosk flag poll interval (transition checks always run at this cadence)
    pub const KIOSK_FLAG_POLL_MS: u64 = 10_000;

    /// Foreground assertion interval while kiosk mode is active
    pub const KIOSK_ASSERT_INTERVAL_MS: u64 = 750;

    /// Delay before each relaunch attempt within one assertion pass
    pub const KIOSK_LAUNCH_BACKOFF_MS: [u64; 3] = [0, 300, 500];

    /// Wait after system start before the first boot launch attempt
    pub const BOOT_SETTLE_MS: u64 = 15_000;

    /// Spacing between boot launch attempts
    pub const BOOT_ATTEMPT_SPACING_MS: u64 = 10_000;

    /// Maximum boot launch attempts
    pub const BOOT_MAX_ATTEMPTS: u32 = 60;

    /// Absolute ceiling on the boot sequence
    pub const BOOT_CEILING_MS: u64 = 10 * 60_000;

    /// Heartbeat upsert interval
    pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;
}
