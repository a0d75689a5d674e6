//! Actuator trait abstraction for pluggable platform backends

use async_trait::async_trait;
use thiserror::Error;

/// How an application should be brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Start it, or bring the running instance to the foreground
    Foreground,
    /// Stop any running instance first, then start it
    Restart,
}

/// Errors from platform calls
#[derive(Error, Debug)]
pub enum ActuatorError {
    /// The agent lacks a grant only the user or administrator can give
    #[error("Capability missing: {0}")]
    CapabilityMissing(String),

    #[error("Application not installed: {0}")]
    NotInstalled(String),

    #[error("Platform command failed: {0}")]
    CommandFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActuatorError {
    /// Retrying without user action cannot succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, ActuatorError::CapabilityMissing(_))
    }
}

/// OS-level effects the agent can apply
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Launch (or restart) the named application
    async fn launch(&self, app: &str, mode: LaunchMode) -> Result<(), ActuatorError>;

    /// Whether the named application is currently foregrounded
    async fn is_foreground(&self, app: &str) -> bool;

    /// Whether the agent holds the grant needed to reboot
    async fn reboot_capability(&self) -> bool;

    /// Reboot the device
    async fn reboot_device(&self) -> Result<(), ActuatorError>;

    /// Show or hide the surface that swallows navigation gestures
    async fn set_input_interception(&self, enabled: bool) -> Result<(), ActuatorError>;
}
