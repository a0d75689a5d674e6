//! Linux actuator driving configurable shell command templates
//!
//! Each template may contain `{app}`, which is replaced by the single-quoted
//! application name before the template is run with `sh -c`.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::{Actuator, ActuatorError, LaunchMode};

/// Command templates for the host platform
#[derive(Debug, Clone)]
pub struct ShellActuatorConfig {
    /// Starts the application detached
    pub launch_cmd: String,
    /// Stops any running instance
    pub stop_cmd: String,
    /// Exits 0 when the application is in the foreground
    pub foreground_cmd: String,
    /// Exits 0 when the application is installed
    pub installed_cmd: String,
    /// Reboots the device
    pub reboot_cmd: String,
    /// Enables gesture interception (kiosk lock-down), if the host supports it
    pub interception_on_cmd: Option<String>,
    pub interception_off_cmd: Option<String>,
    /// Treat reboot as granted even when not running as root (e.g. sudoers rule)
    pub reboot_granted: bool,
}

impl Default for ShellActuatorConfig {
    fn default() -> Self {
        Self {
            launch_cmd: "setsid {app} >/dev/null 2>&1 &".into(),
            stop_cmd: "pkill -x {app}".into(),
            foreground_cmd: "pgrep -x {app}".into(),
            installed_cmd: "command -v {app}".into(),
            reboot_cmd: "systemctl reboot".into(),
            interception_on_cmd: None,
            interception_off_cmd: None,
            reboot_granted: false,
        }
    }
}

/// Actuator backed by `sh -c` invocations
pub struct ShellActuator {
    config: ShellActuatorConfig,
}

impl ShellActuator {
    pub fn new(config: ShellActuatorConfig) -> Self {
        Self { config }
    }

    async fn run(&self, script: &str) -> Result<bool, ActuatorError> {
        debug!("[ACTUATOR] sh -c {}", script);
        let status = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    async fn run_checked(&self, script: &str) -> Result<(), ActuatorError> {
        if self.run(script).await? {
            Ok(())
        } else {
            Err(ActuatorError::CommandFailed(script.to_string()))
        }
    }
}

#[async_trait]
impl Actuator for ShellActuator {
    async fn launch(&self, app: &str, mode: LaunchMode) -> Result<(), ActuatorError> {
        if !self.run(&render(&self.config.installed_cmd, app)).await? {
            return Err(ActuatorError::NotInstalled(app.to_string()));
        }

        if mode == LaunchMode::Restart {
            // Nothing running is fine; pkill exits 1 in that case
            let _ = self.run(&render(&self.config.stop_cmd, app)).await?;
        }

        self.run_checked(&render(&self.config.launch_cmd, app)).await?;
        info!("[ACTUATOR] Launched {} ({:?})", app, mode);
        Ok(())
    }

    async fn is_foreground(&self, app: &str) -> bool {
        match self.run(&render(&self.config.foreground_cmd, app)).await {
            Ok(running) => running,
            Err(e) => {
                warn!("[ACTUATOR] Foreground check for {} failed: {}", app, e);
                false
            }
        }
    }

    async fn reboot_capability(&self) -> bool {
        self.config.reboot_granted || effective_uid().await == Some(0)
    }

    async fn reboot_device(&self) -> Result<(), ActuatorError> {
        if !self.reboot_capability().await {
            return Err(ActuatorError::CapabilityMissing(
                "reboot requires root or an explicit grant".into(),
            ));
        }
        info!("[ACTUATOR] Rebooting device");
        self.run_checked(&self.config.reboot_cmd).await
    }

    async fn set_input_interception(&self, enabled: bool) -> Result<(), ActuatorError> {
        let template = if enabled {
            &self.config.interception_on_cmd
        } else {
            &self.config.interception_off_cmd
        };

        match template {
            Some(script) => self.run_checked(script).await,
            None => {
                debug!("[ACTUATOR] No interception command configured (enabled={})", enabled);
                Ok(())
            }
        }
    }
}

/// Substitute the quoted application name into a template
fn render(template: &str, app: &str) -> String {
    template.replace("{app}", &shell_quote(app))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

async fn effective_uid() -> Option<u32> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_effective_uid(&status)
}

/// `Uid:` line holds real, effective, saved and filesystem uids
fn parse_effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}
