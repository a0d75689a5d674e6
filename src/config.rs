//! Agent configuration
//!
//! Defaults are overridden from the environment. Only the backend URL and
//! key are usually set; the rest exist for hosts that need other commands
//! or paths.

use anyhow::{bail, Context, Result};
use kiosk_shared::StoreConfig;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::actuator::ShellActuatorConfig;

const MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Explicit device id; resolved from the host when unset
    pub device_id: Option<String>,
    pub store: StoreConfig,
    /// Loopback address of the control socket
    pub control_addr: String,
    pub settings_path: PathBuf,
    /// Overrides the target package from local settings
    pub target_package: Option<String>,
    pub actuator: ShellActuatorConfig,
    /// Skip the boot launch sequence (e.g. when restarted by systemd)
    pub skip_boot: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            store: StoreConfig::default(),
            control_addr: "127.0.0.1:7878".into(),
            settings_path: PathBuf::from("/var/lib/kiosk-agent/settings.json"),
            target_package: None,
            actuator: ShellActuatorConfig::default(),
            skip_boot: false,
        }
    }
}

impl AgentConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            "Configuration loaded: backend={} control={}",
            config.store.base_url, config.control_addr
        );
        Ok(config)
    }

    /// Load using `lookup` for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("SUPABASE_URL") {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("SUPABASE_URL must be an http(s) URL, got {}", url);
            }
            config.store.base_url = url;
        }
        if let Some(key) = get("SUPABASE_KEY") {
            config.store.api_key = key;
        }

        config.device_id = get("KIOSK_AGENT_DEVICE_ID");
        config.target_package = get("KIOSK_AGENT_TARGET");
        if let Some(addr) = get("KIOSK_AGENT_CONTROL_ADDR") {
            config.control_addr = addr;
        }
        if let Some(path) = get("KIOSK_AGENT_SETTINGS") {
            config.settings_path = PathBuf::from(path);
        }

        let actuator = &mut config.actuator;
        if let Some(cmd) = get("KIOSK_AGENT_LAUNCH_CMD") {
            actuator.launch_cmd = cmd;
        }
        if let Some(cmd) = get("KIOSK_AGENT_STOP_CMD") {
            actuator.stop_cmd = cmd;
        }
        if let Some(cmd) = get("KIOSK_AGENT_FOREGROUND_CMD") {
            actuator.foreground_cmd = cmd;
        }
        if let Some(cmd) = get("KIOSK_AGENT_REBOOT_CMD") {
            actuator.reboot_cmd = cmd;
        }
        actuator.interception_on_cmd = get("KIOSK_AGENT_INTERCEPT_ON_CMD");
        actuator.interception_off_cmd = get("KIOSK_AGENT_INTERCEPT_OFF_CMD");
        actuator.reboot_granted = parse_flag(get("KIOSK_AGENT_REBOOT_GRANTED").as_deref())
            .context("KIOSK_AGENT_REBOOT_GRANTED")?;

        config.skip_boot =
            parse_flag(get("KIOSK_AGENT_SKIP_BOOT").as_deref()).context("KIOSK_AGENT_SKIP_BOOT")?;

        Ok(config)
    }

    /// Device id: explicit setting, else the machine id, else the hostname
    pub fn resolve_device_id(&self) -> Result<String> {
        resolve_device_id(self.device_id.as_deref(), Path::new(MACHINE_ID_PATH))
    }
}

fn parse_flag(value: Option<&str>) -> Result<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("expected a boolean, got {:?}", other),
        },
    }
}

fn resolve_device_id(explicit: Option<&str>, machine_id_path: &Path) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }

    if let Ok(contents) = std::fs::read_to_string(machine_id_path) {
        let id = contents.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    hostname::get()
        .context("reading hostname")?
        .into_string()
        .map_err(|_| anyhow::anyhow!("hostname is not valid UTF-8"))
}

/// Hostname for heartbeat metadata
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
