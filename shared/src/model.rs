//! Command and device records as stored by the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of one-shot remote instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Reboot the whole device
    Reboot,
    /// Close and reopen the configured application
    RestartApp,
}

impl CommandKind {
    /// Every kind the agent manages, one poller each
    pub const ALL: [CommandKind; 2] = [CommandKind::Reboot, CommandKind::RestartApp];

    /// Name used in the `command` column
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Reboot => "reboot",
            CommandKind::RestartApp => "restart_app",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reboot" => Ok(CommandKind::Reboot),
            "restart_app" => Ok(CommandKind::RestartApp),
            other => Err(format!("unknown command kind: {}", other)),
        }
    }
}

/// One unit of remote instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub device_id: String,
    #[serde(rename = "command")]
    pub kind: CommandKind,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Build a pending command (used by tests and tooling)
    pub fn pending(id: i64, device_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            kind,
            executed: false,
            created_at: Some(Utc::now()),
            executed_at: None,
        }
    }
}

/// Level-triggered per-device desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFlags {
    pub device_id: String,
    #[serde(default)]
    pub kiosk_mode: bool,
    #[serde(default)]
    pub target_package: Option<String>,
}

impl DeviceFlags {
    /// Flags assumed for a device the backend has no record of
    pub fn defaults_for(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kiosk_mode: false,
            target_package: None,
        }
    }
}

/// Outcome of a single-record lookup
///
/// Paired with `Result<_, StoreError>` this distinguishes a missing record
/// from a failed read without inspecting error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    NotFound,
    Found(T),
}

impl<T> Lookup<T> {
    /// Return the record or the supplied default
    pub fn unwrap_or_else(self, f: impl FnOnce() -> T) -> T {
        match self {
            Lookup::Found(value) => value,
            Lookup::NotFound => f(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Metadata sent with each heartbeat upsert
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeartbeatMetadata {
    pub agent_version: String,
    pub hostname: String,
    pub target_package: Option<String>,
    pub kiosk_active: bool,
    pub uptime_secs: u64,
    pub reboot_capable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_cli_spellings() {
        assert_eq!("reboot".parse::<CommandKind>(), Ok(CommandKind::Reboot));
        assert_eq!("restart-app".parse::<CommandKind>(), Ok(CommandKind::RestartApp));
        assert_eq!("RESTART_APP".parse::<CommandKind>(), Ok(CommandKind::RestartApp));
        assert!("shutdown".parse::<CommandKind>().is_err());
    }

    #[test]
    fn test_command_decodes_from_row() {
        let row = r#"{
            "id": 42,
            "device_id": "dev-1",
            "command": "restart_app",
            "executed": false,
            "created_at": "2024-05-13T10:00:00+00:00",
            "executed_at": null
        }"#;
        let cmd: Command = serde_json::from_str(row).expect("row should decode");
        assert_eq!(cmd.id, 42);
        assert_eq!(cmd.kind, CommandKind::RestartApp);
        assert!(!cmd.executed);
        assert!(cmd.created_at.is_some());
        assert!(cmd.executed_at.is_none());
    }

    #[test]
    fn test_device_flags_missing_columns_default_off() {
        let flags: DeviceFlags = serde_json::from_str(r#"{"device_id":"dev-1"}"#).unwrap();
        assert!(!flags.kiosk_mode);
        assert_eq!(flags, DeviceFlags::defaults_for("dev-1"));
    }

    #[test]
    fn test_lookup_default() {
        let flags = Lookup::NotFound.unwrap_or_else(|| DeviceFlags::defaults_for("x"));
        assert!(!flags.kiosk_mode);
        assert!(Lookup::Found(1).is_found());
    }
}
