//! Control protocol messages exchanged over the agent's loopback socket

use prost::Message;

/// Top-level frame on the control socket
#[derive(Clone, PartialEq, Message)]
pub struct ControlEnvelope {
    /// Echoed back in the response so clients can pair replies
    #[prost(uint64, tag = "1")]
    pub request_id: u64,

    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,

    #[prost(oneof = "control_envelope::Payload", tags = "3, 4, 5, 6")]
    pub payload: Option<control_envelope::Payload>,
}

pub mod control_envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        StatusRequest(super::StatusRequest),
        #[prost(message, tag = "4")]
        ManualRestart(super::ManualRestart),
        #[prost(message, tag = "5")]
        Status(super::StatusReport),
        #[prost(message, tag = "6")]
        Ack(super::ControlAck),
    }
}

/// Ask the agent for its status snapshot
#[derive(Clone, PartialEq, Message)]
pub struct StatusRequest {}

/// Ask the agent to run one restart cycle that ignores the cooldown
#[derive(Clone, PartialEq, Message)]
pub struct ManualRestart {}

/// Agent status snapshot as seen by the UI
#[derive(Clone, PartialEq, Message)]
pub struct StatusReport {
    #[prost(string, tag = "1")]
    pub device_id: String,

    #[prost(bool, tag = "2")]
    pub service_running: bool,

    /// Zero when no poll has completed yet
    #[prost(uint64, tag = "3")]
    pub last_poll_at_ms: u64,

    #[prost(uint64, tag = "4")]
    pub last_reboot_at_ms: u64,

    #[prost(uint64, tag = "5")]
    pub last_restart_at_ms: u64,

    #[prost(bool, tag = "6")]
    pub kiosk_active: bool,

    #[prost(bool, tag = "7")]
    pub reboot_capability_missing: bool,

    #[prost(string, tag = "8")]
    pub target_package: String,

    #[prost(string, tag = "9")]
    pub boot_outcome: String,
}

/// Reply to a request that carries no data
#[derive(Clone, PartialEq, Message)]
pub struct ControlAck {
    #[prost(bool, tag = "1")]
    pub accepted: bool,

    #[prost(string, tag = "2")]
    pub message: String,
}

impl ControlEnvelope {
    /// Wrap a payload with the current timestamp
    pub fn new(request_id: u64, payload: control_envelope::Payload) -> Self {
        Self {
            request_id,
            timestamp_ms: crate::now_ms(),
            payload: Some(payload),
        }
    }

    pub fn status_request(request_id: u64) -> Self {
        Self::new(request_id, control_envelope::Payload::StatusRequest(StatusRequest {}))
    }

    pub fn manual_restart(request_id: u64) -> Self {
        Self::new(request_id, control_envelope::Payload::ManualRestart(ManualRestart {}))
    }
}

impl ControlAck {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}
