//! In-memory collaborators for loop tests

use async_trait::async_trait;
use kiosk_shared::{
    Command, CommandKind, CommandStore, DeviceFlags, HeartbeatMetadata, Lookup, StoreError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::actuator::{Actuator, ActuatorError, LaunchMode};

/// Scripted response for one device-flag read
#[derive(Debug, Clone, Copy)]
pub enum FlagRead {
    Kiosk(bool),
    Missing,
    Fail,
}

/// Command store backed by a vector of rows
#[derive(Default)]
pub struct FakeStore {
    commands: Mutex<Vec<Command>>,
    flag_reads: Mutex<VecDeque<FlagRead>>,
    last_flag_read: Mutex<Option<FlagRead>>,
    remote_targets: Mutex<VecDeque<Option<String>>>,
    /// Every mark_executed call, in order
    pub marks: Mutex<Vec<i64>>,
    pub fetches: AtomicU32,
    pub heartbeats: AtomicU32,
    /// mark_executed reports failure and leaves the row untouched
    pub fail_marks: AtomicBool,
    /// Number of upcoming fetches that fail with a transport error
    pub failing_fetches: AtomicU32,
    /// mark_executed never completes
    pub hang_marks: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pending(&self, id: i64, kind: CommandKind) {
        self.commands
            .lock()
            .unwrap()
            .push(Command::pending(id, "dev-1", kind));
    }

    pub fn pending_ids(&self, kind: CommandKind) -> Vec<i64> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.kind == kind && !c.executed)
            .map(|c| c.id)
            .collect()
    }

    /// Queue flag reads; the last one repeats once the queue drains
    pub fn script_flags(&self, reads: impl IntoIterator<Item = FlagRead>) {
        self.flag_reads.lock().unwrap().extend(reads);
    }

    /// Queue `target_package` values returned with successive flag reads
    pub fn script_remote_targets<'a>(&self, targets: impl IntoIterator<Item = Option<&'a str>>) {
        self.remote_targets
            .lock()
            .unwrap()
            .extend(targets.into_iter().map(|t| t.map(str::to_string)));
    }

    pub fn mark_count(&self) -> usize {
        self.marks.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandStore for FakeStore {
    async fn fetch_pending_commands(
        &self,
        device_id: &str,
        kind: CommandKind,
    ) -> Result<Vec<Command>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_fetches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_fetches.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Transport("connection refused".into()));
        }

        Ok(self
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.device_id == device_id && c.kind == kind && !c.executed)
            .cloned()
            .collect())
    }

    async fn mark_executed(&self, command_id: i64) -> Result<(), StoreError> {
        self.marks.lock().unwrap().push(command_id);
        if self.hang_marks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        if let Some(cmd) = self
            .commands
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.id == command_id)
        {
            cmd.executed = true;
        }
        Ok(())
    }

    async fn fetch_device_flags(&self, device_id: &str) -> Result<Lookup<DeviceFlags>, StoreError> {
        let next = self.flag_reads.lock().unwrap().pop_front();
        let read = {
            let mut last = self.last_flag_read.lock().unwrap();
            if next.is_some() {
                *last = next;
            }
            last.unwrap_or(FlagRead::Missing)
        };

        match read {
            FlagRead::Kiosk(kiosk_mode) => Ok(Lookup::Found(DeviceFlags {
                device_id: device_id.to_string(),
                kiosk_mode,
                target_package: self.remote_targets.lock().unwrap().pop_front().flatten(),
            })),
            FlagRead::Missing => Ok(Lookup::NotFound),
            FlagRead::Fail => Err(StoreError::Timeout),
        }
    }

    async fn upsert_heartbeat(
        &self,
        _device_id: &str,
        _metadata: &HeartbeatMetadata,
    ) -> Result<(), StoreError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Actuator that records calls instead of touching the device
pub struct FakeActuator {
    /// (app, mode, virtual time of the call)
    pub launches: Mutex<Vec<(String, LaunchMode, Instant)>>,
    pub foreground_checks: AtomicU32,
    pub reboots: AtomicU32,
    pub interception: Mutex<Vec<bool>>,
    foreground: Mutex<VecDeque<bool>>,
    foreground_default: AtomicBool,
    reboot_capable: AtomicBool,
    pub fail_launches: AtomicBool,
}

impl Default for FakeActuator {
    fn default() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            foreground_checks: AtomicU32::new(0),
            reboots: AtomicU32::new(0),
            interception: Mutex::new(Vec::new()),
            foreground: Mutex::new(VecDeque::new()),
            foreground_default: AtomicBool::new(true),
            reboot_capable: AtomicBool::new(true),
            fail_launches: AtomicBool::new(false),
        }
    }
}

impl FakeActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue foreground answers; `default` is used once the queue drains
    pub fn script_foreground(&self, answers: impl IntoIterator<Item = bool>, default: bool) {
        self.foreground.lock().unwrap().extend(answers);
        self.foreground_default.store(default, Ordering::SeqCst);
    }

    pub fn set_reboot_capable(&self, capable: bool) {
        self.reboot_capable.store(capable, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn launch_times(&self) -> Vec<Instant> {
        self.launches.lock().unwrap().iter().map(|l| l.2).collect()
    }

    pub fn interception_calls(&self) -> Vec<bool> {
        self.interception.lock().unwrap().clone()
    }
}

#[async_trait]
impl Actuator for FakeActuator {
    async fn launch(&self, app: &str, mode: LaunchMode) -> Result<(), ActuatorError> {
        self.launches
            .lock()
            .unwrap()
            .push((app.to_string(), mode, Instant::now()));
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(ActuatorError::CommandFailed("launch".into()));
        }
        Ok(())
    }

    async fn is_foreground(&self, _app: &str) -> bool {
        self.foreground_checks.fetch_add(1, Ordering::SeqCst);
        self.foreground
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.foreground_default.load(Ordering::SeqCst))
    }

    async fn reboot_capability(&self) -> bool {
        self.reboot_capable.load(Ordering::SeqCst)
    }

    async fn reboot_device(&self) -> Result<(), ActuatorError> {
        if !self.reboot_capable.load(Ordering::SeqCst) {
            return Err(ActuatorError::CapabilityMissing("test".into()));
        }
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_input_interception(&self, enabled: bool) -> Result<(), ActuatorError> {
        self.interception.lock().unwrap().push(enabled);
        Ok(())
    }
}
