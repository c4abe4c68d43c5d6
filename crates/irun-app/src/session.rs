//! Per-session deploy state, owned by whoever drives deploys

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// State that lives across deploy cycles within one session
#[derive(Debug, Clone, Default)]
pub struct DeploySession {
    begin_time: Option<DateTime<Utc>>,
    hide_restart_tip: bool,
    /// Devices where run-as is known to fail for secondary users
    broken_devices: BTreeSet<String>,
}

impl DeploySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a deploy cycle
    pub fn begin_cycle(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.begin_time = Some(now);
        now
    }

    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        self.begin_time
    }

    /// Milliseconds since the current cycle began
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.begin_time
            .map(|begin| (Utc::now() - begin).num_milliseconds())
    }

    pub fn hide_restart_tip(&self) -> bool {
        self.hide_restart_tip
    }

    /// Stop mentioning the restart-activity shortcut for this session
    pub fn set_hide_restart_tip(&mut self, hide: bool) {
        self.hide_restart_tip = hide;
    }

    pub fn mark_broken_for_secondary_user(&mut self, serial: impl Into<String>) {
        self.broken_devices.insert(serial.into());
    }

    pub fn is_broken_for_secondary_user(&self, serial: &str) -> bool {
        self.broken_devices.contains(serial)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
