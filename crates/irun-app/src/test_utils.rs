//! Fakes for deploy tests
//!
//! [`FakeBridge`] stands in for adb with a single scripted device.
//! [`FakeDelegate`] answers the two client-delegate questions directly.

use std::sync::{Arc, Mutex};

use irun_core::prelude::*;
use irun_core::AgentKey;
use irun_daemon::{AdbDevice, LocalDeviceBridge};

use crate::decision::DeviceTimestamp;
use crate::delegate::LocalClientDelegate;

#[derive(Debug)]
struct BridgeState {
    devices: Vec<AdbDevice>,
    api_level: u32,
    run_as_works: bool,
    package_installed: bool,
    build_id: Option<String>,
    build_ids_written: Vec<(AgentKey, String)>,
    forwards_created: usize,
    forwards_removed: usize,
    open_forwards: usize,
    max_open_forwards: usize,
    wiped: Vec<AgentKey>,
}

/// Scripted [`LocalDeviceBridge`]; clones share state
#[derive(Debug, Clone)]
pub struct FakeBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl Default for FakeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBridge {
    /// One online emulator on API 30 with the app installed and no build id
    /// recorded yet
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BridgeState {
                devices: vec![AdbDevice {
                    serial: "emulator-5554".to_string(),
                    state: "device".to_string(),
                    model: Some("Pixel 7".to_string()),
                }],
                api_level: 30,
                run_as_works: true,
                package_installed: true,
                build_id: None,
                build_ids_written: Vec::new(),
                forwards_created: 0,
                forwards_removed: 0,
                open_forwards: 0,
                max_open_forwards: 0,
                wiped: Vec::new(),
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add another online emulator
    pub fn with_device(self, serial: &str) -> Self {
        self.state().devices.push(AdbDevice {
            serial: serial.to_string(),
            state: "device".to_string(),
            model: None,
        });
        self
    }

    pub fn without_devices(self) -> Self {
        self.state().devices.clear();
        self
    }

    pub fn with_api_level(self, api_level: u32) -> Self {
        self.state().api_level = api_level;
        self
    }

    pub fn with_run_as(self, works: bool) -> Self {
        self.state().run_as_works = works;
        self
    }

    pub fn with_package_installed(self, installed: bool) -> Self {
        self.state().package_installed = installed;
        self
    }

    pub fn with_build_id(self, build_id: Option<&str>) -> Self {
        self.state().build_id = build_id.map(str::to_string);
        self
    }

    pub fn forwards_created(&self) -> usize {
        self.state().forwards_created
    }

    pub fn forwards_removed(&self) -> usize {
        self.state().forwards_removed
    }

    /// Most forwards that were open at the same time
    pub fn max_open_forwards(&self) -> usize {
        self.state().max_open_forwards
    }

    pub fn build_id(&self) -> Option<String> {
        self.state().build_id.clone()
    }

    pub fn build_ids_written(&self) -> Vec<(AgentKey, String)> {
        self.state().build_ids_written.clone()
    }

    pub fn wiped(&self) -> Vec<AgentKey> {
        self.state().wiped.clone()
    }
}

impl LocalDeviceBridge for FakeBridge {
    async fn list_devices(&self) -> Result<Vec<AdbDevice>> {
        Ok(self.state().devices.clone())
    }

    async fn api_level(&self, _serial: &str) -> Result<u32> {
        Ok(self.state().api_level)
    }

    async fn run_as_works(&self, _serial: &str, _application_id: &str) -> Result<bool> {
        Ok(self.state().run_as_works)
    }

    async fn package_installed(&self, _serial: &str, _application_id: &str) -> Result<bool> {
        Ok(self.state().package_installed)
    }

    async fn read_build_id(&self, _serial: &str, _application_id: &str) -> Result<Option<String>> {
        Ok(self.state().build_id.clone())
    }

    async fn write_build_id(
        &self,
        serial: &str,
        application_id: &str,
        build_id: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.build_id = Some(build_id.to_string());
        state
            .build_ids_written
            .push((AgentKey::new(serial, application_id), build_id.to_string()));
        Ok(())
    }

    async fn create_forward(
        &self,
        _serial: &str,
        _local_port: u16,
        _application_id: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.forwards_created += 1;
        state.open_forwards += 1;
        state.max_open_forwards = state.max_open_forwards.max(state.open_forwards);
        Ok(())
    }

    async fn remove_forward(&self, _serial: &str, _local_port: u16) -> Result<()> {
        let mut state = self.state();
        state.forwards_removed += 1;
        state.open_forwards = state.open_forwards.saturating_sub(1);
        Ok(())
    }

    async fn wipe_data(&self, serial: &str, application_id: &str) -> Result<()> {
        self.state()
            .wiped
            .push(AgentKey::new(serial, application_id));
        Ok(())
    }
}

/// [`LocalClientDelegate`] with fixed answers
#[derive(Debug, Clone)]
pub struct FakeDelegate {
    /// `None` simulates an app that does not answer
    pub foreground: Option<bool>,
    pub timestamp: DeviceTimestamp,
}

impl Default for FakeDelegate {
    fn default() -> Self {
        Self {
            foreground: Some(true),
            timestamp: DeviceTimestamp::Recorded("100".to_string()),
        }
    }
}

impl FakeDelegate {
    pub fn not_running() -> Self {
        Self {
            foreground: None,
            ..Default::default()
        }
    }
}

impl LocalClientDelegate for FakeDelegate {
    async fn is_app_in_foreground(&self, _key: &AgentKey) -> Result<bool> {
        self.foreground
            .ok_or_else(|| Error::agent_unreachable("connection refused"))
    }

    async fn device_build_timestamp(&self, _key: &AgentKey) -> Result<DeviceTimestamp> {
        Ok(self.timestamp.clone())
    }
}
