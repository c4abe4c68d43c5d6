//! Configuration types for Instant Run
//!
//! Defines `Settings` and its sections, mirroring `.irun/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use irun_core::prelude::*;
use irun_daemon::{AgentTimeouts, DEFAULT_AGENT_PORT};

use crate::artifacts::ArtifactLayout;

/// Settings loaded from `.irun/config.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub behavior: BehaviorSettings,
}

impl Settings {
    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.agent.port == 0 {
            return Err(Error::ConfigInvalid {
                message: "agent.port must not be 0".to_string(),
            });
        }
        let agent = &self.agent;
        if agent.connect_timeout_ms == 0 || agent.write_timeout_ms == 0 || agent.ack_timeout_ms == 0
        {
            return Err(Error::ConfigInvalid {
                message: "agent timeouts must be greater than 0".to_string(),
            });
        }
        if self.build.variant.trim().is_empty() {
            return Err(Error::ConfigInvalid {
                message: "build.variant must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// How to reach the agent running inside the app
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Local port forwarded to the agent's socket
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// How long to wait for the agent to acknowledge a push
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Ping before pushing so an incompatible agent is detected early
    #[serde(default = "default_true")]
    pub verify_protocol: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            verify_protocol: true,
        }
    }
}

impl AgentSettings {
    pub fn timeouts(&self) -> AgentTimeouts {
        AgentTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
            ack: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

/// Where the build leaves its outputs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildSettings {
    /// Build intermediates directory, relative to the project
    #[serde(default = "default_intermediates_dir")]
    pub intermediates_dir: PathBuf,

    /// Build variant name (e.g. "debug", "freeDebug")
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Build-info descriptor; defaults to `build-info/<variant>/build-info.json`
    /// under the intermediates directory
    #[serde(default)]
    pub build_info: Option<PathBuf>,

    /// Source manifest whose content hash is compared with the installed one
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Resources referenced from the manifest (icons, labels, themes)
    #[serde(default)]
    pub manifest_resources: Vec<PathBuf>,

    /// Shell command that produces the incremental artifacts
    #[serde(default)]
    pub command: Option<String>,

    /// Application id of the app being deployed
    #[serde(default)]
    pub application_id: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            intermediates_dir: default_intermediates_dir(),
            variant: default_variant(),
            build_info: None,
            manifest: default_manifest(),
            manifest_resources: Vec::new(),
            command: None,
            application_id: None,
        }
    }
}

impl BuildSettings {
    /// Artifact locations for this project
    pub fn layout(&self, project_path: &Path) -> ArtifactLayout {
        ArtifactLayout::from_intermediates(
            project_path.join(&self.intermediates_dir),
            &self.variant,
        )
    }

    pub fn build_info_path(&self, project_path: &Path) -> PathBuf {
        match &self.build_info {
            Some(path) => project_path.join(path),
            None => project_path
                .join(&self.intermediates_dir)
                .join("build-info")
                .join(&self.variant)
                .join("build-info.json"),
        }
    }
}

/// Device-side settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSettings {
    /// Explicit adb executable; found on PATH or in the SDK otherwise
    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    /// The installed build id lives in a device temp file, so it survives
    /// an uninstall and a missing package must count as a stale build
    #[serde(default = "default_true")]
    pub build_id_in_temp_file: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_path: None,
            build_id_in_temp_file: true,
        }
    }
}

/// Behavior settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorSettings {
    /// Mention the restart-activity shortcut after warm swaps
    #[serde(default = "default_true")]
    pub show_restart_tip: bool,

    /// Show a toast inside the app after a hot swap
    #[serde(default)]
    pub notify_hot_swap: bool,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            show_restart_tip: true,
            notify_hot_swap: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_intermediates_dir() -> PathBuf {
    PathBuf::from("app/build/intermediates")
}

fn default_variant() -> String {
    "debug".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("app/src/main/AndroidManifest.xml")
}
