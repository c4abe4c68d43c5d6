//! Deploy events as NDJSON on stdout
//!
//! Every command reports what happened as newline-delimited JSON so that
//! IDE plugins and scripts can follow a deploy without scraping text.
//! Each line has an "event" field naming its type plus event-specific data.
//!
//! # Example Output
//!
//! ```json
//! {"event":"build_selected","mode":"HOT","cause":"incremental build","timestamp":1704700001000}
//! {"event":"build_finished","duration_ms":4210,"timestamp":1704700005210}
//! {"event":"deployed","mode":"HOT_SWAP","patch_count":1,"timestamp":1704700005400}
//! ```

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use irun_app::DeployNotice;
use irun_core::{BuildMode, BuildSelection, UpdateMode};
use irun_daemon::AdbDevice;

/// Events emitted by the `irun` commands
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    /// A device adb reports
    DeviceDetected {
        serial: String,
        state: String,
        model: Option<String>,
        timestamp: i64,
    },

    /// Build mode chosen for the next build
    BuildSelected {
        mode: BuildMode,
        cause: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        timestamp: i64,
    },

    /// External build command started
    BuildStarted { command: String, timestamp: i64 },

    /// External build command exited successfully
    BuildFinished { duration_ms: u64, timestamp: i64 },

    /// Patches were acknowledged by the agent
    Deployed {
        mode: UpdateMode,
        patch_count: usize,
        timestamp: i64,
    },

    /// The build produced nothing to push
    NoChanges { timestamp: i64 },

    /// The app has to be rebuilt and reinstalled in full
    FullBuildRequired { reason: String, timestamp: i64 },

    /// A full install was recorded in the patch cache
    InstallRecorded {
        device: String,
        application_id: String,
        timestamp: i64,
    },

    /// Agent answered a ping
    Ping {
        device: String,
        foreground: bool,
        timestamp: i64,
    },

    /// Text meant for the user
    Notice {
        message: String,
        prominent: bool,
        timestamp: i64,
    },

    /// A direct agent or device command finished
    CommandCompleted { command: String, timestamp: i64 },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl DeployEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = self.write_to(&mut stdout) {
            error!("Failed to write deploy event to stdout: {}", e);
        }
    }

    /// Write this event as one NDJSON line and flush
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn device_detected(device: &AdbDevice) -> Self {
        Self::DeviceDetected {
            serial: device.serial.clone(),
            state: device.state.clone(),
            model: device.model.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn build_selected(selection: &BuildSelection) -> Self {
        Self::BuildSelected {
            mode: selection.mode,
            cause: selection.cause.description().to_string(),
            note: selection.note.clone(),
            timestamp: Self::now(),
        }
    }

    pub fn build_started(command: &str) -> Self {
        Self::BuildStarted {
            command: command.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn build_finished(duration_ms: u64) -> Self {
        Self::BuildFinished {
            duration_ms,
            timestamp: Self::now(),
        }
    }

    pub fn deployed(mode: UpdateMode, patch_count: usize) -> Self {
        Self::Deployed {
            mode,
            patch_count,
            timestamp: Self::now(),
        }
    }

    pub fn no_changes() -> Self {
        Self::NoChanges {
            timestamp: Self::now(),
        }
    }

    pub fn full_build_required(reason: &str) -> Self {
        Self::FullBuildRequired {
            reason: reason.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn install_recorded(device: &str, application_id: &str) -> Self {
        Self::InstallRecorded {
            device: device.to_string(),
            application_id: application_id.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn ping(device: &str, foreground: bool) -> Self {
        Self::Ping {
            device: device.to_string(),
            foreground,
            timestamp: Self::now(),
        }
    }

    pub fn notice(notice: &DeployNotice) -> Self {
        Self::Notice {
            message: notice.message(),
            prominent: notice.is_prominent(),
            timestamp: Self::now(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
            prominent: false,
            timestamp: Self::now(),
        }
    }

    pub fn command_completed(command: &str) -> Self {
        Self::CommandCompleted {
            command: command.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }

    /// Event type as it appears in the "event" field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceDetected { .. } => "device_detected",
            Self::BuildSelected { .. } => "build_selected",
            Self::BuildStarted { .. } => "build_started",
            Self::BuildFinished { .. } => "build_finished",
            Self::Deployed { .. } => "deployed",
            Self::NoChanges { .. } => "no_changes",
            Self::FullBuildRequired { .. } => "full_build_required",
            Self::InstallRecorded { .. } => "install_recorded",
            Self::Ping { .. } => "ping",
            Self::Notice { .. } => "notice",
            Self::CommandCompleted { .. } => "command_completed",
            Self::Error { .. } => "error",
        }
    }
}
