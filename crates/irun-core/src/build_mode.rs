//! Build modes and the causes that select them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of build to request from the build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildMode {
    /// Clean, then full build and reinstall
    Clean,
    /// Full build and reinstall of the APK
    Full,
    /// Incremental build delivered by restarting the process
    Cold,
    /// Incremental build swapped into the running process
    Hot,
}

impl BuildMode {
    pub fn is_incremental(self) -> bool {
        matches!(self, BuildMode::Cold | BuildMode::Hot)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Clean => write!(f, "clean"),
            BuildMode::Full => write!(f, "full"),
            BuildMode::Cold => write!(f, "cold"),
            BuildMode::Hot => write!(f, "hot"),
        }
    }
}

/// Why a particular build mode was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildCause {
    NoDevice,
    AppNotInstalled,
    MismatchingTimestamps,
    UserRequestedCleanRerun,
    ApiTooLow,
    FirstInstallation,
    ManifestChanged,
    ManifestResourceChanged,
    FreezeSwapRequiresApi21,
    NoRunAs,
    AppNotRunning,
    MultiProcessApp,
    IncrementalBuild,
}

impl BuildCause {
    /// The build mode this cause leads to.
    pub fn mode(self) -> BuildMode {
        match self {
            BuildCause::UserRequestedCleanRerun => BuildMode::Clean,
            BuildCause::NoDevice
            | BuildCause::AppNotInstalled
            | BuildCause::MismatchingTimestamps
            | BuildCause::ApiTooLow
            | BuildCause::FirstInstallation
            | BuildCause::ManifestChanged
            | BuildCause::ManifestResourceChanged
            | BuildCause::FreezeSwapRequiresApi21
            | BuildCause::NoRunAs => BuildMode::Full,
            BuildCause::AppNotRunning | BuildCause::MultiProcessApp => BuildMode::Cold,
            BuildCause::IncrementalBuild => BuildMode::Hot,
        }
    }

    /// User-facing explanation shown with full, cold and clean builds.
    pub fn description(self) -> &'static str {
        match self {
            BuildCause::NoDevice => "no device is connected",
            BuildCause::AppNotInstalled => "the app is not installed on the device",
            BuildCause::MismatchingTimestamps => {
                "the app on the device does not match the last local build"
            }
            BuildCause::UserRequestedCleanRerun => "a clean rerun was requested",
            BuildCause::ApiTooLow => "the device API level is below 15",
            BuildCause::FirstInstallation => "this is the first installation on this device",
            BuildCause::ManifestChanged => "the manifest changed",
            BuildCause::ManifestResourceChanged => {
                "a resource referenced from the manifest changed"
            }
            BuildCause::FreezeSwapRequiresApi21 => {
                "the app is not running and restarting it with changes requires API 21"
            }
            BuildCause::NoRunAs => "the device does not support run-as for this app",
            BuildCause::AppNotRunning => "the app is not running",
            BuildCause::MultiProcessApp => "the app uses multiple processes",
            BuildCause::IncrementalBuild => "incremental build",
        }
    }
}

impl fmt::Display for BuildCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of the build-mode decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSelection {
    pub cause: BuildCause,
    pub mode: BuildMode,
    /// Run-as is known to be broken for secondary users on this device
    pub broken_for_secondary_user: bool,
    /// Optional diagnostic detail (for example which timestamp was missing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl BuildSelection {
    pub fn new(cause: BuildCause, broken_for_secondary_user: bool) -> Self {
        Self {
            cause,
            mode: cause.mode(),
            broken_for_secondary_user,
            note: None,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Text to surface to the user, `None` for silent hot builds.
    pub fn user_message(&self) -> Option<String> {
        let verb = match self.mode {
            BuildMode::Hot => return None,
            BuildMode::Clean => "Performing a clean build",
            BuildMode::Full => "Performing a full build and install",
            BuildMode::Cold => "Performing an incremental build with app restart",
        };

        let mut message = format!("{}: {}", verb, self.cause.description());
        if self.broken_for_secondary_user {
            message.push_str(" (run-as is broken for secondary users on this device)");
        }
        Some(message)
    }
}
