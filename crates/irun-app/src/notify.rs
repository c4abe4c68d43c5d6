//! User-facing deploy notices

use std::fmt;

use serde::Serialize;

use irun_core::{BuildMode, BuildSelection, UpdateMode, NO_CONNECTION_MESSAGE};

/// Shortcut the IDE binds to "restart activity"
const RESTART_ACTIVITY_SHORTCUT: &str = "Ctrl+Shift+R";

/// Something worth telling the user about a deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployNotice {
    /// A full, cold or clean build was chosen
    BuildSelected { message: String },
    NoChanges,
    HotSwap,
    WarmSwap { show_restart_tip: bool },
    ColdSwap,
    /// The build vetoed an incremental deploy
    FullBuildRequired { verifier_status: String },
    NoConnection,
}

impl DeployNotice {
    /// Notice for a build selection; `None` for silent hot builds
    pub fn for_selection(selection: &BuildSelection) -> Option<Self> {
        if selection.mode == BuildMode::Hot {
            return None;
        }
        selection
            .user_message()
            .map(|message| DeployNotice::BuildSelected { message })
    }

    /// Notice for a pushed (or skipped) update
    pub fn for_update(mode: UpdateMode, hide_restart_tip: bool) -> Self {
        match mode {
            UpdateMode::NoChanges => DeployNotice::NoChanges,
            UpdateMode::HotSwap => DeployNotice::HotSwap,
            UpdateMode::WarmSwap => DeployNotice::WarmSwap {
                show_restart_tip: !hide_restart_tip,
            },
            UpdateMode::ColdSwap => DeployNotice::ColdSwap,
        }
    }

    pub fn message(&self) -> String {
        match self {
            DeployNotice::BuildSelected { message } => message.clone(),
            DeployNotice::NoChanges => "No changes".to_string(),
            DeployNotice::HotSwap => {
                "Applied code changes without activity restart".to_string()
            }
            DeployNotice::WarmSwap { show_restart_tip } => {
                let mut message = "Applied changes and restarted the current activity".to_string();
                if *show_restart_tip {
                    message.push_str(&format!(
                        ". Press {} to restart the activity manually",
                        RESTART_ACTIVITY_SHORTCUT
                    ));
                }
                message
            }
            DeployNotice::ColdSwap => "Applied changes and restarted the app".to_string(),
            DeployNotice::FullBuildRequired { verifier_status } => format!(
                "Changes cannot be applied incrementally ({}), a full build is required",
                verifier_status
            ),
            DeployNotice::NoConnection => NO_CONNECTION_MESSAGE.to_string(),
        }
    }

    /// Warm swaps and connection failures are worth interrupting for
    pub fn is_prominent(&self) -> bool {
        !matches!(self, DeployNotice::HotSwap | DeployNotice::NoChanges)
    }
}

impl fmt::Display for DeployNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
