//! Device and agent identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one app's agent on one device.
///
/// Cache records and push serialization are both keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentKey {
    pub device_serial: String,
    pub application_id: String,
}

impl AgentKey {
    pub fn new(device_serial: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            device_serial: device_serial.into(),
            application_id: application_id.into(),
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.application_id, self.device_serial)
    }
}

/// On-device folder where the agent stores received patches.
pub fn device_data_folder(application_id: &str) -> String {
    format!("/data/data/{}/files/studio-fd", application_id)
}

/// On-device file holding the build id of the installed app.
pub fn device_build_id_file(application_id: &str) -> String {
    format!("/data/local/tmp/{}-build-id.txt", application_id)
}
