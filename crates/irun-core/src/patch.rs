//! File-level patches pushed to the device agent

use std::fmt;

/// Patch name for the full restart dex
pub const RESTART_DEX_PATCH: &str = "classes.dex";

/// Patch name for the incremental reload dex
pub const RELOAD_DEX_PATCH: &str = "classes.dex.3";

/// Patch name for the packaged resource archive
pub const RESOURCES_PATCH: &str = "resources.ap_";

/// One file-level change to push to the device.
///
/// Immutable once built; a fresh set is created for every deploy cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct ApplicationPatch {
    path: String,
    data: Vec<u8>,
    force_restart: bool,
}

impl ApplicationPatch {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
            force_restart: false,
        }
    }

    /// Patch that requires at least an activity restart when applied
    pub fn with_force_restart(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
            force_restart: true,
        }
    }

    /// Destination-relative path or logical name (e.g. `classes.dex`)
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn force_restart(&self) -> bool {
        self.force_restart
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_resources(&self) -> bool {
        self.path == RESOURCES_PATCH
    }
}

// Payloads can be megabytes of dex; keep Debug output short.
impl fmt::Debug for ApplicationPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationPatch")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("force_restart", &self.force_restart)
            .finish()
    }
}
