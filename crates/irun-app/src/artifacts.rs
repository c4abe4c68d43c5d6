//! Build artifacts and patch gathering
//!
//! After an incremental build the build system leaves up to three files:
//!
//! - `restart-dex/<variant>/classes.dex`: all changed classes, applied by
//!   restarting the app
//! - `reload-dex/<variant>/classes.dex`: the same changes as a hot-swappable
//!   delta, single use
//! - `res/resources-<variant>.ap_`: the packaged resources
//!
//! [`gather_patches`] turns whatever is there into [`ApplicationPatch`]es and
//! the [`UpdateMode`] they require.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use irun_core::prelude::*;
use irun_core::{ApplicationPatch, UpdateMode, RELOAD_DEX_PATCH, RESOURCES_PATCH, RESTART_DEX_PATCH};

/// Where the build writes the artifacts Instant Run consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub restart_dex: PathBuf,
    pub reload_dex: PathBuf,
    pub resources: PathBuf,
}

impl ArtifactLayout {
    pub fn new(
        restart_dex: impl Into<PathBuf>,
        reload_dex: impl Into<PathBuf>,
        resources: impl Into<PathBuf>,
    ) -> Self {
        Self {
            restart_dex: restart_dex.into(),
            reload_dex: reload_dex.into(),
            resources: resources.into(),
        }
    }

    /// Standard layout under a build intermediates directory
    pub fn from_intermediates(intermediates: impl AsRef<Path>, variant: &str) -> Self {
        let dir = intermediates.as_ref();
        Self {
            restart_dex: dir.join("restart-dex").join(variant).join("classes.dex"),
            reload_dex: dir.join("reload-dex").join(variant).join("classes.dex"),
            resources: dir.join("res").join(format!("resources-{}.ap_", variant)),
        }
    }

    pub fn dex(&self, kind: DexKind) -> &Path {
        match kind {
            DexKind::Restart => &self.restart_dex,
            DexKind::Reload => &self.reload_dex,
        }
    }
}

/// The two dex artifacts of an incremental build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexKind {
    Restart,
    Reload,
}

impl DexKind {
    pub const ALL: [DexKind; 2] = [DexKind::Restart, DexKind::Reload];

    /// Name of the patch on the device
    pub fn patch_path(self) -> &'static str {
        match self {
            DexKind::Restart => RESTART_DEX_PATCH,
            DexKind::Reload => RELOAD_DEX_PATCH,
        }
    }
}

/// Delete dex files left over from a previous cycle.
///
/// Returns how many files were removed. Failures are logged, never fatal.
pub fn clear_stale_artifacts(layout: &ArtifactLayout) -> usize {
    DexKind::ALL
        .iter()
        .filter(|kind| remove_artifact(layout.dex(**kind)))
        .count()
}

/// Proof that the external build has finished writing its outputs.
///
/// Patch gathering takes one by reference, so it cannot run before whoever
/// drives the build has confirmed completion.
#[derive(Debug)]
#[must_use]
pub struct BuildFinished {
    _private: (),
}

impl BuildFinished {
    /// Call once the build process has exited and its outputs are on disk
    pub fn confirmed() -> Self {
        Self { _private: () }
    }
}

/// Patches collected after a build and the mode needed to apply them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatheredPatches {
    patches: Vec<ApplicationPatch>,
    mode: UpdateMode,
    resource_timestamp_ms: Option<u64>,
}

impl GatheredPatches {
    pub fn patches(&self) -> &[ApplicationPatch] {
        &self.patches
    }

    pub fn into_patches(self) -> Vec<ApplicationPatch> {
        self.patches
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Modification time of the resource archive, if it was gathered
    pub fn resource_timestamp_ms(&self) -> Option<u64> {
        self.resource_timestamp_ms
    }

    /// Apply restart requests. A hot swap never restarts the activity, so a
    /// forced restart (by the caller or by any patch) needs a warm swap.
    #[must_use]
    pub fn finalize(mut self, force_restart: bool) -> Self {
        let wants_restart = force_restart || self.patches.iter().any(|p| p.force_restart());
        if wants_restart && self.mode == UpdateMode::HotSwap {
            debug!("Restart requested, escalating hot swap to warm swap");
            self.mode = UpdateMode::WarmSwap;
        }
        self
    }
}

/// Collect patches from a finished build.
///
/// `resource_baseline_ms` is the resource timestamp recorded for the device
/// when the cycle started; `None` means the archive is always sent.
#[instrument(skip_all)]
pub fn gather_patches(
    layout: &ArtifactLayout,
    resource_baseline_ms: Option<u64>,
    _finished: &BuildFinished,
) -> GatheredPatches {
    let mut patches = Vec::new();
    let mut mode = UpdateMode::NoChanges;

    if let Some(restart) = read_artifact(&layout.restart_dex) {
        patches.push(ApplicationPatch::new(DexKind::Restart.patch_path(), restart));

        match read_artifact(&layout.reload_dex) {
            Some(reload) => {
                patches.push(ApplicationPatch::new(DexKind::Reload.patch_path(), reload));
                mode = mode.combine(UpdateMode::HotSwap);
                // Single use: the agent would reapply it next time
                remove_artifact(&layout.reload_dex);
            }
            None => mode = mode.combine(UpdateMode::ColdSwap),
        }
    }

    let mut resource_timestamp_ms = None;
    if let Some(modified) = modified_ms(&layout.resources) {
        let changed = resource_baseline_ms.map_or(true, |baseline| modified > baseline);
        if changed {
            if let Some(bytes) = read_artifact(&layout.resources) {
                patches.push(ApplicationPatch::new(RESOURCES_PATCH, bytes));
                mode = mode.combine(UpdateMode::WarmSwap);
                resource_timestamp_ms = Some(modified);
            }
        } else {
            trace!("Resources unchanged since {:?}", resource_baseline_ms);
        }
    }

    debug!("Gathered {} patch(es), mode {}", patches.len(), mode);
    GatheredPatches {
        patches,
        mode,
        resource_timestamp_ms,
    }
}

/// Modification time of a file in ms since the epoch
pub fn modified_ms(path: &Path) -> Option<u64> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot stat {:?}: {}", path, e);
            return None;
        }
    };
    let modified = metadata.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(since_epoch.as_millis()).ok()
}

/// Read an artifact; absence is silent, other failures are logged
fn read_artifact(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Couldn't read build artifact {:?}: {}", path, e);
            None
        }
    }
}

/// Returns whether a file was actually removed
fn remove_artifact(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {:?}", path);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Couldn't delete {:?}: {}", path, e);
            false
        }
    }
}
