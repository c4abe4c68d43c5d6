//! Run context: the read-only project snapshot a deploy cycle works from

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use irun_core::prelude::*;

use crate::config::Settings;
use crate::decision::LocalTimestamp;

/// Artifact types a build can report in its build-info descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Main,
    Split,
    Resources,
    ReloadDex,
    RestartDex,
    Dex,
}

/// Descriptor the build writes next to its outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Why the build could not honour a hot or cold swap, empty if it could
    #[serde(default)]
    pub verifier_status: Option<String>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactKind>,

    #[serde(default)]
    pub can_hot_swap: bool,

    #[serde(default)]
    pub build_id: Option<String>,

    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BuildInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::artifact(path, format!("cannot read build info: {}", e)))?;
        serde_json::from_str(&content).map_err(|e| Error::build_info(format!("{:?}: {}", path, e)))
    }

    /// Non-empty verifier status, if any
    pub fn verifier_failure(&self) -> Option<&str> {
        self.verifier_status
            .as_deref()
            .map(str::trim)
            .filter(|status| !status.is_empty())
    }

    /// Build id, falling back to the timestamp
    pub fn build_timestamp(&self) -> Option<&str> {
        self.build_id
            .as_deref()
            .or(self.timestamp.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Read-only snapshot of the project state used by the decision engine.
pub trait InstantRunContext {
    fn application_id(&self) -> &str;

    fn manifest_hash(&self) -> Option<&str>;

    fn manifest_resources_hash(&self) -> Option<&str>;

    fn uses_multiple_processes(&self) -> bool;

    /// Most recent build-info descriptor
    fn build_info(&self) -> Option<&BuildInfo>;

    /// Build timestamp of the last local build
    fn local_timestamp(&self) -> LocalTimestamp {
        match self.build_info().and_then(BuildInfo::build_timestamp) {
            Some(ts) => LocalTimestamp::Recorded(ts.to_string()),
            None => LocalTimestamp::NeverBuilt,
        }
    }
}

/// [`InstantRunContext`] assembled from files in a project directory
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub application_id: String,
    pub manifest_hash: Option<String>,
    pub manifest_resources_hash: Option<String>,
    pub uses_multiple_processes: bool,
    pub build_info: Option<BuildInfo>,
    pub local_timestamp: Option<LocalTimestamp>,
}

impl ProjectContext {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            ..Default::default()
        }
    }

    /// Snapshot the project on disk.
    ///
    /// A missing build-info file means nothing was built yet; an unreadable
    /// one is kept apart so the decision can say which it was.
    pub fn load(project_path: &Path, settings: &Settings, application_id: &str) -> Self {
        let manifest_path = project_path.join(&settings.build.manifest);
        let manifest_hash = hash_files(std::slice::from_ref(&manifest_path));
        let manifest_resources_hash = if settings.build.manifest_resources.is_empty() {
            // Nothing to compare, so it tracks the manifest itself
            manifest_hash.clone()
        } else {
            let paths: Vec<PathBuf> = settings
                .build
                .manifest_resources
                .iter()
                .map(|p| project_path.join(p))
                .collect();
            hash_files(&paths)
        };

        let uses_multiple_processes = std::fs::read_to_string(&manifest_path)
            .map(|content| manifest_declares_processes(&content))
            .unwrap_or(false);

        let info_path = settings.build.build_info_path(project_path);
        let (build_info, local_timestamp) = if info_path.exists() {
            match BuildInfo::load(&info_path) {
                Ok(info) => (Some(info), None),
                Err(e) => {
                    warn!("Ignoring build info: {}", e);
                    (
                        None,
                        Some(LocalTimestamp::Unreadable {
                            reason: e.to_string(),
                        }),
                    )
                }
            }
        } else {
            debug!("No build info at {:?}", info_path);
            (None, None)
        };

        Self {
            application_id: application_id.to_string(),
            manifest_hash,
            manifest_resources_hash,
            uses_multiple_processes,
            build_info,
            local_timestamp,
        }
    }

    #[must_use]
    pub fn with_build_info(mut self, info: BuildInfo) -> Self {
        self.build_info = Some(info);
        self.local_timestamp = None;
        self
    }
}

impl InstantRunContext for ProjectContext {
    fn application_id(&self) -> &str {
        &self.application_id
    }

    fn manifest_hash(&self) -> Option<&str> {
        self.manifest_hash.as_deref()
    }

    fn manifest_resources_hash(&self) -> Option<&str> {
        self.manifest_resources_hash.as_deref()
    }

    fn uses_multiple_processes(&self) -> bool {
        self.uses_multiple_processes
    }

    fn build_info(&self) -> Option<&BuildInfo> {
        self.build_info.as_ref()
    }

    fn local_timestamp(&self) -> LocalTimestamp {
        if let Some(ts) = &self.local_timestamp {
            return ts.clone();
        }
        match self.build_info.as_ref().and_then(BuildInfo::build_timestamp) {
            Some(ts) => LocalTimestamp::Recorded(ts.to_string()),
            None => LocalTimestamp::NeverBuilt,
        }
    }
}

/// `android:process` on any component means more than one process
fn manifest_declares_processes(manifest: &str) -> bool {
    manifest.contains("android:process=")
}

/// SHA-256 over the contents of `paths` in order, `None` if any is unreadable
fn hash_files(paths: &[PathBuf]) -> Option<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        match std::fs::read(path) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) => {
                debug!("Cannot hash {:?}: {}", path, e);
                return None;
            }
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}
