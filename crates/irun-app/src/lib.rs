//! irun-app - Build-mode decisions and deploy orchestration for Instant Run
//!
//! This crate decides how the next build should run (clean, full, cold or
//! hot), turns the build's output into patches, and drives the push to the
//! agent. Configuration loading and the installed-patch cache live here too.

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod context;
pub mod decision;
pub mod delegate;
pub mod manager;
pub mod notify;
pub mod session;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Re-export primary types
pub use artifacts::{
    clear_stale_artifacts, gather_patches, ArtifactLayout, BuildFinished, DexKind, GatheredPatches,
};
pub use cache::{FilePatchCache, InMemoryPatchCache, InstalledRecord, PatchCache};
pub use config::{load_settings, Settings};
pub use context::{ArtifactKind, BuildInfo, InstantRunContext, ProjectContext};
pub use decision::{
    decide, verify_build, BuildVerdict, DecisionInput, DeviceState, DeviceTimestamp,
    LocalTimestamp, FREEZE_SWAP_MIN_API, MIN_INSTANT_RUN_API,
};
pub use delegate::{AgentDelegate, ClientDelegate, LocalClientDelegate};
pub use manager::{DeployCycle, DeployOutcome, DeployRequest, InstantRunManager};
pub use notify::DeployNotice;
pub use session::DeploySession;
