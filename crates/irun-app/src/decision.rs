//! Build-mode decision engine
//!
//! [`decide`] is a pure function over a snapshot of device, cache and
//! project state. It is re-evaluated for every build request; nothing is
//! remembered between calls. Rules are checked in a fixed order and the
//! first match wins:
//!
//! 1. explicit clean rerun → CLEAN
//! 2. full-build conditions → FULL
//! 3. cold-swap conditions → COLD
//! 4. otherwise → HOT
//!
//! [`verify_build`] is the second decision point, after the build ran.

use serde::{Deserialize, Serialize};

use irun_core::{BuildCause, BuildMode, BuildSelection};

use crate::cache::InstalledRecord;
use crate::context::BuildInfo;

/// Lowest API level the agent runs on
pub const MIN_INSTANT_RUN_API: u32 = 15;

/// Lowest API level where a stopped app can be restarted with new code
pub const FREEZE_SWAP_MIN_API: u32 = 21;

/// Build timestamp of the last local build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum LocalTimestamp {
    Recorded(String),
    /// No build has produced a descriptor yet
    NeverBuilt,
    /// The descriptor exists but could not be read
    Unreadable { reason: String },
}

/// Build timestamp found on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum DeviceTimestamp {
    Recorded(String),
    /// Package installed but no (or an empty) build id file
    Missing,
    PackageNotInstalled,
}

/// What was observed on the target device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub serial: String,
    pub api_level: u32,
    pub run_as_works: bool,
    pub broken_for_secondary_user: bool,
    pub app_running: bool,
    pub device_timestamp: DeviceTimestamp,
}

/// Everything [`decide`] looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub clean_rerun_requested: bool,
    pub device: Option<DeviceState>,
    /// Cache snapshot for this device and app
    pub installed: Option<InstalledRecord>,
    pub local_timestamp: LocalTimestamp,
    pub manifest_hash: Option<String>,
    pub manifest_resources_hash: Option<String>,
    pub uses_multiple_processes: bool,
    /// Build ids are persisted in a device temp file that outlives the package
    pub build_id_in_temp_file: bool,
}

/// Select the build mode for the next build
pub fn decide(input: &DecisionInput) -> BuildSelection {
    let broken = input
        .device
        .as_ref()
        .is_some_and(|d| d.broken_for_secondary_user);

    if input.clean_rerun_requested {
        return BuildSelection::new(BuildCause::UserRequestedCleanRerun, broken);
    }

    if let Some(selection) = needs_full_build(input) {
        return selection;
    }

    if let Some(cause) = needs_cold_swap(input) {
        return BuildSelection::new(cause, broken);
    }

    BuildSelection::new(BuildCause::IncrementalBuild, broken)
}

fn needs_full_build(input: &DecisionInput) -> Option<BuildSelection> {
    let Some(device) = &input.device else {
        return Some(BuildSelection::new(BuildCause::NoDevice, false));
    };
    let broken = device.broken_for_secondary_user;
    let full = |cause| Some(BuildSelection::new(cause, broken));

    if device.api_level < MIN_INSTANT_RUN_API {
        return full(BuildCause::ApiTooLow);
    }

    let Some(installed) = &input.installed else {
        return full(BuildCause::FirstInstallation);
    };

    if let Some((cause, note)) = timestamp_mismatch(
        &input.local_timestamp,
        &device.device_timestamp,
        input.build_id_in_temp_file,
    ) {
        return Some(BuildSelection::new(cause, broken).with_note(note));
    }

    if !same_hash(&input.manifest_hash, &installed.manifest_hash) {
        return full(BuildCause::ManifestChanged);
    }

    if !same_hash(
        &input.manifest_resources_hash,
        &installed.manifest_resources_hash,
    ) {
        return full(BuildCause::ManifestResourceChanged);
    }

    if !device.app_running {
        if device.api_level < FREEZE_SWAP_MIN_API {
            return full(BuildCause::FreezeSwapRequiresApi21);
        }
        if !device.run_as_works {
            return full(BuildCause::NoRunAs);
        }
    }

    None
}

fn needs_cold_swap(input: &DecisionInput) -> Option<BuildCause> {
    let device = input.device.as_ref()?;
    if !device.app_running {
        return Some(BuildCause::AppNotRunning);
    }
    if input.uses_multiple_processes {
        return Some(BuildCause::MultiProcessApp);
    }
    None
}

/// A missing hash on either side counts as changed
fn same_hash(current: &Option<String>, installed: &Option<String>) -> bool {
    matches!((current, installed), (Some(a), Some(b)) if a == b)
}

/// Compare build timestamps. `None` means they match.
fn timestamp_mismatch(
    local: &LocalTimestamp,
    device: &DeviceTimestamp,
    build_id_in_temp_file: bool,
) -> Option<(BuildCause, String)> {
    let mismatch = |note: String| Some((BuildCause::MismatchingTimestamps, note));

    match (local, device) {
        (_, DeviceTimestamp::PackageNotInstalled) if build_id_in_temp_file => {
            mismatch("package is no longer installed on the device".to_string())
        }
        (_, DeviceTimestamp::PackageNotInstalled) => Some((
            BuildCause::AppNotInstalled,
            "package is not installed on the device".to_string(),
        )),
        (LocalTimestamp::NeverBuilt, _) => {
            mismatch("no local build has been recorded yet".to_string())
        }
        (LocalTimestamp::Unreadable { reason }, _) => {
            mismatch(format!("local build timestamp could not be read: {}", reason))
        }
        (LocalTimestamp::Recorded(_), DeviceTimestamp::Missing) => {
            mismatch("device has no build timestamp".to_string())
        }
        (LocalTimestamp::Recorded(local), DeviceTimestamp::Recorded(device)) if local == device => {
            None
        }
        (LocalTimestamp::Recorded(local), DeviceTimestamp::Recorded(device)) => mismatch(format!(
            "local build {} does not match device build {}",
            local, device
        )),
    }
}

/// Result of checking what the build actually produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildVerdict {
    /// Gather and push whatever the build produced
    Deploy,
    /// The build vetoed the incremental strategy
    EscalateToFull { verifier_status: String },
}

/// Escalate an incremental request whose build produced nothing and whose
/// verifier said why.
pub fn verify_build(requested: BuildMode, info: &BuildInfo) -> BuildVerdict {
    if !requested.is_incremental() || !info.artifacts.is_empty() {
        return BuildVerdict::Deploy;
    }
    match info.verifier_failure() {
        Some(status) => BuildVerdict::EscalateToFull {
            verifier_status: status.to_string(),
        },
        None => BuildVerdict::Deploy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ArtifactKind;

    fn device() -> DeviceState {
        DeviceState {
            serial: "emulator-5554".into(),
            api_level: 30,
            run_as_works: true,
            broken_for_secondary_user: false,
            app_running: true,
            device_timestamp: DeviceTimestamp::Recorded("100".into()),
        }
    }

    fn installed() -> InstalledRecord {
        InstalledRecord {
            manifest_hash: Some("manifest".into()),
            manifest_resources_hash: Some("res".into()),
            resource_timestamp_ms: Some(1),
            build_id: Some("100".into()),
        }
    }

    /// Input that should select HOT
    fn hot_input() -> DecisionInput {
        DecisionInput {
            clean_rerun_requested: false,
            device: Some(device()),
            installed: Some(installed()),
            local_timestamp: LocalTimestamp::Recorded("100".into()),
            manifest_hash: Some("manifest".into()),
            manifest_resources_hash: Some("res".into()),
            uses_multiple_processes: false,
            build_id_in_temp_file: true,
        }
    }

    fn with_device(f: impl FnOnce(&mut DeviceState)) -> DecisionInput {
        let mut input = hot_input();
        if let Some(device) = input.device.as_mut() {
            f(device);
        }
        input
    }

    #[test]
    fn test_everything_matching_is_hot() {
        let selection = decide(&hot_input());
        assert_eq!(selection.mode, BuildMode::Hot);
        assert_eq!(selection.cause, BuildCause::IncrementalBuild);
    }

    #[test]
    fn test_clean_rerun_wins() {
        let mut input = with_device(|d| d.api_level = 10);
        input.clean_rerun_requested = true;
        input.installed = None;

        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::UserRequestedCleanRerun);
        assert_eq!(selection.mode, BuildMode::Clean);
    }

    #[test]
    fn test_no_device() {
        let mut input = hot_input();
        input.device = None;
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::NoDevice);
        assert_eq!(selection.mode, BuildMode::Full);
    }

    #[test]
    fn test_low_api_overrides_everything_but_clean() {
        for api in [1, 10, 14] {
            let mut input = with_device(|d| {
                d.api_level = api;
                d.app_running = false;
                d.run_as_works = false;
                d.device_timestamp = DeviceTimestamp::Missing;
            });
            input.installed = None;
            input.manifest_hash = Some("different".into());
            input.uses_multiple_processes = true;

            let selection = decide(&input);
            assert_eq!(selection.cause, BuildCause::ApiTooLow, "api {}", api);
            assert_eq!(selection.mode, BuildMode::Full);
        }

        assert_eq!(
            decide(&with_device(|d| d.api_level = MIN_INSTANT_RUN_API)).mode,
            BuildMode::Hot
        );
    }

    #[test]
    fn test_first_installation_ignores_hashes() {
        for hash in [None, Some("manifest".to_string()), Some("other".to_string())] {
            let mut input = hot_input();
            input.installed = None;
            input.manifest_hash = hash.clone();
            input.manifest_resources_hash = hash;

            assert_eq!(decide(&input).cause, BuildCause::FirstInstallation);
        }
    }

    #[test]
    fn test_mismatching_timestamps() {
        let input = with_device(|d| d.device_timestamp = DeviceTimestamp::Recorded("99".into()));
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::MismatchingTimestamps);
        assert!(selection.note.unwrap().contains("99"));
    }

    #[test]
    fn test_missing_device_timestamp_is_mismatch() {
        let input = with_device(|d| d.device_timestamp = DeviceTimestamp::Missing);
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::MismatchingTimestamps);
        assert_eq!(
            selection.note.as_deref(),
            Some("device has no build timestamp")
        );
    }

    #[test]
    fn test_never_built_and_unreadable_are_distinguished() {
        let mut never = hot_input();
        never.local_timestamp = LocalTimestamp::NeverBuilt;
        let never = decide(&never);

        let mut unreadable = hot_input();
        unreadable.local_timestamp = LocalTimestamp::Unreadable {
            reason: "bad json".into(),
        };
        let unreadable = decide(&unreadable);

        assert_eq!(never.cause, BuildCause::MismatchingTimestamps);
        assert_eq!(unreadable.cause, BuildCause::MismatchingTimestamps);
        assert_ne!(never.note, unreadable.note);
        assert!(unreadable.note.unwrap().contains("bad json"));
    }

    #[test]
    fn test_package_not_installed_depends_on_build_id_storage() {
        let mut input = with_device(|d| d.device_timestamp = DeviceTimestamp::PackageNotInstalled);
        assert_eq!(decide(&input).cause, BuildCause::MismatchingTimestamps);

        input.build_id_in_temp_file = false;
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::AppNotInstalled);
        assert_eq!(selection.mode, BuildMode::Full);
    }

    #[test]
    fn test_manifest_changed() {
        let mut input = hot_input();
        input.manifest_hash = Some("edited".into());
        input.manifest_resources_hash = Some("edited-too".into());
        assert_eq!(decide(&input).cause, BuildCause::ManifestChanged);
    }

    #[test]
    fn test_missing_manifest_hash_counts_as_changed() {
        let mut input = hot_input();
        input.manifest_hash = None;
        assert_eq!(decide(&input).cause, BuildCause::ManifestChanged);
    }

    #[test]
    fn test_manifest_resource_changed() {
        let mut input = hot_input();
        input.manifest_resources_hash = Some("new-icon".into());
        assert_eq!(decide(&input).cause, BuildCause::ManifestResourceChanged);
    }

    #[test]
    fn test_stopped_app_on_old_device_needs_full_build() {
        let input = with_device(|d| {
            d.app_running = false;
            d.api_level = 19;
        });
        assert_eq!(decide(&input).cause, BuildCause::FreezeSwapRequiresApi21);
    }

    #[test]
    fn test_stopped_app_without_run_as_needs_full_build() {
        let input = with_device(|d| {
            d.app_running = false;
            d.run_as_works = false;
        });
        assert_eq!(decide(&input).cause, BuildCause::NoRunAs);
    }

    #[test]
    fn test_run_as_only_matters_when_app_stopped() {
        let input = with_device(|d| d.run_as_works = false);
        assert_eq!(decide(&input).mode, BuildMode::Hot);
    }

    #[test]
    fn test_stopped_app_is_cold() {
        let input = with_device(|d| {
            d.app_running = false;
            d.api_level = 21;
        });
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::AppNotRunning);
        assert_eq!(selection.mode, BuildMode::Cold);
    }

    #[test]
    fn test_multi_process_is_cold() {
        let mut input = hot_input();
        input.uses_multiple_processes = true;
        let selection = decide(&input);
        assert_eq!(selection.cause, BuildCause::MultiProcessApp);
        assert_eq!(selection.mode, BuildMode::Cold);
    }

    #[test]
    fn test_secondary_user_flag_is_carried() {
        let input = with_device(|d| d.broken_for_secondary_user = true);
        assert!(decide(&input).broken_for_secondary_user);

        let input = with_device(|d| {
            d.broken_for_secondary_user = true;
            d.api_level = 9;
        });
        assert!(decide(&input).broken_for_secondary_user);
    }

    #[test]
    fn test_decide_is_repeatable() {
        let input = with_device(|d| d.app_running = false);
        assert_eq!(decide(&input), decide(&input));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Post-build verification
    // ─────────────────────────────────────────────────────────────────────────

    fn vetoed() -> BuildInfo {
        BuildInfo {
            verifier_status: Some("CLASS_ANNOTATION_CHANGE".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_verify_escalates_vetoed_incremental_builds() {
        for mode in [BuildMode::Hot, BuildMode::Cold] {
            assert_eq!(
                verify_build(mode, &vetoed()),
                BuildVerdict::EscalateToFull {
                    verifier_status: "CLASS_ANNOTATION_CHANGE".into()
                }
            );
        }
    }

    #[test]
    fn test_verify_ignores_full_builds() {
        assert_eq!(verify_build(BuildMode::Full, &vetoed()), BuildVerdict::Deploy);
        assert_eq!(verify_build(BuildMode::Clean, &vetoed()), BuildVerdict::Deploy);
    }

    #[test]
    fn test_verify_deploys_when_artifacts_exist() {
        let mut info = vetoed();
        info.artifacts.push(ArtifactKind::ReloadDex);
        assert_eq!(verify_build(BuildMode::Hot, &info), BuildVerdict::Deploy);
    }

    #[test]
    fn test_verify_deploys_without_verifier_status() {
        assert_eq!(
            verify_build(BuildMode::Hot, &BuildInfo::default()),
            BuildVerdict::Deploy
        );
    }
}
