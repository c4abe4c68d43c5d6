//! `irun` commands
//!
//! Each command drives an [`InstantRunManager`] and reports through an
//! event callback, so the binary prints NDJSON while tests collect events.

pub mod build;

use std::path::PathBuf;

use irun_app::{
    AgentDelegate, BuildFinished, BuildInfo, DeployNotice, DeployOutcome, DeployRequest,
    FilePatchCache, InstalledRecord, InstantRunManager, LocalClientDelegate, PatchCache,
    ProjectContext, Settings,
};
use irun_core::prelude::*;
use irun_core::{AgentKey, BuildSelection};
use irun_daemon::{AdbBridge, AgentClient, LocalDeviceBridge, ToolAvailability};

use crate::headless::DeployEvent;

pub use build::run_build;

/// Manager wired to adb, the agent and the on-disk patch cache
pub type LiveManager = InstantRunManager<AdbBridge, AgentDelegate<AdbBridge>, FilePatchCache>;

/// Inputs shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub project_path: PathBuf,
    pub settings: Settings,
    /// Overrides `build.application_id`
    pub application_id: Option<String>,
    pub device: Option<String>,
}

impl CommandContext {
    pub fn new(project_path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            project_path: project_path.into(),
            settings,
            application_id: None,
            device: None,
        }
    }

    pub fn application_id(&self) -> Result<&str> {
        self.application_id
            .as_deref()
            .or(self.settings.build.application_id.as_deref())
            .ok_or_else(|| {
                Error::config("No application id; pass --app-id or set build.application_id")
            })
    }

    /// Snapshot the project for a decision
    pub fn project(&self) -> Result<ProjectContext> {
        Ok(ProjectContext::load(
            &self.project_path,
            &self.settings,
            self.application_id()?,
        ))
    }

    fn request(&self, clean_rerun: bool, force_restart: bool) -> DeployRequest {
        DeployRequest {
            device_serial: self.device.clone(),
            clean_rerun,
            force_restart,
        }
    }
}

/// Build a [`LiveManager`] for the project
pub fn live_manager(ctx: &CommandContext) -> Result<LiveManager> {
    let tools = ToolAvailability::check(ctx.settings.device.adb_path.as_deref());
    let bridge = AdbBridge::new(tools.require_adb()?);

    let agent = &ctx.settings.agent;
    let client = AgentClient::new(agent.port)
        .with_timeouts(agent.timeouts())
        .with_protocol_check(agent.verify_protocol);

    let manager = InstantRunManager::new(
        &ctx.settings,
        ctx.settings.build.layout(&ctx.project_path),
        bridge.clone(),
        AgentDelegate::new(bridge, client.clone()),
        FilePatchCache::for_project(&ctx.project_path),
    )
    .with_client(client);
    Ok(manager)
}

/// Options for [`deploy`]
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Overrides `build.command`
    pub build_command: Option<String>,
    pub clean_rerun: bool,
    pub force_restart: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Deploy cycle
// ─────────────────────────────────────────────────────────────────────────────

/// Report the build mode the next deploy would use
pub async fn decide<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    clean_rerun: bool,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<BuildSelection>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let project = ctx.project()?;
    let selection = manager
        .preview(&project, &ctx.request(clean_rerun, false))
        .await?;

    emit(DeployEvent::build_selected(&selection));
    if let Some(notice) = DeployNotice::for_selection(&selection) {
        emit(DeployEvent::notice(&notice));
    }
    Ok(selection)
}

/// Prepare, build and push one incremental update.
///
/// When the selection is not incremental nothing is built and no build
/// command is needed; the caller installs the app in full and then runs
/// [`record_install`].
pub async fn deploy<B, D, C>(
    manager: &mut InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    options: &DeployOptions,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<DeployOutcome>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let project = ctx.project()?;
    let request = ctx.request(options.clean_rerun, options.force_restart);
    let cycle = manager.prepare(&project, &request).await?;

    emit(DeployEvent::build_selected(cycle.selection()));
    if let Some(notice) = DeployNotice::for_selection(cycle.selection()) {
        emit(DeployEvent::notice(&notice));
    }

    if !cycle.build_mode().is_incremental() {
        let outcome = DeployOutcome::NeedsFullBuild {
            reason: cycle.selection().cause.description().to_string(),
        };
        emit(DeployEvent::full_build_required(
            cycle.selection().cause.description(),
        ));
        return Ok(outcome);
    }

    let build_command = options
        .build_command
        .clone()
        .or_else(|| ctx.settings.build.command.clone())
        .ok_or_else(|| Error::config("No build command; pass --build-cmd or set build.command"))?;

    emit(DeployEvent::build_started(&build_command));
    let elapsed = run_build(&ctx.project_path, &build_command).await?;
    emit(DeployEvent::build_finished(elapsed.as_millis() as u64));

    let build_info = load_build_info(ctx);
    let result = manager
        .complete(cycle, build_info.as_ref(), BuildFinished::confirmed())
        .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_connectivity() {
                emit(DeployEvent::notice(&DeployNotice::NoConnection));
            }
            return Err(e);
        }
    };

    match &outcome {
        DeployOutcome::NoChanges => emit(DeployEvent::no_changes()),
        DeployOutcome::Pushed { mode, patch_count } => {
            emit(DeployEvent::deployed(*mode, *patch_count))
        }
        DeployOutcome::NeedsFullBuild { reason } => {
            emit(DeployEvent::full_build_required(reason))
        }
    }
    let notice = outcome.notice(manager.session().hide_restart_tip());
    if notice.is_prominent() {
        emit(DeployEvent::notice(&notice));
    }
    Ok(outcome)
}

/// Record a full install so the next deploy can go incremental
pub async fn record_install<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<InstalledRecord>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let key = target_key(manager, ctx).await?;
    let record = manager.record_installation(&key, &ctx.project()?).await?;
    emit(DeployEvent::install_recorded(
        &key.device_serial,
        &key.application_id,
    ));
    Ok(record)
}

// ─────────────────────────────────────────────────────────────────────────────
// Direct commands
// ─────────────────────────────────────────────────────────────────────────────

/// List the devices adb knows about
pub async fn list_devices<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<usize>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let devices = manager.bridge().list_devices().await?;
    for device in &devices {
        emit(DeployEvent::device_detected(device));
    }
    Ok(devices.len())
}

pub async fn ping<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<bool>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let key = target_key(manager, ctx).await?;
    let foreground = with_connection_notice(manager.ping(&key).await, emit)?;
    emit(DeployEvent::ping(&key.device_serial, foreground));
    Ok(foreground)
}

pub async fn restart_activity<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<()>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let key = target_key(manager, ctx).await?;
    with_connection_notice(manager.restart_activity(&key).await, emit)?;
    emit(DeployEvent::command_completed("restart_activity"));
    Ok(())
}

pub async fn show_toast<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    text: &str,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<()>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let key = target_key(manager, ctx).await?;
    with_connection_notice(manager.show_toast(&key, text).await, emit)?;
    emit(DeployEvent::command_completed("toast"));
    Ok(())
}

/// Delete the patches the agent stored on the device
pub async fn wipe_data<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
    emit: &mut impl FnMut(DeployEvent),
) -> Result<()>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let key = target_key(manager, ctx).await?;
    manager.wipe_data(&key).await?;
    emit(DeployEvent::command_completed("wipe_data"));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn target_key<B, D, C>(
    manager: &InstantRunManager<B, D, C>,
    ctx: &CommandContext,
) -> Result<AgentKey>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    let application_id = ctx.application_id()?;
    let serial = manager
        .select_device(ctx.device.as_deref())
        .await?
        .ok_or_else(|| Error::DeviceNotFound {
            serial: ctx.device.clone().unwrap_or_else(|| "<any>".to_string()),
        })?;
    Ok(AgentKey::new(serial, application_id))
}

/// Build info written by the build that just ran; unreadable means none
fn load_build_info(ctx: &CommandContext) -> Option<BuildInfo> {
    let path = ctx.settings.build.build_info_path(&ctx.project_path);
    if !path.exists() {
        debug!("No build info at {:?}", path);
        return None;
    }
    match BuildInfo::load(&path) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!("Ignoring build info: {}", e);
            None
        }
    }
}

fn with_connection_notice<T>(result: Result<T>, emit: &mut impl FnMut(DeployEvent)) -> Result<T> {
    if let Err(e) = &result {
        if e.is_connectivity() {
            emit(DeployEvent::notice(&DeployNotice::NoConnection));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_application_id_flag_overrides_settings() {
        let mut settings = Settings::default();
        settings.build.application_id = Some("com.example.config".to_string());
        let mut ctx = CommandContext::new("/proj", settings);
        assert_eq!(ctx.application_id().unwrap(), "com.example.config");

        ctx.application_id = Some("com.example.flag".to_string());
        assert_eq!(ctx.application_id().unwrap(), "com.example.flag");
    }

    #[test]
    fn test_missing_application_id_is_config_error() {
        let ctx = CommandContext::new("/proj", Settings::default());
        assert!(matches!(ctx.application_id(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_corrupt_build_info_is_ignored() {
        let temp = tempdir().unwrap();
        let ctx = CommandContext::new(temp.path(), Settings::default());
        let path = ctx.settings.build.build_info_path(temp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(load_build_info(&ctx).is_none());
    }

    #[test]
    fn test_connection_notice_only_for_connectivity() {
        let mut events = Vec::new();
        let _ = with_connection_notice::<()>(Err(Error::PatchesRejected), &mut |e| {
            events.push(e)
        });
        assert!(events.is_empty());

        let _ = with_connection_notice::<()>(Err(Error::agent_unreachable("refused")), &mut |e| {
            events.push(e)
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "notice");
    }
}
