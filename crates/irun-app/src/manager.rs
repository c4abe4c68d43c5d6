//! Deploy orchestration
//!
//! [`InstantRunManager`] runs one deploy cycle in two halves around the
//! external build:
//!
//! 1. [`prepare`](InstantRunManager::prepare) observes the device and cache,
//!    selects the build mode and clears stale artifacts.
//! 2. The caller runs the build.
//! 3. [`complete`](InstantRunManager::complete) verifies the build output,
//!    gathers patches and pushes them to the agent.
//!
//! All collaborators are injected; nothing is looked up globally.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use irun_core::prelude::*;
use irun_core::{AgentKey, BuildMode, BuildSelection, UpdateMode, RESOURCES_PATCH};
use irun_daemon::{AgentClient, LocalDeviceBridge, PortLock};

use crate::artifacts::{
    clear_stale_artifacts, gather_patches, modified_ms, ArtifactLayout, BuildFinished,
};
use crate::cache::{InstalledRecord, PatchCache};
use crate::config::Settings;
use crate::context::{BuildInfo, InstantRunContext};
use crate::decision::{decide, verify_build, BuildVerdict, DecisionInput, DeviceState};
use crate::delegate::{app_running, LocalClientDelegate};
use crate::notify::DeployNotice;
use crate::session::DeploySession;

/// What the caller wants from this cycle
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    /// Target device; the first online device when `None`
    pub device_serial: Option<String>,
    pub clean_rerun: bool,
    /// Restart the activity even if the changes could be hot swapped
    pub force_restart: bool,
}

/// A cycle between [`InstantRunManager::prepare`] and
/// [`InstantRunManager::complete`]
#[derive(Debug, Clone)]
pub struct DeployCycle {
    key: Option<AgentKey>,
    selection: BuildSelection,
    resource_baseline_ms: Option<u64>,
    force_restart: bool,
    started_at: DateTime<Utc>,
}

impl DeployCycle {
    pub fn key(&self) -> Option<&AgentKey> {
        self.key.as_ref()
    }

    pub fn selection(&self) -> &BuildSelection {
        &self.selection
    }

    pub fn build_mode(&self) -> BuildMode {
        self.selection.mode
    }

    /// Resource timestamp recorded for the device when the cycle started
    pub fn resource_baseline_ms(&self) -> Option<u64> {
        self.resource_baseline_ms
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// The build produced nothing new; the device was not contacted
    NoChanges,
    Pushed {
        mode: UpdateMode,
        patch_count: usize,
    },
    /// The APK has to be built and installed in full
    NeedsFullBuild { reason: String },
}

impl DeployOutcome {
    pub fn notice(&self, hide_restart_tip: bool) -> DeployNotice {
        match self {
            DeployOutcome::NoChanges => DeployNotice::NoChanges,
            DeployOutcome::Pushed { mode, .. } => DeployNotice::for_update(*mode, hide_restart_tip),
            DeployOutcome::NeedsFullBuild { reason } => DeployNotice::FullBuildRequired {
                verifier_status: reason.clone(),
            },
        }
    }
}

/// Runs deploy cycles against one project
pub struct InstantRunManager<B, D, C> {
    bridge: B,
    delegate: D,
    cache: C,
    client: AgentClient,
    layout: ArtifactLayout,
    build_id_in_temp_file: bool,
    notify_hot_swap: bool,
    session: DeploySession,
}

impl<B, D, C> InstantRunManager<B, D, C>
where
    B: LocalDeviceBridge,
    D: LocalClientDelegate,
    C: PatchCache,
{
    pub fn new(settings: &Settings, layout: ArtifactLayout, bridge: B, delegate: D, cache: C) -> Self {
        let client = AgentClient::new(settings.agent.port)
            .with_timeouts(settings.agent.timeouts())
            .with_protocol_check(settings.agent.verify_protocol);

        let mut session = DeploySession::new();
        session.set_hide_restart_tip(!settings.behavior.show_restart_tip);

        Self {
            bridge,
            delegate,
            cache,
            client,
            layout,
            build_id_in_temp_file: settings.device.build_id_in_temp_file,
            notify_hot_swap: settings.behavior.notify_hot_swap,
            session,
        }
    }

    /// Share a client (and its push locks) with other managers
    #[must_use]
    pub fn with_client(mut self, client: AgentClient) -> Self {
        self.client = client;
        self
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn session(&self) -> &DeploySession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeploySession {
        &mut self.session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deploy cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Select the build mode and get the artifact directory ready for a build
    #[instrument(skip_all, fields(app = ctx.application_id()))]
    pub async fn prepare(
        &mut self,
        ctx: &impl InstantRunContext,
        request: &DeployRequest,
    ) -> Result<DeployCycle> {
        let started_at = self.session.begin_cycle();

        let (key, input) = self.decision_input(ctx, request).await?;
        let resource_baseline_ms = input
            .installed
            .as_ref()
            .and_then(|record| record.resource_timestamp_ms);

        let selection = decide(&input);
        match &selection.note {
            Some(note) => info!("Build mode {} ({}): {}", selection.mode, selection.cause, note),
            None => info!("Build mode {} ({})", selection.mode, selection.cause),
        }

        let cleared = clear_stale_artifacts(&self.layout);
        if cleared > 0 {
            debug!("Cleared {} stale artifact(s)", cleared);
        }

        Ok(DeployCycle {
            key,
            selection,
            resource_baseline_ms,
            force_restart: request.force_restart,
            started_at,
        })
    }

    /// The build mode [`prepare`](Self::prepare) would select, without
    /// touching the artifact directory
    pub async fn preview(
        &self,
        ctx: &impl InstantRunContext,
        request: &DeployRequest,
    ) -> Result<BuildSelection> {
        let (_, input) = self.decision_input(ctx, request).await?;
        Ok(decide(&input))
    }

    /// Deploy what the build produced.
    ///
    /// Connectivity failures are returned as errors and never retried; the
    /// cache is only updated after the agent acknowledged the push.
    #[instrument(skip_all, fields(mode = %cycle.selection.mode))]
    pub async fn complete(
        &mut self,
        cycle: DeployCycle,
        build_info: Option<&BuildInfo>,
        finished: BuildFinished,
    ) -> Result<DeployOutcome> {
        if !cycle.selection.mode.is_incremental() {
            return Ok(DeployOutcome::NeedsFullBuild {
                reason: cycle.selection.cause.description().to_string(),
            });
        }

        if let Some(info) = build_info {
            if let BuildVerdict::EscalateToFull { verifier_status } =
                verify_build(cycle.selection.mode, info)
            {
                info!("Build vetoed the incremental deploy: {}", verifier_status);
                return Ok(DeployOutcome::NeedsFullBuild {
                    reason: verifier_status,
                });
            }
        }

        let gathered = gather_patches(&self.layout, cycle.resource_baseline_ms, &finished)
            .finalize(cycle.force_restart);
        let mode = gathered.mode();

        if mode.is_no_changes() {
            info!("No changes to deploy");
            return Ok(DeployOutcome::NoChanges);
        }

        let Some(key) = cycle.key else {
            return Err(Error::DeviceNotFound {
                serial: "<none>".to_string(),
            });
        };

        let resource_timestamp_ms = gathered.resource_timestamp_ms();
        let patches = gathered.into_patches();
        let patch_count = patches.len();

        let lock = self.client.lock_port().await;
        self.forwarded(&lock, &key, async {
            self.client.push(&lock, &key, &patches, mode).await?;

            if mode == UpdateMode::HotSwap && self.notify_hot_swap {
                let text = DeployNotice::HotSwap.message();
                if let Err(e) = self.client.show_toast(&lock, &text).await {
                    warn!("Could not show hot swap toast: {}", e);
                }
            }
            Ok(())
        })
        .await?;
        drop(lock);

        if let Some(timestamp) = resource_timestamp_ms {
            debug_assert!(patches.iter().any(|p| p.path() == RESOURCES_PATCH));
            if let Err(e) = self.cache.set_resource_timestamp(&key, timestamp) {
                // The next cycle resends the archive
                warn!("Failed to record resource timestamp for {}: {}", key, e);
            }
        }

        if let Some(elapsed) = self.session.elapsed_ms() {
            info!("Deployed {} patch(es) as {} in {} ms", patch_count, mode, elapsed);
        }

        Ok(DeployOutcome::Pushed { mode, patch_count })
    }

    /// Remember what a full install put on the device.
    ///
    /// Patches the agent stashed for the previous install are wiped and the
    /// build id is written where the next cycle reads the device timestamp.
    pub async fn record_installation(
        &self,
        key: &AgentKey,
        ctx: &impl InstantRunContext,
    ) -> Result<InstalledRecord> {
        let build_id = ctx
            .build_info()
            .and_then(BuildInfo::build_timestamp)
            .map(str::to_string);

        if let Err(e) = self.wipe_data(key).await {
            warn!("Failed to wipe stashed patches on {}: {}", key, e);
        }

        match &build_id {
            Some(id) => {
                self.bridge
                    .write_build_id(&key.device_serial, &key.application_id, id)
                    .await?
            }
            None => warn!("No build id for {}; the next deploy needs a full build", key),
        }

        let record = InstalledRecord {
            manifest_hash: ctx.manifest_hash().map(str::to_string),
            manifest_resources_hash: ctx.manifest_resources_hash().map(str::to_string),
            // The installed APK already carries the current resources
            resource_timestamp_ms: modified_ms(&self.layout.resources),
            build_id,
        };
        self.cache.set(key, record.clone())?;
        info!("Recorded installation on {}", key);
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Direct agent commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the app is in the foreground
    pub async fn ping(&self, key: &AgentKey) -> Result<bool> {
        let lock = self.client.lock_port().await;
        self.forwarded(&lock, key, self.client.ping(&lock)).await
    }

    pub async fn restart_activity(&self, key: &AgentKey) -> Result<()> {
        let lock = self.client.lock_port().await;
        self.forwarded(&lock, key, self.client.restart_activity(&lock))
            .await
    }

    pub async fn show_toast(&self, key: &AgentKey, text: &str) -> Result<()> {
        let lock = self.client.lock_port().await;
        self.forwarded(&lock, key, self.client.show_toast(&lock, text))
            .await
    }

    /// Delete patches the agent stored on the device
    pub async fn wipe_data(&self, key: &AgentKey) -> Result<()> {
        self.bridge
            .wipe_data(&key.device_serial, &key.application_id)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// The requested device if it is online, otherwise the first online one
    pub async fn select_device(&self, requested: Option<&str>) -> Result<Option<String>> {
        let devices = self.bridge.list_devices().await?;
        let mut online = devices.into_iter().filter(|d| d.is_online());

        let selected = match requested {
            Some(serial) => online.find(|d| d.serial == serial),
            None => online.next(),
        };
        if selected.is_none() {
            match requested {
                Some(serial) => warn!("Device {} is not connected", serial),
                None => debug!("No online device"),
            }
        }
        Ok(selected.map(|d| d.serial))
    }

    async fn decision_input(
        &self,
        ctx: &impl InstantRunContext,
        request: &DeployRequest,
    ) -> Result<(Option<AgentKey>, DecisionInput)> {
        let serial = self.select_device(request.device_serial.as_deref()).await?;
        let key = serial.map(|serial| AgentKey::new(serial, ctx.application_id()));

        let (device, installed) = match &key {
            Some(key) => (Some(self.observe_device(key).await?), self.cache.get(key)),
            None => (None, None),
        };

        let input = DecisionInput {
            clean_rerun_requested: request.clean_rerun,
            device,
            installed,
            local_timestamp: ctx.local_timestamp(),
            manifest_hash: ctx.manifest_hash().map(str::to_string),
            manifest_resources_hash: ctx.manifest_resources_hash().map(str::to_string),
            uses_multiple_processes: ctx.uses_multiple_processes(),
            build_id_in_temp_file: self.build_id_in_temp_file,
        };
        Ok((key, input))
    }

    async fn observe_device(&self, key: &AgentKey) -> Result<DeviceState> {
        let serial = &key.device_serial;
        let api_level = self.bridge.api_level(serial).await?;
        let run_as_works = self.bridge.run_as_works(serial, &key.application_id).await?;
        let device_timestamp = self.delegate.device_build_timestamp(key).await?;
        let app_running = app_running(self.delegate.is_app_in_foreground(key).await)?;

        let state = DeviceState {
            serial: serial.clone(),
            api_level,
            run_as_works,
            broken_for_secondary_user: self.session.is_broken_for_secondary_user(serial),
            app_running,
            device_timestamp,
        };
        debug!("Device state: {:?}", state);
        Ok(state)
    }

    /// Run `exchange` with the locked agent port forwarded to the device
    async fn forwarded<T>(
        &self,
        lock: &PortLock,
        key: &AgentKey,
        exchange: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let port = lock.port();
        self.bridge
            .create_forward(&key.device_serial, port, &key.application_id)
            .await?;

        let result = exchange.await;

        if let Err(e) = self.bridge.remove_forward(&key.device_serial, port).await {
            warn!("Failed to remove forward for {}: {}", key, e);
        }
        result
    }
}
