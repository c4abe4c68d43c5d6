//! Client delegate: the two device questions the decision engine asks

use irun_core::prelude::*;
use irun_core::AgentKey;
use irun_daemon::{AgentClient, LocalDeviceBridge};

use crate::decision::DeviceTimestamp;

/// Live queries against the app on a device.
///
/// [`AgentDelegate`] answers them with adb and the agent; tests use fakes.
#[trait_variant::make(ClientDelegate: Send)]
pub trait LocalClientDelegate {
    /// Whether the app is in the foreground.
    ///
    /// Connectivity errors mean no agent answered, i.e. the app is not running.
    async fn is_app_in_foreground(&self, key: &AgentKey) -> Result<bool>;

    /// Build timestamp the installed app reports
    async fn device_build_timestamp(&self, key: &AgentKey) -> Result<DeviceTimestamp>;
}

/// [`ClientDelegate`] backed by a device bridge and the agent client
#[derive(Debug, Clone)]
pub struct AgentDelegate<B> {
    bridge: B,
    client: AgentClient,
}

impl<B> AgentDelegate<B> {
    pub fn new(bridge: B, client: AgentClient) -> Self {
        Self { bridge, client }
    }
}

impl<B: LocalDeviceBridge> LocalClientDelegate for AgentDelegate<B> {
    async fn is_app_in_foreground(&self, key: &AgentKey) -> Result<bool> {
        let lock = self.client.lock_port().await;
        let port = lock.port();
        self.bridge
            .create_forward(&key.device_serial, port, &key.application_id)
            .await?;

        let result = self.client.ping(&lock).await;

        if let Err(e) = self.bridge.remove_forward(&key.device_serial, port).await {
            warn!("Failed to remove forward for {}: {}", key, e);
        }
        result
    }

    async fn device_build_timestamp(&self, key: &AgentKey) -> Result<DeviceTimestamp> {
        if !self
            .bridge
            .package_installed(&key.device_serial, &key.application_id)
            .await?
        {
            return Ok(DeviceTimestamp::PackageNotInstalled);
        }

        let build_id = self
            .bridge
            .read_build_id(&key.device_serial, &key.application_id)
            .await?;
        Ok(match build_id {
            Some(id) => DeviceTimestamp::Recorded(id),
            None => DeviceTimestamp::Missing,
        })
    }
}

/// Turn a foreground probe into "is the app running".
///
/// An agent that cannot be reached or hangs up means no app is listening.
pub fn app_running(probe: Result<bool>) -> Result<bool> {
    match probe {
        Ok(_) => Ok(true),
        Err(e) if e.is_connectivity() || matches!(e, Error::NoAcknowledgement) => {
            debug!("App not reachable: {}", e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
