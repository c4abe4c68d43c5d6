//! TCP client for the device agent
//!
//! The agent listens on an abstract socket that adb forwards to a local TCP
//! port. Every exchange is one short-lived connection: connect, write the
//! whole message, optionally read a one-byte reply, close.
//!
//! Every exchange needs a [`PortLock`] for the client's local port. Devices
//! share that port, so the lock is held from `adb forward` until the forward
//! is removed; otherwise a second forward could rebind the port mid-push and
//! send one device's patches to another device's agent.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use irun_core::prelude::*;
use irun_core::{AgentKey, ApplicationPatch, UpdateMode};

use crate::protocol::{decode_reply, encode_message, AgentMessage};

/// Local port the agent is forwarded to by default
pub const DEFAULT_AGENT_PORT: u16 = 8888;

/// Timeouts applied to each agent exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentTimeouts {
    pub connect: Duration,
    pub write: Duration,
    pub ack: Duration,
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            write: Duration::from_secs(10),
            ack: Duration::from_secs(30),
        }
    }
}

/// Exclusive use of one local agent port
#[derive(Debug)]
pub struct PortLock {
    port: u16,
    _guard: OwnedMutexGuard<()>,
}

impl PortLock {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// One async mutex per local agent port
#[derive(Debug, Clone, Default)]
pub struct PushLocks {
    inner: Arc<StdMutex<HashMap<u16, Arc<Mutex<()>>>>>,
}

impl PushLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until nothing else holds `port`, then hold it.
    pub async fn acquire(&self, port: u16) -> PortLock {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(port).or_default())
        };
        PortLock {
            port,
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of ports seen so far
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client for the agent behind a forwarded local port
#[derive(Debug, Clone)]
pub struct AgentClient {
    addr: SocketAddr,
    timeouts: AgentTimeouts,
    verify_protocol: bool,
    locks: PushLocks,
}

impl AgentClient {
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            timeouts: AgentTimeouts::default(),
            verify_protocol: true,
            locks: PushLocks::new(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: AgentTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Ping the agent before pushing so a protocol mismatch aborts early
    #[must_use]
    pub fn with_protocol_check(mut self, verify: bool) -> Self {
        self.verify_protocol = verify;
        self
    }

    /// Share a lock registry with other clients
    #[must_use]
    pub fn with_locks(mut self, locks: PushLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn locks(&self) -> &PushLocks {
        &self.locks
    }

    /// Take the client's port; hold it across forward, exchange and unforward
    pub async fn lock_port(&self) -> PortLock {
        self.locks.acquire(self.port()).await
    }

    /// Ask the agent whether the app is in the foreground
    pub async fn ping(&self, lock: &PortLock) -> Result<bool> {
        self.check_lock(lock)?;
        let reply = self.exchange(&AgentMessage::Ping).await?;
        Ok(reply.unwrap_or(false))
    }

    /// Push patches and wait for the agent's acknowledgement.
    ///
    /// Connectivity failures are returned as [`Error::AgentUnreachable`] and
    /// are not retried.
    #[instrument(skip(self, lock, patches), fields(count = patches.len()))]
    pub async fn push(
        &self,
        lock: &PortLock,
        key: &AgentKey,
        patches: &[ApplicationPatch],
        mode: UpdateMode,
    ) -> Result<()> {
        // Encode up front so framing errors never leave a half-written message
        let message = AgentMessage::Patches {
            patches: patches.to_vec(),
            mode,
        };
        let bytes = encode_message(&message)?;
        self.check_lock(lock)?;

        if self.verify_protocol {
            match self.exchange(&AgentMessage::Ping).await {
                Ok(_) => {}
                Err(Error::NoAcknowledgement) => {
                    return Err(Error::protocol_mismatch(
                        "agent closed the connection without answering a ping",
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        match self.exchange_bytes(&bytes, true, message.description()).await? {
            Some(true) => {
                info!("Pushed {} patch(es) to {} as {}", patches.len(), key, mode);
                Ok(())
            }
            _ => Err(Error::PatchesRejected),
        }
    }

    /// Ask the agent to restart the foreground activity
    pub async fn restart_activity(&self, lock: &PortLock) -> Result<()> {
        self.check_lock(lock)?;
        self.exchange(&AgentMessage::RestartActivity).await?;
        Ok(())
    }

    /// Show a toast inside the running app
    pub async fn show_toast(&self, lock: &PortLock, text: &str) -> Result<()> {
        self.check_lock(lock)?;
        self.exchange(&AgentMessage::ShowToast {
            text: text.to_string(),
        })
        .await?;
        Ok(())
    }

    fn check_lock(&self, lock: &PortLock) -> Result<()> {
        if lock.port() != self.port() {
            return Err(Error::protocol(format!(
                "holding port {} but the agent is on port {}",
                lock.port(),
                self.port()
            )));
        }
        Ok(())
    }

    async fn exchange(&self, message: &AgentMessage) -> Result<Option<bool>> {
        let bytes = encode_message(message)?;
        self.exchange_bytes(&bytes, message.expects_reply(), message.description())
            .await
    }

    /// Write one encoded message and read the reply if one is expected.
    ///
    /// Caller must hold the port lock.
    async fn exchange_bytes(
        &self,
        bytes: &[u8],
        expects_reply: bool,
        description: &str,
    ) -> Result<Option<bool>> {
        debug!("Sending {} ({} bytes) to {}", description, bytes.len(), self.addr);

        let mut stream = match timeout(self.timeouts.connect, TcpStream::connect(self.addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Could not connect to agent at {}: {}", self.addr, e);
                return Err(Error::from_agent_io(e));
            }
            Err(_) => return Err(Error::agent_unreachable("timed out connecting to the app")),
        };

        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match timeout(self.timeouts.write, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to send {} to agent: {}", description, e);
                return Err(Error::from_agent_io(e));
            }
            Err(_) => return Err(Error::agent_unreachable("timed out sending to the app")),
        }

        if !expects_reply {
            let _ = stream.shutdown().await;
            return Ok(None);
        }

        match timeout(self.timeouts.ack, stream.read_u8()).await {
            Ok(Ok(byte)) => Ok(Some(decode_reply(byte))),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::NoAcknowledgement)
            }
            Ok(Err(e)) => Err(Error::from_agent_io(e)),
            Err(_) => Err(Error::agent_unreachable(
                "timed out waiting for the app to acknowledge",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AgentKey {
        AgentKey::new("emulator-5554", "com.example.app")
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = AgentTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(timeouts.ack, Duration::from_secs(30));
    }

    #[test]
    fn test_client_builder() {
        let client = AgentClient::new(DEFAULT_AGENT_PORT).with_protocol_check(false);
        assert_eq!(client.port(), 8888);
        assert!(!client.verify_protocol);
    }

    #[tokio::test]
    async fn test_locks_are_per_port() {
        let locks = PushLocks::new();
        let first = locks.acquire(8888).await;

        // Another port is free while the first is held
        let _second = locks.acquire(8889).await;
        assert_eq!(locks.len(), 2);

        // Same port stays blocked until the lock drops
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(8888)).await;
        assert!(blocked.is_err());

        drop(first);
        let reacquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire(8888)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_lock_for_another_port_is_refused() {
        let client = AgentClient::new(8888);
        let other = PushLocks::new().acquire(8889).await;

        let err = client.ping(&other).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_push_to_closed_port_is_unreachable() {
        // Bind and drop a listener to find a port with nothing behind it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = AgentClient::new(port);
        let lock = client.lock_port().await;
        let err = client
            .push(
                &lock,
                &key(),
                &[ApplicationPatch::new("classes.dex", vec![1])],
                UpdateMode::ColdSwap,
            )
            .await
            .unwrap_err();
        assert!(err.is_connectivity(), "got {:?}", err);
    }
}
