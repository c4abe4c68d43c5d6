//! Mock device agent for tests
//!
//! [`MockAgent`] listens on a loopback port and speaks the real wire
//! protocol: it decodes every incoming message, records it, and answers
//! patches and pings according to its [`MockAgentBehavior`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::protocol::{read_message, AgentMessage};

/// How the mock agent answers
#[derive(Debug, Clone)]
pub struct MockAgentBehavior {
    /// Reply to patches with this acknowledgement
    pub ack: bool,
    /// Reply to pings with this foreground state
    pub foreground: bool,
    /// Close ping connections without replying (simulates a version mismatch)
    pub drop_pings: bool,
    /// Close patch connections without replying
    pub drop_patches: bool,
    /// Delay before replying to patches
    pub reply_delay: Option<Duration>,
}

impl Default for MockAgentBehavior {
    fn default() -> Self {
        Self {
            ack: true,
            foreground: true,
            drop_pings: false,
            drop_patches: false,
            reply_delay: None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    connections: AtomicUsize,
}

/// A loopback agent that records what it receives
pub struct MockAgent {
    port: u16,
    received: Arc<Mutex<Vec<AgentMessage>>>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl MockAgent {
    /// Start an agent that acknowledges everything
    pub async fn start() -> Self {
        Self::start_with(MockAgentBehavior::default()).await
    }

    pub async fn start_with(behavior: MockAgentBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock agent");
        let port = listener.local_addr().expect("mock agent addr").port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(Self::accept_loop(
            listener,
            behavior,
            Arc::clone(&received),
            Arc::clone(&counters),
        ));

        Self {
            port,
            received,
            counters,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Messages received so far, in arrival order
    pub async fn received(&self) -> Vec<AgentMessage> {
        self.received.lock().await.clone()
    }

    /// Total connections accepted
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Highest number of connections handled at the same time
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    async fn accept_loop(
        listener: TcpListener,
        behavior: MockAgentBehavior,
        received: Arc<Mutex<Vec<AgentMessage>>>,
        counters: Arc<Counters>,
    ) {
        while let Ok((stream, _)) = listener.accept().await {
            counters.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(Self::handle(
                stream,
                behavior.clone(),
                Arc::clone(&received),
                Arc::clone(&counters),
            ));
        }
    }

    async fn handle(
        mut stream: TcpStream,
        behavior: MockAgentBehavior,
        received: Arc<Mutex<Vec<AgentMessage>>>,
        counters: Arc<Counters>,
    ) {
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(active, Ordering::SeqCst);

        let mut reply = None;
        if let Ok(message) = read_message(&mut stream).await {
            reply = match &message {
                AgentMessage::Ping if behavior.drop_pings => None,
                AgentMessage::Ping => Some(behavior.foreground),
                AgentMessage::Patches { .. } if behavior.drop_patches => None,
                AgentMessage::Patches { .. } => Some(behavior.ack),
                _ => None,
            };
            let is_patches = matches!(message, AgentMessage::Patches { .. });
            received.lock().await.push(message);

            if is_patches {
                if let Some(delay) = behavior.reply_delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Leave the active count before replying so the client's next
        // connection is never counted as overlapping with this one.
        counters.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(value) = reply {
            let _ = stream.write_u8(u8::from(value)).await;
        }
        let _ = stream.shutdown().await;
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}
