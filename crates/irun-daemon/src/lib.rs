//! # irun-daemon - Device Agent Communication
//!
//! Talks to the agent that Instant Run embeds in the running app: the binary
//! patch protocol, the TCP client that pushes patches over an adb-forwarded
//! port, and the adb plumbing around it.
//!
//! Depends on [`irun_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Wire Protocol
//! - [`AgentMessage`] - Patches, ping, restart-activity, toast, eof
//! - [`encode_message()`] / [`read_message()`] - Symmetric codec
//! - [`PROTOCOL_IDENTIFIER`], [`PROTOCOL_VERSION`] - Header constants
//!
//! ### Agent Client
//! - [`AgentClient`] - Push patches and wait for the acknowledgement
//! - [`PushLocks`] / [`PortLock`] - One exchange at a time per local agent port
//! - [`AgentTimeouts`] - Connect / write / acknowledgement timeouts
//!
//! ### adb
//! - [`DeviceBridge`] - Device operations needed by the deploy path
//! - [`AdbBridge`] - [`DeviceBridge`] backed by the `adb` executable
//! - [`ToolAvailability`] - Locate `adb`

pub mod adb;
pub mod client;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;

// Public API re-exports
pub use adb::{parse_devices_output, AdbBridge, AdbDevice, DeviceBridge, LocalDeviceBridge};
pub use client::{AgentClient, AgentTimeouts, PortLock, PushLocks, DEFAULT_AGENT_PORT};
pub use protocol::{
    decode_message, decode_reply, encode_message, encode_patches, read_message, AgentMessage,
    MessageKind, MAX_PAYLOAD_LEN, PROTOCOL_IDENTIFIER, PROTOCOL_VERSION,
};
pub use tool_availability::ToolAvailability;
