//! Instant Run Library
//!
//! Command layer of the `irun` binary: each command drives the deploy
//! manager from `irun-app` and reports progress as NDJSON events.

// Module declarations
pub mod commands;
pub mod headless;

// Re-export main entry points
pub use commands::{live_manager, CommandContext, DeployOptions, LiveManager};
pub use headless::DeployEvent;
