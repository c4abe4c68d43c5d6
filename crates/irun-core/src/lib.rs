//! # irun-core - Core Domain Types
//!
//! Foundation crate for Instant Run deploys. Provides the update-mode lattice,
//! patches, build modes and causes, agent identity, error handling and logging.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing, dirs).
//!
//! ## Public API
//!
//! ### Update Modes (`update_mode`)
//! - [`UpdateMode`] - `NO_CHANGES < HOT_SWAP < WARM_SWAP < COLD_SWAP` with `combine`
//!
//! ### Patches (`patch`)
//! - [`ApplicationPatch`] - One file-level change (path + bytes)
//!
//! ### Build Modes (`build_mode`)
//! - [`BuildMode`] - CLEAN, FULL, COLD or HOT
//! - [`BuildCause`] - Why a mode was selected
//! - [`BuildSelection`] - Cause + derived mode + secondary-user flag
//!
//! ### Identity (`device`)
//! - [`AgentKey`] - (device serial, application id) pair
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use irun_core::prelude::*;
//! ```

pub mod build_mode;
pub mod device;
pub mod error;
pub mod logging;
pub mod patch;
pub mod update_mode;

/// Prelude for common imports used throughout all Instant Run crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use build_mode::{BuildCause, BuildMode, BuildSelection};
pub use device::{device_build_id_file, device_data_folder, AgentKey};
pub use error::{Error, Result, ResultExt, NO_CONNECTION_MESSAGE};
pub use patch::{ApplicationPatch, RELOAD_DEX_PATCH, RESOURCES_PATCH, RESTART_DEX_PATCH};
pub use update_mode::UpdateMode;
