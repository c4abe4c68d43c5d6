//! Configuration file parsing for Instant Run
//!
//! Supports:
//! - `.irun/config.toml` - Project settings
//! - `<config_dir>/instant-run/config.toml` - User-level fallback

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, user_config_path, CONFIG_FILENAME, IRUN_DIR};
pub use types::*;
