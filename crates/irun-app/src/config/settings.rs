//! Settings loading and the default `.irun/config.toml`

use std::path::{Path, PathBuf};

use irun_core::prelude::*;

use super::types::Settings;

/// Per-project configuration directory
pub const IRUN_DIR: &str = ".irun";

pub const CONFIG_FILENAME: &str = "config.toml";

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings for a project.
///
/// Reads `.irun/config.toml` in the project, falling back to the user-level
/// `instant-run/config.toml` in the platform config directory. Returns
/// default settings if neither exists or the file can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let project_config = project_path.join(IRUN_DIR).join(CONFIG_FILENAME);
    if project_config.exists() {
        return read_settings(&project_config);
    }

    if let Some(user_config) = user_config_path().filter(|p| p.exists()) {
        return read_settings(&user_config);
    }

    debug!("No config file at {:?}, using defaults", project_config);
    Settings::default()
}

/// User-level config file, if the platform has a config directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("instant-run").join(CONFIG_FILENAME))
}

fn read_settings(config_path: &Path) -> Settings {
    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create `.irun/config.toml` with commented defaults if it doesn't exist
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let irun_dir = project_path.join(IRUN_DIR);

    if !irun_dir.exists() {
        std::fs::create_dir_all(&irun_dir)
            .map_err(|e| Error::config(format!("Failed to create .irun dir: {}", e)))?;
        info!("Created {:?}", irun_dir);
    }

    let config_path = irun_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    }

    Ok(config_path)
}

fn generate_default_config() -> &'static str {
    r#"# Instant Run Configuration

[agent]
port = 8888                 # Local port forwarded to the app's agent socket
connect_timeout_ms = 5000
write_timeout_ms = 10000
ack_timeout_ms = 30000      # Wait this long for the agent to acknowledge a push
verify_protocol = true      # Ping first so an incompatible agent fails fast

[build]
intermediates_dir = "app/build/intermediates"
variant = "debug"
# build_info = "app/build/intermediates/build-info/debug/build-info.json"
manifest = "app/src/main/AndroidManifest.xml"
manifest_resources = []     # Resources referenced from the manifest
# command = "./gradlew assembleDebug -Pandroid.optional.compilation=INSTANT_DEV"
# application_id = "com.example.app"

[device]
# adb_path = "/opt/android-sdk/platform-tools/adb"
build_id_in_temp_file = true

[behavior]
show_restart_tip = true     # Mention the restart-activity shortcut after warm swaps
notify_hot_swap = false     # Toast inside the app after a hot swap
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings.agent.port, 8888);
        assert!(settings.agent.verify_protocol);
        assert_eq!(settings.build.variant, "debug");
        assert!(settings.behavior.show_restart_tip);
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let irun_dir = temp.path().join(".irun");
        std::fs::create_dir_all(&irun_dir).unwrap();

        let config = r#"
[agent]
port = 9999
verify_protocol = false

[build]
variant = "freeDebug"

[device]
build_id_in_temp_file = false
"#;
        std::fs::write(irun_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.agent.port, 9999);
        assert!(!settings.agent.verify_protocol);
        assert_eq!(settings.build.variant, "freeDebug");
        assert!(!settings.device.build_id_in_temp_file);
        assert_eq!(settings.agent.ack_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let irun_dir = temp.path().join(".irun");
        std::fs::create_dir_all(&irun_dir).unwrap();

        std::fs::write(irun_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.agent.port, 8888);
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        let path = init_config_dir(temp.path()).unwrap();

        assert_eq!(path, temp.path().join(".irun/config.toml"));
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let settings: Settings =
            toml::from_str(&content).expect("Default config should be valid TOML");
        assert_eq!(settings.agent.port, 8888);
        assert!(settings.device.build_id_in_temp_file);
    }

    #[test]
    fn test_init_config_dir_idempotent() {
        let temp = tempdir().unwrap();

        init_config_dir(temp.path()).unwrap();

        let config_path = temp.path().join(".irun/config.toml");
        std::fs::write(&config_path, "[agent]\nport = 7000\n").unwrap();

        init_config_dir(temp.path()).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("port = 7000"));
    }
}
