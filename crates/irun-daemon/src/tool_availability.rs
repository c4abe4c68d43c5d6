//! Locating the `adb` executable
//!
//! Checks, in order: an explicit path from configuration, `adb` on `PATH`,
//! then `platform-tools/adb` under `ANDROID_HOME` and `ANDROID_SDK_ROOT`.

use std::path::{Path, PathBuf};

use irun_core::prelude::*;

/// Cached availability of the tools the deploy path shells out to
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Path to adb if found
    pub adb_path: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub fn check(configured: Option<&Path>) -> Self {
        let adb_path = Self::get_adb_paths(configured)
            .into_iter()
            .find(|candidate| Self::is_usable(candidate));

        match &adb_path {
            Some(path) => debug!("Using adb at {}", path.display()),
            None => debug!("adb not found"),
        }

        Self { adb_path }
    }

    /// Return the adb path or [`Error::AdbNotFound`]
    pub fn require_adb(&self) -> Result<&Path> {
        self.adb_path.as_deref().ok_or(Error::AdbNotFound)
    }

    fn is_usable(candidate: &Path) -> bool {
        if candidate.components().count() == 1 {
            which::which(candidate).is_ok()
        } else {
            candidate.is_file()
        }
    }

    /// Get list of paths to try for adb
    fn get_adb_paths(configured: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(path) = configured {
            paths.push(path.to_path_buf());
        }

        paths.push(PathBuf::from("adb"));

        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Ok(sdk) = std::env::var(var) {
                paths.push(Path::new(&sdk).join("platform-tools").join(adb_file_name()));
            }
        }

        paths
    }

    /// Get user-friendly message when adb is unavailable
    pub fn adb_unavailable_message(&self) -> Option<&'static str> {
        if self.adb_path.is_some() {
            None
        } else {
            Some("Android SDK not found. Set ANDROID_HOME or install the platform tools.")
        }
    }
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(availability.adb_path.is_none());
        assert!(availability.adb_unavailable_message().is_some());
        assert!(matches!(
            availability.require_adb(),
            Err(Error::AdbNotFound)
        ));
    }

    #[test]
    #[serial]
    fn test_adb_paths_include_android_home() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        let paths = ToolAvailability::get_adb_paths(None);
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/test/android/platform-tools")));
        std::env::remove_var("ANDROID_HOME");
    }

    #[test]
    #[serial]
    fn test_adb_paths_include_sdk_root() {
        std::env::set_var("ANDROID_SDK_ROOT", "/test/sdk");
        let paths = ToolAvailability::get_adb_paths(None);
        assert!(paths.iter().any(|p| p.starts_with("/test/sdk")));
        std::env::remove_var("ANDROID_SDK_ROOT");
    }

    #[test]
    fn test_configured_path_comes_first() {
        let paths = ToolAvailability::get_adb_paths(Some(Path::new("/opt/sdk/adb")));
        assert_eq!(paths[0], PathBuf::from("/opt/sdk/adb"));
        assert!(paths.contains(&PathBuf::from("adb")));
    }

    #[test]
    fn test_missing_configured_path_is_skipped() {
        let dir = std::env::temp_dir().join("irun-no-such-dir");
        let availability = ToolAvailability::check(Some(&dir.join("adb")));
        if let Some(path) = &availability.adb_path {
            assert_ne!(path, &dir.join("adb"));
        }
    }

    #[test]
    fn test_adb_available_no_message() {
        let availability = ToolAvailability {
            adb_path: Some(PathBuf::from("/path/to/adb")),
        };
        assert!(availability.adb_unavailable_message().is_none());
        assert!(availability.require_adb().is_ok());
    }
}
