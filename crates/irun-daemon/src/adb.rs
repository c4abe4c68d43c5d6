//! adb plumbing used by the deploy path
//!
//! Wraps the handful of `adb` invocations Instant Run needs: listing devices,
//! reading the API level, probing `run-as`, reading the installed build id,
//! forwarding the agent's socket, and wiping the on-device patch folder.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

use irun_core::prelude::*;
use irun_core::{device_build_id_file, device_data_folder};

/// One line of `adb devices -l` output, e.g.
/// `emulator-5554          device product:sdk_gphone64 model:Pixel_7 transport_id:1`
static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<serial>\S+)\s+(?P<state>device|offline|unauthorized|recovery|sideload|bootloader)(?P<rest>.*)$")
        .expect("Invalid adb device line regex")
});

static MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"model:(\S+)").expect("Invalid model regex"));

/// A device as reported by `adb devices -l`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdbDevice {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

impl AdbDevice {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Device operations needed by the deploy path.
///
/// [`AdbBridge`] implements this with the real `adb`; tests use fakes.
#[trait_variant::make(DeviceBridge: Send)]
pub trait LocalDeviceBridge {
    /// Connected devices
    async fn list_devices(&self) -> Result<Vec<AdbDevice>>;

    /// `ro.build.version.sdk` of the device
    async fn api_level(&self, serial: &str) -> Result<u32>;

    /// Whether `run-as <app>` works on this device
    async fn run_as_works(&self, serial: &str, application_id: &str) -> Result<bool>;

    /// Whether the package is installed at all
    async fn package_installed(&self, serial: &str, application_id: &str) -> Result<bool>;

    /// Build id recorded on the device, `None` when the file is missing or empty
    async fn read_build_id(&self, serial: &str, application_id: &str) -> Result<Option<String>>;

    /// Record the installed build id where [`read_build_id`](Self::read_build_id) finds it
    async fn write_build_id(&self, serial: &str, application_id: &str, build_id: &str)
        -> Result<()>;

    /// Forward `tcp:<local_port>` to the agent's abstract socket
    async fn create_forward(&self, serial: &str, local_port: u16, application_id: &str)
        -> Result<()>;

    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()>;

    /// Delete patches the agent stashed on the device
    async fn wipe_data(&self, serial: &str, application_id: &str) -> Result<()>;
}

/// [`DeviceBridge`] backed by the `adb` executable
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: PathBuf,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    pub fn adb_path(&self) -> &std::path::Path {
        &self.adb_path
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!("adb {}", args.join(" "));
        Command::new(&self.adb_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::AdbNotFound
                } else {
                    Error::ProcessSpawn {
                        reason: e.to_string(),
                    }
                }
            })
    }

    /// Run adb with `args`, returning stdout on success
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::adb(format!(
                "adb {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn shell(&self, serial: &str, command: &str) -> Result<String> {
        self.run(&["-s", serial, "shell", command]).await
    }

    /// Shell probe whose failure is an answer, not an error.
    ///
    /// Newer adb versions forward the remote exit status, so stdout and
    /// stderr are merged and the exit status is ignored.
    async fn probe(&self, serial: &str, command: &str) -> Result<String> {
        let output = self.output(&["-s", serial, "shell", command]).await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl LocalDeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<AdbDevice>> {
        let stdout = self.run(&["devices", "-l"]).await?;
        Ok(parse_devices_output(&stdout))
    }

    async fn api_level(&self, serial: &str) -> Result<u32> {
        let stdout = self.shell(serial, "getprop ro.build.version.sdk").await?;
        parse_api_level(&stdout)
    }

    async fn run_as_works(&self, serial: &str, application_id: &str) -> Result<bool> {
        let stdout = self
            .probe(serial, &format!("run-as {} id", application_id))
            .await?;
        Ok(run_as_succeeded(&stdout))
    }

    async fn package_installed(&self, serial: &str, application_id: &str) -> Result<bool> {
        let stdout = self
            .probe(serial, &format!("pm path {}", application_id))
            .await?;
        Ok(stdout.lines().any(|line| line.starts_with("package:")))
    }

    async fn read_build_id(&self, serial: &str, application_id: &str) -> Result<Option<String>> {
        let path = device_build_id_file(application_id);
        let stdout = self.probe(serial, &format!("cat {}", path)).await?;
        Ok(parse_build_id(&stdout))
    }

    async fn write_build_id(
        &self,
        serial: &str,
        application_id: &str,
        build_id: &str,
    ) -> Result<()> {
        if !is_shell_safe(build_id) {
            return Err(Error::adb(format!("refusing to write build id {:?}", build_id)));
        }
        let path = device_build_id_file(application_id);
        self.shell(serial, &format!("echo {} > {}", build_id, path))
            .await?;
        debug!("Wrote build id {} to {} on {}", build_id, path, serial);
        Ok(())
    }

    async fn create_forward(
        &self,
        serial: &str,
        local_port: u16,
        application_id: &str,
    ) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        let remote = format!("localabstract:{}", application_id);
        self.run(&["-s", serial, "forward", &local, &remote])
            .await?;
        info!("Forwarded {} to {} on {}", local, remote, serial);
        Ok(())
    }

    async fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()> {
        let local = format!("tcp:{}", local_port);
        self.run(&["-s", serial, "forward", "--remove", &local])
            .await?;
        Ok(())
    }

    async fn wipe_data(&self, serial: &str, application_id: &str) -> Result<()> {
        let folder = device_data_folder(application_id);
        self.shell(serial, &format!("rm -rf {}", folder)).await?;
        info!("Wiped {} on {}", folder, serial);
        Ok(())
    }
}

/// Parse `adb devices -l` output
pub fn parse_devices_output(output: &str) -> Vec<AdbDevice> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| DEVICE_LINE.captures(line.trim()))
        .map(|caps| AdbDevice {
            serial: caps["serial"].to_string(),
            state: caps["state"].to_string(),
            model: MODEL
                .captures(&caps["rest"])
                .map(|m| m[1].replace('_', " ")),
        })
        .collect()
}

fn parse_api_level(output: &str) -> Result<u32> {
    let trimmed = output.trim();
    trimmed
        .parse()
        .map_err(|_| Error::adb(format!("unexpected API level output: {:?}", trimmed)))
}

/// `run-as <pkg> id` prints the app's uid on success and an error otherwise
fn run_as_succeeded(output: &str) -> bool {
    output.trim_start().starts_with("uid=")
}

/// Build ids are timestamps or similar tokens; nothing the device shell would expand
fn is_shell_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn parse_build_id(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.is_empty()
        || trimmed.contains("No such file")
        || trimmed.contains("Permission denied")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_output() {
        let output = "List of devices attached\n\
            emulator-5554          device product:sdk_gphone64_x86_64 model:Pixel_7 device:emu64x transport_id:1\n\
            0A231FDD4001JK         unauthorized usb:1-1 transport_id:2\n\
            \n";
        let devices = parse_devices_output(output);
        assert_eq!(devices.len(), 2);

        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_online());
        assert_eq!(devices[0].model.as_deref(), Some("Pixel 7"));

        assert_eq!(devices[1].serial, "0A231FDD4001JK");
        assert!(!devices[1].is_online());
        assert!(devices[1].model.is_none());
    }

    #[test]
    fn test_parse_devices_skips_daemon_banner() {
        let output = "* daemon not running; starting now at tcp:5037\n\
            * daemon started successfully\n\
            List of devices attached\n";
        assert!(parse_devices_output(output).is_empty());
    }

    #[test]
    fn test_parse_api_level() {
        assert_eq!(parse_api_level("34\r\n").unwrap(), 34);
        assert!(parse_api_level("").is_err());
        assert!(parse_api_level("error: device offline").is_err());
    }

    #[test]
    fn test_run_as_succeeded() {
        assert!(run_as_succeeded("uid=10123(u0_a123) gid=10123(u0_a123)\n"));
        assert!(!run_as_succeeded("run-as: package not debuggable: com.example.app\n"));
        assert!(!run_as_succeeded("run-as: unknown package: com.example.app"));
    }

    #[test]
    fn test_parse_build_id() {
        assert_eq!(parse_build_id("1700000000123\n"), Some("1700000000123".into()));
        assert_eq!(parse_build_id("   \n"), None);
        assert_eq!(
            parse_build_id("cat: /data/local/tmp/x-build-id.txt: No such file or directory"),
            None
        );
    }

    #[test]
    fn test_build_id_must_be_shell_safe() {
        assert!(is_shell_safe("1700000000123"));
        assert!(is_shell_safe("build-42_a.1"));
        assert!(!is_shell_safe(""));
        assert!(!is_shell_safe("1; rm -rf /"));
        assert!(!is_shell_safe("$(id)"));
    }

    #[tokio::test]
    async fn test_missing_adb_binary() {
        let bridge = AdbBridge::new("/nonexistent/platform-tools/adb");
        let err = bridge.list_devices().await.unwrap_err();
        assert!(matches!(err, Error::AdbNotFound));
    }
}
