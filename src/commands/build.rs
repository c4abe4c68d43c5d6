//! Running the external build between prepare and complete

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use irun_core::prelude::*;

/// Run `command` through the platform shell in `project_path`.
///
/// The build's stdout is sent to stderr; stdout carries the event stream.
pub async fn run_build(project_path: &Path, command: &str) -> Result<Duration> {
    let started = Instant::now();
    info!("Running build: {}", command);

    let status = shell_command(command)
        .current_dir(project_path)
        .stdin(Stdio::null())
        .stdout(std::io::stderr())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| Error::ProcessSpawn {
            reason: format!("{}: {}", command, e),
        })?;

    if !status.success() {
        return Err(Error::build_failed(format!(
            "`{}` exited with {}",
            command, status
        )));
    }

    let elapsed = started.elapsed();
    info!("Build finished in {} ms", elapsed.as_millis());
    Ok(elapsed)
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_successful_build_runs_in_project_dir() {
        let temp = tempdir().unwrap();
        run_build(temp.path(), "echo built > marker.txt").await.unwrap();

        let marker = std::fs::read_to_string(temp.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "built");
    }

    #[tokio::test]
    async fn test_failed_build_is_an_error() {
        let temp = tempdir().unwrap();
        let err = run_build(temp.path(), "exit 3").await.unwrap_err();

        assert!(matches!(err, Error::BuildFailed { .. }));
        assert!(err.to_string().contains("exit 3"));
    }

    #[tokio::test]
    async fn test_missing_project_dir_fails_to_spawn() {
        let err = run_build(Path::new("/nonexistent/irun-project"), "true")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawn { .. }));
    }
}
