//! The build's own shell-out seam, mirroring [`crate::device::runner`]:
//! the rest of the builder never spawns `live-build` or a container
//! directly, only through this trait.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result};
use osutils::exe::RunAndCheck;

pub trait ContainerRunner: Send + Sync {
    /// Runs `live-build` inside its container for `build_dir`, streaming
    /// output to `log_path`. `proxy` is passed through as `http_proxy`/
    /// `https_proxy` when discovery found one.
    fn run_live_build(&self, build_dir: &Path, log_path: &Path, proxy: Option<&str>) -> Result<()>;

    /// Best-effort: kills and removes whatever container is currently
    /// active, used on cancellation. Never errors loudly — there may be
    /// nothing to kill.
    fn kill_active(&self) -> Result<()>;
}

pub struct RealContainerRunner;

impl ContainerRunner for RealContainerRunner {
    fn run_live_build(&self, build_dir: &Path, log_path: &Path, proxy: Option<&str>) -> Result<()> {
        let mut log_file = File::create(log_path)
            .with_context(|| format!("creating log file {}", log_path.display()))?;

        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("--privileged")
            .arg("-v")
            .arg(format!("{}:/build", build_dir.display()))
            .arg("-w")
            .arg("/build");
        if let Some(proxy) = proxy {
            cmd.arg("-e").arg(format!("http_proxy={proxy}"));
            cmd.arg("-e").arg(format!("https_proxy={proxy}"));
        }
        cmd.arg("bastion-live-build").arg("lb").arg("build");

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("failed to spawn live-build container")?;
        log_file.write_all(&output.stdout)?;
        log_file.write_all(&output.stderr)?;
        output
            .check()
            .with_context(|| format!("see {}", log_path.display()))
    }

    fn kill_active(&self) -> Result<()> {
        Command::new("docker")
            .args(["kill", "bastion-live-build"])
            .run_and_check()
            .ok();
        Ok(())
    }
}

/// Records every call it receives and returns canned responses in order,
/// same contract as `device::runner::FakeRunner`.
#[derive(Default)]
pub struct FakeContainerRunner {
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<Result<(), String>>>,
}

impl FakeContainerRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self) {
        self.responses.lock().unwrap().insert(0, Ok(()));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(0, Err(message.into()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ContainerRunner for FakeContainerRunner {
    fn run_live_build(&self, build_dir: &Path, _log_path: &Path, _proxy: Option<&str>) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(build_dir.display().to_string());
        match self.responses.lock().unwrap().pop() {
            Some(Ok(())) => Ok(()),
            Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
            None => anyhow::bail!("FakeContainerRunner got an unexpected call"),
        }
    }

    fn kill_active(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_runner_replays_configured_response() {
        let runner = FakeContainerRunner::new();
        runner.push_err("boom");
        let result = runner.run_live_build(Path::new("/tmp"), Path::new("/tmp/log"), None);
        assert!(result.is_err());
        assert_eq!(runner.calls().len(), 1);
    }
}
