use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use osutils::exe::RunAndCheck;

/// The single seam between the device abstraction and the host's shell-out
/// surface: `mount`, `umount`, `cryptsetup`, `blkid`. Every external
/// command a `Device` runs goes through here, so tests can substitute
/// [`FakeRunner`] instead of touching a real block device.
pub trait SystemRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Like `run`, but pipes `stdin` to the child. Used for `cryptsetup
    /// --key-file=-` so a secret never touches argv or an intermediate
    /// file.
    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> Result<String>;
}

pub struct RealRunner;

impl SystemRunner for RealRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        Command::new(program)
            .args(args)
            .output_and_check()
            .with_context(|| format!("failed to run {program} {}", args.join(" ")))
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(stdin)
            .with_context(|| format!("failed to write stdin to {program}"))?;
        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for {program}"))?;
        output
            .check_output()
            .with_context(|| format!("{program} {} failed", args.join(" ")))
    }
}

/// Records every call it receives and returns canned responses in order.
/// Test doubles that don't configure a response for a call fail loudly
/// rather than silently succeeding.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    responses: Mutex<Vec<Result<String, String>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response to be returned on the next call, in order.
    pub fn push_ok(&self, stdout: impl Into<String>) {
        self.responses.lock().unwrap().insert(0, Ok(stdout.into()));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(0, Err(message.into()));
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SystemRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        self.calls.lock().unwrap().push((
            program.to_string(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        match self.responses.lock().unwrap().pop() {
            Some(Ok(out)) => Ok(out),
            Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
            None => bail!(
                "FakeRunner got an unexpected call: {program} {}",
                args.join(" ")
            ),
        }
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], _stdin: &[u8]) -> Result<String> {
        self.run(program, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_runner_replays_in_order() {
        let runner = FakeRunner::new();
        runner.push_ok("first");
        runner.push_ok("second");
        assert_eq!(runner.run("echo", &["a"]).unwrap(), "first");
        assert_eq!(runner.run("echo", &["b"]).unwrap(), "second");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn fake_runner_errors_on_unconfigured_call() {
        let runner = FakeRunner::new();
        assert!(runner.run("echo", &["a"]).is_err());
    }
}
