//! The formatting operation's own shell-out seam. Deliberately thin and
//! swappable, same shape as [`crate::device::runner::SystemRunner`]:
//! which concrete tool builds a LUKS container or a filesystem is not
//! something the core key-chain logic should know about.

use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result};
use osutils::exe::{OutputChecker, RunAndCheck};
use sysdefs::filesystems::KnownFilesystemType;

pub trait FormattingBackend: Send + Sync {
    /// Initializes a LUKS container on `partition` with `passphrase`,
    /// optionally pinning a LUKS format version (`"luks1"`/`"luks2"`).
    fn luks_format(&self, partition: &Path, passphrase: &str, enctype: Option<&str>) -> Result<()>;

    /// Builds `fs` on the already-open mapper device at `mapper_path`.
    fn mkfs(&self, mapper_path: &Path, fs: &KnownFilesystemType) -> Result<()>;
}

pub struct RealFormattingBackend;

impl FormattingBackend for RealFormattingBackend {
    fn luks_format(&self, partition: &Path, passphrase: &str, enctype: Option<&str>) -> Result<()> {
        use std::io::Write;
        use std::process::Stdio;

        let mut cmd = Command::new("cryptsetup");
        cmd.arg("luksFormat").arg("--batch-mode");
        if let Some(enctype) = enctype {
            cmd.arg("--type").arg(enctype);
        }
        cmd.arg("--key-file=-").arg(partition);

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn cryptsetup for {}", partition.display()))?;
        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(passphrase.as_bytes())
            .context("failed to write passphrase to cryptsetup")?;
        child
            .wait_with_output()
            .context("failed to wait for cryptsetup")?
            .check()
            .with_context(|| format!("luksFormat failed for {}", partition.display()))
    }

    fn mkfs(&self, mapper_path: &Path, fs: &KnownFilesystemType) -> Result<()> {
        Command::new(mkfs_program(fs))
            .arg(mapper_path)
            .run_and_check()
            .with_context(|| format!("mkfs failed for {}", mapper_path.display()))
    }
}

fn mkfs_program(fs: &KnownFilesystemType) -> String {
    match fs {
        KnownFilesystemType::Other(name) => format!("mkfs.{name}"),
        KnownFilesystemType::Vfat | KnownFilesystemType::Msdos => "mkfs.vfat".to_string(),
        other => format!("mkfs.{}", format!("{other:?}").to_lowercase()),
    }
}

/// Records every call it receives and returns canned responses in order,
/// same contract as the device and builder fakes.
#[derive(Default)]
pub struct FakeFormattingBackend {
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<Result<(), String>>>,
}

impl FakeFormattingBackend {
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

impl FormattingBackend for FakeFormattingBackend {
    fn luks_format(&self, partition: &Path, _passphrase: &str, _enctype: Option<&str>) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("luks_format {}", partition.display()));
        match self.responses.lock().unwrap().pop() {
            Some(Ok(())) => Ok(()),
            Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
            None => anyhow::bail!("FakeFormattingBackend got an unexpected call"),
        }
    }

    fn mkfs(&self, mapper_path: &Path, fs: &KnownFilesystemType) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("mkfs {} {mkfs_program}", mapper_path.display(), mkfs_program = mkfs_program(fs)));
        match self.responses.lock().unwrap().pop() {
            Some(Ok(())) => Ok(()),
            Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
            None => anyhow::bail!("FakeFormattingBackend got an unexpected call"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkfs_program_for_vfat() {
        assert_eq!(mkfs_program(&KnownFilesystemType::Vfat), "mkfs.vfat");
    }

    #[test]
    fn mkfs_program_for_ext4() {
        assert_eq!(mkfs_program(&KnownFilesystemType::Ext4), "mkfs.ext4");
    }

    #[test]
    fn fake_backend_replays_configured_response() {
        let backend = FakeFormattingBackend::new();
        backend.push_err("boom");
        assert!(backend
            .luks_format(Path::new("/dev/sda4"), "pw", None)
            .is_err());
        assert_eq!(backend.calls().len(), 1);
    }
}
