//! Process-wide unlock singleton, enforced with an advisory `flock` rather
//! than an in-memory instance registry: a second unlock attempt — same
//! process or another — must fail loudly instead of silently joining a
//! machine that might be mid-mount, since partial mount state is exactly
//! what the singleton exists to protect.

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use bastion_api::constants::UNLOCK_LOCK_FILE;

pub struct UnlockLock {
    _file: File,
}

impl UnlockLock {
    /// Acquires the singleton lock under `run_dir`, creating the
    /// directory if needed. Fails immediately (never blocks) if another
    /// unlock already holds it.
    pub fn acquire(run_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(run_dir)?;
        let path = run_dir.join(UNLOCK_LOCK_FILE);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            anyhow::bail!("another unlock is already in progress");
        }
        Ok(Self { _file: file })
    }
}
