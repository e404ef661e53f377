use std::{path::Path, process::Command};

use anyhow::{Context, Error};

/// Returns whether `path` is currently a mount point, using `mountpoint -q`.
pub fn check_is_mountpoint(path: impl AsRef<Path>) -> Result<bool, Error> {
    let status = Command::new("mountpoint")
        .arg("-q")
        .arg(path.as_ref())
        .status()
        .with_context(|| format!("Failed to run mountpoint on '{}'", path.as_ref().display()))?;
    Ok(status.success())
}
