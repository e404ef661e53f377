use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Error};

use crate::exe::RunAndCheck;

/// Retrieves the symlink for a given block device in '/dev/disk/by-path'.
pub fn block_device_by_path(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    find_symlink_for_target(path.as_ref(), Path::new("/dev/disk/by-path"))
}

/// Returns the path of the first symlink in directory whose canonical path is target.
pub fn find_symlink_for_target(
    target: impl AsRef<Path>,
    directory: impl AsRef<Path>,
) -> Result<PathBuf, Error> {
    let target_canonicalized = target.as_ref().canonicalize().context(format!(
        "Failed to canonicalize target path '{}'",
        target.as_ref().display()
    ))?;

    fs::read_dir(directory.as_ref())?
        .flatten()
        .filter(|f| {
            f.file_type()
                .ok()
                .map(|t| t.is_symlink())
                .unwrap_or_default()
        })
        .map(|entry| entry.path())
        .filter(|path| {
            path.canonicalize()
                .map(|p| target_canonicalized == p)
                .unwrap_or_default()
        })
        .min()
        .context(format!(
            "Failed to find symlink for '{}' in directory '{}'",
            target.as_ref().display(),
            directory.as_ref().display()
        ))
}

/// Force kernel to re-read the partition table of a disk with partx.
pub fn partx_update(disk: impl AsRef<Path>) -> Result<(), Error> {
    Command::new("partx")
        .arg("--update")
        .arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to re-read partition table for disk '{}'",
                disk.as_ref().display()
            )
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_symlink_for_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().canonicalize().unwrap();
        let symlink = temp_dir.path().join("symlink");
        std::os::unix::fs::symlink(&target, &symlink).unwrap();
        assert_eq!(
            find_symlink_for_target(&target, temp_dir.path()).unwrap(),
            symlink
        );
    }

    #[test]
    fn test_find_symlink_for_target_fail_no_symlink() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().canonicalize().unwrap();
        let temp_dir2 = tempfile::tempdir().unwrap();
        assert!(find_symlink_for_target(&target, temp_dir2.path()).is_err());
    }
}
