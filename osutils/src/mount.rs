use std::fs;
use std::{path::Path, process::Command};

use anyhow::{bail, Context, Error};
use log::info;
use sysdefs::filesystems::KnownFilesystemType;

use crate::{exe::RunAndCheck, files};

/// Mounts file or block device in path to a dir mount_dir.
pub fn mount(
    path: impl AsRef<Path>,
    mount_dir: impl AsRef<Path>,
    filesystem: Option<&KnownFilesystemType>,
    options: &[String],
) -> Result<(), Error> {
    let mut options = options.to_owned();
    let mut command = Command::new("mount");

    if path.as_ref().is_file() {
        options.push("loop".into());
    }

    if !options.is_empty() {
        command.arg("-o").arg(options.join(","));
    }

    if let Some(filesystem) = filesystem {
        command.arg("-t").arg(fs_name(filesystem));
    }

    command
        .arg(path.as_ref())
        .arg(mount_dir.as_ref())
        .run_and_check()
        .context(format!(
            "Failed to mount {} to path {}",
            path.as_ref().display(),
            mount_dir.as_ref().display(),
        ))?;

    Ok(())
}

fn fs_name(filesystem: &KnownFilesystemType) -> String {
    match filesystem {
        KnownFilesystemType::Other(s) => s.clone(),
        other => format!("{other:?}").to_lowercase(),
    }
}

/// Unmounts given directory mount_dir.
pub fn umount(mount_dir: impl AsRef<Path>, recursive: bool) -> Result<(), Error> {
    let mut cmd = Command::new("umount");
    if recursive {
        cmd.arg("-R");
    }

    cmd.arg(mount_dir.as_ref())
        .run_and_check()
        .context(format!(
            "Failed to unmount directory {}",
            mount_dir.as_ref().display()
        ))
}

/// Automatically unmounts a directory when it goes out of scope. Used to
/// guarantee release of scoped mount acquisitions on error paths,
/// except for `internal` during unlock which opts out deliberately.
pub struct MountGuard<'a> {
    pub mount_dir: &'a Path,
}

impl<'a> Drop for MountGuard<'a> {
    fn drop(&mut self) {
        if let Err(e) = umount(self.mount_dir, false) {
            info!(
                "Failed to unmount directory {}: {}",
                self.mount_dir.display(),
                e
            );
        }
    }
}

/// Ensure that the target_path is a suitable path for a mount point
pub fn ensure_mount_directory(target_path: &Path) -> Result<(), Error> {
    if target_path.exists() {
        if !target_path.is_dir() {
            bail!("Mount path '{}' is not a directory", target_path.display());
        }
        if let Ok(entries) = fs::read_dir(target_path) {
            if entries.count() > 0 {
                bail!("Mount path '{}' is not empty", target_path.display());
            }
        }
    } else {
        files::create_dirs(target_path).context(format!(
            "Failed to create mount path '{}'",
            target_path.display()
        ))?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs::File;

    use tempfile::TempDir;

    #[test]
    fn test_ensure_mount_directory() {
        let temp_mount_dir = TempDir::new().unwrap();
        ensure_mount_directory(temp_mount_dir.path()).unwrap();

        let temp_mount_point_dir = temp_mount_dir.path().join("temp_dir");
        ensure_mount_directory(&temp_mount_point_dir).unwrap();
        assert!(temp_mount_point_dir.exists());

        assert_eq!(
            ensure_mount_directory(temp_mount_dir.path())
                .unwrap_err()
                .to_string(),
            format!(
                "Mount path '{}' is not empty",
                temp_mount_dir.path().display()
            )
        );

        let temp_mount_point_file = temp_mount_dir.path().join("temp_file");
        File::create(&temp_mount_point_file).unwrap();
        assert_eq!(
            ensure_mount_directory(&temp_mount_point_file)
                .unwrap_err()
                .to_string(),
            format!(
                "Mount path '{}' is not a directory",
                temp_mount_point_file.display()
            )
        );
    }
}
