//! Abstract interface over a block device carrying the five fixed
//! partitions. Mount, unmount, partition-secret, and metadata-signature
//! verification all live here so that the rest of the crate never issues
//! a shell-out of its own.

pub mod runner;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bastion_api::error::DeviceError;
use bastion_api::role::{LabelType, PartitionRole, SecretKind};
use osutils::mount;
use osutils::sfdisk::SfDisk;
use sysdefs::filesystems::KnownFilesystemType;

pub use runner::{FakeRunner, RealRunner, SystemRunner};

/// Describes one named metadata-signature verifier passed to
/// `Device::verify`: `{ type: "key", public_key_file: <path> }`.
pub struct Verifier {
    pub public_key_file: PathBuf,
}

impl Verifier {
    pub fn key(public_key_file: impl Into<PathBuf>) -> Self {
        Self {
            public_key_file: public_key_file.into(),
        }
    }
}

pub struct Device {
    devfile: PathBuf,
    label_type: LabelType,
    runner: Box<dyn SystemRunner>,
    /// Prefix prepended to a role's well-known mountpoint when resolving
    /// it, so tests can point a whole device's mount tree at a
    /// `tempfile::tempdir()` instead of the real `/run/bastion`, `/internal`,
    /// `/data`. `None` in production: roles mount at their real fixed paths.
    mount_root: Option<PathBuf>,
    /// Directories we mounted ourselves and should unmount on `Drop`
    /// unless the caller opted out with `auto_umount = false`.
    guards: Vec<PathBuf>,
}

impl Drop for Device {
    fn drop(&mut self) {
        for dir in &self.guards {
            let dir_str = dir.display().to_string();
            if let Err(e) = self.runner.run("umount", &[dir_str.as_str()]) {
                log::info!("failed to unmount directory {}: {e}", dir.display());
            }
        }
    }
}

impl Device {
    pub fn new(devfile: impl Into<PathBuf>, label_type: LabelType) -> Self {
        Self::with_runner(devfile, label_type, Box::new(RealRunner))
    }

    pub fn with_runner(
        devfile: impl Into<PathBuf>,
        label_type: LabelType,
        runner: Box<dyn SystemRunner>,
    ) -> Self {
        Self {
            devfile: devfile.into(),
            label_type,
            runner,
            mount_root: None,
            guards: Vec::new(),
        }
    }

    /// Like [`Self::with_runner`], but every role's default mountpoint
    /// resolves under `mount_root` instead of its real fixed system path.
    /// For tests exercising a full device's mount tree under a
    /// `tempfile::tempdir()`.
    pub fn with_runner_and_root(
        devfile: impl Into<PathBuf>,
        label_type: LabelType,
        runner: Box<dyn SystemRunner>,
        mount_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            devfile: devfile.into(),
            label_type,
            runner,
            mount_root: Some(mount_root.into()),
            guards: Vec::new(),
        }
    }

    pub fn devfile(&self) -> &Path {
        &self.devfile
    }

    pub fn label_type(&self) -> LabelType {
        self.label_type
    }

    /// Resolves `role`'s default mountpoint: its real fixed system path,
    /// or that path rebased under [`Self::mount_root`] if one was given.
    pub fn resolve_mountpoint(&self, role: PartitionRole) -> PathBuf {
        match &self.mount_root {
            Some(root) => root.join(role.mountpoint().trim_start_matches('/')),
            None => PathBuf::from(role.mountpoint()),
        }
    }

    /// Maps a role to its fixed 1-based partition number: the five roles
    /// are laid out on the device in `PartitionRole` declaration order.
    pub fn partition_number(role: PartitionRole) -> u8 {
        match role {
            PartitionRole::Dummy => 1,
            PartitionRole::Efi => 2,
            PartitionRole::Live => 3,
            PartitionRole::Internal => 4,
            PartitionRole::Data => 5,
        }
    }

    /// Resolves the partition device node for a role, handling the
    /// `pN` suffix convention used by nvme/loop/mmcblk devices whose base
    /// name already ends in a digit.
    pub fn partition_node(&self, role: PartitionRole) -> PathBuf {
        partition_node_for(&self.devfile, Self::partition_number(role))
    }

    /// Mounts `role` at `mountpoint` (defaulting to the role's well-known
    /// mountpoint) with `options`. The returned guard unmounts on drop
    /// unless `auto_umount` is false, per spec: `internal` during unlock
    /// is deliberately retained past the operation.
    pub fn mount(
        &mut self,
        role: PartitionRole,
        mountpoint: Option<&Path>,
        filesystem: Option<&KnownFilesystemType>,
        options: &[String],
        auto_umount: bool,
    ) -> Result<(), DeviceError> {
        let default_mp = self.resolve_mountpoint(role);
        let mp = mountpoint.unwrap_or(&default_mp);
        mount::ensure_mount_directory(mp).map_err(|e| DeviceError::FsOpFailure(e.to_string()))?;

        let node = self.partition_node(role);
        let args = mount_args(&node, mp, filesystem, options);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner
            .run("mount", &arg_refs)
            .map_err(|e| DeviceError::MountFailure(e.to_string()))?;

        if auto_umount {
            self.guards.push(mp.to_path_buf());
        }
        Ok(())
    }

    pub fn umount(&self, role: PartitionRole) -> Result<(), DeviceError> {
        let mp = self.resolve_mountpoint(role).display().to_string();
        self.runner
            .run("umount", &[mp.as_str()])
            .map_err(|e| DeviceError::MountFailure(e.to_string()))?;
        Ok(())
    }

    /// Opens the LUKS-style container on `role` with `secret`, so a
    /// subsequent `mount` succeeds.
    pub fn set_partition_secret(
        &self,
        role: PartitionRole,
        kind: SecretKind,
        secret: &str,
    ) -> Result<(), DeviceError> {
        let SecretKind::LuksPassphrase = kind;
        let node = self.partition_node(role).display().to_string();
        let mapper_name = format!("bastion-{role}");
        self.runner
            .run_with_stdin(
                "cryptsetup",
                &["luksOpen", "--key-file=-", &node, &mapper_name],
                secret.as_bytes(),
            )
            .map_err(|e| DeviceError::FsOpFailure(e.to_string()))?;
        Ok(())
    }

    pub fn get_partition_filesystem(
        &self,
        role: PartitionRole,
    ) -> Result<KnownFilesystemType, DeviceError> {
        let node = self.partition_node(role).display().to_string();
        let out = self
            .runner
            .run("blkid", &["-o", "value", "-s", "TYPE", &node])
            .map_err(|e| DeviceError::FsOpFailure(e.to_string()))?;
        Ok(KnownFilesystemType::from_blkid_type(out.trim()))
    }

    pub fn get_partitions_layout(&self) -> Result<SfDisk, DeviceError> {
        SfDisk::get_info(&self.devfile).map_err(|e| DeviceError::FsOpFailure(e.to_string()))
    }

    pub fn compute_inter_partitions_hash(&self) -> anyhow::Result<bastion_crypto::hash::Sha256Hash> {
        let layout = self
            .get_partitions_layout()
            .map_err(|e| anyhow::anyhow!(e))?;
        crate::fingerprint::gap::compute_gap_hash(&self.devfile, &layout, self.label_type)
    }

    /// Verifies every named signature verifier against the device's
    /// signed metadata. Any failure here — missing file, unreadable key,
    /// or a bad signature — is deliberately undifferentiated: callers
    /// fold it into a single integrity failure.
    pub fn verify(&self, verifiers: &BTreeMap<String, Verifier>) -> anyhow::Result<()> {
        let mountpoint = self.resolve_mountpoint(PartitionRole::Dummy);
        let metadata = fs::read(mountpoint.join("resources/metadata.json"))?;
        let signature = fs::read(mountpoint.join("resources/metadata.sig"))?;
        for (name, verifier) in verifiers {
            let pem = fs::read_to_string(&verifier.public_key_file)?;
            crate::fingerprint::signature::verify_detached(&pem, &metadata, &signature)
                .map_err(|_| anyhow::anyhow!("verifier '{name}' rejected device metadata"))?;
        }
        Ok(())
    }
}

/// Builds the argv for a `mount` invocation: `-o` options (with `loop`
/// auto-added for file-backed devices), `-t` filesystem, then source and
/// target. Pure so it can be unit-tested without a runner.
fn mount_args(
    node: &Path,
    mountpoint: &Path,
    filesystem: Option<&KnownFilesystemType>,
    options: &[String],
) -> Vec<String> {
    let mut options = options.to_owned();
    if node.is_file() {
        options.push("loop".to_string());
    }

    let mut args = Vec::new();
    if !options.is_empty() {
        args.push("-o".to_string());
        args.push(options.join(","));
    }
    if let Some(filesystem) = filesystem {
        args.push("-t".to_string());
        args.push(fs_name(filesystem));
    }
    args.push(node.display().to_string());
    args.push(mountpoint.display().to_string());
    args
}

fn fs_name(filesystem: &KnownFilesystemType) -> String {
    match filesystem {
        KnownFilesystemType::Other(s) => s.clone(),
        other => format!("{other:?}").to_lowercase(),
    }
}

/// Pure helper: appends `p{n}` for device names ending in a digit
/// (`nvme0n1`, `loop0`, `mmcblk0`), otherwise plain `{n}` (`sda`, `sdb`).
fn partition_node_for(devfile: &Path, number: u8) -> PathBuf {
    let name = devfile.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ends_in_digit = name.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false);
    let suffix = if ends_in_digit {
        format!("p{number}")
    } else {
        number.to_string()
    };
    let mut path = devfile.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_node_for_sd_device() {
        assert_eq!(
            partition_node_for(Path::new("/dev/sdb"), 3),
            PathBuf::from("/dev/sdb3")
        );
    }

    #[test]
    fn partition_node_for_nvme_device() {
        assert_eq!(
            partition_node_for(Path::new("/dev/nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
    }

    #[test]
    fn partition_node_for_loop_device() {
        assert_eq!(
            partition_node_for(Path::new("/dev/loop0"), 5),
            PathBuf::from("/dev/loop0p5")
        );
    }

    #[test]
    fn partition_numbers_match_fixed_order() {
        assert_eq!(Device::partition_number(PartitionRole::Dummy), 1);
        assert_eq!(Device::partition_number(PartitionRole::Data), 5);
    }

    #[test]
    fn mount_args_adds_options_and_filesystem() {
        let args = mount_args(
            Path::new("/dev/sdb1"),
            Path::new("/mnt/data"),
            Some(&KnownFilesystemType::Vfat),
            &["nodev".to_string(), "x-gvfs-hide".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "-o".to_string(),
                "nodev,x-gvfs-hide".to_string(),
                "-t".to_string(),
                "vfat".to_string(),
                "/dev/sdb1".to_string(),
                "/mnt/data".to_string(),
            ]
        );
    }

    #[test]
    fn mount_and_umount_route_through_runner() {
        let runner = FakeRunner::new();
        runner.push_ok("");
        runner.push_ok("");
        let mut device = Device::with_runner("/dev/sdb", LabelType::Gpt, Box::new(runner));

        let tmp = tempfile::tempdir().unwrap();
        device
            .mount(PartitionRole::Dummy, Some(tmp.path()), None, &[], false)
            .unwrap();
        device.umount(PartitionRole::Dummy).unwrap();
    }
}
