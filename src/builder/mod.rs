//! Live image construction: turns a [`crate::config::BuildConfig`] plus a
//! tree of component directories into a bootable ISO. Mirrors the unlock
//! chain's shape — a small state-carrying driver plus pure helper
//! functions doing the actual work — but runs forward instead of
//! verifying backward.

pub mod component;
mod proxy;
pub mod runner;
pub mod tar_util;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use bastion_api::blob::KeyInfos;
use bastion_api::constants::{LIVE_CONFIG_TAR_ENC, PRIVDATA_TAR_ENC};
use bastion_api::error::{BuilderError, ConfigurationError, InterruptedError};

use crate::config::BuildConfig;
pub use component::{BuildLayout, ComponentEnv};
pub use runner::{ContainerRunner, FakeContainerRunner, RealContainerRunner};

/// Cooperative cancellation flag shared with the caller. Checked between
/// every major build stage; once set, the active container is killed and
/// removed and the build returns [`InterruptedError`].
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ImageBuilder {
    sources_dir: PathBuf,
    build_dir: PathBuf,
    out_dir: PathBuf,
    config: BuildConfig,
    runner: Box<dyn ContainerRunner>,
    cancel: CancelToken,
}

impl ImageBuilder {
    pub fn new(
        sources_dir: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        config: BuildConfig,
    ) -> Self {
        Self::with_runner(
            sources_dir,
            build_dir,
            out_dir,
            config,
            Box::new(RealContainerRunner),
        )
    }

    pub fn with_runner(
        sources_dir: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
        config: BuildConfig,
        runner: Box<dyn ContainerRunner>,
    ) -> Self {
        Self {
            sources_dir: sources_dir.into(),
            build_dir: build_dir.into(),
            out_dir: out_dir.into(),
            config,
            runner,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Checks the cancellation flag, killing the active container and
    /// appending `Interrupted: ...` to `log_path` before bailing.
    fn check_cancelled(&self, log_path: &Path) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.runner.kill_active().ok();
            let reason = "build cancelled";
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
                use std::io::Write;
                let _ = writeln!(f, "Interrupted: {reason}");
            }
            anyhow::bail!(InterruptedError(reason.to_string()));
        }
        Ok(())
    }

    /// Runs the full build algorithm, returning the path to the produced
    /// ISO on success.
    pub fn build(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        let log_path = self.out_dir.join("live-build.log");
        let layout = BuildLayout::prepare(&self.build_dir)?;

        for component in &self.config.components {
            self.check_cancelled(&log_path)?;
            let component_dir = self.sources_dir.join(&component.path);
            let env = self.component_env(&component_dir);
            component::process_component(&component_dir, &component.name, &layout, &env)
                .with_context(|| format!("processing component '{}'", component.name))?;
        }

        self.check_cancelled(&log_path)?;
        self.seal_directories(&layout)?;

        self.check_cancelled(&log_path)?;
        self.write_keyinfos(&layout)?;

        self.check_cancelled(&log_path)?;
        finalize_iso_staging(&layout)?;

        self.check_cancelled(&log_path)?;
        validate_mount_not_restricted(&self.build_dir)?;

        let proxy = proxy::discover_proxy();

        self.check_cancelled(&log_path)?;
        self.runner
            .run_live_build(&self.build_dir, &log_path, proxy.as_deref())
            .map_err(|_| BuilderError::LiveBuildFailed {
                log_path: log_path.display().to_string(),
            })?;

        self.check_cancelled(&log_path)?;
        let raw_iso = find_produced_iso(&self.build_dir)?;
        let final_iso = post_process_iso(&raw_iso, &self.out_dir, self.config.build_type)?;
        Ok(final_iso)
    }

    fn component_env(&self, component_dir: &Path) -> ComponentEnv {
        ComponentEnv {
            sources_dir: self.sources_dir.clone(),
            build_dir: self.build_dir.clone(),
            build_data_file: self.build_dir.join("build-data.json"),
            component_dir: component_dir.to_path_buf(),
            component_blobs_dirs: vec![component_dir.join("blobs")],
            conf_dir: self.sources_dir.join("conf"),
            live_dir: self.build_dir.join("config/includes.chroot"),
            libs_dir: self.sources_dir.join("libs"),
            conf_data_file: self.sources_dir.join("conf/data.json"),
            privdata_dir: self.build_dir.join("config/includes.chroot/privdata"),
            l10n: self.config.l10n.clone(),
        }
    }

    fn device_public_key(&self) -> Result<Option<RsaPublicKey>> {
        let Some(path) = &self.config.device_public_key else {
            return Ok(None);
        };
        let pem = fs::read_to_string(path)
            .with_context(|| format!("reading device public key {}", path.display()))?;
        Ok(Some(
            RsaPublicKey::from_public_key_pem(&pem).context("parsing device public key")?,
        ))
    }

    /// Seals `<fs>/privdata/` and `<fs>/live-config/` into encrypted tar
    /// archives under the device public key, then removes the plaintext
    /// directories so they never ship inside the ISO.
    fn seal_directories(&self, layout: &BuildLayout) -> Result<()> {
        let pubkey = self.device_public_key()?;

        let privdata_dir = layout.fs_dir.join("privdata");
        if privdata_dir.exists() {
            let Some(pubkey) = &pubkey else {
                return Err(ConfigurationError::MissingDevicePublicKey(
                    "privdata".to_string(),
                )
                .into());
            };
            seal_dir(&privdata_dir, &layout.fs_dir, PRIVDATA_TAR_ENC, pubkey)?;
        }

        let live_config_dir = layout.fs_dir.join("live-config");
        if live_config_dir.exists() {
            if let Some(pubkey) = &pubkey {
                seal_dir(&live_config_dir, &layout.fs_dir, LIVE_CONFIG_TAR_ENC, pubkey)?;
            }
        }
        Ok(())
    }

    fn write_keyinfos(&self, layout: &BuildLayout) -> Result<()> {
        let infos = KeyInfos {
            version: self.config.version.clone(),
            valid_from: self.config.valid_from,
            valid_to: self.config.valid_to,
            build_id: self.config.build_id.clone(),
            build_type: self.config.build_type,
            l10n: self.config.l10n.clone(),
        };
        let json = serde_json::to_vec_pretty(&infos)?;

        let internal_path = layout.fs_dir.join("opt/share/keyinfos.json");
        if let Some(parent) = internal_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&internal_path, &json)?;

        if let Some(parent) = self.config.image_infos_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config.image_infos_file, &json)?;
        Ok(())
    }
}

fn seal_dir(src: &Path, fs_dir: &Path, enc_name: &str, pubkey: &RsaPublicKey) -> Result<()> {
    let tar_bytes = tar_util::deterministic_tar(src, false)?;
    let enc = bastion_crypto::asym::asym_encrypt(pubkey, &tar_bytes)?;
    let dest = fs_dir.join(enc_name.trim_start_matches('/'));
    fs::write(&dest, enc)?;
    fs::remove_dir_all(src)?;
    Ok(())
}

/// Rejects a build directory mounted `noexec` or `nodev`: `live-build`
/// needs to execute hooks and create device nodes under it.
fn validate_mount_not_restricted(build_dir: &Path) -> Result<()> {
    let mounts = fs::read_to_string("/proc/mounts").unwrap_or_default();
    let build_dir = fs::canonicalize(build_dir).unwrap_or_else(|_| build_dir.to_path_buf());

    let mut best_match: Option<(&str, &str)> = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mountpoint), Some(_fstype), Some(options)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if build_dir.starts_with(mountpoint)
            && best_match.map(|(mp, _)| mountpoint.len() > mp.len()).unwrap_or(true)
        {
            best_match = Some((mountpoint, options));
        }
    }

    if let Some((_, options)) = best_match {
        if options.split(',').any(|o| o == "noexec" || o == "nodev") {
            return Err(BuilderError::MountRestricted.into());
        }
    }
    Ok(())
}

fn find_produced_iso(build_dir: &Path) -> Result<PathBuf> {
    for entry in fs::read_dir(build_dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(|e| e.to_str()) == Some("iso") {
            return Ok(entry.path());
        }
    }
    anyhow::bail!(
        "no .iso produced in {}",
        build_dir.display()
    )
}

/// Filenames kept under `live/` on the produced ISO; everything else
/// there is build-time debris (manifests, package lists) not needed to
/// boot.
const ESSENTIAL_LIVE_FILES: &[&str] = &["filesystem.squashfs", "initrd.img", "vmlinuz"];

/// Finalizes `binary_dir/isolinux/live.cfg` and `binary_dir/live/` before
/// `live-build` bakes them unmodified onto the produced ISO's root. Does
/// not touch the initrd or the ISO itself: extracting/repacking those
/// needs a genisoimage/squashfs toolchain this crate doesn't carry, so
/// that part of the pipeline is left undone (see [`post_process_iso`]).
fn finalize_iso_staging(layout: &BuildLayout) -> Result<()> {
    strip_isolinux_marker(&layout.binary_dir.join("isolinux/live.cfg"))?;
    prune_live_directory(&layout.binary_dir.join("live"))?;
    Ok(())
}

/// Truncates `live.cfg` at the first line starting with `#INSECA`,
/// dropping that line and everything after it. A no-op if the file
/// doesn't exist yet (no component staged isolinux customization).
fn strip_isolinux_marker(conf_file: &Path) -> Result<()> {
    let Ok(contents) = fs::read_to_string(conf_file) else {
        return Ok(());
    };
    let kept: Vec<&str> = contents
        .lines()
        .take_while(|line| !line.starts_with("#INSECA"))
        .collect();
    fs::write(conf_file, kept.join("\n"))
        .with_context(|| format!("rewriting {}", conf_file.display()))
}

/// Deletes everything under `live_dir` except [`ESSENTIAL_LIVE_FILES`].
/// A no-op if the directory doesn't exist.
fn prune_live_directory(live_dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(live_dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if ESSENTIAL_LIVE_FILES.iter().any(|f| *f == name.to_string_lossy()) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// ISO post-processing: set the volume label matching the build type.
/// [`finalize_iso_staging`] already stripped the isolinux marker and
/// pruned `live/` before `live-build` ran, so this only renames the
/// produced artifact; extracting the ISO to patch the initrd, rebuild
/// it, and replace the grub splash is out of scope without the
/// genisoimage/squashfs toolchain available to this crate.
fn post_process_iso(raw_iso: &Path, out_dir: &Path, build_type: bastion_api::blob::BuildType) -> Result<PathBuf> {
    let label = build_type.iso_volume_label();
    let dest = out_dir.join(format!("{label}.iso"));
    fs::copy(raw_iso, &dest)
        .with_context(|| format!("copying {} to {}", raw_iso.display(), dest.display()))?;
    Ok(dest)
}
