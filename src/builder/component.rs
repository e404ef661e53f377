//! Per-component processing: the inner loop of the image builder,
//! run once per declared component in declaration order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use osutils::exe::RunAndCheck;

use super::tar_util::tar_round_trip;

/// Paths the builder prepares once, shared across every component.
pub struct BuildLayout {
    /// Root of the live-build invocation directory.
    pub build_dir: PathBuf,
    /// `config/package-lists`.
    pub lists_dir: PathBuf,
    /// `config/packages.chroot`, where loose `.deb` files land.
    pub packages_dir: PathBuf,
    /// `config/includes.chroot`, overlaid onto the live filesystem root.
    /// Referred to as `<fs>` in the algorithm description.
    pub fs_dir: PathBuf,
    /// `config/includes.binary`: files here land unmodified at the
    /// corresponding path on the produced ISO's root, so `isolinux/` and
    /// `live/` can be finalized here before `live-build` ever runs.
    pub binary_dir: PathBuf,
}

impl BuildLayout {
    pub fn prepare(build_dir: impl Into<PathBuf>) -> Result<Self> {
        let build_dir = build_dir.into();
        let lists_dir = build_dir.join("config/package-lists");
        let packages_dir = build_dir.join("config/packages.chroot");
        let fs_dir = build_dir.join("config/includes.chroot");
        let binary_dir = build_dir.join("config/includes.binary");
        for dir in [&lists_dir, &packages_dir, &fs_dir, &binary_dir] {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(Self {
            build_dir,
            lists_dir,
            packages_dir,
            fs_dir,
            binary_dir,
        })
    }
}

/// Fixed environment variables handed to a component's `prepare.sh`/
/// `prepare.py`, per the process-environment contract.
pub struct ComponentEnv {
    pub sources_dir: PathBuf,
    pub build_dir: PathBuf,
    pub build_data_file: PathBuf,
    pub component_dir: PathBuf,
    pub component_blobs_dirs: Vec<PathBuf>,
    pub conf_dir: PathBuf,
    pub live_dir: PathBuf,
    pub libs_dir: PathBuf,
    pub conf_data_file: PathBuf,
    pub privdata_dir: PathBuf,
    pub l10n: std::collections::BTreeMap<String, String>,
}

impl ComponentEnv {
    fn apply(&self, cmd: &mut std::process::Command) {
        cmd.env("SOURCES_DIR", &self.sources_dir);
        cmd.env("BUILD_DIR", &self.build_dir);
        cmd.env("BUILD_DATA_FILE", &self.build_data_file);
        cmd.env("COMPONENT_DIR", &self.component_dir);
        cmd.env(
            "COMPONENT_BLOBS_DIR",
            self.component_blobs_dirs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join("|"),
        );
        cmd.env("CONF_DIR", &self.conf_dir);
        cmd.env("LIVE_DIR", &self.live_dir);
        cmd.env("LIBS_DIR", &self.libs_dir);
        cmd.env("CONF_DATA_FILE", &self.conf_data_file);
        cmd.env("PRIVDATA_DIR", &self.privdata_dir);
        for (k, v) in &self.l10n {
            cmd.env(format!("L10N_{}", k.to_uppercase()), v);
        }
    }
}

fn is_structural_dir(entry: &std::fs::DirEntry) -> bool {
    entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
        && entry.file_name().to_string_lossy().starts_with('_')
}

/// Runs the full per-component algorithm against an already-prepared
/// [`BuildLayout`].
pub fn process_component(
    component_dir: &Path,
    name: &str,
    layout: &BuildLayout,
    env: &ComponentEnv,
) -> Result<()> {
    expand_structural_dirs(component_dir, &layout.build_dir)?;
    copy_packages_list(component_dir, name, &layout.lists_dir)?;
    copy_debs(component_dir, &layout.packages_dir)?;
    expand_live_config(component_dir, name, &layout.fs_dir)?;
    overlay_remaining(component_dir, &layout.fs_dir)?;
    run_prepare_script(component_dir, env)?;
    Ok(())
}

fn expand_structural_dirs(component_dir: &Path, livedir: &Path) -> Result<()> {
    let entries = match fs::read_dir(component_dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        if is_structural_dir(&entry) {
            let name = entry.file_name();
            let stripped = name.to_string_lossy().trim_start_matches('_').to_string();
            let dest = livedir.join(stripped);
            fs::create_dir_all(&dest)?;
            tar_round_trip(&entry.path(), &dest, true)?;
        }
    }
    Ok(())
}

fn copy_packages_list(component_dir: &Path, name: &str, lists_dir: &Path) -> Result<()> {
    let src = component_dir.join("packages.list");
    if src.exists() {
        fs::copy(&src, lists_dir.join(format!("{name}.list.chroot")))?;
    }
    Ok(())
}

fn copy_debs(component_dir: &Path, packages_dir: &Path) -> Result<()> {
    let debs_dir = component_dir.join("packages.deb");
    if !debs_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&debs_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("deb") {
            continue;
        }
        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let dest_name = if stem.ends_with("_amd64") {
            format!("{stem}.deb")
        } else {
            format!("{stem}_amd64.deb")
        };
        fs::copy(&path, packages_dir.join(dest_name))?;
    }
    Ok(())
}

fn expand_live_config(component_dir: &Path, name: &str, fs_dir: &Path) -> Result<()> {
    let src = component_dir.join("live-config");
    if !src.exists() {
        return Ok(());
    }
    let dest = fs_dir.join("live-config").join(name);
    fs::create_dir_all(&dest)?;
    tar_round_trip(&src, &dest, true)
}

const RESERVED_ENTRIES: &[&str] = &[
    "packages.list",
    "packages.deb",
    "live-config",
    "prepare.sh",
    "prepare.py",
    "config.json",
];

fn overlay_remaining(component_dir: &Path, fs_dir: &Path) -> Result<()> {
    let entries = match fs::read_dir(component_dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with('_') || RESERVED_ENTRIES.contains(&name.as_ref()) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            let dest = fs_dir.join(&*name);
            fs::create_dir_all(&dest)?;
            tar_round_trip(&entry.path(), &dest, false)?;
        }
    }
    Ok(())
}

fn run_prepare_script(component_dir: &Path, env: &ComponentEnv) -> Result<()> {
    let sh = component_dir.join("prepare.sh");
    let py = component_dir.join("prepare.py");
    if sh.exists() {
        let mut cmd = std::process::Command::new("/bin/bash");
        cmd.arg(&sh).current_dir(component_dir);
        env.apply(&mut cmd);
        cmd.run_and_check()
            .with_context(|| format!("running {}", sh.display()))?;
    } else if py.exists() {
        let mut cmd = std::process::Command::new("/usr/bin/python3");
        cmd.arg(&py).current_dir(component_dir);
        env.apply(&mut cmd);
        cmd.run_and_check()
            .with_context(|| format!("running {}", py.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_list_is_copied_with_component_name() {
        let component = tempfile::tempdir().unwrap();
        fs::write(component.path().join("packages.list"), b"vim\ncurl\n").unwrap();
        let lists = tempfile::tempdir().unwrap();

        copy_packages_list(component.path(), "base", lists.path()).unwrap();
        assert_eq!(
            fs::read(lists.path().join("base.list.chroot")).unwrap(),
            b"vim\ncurl\n"
        );
    }

    #[test]
    fn debs_are_renamed_to_end_in_amd64() {
        let component = tempfile::tempdir().unwrap();
        fs::create_dir(component.path().join("packages.deb")).unwrap();
        fs::write(component.path().join("packages.deb/tool_1.0.deb"), b"pkg").unwrap();
        let packages_dir = tempfile::tempdir().unwrap();

        copy_debs(component.path(), packages_dir.path()).unwrap();
        assert!(packages_dir.path().join("tool_1.0_amd64.deb").exists());
    }

    #[test]
    fn structural_dir_is_expanded_with_underscore_stripped() {
        let component = tempfile::tempdir().unwrap();
        fs::create_dir_all(component.path().join("_scripts")).unwrap();
        fs::write(component.path().join("_scripts/hook.sh"), b"#!/bin/sh\n").unwrap();
        let livedir = tempfile::tempdir().unwrap();

        expand_structural_dirs(component.path(), livedir.path()).unwrap();
        assert!(livedir.path().join("scripts/hook.sh").exists());
    }

    #[test]
    fn overlay_skips_reserved_entries() {
        let component = tempfile::tempdir().unwrap();
        fs::write(component.path().join("packages.list"), b"x").unwrap();
        fs::create_dir_all(component.path().join("etc/bastion")).unwrap();
        fs::write(component.path().join("etc/bastion/conf"), b"y").unwrap();
        let fs_dir = tempfile::tempdir().unwrap();

        overlay_remaining(component.path(), fs_dir.path()).unwrap();
        assert!(fs_dir.path().join("etc/bastion/conf").exists());
        assert!(!fs_dir.path().join("packages.list").exists());
    }
}
