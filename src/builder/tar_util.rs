//! Deterministic tar round-tripping: every structural directory
//! (`_<name>`), `live-config/` tree, and sealed archive passes through
//! this so two builds from identical inputs produce byte-identical tar
//! bytes, independent of directory-walk order or the host's mtime clock.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

fn collect_relative_paths(root: &Path, dereference: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_relative_paths_into(root, Path::new(""), dereference, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect_relative_paths_into(
    root: &Path,
    rel: &Path,
    dereference: bool,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    let dir = root.join(rel);
    for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let entry_rel = rel.join(entry.file_name());
        let meta = if dereference {
            fs::metadata(entry.path())?
        } else {
            fs::symlink_metadata(entry.path())?
        };
        out.push(entry_rel.clone());
        if meta.is_dir() {
            collect_relative_paths_into(root, &entry_rel, dereference, out)?;
        }
    }
    Ok(())
}

/// Tars `root`'s contents (not `root` itself) in lexicographic path order,
/// with fixed uid/gid/mtime so the archive bytes are reproducible across
/// runs. `dereference` controls whether symlinks are followed (overlay
/// steps want `false`; structural-dir expansion has no symlinks to worry
/// about either way).
pub fn deterministic_tar(root: &Path, dereference: bool) -> Result<Vec<u8>> {
    let entries = collect_relative_paths(root, dereference)?;
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        for rel in &entries {
            let full = root.join(rel);
            let meta = if dereference {
                fs::metadata(&full)?
            } else {
                fs::symlink_metadata(&full)?
            };
            let mut header = tar::Header::new_gnu();
            header.set_mode(meta.permissions().mode());
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(0);

            if meta.is_dir() {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, rel, std::io::empty())?;
            } else if meta.file_type().is_symlink() {
                let target = fs::read_link(&full)?;
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_cksum();
                builder.append_link(&mut header, rel, &target)?;
            } else {
                let content = fs::read(&full)?;
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(content.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, rel, &content[..])?;
            }
        }
        builder.finish()?;
    }
    Ok(buf)
}

/// Unpacks tar bytes produced by [`deterministic_tar`] (or any tar
/// archive) into `dest`, creating it if needed.
pub fn untar(bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(bytes);
    archive.unpack(dest)?;
    Ok(())
}

/// Round-trips `src` through a tar archive into `dest`, the pattern used
/// to expand `_<name>` structural directories and overlay component
/// trees without depending on the host's own copy semantics.
pub fn tar_round_trip(src: &Path, dest: &Path, dereference: bool) -> Result<()> {
    let bytes = deterministic_tar(src, dereference)?;
    untar(&bytes, dest)
}

/// `true` if `meta` belongs to the owning uid (used by ownership checks
/// elsewhere in the builder; kept here since it shares the `MetadataExt`
/// import).
pub fn owned_by(meta: &fs::Metadata, uid: u32) -> bool {
    meta.uid() == uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn round_trip_preserves_file_contents() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"world").unwrap();

        let dest = tempfile::tempdir().unwrap();
        tar_round_trip(src.path(), dest.path(), false).unwrap();

        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dest.path().join("sub/b.txt")).unwrap(), b"world");
    }

    #[test]
    fn identical_inputs_produce_identical_tar_bytes() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("z.txt"), b"last").unwrap();
        fs::write(src.path().join("a.txt"), b"first").unwrap();

        let first = deterministic_tar(src.path(), false).unwrap();
        let second = deterministic_tar(src.path(), false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn entries_are_in_lexicographic_order() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("z.txt"), b"last").unwrap();
        fs::write(src.path().join("a.txt"), b"first").unwrap();

        let bytes = deterministic_tar(src.path(), false).unwrap();
        let mut archive = tar::Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "z.txt".to_string()]);
    }
}
