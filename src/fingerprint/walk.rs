//! Ordered recursive content hashing with per-file ignore predicates.
//! Predicates are pure functions of `(root, relative)`; they read the
//! filesystem to decide, but never panic, and a missing file they
//! expected to exist is represented as a tamper signal rather than
//! silently skipped.

use std::fs;
use std::path::{Path, PathBuf};

use bastion_api::constants::{
    BLOB0_IGNORE_MAX_BYTES, BOOTPARAMS_NEIGHBORS, BOOTPARAMS_PATH, INTERNAL_PASS_IGNORE_MAX_BYTES,
};
use bastion_api::constants::resources;
use bastion_crypto::hash::{chain_hash, hash_bytes, Sha256Hash};

/// What the walker should do with one candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hash the file's relative path and content as usual.
    Hash,
    /// Skip the file entirely; it is expected to vary.
    Ignore,
    /// The file was expected to be ignorable but failed its equivalence
    /// check (missing or mismatched neighbor). Fold in a random value
    /// instead of the real content, so the resulting chain can never
    /// succeed — absence is a tamper signal, not a no-op.
    TamperSignal,
}

pub type IgnorePredicate = fn(&Path, &Path) -> Disposition;

/// Ignore predicate for the `dummy` partition: exempts
/// `resources/internal-pass.enc` and `resources/blob0.json` while they
/// stay under their respective size caps.
pub fn dummy_ignore(root: &Path, rel: &Path) -> Disposition {
    let rel_str = rel.to_string_lossy();
    let cap = if rel_str == resources::INTERNAL_PASS_ENC {
        Some(INTERNAL_PASS_IGNORE_MAX_BYTES)
    } else if rel_str == resources::BLOB0 {
        Some(BLOB0_IGNORE_MAX_BYTES)
    } else {
        None
    };
    match cap {
        Some(max_bytes) => match fs::metadata(root.join(rel)) {
            Ok(meta) if meta.len() < max_bytes => Disposition::Ignore,
            _ => Disposition::Hash,
        },
        None => Disposition::Hash,
    }
}

/// Ignore predicate for the `EFI` partition: `boot/grub/bootparams.cfg`
/// is exempt only if its content equals one of its two neighbor files.
pub fn efi_ignore(root: &Path, rel: &Path) -> Disposition {
    if rel.to_string_lossy() != BOOTPARAMS_PATH {
        return Disposition::Hash;
    }
    let Ok(content) = fs::read(root.join(rel)) else {
        return Disposition::Hash;
    };
    let matches_neighbor = BOOTPARAMS_NEIGHBORS.iter().any(|neighbor| {
        fs::read(root.join(neighbor))
            .map(|neighbor_content| neighbor_content == content)
            .unwrap_or(false)
    });
    if matches_neighbor {
        Disposition::Ignore
    } else {
        Disposition::TamperSignal
    }
}

/// Walks `root` in lexicographic order of the UTF-8 relative path,
/// folding each non-ignored file's path and content into a running
/// hash via [`chain_hash`].
pub fn compute_directory_hash(root: &Path, ignore_pred: IgnorePredicate) -> Sha256Hash {
    let mut relative_paths = Vec::new();
    collect_relative_paths(root, Path::new(""), &mut relative_paths);
    relative_paths.sort();

    let mut running = hash_bytes(b"bastion-directory-hash-seed");
    for rel in relative_paths {
        match ignore_pred(root, &rel) {
            Disposition::Ignore => continue,
            Disposition::TamperSignal => {
                running = chain_hash(&running, &hash_bytes(&rand_bytes()));
            }
            Disposition::Hash => {
                let content = fs::read(root.join(&rel)).unwrap_or_default();
                let mut entry = rel.to_string_lossy().into_owned().into_bytes();
                entry.extend_from_slice(&content);
                running = chain_hash(&running, &hash_bytes(&entry));
            }
        }
    }
    running
}

fn collect_relative_paths(root: &Path, rel: &Path, out: &mut Vec<PathBuf>) {
    let dir = root.join(rel);
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_relative_paths(root, &child_rel, out);
        } else if file_type.is_file() {
            out.push(child_rel);
        }
    }
}

fn rand_bytes() -> [u8; 32] {
    use rand::RngCore;
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn always_hash(_root: &Path, _rel: &Path) -> Disposition {
        Disposition::Hash
    }

    #[test]
    fn deterministic_for_same_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let h1 = compute_directory_hash(dir.path(), always_hash);
        let h2 = compute_directory_hash(dir.path(), always_hash);
        assert_eq!(h1, h2);
    }

    #[test]
    fn single_byte_change_flips_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let h1 = compute_directory_hash(dir.path(), always_hash);

        fs::write(dir.path().join("a.txt"), b"hellp").unwrap();
        let h2 = compute_directory_hash(dir.path(), always_hash);
        assert_ne!(h1, h2);
    }

    #[test]
    fn lexicographic_ordering_is_path_sensitive() {
        let dir_a = tempfile::tempdir().unwrap();
        fs::write(dir_a.path().join("a.txt"), b"1").unwrap();
        fs::write(dir_a.path().join("b.txt"), b"2").unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        fs::write(dir_b.path().join("a.txt"), b"1").unwrap();
        fs::write(dir_b.path().join("b.txt"), b"2").unwrap();

        assert_eq!(
            compute_directory_hash(dir_a.path(), always_hash),
            compute_directory_hash(dir_b.path(), always_hash)
        );
    }

    #[test]
    fn dummy_ignore_exempts_small_internal_pass() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources")).unwrap();
        fs::write(dir.path().join(resources::INTERNAL_PASS_ENC), b"short").unwrap();
        assert_eq!(
            dummy_ignore(dir.path(), Path::new(resources::INTERNAL_PASS_ENC)),
            Disposition::Ignore
        );
    }

    #[test]
    fn dummy_ignore_hashes_oversized_internal_pass() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources")).unwrap();
        let big = vec![0u8; INTERNAL_PASS_IGNORE_MAX_BYTES as usize];
        fs::write(dir.path().join(resources::INTERNAL_PASS_ENC), big).unwrap();
        assert_eq!(
            dummy_ignore(dir.path(), Path::new(resources::INTERNAL_PASS_ENC)),
            Disposition::Hash
        );
    }

    #[test]
    fn efi_ignore_accepts_matching_neighbor() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/bootparams.cfg"), b"abc").unwrap();
        fs::write(dir.path().join("boot/grub/bootparams0.cfg"), b"abc").unwrap();
        fs::write(dir.path().join("boot/grub/bootparams1.cfg"), b"xyz").unwrap();
        assert_eq!(
            efi_ignore(dir.path(), Path::new("boot/grub/bootparams.cfg")),
            Disposition::Ignore
        );
    }

    #[test]
    fn efi_ignore_signals_tamper_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/bootparams.cfg"), b"abc").unwrap();
        fs::write(dir.path().join("boot/grub/bootparams0.cfg"), b"111").unwrap();
        fs::write(dir.path().join("boot/grub/bootparams1.cfg"), b"222").unwrap();
        assert_eq!(
            efi_ignore(dir.path(), Path::new("boot/grub/bootparams.cfg")),
            Disposition::TamperSignal
        );
    }

    #[test]
    fn efi_ignore_signals_tamper_on_missing_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/bootparams.cfg"), b"abc").unwrap();
        assert_eq!(
            efi_ignore(dir.path(), Path::new("boot/grub/bootparams.cfg")),
            Disposition::TamperSignal
        );
    }

    #[test]
    fn tamper_signal_makes_directory_hash_nondeterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("boot/grub")).unwrap();
        fs::write(dir.path().join("boot/grub/bootparams.cfg"), b"abc").unwrap();
        let h1 = compute_directory_hash(dir.path(), efi_ignore);
        let h2 = compute_directory_hash(dir.path(), efi_ignore);
        assert_ne!(h1, h2);
    }
}
