//! Samples the `live` partition against a pre-computed chunk list instead
//! of hashing the whole multi-gigabyte squashfs.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bastion_api::blob::{ChunkEntry, ChunkList, ChunkLogEntry};
use bastion_crypto::hash::{chain_hash, hash_bytes, Sha256Hash};

/// A marker folded in when a chunk's file can't be read at all (missing
/// file, I/O error). Deterministic but guaranteed to differ from any
/// real chunk hash, so it still flips the running hash without needing
/// the random-injection trick used for the EFI ignore predicate — here
/// every chunk entry is explicit, there is no legitimate reason for a
/// declared file to be unreadable.
fn unreadable_marker() -> Sha256Hash {
    hash_bytes(b"bastion-chunk-unreadable")
}

fn hash_one_chunk(root: &Path, entry: &ChunkEntry) -> Sha256Hash {
    let result = (|| -> std::io::Result<Vec<u8>> {
        let mut file = File::open(root.join(&entry.file))?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    })();
    match result {
        Ok(buf) => hash_bytes(&buf),
        Err(_) => unreadable_marker(),
    }
}

/// Validates every chunk entry against the files under `root`, folding
/// each chunk's actual content hash into a running hash. On a match the
/// actual hash equals the declared one, so the running hash only
/// reproduces the value computed at build time if every chunk still
/// matches; any mismatch (or missing file) diverges it instead of
/// failing fast, so the full per-file log is always available.
pub fn verify_files_chunks(root: &Path, chunks: &ChunkList) -> (Sha256Hash, Vec<ChunkLogEntry>) {
    let mut running = hash_bytes(b"bastion-chunks-seed");
    let mut log = Vec::with_capacity(chunks.0.len());
    for entry in &chunks.0 {
        let actual = hash_one_chunk(root, entry);
        let matched = actual.to_string() == entry.hash.to_lowercase();
        log.push(ChunkLogEntry {
            file: entry.file.clone(),
            matched,
        });
        running = chain_hash(&running, &actual);
    }
    (running, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(file: &str, offset: u64, length: u64, hash: &str) -> ChunkEntry {
        ChunkEntry {
            file: file.to_string(),
            offset,
            length,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn matching_chunk_is_logged_as_matched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("squashfs.img"), b"0123456789").unwrap();
        let expected = hash_bytes(b"456").to_string();
        let chunks = ChunkList(vec![entry("squashfs.img", 4, 3, &expected)]);

        let (_h, log) = verify_files_chunks(dir.path(), &chunks);
        assert_eq!(log, vec![ChunkLogEntry { file: "squashfs.img".into(), matched: true }]);
    }

    #[test]
    fn mismatched_declared_hash_is_logged_but_running_hash_tracks_actual_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("squashfs.img"), b"0123456789").unwrap();
        let chunks_good = ChunkList(vec![entry(
            "squashfs.img",
            4,
            3,
            &hash_bytes(b"456").to_string(),
        )]);
        let chunks_bad = ChunkList(vec![entry("squashfs.img", 4, 3, &hash_bytes(b"xyz").to_string())]);

        let (h_good, log_good) = verify_files_chunks(dir.path(), &chunks_good);
        let (h_bad, log_bad) = verify_files_chunks(dir.path(), &chunks_bad);
        assert!(log_good[0].matched);
        assert!(!log_bad[0].matched);
        assert_eq!(h_good, h_bad, "the running hash folds in the actual content, not the declared expectation");
    }

    #[test]
    fn missing_file_is_logged_as_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = ChunkList(vec![entry("missing.img", 0, 4, "deadbeef")]);
        let (_h, log) = verify_files_chunks(dir.path(), &chunks);
        assert!(!log[0].matched);
    }

    #[test]
    fn tampered_content_flips_running_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("squashfs.img"), b"0123456789").unwrap();
        let chunks = ChunkList(vec![entry("squashfs.img", 0, 10, &hash_bytes(b"0123456789").to_string())]);
        let (h1, _) = verify_files_chunks(dir.path(), &chunks);

        fs::write(dir.path().join("squashfs.img"), b"9123456789").unwrap();
        let (h2, _) = verify_files_chunks(dir.path(), &chunks);
        assert_ne!(h1, h2);
    }
}
