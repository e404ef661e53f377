//! Composes the device, dummy/EFI content, and the precomputed live hash
//! into the single integrity fingerprint, in the fixed order named by
//! [`bastion_api::constants::INTEGRITY_STEP_ORDER`].

use std::path::Path;

use anyhow::Result;
use bastion_api::constants::INTEGRITY_STEP_ORDER;
use bastion_crypto::hash::{chain_hash, hash_bytes, Sha256Hash};

use crate::device::Device;
use crate::fingerprint::{gap, walk};

/// One entry of the diagnostic integrity log: a step name from
/// [`INTEGRITY_STEP_ORDER`] and the 5-character hex prefix of the hash
/// it contributed. Never carries the full hash or any plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityLogEntry {
    pub step: &'static str,
    pub prefix: String,
}

/// Computes the integrity fingerprint and its diagnostic log.
///
/// `dummy_mountpoint` and `efi_mountpoint` must already be mounted;
/// `blob1_priv_pem` is the decrypted blob1 private key PEM (the caller
/// must decrypt `blob1.priv.enc` under blob0 before calling this — the
/// chain hashes the plaintext key material, not the ciphertext blob);
/// `live_hash` is the result of [`super::chunks::verify_files_chunks`].
#[tracing::instrument(skip_all)]
pub fn compute_fingerprint(
    device: &Device,
    dummy_mountpoint: &Path,
    efi_mountpoint: &Path,
    blob1_priv_pem: &[u8],
    live_hash: Sha256Hash,
) -> Result<(Sha256Hash, Vec<IntegrityLogEntry>)> {
    let gap_hash = device.compute_inter_partitions_hash()?;
    let layout = device
        .get_partitions_layout()
        .map_err(|e| anyhow::anyhow!(e))?;
    let mbr_hash = gap::compute_partitions_table_hash(device.devfile(), &layout, device.label_type())?;
    let blob1_hash = hash_bytes(blob1_priv_pem);
    let dummy_hash = walk::compute_directory_hash(dummy_mountpoint, walk::dummy_ignore);
    let efi_hash = walk::compute_directory_hash(efi_mountpoint, walk::efi_ignore);

    let steps: Vec<(&'static str, Sha256Hash)> = vec![
        ("gap", gap_hash),
        ("blob1", blob1_hash),
        ("mbr", mbr_hash),
        ("dummy", dummy_hash),
        ("efi-data", efi_hash),
        ("live", live_hash),
    ];
    debug_assert_eq!(
        steps.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        INTEGRITY_STEP_ORDER
    );

    let mut log = Vec::with_capacity(steps.len());
    let mut running = steps[0].1;
    log.push(IntegrityLogEntry {
        step: steps[0].0,
        prefix: running.short_prefix(),
    });
    for (step, hash) in &steps[1..] {
        running = chain_hash(&running, hash);
        log.push(IntegrityLogEntry {
            step,
            prefix: hash.short_prefix(),
        });
    }

    tracing::info!(
        prefixes = ?log.iter().map(|e| (e.step, e.prefix.as_str())).collect::<Vec<_>>(),
        "computed integrity fingerprint"
    );
    Ok((running, log))
}

/// Turns `fingerprint` into symmetric key material for decrypting
/// `internal-pass.enc`. The fingerprint itself is 32 bytes already, so
/// this is a type-level conversion, not a KDF: the chain hash's output
/// *is* the key.
pub fn fingerprint_to_key(fingerprint: Sha256Hash) -> bastion_crypto::kdf::HardenedKey {
    bastion_crypto::kdf::HardenedKey::from_raw(*fingerprint.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_to_key_is_just_the_bytes() {
        let h = hash_bytes(b"abc");
        assert_eq!(fingerprint_to_key(h).0, *h.as_bytes());
    }
}
