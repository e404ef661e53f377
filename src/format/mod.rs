//! Device initialization: the counterpart to [`crate::unlock`], run once
//! when a device is formatted. Builds the blob0/blob1 key chain from
//! scratch and provisions `internal`/`data` as LUKS containers.
//!
//! Partition-table creation and writing the builder's output onto
//! `dummy`/`EFI`/`live` are treated as already done by the time this
//! runs — that work belongs to the graphical formatting front-end this
//! crate only has to interoperate with, not reimplement. What's left for
//! the core is the data-model provisioning: blob0/blob1, signed
//! metadata, the live chunk list, and the two encrypted partitions.

pub mod backend;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use uuid::Uuid;

use bastion_api::blob::{ChunkEntry, ChunkList};
use bastion_api::constants::{credentials as cred_paths, resources};
use bastion_api::error::ConfigurationError;
use bastion_api::role::{PartitionRole, SecretKind};
use bastion_crypto::asym::asym_encrypt;
use bastion_crypto::hash::hash_bytes;
use bastion_crypto::kdf::HardenedKey;
use bastion_crypto::symmetric::password_encrypt;
use sysdefs::filesystems::KnownFilesystemType;

pub use backend::{FakeFormattingBackend, FormattingBackend, RealFormattingBackend};

use crate::config::FormatConfig;
use crate::credentials;
use crate::device::Device;
use crate::fingerprint::chain::{compute_fingerprint, fingerprint_to_key};
use crate::fingerprint::chunks::verify_files_chunks;
use crate::fingerprint::signature::sign_detached;

const CHUNK_LEN: u64 = 4096;
const MAX_CHUNKS_PER_FILE: usize = 8;
const MAX_TOTAL_CHUNKS: usize = 4096;
const INTERNAL_FS: KnownFilesystemType = KnownFilesystemType::Ext4;

#[derive(Debug, Clone)]
pub struct FormatReport {
    pub admin_user_uuid: Uuid,
}

/// User-supplied parameters for `dev-format`, already merged with the
/// format configuration's fixed overrides (see
/// [`crate::config::FormatParams::merged_with`]).
fn string_param(
    merged: &std::collections::BTreeMap<String, serde_json::Value>,
    key: &str,
) -> Result<String> {
    merged
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ConfigurationError::MissingFormatParam(key.to_string()).into())
}

fn random_secret(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Samples `live_mountpoint` into a [`ChunkList`]: walks files in
/// lexicographic order and records the actual hash of up to
/// `max_chunks_per_file` fixed-length windows per file, so later
/// verification never needs to hash the whole squashfs image.
pub fn sample_chunks(
    live_mountpoint: &std::path::Path,
    chunk_len: u64,
    max_chunks_per_file: usize,
    max_total_chunks: usize,
) -> ChunkList {
    let mut files = Vec::new();
    collect_files(live_mountpoint, std::path::Path::new(""), &mut files);
    files.sort();

    let mut entries = Vec::new();
    'files: for rel in &files {
        let Ok(meta) = fs::metadata(live_mountpoint.join(rel)) else {
            continue;
        };
        let size = meta.len();
        if size < chunk_len {
            continue;
        }
        let stride = size / (max_chunks_per_file as u64 + 1);
        for i in 1..=max_chunks_per_file as u64 {
            if entries.len() >= max_total_chunks {
                break 'files;
            }
            let offset = (stride * i).min(size - chunk_len);
            let Ok(bytes) = read_window(live_mountpoint.join(rel), offset, chunk_len) else {
                continue;
            };
            entries.push(ChunkEntry {
                file: rel.to_string_lossy().into_owned(),
                offset,
                length: chunk_len,
                hash: hash_bytes(&bytes).to_string(),
            });
        }
    }
    ChunkList(entries)
}

fn read_window(path: PathBuf, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn collect_files(root: &std::path::Path, rel: &std::path::Path, out: &mut Vec<PathBuf>) {
    let dir = root.join(rel);
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let child_rel = rel.join(entry.file_name());
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            collect_files(root, &child_rel, out);
        } else if file_type.is_file() {
            out.push(child_rel);
        }
    }
}

/// Runs the full `dev-format` operation against `device`, which must
/// already carry its five partitions with `dummy`/`EFI`/`live` populated.
pub fn format_device(
    device: &mut Device,
    backend: &dyn FormattingBackend,
    format_config: &FormatConfig,
    params: &crate::config::FormatParams,
) -> Result<FormatReport> {
    let merged = params.merged_with(&format_config.fixed_params);
    let password_user = string_param(&merged, "password-user")?;
    let user_cn = merged
        .get("cn")
        .and_then(|v| v.as_str())
        .unwrap_or("admin")
        .to_string();
    let fs_data = KnownFilesystemType::from_blkid_type(&string_param(&merged, "fs-data")?);
    let enctype_data = string_param(&merged, "enctype-data")?;

    let admin_private_key_pem =
        fs::read_to_string(&format_config.admin_private_key).context("reading admin signing key")?;
    let device_private_key_pem =
        fs::read_to_string(&format_config.device_private_key).context("reading device private key")?;
    let blob1_priv = RsaPrivateKey::from_pkcs8_pem(&device_private_key_pem)
        .context("device private key is not a valid PKCS8 PEM")?;
    let blob1_pub = RsaPublicKey::from(&blob1_priv);
    let blob1_priv_pem: String = (*blob1_priv
        .to_pkcs8_pem(LineEnding::LF)
        .context("re-encoding device private key")?)
    .clone();

    device
        .mount(PartitionRole::Dummy, None, None, &[], false)
        .map_err(anyhow::Error::from)?;
    let dummy_mp = device.resolve_mountpoint(PartitionRole::Dummy);
    fs::create_dir_all(dummy_mp.join("resources"))?;

    let mut blob0 = [0u8; 32];
    OsRng.fill_bytes(&mut blob0);
    let admin_uuid = credentials::declare_user(&dummy_mp, &user_cn, &password_user, &blob0)?;

    let blob0_key = HardenedKey::from_raw(blob0);
    let blob1_priv_enc = password_encrypt(&blob0_key, blob1_priv_pem.as_bytes());
    fs::write(dummy_mp.join(resources::BLOB1_PRIV_ENC), &blob1_priv_enc)?;

    let admin_priv = RsaPrivateKey::from_pkcs8_pem(&admin_private_key_pem)
        .context("admin private key is not a valid PKCS8 PEM")?;
    let admin_pub_pem = RsaPublicKey::from(&admin_priv)
        .to_public_key_pem(LineEnding::LF)
        .context("encoding admin public key")?;
    fs::write(dummy_mp.join(resources::META_SIGN_PUB), admin_pub_pem.as_bytes())?;

    device
        .mount(PartitionRole::Live, None, None, &[], false)
        .map_err(anyhow::Error::from)?;
    let live_mp = device.resolve_mountpoint(PartitionRole::Live);
    let chunks = sample_chunks(&live_mp, CHUNK_LEN, MAX_CHUNKS_PER_FILE, MAX_TOTAL_CHUNKS);
    let chunks_json = serde_json::to_vec(&chunks)?;
    let chunks_enc = asym_encrypt(&blob1_pub, &chunks_json)?;
    fs::write(dummy_mp.join(resources::CHUNKS_ENC), &chunks_enc)?;

    let metadata = serde_json::to_vec(&serde_json::json!({
        "format-config-id": format_config.id,
        "fs-data": enctype_data,
    }))?;
    let signature = sign_detached(&admin_private_key_pem, &metadata)?;
    fs::write(dummy_mp.join("resources/metadata.json"), &metadata)?;
    fs::write(dummy_mp.join("resources/metadata.sig"), &signature)?;

    let internal_pass = random_secret(48);
    let data_pass = random_secret(48);
    backend.luks_format(&device.partition_node(PartitionRole::Internal), &internal_pass, None)?;
    backend.luks_format(
        &device.partition_node(PartitionRole::Data),
        &data_pass,
        Some(&enctype_data),
    )?;

    device
        .set_partition_secret(PartitionRole::Internal, SecretKind::LuksPassphrase, &internal_pass)
        .map_err(anyhow::Error::from)?;
    let internal_mapper = mapper_path(PartitionRole::Internal);
    backend.mkfs(&internal_mapper, &INTERNAL_FS)?;
    device
        .mount(
            PartitionRole::Internal,
            None,
            None,
            &["nodev".to_string(), "x-gvfs-hide".to_string()],
            false,
        )
        .map_err(anyhow::Error::from)?;
    let internal_mp = device.resolve_mountpoint(PartitionRole::Internal);
    fs::create_dir_all(internal_mp.join("credentials"))?;
    fs::write(
        internal_mp.join(cred_paths::PRIVDATA_EKEY_PRIV),
        blob1_priv_pem.as_bytes(),
    )?;

    device
        .set_partition_secret(PartitionRole::Data, SecretKind::LuksPassphrase, &data_pass)
        .map_err(anyhow::Error::from)?;
    let data_mapper = mapper_path(PartitionRole::Data);
    backend.mkfs(&data_mapper, &fs_data)?;

    let data_pass_enc = asym_encrypt(&blob1_pub, data_pass.as_bytes())?;
    fs::write(internal_mp.join(cred_paths::DATA_PASS_ENC), &data_pass_enc)?;

    // Placeholder so the dummy-partition ignore predicate already takes
    // the `Ignore` branch when the fingerprint below walks `dummy` — its
    // final content never affects that hash, but its *absence* would.
    let internal_pass_path = dummy_mp.join(resources::INTERNAL_PASS_ENC);
    fs::write(&internal_pass_path, b"")?;

    device
        .mount(PartitionRole::Efi, None, None, &[], false)
        .map_err(anyhow::Error::from)?;
    let efi_mp = device.resolve_mountpoint(PartitionRole::Efi);

    let (live_hash, _chunk_log) = verify_files_chunks(&live_mp, &chunks);
    let (fingerprint, _log) =
        compute_fingerprint(device, &dummy_mp, &efi_mp, blob1_priv_pem.as_bytes(), live_hash)?;
    let internal_pass_enc = password_encrypt(&fingerprint_to_key(fingerprint), internal_pass.as_bytes());
    fs::write(&internal_pass_path, &internal_pass_enc)?;

    device.umount(PartitionRole::Efi).map_err(anyhow::Error::from)?;
    device.umount(PartitionRole::Live).map_err(anyhow::Error::from)?;
    device.umount(PartitionRole::Internal).map_err(anyhow::Error::from)?;
    device.umount(PartitionRole::Dummy).map_err(anyhow::Error::from)?;

    Ok(FormatReport { admin_user_uuid: admin_uuid })
}

fn mapper_path(role: PartitionRole) -> PathBuf {
    PathBuf::from(format!("/dev/mapper/bastion-{role}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(path: &std::path::Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn sample_chunks_records_matching_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
        write_file(&dir.path().join("squashfs.img"), &data);

        let chunks = sample_chunks(dir.path(), CHUNK_LEN, MAX_CHUNKS_PER_FILE, MAX_TOTAL_CHUNKS);
        assert!(!chunks.0.is_empty());
        let (_hash, log) = verify_files_chunks(dir.path(), &chunks);
        assert!(log.iter().all(|e| e.matched));
    }

    #[test]
    fn sample_chunks_skips_files_smaller_than_chunk_length() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("tiny"), b"short");
        let chunks = sample_chunks(dir.path(), CHUNK_LEN, MAX_CHUNKS_PER_FILE, MAX_TOTAL_CHUNKS);
        assert!(chunks.0.is_empty());
    }

    #[test]
    fn string_param_reports_missing_key() {
        let merged = std::collections::BTreeMap::new();
        assert!(string_param(&merged, "password-user").is_err());
    }

    #[test]
    fn random_secret_has_requested_length_and_varies() {
        let a = random_secret(48);
        let b = random_secret(48);
        assert_eq!(a.len(), 48);
        assert_ne!(a, b);
    }
}
