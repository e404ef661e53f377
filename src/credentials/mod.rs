//! The `blob0.json` multi-user credential store on the `dummy` partition.

use std::fs;
use std::path::Path;

use bastion_api::blob::{BlobZeroFile, BlobZeroMode, BlobZeroSlot};
use bastion_api::constants::{resources, BLOB0_IGNORE_MAX_BYTES, LEGACY_SALT_SENTINEL};
use bastion_api::error::CredentialError;
use bastion_crypto::kdf::{generate_salt, harden};
use bastion_crypto::symmetric::{password_decrypt, password_encrypt};
use uuid::Uuid;

fn blob0_path(dummy_mountpoint: &Path) -> std::path::PathBuf {
    dummy_mountpoint.join(resources::BLOB0)
}

fn load(dummy_mountpoint: &Path) -> BlobZeroFile {
    fs::read(blob0_path(dummy_mountpoint))
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn save(dummy_mountpoint: &Path, file: &BlobZeroFile) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(file)?;
    if bytes.len() as u64 >= BLOB0_IGNORE_MAX_BYTES {
        anyhow::bail!(CredentialError::SlotCapExceeded);
    }
    let path = blob0_path(dummy_mountpoint);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Tries to decrypt `slot` under `password`: hardened-with-salt first,
/// then hardened-with-legacy-sentinel, then the genuinely unhardened
/// raw-password key (no HKDF at all). The third tier exists for slots
/// written before password hardening existed at all, distinct from the
/// sentinel-salt tier which still ran the password through HKDF.
/// Returns the decrypted blob0 secret on the first tier that succeeds.
fn try_decrypt_slot(slot: &BlobZeroSlot, password: &str) -> Option<Vec<u8>> {
    let enc_blob = base64_decode(&slot.enc_blob)?;
    if let Some(salt) = &slot.salt {
        let key = harden(password, salt);
        if let Ok(plain) = password_decrypt(&key, &enc_blob) {
            return Some(plain);
        }
    }
    let legacy_key = harden(password, LEGACY_SALT_SENTINEL);
    if let Ok(plain) = password_decrypt(&legacy_key, &enc_blob) {
        return Some(plain);
    }
    let raw_key = raw_password_key(password);
    password_decrypt(&raw_key, &enc_blob).ok()
}

/// Turns `password`'s raw bytes directly into AES-256 key material, with
/// no HKDF pass. Zero-padded if shorter than 32 bytes, truncated if
/// longer, matching [`bastion_crypto::kdf::HardenedKey`]'s fixed width.
fn raw_password_key(password: &str) -> bastion_crypto::kdf::HardenedKey {
    let mut bytes = [0u8; 32];
    let pw = password.as_bytes();
    let n = pw.len().min(32);
    bytes[..n].copy_from_slice(&pw[..n]);
    bastion_crypto::kdf::HardenedKey::from_raw(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Declares (or re-declares) a user. If a `password`-mode slot with a
/// matching `cn` already exists, it is re-encrypted under a fresh salt
/// and its uuid is preserved; otherwise a new slot is appended with a
/// fresh uuid.
pub fn declare_user(
    dummy_mountpoint: &Path,
    cn: &str,
    password: &str,
    blob0: &[u8],
) -> anyhow::Result<Uuid> {
    let mut file = load(dummy_mountpoint);
    let salt = generate_salt();
    let key = harden(password, &salt);
    let enc_blob = base64_encode(&password_encrypt(&key, blob0));

    let uuid = match file.find_by_cn(cn) {
        Some((uuid, existing)) if existing.mode == BlobZeroMode::Password => uuid,
        _ => Uuid::new_v4(),
    };

    file.0.insert(
        uuid,
        BlobZeroSlot {
            mode: BlobZeroMode::Password,
            salt: Some(salt),
            enc_blob,
            cn: cn.to_string(),
        },
    );
    save(dummy_mountpoint, &file)?;
    Ok(uuid)
}

/// Removes every slot whose `cn` matches. Fails rather than emptying the
/// store. When `internal_mountpoint` is given, opportunistically removes
/// `user-config/<uuid>` for each deleted user.
pub fn delete_user(
    dummy_mountpoint: &Path,
    cn: &str,
    internal_mountpoint: Option<&Path>,
) -> anyhow::Result<()> {
    let mut file = load(dummy_mountpoint);
    let to_remove: Vec<Uuid> = file
        .0
        .iter()
        .filter(|(_, slot)| slot.cn == cn)
        .map(|(uuid, _)| *uuid)
        .collect();
    if to_remove.is_empty() {
        anyhow::bail!(CredentialError::NoSuchUser);
    }
    if to_remove.len() >= file.0.len() {
        anyhow::bail!(CredentialError::WouldEmptyStore);
    }
    for uuid in &to_remove {
        file.0.remove(uuid);
    }
    save(dummy_mountpoint, &file)?;

    if let Some(internal) = internal_mountpoint {
        for uuid in &to_remove {
            let _ = fs::remove_dir_all(internal.join("user-config").join(uuid.to_string()));
        }
    }
    Ok(())
}

/// Lists every declared user's display name, sorted.
pub fn list_users(dummy_mountpoint: &Path) -> Vec<String> {
    let file = load(dummy_mountpoint);
    let mut names: Vec<String> = file.0.values().map(|slot| slot.cn.clone()).collect();
    names.sort();
    names
}

/// Changes a user's password: finds the one slot whose blob0 decrypts
/// under `current`, then re-declares that user under `new`. The slot's
/// salt is always regenerated, so a legacy (sentinel-salt) slot
/// self-migrates to hardened-with-salt on its first password change.
pub fn change_password(dummy_mountpoint: &Path, current: &str, new: &str) -> anyhow::Result<Uuid> {
    let file = load(dummy_mountpoint);
    let matching = file
        .0
        .iter()
        .find_map(|(_, slot)| try_decrypt_slot(slot, current).map(|blob0| (slot.cn.clone(), blob0)));

    let (cn, blob0) = match matching {
        Some(pair) => pair,
        None => anyhow::bail!(CredentialError::InvalidCredential),
    };
    declare_user(dummy_mountpoint, &cn, new, &blob0)
}

/// Resets a user's password to a known blob0, for an administrator
/// already in possession of the device-wide secret. Equivalent to
/// `declare_user` with bypassed current-password verification.
pub fn reset_password(
    dummy_mountpoint: &Path,
    cn: &str,
    new_password: &str,
    blob0: &[u8],
) -> anyhow::Result<Uuid> {
    declare_user(dummy_mountpoint, cn, new_password, blob0)
}

/// Authenticates `password` against every slot, hardened-then-legacy,
/// returning the first match's `(uuid, cn, blob0)`.
pub fn authenticate(dummy_mountpoint: &Path, password: &str) -> anyhow::Result<(Uuid, String, Vec<u8>)> {
    let file = load(dummy_mountpoint);
    for (uuid, slot) in &file.0 {
        if let Some(blob0) = try_decrypt_slot(slot, password) {
            return Ok((*uuid, slot.cn.clone(), blob0));
        }
    }
    anyhow::bail!(CredentialError::InvalidCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_then_list_includes_cn() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "P@ssw0rd-1", b"device-secret").unwrap();
        assert_eq!(list_users(dir.path()), vec!["Alice".to_string()]);
    }

    #[test]
    fn redeclare_same_cn_keeps_one_slot_and_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let uuid1 = declare_user(dir.path(), "Alice", "pw1", b"secret").unwrap();
        let uuid2 = declare_user(dir.path(), "Alice", "pw2", b"secret").unwrap();
        assert_eq!(uuid1, uuid2);
        assert_eq!(list_users(dir.path()), vec!["Alice".to_string()]);
    }

    #[test]
    fn authenticate_succeeds_with_right_password() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "P@ssw0rd-1", b"device-secret").unwrap();
        let (_, cn, blob0) = authenticate(dir.path(), "P@ssw0rd-1").unwrap();
        assert_eq!(cn, "Alice");
        assert_eq!(blob0, b"device-secret");
    }

    #[test]
    fn authenticate_fails_with_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "P@ssw0rd-1", b"device-secret").unwrap();
        assert!(authenticate(dir.path(), "wrong").is_err());
    }

    #[test]
    fn change_password_then_unlock_with_new_succeeds_old_fails() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "old-pw", b"device-secret").unwrap();
        change_password(dir.path(), "old-pw", "new-pw").unwrap();

        assert!(authenticate(dir.path(), "new-pw").is_ok());
        assert!(authenticate(dir.path(), "old-pw").is_err());
    }

    #[test]
    fn delete_only_user_fails() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "pw", b"secret").unwrap();
        assert!(delete_user(dir.path(), "Alice", None).is_err());
    }

    #[test]
    fn user_lifecycle_scenario() {
        let dir = tempfile::tempdir().unwrap();
        declare_user(dir.path(), "Alice", "alice-pw", b"secret").unwrap();
        declare_user(dir.path(), "Bob", "bob-pw", b"secret").unwrap();
        assert_eq!(list_users(dir.path()), vec!["Alice".to_string(), "Bob".to_string()]);

        change_password(dir.path(), "alice-pw", "alice-pw-2").unwrap();
        delete_user(dir.path(), "Alice", None).unwrap();
        assert_eq!(list_users(dir.path()), vec!["Bob".to_string()]);

        assert!(delete_user(dir.path(), "Bob", None).is_err());
    }

    #[test]
    fn legacy_slot_self_migrates_salt_on_password_change() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources")).unwrap();
        let key = harden("legacy-pw", LEGACY_SALT_SENTINEL);
        let enc_blob = base64_encode(&password_encrypt(&key, b"secret"));
        let uuid = Uuid::new_v4();
        let mut file = BlobZeroFile::default();
        file.0.insert(
            uuid,
            BlobZeroSlot {
                mode: BlobZeroMode::Password,
                salt: None,
                enc_blob,
                cn: "Legacy".to_string(),
            },
        );
        fs::write(blob0_path(dir.path()), serde_json::to_vec(&file).unwrap()).unwrap();

        assert!(authenticate(dir.path(), "legacy-pw").is_ok());
        change_password(dir.path(), "legacy-pw", "new-pw").unwrap();

        let migrated = load(dir.path());
        let (_, slot) = migrated.find_by_cn("Legacy").unwrap();
        assert!(slot.salt.is_some());
        assert!(authenticate(dir.path(), "new-pw").is_ok());
    }

    #[test]
    fn raw_password_slot_authenticates_and_migrates_on_password_change() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("resources")).unwrap();
        let key = raw_password_key("ancient-pw");
        let enc_blob = base64_encode(&password_encrypt(&key, b"secret"));
        let uuid = Uuid::new_v4();
        let mut file = BlobZeroFile::default();
        file.0.insert(
            uuid,
            BlobZeroSlot {
                mode: BlobZeroMode::Password,
                salt: None,
                enc_blob,
                cn: "Ancient".to_string(),
            },
        );
        fs::write(blob0_path(dir.path()), serde_json::to_vec(&file).unwrap()).unwrap();

        assert!(authenticate(dir.path(), "ancient-pw").is_ok());
        change_password(dir.path(), "ancient-pw", "new-pw").unwrap();

        let migrated = load(dir.path());
        let (_, slot) = migrated.find_by_cn("Ancient").unwrap();
        assert!(slot.salt.is_some());
        assert!(authenticate(dir.path(), "new-pw").is_ok());
    }
}
