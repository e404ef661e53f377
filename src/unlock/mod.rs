//! `Locked → Authenticating → IntegrityChecking → Opening → Unlocked`, plus
//! terminal `Failed{..}` states. Each transition is a plain method that
//! either advances `self.state` or parks it in `Failed`; nothing here
//! spawns a thread, so the whole chain runs to completion (or failure) on
//! the calling stack.

pub mod collaborators;
pub mod context;
pub mod lock;
pub mod post_unlock;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bastion_api::blob::ChunkList;
use bastion_api::constants::{resources, RUN_USER_UUID_FILE};
use bastion_api::error::{DeviceError, IntegrityError};
use bastion_api::role::{PartitionRole, SecretKind};
use bastion_crypto::asym::asym_decrypt;
use bastion_crypto::symmetric::password_decrypt;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

use crate::device::{Device, Verifier};
use crate::fingerprint::chain::{compute_fingerprint, fingerprint_to_key, IntegrityLogEntry};
use crate::fingerprint::chunks::verify_files_chunks;

use self::context::{SecretString, UnlockContext};
use self::lock::UnlockLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Credential,
    Integrity,
    TooManyAttempts,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    Authenticating,
    IntegrityChecking,
    Opening,
    Unlocked,
    Failed(FailureKind),
}

/// Diagnostic trail assembled across every transition attempted,
/// regardless of how far the machine got.
#[derive(Debug, Default, Clone)]
pub struct UnlockLog {
    pub integrity: Vec<IntegrityLogEntry>,
}

pub struct UnlockOutcome {
    pub state: UnlockState,
    pub log: UnlockLog,
    /// Present only when `state == Unlocked`.
    pub context: Option<UnlockContext>,
}

pub struct UnlockMachine {
    state: UnlockState,
    log: UnlockLog,
    max_attempts: u32,
    _lock: UnlockLock,
}

impl UnlockMachine {
    /// Acquires the process-wide unlock singleton and starts a fresh
    /// machine in `Locked`.
    pub fn start(run_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            state: UnlockState::Locked,
            log: UnlockLog::default(),
            max_attempts: 3,
            _lock: UnlockLock::acquire(run_dir)?,
        })
    }

    pub fn state(&self) -> &UnlockState {
        &self.state
    }

    fn fail(&mut self, kind: FailureKind) {
        self.state = UnlockState::Failed(kind);
    }

    /// Drives the machine from `Locked` all the way to `Unlocked` or a
    /// terminal `Failed` state, trying `passwords` in order against the
    /// credential store (stopping at `max_attempts` with
    /// `TooManyAttempts`).
    pub fn run(
        mut self,
        device: &mut Device,
        passwords: &[&str],
        run_dir: &Path,
    ) -> anyhow::Result<UnlockOutcome> {
        if let Err(kind) = self.authenticate_device(device) {
            self.fail(kind);
            return self.finish(None);
        }
        self.state = UnlockState::Authenticating;

        let dummy_mp = device.resolve_mountpoint(PartitionRole::Dummy);

        if passwords.len() > self.max_attempts as usize {
            self.fail(FailureKind::TooManyAttempts);
            let _ = device.umount(PartitionRole::Dummy);
            return self.finish(None);
        }

        let authed = passwords
            .iter()
            .copied()
            .find_map(|pw| crate::credentials::authenticate(&dummy_mp, pw).ok().map(|a| (pw, a)));

        let (password, (user_uuid, cn, blob0)) = match authed {
            Some(v) => v,
            None => {
                self.fail(FailureKind::Credential);
                let _ = device.umount(PartitionRole::Dummy);
                return self.finish(None);
            }
        };
        self.state = UnlockState::IntegrityChecking;
        self.record_user_uuid(run_dir, &user_uuid.to_string())?;

        let opened = self.open_device(device, &dummy_mp, &blob0);
        let (_efi_mp, _live_mp, internal_pass, blob1_key) = match opened {
            Ok(v) => v,
            Err(kind) => {
                self.fail(kind);
                let _ = device.umount(PartitionRole::Dummy);
                return self.finish(None);
            }
        };

        self.state = UnlockState::Opening;
        let ctx = match self.open_partitions(device, &internal_pass, &blob1_key, user_uuid, &cn, password)
        {
            Ok(ctx) => ctx,
            Err(kind) => {
                self.fail(kind);
                return self.finish(None);
            }
        };

        self.state = UnlockState::Unlocked;
        self.finish(Some(ctx))
    }

    fn finish(self, context: Option<UnlockContext>) -> anyhow::Result<UnlockOutcome> {
        Ok(UnlockOutcome {
            state: self.state,
            log: self.log,
            context,
        })
    }

    fn record_user_uuid(&self, run_dir: &Path, uuid: &str) -> anyhow::Result<()> {
        fs::create_dir_all(run_dir)?;
        fs::write(run_dir.join(RUN_USER_UUID_FILE), uuid)?;
        Ok(())
    }

    /// `Locked → Authenticating`: mount `dummy`, verify its signed
    /// metadata against the admin public key.
    fn authenticate_device(&mut self, device: &mut Device) -> Result<(), FailureKind> {
        device
            .mount(PartitionRole::Dummy, None, None, &[], false)
            .map_err(|e| FailureKind::Other(e.to_string()))?;

        let dummy_mp = device.resolve_mountpoint(PartitionRole::Dummy);
        let mut verifiers = BTreeMap::new();
        verifiers.insert(
            "Admin".to_string(),
            Verifier::key(dummy_mp.join(resources::META_SIGN_PUB)),
        );
        device.verify(&verifiers).map_err(|_| FailureKind::Integrity)
    }

    /// `IntegrityChecking` body: opens `blob1.priv.enc` under `blob0`,
    /// opens `chunks.enc` under `blob1`, mounts `efi`/`live`, verifies
    /// live chunks, composes the integrity fingerprint, and decrypts
    /// `internal-pass.enc` under the fingerprint-derived key.
    fn open_device(
        &mut self,
        device: &mut Device,
        dummy_mp: &Path,
        blob0: &[u8],
    ) -> Result<(std::path::PathBuf, std::path::PathBuf, Vec<u8>, RsaPrivateKey), FailureKind> {
        let blob1_ciphertext =
            fs::read(dummy_mp.join(resources::BLOB1_PRIV_ENC)).map_err(|_| FailureKind::Integrity)?;
        let blob0_key = blob0
            .try_into()
            .map(bastion_crypto::kdf::HardenedKey::from_raw)
            .map_err(|_: Vec<u8>| FailureKind::Integrity)?;
        let blob1_pem_bytes =
            password_decrypt(&blob0_key, &blob1_ciphertext).map_err(|_| FailureKind::Integrity)?;
        let blob1_pem =
            String::from_utf8(blob1_pem_bytes).map_err(|_| FailureKind::Integrity)?;
        let blob1_key = RsaPrivateKey::from_pkcs8_pem(&blob1_pem).map_err(|_| FailureKind::Integrity)?;

        let chunks_ciphertext =
            fs::read(dummy_mp.join(resources::CHUNKS_ENC)).map_err(|_| FailureKind::Integrity)?;
        let chunks_json =
            asym_decrypt(&blob1_key, &chunks_ciphertext).map_err(|_| FailureKind::Integrity)?;
        let chunks: ChunkList = serde_json::from_slice(&chunks_json).map_err(|_| FailureKind::Integrity)?;

        let efi_mp = device.resolve_mountpoint(PartitionRole::Efi);
        let live_mp = device.resolve_mountpoint(PartitionRole::Live);
        device
            .mount(PartitionRole::Efi, None, None, &[], false)
            .map_err(|e| FailureKind::Other(e.to_string()))?;
        device
            .mount(PartitionRole::Live, None, None, &[], false)
            .map_err(|e| FailureKind::Other(e.to_string()))?;

        let (live_hash, chunk_log) = verify_files_chunks(&live_mp, &chunks);
        let _ = chunk_log;

        let (fingerprint, integrity_log) =
            compute_fingerprint(device, dummy_mp, &efi_mp, blob1_pem.as_bytes(), live_hash)
                .map_err(|_| FailureKind::Integrity)?;
        self.log.integrity = integrity_log;

        let fingerprint_key = fingerprint_to_key(fingerprint);
        let internal_pass_ciphertext =
            fs::read(dummy_mp.join(resources::INTERNAL_PASS_ENC)).map_err(|_| FailureKind::Integrity)?;
        let internal_pass = password_decrypt(&fingerprint_key, &internal_pass_ciphertext)
            .map_err(|_| FailureKind::Integrity)?;

        Ok((efi_mp, live_mp, internal_pass, blob1_key))
    }

    /// `Opening → Unlocked`: opens `internal` with the decrypted
    /// passphrase, reads `data-pass.enc` off it under `blob1`, and opens
    /// `data`.
    fn open_partitions(
        &mut self,
        device: &mut Device,
        internal_pass: &[u8],
        blob1_key: &RsaPrivateKey,
        user_uuid: uuid::Uuid,
        cn: &str,
        password: &str,
    ) -> Result<UnlockContext, FailureKind> {
        let internal_pass_str =
            String::from_utf8(internal_pass.to_vec()).map_err(|_| FailureKind::Integrity)?;
        device
            .set_partition_secret(PartitionRole::Internal, SecretKind::LuksPassphrase, &internal_pass_str)
            .map_err(|e| map_device_err(e))?;

        let internal_mp = device.resolve_mountpoint(PartitionRole::Internal);
        let options = vec!["nodev".to_string(), "x-gvfs-hide".to_string()];
        device
            .mount(PartitionRole::Internal, None, None, &options, false)
            .map_err(|e| FailureKind::Other(e.to_string()))?;

        let data_pass_ciphertext =
            fs::read(internal_mp.join(bastion_api::constants::credentials::DATA_PASS_ENC))
                .map_err(|_| FailureKind::Integrity)?;
        let data_pass = asym_decrypt(blob1_key, &data_pass_ciphertext).map_err(|_| FailureKind::Integrity)?;
        let data_pass_str = String::from_utf8(data_pass).map_err(|_| FailureKind::Integrity)?;

        device
            .set_partition_secret(PartitionRole::Data, SecretKind::LuksPassphrase, &data_pass_str)
            .map_err(map_device_err)?;
        let data_fs = device.get_partition_filesystem(PartitionRole::Data).ok();
        let mut data_options = vec!["nodev".to_string(), "x-gvfs-hide".to_string()];
        if data_fs.as_ref().is_some_and(|fs| fs.is_fat_family()) {
            data_options.push("uid=1000,gid=1000".to_string());
        }
        let data_mp = device.resolve_mountpoint(PartitionRole::Data);
        device
            .mount(PartitionRole::Data, None, data_fs.as_ref(), &data_options, true)
            .map_err(|e| FailureKind::Other(e.to_string()))?;

        Ok(UnlockContext {
            user_uuid,
            cn: cn.to_string(),
            password: SecretString::new(password),
            internal_mountpoint: internal_mp,
            data_mountpoint: data_mp,
        })
    }
}

fn map_device_err(e: DeviceError) -> FailureKind {
    FailureKind::Other(e.to_string())
}

/// Shutdown path: unbinds `data`, unmounts it, and deliberately leaves
/// `internal` mounted. Every failure is logged, none raised — this runs
/// during teardown where there is no good recovery action left.
pub fn shutdown(device: &Device) {
    for (_, target) in post_unlock::BIND_MOUNT_TARGETS {
        if let Err(e) = osutils::mount::umount(target, false) {
            log::info!("failed to unbind {target}: {e}");
        }
    }
    if let Err(e) = device.umount(PartitionRole::Data) {
        log::info!("failed to unmount data partition: {e}");
    }
}

/// Placeholder surfaced only so `IntegrityError` stays reachable from
/// this module's public API without every caller importing
/// `bastion_api::error` directly.
pub type UnlockIntegrityError = IntegrityError;
