//! Fixed paths and names that appear in the on-device resource layout,
//! kept in one place rather than scattered as string literals.

/// Process-global run directory. Its only persistent datum across an
/// unlock is `user_uuid`.
pub const RUN_DIR: &str = "/run/bastion";

pub const RUN_USER_UUID_FILE: &str = "user_uuid";

/// Name of the advisory lock file used to enforce the process-wide
/// unlock singleton.
pub const UNLOCK_LOCK_FILE: &str = "unlock.lock";

pub mod resources {
    pub const BLOB0: &str = "resources/blob0.json";
    pub const BLOB1_PRIV_ENC: &str = "resources/blob1.priv.enc";
    pub const CHUNKS_ENC: &str = "resources/chunks.enc";
    pub const INTERNAL_PASS_ENC: &str = "resources/internal-pass.enc";
    pub const META_SIGN_PUB: &str = "resources/meta-sign.pub";
}

pub mod credentials {
    pub const DATA_PASS_ENC: &str = "credentials/data-pass.enc";
    pub const PRIVDATA_EKEY_PRIV: &str = "credentials/privdata-ekey.priv";
}

pub const PRIVDATA_TAR_ENC: &str = "/privdata.tar.enc";
pub const LIVE_CONFIG_TAR_ENC: &str = "/live-config.tar.enc";
pub const POST_UNLOCK_SCRIPT: &str = "/opt/share/post-unlock-script";

/// Ignore-predicate size thresholds.
pub const INTERNAL_PASS_IGNORE_MAX_BYTES: u64 = 500;
pub const BLOB0_IGNORE_MAX_BYTES: u64 = 10_000;

/// Neighbor files accepted as equivalent for `boot/grub/bootparams.cfg`
/// under the EFI ignore predicate).
pub const BOOTPARAMS_PATH: &str = "boot/grub/bootparams.cfg";
pub const BOOTPARAMS_NEIGHBORS: [&str; 2] =
    ["boot/grub/bootparams0.cfg", "boot/grub/bootparams1.cfg"];

/// Legacy KDF sentinel accepted on read for devices created before
/// password hardening with salt was introduced.
pub const LEGACY_SALT_SENTINEL: &str = "not really some salt";

/// Length, in characters, of the diagnostic prefix recorded per
/// integrity-chain step.
pub const INTEGRITY_LOG_PREFIX_LEN: usize = 5;

/// Authoritative order of integrity-chain steps.
pub const INTEGRITY_STEP_ORDER: [&str; 6] = ["gap", "blob1", "mbr", "dummy", "efi-data", "live"];
