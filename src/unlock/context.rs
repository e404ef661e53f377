//! The data a [`super::PostUnlockStep`] is allowed to see: the just-validated
//! identity, the plaintext password (zeroized on drop), and the mountpoints
//! opened during `Opening → Unlocked`.

use std::path::PathBuf;

use uuid::Uuid;
use zeroize::Zeroize;

/// A password string that overwrites its buffer with zero bytes when
/// dropped. Never implements `Debug`/`Display`.
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub struct UnlockContext {
    pub user_uuid: Uuid,
    pub cn: String,
    pub password: SecretString,
    pub internal_mountpoint: PathBuf,
    pub data_mountpoint: PathBuf,
}
