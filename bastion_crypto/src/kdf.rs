use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Legacy KDF sentinel accepted on read for devices created before password
/// hardening with salt was introduced. New devices must never write this
/// value.
pub const LEGACY_SALT_SENTINEL: &str = "not really some salt";

/// A hardened, 32-byte key derived from a user password and a per-slot
/// salt. Deterministic and pure. Zeroized on drop since it is sensitive
/// key material.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct HardenedKey(pub [u8; 32]);

impl HardenedKey {
    /// Wraps already-derived key material (e.g. an integrity fingerprint
    /// used directly as AEAD key bytes) without running it through HKDF
    /// again.
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Derives a hardened key from `password` and `salt` using HKDF-SHA256.
/// `salt` may be the legacy sentinel [`LEGACY_SALT_SENTINEL`]; this function
/// does not special-case it, it is simply a fixed salt like any other — the
/// legacy-vs-hardened distinction lives in the credential store's two-path
/// decrypt attempt, not here.
pub fn harden(password: &str, salt: &str) -> HardenedKey {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), password.as_bytes());
    let mut out = [0u8; 32];
    hk.expand(b"bastion-blob0-hardening", &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    HardenedKey(out)
}

/// Generates a fresh random salt suitable for a new credential slot.
pub fn generate_salt() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = harden("hunter2", "salt-a");
        let b = harden("hunter2", "salt-a");
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn salt_changes_output() {
        let a = harden("hunter2", "salt-a");
        let b = harden("hunter2", "salt-b");
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn legacy_sentinel_is_just_a_salt() {
        let legacy = harden("hunter2", LEGACY_SALT_SENTINEL);
        let explicit = harden("hunter2", "not really some salt");
        assert_eq!(legacy.0, explicit.0);
    }

    #[test]
    fn generated_salts_are_distinct() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
