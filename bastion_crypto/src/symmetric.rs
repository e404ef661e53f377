use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::kdf::HardenedKey;
use crate::CryptoError;

const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` under a password-hardened key. The output is
/// `nonce || ciphertext_with_tag`; the nonce is drawn fresh on every call
/// so the same plaintext never produces the same bytes twice.
pub fn password_encrypt(key: &HardenedKey, plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .expect("AES-256-GCM encryption with a valid key cannot fail");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypts a blob produced by [`password_encrypt`]. Returns [`CryptoError`]
/// for any failure: truncated input, wrong key, or a tampered ciphertext.
pub fn password_decrypt(key: &HardenedKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoError);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::harden;

    #[test]
    fn round_trips() {
        let key = harden("hunter2", "some-salt");
        let ct = password_encrypt(&key, b"secret partition password");
        let pt = password_decrypt(&key, &ct).unwrap();
        assert_eq!(pt, b"secret partition password");
    }

    #[test]
    fn wrong_key_fails() {
        let key = harden("hunter2", "some-salt");
        let other = harden("wrong", "some-salt");
        let ct = password_encrypt(&key, b"secret");
        assert_eq!(password_decrypt(&other, &ct), Err(CryptoError));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = harden("hunter2", "some-salt");
        let mut ct = password_encrypt(&key, b"secret");
        let last = ct.len() - 1;
        ct[last] ^= 0xff;
        assert_eq!(password_decrypt(&key, &ct), Err(CryptoError));
    }

    #[test]
    fn truncated_input_fails() {
        let key = harden("hunter2", "some-salt");
        assert_eq!(password_decrypt(&key, b"short"), Err(CryptoError));
    }

    #[test]
    fn two_encryptions_differ() {
        let key = harden("hunter2", "some-salt");
        let a = password_encrypt(&key, b"secret");
        let b = password_encrypt(&key, b"secret");
        assert_ne!(a, b);
    }
}
