use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::CryptoError;

const NONCE_LEN: usize = 12;
const DEK_LEN: usize = 32;

/// Encrypts `plaintext` of any size for `public_key` using a hybrid
/// envelope: a fresh AES-256-GCM data key wraps the payload, and that data
/// key is itself RSA-OAEP-encrypted under `public_key`. This is how
/// arbitrarily large payloads (a sealed configuration archive, say) get
/// encrypted asymmetrically despite RSA's own size limits.
///
/// Layout: `4-byte big-endian wrapped-key length || wrapped key || nonce ||
/// ciphertext_with_tag`.
pub fn asym_encrypt(public_key: &RsaPublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut dek = [0u8; DEK_LEN];
    OsRng.fill_bytes(&mut dek);

    let padding = Oaep::new::<Sha256>();
    let wrapped_key = public_key.encrypt(&mut OsRng, padding, &dek)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .map_err(|_| anyhow::anyhow!("envelope encryption failed"))?;

    let mut out = Vec::with_capacity(4 + wrapped_key.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&(wrapped_key.len() as u32).to_be_bytes());
    out.extend_from_slice(&wrapped_key);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`asym_encrypt`] using the matching
/// `private_key`. Returns [`CryptoError`] for any failure — malformed
/// framing, wrong key, or a tampered ciphertext are all indistinguishable
/// to the caller.
pub fn asym_decrypt(private_key: &RsaPrivateKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < 4 {
        return Err(CryptoError);
    }
    let (len_bytes, rest) = blob.split_at(4);
    let wrapped_len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    if rest.len() < wrapped_len + NONCE_LEN {
        return Err(CryptoError);
    }
    let (wrapped_key, rest) = rest.split_at(wrapped_len);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let padding = Oaep::new::<Sha256>();
    let dek = private_key
        .decrypt(padding, wrapped_key)
        .map_err(|_| CryptoError)?;
    if dek.len() != DEK_LEN {
        return Err(CryptoError);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError)
}
