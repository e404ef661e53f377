//! Verifies device-metadata signatures for `Device::verify`. Uses
//! RSA-PKCS1v15-SHA256, the most broadly supported RSA signature scheme,
//! over a public key supplied as a PEM file.

use anyhow::{Context, Result};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

pub fn verify_detached(public_key_pem: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).context("invalid public key PEM")?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Signature::try_from(signature).context("malformed signature")?;
    verifying_key
        .verify(message, &signature)
        .context("signature verification failed")
}

/// Signs `message` with the admin authority's private key, producing the
/// detached signature written to `resources/metadata.sig` at format time.
pub fn sign_detached(private_key_pem: &str, message: &[u8]) -> Result<Vec<u8>> {
    let private_key =
        RsaPrivateKey::from_pkcs8_pem(private_key_pem).context("invalid private key PEM")?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    Ok(signing_key.sign(message).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};

    const TEST_KEY_PEM: &str = include_str!("../../bastion_crypto/testdata/test_rsa_key.pem");

    #[test]
    fn accepts_valid_signature() {
        let priv_key = RsaPrivateKey::from_pkcs8_pem(TEST_KEY_PEM).unwrap();
        let public_key_pem = RsaPublicKey::from(&priv_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let signature = sign_detached(TEST_KEY_PEM, b"device metadata").unwrap();

        verify_detached(&public_key_pem, b"device metadata", &signature).unwrap();
    }

    #[test]
    fn rejects_tampered_message() {
        let priv_key = RsaPrivateKey::from_pkcs8_pem(TEST_KEY_PEM).unwrap();
        let public_key_pem = RsaPublicKey::from(&priv_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let signature = sign_detached(TEST_KEY_PEM, b"device metadata").unwrap();

        assert!(verify_detached(&public_key_pem, b"tampered metadata", &signature).is_err());
    }
}
