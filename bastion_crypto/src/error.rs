use thiserror::Error;

/// A single opaque failure mode for every decrypt operation: MAC mismatch,
/// wrong key, and malformed ciphertext are all reported the same way so
/// that callers can never distinguish them from the error alone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("decryption failed")]
pub struct CryptoError;
