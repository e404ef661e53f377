use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest, displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 5 hex characters, used as a short key in integrity log entries.
    pub fn short_prefix(&self) -> String {
        self.to_string()[..5].to_string()
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self)
    }
}

/// Hashes a single buffer.
pub fn hash_bytes(data: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Sha256Hash(hasher.finalize().into())
}

/// Chains two hashes together: `hash(prev || next)`. Used to fold a
/// sequence of per-component hashes into one running fingerprint without
/// needing to hold every component's bytes in memory at once.
pub fn chain_hash(prev: &Sha256Hash, next: &Sha256Hash) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(next.as_bytes());
    Sha256Hash(hasher.finalize().into())
}

/// A streaming hasher for large or incrementally-read content (files,
/// partitions) that should not be buffered in memory wholesale.
#[derive(Default)]
pub struct StreamingHasher(Sha256);

impl StreamingHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> Sha256Hash {
        Sha256Hash(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn known_vector() {
        let h = hash_bytes(b"abc");
        assert_eq!(
            h.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn chain_hash_is_order_sensitive() {
        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        assert_ne!(chain_hash(&a, &b), chain_hash(&b, &a));
    }

    #[test]
    fn streaming_matches_whole_buffer() {
        let mut sh = StreamingHasher::new();
        sh.update(b"hello, ");
        sh.update(b"world");
        assert_eq!(sh.finish(), hash_bytes(b"hello, world"));
    }

    #[test]
    fn short_prefix_is_five_chars() {
        let h = hash_bytes(b"abc");
        assert_eq!(h.short_prefix().len(), 5);
    }
}
