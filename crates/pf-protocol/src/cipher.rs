//! Shared-secret stream cipher
//!
//! Connections to tray agents can be configured with a shared secret. The
//! entire byte stream (length prefix included) is then XORed with a keystream
//! derived from a hash of that secret. The keystream is keyed by the absolute
//! stream offset, so it is insensitive to how TCP happens to chunk the data,
//! and encryption and decryption are the same operation.
//!
//! This provides obfuscation on a trusted network, not authentication.

use sha2::{Digest, Sha256};

/// Keystream block size; one SHA-256 digest covers this many stream bytes.
const BLOCK_SIZE: usize = 32;

/// Symmetric stream cipher keyed by a hash of a shared secret
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Create a cipher from a shared secret string
    pub fn new(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self { key: key.into() }
    }

    /// Keystream block covering stream offsets `[index * 32, index * 32 + 32)`
    fn block(&self, index: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(index.to_le_bytes());
        hasher.finalize().into()
    }

    /// XOR `buf` in place with the keystream, where `buf[0]` sits at absolute
    /// stream offset `offset`
    pub fn apply(&self, mut offset: u64, buf: &mut [u8]) {
        let mut i = 0;
        while i < buf.len() {
            let block = self.block(offset / BLOCK_SIZE as u64);
            let start = (offset % BLOCK_SIZE as u64) as usize;
            let n = (BLOCK_SIZE - start).min(buf.len() - i);
            for j in 0..n {
                buf[i + j] ^= block[start + j];
            }
            i += n;
            offset += n as u64;
        }
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}
