use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{random_bytes, KEY_LEN};

/// A randomly keyed BLAKE2b-256 hasher for passphrase re-authentication
///
/// Checking a passphrase against already-unlocked state must not pay the
/// memory-hard KDF again, and must not keep the passphrase around either. So
/// each store (and each unique-passphrase account) holds a hasher keyed with
/// fresh CSPRNG output and remembers only the digest of the last accepted
/// passphrase. The random key makes the digests worthless outside the owning
/// process.
pub struct PassphraseHasher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl PassphraseHasher {
    /// A hasher with a fresh random key
    ///
    /// Digests from different instances are unrelated, so replacing the
    /// hasher invalidates every previously stored [`PassphraseHash`].
    pub fn new() -> Self {
        Self {
            key: Zeroizing::new(random_bytes()),
        }
    }

    pub fn hash(&self, passphrase: &[u8]) -> PassphraseHash {
        let digest = blake2b_simd::Params::new()
            .hash_length(KEY_LEN)
            .key(&*self.key)
            .hash(passphrase);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(digest.as_bytes());
        PassphraseHash(bytes)
    }
}

impl Default for PassphraseHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// A keyed digest of a passphrase, comparable only in constant time
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PassphraseHash([u8; KEY_LEN]);

impl PassphraseHash {
    pub fn constant_time_eq(&self, other: &PassphraseHash) -> bool {
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

impl core::fmt::Debug for PassphraseHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PassphraseHash(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_passphrase_same_digest() {
        let hasher = PassphraseHasher::new();
        assert!(hasher
            .hash(b"passphrase")
            .constant_time_eq(&hasher.hash(b"passphrase")));
        assert!(!hasher
            .hash(b"passphrase")
            .constant_time_eq(&hasher.hash(b"Passphrase")));
    }

    #[test]
    fn fresh_hasher_invalidates_digests() {
        let digest = PassphraseHasher::new().hash(b"passphrase");
        let replacement = PassphraseHasher::new();
        assert!(!replacement.hash(b"passphrase").constant_time_eq(&digest));
    }
}
