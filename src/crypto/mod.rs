//! Symmetric sealing primitives for material at rest.
//!
//! Two sealing paths exist. The global path encrypts application data with a
//! random 32-byte [`CryptoKey`] that is itself persisted encrypted under a
//! passphrase-derived [`MasterKey`]. The per-account path seals an account's
//! private extended key directly under an Argon2id-derived key so the
//! account answers to its own passphrase instead of the global one.
//!
//! Both paths use XChaCha20-Poly1305 with a random 24-byte nonce prepended
//! to the ciphertext and a 16-byte authentication tag appended by the AEAD.

mod hasher;
mod kdf;

pub use hasher::{PassphraseHash, PassphraseHasher};
pub use kdf::{Argon2idParams, MasterKey, MasterKeyParams, ScryptOptions};
pub(crate) use kdf::{open_with_passphrase, seal_with_passphrase};

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::errors::{Error, Result};

/// Length in bytes of every symmetric key handled by this module
pub const KEY_LEN: usize = 32;
/// Length in bytes of the XChaCha20-Poly1305 nonce prepended to sealed data
pub const NONCE_LEN: usize = 24;
/// Length in bytes of the Poly1305 authentication tag
pub const TAG_LEN: usize = 16;

/// Minimum length of a well-formed sealed buffer
pub(crate) const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Failure modes of [`open`], mapped to an [`Error`] kind by the caller
/// because the two sealing paths surface authentication failures
/// differently.
#[derive(Debug)]
pub(crate) enum UnsealError {
    /// The buffer cannot even contain a nonce and a tag
    TooShort,
    /// The authentication tag did not verify
    Auth,
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Seal `plaintext` under `key`, returning `nonce || ciphertext || tag`
pub(crate) fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Crypto("encryption failure"))?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.append(&mut sealed);
    Ok(out)
}

/// Open a buffer produced by [`seal`]
///
/// The plaintext comes back in a [`Zeroizing`] buffer so it is scrubbed when
/// the caller releases it.
pub(crate) fn open(
    key: &[u8; KEY_LEN],
    sealed: &[u8],
) -> core::result::Result<Zeroizing<Vec<u8>>, UnsealError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(UnsealError::TooShort);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| UnsealError::Auth)
}

/// A random symmetric key protecting application data at rest
///
/// Two of these exist per store: one for public material (usable while the
/// store is locked) and one for private material (only in memory while the
/// store is unlocked). The key bytes are scrubbed on drop.
pub struct CryptoKey(Zeroizing<[u8; KEY_LEN]>);

impl CryptoKey {
    /// Generate a fresh random key from the system CSPRNG
    pub(crate) fn generate() -> Self {
        Self(Zeroizing::new(random_bytes()))
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("unexpected crypto key length"))?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Scrub the key bytes in place
    pub(crate) fn zero(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        seal(&self.0, plaintext)
    }

    /// Decrypt a sealed buffer
    ///
    /// Any failure on this path is a [`Error::Crypto`]: a crypto key is
    /// random material, so a bad tag here means corruption, not a mistyped
    /// passphrase.
    pub(crate) fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        open(&self.0, sealed).map_err(|e| match e {
            UnsealError::TooShort => Error::Crypto("sealed buffer is too short"),
            UnsealError::Auth => Error::Crypto("authentication failure"),
        })
    }
}

impl core::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never display key bytes
        f.write_str("CryptoKey(..)")
    }
}
