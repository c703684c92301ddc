use argon2::{Algorithm, Argon2, Version};
use bitcoin::hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{open, random_bytes, seal, UnsealError, KEY_LEN};
use crate::errors::{Error, Result};

/// Length in bytes of the random scrypt salt
pub const SCRYPT_SALT_LEN: usize = 32;
/// Length in bytes of the random Argon2id salt
pub const ARGON2_SALT_LEN: usize = 16;

/// Scrypt cost parameters used when generating a new master key
///
/// The cost is a property of the network the store serves: simulation
/// networks trade security for test speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptOptions {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptOptions {
    /// Production parameters: N=2^18, r=8, p=1
    pub const DEFAULT: Self = Self { log_n: 18, r: 8, p: 1 };
    /// Weak parameters for simulation networks: N=2, r=1, p=1
    pub const FAST: Self = Self { log_n: 1, r: 1, p: 1 };
}

/// Persisted parameters of a master key
///
/// `digest` is the SHA-256 of the derived key, used to reject a wrong
/// passphrase at derivation time without a decryption probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyParams {
    pub salt: [u8; SCRYPT_SALT_LEN],
    pub digest: [u8; KEY_LEN],
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

/// A passphrase-derived key whose only job is to encrypt a [`CryptoKey`]
///
/// The parameters survive locking; the derived key bytes do not.
///
/// [`CryptoKey`]: super::CryptoKey
pub struct MasterKey {
    params: MasterKeyParams,
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl MasterKey {
    /// Derive a brand new master key from `passphrase` under a random salt
    pub fn generate(passphrase: &[u8], options: ScryptOptions) -> Result<Self> {
        let salt = random_bytes::<SCRYPT_SALT_LEN>();
        let key = scrypt_derive(passphrase, &salt, options.log_n, options.r, options.p)?;
        let digest = sha256::Hash::hash(&*key).to_byte_array();
        Ok(Self {
            params: MasterKeyParams {
                salt,
                digest,
                log_n: options.log_n,
                r: options.r,
                p: options.p,
            },
            key: Some(key),
        })
    }

    /// Rebuild a master key from persisted parameters, underived
    pub fn from_params(params: MasterKeyParams) -> Self {
        Self { params, key: None }
    }

    pub fn params(&self) -> &MasterKeyParams {
        &self.params
    }

    pub fn is_derived(&self) -> bool {
        self.key.is_some()
    }

    /// Re-derive the key bytes from `passphrase`
    ///
    /// # Errors
    /// Returns [`Error::Passphrase`] if the derived key does not match the
    /// stored digest. The comparison is constant-time.
    pub fn derive(&mut self, passphrase: &[u8]) -> Result<()> {
        let key = scrypt_derive(
            passphrase,
            &self.params.salt,
            self.params.log_n,
            self.params.r,
            self.params.p,
        )?;
        let digest = sha256::Hash::hash(&*key).to_byte_array();
        if !bool::from(digest.as_slice().ct_eq(self.params.digest.as_slice())) {
            return Err(Error::Passphrase);
        }
        self.key = Some(key);
        Ok(())
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .key
            .as_ref()
            .ok_or(Error::Crypto("master key has no derived key material"))?;
        seal(key, plaintext)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let key = self
            .key
            .as_ref()
            .ok_or(Error::Crypto("master key has no derived key material"))?;
        open(key, sealed).map_err(|e| match e {
            UnsealError::TooShort => Error::Crypto("sealed buffer is too short"),
            UnsealError::Auth => Error::Crypto("authentication failure"),
        })
    }

    /// Scrub the derived key bytes, keeping the parameters
    pub fn zero(&mut self) {
        self.key = None;
    }
}

fn scrypt_derive(
    passphrase: &[u8],
    salt: &[u8],
    log_n: u8,
    r: u32,
    p: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let params = scrypt::Params::new(log_n, r, p, KEY_LEN)
        .map_err(|_| Error::Crypto("invalid scrypt parameters"))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(passphrase, salt, &params, &mut *key)
        .map_err(|_| Error::Crypto("scrypt derivation failure"))?;
    Ok(key)
}

/// Persisted Argon2id parameters of a unique-passphrase account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argon2idParams {
    pub salt: [u8; ARGON2_SALT_LEN],
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Argon2idParams {
    // RFC 9106 first recommended option: 64 MiB, 1 pass, 4 lanes
    const DEFAULT_M_COST: u32 = 64 * 1024;
    const DEFAULT_T_COST: u32 = 1;
    const DEFAULT_P_COST: u32 = 4;

    /// Fresh parameters with a random salt and the default costs
    pub fn generate() -> Self {
        Self {
            salt: random_bytes(),
            m_cost: Self::DEFAULT_M_COST,
            t_cost: Self::DEFAULT_T_COST,
            p_cost: Self::DEFAULT_P_COST,
        }
    }

    /// Derive the 32-byte sealing key for `passphrase`
    pub fn derive_key(&self, passphrase: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let params = argon2::Params::new(self.m_cost, self.t_cost, self.p_cost, Some(KEY_LEN))
            .map_err(|_| Error::Crypto("invalid argon2id parameters"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(passphrase, &self.salt, &mut *key)
            .map_err(|_| Error::Crypto("argon2id derivation failure"))?;
        Ok(key)
    }
}

/// Seal `plaintext` under an Argon2id-derived key
pub(crate) fn seal_with_passphrase(
    params: &Argon2idParams,
    passphrase: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let key = params.derive_key(passphrase)?;
    seal(&key, plaintext)
}

/// Open a buffer sealed by [`seal_with_passphrase`]
///
/// # Errors
/// An authentication failure is surfaced as [`Error::Passphrase`]: on this
/// path a bad tag means the user typed the wrong passphrase, and callers
/// must not be left wondering whether their data was tampered with. A
/// buffer too short to carry a nonce and tag is [`Error::Crypto`].
pub(crate) fn open_with_passphrase(
    params: &Argon2idParams,
    passphrase: &[u8],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let key = params.derive_key(passphrase)?;
    open(&key, sealed).map_err(|e| match e {
        UnsealError::TooShort => Error::Crypto("sealed buffer is too short"),
        UnsealError::Auth => Error::Passphrase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test-sized costs, the defaults are deliberately slow
    fn test_argon2id_params() -> Argon2idParams {
        Argon2idParams {
            salt: random_bytes(),
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn master_key_derive_roundtrip() {
        let mut key = MasterKey::generate(b"passphrase", ScryptOptions::FAST).unwrap();
        let sealed = key.encrypt(b"crypto key bytes").unwrap();

        let mut reloaded = MasterKey::from_params(key.params().clone());
        assert!(!reloaded.is_derived());
        reloaded.derive(b"passphrase").unwrap();
        assert_eq!(&reloaded.decrypt(&sealed).unwrap()[..], b"crypto key bytes");

        key.zero();
        assert!(!key.is_derived());
        assert!(matches!(key.decrypt(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn master_key_wrong_passphrase() {
        let key = MasterKey::generate(b"passphrase", ScryptOptions::FAST).unwrap();
        let mut reloaded = MasterKey::from_params(key.params().clone());
        assert!(matches!(reloaded.derive(b"nope"), Err(Error::Passphrase)));
        assert!(!reloaded.is_derived());
    }

    #[test]
    fn account_seal_roundtrip() {
        let params = test_argon2id_params();
        let sealed = seal_with_passphrase(&params, b"apple", b"xpriv bytes").unwrap();
        let opened = open_with_passphrase(&params, b"apple", &sealed).unwrap();
        assert_eq!(&opened[..], b"xpriv bytes");
    }

    #[test]
    fn account_seal_wrong_passphrase_is_passphrase_error() {
        let params = test_argon2id_params();
        let sealed = seal_with_passphrase(&params, b"apple", b"xpriv bytes").unwrap();
        assert!(matches!(
            open_with_passphrase(&params, b"orange", &sealed),
            Err(Error::Passphrase)
        ));
    }

    #[test]
    fn account_seal_short_buffer_is_crypto_error() {
        let params = test_argon2id_params();
        assert!(matches!(
            open_with_passphrase(&params, b"apple", &[0u8; 39]),
            Err(Error::Crypto(_))
        ));
    }
}
