//! Pure BIP-0043/0044 derivation over the `bitcoin` bip32 primitives.
//!
//! Paths are `m / 44' / coin_type' / account' / branch / index`, hardened
//! from the root through the account level inclusive. Nothing in this module
//! touches storage or encryption; it only turns extended keys into child
//! extended keys and enforces the numeric boundaries of the scheme.

use bitcoin::bip32::{ChildNumber, ExtendedPrivKey, ExtendedPubKey};
use bitcoin::secp256k1::{Secp256k1, Signing, Verification};
use bitcoin::Network;

use crate::crypto::ScryptOptions;
use crate::errors::{Error, Result};

/// First hardened child index (2^31)
pub const HARDENED_KEY_START: u32 = 1 << 31;
/// BIP-0043 purpose field of every path this store derives
pub const BIP0044_PURPOSE: u32 = 44;
/// Branch for externally shared receive addresses
pub const EXTERNAL_BRANCH: u32 = 0;
/// Branch for internal change addresses
pub const INTERNAL_BRANCH: u32 = 1;
/// Highest valid SLIP-0044 coin type (2^31 - 1)
pub const MAX_COIN_TYPE: u32 = HARDENED_KEY_START - 1;
/// Highest account number available to callers (2^31 - 2)
pub const MAX_ACCOUNT_NUM: u32 = HARDENED_KEY_START - 2;
/// The reserved account holding imported keys and scripts (2^31 - 1)
///
/// It is not a derivation target and never has extended keys of its own.
pub const IMPORTED_ACCOUNT: u32 = HARDENED_KEY_START - 1;
/// Highest address index on either branch
pub const MAX_ADDRESSES_PER_ACCOUNT: u32 = HARDENED_KEY_START - 1;

/// The all-ones sentinel meaning "no child index recorded yet"
pub const NO_CHILD_INDEX: u32 = u32::MAX;

/// Seed length bounds in bytes
pub const MIN_SEED_BYTES: usize = 16;
pub const MAX_SEED_BYTES: usize = 64;

/// Network parameters the store needs from the chain parameter table
///
/// The wallet historically derived keys under a pre-SLIP-0044 coin type;
/// both values are carried so a store created under the legacy number can be
/// upgraded in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub network: Network,
    pub legacy_coin_type: u32,
    pub slip0044_coin_type: u32,
}

impl ChainParams {
    pub const fn new(network: Network, legacy_coin_type: u32, slip0044_coin_type: u32) -> Self {
        Self {
            network,
            legacy_coin_type,
            slip0044_coin_type,
        }
    }

    /// Master-key KDF cost for this network
    ///
    /// Simulation networks use throwaway keys, so they get parameters that
    /// keep test runs fast.
    pub fn scrypt_options(&self) -> ScryptOptions {
        match self.network {
            Network::Regtest => ScryptOptions::FAST,
            _ => ScryptOptions::DEFAULT,
        }
    }
}

/// Build the BIP-0032 master key for `seed`
pub(crate) fn master_from_seed(network: Network, seed: &[u8]) -> Result<ExtendedPrivKey> {
    if seed.len() < MIN_SEED_BYTES || seed.len() > MAX_SEED_BYTES {
        return Err(Error::Invalid(format!(
            "seed must be between {MIN_SEED_BYTES} and {MAX_SEED_BYTES} bytes, got {}",
            seed.len()
        )));
    }
    // The only other failure mode is the (cryptographically negligible)
    // invalid master key, which makes the seed itself unusable
    ExtendedPrivKey::new_master(network, seed).map_err(|_| Error::Seed)
}

/// Derive `m/44'/coin_type'` from the master key
pub(crate) fn derive_coin_type_key<C: Signing>(
    secp: &Secp256k1<C>,
    master: &ExtendedPrivKey,
    coin_type: u32,
) -> Result<ExtendedPrivKey> {
    if coin_type > MAX_COIN_TYPE {
        return Err(Error::Invalid(format!(
            "coin type {coin_type} is beyond the hardened range"
        )));
    }
    let purpose = master.ckd_priv(secp, hardened(BIP0044_PURPOSE)?)?;
    Ok(purpose.ckd_priv(secp, hardened(coin_type)?)?)
}

/// Derive `account'` from a coin-type key
pub(crate) fn derive_account_key<C: Signing>(
    secp: &Secp256k1<C>,
    coin_type_key: &ExtendedPrivKey,
    account: u32,
) -> Result<ExtendedPrivKey> {
    if account > MAX_ACCOUNT_NUM {
        return Err(Error::Invalid(format!(
            "account number {account} is beyond the usable hardened range"
        )));
    }
    Ok(coin_type_key.ckd_priv(secp, hardened(account)?)?)
}

/// Check that both address branches derive from an account private key
///
/// Used during provisioning, where an invalid child at either branch makes
/// the whole seed unusable.
pub(crate) fn check_branches_priv<C: Signing>(
    secp: &Secp256k1<C>,
    account_key: &ExtendedPrivKey,
) -> Result<()> {
    for branch in [EXTERNAL_BRANCH, INTERNAL_BRANCH] {
        account_key
            .ckd_priv(secp, normal(branch)?)
            .map_err(|_| Error::Seed)?;
    }
    Ok(())
}

/// Check that both address branches derive from an account public key
pub(crate) fn check_branches_pub<C: Verification>(
    secp: &Secp256k1<C>,
    account_key: &ExtendedPubKey,
) -> Result<()> {
    for branch in [EXTERNAL_BRANCH, INTERNAL_BRANCH] {
        account_key
            .ckd_pub(secp, normal(branch)?)
            .map_err(|_| Error::Seed)?;
    }
    Ok(())
}

pub(crate) fn hardened(index: u32) -> Result<ChildNumber> {
    Ok(ChildNumber::from_hardened_idx(index)?)
}

pub(crate) fn normal(index: u32) -> Result<ChildNumber> {
    Ok(ChildNumber::from_normal_idx(index)?)
}

/// Reject anything that is not one of the two fixed address branches
pub(crate) fn check_branch(branch: u32) -> Result<()> {
    if branch != EXTERNAL_BRANCH && branch != INTERNAL_BRANCH {
        return Err(Error::Invalid(format!("{branch} is not a valid branch")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-0032 test vector 1
    const TV1_SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn master_matches_bip32_vector() {
        let seed = hex::decode(TV1_SEED).unwrap();
        let master = master_from_seed(Network::Bitcoin, &seed).unwrap();
        assert_eq!(
            master.to_string(),
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
        );
    }

    #[test]
    fn seed_length_is_enforced() {
        assert!(matches!(
            master_from_seed(Network::Bitcoin, &[0u8; MIN_SEED_BYTES - 1]),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            master_from_seed(Network::Bitcoin, &[0u8; MAX_SEED_BYTES + 1]),
            Err(Error::Invalid(_))
        ));
        assert!(master_from_seed(Network::Bitcoin, &[0u8; MIN_SEED_BYTES]).is_ok());
    }

    #[test]
    fn account_key_boundaries() {
        let secp = Secp256k1::new();
        let seed = hex::decode(TV1_SEED).unwrap();
        let master = master_from_seed(Network::Bitcoin, &seed).unwrap();
        let coin_type_key = derive_coin_type_key(&secp, &master, 0).unwrap();

        assert!(derive_account_key(&secp, &coin_type_key, MAX_ACCOUNT_NUM).is_ok());
        assert!(matches!(
            derive_account_key(&secp, &coin_type_key, MAX_ACCOUNT_NUM + 1),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            derive_coin_type_key(&secp, &master, MAX_COIN_TYPE + 1),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn private_and_public_branch_derivation_agree() {
        let secp = Secp256k1::new();
        let seed = hex::decode(TV1_SEED).unwrap();
        let master = master_from_seed(Network::Bitcoin, &seed).unwrap();
        let coin_type_key = derive_coin_type_key(&secp, &master, 42).unwrap();
        let account_key = derive_account_key(&secp, &coin_type_key, 0).unwrap();
        check_branches_priv(&secp, &account_key).unwrap();

        let account_pub = ExtendedPubKey::from_priv(&secp, &account_key);
        check_branches_pub(&secp, &account_pub).unwrap();

        for branch in [EXTERNAL_BRANCH, INTERNAL_BRANCH] {
            let child_priv = account_key
                .ckd_priv(&secp, normal(branch).unwrap())
                .unwrap()
                .ckd_priv(&secp, normal(7).unwrap())
                .unwrap();
            let child_pub = account_pub
                .ckd_pub(&secp, normal(branch).unwrap())
                .unwrap()
                .ckd_pub(&secp, normal(7).unwrap())
                .unwrap();
            assert_eq!(
                ExtendedPubKey::from_priv(&secp, &child_priv).public_key,
                child_pub.public_key
            );
        }
    }

    #[test]
    fn branch_check() {
        assert!(check_branch(EXTERNAL_BRANCH).is_ok());
        assert!(check_branch(INTERNAL_BRANCH).is_ok());
        assert!(matches!(check_branch(2), Err(Error::Invalid(_))));
    }
}
