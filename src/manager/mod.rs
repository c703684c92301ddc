//! The address manager: top-level object owning the master keys, the crypto
//! keys, the account cache and the lock state.
//!
//! A [`Manager`] is created once per database namespace with
//! [`Manager::create`] (from a seed) or [`Manager::create_watching_only`]
//! (from an account extended public key), then opened per process with
//! [`Manager::open`]. It always starts locked. Every operation takes the
//! caller's redb transaction; nothing is committed here.
//!
//! Internally a single reader-writer lock guards the cached state. Read
//! operations that may lazily populate the account cache take the write
//! lock; cheap state probes take the read lock.

mod accounts;
mod addresses;
#[cfg(test)]
mod tests;

pub use accounts::{AccountProperties, AccountType};
pub use addresses::{AddressRef, ManagedAddress, PrivateKeyGuard};

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitcoin::bip32::{ExtendedPrivKey, ExtendedPubKey};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Secp256k1};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{
    Argon2idParams, CryptoKey, MasterKey, PassphraseHash, PassphraseHasher,
};
use crate::database::{self, accounts as db_accounts, addresses as db_addresses, Tx};
use crate::errors::{Error, Result};
use crate::hierarchy::{self, ChainParams, IMPORTED_ACCOUNT};

/// Name of the account created by provisioning
pub const DEFAULT_ACCOUNT_NAME: &str = "default";
/// Reserved name of the imported account
pub const IMPORTED_ACCOUNT_NAME: &str = "imported";

pub(crate) const LOCKED_STORE: &str = "the key store is locked";
pub(crate) const LOCKED_ACCOUNT: &str = "the account with its own passphrase is locked";

pub(crate) fn hash160(data: &[u8]) -> [u8; 20] {
    bitcoin::hashes::hash160::Hash::hash(data).to_byte_array()
}

/// In-memory projection of a persisted account
pub(crate) struct AccountInfo {
    pub(crate) account_type: AccountType,
    pub(crate) name: String,
    pub(crate) xpub: ExtendedPubKey,
    pub(crate) xpriv_enc: Vec<u8>,
    /// Attached while the store (or, for unique-passphrase accounts, the
    /// account itself) is unlocked
    pub(crate) xpriv: Option<ExtendedPrivKey>,
    pub(crate) unique_kdf: Option<Argon2idParams>,
    pub(crate) unique_hasher: PassphraseHasher,
    pub(crate) unique_pass_hash: Option<PassphraseHash>,
    pub(crate) last_used_external: u32,
    pub(crate) last_used_internal: u32,
    pub(crate) last_returned_external: u32,
    pub(crate) last_returned_internal: u32,
}

struct Inner {
    closed: bool,
    locked: bool,
    watching_only: bool,
    accounts: HashMap<u32, AccountInfo>,
    master_pub: MasterKey,
    /// Absent on a watching-only store
    master_priv: Option<MasterKey>,
    crypto_pub: CryptoKey,
    /// Absent on a watching-only store
    crypto_priv_enc: Option<Vec<u8>>,
    /// Present only while unlocked
    crypto_priv: Option<CryptoKey>,
    hasher: PassphraseHasher,
    priv_pass_hash: Option<PassphraseHash>,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Invalid("the key store is closed".to_owned()));
        }
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.watching_only {
            return Err(Error::WatchingOnly);
        }
        if self.locked {
            return Err(Error::Locked(LOCKED_STORE));
        }
        Ok(())
    }

    fn crypto_priv(&self) -> Result<&CryptoKey> {
        if self.watching_only {
            return Err(Error::WatchingOnly);
        }
        self.crypto_priv.as_ref().ok_or(Error::Locked(LOCKED_STORE))
    }

    /// Drop every piece of private key material from memory and mark the
    /// store locked. Safe to call in any state.
    fn lock_in_place(&mut self) {
        for info in self.accounts.values_mut() {
            info.xpriv = None;
            info.unique_pass_hash = None;
        }
        self.crypto_priv = None;
        if let Some(master) = self.master_priv.as_mut() {
            master.zero();
        }
        self.priv_pass_hash = None;
        self.locked = true;
    }
}

/// The hierarchical deterministic address manager and key store
pub struct Manager {
    chain_params: ChainParams,
    secp: Secp256k1<All>,
    inner: RwLock<Inner>,
}

impl Manager {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn chain_params(&self) -> &ChainParams {
        &self.chain_params
    }

    pub fn is_locked(&self) -> bool {
        self.read().locked
    }

    pub fn is_watching_only(&self) -> bool {
        self.read().watching_only
    }

    /// True once a manager has been created in this database
    pub fn exists(tx: &Tx) -> Result<bool> {
        database::manager_exists(tx)
    }

    /// Provision a brand new seeded manager in the caller's transaction
    ///
    /// Generates the master keys from the two passphrases, random crypto
    /// keys, both coin-type extended keys, the default account under the
    /// legacy coin type (plus the SLIP-0044 copy used by the later upgrade)
    /// and the reserved imported account.
    ///
    /// # Errors
    /// [`Error::Exist`] if a manager already lives in this database,
    /// [`Error::Seed`] if a required child of the seed is invalid.
    pub fn create(
        wtx: &redb::WriteTransaction,
        chain_params: ChainParams,
        seed: &[u8],
        pub_passphrase: &[u8],
        priv_passphrase: &[u8],
    ) -> Result<()> {
        if pub_passphrase.is_empty() || priv_passphrase.is_empty() {
            return Err(Error::Invalid("passphrases must not be empty".to_owned()));
        }
        if database::manager_exists(&Tx::Write(wtx))? {
            return Err(Error::Exist("an address manager".to_owned()));
        }
        let secp = Secp256k1::new();

        // Build the hierarchy first: a bad seed must fail before anything
        // is persisted
        let master = hierarchy::master_from_seed(chain_params.network, seed)?;
        let coin_type_legacy =
            hierarchy::derive_coin_type_key(&secp, &master, chain_params.legacy_coin_type)
                .map_err(seed_remap)?;
        let coin_type_slip0044 =
            hierarchy::derive_coin_type_key(&secp, &master, chain_params.slip0044_coin_type)
                .map_err(seed_remap)?;
        let account0_legacy =
            hierarchy::derive_account_key(&secp, &coin_type_legacy, 0).map_err(seed_remap)?;
        let account0_slip0044 =
            hierarchy::derive_account_key(&secp, &coin_type_slip0044, 0).map_err(seed_remap)?;
        hierarchy::check_branches_priv(&secp, &account0_legacy)?;
        hierarchy::check_branches_priv(&secp, &account0_slip0044)?;

        let options = chain_params.scrypt_options();
        let master_pub = MasterKey::generate(pub_passphrase, options)?;
        let master_priv = MasterKey::generate(priv_passphrase, options)?;
        let crypto_pub = CryptoKey::generate();
        let crypto_priv = CryptoKey::generate();

        database::put_master_params(wtx, database::KEY_MASTER_PUB_PARAMS, master_pub.params())?;
        database::put_master_params(wtx, database::KEY_MASTER_PRIV_PARAMS, master_priv.params())?;
        database::put_raw(
            wtx,
            database::KEY_CRYPTO_PUB,
            &master_pub.encrypt(crypto_pub.bytes())?,
        )?;
        database::put_raw(
            wtx,
            database::KEY_CRYPTO_PRIV,
            &master_priv.encrypt(crypto_priv.bytes())?,
        )?;

        // Both coin-type keys, encrypted under the crypto keys
        for (xpriv, pub_key_name, priv_key_name) in [
            (
                &coin_type_legacy,
                database::KEY_COIN_TYPE_LEGACY_PUB,
                database::KEY_COIN_TYPE_LEGACY_PRIV,
            ),
            (
                &coin_type_slip0044,
                database::KEY_COIN_TYPE_SLIP0044_PUB,
                database::KEY_COIN_TYPE_SLIP0044_PRIV,
            ),
        ] {
            let xpub = ExtendedPubKey::from_priv(&secp, xpriv);
            let xpriv_bytes = Zeroizing::new(xpriv.encode());
            database::put_raw(wtx, pub_key_name, &crypto_pub.encrypt(&xpub.encode())?)?;
            database::put_raw(wtx, priv_key_name, &crypto_priv.encrypt(&*xpriv_bytes)?)?;
        }

        // The default account, derived from the legacy coin type
        let account0_xpub = ExtendedPubKey::from_priv(&secp, &account0_legacy);
        let account0_xpriv_bytes = Zeroizing::new(account0_legacy.encode());
        let row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            crypto_pub.encrypt(&account0_xpub.encode())?,
            crypto_priv.encrypt(&*account0_xpriv_bytes)?,
        ));
        db_accounts::put_account_row(wtx, 0, &row)?;
        db_accounts::put_account_name(wtx, 0, DEFAULT_ACCOUNT_NAME)?;
        db_accounts::put_account_name_index(wtx, DEFAULT_ACCOUNT_NAME, 0)?;

        // The SLIP-0044 rendition of account 0, kept in the legacy row
        // format until the coin-type upgrade promotes it
        let slip_xpub = ExtendedPubKey::from_priv(&secp, &account0_slip0044);
        let slip_xpriv_bytes = Zeroizing::new(account0_slip0044.encode());
        let slip_row = db_accounts::AccountRow::Bip0044Legacy(db_accounts::LegacyAccountValues {
            xpub_enc: crypto_pub.encrypt(&slip_xpub.encode())?,
            xpriv_enc: crypto_priv.encrypt(&*slip_xpriv_bytes)?,
            next_external_index: 0,
            next_internal_index: 0,
            name: DEFAULT_ACCOUNT_NAME.to_owned(),
        });
        database::put_json(wtx, database::KEY_SLIP0044_ACCOUNT0_LEGACY, &slip_row)?;

        // The reserved imported account carries no keys
        let imported_row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            Vec::new(),
            Vec::new(),
        ));
        db_accounts::put_account_row(wtx, IMPORTED_ACCOUNT, &imported_row)?;
        db_accounts::put_account_name(wtx, IMPORTED_ACCOUNT, IMPORTED_ACCOUNT_NAME)?;
        db_accounts::put_account_name_index(wtx, IMPORTED_ACCOUNT_NAME, IMPORTED_ACCOUNT)?;

        database::put_last_account(wtx, 0)?;
        database::put_last_imported_account(wtx, IMPORTED_ACCOUNT)?;
        database::put_watching_only(wtx, false)?;

        log::info!(
            "created seeded address manager (network {})",
            chain_params.network
        );
        Ok(())
    }

    /// Provision a watching-only manager from an account extended public key
    ///
    /// Both master keys are derived from the public passphrase and no
    /// private material of any kind is persisted.
    pub fn create_watching_only(
        wtx: &redb::WriteTransaction,
        chain_params: ChainParams,
        account_xpub: &ExtendedPubKey,
        pub_passphrase: &[u8],
    ) -> Result<()> {
        if pub_passphrase.is_empty() {
            return Err(Error::Invalid("passphrase must not be empty".to_owned()));
        }
        if database::manager_exists(&Tx::Write(wtx))? {
            return Err(Error::Exist("an address manager".to_owned()));
        }
        let secp = Secp256k1::new();
        // An xpub both branches cannot be derived from is useless
        hierarchy::check_branches_pub(&secp, account_xpub)?;

        let options = chain_params.scrypt_options();
        let master_pub = MasterKey::generate(pub_passphrase, options)?;
        let master_priv = MasterKey::generate(pub_passphrase, options)?;
        let crypto_pub = CryptoKey::generate();

        database::put_master_params(wtx, database::KEY_MASTER_PUB_PARAMS, master_pub.params())?;
        database::put_master_params(wtx, database::KEY_MASTER_PRIV_PARAMS, master_priv.params())?;
        database::put_raw(
            wtx,
            database::KEY_CRYPTO_PUB,
            &master_pub.encrypt(crypto_pub.bytes())?,
        )?;

        let row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            crypto_pub.encrypt(&account_xpub.encode())?,
            Vec::new(),
        ));
        db_accounts::put_account_row(wtx, 0, &row)?;
        db_accounts::put_account_name(wtx, 0, DEFAULT_ACCOUNT_NAME)?;
        db_accounts::put_account_name_index(wtx, DEFAULT_ACCOUNT_NAME, 0)?;

        let imported_row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            Vec::new(),
            Vec::new(),
        ));
        db_accounts::put_account_row(wtx, IMPORTED_ACCOUNT, &imported_row)?;
        db_accounts::put_account_name(wtx, IMPORTED_ACCOUNT, IMPORTED_ACCOUNT_NAME)?;
        db_accounts::put_account_name_index(wtx, IMPORTED_ACCOUNT_NAME, IMPORTED_ACCOUNT)?;

        database::put_last_account(wtx, 0)?;
        database::put_last_imported_account(wtx, IMPORTED_ACCOUNT)?;
        database::put_watching_only(wtx, true)?;

        log::info!(
            "created watching-only address manager (network {})",
            chain_params.network
        );
        Ok(())
    }

    /// Open an existing manager; it starts locked
    ///
    /// # Errors
    /// [`Error::Passphrase`] if `pub_passphrase` does not match the stored
    /// public master key parameters.
    pub fn open(tx: &Tx, chain_params: ChainParams, pub_passphrase: &[u8]) -> Result<Manager> {
        if !database::manager_exists(tx)? {
            return Err(Error::NotExist("an address manager".to_owned()));
        }
        let watching_only = database::get_watching_only(tx)?;

        let pub_params = database::get_master_params(tx, database::KEY_MASTER_PUB_PARAMS)?
            .ok_or_else(|| Error::Io("missing public master key parameters".to_owned()))?;
        let mut master_pub = MasterKey::from_params(pub_params);
        master_pub.derive(pub_passphrase)?;

        let crypto_pub_enc = database::get_raw(tx, database::KEY_CRYPTO_PUB)?
            .ok_or_else(|| Error::Io("missing public crypto key".to_owned()))?;
        let crypto_pub = CryptoKey::from_slice(&master_pub.decrypt(&crypto_pub_enc)?)?;

        let (master_priv, crypto_priv_enc) = if watching_only {
            (None, None)
        } else {
            let priv_params = database::get_master_params(tx, database::KEY_MASTER_PRIV_PARAMS)?
                .ok_or_else(|| Error::Io("missing private master key parameters".to_owned()))?;
            let crypto_priv_enc = database::get_raw(tx, database::KEY_CRYPTO_PRIV)?
                .ok_or_else(|| Error::Io("missing private crypto key".to_owned()))?;
            (Some(MasterKey::from_params(priv_params)), Some(crypto_priv_enc))
        };

        log::debug!("opened address manager (watching_only={watching_only})");
        Ok(Manager {
            chain_params,
            secp: Secp256k1::new(),
            inner: RwLock::new(Inner {
                closed: false,
                locked: true,
                watching_only,
                accounts: HashMap::new(),
                master_pub,
                master_priv,
                crypto_pub,
                crypto_priv_enc,
                crypto_priv: None,
                hasher: PassphraseHasher::new(),
                priv_pass_hash: None,
            }),
        })
    }

    /// Derive the private material from `passphrase` and attach it
    ///
    /// On an already-unlocked store this only performs the constant-time
    /// digest comparison; a mismatch locks the store and returns
    /// [`Error::Passphrase`].
    pub fn unlock(&self, passphrase: &[u8]) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if inner.watching_only {
            return Err(Error::WatchingOnly);
        }

        if !inner.locked {
            let hash = inner.hasher.hash(passphrase);
            let authenticated = match &inner.priv_pass_hash {
                Some(stored) => stored.constant_time_eq(&hash),
                None => false,
            };
            if authenticated {
                return Ok(());
            }
            inner.lock_in_place();
            return Err(Error::Passphrase);
        }

        inner
            .master_priv
            .as_mut()
            .ok_or_else(|| Error::Io("missing private master key parameters".to_owned()))?
            .derive(passphrase)?;

        let decrypted = {
            let master = inner.master_priv.as_ref().expect("derived above");
            let ciphertext = inner
                .crypto_priv_enc
                .as_deref()
                .ok_or_else(|| Error::Io("missing private crypto key".to_owned()))?;
            master
                .decrypt(ciphertext)
                .and_then(|plain| CryptoKey::from_slice(&plain))
        };
        let crypto_priv = match decrypted {
            Ok(key) => key,
            Err(e) => {
                inner.lock_in_place();
                return Err(e);
            }
        };
        inner.crypto_priv = Some(crypto_priv);

        let attach_result = {
            let Inner {
                accounts,
                crypto_priv,
                ..
            } = &mut *inner;
            attach_account_keys(accounts, crypto_priv.as_ref().expect("set above"))
        };
        if let Err(e) = attach_result {
            inner.lock_in_place();
            return Err(e);
        }

        let pass_hash = inner.hasher.hash(passphrase);
        inner.priv_pass_hash = Some(pass_hash);
        inner.locked = false;
        log::debug!("key store unlocked");
        Ok(())
    }

    /// Scrub every private key from memory
    pub fn lock(&self) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if inner.watching_only {
            return Err(Error::WatchingOnly);
        }
        if inner.locked {
            return Err(Error::Locked("the key store is already locked"));
        }
        inner.lock_in_place();
        log::debug!("key store locked");
        Ok(())
    }

    /// Constant-time authentication of `passphrase` against the unlocked
    /// store, without any KDF work
    pub fn unlocked_with_passphrase(&self, passphrase: &[u8]) -> Result<()> {
        let inner = self.read();
        inner.ensure_open()?;
        if inner.watching_only {
            return Err(Error::WatchingOnly);
        }
        if inner.locked {
            return Err(Error::Locked(LOCKED_STORE));
        }
        let hash = inner.hasher.hash(passphrase);
        match &inner.priv_pass_hash {
            Some(stored) if stored.constant_time_eq(&hash) => Ok(()),
            _ => Err(Error::Passphrase),
        }
    }

    /// Re-encrypt the public or private crypto key under a new passphrase
    ///
    /// The in-memory state is only swapped after the new parameters and
    /// ciphertext have been written to the caller's transaction.
    pub fn change_passphrase(
        &self,
        wtx: &redb::WriteTransaction,
        old: &[u8],
        new: &[u8],
        private: bool,
    ) -> Result<()> {
        if new.is_empty() {
            return Err(Error::Invalid("passphrase must not be empty".to_owned()));
        }
        let mut inner = self.write();
        inner.ensure_open()?;
        let options = self.chain_params.scrypt_options();

        if private {
            if inner.watching_only {
                return Err(Error::WatchingOnly);
            }
            let params = inner
                .master_priv
                .as_ref()
                .ok_or_else(|| Error::Io("missing private master key parameters".to_owned()))?
                .params()
                .clone();
            // The digest comparison inside derive is the constant-time
            // check of the old passphrase
            let mut scratch = MasterKey::from_params(params);
            scratch.derive(old)?;
            let ciphertext = inner
                .crypto_priv_enc
                .clone()
                .ok_or_else(|| Error::Io("missing private crypto key".to_owned()))?;
            let plain = scratch.decrypt(&ciphertext)?;
            scratch.zero();

            let mut fresh = MasterKey::generate(new, options)?;
            let new_ciphertext = fresh.encrypt(&plain)?;
            database::put_master_params(wtx, database::KEY_MASTER_PRIV_PARAMS, fresh.params())?;
            database::put_raw(wtx, database::KEY_CRYPTO_PRIV, &new_ciphertext)?;

            inner.crypto_priv_enc = Some(new_ciphertext);
            if inner.locked {
                fresh.zero();
            } else {
                inner.hasher = PassphraseHasher::new();
                let pass_hash = inner.hasher.hash(new);
                inner.priv_pass_hash = Some(pass_hash);
            }
            inner.master_priv = Some(fresh);
            log::info!("private passphrase changed");
        } else {
            let mut scratch = MasterKey::from_params(inner.master_pub.params().clone());
            scratch.derive(old)?;
            scratch.zero();

            let fresh = MasterKey::generate(new, options)?;
            let new_ciphertext = fresh.encrypt(inner.crypto_pub.bytes())?;
            database::put_master_params(wtx, database::KEY_MASTER_PUB_PARAMS, fresh.params())?;
            database::put_raw(wtx, database::KEY_CRYPTO_PUB, &new_ciphertext)?;

            inner.master_pub = fresh;
            log::info!("public passphrase changed");
        }
        Ok(())
    }

    /// Strip every private ciphertext from the database and the cache,
    /// turning this into a watching-only store. Idempotent.
    pub fn convert_to_watching_only(&self, wtx: &redb::WriteTransaction) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if inner.watching_only {
            return Ok(());
        }

        database::delete_raw(wtx, database::KEY_CRYPTO_PRIV)?;
        database::delete_raw(wtx, database::KEY_COIN_TYPE_LEGACY_PRIV)?;
        database::delete_raw(wtx, database::KEY_COIN_TYPE_SLIP0044_PRIV)?;

        let tx = Tx::Write(wtx);
        if let Some(mut row) =
            database::get_json::<db_accounts::AccountRow>(&tx, database::KEY_SLIP0044_ACCOUNT0_LEGACY)?
        {
            if let db_accounts::AccountRow::Bip0044Legacy(values) = &mut row {
                values.xpriv_enc.zeroize();
                values.xpriv_enc = Vec::new();
            }
            database::put_json(wtx, database::KEY_SLIP0044_ACCOUNT0_LEGACY, &row)?;
        }

        for (account, mut row) in db_accounts::list_account_rows(&tx)? {
            let rewrite = match row.values_mut() {
                Some(values) if !values.xpriv_enc.is_empty() => {
                    values.xpriv_enc.zeroize();
                    values.xpriv_enc = Vec::new();
                    true
                }
                _ => false,
            };
            if rewrite {
                db_accounts::put_account_row(wtx, account, &row)?;
                db_accounts::delete_account_kdf(wtx, account)?;
            }
        }

        for (hash, mut row) in db_addresses::list_addresses(&tx)? {
            if let db_addresses::AddressRow::ImportedKey { privkey_enc, .. } = &mut row {
                if !privkey_enc.is_empty() {
                    privkey_enc.zeroize();
                    *privkey_enc = Vec::new();
                    db_addresses::put_address(wtx, &hash, IMPORTED_ACCOUNT, &row)?;
                }
            }
        }

        database::put_watching_only(wtx, true)?;

        inner.lock_in_place();
        for info in inner.accounts.values_mut() {
            info.xpriv_enc.zeroize();
            info.xpriv_enc = Vec::new();
            info.unique_kdf = None;
            info.unique_pass_hash = None;
        }
        inner.crypto_priv_enc = None;
        inner.master_priv = None;
        inner.watching_only = true;
        log::info!("key store converted to watching-only");
        Ok(())
    }

    /// Scrub every cached secret, public material included, and mark the
    /// manager unusable
    pub fn close(&self) {
        let mut inner = self.write();
        if inner.closed {
            return;
        }
        inner.lock_in_place();
        inner.accounts.clear();
        inner.crypto_pub.zero();
        inner.master_pub.zero();
        inner.closed = true;
        log::debug!("key store closed");
    }

    /// Fetch `account` into the cache if needed
    ///
    /// Callers that also need other `Inner` fields re-borrow the entry from
    /// `inner.accounts` after this returns.
    fn load_account_info(&self, inner: &mut Inner, tx: &Tx, account: u32) -> Result<()> {
        if inner.accounts.contains_key(&account) {
            return Ok(());
        }
        if account == IMPORTED_ACCOUNT {
            return Err(Error::Invalid(
                "the imported account has no extended keys".to_owned(),
            ));
        }
        let row = db_accounts::get_account_row(tx, account)?
            .ok_or_else(|| Error::NotExist(format!("account {account}")))?;
        let account_type = match &row {
            db_accounts::AccountRow::Bip0044(_) => AccountType::Bip0044,
            db_accounts::AccountRow::ImportedVoting(_) => AccountType::ImportedVoting,
            db_accounts::AccountRow::Bip0044Legacy(_) => {
                return Err(Error::Io(format!(
                    "account {account} row is still in the legacy format"
                )))
            }
        };
        let values = row.values().expect("legacy rejected above");
        let name = db_accounts::get_account_name(tx, account)?
            .ok_or_else(|| Error::Io(format!("account {account} has no name variable")))?;
        let unique_kdf = db_accounts::get_account_kdf(tx, account)?;

        let xpub_bytes = inner.crypto_pub.decrypt(&values.xpub_enc)?;
        let xpub = ExtendedPubKey::decode(&xpub_bytes)
            .map_err(|e| Error::Io(format!("corrupt account {account} public key: {e}")))?;

        // Private side attaches eagerly while the store is unlocked; unique
        // passphrase accounts only attach through unlock_account
        let xpriv = if !inner.locked && unique_kdf.is_none() && !values.xpriv_enc.is_empty() {
            let crypto_priv = inner.crypto_priv()?;
            let xpriv_bytes = crypto_priv.decrypt(&values.xpriv_enc)?;
            Some(
                ExtendedPrivKey::decode(&xpriv_bytes)
                    .map_err(|e| Error::Io(format!("corrupt account {account} private key: {e}")))?,
            )
        } else {
            None
        };

        inner.accounts.insert(
            account,
            AccountInfo {
                account_type,
                name,
                xpub,
                xpriv_enc: values.xpriv_enc.clone(),
                xpriv,
                unique_kdf,
                unique_hasher: PassphraseHasher::new(),
                unique_pass_hash: None,
                last_used_external: values.last_used_external,
                last_used_internal: values.last_used_internal,
                last_returned_external: values.last_returned_external,
                last_returned_internal: values.last_returned_internal,
            },
        );
        Ok(())
    }
}

/// Decrypt and attach the private extended key of every cached account
/// protected by the global crypto private key
fn attach_account_keys(
    accounts: &mut HashMap<u32, AccountInfo>,
    crypto_priv: &CryptoKey,
) -> Result<()> {
    for (account, info) in accounts.iter_mut() {
        if info.unique_kdf.is_some() || info.xpriv_enc.is_empty() || info.xpriv.is_some() {
            continue;
        }
        let xpriv_bytes = crypto_priv.decrypt(&info.xpriv_enc)?;
        let xpriv = ExtendedPrivKey::decode(&xpriv_bytes)
            .map_err(|e| Error::Io(format!("corrupt account {account} private key: {e}")))?;
        info.xpriv = Some(xpriv);
    }
    Ok(())
}

fn seed_remap(e: Error) -> Error {
    match e {
        Error::Derivation(_) => Error::Seed,
        e => e,
    }
}
