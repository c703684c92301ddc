//! Account operations: creation, imports, per-account passphrases, usage
//! watermarks, renaming and the SLIP-0044 coin-type upgrade.

use bitcoin::bip32::{ExtendedPrivKey, ExtendedPubKey};
use zeroize::Zeroizing;

use super::{
    hash160, AccountInfo, Manager, IMPORTED_ACCOUNT_NAME, LOCKED_ACCOUNT, LOCKED_STORE,
};
use crate::crypto::{self, Argon2idParams, PassphraseHasher};
use crate::database::{self, accounts as db_accounts, addresses as db_addresses, Tx};
use crate::errors::{Error, Result};
use crate::hierarchy::{
    self, EXTERNAL_BRANCH, IMPORTED_ACCOUNT, MAX_ACCOUNT_NUM, NO_CHILD_INDEX,
};

/// The two live account shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    /// A BIP-0044 account, derived from the seed or imported as an xpub
    Bip0044,
    /// An imported voting account sealed under its own passphrase
    ImportedVoting,
}

/// A snapshot of everything user-visible about an account
#[derive(Debug, Clone)]
pub struct AccountProperties {
    pub account_number: u32,
    pub account_name: String,
    pub account_type: AccountType,
    pub last_used_external_index: u32,
    pub last_used_internal_index: u32,
    pub last_returned_external_index: u32,
    pub last_returned_internal_index: u32,
    /// Only populated for the reserved imported account
    pub imported_key_count: u32,
    /// True when the account is sealed under its own passphrase
    pub account_encrypted: bool,
    /// True when the account's private extended key is attached
    pub account_unlocked: bool,
}

fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Invalid("account name must not be empty".to_owned()));
    }
    if name == IMPORTED_ACCOUNT_NAME {
        return Err(Error::Invalid(format!(
            "\"{IMPORTED_ACCOUNT_NAME}\" is a reserved account name"
        )));
    }
    Ok(())
}

/// Next free number in the imported range `(IMPORTED_ACCOUNT, u32::MAX]`
///
/// The counter starts at the reserved account itself; the guard is against
/// wrapping past the end of the 32-bit space, not against the BIP-0044
/// account bound.
fn reserve_imported_account(tx: &Tx) -> Result<u32> {
    let last = database::get_last_imported_account(tx)?
        .ok_or_else(|| Error::Io("missing imported account counter".to_owned()))?;
    last.checked_add(1).ok_or_else(|| {
        Error::Invalid("no more imported account numbers are available".to_owned())
    })
}

/// Ciphertext of the currently active coin-type private key
fn coin_type_priv_ciphertext(tx: &Tx) -> Result<Vec<u8>> {
    if let Some(ciphertext) = database::get_raw(tx, database::KEY_COIN_TYPE_LEGACY_PRIV)? {
        return Ok(ciphertext);
    }
    if let Some(ciphertext) = database::get_raw(tx, database::KEY_COIN_TYPE_SLIP0044_PRIV)? {
        return Ok(ciphertext);
    }
    Err(Error::WatchingOnly)
}

/// Rewrite the private-key ciphertext of a persisted account row
fn update_account_row_xpriv(
    wtx: &redb::WriteTransaction,
    account: u32,
    xpriv_enc: Vec<u8>,
) -> Result<()> {
    let tx = Tx::Write(wtx);
    let mut row = db_accounts::get_account_row(&tx, account)?
        .ok_or_else(|| Error::NotExist(format!("account {account}")))?;
    let values = row.values_mut().ok_or_else(|| {
        Error::Io(format!("account {account} row is still in the legacy format"))
    })?;
    values.xpriv_enc = xpriv_enc;
    db_accounts::put_account_row(wtx, account, &row)
}

/// Copy the cached watermarks of `info` into the persisted row
fn persist_watermarks(
    wtx: &redb::WriteTransaction,
    account: u32,
    info: &AccountInfo,
) -> Result<()> {
    let tx = Tx::Write(wtx);
    let mut row = db_accounts::get_account_row(&tx, account)?
        .ok_or_else(|| Error::NotExist(format!("account {account}")))?;
    let values = row.values_mut().ok_or_else(|| {
        Error::Io(format!("account {account} row is still in the legacy format"))
    })?;
    values.last_used_external = info.last_used_external;
    values.last_used_internal = info.last_used_internal;
    values.last_returned_external = info.last_returned_external;
    values.last_returned_internal = info.last_returned_internal;
    db_accounts::put_account_row(wtx, account, &row)
}

impl AccountInfo {
    fn last_used(&self, branch: u32) -> u32 {
        if branch == EXTERNAL_BRANCH {
            self.last_used_external
        } else {
            self.last_used_internal
        }
    }
    fn set_last_used(&mut self, branch: u32, index: u32) {
        if branch == EXTERNAL_BRANCH {
            self.last_used_external = index;
        } else {
            self.last_used_internal = index;
        }
    }
    fn last_returned(&self, branch: u32) -> u32 {
        if branch == EXTERNAL_BRANCH {
            self.last_returned_external
        } else {
            self.last_returned_internal
        }
    }
    fn set_last_returned(&mut self, branch: u32, index: u32) {
        if branch == EXTERNAL_BRANCH {
            self.last_returned_external = index;
        } else {
            self.last_returned_internal = index;
        }
    }
}

impl Manager {
    /// Create the next BIP-0044 account and return its number
    ///
    /// Requires the store unlocked: the new account keys are derived from
    /// the active coin-type private key.
    pub fn new_account(&self, wtx: &redb::WriteTransaction, name: &str) -> Result<u32> {
        validate_account_name(name)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        inner.ensure_unlocked()?;
        let tx = Tx::Write(wtx);
        if db_accounts::lookup_account_number(&tx, name)?.is_some() {
            return Err(Error::Exist(format!("account \"{name}\"")));
        }
        let last = database::get_last_account(&tx)?
            .ok_or_else(|| Error::Io("missing account counter".to_owned()))?;
        if last >= MAX_ACCOUNT_NUM {
            return Err(Error::Invalid(
                "no more account numbers are available".to_owned(),
            ));
        }
        let account = last + 1;

        let (account_xpriv, account_xpub, xpub_enc, xpriv_enc) = {
            let crypto_priv = inner.crypto_priv()?;
            let coin_type_bytes = crypto_priv.decrypt(&coin_type_priv_ciphertext(&tx)?)?;
            let coin_type_key = ExtendedPrivKey::decode(&coin_type_bytes)
                .map_err(|e| Error::Io(format!("corrupt coin type private key: {e}")))?;
            let account_xpriv = hierarchy::derive_account_key(&self.secp, &coin_type_key, account)?;
            let account_xpub = ExtendedPubKey::from_priv(&self.secp, &account_xpriv);
            let xpriv_bytes = Zeroizing::new(account_xpriv.encode());
            let xpub_enc = inner.crypto_pub.encrypt(&account_xpub.encode())?;
            let xpriv_enc = crypto_priv.encrypt(&*xpriv_bytes)?;
            (account_xpriv, account_xpub, xpub_enc, xpriv_enc)
        };

        let row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            xpub_enc,
            xpriv_enc.clone(),
        ));
        db_accounts::put_account_row(wtx, account, &row)?;
        db_accounts::put_account_name(wtx, account, name)?;
        db_accounts::put_account_name_index(wtx, name, account)?;
        database::put_last_account(wtx, account)?;

        inner.accounts.insert(
            account,
            AccountInfo {
                account_type: AccountType::Bip0044,
                name: name.to_owned(),
                xpub: account_xpub,
                xpriv_enc,
                xpriv: Some(account_xpriv),
                unique_kdf: None,
                unique_hasher: PassphraseHasher::new(),
                unique_pass_hash: None,
                last_used_external: NO_CHILD_INDEX,
                last_used_internal: NO_CHILD_INDEX,
                last_returned_external: NO_CHILD_INDEX,
                last_returned_internal: NO_CHILD_INDEX,
            },
        );
        log::info!("created account {account} (\"{name}\")");
        Ok(account)
    }

    /// Import an account-level extended public key as a new account in the
    /// imported range
    ///
    /// Only the public side is populated, so this works on locked and
    /// watching-only stores.
    pub fn import_xpub_account(
        &self,
        wtx: &redb::WriteTransaction,
        name: &str,
        xpub: &ExtendedPubKey,
    ) -> Result<u32> {
        validate_account_name(name)?;
        hierarchy::check_branches_pub(&self.secp, xpub)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        if db_accounts::lookup_account_number(&tx, name)?.is_some() {
            return Err(Error::Exist(format!("account \"{name}\"")));
        }
        let account = reserve_imported_account(&tx)?;

        let xpub_enc = inner.crypto_pub.encrypt(&xpub.encode())?;
        let row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            xpub_enc,
            Vec::new(),
        ));
        db_accounts::put_account_row(wtx, account, &row)?;
        db_accounts::put_account_name(wtx, account, name)?;
        db_accounts::put_account_name_index(wtx, name, account)?;
        database::put_last_imported_account(wtx, account)?;

        inner.accounts.insert(
            account,
            AccountInfo {
                account_type: AccountType::Bip0044,
                name: name.to_owned(),
                xpub: *xpub,
                xpriv_enc: Vec::new(),
                xpriv: None,
                unique_kdf: None,
                unique_hasher: PassphraseHasher::new(),
                unique_pass_hash: None,
                last_used_external: NO_CHILD_INDEX,
                last_used_internal: NO_CHILD_INDEX,
                last_returned_external: NO_CHILD_INDEX,
                last_returned_internal: NO_CHILD_INDEX,
            },
        );
        log::info!("imported xpub account {account} (\"{name}\")");
        Ok(account)
    }

    /// Import a voting account, sealed under its own passphrase from the
    /// start. The account comes back locked.
    pub fn import_voting_account(
        &self,
        wtx: &redb::WriteTransaction,
        xpriv: &ExtendedPrivKey,
        passphrase: &[u8],
        name: &str,
    ) -> Result<u32> {
        if passphrase.is_empty() {
            return Err(Error::Invalid(
                "a voting account requires a passphrase".to_owned(),
            ));
        }
        validate_account_name(name)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        if db_accounts::lookup_account_number(&tx, name)?.is_some() {
            return Err(Error::Exist(format!("account \"{name}\"")));
        }

        // A prior import of the same key is detected by probing its first
        // external address; nothing further is derived
        let branch_key = xpriv.ckd_priv(&self.secp, hierarchy::normal(EXTERNAL_BRANCH)?)?;
        let child0 = branch_key.ckd_priv(&self.secp, hierarchy::normal(0)?)?;
        let probe = hash160(&ExtendedPubKey::from_priv(&self.secp, &child0).public_key.serialize());
        if db_addresses::address_exists(&tx, &probe)? {
            return Err(Error::Exist("a voting account with this key".to_owned()));
        }

        let account = reserve_imported_account(&tx)?;
        let xpub = ExtendedPubKey::from_priv(&self.secp, xpriv);
        let kdf = Argon2idParams::generate();
        let xpriv_bytes = Zeroizing::new(xpriv.encode());
        let xpub_enc = inner.crypto_pub.encrypt(&xpub.encode())?;
        let xpriv_enc = crypto::seal_with_passphrase(&kdf, passphrase, &*xpriv_bytes)?;

        let row = db_accounts::AccountRow::ImportedVoting(db_accounts::AccountValues::new_unused(
            xpub_enc,
            xpriv_enc.clone(),
        ));
        db_accounts::put_account_row(wtx, account, &row)?;
        db_accounts::put_account_name(wtx, account, name)?;
        db_accounts::put_account_name_index(wtx, name, account)?;
        db_accounts::put_account_kdf(wtx, account, &kdf)?;
        database::put_last_imported_account(wtx, account)?;

        inner.accounts.insert(
            account,
            AccountInfo {
                account_type: AccountType::ImportedVoting,
                name: name.to_owned(),
                xpub,
                xpriv_enc,
                xpriv: None,
                unique_kdf: Some(kdf),
                unique_hasher: PassphraseHasher::new(),
                unique_pass_hash: None,
                last_used_external: NO_CHILD_INDEX,
                last_used_internal: NO_CHILD_INDEX,
                last_returned_external: NO_CHILD_INDEX,
                last_returned_internal: NO_CHILD_INDEX,
            },
        );
        log::info!("imported voting account {account} (\"{name}\")");
        Ok(account)
    }

    /// Seal `account` under its own passphrase, or remove the unique
    /// passphrase when `passphrase` is empty
    ///
    /// The key being rewrapped must currently be available in cleartext: the
    /// store must be unlocked or, for an already uniquely-sealed account,
    /// the account itself must be unlocked.
    pub fn set_account_passphrase(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        passphrase: &[u8],
    ) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if account == IMPORTED_ACCOUNT {
            return Err(Error::Invalid(
                "the imported account has no keys to protect".to_owned(),
            ));
        }
        if inner.watching_only && (account <= IMPORTED_ACCOUNT || passphrase.is_empty()) {
            return Err(Error::WatchingOnly);
        }
        let tx = Tx::Write(wtx);
        self.load_account_info(&mut inner, &tx, account)?;

        let (xpriv, had_unique) = {
            let info = inner.accounts.get(&account).expect("loaded above");
            match info.xpriv {
                Some(xpriv) => (xpriv, info.unique_kdf.is_some()),
                None => {
                    return Err(Error::Locked(if info.unique_kdf.is_some() {
                        LOCKED_ACCOUNT
                    } else {
                        LOCKED_STORE
                    }))
                }
            }
        };
        let xpriv_bytes = Zeroizing::new(xpriv.encode());

        if passphrase.is_empty() {
            if !had_unique {
                return Ok(());
            }
            // Back under the global crypto private key
            let xpriv_enc = inner.crypto_priv()?.encrypt(&*xpriv_bytes)?;
            update_account_row_xpriv(wtx, account, xpriv_enc.clone())?;
            db_accounts::delete_account_kdf(wtx, account)?;
            let info = inner.accounts.get_mut(&account).expect("loaded above");
            info.xpriv_enc = xpriv_enc;
            info.unique_kdf = None;
            info.unique_pass_hash = None;
            log::info!("account {account} unique passphrase removed");
        } else {
            let kdf = Argon2idParams::generate();
            let xpriv_enc = crypto::seal_with_passphrase(&kdf, passphrase, &*xpriv_bytes)?;
            update_account_row_xpriv(wtx, account, xpriv_enc.clone())?;
            db_accounts::put_account_kdf(wtx, account, &kdf)?;
            let info = inner.accounts.get_mut(&account).expect("loaded above");
            info.xpriv_enc = xpriv_enc;
            info.unique_kdf = Some(kdf);
            info.unique_hasher = PassphraseHasher::new();
            let hash = info.unique_hasher.hash(passphrase);
            info.unique_pass_hash = Some(hash);
            log::info!("account {account} sealed under its own passphrase");
        }
        Ok(())
    }

    /// Unseal and attach the private extended key of a unique-passphrase
    /// account
    ///
    /// On an already-unlocked account this only performs the constant-time
    /// digest comparison. A wrong passphrase never disturbs existing state:
    /// retrying with the right one still succeeds.
    pub fn unlock_account(&self, tx: &Tx, account: u32, passphrase: &[u8]) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if inner.watching_only && account < IMPORTED_ACCOUNT {
            return Err(Error::WatchingOnly);
        }
        self.load_account_info(&mut inner, tx, account)?;
        let info = inner.accounts.get_mut(&account).expect("loaded above");
        let kdf = info.unique_kdf.clone().ok_or_else(|| {
            Error::Invalid(format!("account {account} does not have its own passphrase"))
        })?;

        if info.xpriv.is_some() {
            let hash = info.unique_hasher.hash(passphrase);
            return match &info.unique_pass_hash {
                Some(stored) if stored.constant_time_eq(&hash) => Ok(()),
                _ => Err(Error::Passphrase),
            };
        }

        let xpriv_bytes = crypto::open_with_passphrase(&kdf, passphrase, &info.xpriv_enc)?;
        let xpriv = ExtendedPrivKey::decode(&xpriv_bytes)
            .map_err(|e| Error::Io(format!("corrupt account {account} private key: {e}")))?;
        info.xpriv = Some(xpriv);
        let hash = info.unique_hasher.hash(passphrase);
        info.unique_pass_hash = Some(hash);
        log::debug!("account {account} unlocked");
        Ok(())
    }

    /// Scrub the attached private extended key of a unique-passphrase
    /// account
    pub fn lock_account(&self, tx: &Tx, account: u32) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if inner.watching_only && account < IMPORTED_ACCOUNT {
            return Err(Error::WatchingOnly);
        }
        self.load_account_info(&mut inner, tx, account)?;
        let info = inner.accounts.get_mut(&account).expect("loaded above");
        if info.unique_kdf.is_none() {
            return Err(Error::Invalid(format!(
                "account {account} does not have its own passphrase"
            )));
        }
        if info.xpriv.is_none() {
            return Err(Error::Locked("the account is already locked"));
        }
        info.xpriv = None;
        info.unique_pass_hash = None;
        log::debug!("account {account} locked");
        Ok(())
    }

    /// User-visible snapshot of `account`
    pub fn account_properties(&self, tx: &Tx, account: u32) -> Result<AccountProperties> {
        let mut inner = self.write();
        inner.ensure_open()?;
        if account == IMPORTED_ACCOUNT {
            return Ok(AccountProperties {
                account_number: account,
                account_name: IMPORTED_ACCOUNT_NAME.to_owned(),
                account_type: AccountType::Bip0044,
                last_used_external_index: NO_CHILD_INDEX,
                last_used_internal_index: NO_CHILD_INDEX,
                last_returned_external_index: NO_CHILD_INDEX,
                last_returned_internal_index: NO_CHILD_INDEX,
                imported_key_count: db_addresses::count_account_addresses(tx, IMPORTED_ACCOUNT)?,
                account_encrypted: false,
                account_unlocked: false,
            });
        }
        self.load_account_info(&mut inner, tx, account)?;
        let info = inner.accounts.get(&account).expect("loaded above");
        Ok(AccountProperties {
            account_number: account,
            account_name: info.name.clone(),
            account_type: info.account_type,
            last_used_external_index: info.last_used_external,
            last_used_internal_index: info.last_used_internal,
            last_returned_external_index: info.last_returned_external,
            last_returned_internal_index: info.last_returned_internal,
            imported_key_count: 0,
            account_encrypted: info.unique_kdf.is_some(),
            account_unlocked: info.xpriv.is_some(),
        })
    }

    /// Account number for `name` through the name index
    pub fn account_number(&self, tx: &Tx, name: &str) -> Result<u32> {
        self.read().ensure_open()?;
        db_accounts::lookup_account_number(tx, name)?
            .ok_or_else(|| Error::NotExist(format!("account \"{name}\"")))
    }

    /// Name of `account`
    pub fn account_name(&self, tx: &Tx, account: u32) -> Result<String> {
        self.read().ensure_open()?;
        db_accounts::get_account_name(tx, account)?
            .ok_or_else(|| Error::NotExist(format!("account {account}")))
    }

    /// Decrypted account extended public key, for caller-side address
    /// derivation
    pub fn account_extended_pub_key(&self, tx: &Tx, account: u32) -> Result<ExtendedPubKey> {
        let mut inner = self.write();
        inner.ensure_open()?;
        self.load_account_info(&mut inner, tx, account)?;
        Ok(inner.accounts.get(&account).expect("loaded above").xpub)
    }

    /// Record that the child at `(account, branch, child)` appeared on
    /// chain. Watermarks only move forward; the comparison treats the
    /// all-ones sentinel as less than every index.
    pub fn mark_used_child_index(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        branch: u32,
        child: u32,
    ) -> Result<()> {
        hierarchy::check_branch(branch)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        self.load_account_info(&mut inner, &tx, account)?;
        let info = inner.accounts.get_mut(&account).expect("loaded above");
        // The sentinel wraps to zero, making every real index an advance
        if child.wrapping_add(1) > info.last_used(branch).wrapping_add(1) {
            info.set_last_used(branch, child);
            // A used child was necessarily returned
            if child.wrapping_add(1) > info.last_returned(branch).wrapping_add(1) {
                info.set_last_returned(branch, child);
            }
            persist_watermarks(wtx, account, info)?;
        }
        Ok(())
    }

    /// Record that the child at `(account, branch, child)` was handed out
    /// to a caller
    pub fn mark_returned_child_index(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        branch: u32,
        child: u32,
    ) -> Result<()> {
        hierarchy::check_branch(branch)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        self.load_account_info(&mut inner, &tx, account)?;
        let info = inner.accounts.get_mut(&account).expect("loaded above");
        if child.wrapping_add(1) > info.last_returned(branch).wrapping_add(1) {
            info.set_last_returned(branch, child);
            persist_watermarks(wtx, account, info)?;
        }
        Ok(())
    }

    /// Rename `account`, keeping the name index coherent
    pub fn rename_account(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        new_name: &str,
    ) -> Result<()> {
        if account == IMPORTED_ACCOUNT {
            return Err(Error::Invalid(
                "the imported account cannot be renamed".to_owned(),
            ));
        }
        validate_account_name(new_name)?;
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        if db_accounts::lookup_account_number(&tx, new_name)?.is_some() {
            return Err(Error::Exist(format!("account \"{new_name}\"")));
        }
        let old_name = db_accounts::get_account_name(&tx, account)?
            .ok_or_else(|| Error::NotExist(format!("account {account}")))?;

        db_accounts::put_account_name(wtx, account, new_name)?;
        db_accounts::delete_account_name_index(wtx, &old_name)?;
        db_accounts::put_account_name_index(wtx, new_name, account)?;
        if let Some(info) = inner.accounts.get_mut(&account) {
            info.name = new_name.to_owned();
        }
        log::info!("renamed account {account} from \"{old_name}\" to \"{new_name}\"");
        Ok(())
    }

    /// Switch a pristine store from the legacy coin type to SLIP-0044
    ///
    /// Only permitted before any account beyond the default exists and
    /// before any address of the default account has been returned: the
    /// upgrade swaps the whole derivation subtree, so anything already
    /// derived would become unreachable.
    pub fn upgrade_to_slip0044_coin_type(&self, wtx: &redb::WriteTransaction) -> Result<()> {
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);

        if database::get_raw(&tx, database::KEY_COIN_TYPE_LEGACY_PUB)?.is_none() {
            return Err(Error::Invalid(
                "the store already uses the SLIP-0044 coin type".to_owned(),
            ));
        }
        if database::get_raw(&tx, database::KEY_COIN_TYPE_SLIP0044_PUB)?.is_none() {
            return Err(Error::Invalid(
                "no SLIP-0044 coin type keys are stored".to_owned(),
            ));
        }
        let slip_row = database::get_json::<db_accounts::AccountRow>(
            &tx,
            database::KEY_SLIP0044_ACCOUNT0_LEGACY,
        )?
        .ok_or_else(|| {
            Error::Invalid("no SLIP-0044 rendition of the default account is stored".to_owned())
        })?;
        let last = database::get_last_account(&tx)?
            .ok_or_else(|| Error::Io("missing account counter".to_owned()))?;
        if last != 0 {
            return Err(Error::Invalid(
                "additional accounts have already been derived".to_owned(),
            ));
        }
        let row0 = db_accounts::get_account_row(&tx, 0)?
            .ok_or_else(|| Error::Io("missing default account row".to_owned()))?;
        let values0 = row0
            .values()
            .ok_or_else(|| Error::Io("default account row is still in the legacy format".to_owned()))?;
        if values0.last_returned_external != NO_CHILD_INDEX
            || values0.last_returned_internal != NO_CHILD_INDEX
        {
            return Err(Error::Invalid(
                "addresses have already been returned for the default account".to_owned(),
            ));
        }

        // Translate the stored legacy-format row into the current layout
        let legacy = match slip_row {
            db_accounts::AccountRow::Bip0044Legacy(values) => values,
            _ => {
                return Err(Error::Io(
                    "unexpected format for the stored SLIP-0044 account row".to_owned(),
                ))
            }
        };
        let row = db_accounts::AccountRow::Bip0044(db_accounts::AccountValues::new_unused(
            legacy.xpub_enc,
            legacy.xpriv_enc,
        ));
        db_accounts::put_account_row(wtx, 0, &row)?;
        database::delete_raw(wtx, database::KEY_COIN_TYPE_LEGACY_PUB)?;
        database::delete_raw(wtx, database::KEY_COIN_TYPE_LEGACY_PRIV)?;
        database::delete_raw(wtx, database::KEY_SLIP0044_ACCOUNT0_LEGACY)?;

        // The next access reloads (and, if unlocked, re-attaches) account 0
        inner.accounts.remove(&0);
        log::info!("upgraded to the SLIP-0044 coin type");
        Ok(())
    }

    /// The coin type currently in use
    ///
    /// # Errors
    /// [`Error::WatchingOnly`] when no coin-type keys are stored at all,
    /// which is the case for stores created from an account xpub.
    pub fn coin_type(&self, tx: &Tx) -> Result<u32> {
        self.read().ensure_open()?;
        if database::get_raw(tx, database::KEY_COIN_TYPE_LEGACY_PUB)?.is_some() {
            return Ok(self.chain_params.legacy_coin_type);
        }
        if database::get_raw(tx, database::KEY_COIN_TYPE_SLIP0044_PUB)?.is_some() {
            return Ok(self.chain_params.slip0044_coin_type);
        }
        Err(Error::WatchingOnly)
    }

    /// Decrypt and return the active coin-type private extended key
    ///
    /// The serialized form handed to the caller is the only copy; the
    /// intermediate buffer is scrubbed here.
    pub fn coin_type_priv_key(&self, tx: &Tx) -> Result<ExtendedPrivKey> {
        let inner = self.read();
        inner.ensure_open()?;
        inner.ensure_unlocked()?;
        let ciphertext = coin_type_priv_ciphertext(tx)?;
        let bytes = inner.crypto_priv()?.decrypt(&ciphertext)?;
        ExtendedPrivKey::decode(&bytes)
            .map_err(|e| Error::Io(format!("corrupt coin type private key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_name_validation() {
        assert!(validate_account_name("savings").is_ok());
        assert!(matches!(
            validate_account_name(""),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            validate_account_name("imported"),
            Err(Error::Invalid(_))
        ));
    }
}
