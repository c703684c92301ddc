//! Account rows, per-account variables and the name index.

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use super::{with_read_table, Tx, ACCOUNTS, ACCOUNT_NAMES, ACCOUNT_VARS};
use crate::crypto::Argon2idParams;
use crate::errors::Result;
use crate::hierarchy::NO_CHILD_INDEX;

/// Per-account variable names
pub(crate) const VAR_NAME: &str = "name";
pub(crate) const VAR_KDF: &str = "kdf";

/// A persisted account row, dispatched on its serialized type tag
///
/// `Bip0044Legacy` is the pre-SLIP-0044 layout. It is never written as a
/// live account row anymore, but loaders still understand it because the
/// stored SLIP-0044 copy of account 0 uses it until the coin-type upgrade
/// rewrites it into the current layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AccountRow {
    Bip0044(AccountValues),
    ImportedVoting(AccountValues),
    Bip0044Legacy(LegacyAccountValues),
}

impl AccountRow {
    pub(crate) fn values(&self) -> Option<&AccountValues> {
        match self {
            AccountRow::Bip0044(v) | AccountRow::ImportedVoting(v) => Some(v),
            AccountRow::Bip0044Legacy(_) => None,
        }
    }

    pub(crate) fn values_mut(&mut self) -> Option<&mut AccountValues> {
        match self {
            AccountRow::Bip0044(v) | AccountRow::ImportedVoting(v) => Some(v),
            AccountRow::Bip0044Legacy(_) => None,
        }
    }
}

/// Current account row payload
///
/// The extended-key ciphertexts and the usage watermarks; everything else
/// about an account lives in its variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AccountValues {
    pub xpub_enc: Vec<u8>,
    /// Empty when the account has no private key material
    pub xpriv_enc: Vec<u8>,
    pub last_used_external: u32,
    pub last_used_internal: u32,
    pub last_returned_external: u32,
    pub last_returned_internal: u32,
}

impl AccountValues {
    /// A row for a freshly provisioned account: all watermarks unset
    pub(crate) fn new_unused(xpub_enc: Vec<u8>, xpriv_enc: Vec<u8>) -> Self {
        Self {
            xpub_enc,
            xpriv_enc,
            last_used_external: NO_CHILD_INDEX,
            last_used_internal: NO_CHILD_INDEX,
            last_returned_external: NO_CHILD_INDEX,
            last_returned_internal: NO_CHILD_INDEX,
        }
    }
}

/// Pre-upgrade account row payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LegacyAccountValues {
    pub xpub_enc: Vec<u8>,
    pub xpriv_enc: Vec<u8>,
    pub next_external_index: u32,
    pub next_internal_index: u32,
    pub name: String,
}

pub(crate) fn get_account_row(tx: &Tx, account: u32) -> Result<Option<AccountRow>> {
    with_read_table!(tx, ACCOUNTS, Ok(None), |t| {
        let x = t.get(account)?
            .map(|g| Ok(serde_json::from_slice(g.value())?))
            .transpose();
        x
    })
}

pub(crate) fn put_account_row(
    wtx: &redb::WriteTransaction,
    account: u32,
    row: &AccountRow,
) -> Result<()> {
    let bytes = serde_json::to_vec(row)?;
    let mut t = wtx.open_table(ACCOUNTS)?;
    t.insert(account, bytes.as_slice())?;
    Ok(())
}

/// Every persisted account row, in account-number order
pub(crate) fn list_account_rows(tx: &Tx) -> Result<Vec<(u32, AccountRow)>> {
    with_read_table!(tx, ACCOUNTS, Ok(Vec::new()), |t| {
        let mut rows = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            rows.push((k.value(), serde_json::from_slice(v.value())?));
        }
        Ok(rows)
    })
}

pub(crate) fn get_account_name(tx: &Tx, account: u32) -> Result<Option<String>> {
    with_read_table!(tx, ACCOUNT_VARS, Ok(None), |t| {
        let x = t.get((account, VAR_NAME))?
            .map(|g| Ok(serde_json::from_slice(g.value())?))
            .transpose();
        x
    })
}

pub(crate) fn put_account_name(
    wtx: &redb::WriteTransaction,
    account: u32,
    name: &str,
) -> Result<()> {
    let bytes = serde_json::to_vec(name)?;
    let mut t = wtx.open_table(ACCOUNT_VARS)?;
    t.insert((account, VAR_NAME), bytes.as_slice())?;
    Ok(())
}

pub(crate) fn get_account_kdf(tx: &Tx, account: u32) -> Result<Option<Argon2idParams>> {
    with_read_table!(tx, ACCOUNT_VARS, Ok(None), |t| {
        let x = t.get((account, VAR_KDF))?
            .map(|g| Ok(serde_json::from_slice(g.value())?))
            .transpose();
        x
    })
}

pub(crate) fn put_account_kdf(
    wtx: &redb::WriteTransaction,
    account: u32,
    params: &Argon2idParams,
) -> Result<()> {
    let bytes = serde_json::to_vec(params)?;
    let mut t = wtx.open_table(ACCOUNT_VARS)?;
    t.insert((account, VAR_KDF), bytes.as_slice())?;
    Ok(())
}

pub(crate) fn delete_account_kdf(wtx: &redb::WriteTransaction, account: u32) -> Result<()> {
    let mut t = wtx.open_table(ACCOUNT_VARS)?;
    t.remove((account, VAR_KDF))?;
    Ok(())
}

/// Name-index lookup: account number for `name`
pub(crate) fn lookup_account_number(tx: &Tx, name: &str) -> Result<Option<u32>> {
    with_read_table!(tx, ACCOUNT_NAMES, Ok(None), |t| {
        let x = Ok(t.get(name)?.map(|g| g.value()));
        x
    })
}

pub(crate) fn put_account_name_index(
    wtx: &redb::WriteTransaction,
    name: &str,
    account: u32,
) -> Result<()> {
    let mut t = wtx.open_table(ACCOUNT_NAMES)?;
    t.insert(name, account)?;
    Ok(())
}

pub(crate) fn delete_account_name_index(wtx: &redb::WriteTransaction, name: &str) -> Result<()> {
    let mut t = wtx.open_table(ACCOUNT_NAMES)?;
    t.remove(name)?;
    Ok(())
}
