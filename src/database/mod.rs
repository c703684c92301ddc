//! Persistence layer of the key store.
//!
//! The store does not own a database: every operation receives a redb
//! transaction from the caller, who is also responsible for committing it.
//! This module maps the store's buckets onto redb tables and keeps all
//! serialization decisions in one place. Structured values are serde_json,
//! ciphertexts are stored raw.

pub(crate) mod accounts;
pub(crate) mod addresses;

use redb::{ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

use crate::crypto::MasterKeyParams;
use crate::errors::Result;

/// Singletons: flags, master-key parameters, crypto-key and coin-type
/// ciphertexts, account counters
const MAIN: TableDefinition<&str, &[u8]> = TableDefinition::new("main");
/// Account number to serialized account row
const ACCOUNTS: TableDefinition<u32, &[u8]> = TableDefinition::new("accounts");
/// (account number, variable name) to serialized variable value
const ACCOUNT_VARS: TableDefinition<(u32, &str), &[u8]> = TableDefinition::new("account_vars");
/// Account name to account number
const ACCOUNT_NAMES: TableDefinition<&str, u32> = TableDefinition::new("account_names");
/// Hash-160 to serialized address row
const ADDRESSES: TableDefinition<[u8; 20], &[u8]> = TableDefinition::new("addresses");
/// Hash-160 to owning account number
const ADDRESS_ACCOUNTS: TableDefinition<[u8; 20], u32> = TableDefinition::new("address_accounts");

// Singleton keys of the main table
pub(crate) const KEY_WATCHING_ONLY: &str = "watching_only";
pub(crate) const KEY_MASTER_PUB_PARAMS: &str = "master_key_pub_params";
pub(crate) const KEY_MASTER_PRIV_PARAMS: &str = "master_key_priv_params";
pub(crate) const KEY_CRYPTO_PUB: &str = "crypto_key_pub";
pub(crate) const KEY_CRYPTO_PRIV: &str = "crypto_key_priv";
pub(crate) const KEY_COIN_TYPE_LEGACY_PUB: &str = "coin_type_legacy_pub";
pub(crate) const KEY_COIN_TYPE_LEGACY_PRIV: &str = "coin_type_legacy_priv";
pub(crate) const KEY_COIN_TYPE_SLIP0044_PUB: &str = "coin_type_slip0044_pub";
pub(crate) const KEY_COIN_TYPE_SLIP0044_PRIV: &str = "coin_type_slip0044_priv";
pub(crate) const KEY_SLIP0044_ACCOUNT0_LEGACY: &str = "slip0044_account0_legacy";
pub(crate) const KEY_LAST_ACCOUNT: &str = "last_account";
pub(crate) const KEY_LAST_IMPORTED_ACCOUNT: &str = "last_imported_account";

/// A caller-supplied transaction, read-only or read-write
///
/// Read accessors work with either kind so a flow inside a write
/// transaction observes its own uncommitted writes. Mutating accessors take
/// the [`redb::WriteTransaction`] directly, which keeps "this operation
/// persists something" visible in every signature.
pub enum Tx<'a> {
    Read(&'a redb::ReadTransaction),
    Write(&'a redb::WriteTransaction),
}

impl<'a> From<&'a redb::ReadTransaction> for Tx<'a> {
    fn from(tx: &'a redb::ReadTransaction) -> Self {
        Tx::Read(tx)
    }
}
impl<'a> From<&'a redb::WriteTransaction> for Tx<'a> {
    fn from(tx: &'a redb::WriteTransaction) -> Self {
        Tx::Write(tx)
    }
}

/// Run `$body` against `$def` opened for reading from either transaction
/// kind. `$missing` is the result when the table does not exist yet, which
/// a read transaction observes as an open error.
macro_rules! with_read_table {
    ($tx:expr, $def:expr, $missing:expr, |$t:ident| $body:expr) => {
        match $tx {
            $crate::database::Tx::Read(rtx) => match rtx.open_table($def) {
                Ok($t) => $body,
                Err(redb::TableError::TableDoesNotExist(_)) => $missing,
                Err(e) => Err(e.into()),
            },
            $crate::database::Tx::Write(wtx) => {
                let $t = wtx.open_table($def)?;
                $body
            }
        }
    };
}
pub(crate) use with_read_table;

/// True once a manager has been created in this database
pub(crate) fn manager_exists(tx: &Tx) -> Result<bool> {
    Ok(get_raw(tx, KEY_MASTER_PUB_PARAMS)?.is_some())
}

pub(crate) fn get_raw(tx: &Tx, key: &str) -> Result<Option<Vec<u8>>> {
    with_read_table!(tx, MAIN, Ok(None), |t| {
        let x = Ok(t.get(key)?.map(|g| g.value().to_vec()));
        x
    })
}

pub(crate) fn put_raw(wtx: &redb::WriteTransaction, key: &str, value: &[u8]) -> Result<()> {
    let mut t = wtx.open_table(MAIN)?;
    t.insert(key, value)?;
    Ok(())
}

pub(crate) fn delete_raw(wtx: &redb::WriteTransaction, key: &str) -> Result<()> {
    let mut t = wtx.open_table(MAIN)?;
    t.remove(key)?;
    Ok(())
}

pub(crate) fn get_json<T: DeserializeOwned>(tx: &Tx, key: &str) -> Result<Option<T>> {
    get_raw(tx, key)?
        .map(|bytes| Ok(serde_json::from_slice(&bytes)?))
        .transpose()
}

pub(crate) fn put_json<T: Serialize>(
    wtx: &redb::WriteTransaction,
    key: &str,
    value: &T,
) -> Result<()> {
    put_raw(wtx, key, &serde_json::to_vec(value)?)
}

pub(crate) fn get_watching_only(tx: &Tx) -> Result<bool> {
    Ok(get_json(tx, KEY_WATCHING_ONLY)?.unwrap_or(false))
}

pub(crate) fn put_watching_only(wtx: &redb::WriteTransaction, watching_only: bool) -> Result<()> {
    put_json(wtx, KEY_WATCHING_ONLY, &watching_only)
}

pub(crate) fn get_master_params(tx: &Tx, key: &str) -> Result<Option<MasterKeyParams>> {
    get_json(tx, key)
}

pub(crate) fn put_master_params(
    wtx: &redb::WriteTransaction,
    key: &str,
    params: &MasterKeyParams,
) -> Result<()> {
    put_json(wtx, key, params)
}

pub(crate) fn get_last_account(tx: &Tx) -> Result<Option<u32>> {
    get_json(tx, KEY_LAST_ACCOUNT)
}

pub(crate) fn put_last_account(wtx: &redb::WriteTransaction, account: u32) -> Result<()> {
    put_json(wtx, KEY_LAST_ACCOUNT, &account)
}

pub(crate) fn get_last_imported_account(tx: &Tx) -> Result<Option<u32>> {
    get_json(tx, KEY_LAST_IMPORTED_ACCOUNT)
}

pub(crate) fn put_last_imported_account(wtx: &redb::WriteTransaction, account: u32) -> Result<()> {
    put_json(wtx, KEY_LAST_IMPORTED_ACCOUNT, &account)
}
