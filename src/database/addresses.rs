//! Address rows and the address-hash to account index.
//!
//! Addresses are keyed only by their 20-byte hash-160. The hash key is
//! unique across the three row variants: an import that would collide with
//! any existing row, chained or not, is rejected upstream.

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use super::{with_read_table, Tx, ADDRESSES, ADDRESS_ACCOUNTS};
use crate::errors::Result;

/// A persisted address row, dispatched on its serialized type tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AddressRow {
    /// An address derived on a BIP-0044 branch of `account`
    Chained { account: u32, branch: u32, index: u32 },
    /// An externally supplied key under the reserved imported account
    ImportedKey {
        pubkey_enc: Vec<u8>,
        /// Empty on a watching-only store
        privkey_enc: Vec<u8>,
    },
    /// An externally supplied redeem script under the reserved imported
    /// account. The script itself is not secret; its hash is encrypted so
    /// the row still resolves while the store is locked.
    ImportedScript {
        script_hash_enc: Vec<u8>,
        script: Vec<u8>,
    },
}

pub(crate) fn get_address_row(tx: &Tx, hash: &[u8; 20]) -> Result<Option<AddressRow>> {
    with_read_table!(tx, ADDRESSES, Ok(None), |t| {
        let x = t.get(hash)?
            .map(|g| Ok(serde_json::from_slice(g.value())?))
            .transpose();
        x
    })
}

pub(crate) fn address_exists(tx: &Tx, hash: &[u8; 20]) -> Result<bool> {
    with_read_table!(tx, ADDRESSES, Ok(false), |t| { let x = Ok(t.get(hash)?.is_some()); x })
}

/// Write an address row and its account-index entry together
pub(crate) fn put_address(
    wtx: &redb::WriteTransaction,
    hash: &[u8; 20],
    account: u32,
    row: &AddressRow,
) -> Result<()> {
    let bytes = serde_json::to_vec(row)?;
    {
        let mut t = wtx.open_table(ADDRESSES)?;
        t.insert(hash, bytes.as_slice())?;
    }
    let mut t = wtx.open_table(ADDRESS_ACCOUNTS)?;
    t.insert(hash, account)?;
    Ok(())
}

pub(crate) fn get_address_account(tx: &Tx, hash: &[u8; 20]) -> Result<Option<u32>> {
    with_read_table!(tx, ADDRESS_ACCOUNTS, Ok(None), |t| {
        let x = Ok(t.get(hash)?.map(|g| g.value()));
        x
    })
}

/// Number of addresses belonging to `account`, by index traversal
pub(crate) fn count_account_addresses(tx: &Tx, account: u32) -> Result<u32> {
    with_read_table!(tx, ADDRESS_ACCOUNTS, Ok(0), |t| {
        let mut count = 0u32;
        for entry in t.iter()? {
            let (_, v) = entry?;
            if v.value() == account {
                count += 1;
            }
        }
        Ok(count)
    })
}

/// Every persisted address row
pub(crate) fn list_addresses(tx: &Tx) -> Result<Vec<([u8; 20], AddressRow)>> {
    with_read_table!(tx, ADDRESSES, Ok(Vec::new()), |t| {
        let mut rows = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            rows.push((k.value(), serde_json::from_slice(v.value())?));
        }
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_row_roundtrip_and_index() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let db = redb::Database::create(file.path()).unwrap();

        let chained = [1u8; 20];
        let imported = [2u8; 20];

        let wtx = db.begin_write().unwrap();
        put_address(
            &wtx,
            &chained,
            5,
            &AddressRow::Chained {
                account: 5,
                branch: 0,
                index: 12,
            },
        )
        .unwrap();
        put_address(
            &wtx,
            &imported,
            crate::hierarchy::IMPORTED_ACCOUNT,
            &AddressRow::ImportedKey {
                pubkey_enc: vec![1],
                privkey_enc: Vec::new(),
            },
        )
        .unwrap();
        wtx.commit().unwrap();

        let rtx = db.begin_read().unwrap();
        let tx = Tx::Read(&rtx);
        assert!(matches!(
            get_address_row(&tx, &chained).unwrap().unwrap(),
            AddressRow::Chained {
                account: 5,
                branch: 0,
                index: 12
            }
        ));
        assert!(address_exists(&tx, &imported).unwrap());
        assert!(!address_exists(&tx, &[3u8; 20]).unwrap());
        assert_eq!(get_address_account(&tx, &chained).unwrap(), Some(5));
        assert_eq!(
            count_account_addresses(&tx, crate::hierarchy::IMPORTED_ACCOUNT).unwrap(),
            1
        );
        assert_eq!(list_addresses(&tx).unwrap().len(), 2);
    }

    #[test]
    fn empty_database_reads_as_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let db = redb::Database::create(file.path()).unwrap();
        let rtx = db.begin_read().unwrap();
        let tx = Tx::Read(&rtx);
        assert!(get_address_row(&tx, &[0u8; 20]).unwrap().is_none());
        assert_eq!(count_account_addresses(&tx, 0).unwrap(), 0);
    }
}
