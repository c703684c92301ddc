//! Hierarchical deterministic address manager and encrypted key store.
//!
//! This crate owns the persistent storage, encryption and deterministic
//! derivation of all cryptographic material a wallet needs to hand out
//! receiving addresses, release signing keys and absorb imported keys,
//! scripts and extended public keys.
//!
//! The layering is deliberate. Two passphrase-derived master keys (one for
//! public data, one for private data) each protect a random crypto key; the
//! crypto keys protect the BIP-0044 extended keys and imported material at
//! rest. Unlocking derives the private master key, decrypts the private
//! crypto key and attaches account private keys; locking scrubs all of it.
//! Accounts can additionally be sealed under their own passphrase, layered
//! on top of the global one with an Argon2id-derived AEAD key.
//!
//! The store never owns a database. Every operation takes a caller-supplied
//! redb transaction (see [`Tx`]) and the caller commits it, so a wallet can
//! compose several store operations into one atomic update.
//!
//! ```no_run
//! use hd_keystore::{bitcoin::Network, ChainParams, Manager, Tx};
//!
//! # fn main() -> hd_keystore::Result<()> {
//! let db = hd_keystore::redb::Database::create("wallet.redb")
//!     .map_err(hd_keystore::Error::from)?;
//! let params = ChainParams::new(Network::Bitcoin, 0, 0);
//!
//! let wtx = db.begin_write().map_err(hd_keystore::Error::from)?;
//! Manager::create(&wtx, params, &[0x2a; 32], b"public", b"private")?;
//! wtx.commit().map_err(hd_keystore::Error::from)?;
//!
//! let rtx = db.begin_read().map_err(hd_keystore::Error::from)?;
//! let manager = Manager::open(&Tx::Read(&rtx), params, b"public")?;
//! manager.unlock(b"private")?;
//! # Ok(())
//! # }
//! ```

pub mod crypto;
mod database;
pub mod errors;
pub mod hierarchy;
mod manager;

pub use bitcoin;
pub use redb;

pub use crypto::{Argon2idParams, MasterKeyParams, ScryptOptions};
pub use database::Tx;
pub use errors::{Error, Result};
pub use hierarchy::ChainParams;
pub use manager::{
    AccountProperties, AccountType, AddressRef, ManagedAddress, Manager, PrivateKeyGuard,
    DEFAULT_ACCOUNT_NAME, IMPORTED_ACCOUNT_NAME,
};
