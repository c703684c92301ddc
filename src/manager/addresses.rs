//! Address resolution, key/script imports, private-key release and the
//! chained-address pool.

use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::Network;
use zeroize::Zeroizing;

use super::{hash160, AccountInfo, Manager, LOCKED_ACCOUNT, LOCKED_STORE};
use crate::database::{addresses as db_addresses, Tx};
use crate::errors::{Error, Result};
use crate::hierarchy::{self, IMPORTED_ACCOUNT, INTERNAL_BRANCH, MAX_ADDRESSES_PER_ACCOUNT};

/// How callers designate an address
///
/// The store keys addresses only by their 20-byte hash-160; a bare public
/// key is normalized to its pubkey-hash form before lookup.
pub enum AddressRef<'a> {
    /// Hash-160 of a serialized public key
    PubkeyHash([u8; 20]),
    /// A bare public key
    Pubkey(&'a secp256k1::PublicKey),
    /// Hash-160 of a redeem script
    ScriptHash([u8; 20]),
}

impl AddressRef<'_> {
    fn hash160(&self) -> [u8; 20] {
        match self {
            AddressRef::PubkeyHash(hash) | AddressRef::ScriptHash(hash) => *hash,
            AddressRef::Pubkey(pubkey) => hash160(&pubkey.serialize()),
        }
    }
}

/// An address resolved from the store
#[derive(Debug, Clone)]
pub enum ManagedAddress {
    /// Derived on a BIP-0044 branch of its account
    Chained {
        account: u32,
        branch: u32,
        index: u32,
        pubkey: secp256k1::PublicKey,
        pubkey_hash: [u8; 20],
    },
    /// An imported key under the reserved imported account
    ImportedKey {
        pubkey: secp256k1::PublicKey,
        pubkey_hash: [u8; 20],
    },
    /// An imported redeem script under the reserved imported account
    ImportedScript {
        script_hash: [u8; 20],
        script: Vec<u8>,
    },
}

impl ManagedAddress {
    pub fn account(&self) -> u32 {
        match self {
            ManagedAddress::Chained { account, .. } => *account,
            _ => IMPORTED_ACCOUNT,
        }
    }

    /// True for change addresses on the internal branch
    pub fn internal(&self) -> bool {
        matches!(
            self,
            ManagedAddress::Chained {
                branch: INTERNAL_BRANCH,
                ..
            }
        )
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            ManagedAddress::Chained { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn hash160(&self) -> &[u8; 20] {
        match self {
            ManagedAddress::Chained { pubkey_hash, .. }
            | ManagedAddress::ImportedKey { pubkey_hash, .. } => pubkey_hash,
            ManagedAddress::ImportedScript { script_hash, .. } => script_hash,
        }
    }
}

/// A released private key
///
/// This is the narrow interface signing consumers get: the secret bytes are
/// held in a [`Zeroizing`] buffer and scrubbed when the guard is dropped, so
/// dropping it is the release contract.
pub struct PrivateKeyGuard {
    secret: Zeroizing<[u8; 32]>,
    network: Network,
}

impl PrivateKeyGuard {
    fn from_secret_bytes(bytes: &[u8], network: Network) -> Result<Self> {
        // Validate now so accessors cannot fail later
        secp256k1::SecretKey::from_slice(bytes).map_err(|_| Error::Crypto("invalid private key"))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("unexpected private key length"))?;
        Ok(Self {
            secret: Zeroizing::new(secret),
            network,
        })
    }

    pub fn secret_key(&self) -> secp256k1::SecretKey {
        secp256k1::SecretKey::from_slice(&*self.secret).expect("validated at construction")
    }

    /// The key in its compressed WIF-compatible form
    pub fn private_key(&self) -> bitcoin::PrivateKey {
        bitcoin::PrivateKey::new(self.secret_key(), self.network)
    }

    pub fn public_key(&self) -> bitcoin::PublicKey {
        self.private_key().public_key(&Secp256k1::new())
    }
}

impl core::fmt::Debug for PrivateKeyGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PrivateKeyGuard(..)")
    }
}

fn hex20(hash: &[u8; 20]) -> String {
    use core::fmt::Write;
    let mut s = String::with_capacity(40);
    for byte in hash {
        write!(s, "{byte:02x}").expect("writing to a String cannot fail");
    }
    s
}

impl Manager {
    /// Resolve an address to its managed form
    ///
    /// Chained addresses are re-derived from the account extended key;
    /// imported rows are decrypted with the public crypto key, so resolution
    /// works while the store is locked.
    pub fn address(&self, tx: &Tx, address: &AddressRef) -> Result<ManagedAddress> {
        let mut inner = self.write();
        inner.ensure_open()?;
        let hash = address.hash160();
        let row = db_addresses::get_address_row(tx, &hash)?
            .ok_or_else(|| Error::NotExist(format!("address {}", hex20(&hash))))?;
        match row {
            db_addresses::AddressRow::Chained {
                account,
                branch,
                index,
            } => {
                self.load_account_info(&mut inner, tx, account)?;
                let info = inner.accounts.get(&account).expect("loaded above");
                let pubkey = self.derive_child_pubkey(info, branch, index)?;
                Ok(ManagedAddress::Chained {
                    account,
                    branch,
                    index,
                    pubkey,
                    pubkey_hash: hash,
                })
            }
            db_addresses::AddressRow::ImportedKey { pubkey_enc, .. } => {
                let pubkey_bytes = inner.crypto_pub.decrypt(&pubkey_enc)?;
                let pubkey = secp256k1::PublicKey::from_slice(&pubkey_bytes)
                    .map_err(|e| Error::Io(format!("corrupt imported public key: {e}")))?;
                Ok(ManagedAddress::ImportedKey {
                    pubkey,
                    pubkey_hash: hash,
                })
            }
            db_addresses::AddressRow::ImportedScript {
                script_hash_enc,
                script,
            } => {
                let hash_bytes = inner.crypto_pub.decrypt(&script_hash_enc)?;
                let script_hash: [u8; 20] = hash_bytes[..]
                    .try_into()
                    .map_err(|_| Error::Io("corrupt imported script hash".to_owned()))?;
                Ok(ManagedAddress::ImportedScript {
                    script_hash,
                    script,
                })
            }
        }
    }

    /// Public key of the child at `(branch, index)` of an account
    ///
    /// Derives through the private extended key when it is attached, through
    /// the public one otherwise; the result is identical.
    fn derive_child_pubkey(
        &self,
        info: &AccountInfo,
        branch: u32,
        index: u32,
    ) -> Result<secp256k1::PublicKey> {
        hierarchy::check_branch(branch)?;
        match info.xpriv {
            Some(xpriv) => {
                let branch_key = xpriv.ckd_priv(&self.secp, hierarchy::normal(branch)?)?;
                let child = branch_key.ckd_priv(&self.secp, hierarchy::normal(index)?)?;
                Ok(secp256k1::PublicKey::from_secret_key(
                    &self.secp,
                    &child.private_key,
                ))
            }
            None => {
                let branch_key = info.xpub.ckd_pub(&self.secp, hierarchy::normal(branch)?)?;
                let child = branch_key.ckd_pub(&self.secp, hierarchy::normal(index)?)?;
                Ok(child.public_key)
            }
        }
    }

    /// Release the private key behind an address
    ///
    /// The returned guard scrubs the secret when dropped; callers must not
    /// outlive their need for it.
    pub fn private_key(&self, tx: &Tx, address: &AddressRef) -> Result<PrivateKeyGuard> {
        let mut inner = self.write();
        inner.ensure_open()?;
        let hash = address.hash160();
        let row = db_addresses::get_address_row(tx, &hash)?
            .ok_or_else(|| Error::NotExist(format!("address {}", hex20(&hash))))?;
        match row {
            db_addresses::AddressRow::Chained {
                account,
                branch,
                index,
            } => {
                self.load_account_info(&mut inner, tx, account)?;
                let info = inner.accounts.get(&account).expect("loaded above");
                let xpriv = match info.xpriv {
                    Some(xpriv) => xpriv,
                    None if info.unique_kdf.is_some() => {
                        return Err(Error::Locked(LOCKED_ACCOUNT))
                    }
                    None if !info.xpriv_enc.is_empty() => return Err(Error::Locked(LOCKED_STORE)),
                    None => return Err(Error::WatchingOnly),
                };
                hierarchy::check_branch(branch)?;
                let branch_key = xpriv.ckd_priv(&self.secp, hierarchy::normal(branch)?)?;
                let child = branch_key.ckd_priv(&self.secp, hierarchy::normal(index)?)?;
                let secret = Zeroizing::new(child.private_key.secret_bytes());
                PrivateKeyGuard::from_secret_bytes(&*secret, self.chain_params.network)
            }
            db_addresses::AddressRow::ImportedKey { privkey_enc, .. } => {
                if privkey_enc.is_empty() {
                    return Err(Error::WatchingOnly);
                }
                let crypto_priv = inner.crypto_priv()?;
                let secret = crypto_priv.decrypt(&privkey_enc)?;
                PrivateKeyGuard::from_secret_bytes(&secret, self.chain_params.network)
            }
            db_addresses::AddressRow::ImportedScript { .. } => Err(Error::Invalid(
                "a script address has no private key".to_owned(),
            )),
        }
    }

    /// Import a WIF private key under the reserved imported account
    pub fn import_private_key(
        &self,
        wtx: &redb::WriteTransaction,
        wif: &str,
    ) -> Result<ManagedAddress> {
        let mut inner = self.write();
        inner.ensure_open()?;
        let key = bitcoin::PrivateKey::from_wif(wif)
            .map_err(|e| Error::Invalid(format!("invalid WIF: {e}")))?;
        if !key.compressed {
            return Err(Error::Invalid(
                "only compressed WIF keys are supported".to_owned(),
            ));
        }
        // WIF prefixes only distinguish mainnet from the test networks
        let store_is_mainnet = self.chain_params.network == Network::Bitcoin;
        if (key.network == Network::Bitcoin) != store_is_mainnet {
            return Err(Error::Invalid(format!(
                "WIF is for network {}, the store serves {}",
                key.network, self.chain_params.network
            )));
        }
        if !inner.watching_only {
            inner.ensure_unlocked()?;
        }

        let pubkey = key.public_key(&self.secp);
        let pubkey_bytes = pubkey.to_bytes();
        let hash = hash160(&pubkey_bytes);
        let tx = Tx::Write(wtx);
        if db_addresses::address_exists(&tx, &hash)? {
            return Err(Error::Exist(format!("address {}", hex20(&hash))));
        }

        let pubkey_enc = inner.crypto_pub.encrypt(&pubkey_bytes)?;
        let privkey_enc = if inner.watching_only {
            Vec::new()
        } else {
            let secret = Zeroizing::new(key.inner.secret_bytes());
            inner.crypto_priv()?.encrypt(&*secret)?
        };
        db_addresses::put_address(
            wtx,
            &hash,
            IMPORTED_ACCOUNT,
            &db_addresses::AddressRow::ImportedKey {
                pubkey_enc,
                privkey_enc,
            },
        )?;
        log::info!("imported private key for address {}", hex20(&hash));
        Ok(ManagedAddress::ImportedKey {
            pubkey: pubkey.inner,
            pubkey_hash: hash,
        })
    }

    /// Import a bare compressed public key on a watching-only store
    pub fn import_public_key(
        &self,
        wtx: &redb::WriteTransaction,
        pubkey_bytes: &[u8],
    ) -> Result<ManagedAddress> {
        let inner = self.write();
        inner.ensure_open()?;
        if !inner.watching_only {
            return Err(Error::Invalid(
                "importing a bare public key requires a watching-only store".to_owned(),
            ));
        }
        if pubkey_bytes.len() != 33 || !matches!(pubkey_bytes[0], 0x02 | 0x03) {
            return Err(Error::Invalid(
                "public key must be in the 33-byte compressed form".to_owned(),
            ));
        }
        let pubkey = secp256k1::PublicKey::from_slice(pubkey_bytes)
            .map_err(|e| Error::Invalid(format!("invalid public key: {e}")))?;

        let hash = hash160(pubkey_bytes);
        let tx = Tx::Write(wtx);
        if db_addresses::address_exists(&tx, &hash)? {
            return Err(Error::Exist(format!("address {}", hex20(&hash))));
        }
        let pubkey_enc = inner.crypto_pub.encrypt(pubkey_bytes)?;
        db_addresses::put_address(
            wtx,
            &hash,
            IMPORTED_ACCOUNT,
            &db_addresses::AddressRow::ImportedKey {
                pubkey_enc,
                privkey_enc: Vec::new(),
            },
        )?;
        log::info!("imported public key for address {}", hex20(&hash));
        Ok(ManagedAddress::ImportedKey {
            pubkey,
            pubkey_hash: hash,
        })
    }

    /// Import a redeem script under the reserved imported account
    ///
    /// The script is persisted in plaintext (it is not secret); its hash is
    /// encrypted under the public crypto key so lookups keep working while
    /// the store is locked.
    pub fn import_script(
        &self,
        wtx: &redb::WriteTransaction,
        script: &[u8],
    ) -> Result<ManagedAddress> {
        let inner = self.write();
        inner.ensure_open()?;
        let hash = hash160(script);
        let tx = Tx::Write(wtx);
        if db_addresses::address_exists(&tx, &hash)? {
            return Err(Error::Exist(format!("address {}", hex20(&hash))));
        }
        let script_hash_enc = inner.crypto_pub.encrypt(&hash)?;
        db_addresses::put_address(
            wtx,
            &hash,
            IMPORTED_ACCOUNT,
            &db_addresses::AddressRow::ImportedScript {
                script_hash_enc,
                script: script.to_vec(),
            },
        )?;
        log::info!("imported script with address {}", hex20(&hash));
        Ok(ManagedAddress::ImportedScript {
            script_hash: hash,
            script: script.to_vec(),
        })
    }

    /// Persist a chained address row for an already-derived child
    ///
    /// Does not move the returned or used watermarks.
    pub fn record_derived_address(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        branch: u32,
        child: u32,
        pubkey: &secp256k1::PublicKey,
    ) -> Result<()> {
        hierarchy::check_branch(branch)?;
        if account == IMPORTED_ACCOUNT {
            return Err(Error::Invalid(
                "the imported account has no chained addresses".to_owned(),
            ));
        }
        self.read().ensure_open()?;
        let hash = hash160(&pubkey.serialize());
        db_addresses::put_address(
            wtx,
            &hash,
            account,
            &db_addresses::AddressRow::Chained {
                account,
                branch,
                index: child,
            },
        )?;
        Ok(())
    }

    /// Ensure chained rows exist for every child of `branch` up to
    /// `sync_to_index` inclusive
    ///
    /// Iterates downward and stops at the first child already persisted: a
    /// present prefix means every lower index is present too. Children the
    /// derivation deems invalid are skipped.
    pub fn sync_account_to_addr_index(
        &self,
        wtx: &redb::WriteTransaction,
        account: u32,
        sync_to_index: u32,
        branch: u32,
    ) -> Result<()> {
        hierarchy::check_branch(branch)?;
        if account == IMPORTED_ACCOUNT {
            return Err(Error::Invalid(
                "the imported account has no chained addresses".to_owned(),
            ));
        }
        if sync_to_index > MAX_ADDRESSES_PER_ACCOUNT {
            return Err(Error::Invalid(format!(
                "index {sync_to_index} is beyond the address space of an account"
            )));
        }
        let mut inner = self.write();
        inner.ensure_open()?;
        let tx = Tx::Write(wtx);
        self.load_account_info(&mut inner, &tx, account)?;
        let info = inner.accounts.get(&account).expect("loaded above");
        let branch_key = info.xpub.ckd_pub(&self.secp, hierarchy::normal(branch)?)?;

        let mut written = 0u32;
        for child in (0..=sync_to_index).rev() {
            let child_key = match branch_key.ckd_pub(&self.secp, hierarchy::normal(child)?) {
                Ok(key) => key,
                // An invalid child has no address; its index is skipped
                Err(_) => continue,
            };
            let hash = hash160(&child_key.public_key.serialize());
            if db_addresses::address_exists(&tx, &hash)? {
                break;
            }
            db_addresses::put_address(
                wtx,
                &hash,
                account,
                &db_addresses::AddressRow::Chained {
                    account,
                    branch,
                    index: child,
                },
            )?;
            written += 1;
        }
        log::debug!(
            "synced account {account} branch {branch} to index {sync_to_index} ({written} new rows)"
        );
        Ok(())
    }
}
