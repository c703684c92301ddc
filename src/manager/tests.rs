//! End-to-end scenarios against an on-disk store.

use bitcoin::bip32::{ChildNumber, ExtendedPrivKey, ExtendedPubKey};
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::Network;
use redb::Database;

use super::{hash160, Manager};
use crate::database::{self, Tx};
use crate::errors::Error;
use crate::hierarchy::{
    ChainParams, EXTERNAL_BRANCH, IMPORTED_ACCOUNT, INTERNAL_BRANCH, MAX_ACCOUNT_NUM,
    MAX_ADDRESSES_PER_ACCOUNT, NO_CHILD_INDEX,
};
use crate::manager::{AccountType, AddressRef, ManagedAddress};

const TEST_SEED: [u8; 32] = [0x2a; 32];
const OTHER_SEED: [u8; 32] = [0x55; 32];
const PUB_PASS: &[u8] = b"public";
const PRIV_PASS: &[u8] = b"private";

const LEGACY_COIN_TYPE: u32 = 20;
const SLIP0044_COIN_TYPE: u32 = 42;

// Regtest gets the weak scrypt parameters, keeping these tests fast
fn chain_params() -> ChainParams {
    ChainParams::new(Network::Regtest, LEGACY_COIN_TYPE, SLIP0044_COIN_TYPE)
}

fn new_db() -> (tempfile::NamedTempFile, Database) {
    let file = tempfile::NamedTempFile::new().unwrap();
    let db = Database::create(file.path()).unwrap();
    (file, db)
}

fn open_manager(db: &Database) -> Manager {
    let rtx = db.begin_read().unwrap();
    Manager::open(&Tx::Read(&rtx), chain_params(), PUB_PASS).unwrap()
}

fn create_seeded() -> (tempfile::NamedTempFile, Database, Manager) {
    let (file, db) = new_db();
    let wtx = db.begin_write().unwrap();
    Manager::create(&wtx, chain_params(), &TEST_SEED, PUB_PASS, PRIV_PASS).unwrap();
    wtx.commit().unwrap();
    let manager = open_manager(&db);
    (file, db, manager)
}

/// The account xpub the store should hold, derived independently
fn expected_account_xpub(seed: &[u8], coin_type: u32, account: u32) -> ExtendedPubKey {
    let secp = Secp256k1::new();
    let master = ExtendedPrivKey::new_master(Network::Regtest, seed).unwrap();
    let path = [
        ChildNumber::from_hardened_idx(44).unwrap(),
        ChildNumber::from_hardened_idx(coin_type).unwrap(),
        ChildNumber::from_hardened_idx(account).unwrap(),
    ];
    let xpriv = master.derive_priv(&secp, &path).unwrap();
    ExtendedPubKey::from_priv(&secp, &xpriv)
}

fn child_pubkey(xpub: &ExtendedPubKey, branch: u32, index: u32) -> secp256k1::PublicKey {
    let secp = Secp256k1::new();
    xpub.ckd_pub(&secp, ChildNumber::from_normal_idx(branch).unwrap())
        .unwrap()
        .ckd_pub(&secp, ChildNumber::from_normal_idx(index).unwrap())
        .unwrap()
        .public_key
}

/// Compare extended public keys by what matters: the key and (through a
/// derived child) the chain code. The serialized network magic does not
/// round-trip between Regtest and Testnet.
fn assert_same_xpub(a: &ExtendedPubKey, b: &ExtendedPubKey) {
    assert_eq!(a.public_key, b.public_key);
    assert_eq!(child_pubkey(a, 0, 0), child_pubkey(b, 0, 0));
}

#[test]
fn create_unlock_new_account_and_resolve_address() {
    let (_file, db, manager) = create_seeded();
    assert!(manager.is_locked());
    assert!(!manager.is_watching_only());
    manager.unlock(PRIV_PASS).unwrap();
    assert!(!manager.is_locked());

    let wtx = db.begin_write().unwrap();
    let account = manager.new_account(&wtx, "savings").unwrap();
    wtx.commit().unwrap();
    assert_eq!(account, 1);

    let rtx = db.begin_read().unwrap();
    let stored = manager
        .account_extended_pub_key(&Tx::Read(&rtx), 1)
        .unwrap();
    drop(rtx);
    let expected = expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 1);
    assert_same_xpub(&stored, &expected);

    // Persist the first external address and resolve it
    let pubkey = child_pubkey(&expected, EXTERNAL_BRANCH, 0);
    let wtx = db.begin_write().unwrap();
    manager
        .record_derived_address(&wtx, 1, EXTERNAL_BRANCH, 0, &pubkey)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let resolved = manager
        .address(&Tx::Read(&rtx), &AddressRef::Pubkey(&pubkey))
        .unwrap();
    match resolved {
        ManagedAddress::Chained {
            account,
            index,
            pubkey: resolved_pubkey,
            ..
        } => {
            assert_eq!(account, 1);
            assert_eq!(index, 0);
            assert_eq!(resolved_pubkey, pubkey);
        }
        other => panic!("expected a chained address, got {other:?}"),
    }
    assert!(!resolved.internal());
    assert_eq!(resolved.hash160(), &hash160(&pubkey.serialize()));

    // The same resolution also works locked, through the public key path
    manager.lock().unwrap();
    let resolved = manager
        .address(&Tx::Read(&rtx), &AddressRef::Pubkey(&pubkey))
        .unwrap();
    assert_eq!(resolved.account(), 1);
}

#[test]
fn duplicate_manager_creation_is_rejected() {
    let (_file, db, _manager) = create_seeded();
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        Manager::create(&wtx, chain_params(), &TEST_SEED, PUB_PASS, PRIV_PASS),
        Err(Error::Exist(_))
    ));
}

#[test]
fn open_with_wrong_public_passphrase_fails() {
    let (_file, db, _manager) = create_seeded();
    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        Manager::open(&Tx::Read(&rtx), chain_params(), b"nope"),
        Err(Error::Passphrase)
    ));
}

#[test]
fn watching_only_store_from_xpub() {
    let (_file, db) = new_db();
    let account_xpub = expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 0);
    let wtx = db.begin_write().unwrap();
    Manager::create_watching_only(&wtx, chain_params(), &account_xpub, PUB_PASS).unwrap();
    wtx.commit().unwrap();

    let manager = open_manager(&db);
    assert!(manager.is_watching_only());
    assert!(matches!(manager.unlock(PRIV_PASS), Err(Error::WatchingOnly)));
    assert!(matches!(manager.lock(), Err(Error::WatchingOnly)));

    // No coin-type keys exist on a store built from an account xpub
    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        manager.coin_type(&Tx::Read(&rtx)),
        Err(Error::WatchingOnly)
    ));
    drop(rtx);

    // Importing a compressed public key works once
    let pubkey = child_pubkey(&account_xpub, EXTERNAL_BRANCH, 3).serialize();
    assert_eq!(pubkey.len(), 33);
    let wtx = db.begin_write().unwrap();
    manager.import_public_key(&wtx, &pubkey).unwrap();
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_public_key(&wtx, &pubkey),
        Err(Error::Exist(_))
    ));
    drop(wtx);

    // And the imported address resolves with no private key behind it
    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let resolved = manager
        .address(&tx, &AddressRef::PubkeyHash(hash160(&pubkey)))
        .unwrap();
    assert_eq!(resolved.account(), IMPORTED_ACCOUNT);
    assert!(matches!(
        manager.private_key(&tx, &AddressRef::PubkeyHash(hash160(&pubkey))),
        Err(Error::WatchingOnly)
    ));
    assert_eq!(
        manager
            .account_properties(&tx, IMPORTED_ACCOUNT)
            .unwrap()
            .imported_key_count,
        1
    );
}

#[test]
fn import_public_key_rejected_on_seeded_store() {
    let (_file, db, manager) = create_seeded();
    let pubkey = child_pubkey(
        &expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 0),
        EXTERNAL_BRANCH,
        0,
    )
    .serialize();
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_public_key(&wtx, &pubkey),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn unlocked_with_passphrase_flows() {
    let (_file, _db, manager) = create_seeded();

    // Locked: constant-time auth is unavailable
    assert!(matches!(
        manager.unlocked_with_passphrase(PRIV_PASS),
        Err(Error::Locked(_))
    ));
    manager.unlock(PRIV_PASS).unwrap();
    manager.unlocked_with_passphrase(PRIV_PASS).unwrap();
    assert!(matches!(
        manager.unlocked_with_passphrase(b"wrong"),
        Err(Error::Passphrase)
    ));

    // A repeated unlock takes the digest path
    manager.unlock(PRIV_PASS).unwrap();
    // A wrong repeated unlock locks the store
    assert!(matches!(manager.unlock(b"wrong"), Err(Error::Passphrase)));
    assert!(manager.is_locked());

    manager.unlock(PRIV_PASS).unwrap();
    manager.lock().unwrap();
    assert!(matches!(manager.lock(), Err(Error::Locked(_))));
}

#[test]
fn account_unique_passphrase_lifecycle() {
    let (_file, db, manager) = create_seeded();
    manager.unlock(PRIV_PASS).unwrap();

    let wtx = db.begin_write().unwrap();
    assert_eq!(manager.new_account(&wtx, "first").unwrap(), 1);
    assert_eq!(manager.new_account(&wtx, "second").unwrap(), 2);
    wtx.commit().unwrap();

    // Persist an address of account 2 to release keys for later
    let account2_xpub = expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 2);
    let pubkey = child_pubkey(&account2_xpub, EXTERNAL_BRANCH, 0);
    let addr = AddressRef::Pubkey(&pubkey);
    let wtx = db.begin_write().unwrap();
    manager
        .record_derived_address(&wtx, 2, EXTERNAL_BRANCH, 0, &pubkey)
        .unwrap();
    manager.set_account_passphrase(&wtx, 2, b"apple").unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let props = manager.account_properties(&tx, 2).unwrap();
    assert!(props.account_encrypted);
    assert!(props.account_unlocked);

    manager.lock().unwrap();
    // The account answers to its own passphrase now, so the global unlock
    // no longer grants access
    assert!(matches!(
        manager.private_key(&tx, &addr),
        Err(Error::Locked(_))
    ));
    assert!(matches!(
        manager.unlock_account(&tx, 2, b"orange"),
        Err(Error::Passphrase)
    ));
    // A wrong attempt does not disturb anything
    manager.unlock_account(&tx, 2, b"apple").unwrap();
    let released = manager.private_key(&tx, &addr).unwrap();
    assert_eq!(released.public_key().inner, pubkey);
    drop(released);

    manager.lock_account(&tx, 2).unwrap();
    assert!(matches!(
        manager.private_key(&tx, &addr),
        Err(Error::Locked(_))
    ));
    assert!(matches!(
        manager.lock_account(&tx, 2),
        Err(Error::Locked(_))
    ));

    // Unique state survives a reopen
    let manager = open_manager(&db);
    manager.unlock_account(&tx, 2, b"apple").unwrap();
    assert_eq!(
        manager.private_key(&tx, &addr).unwrap().public_key().inner,
        pubkey
    );

    // Removing the passphrase needs the global key available
    drop(tx);
    drop(rtx);
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.set_account_passphrase(&wtx, 2, b""),
        Err(Error::Locked(_))
    ));
    drop(wtx);

    manager.unlock(PRIV_PASS).unwrap();
    let wtx = db.begin_write().unwrap();
    manager.set_account_passphrase(&wtx, 2, b"").unwrap();
    wtx.commit().unwrap();

    // Back to "wallet unlock alone grants private access"
    manager.lock().unwrap();
    manager.unlock(PRIV_PASS).unwrap();
    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    assert!(!manager.account_properties(&tx, 2).unwrap().account_encrypted);
    assert_eq!(
        manager.private_key(&tx, &addr).unwrap().public_key().inner,
        pubkey
    );
    assert!(matches!(
        manager.unlock_account(&tx, 2, b"apple"),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn watermarks_are_sentinel_safe_and_persistent() {
    let (_file, db, manager) = create_seeded();

    let rtx = db.begin_read().unwrap();
    let props = manager.account_properties(&Tx::Read(&rtx), 0).unwrap();
    assert_eq!(props.last_used_external_index, NO_CHILD_INDEX);
    assert_eq!(props.last_returned_external_index, NO_CHILD_INDEX);
    drop(rtx);

    let wtx = db.begin_write().unwrap();
    manager
        .mark_used_child_index(&wtx, 0, EXTERNAL_BRANCH, 5)
        .unwrap();
    // Returning an index below the used watermark never lowers it
    manager
        .mark_returned_child_index(&wtx, 0, EXTERNAL_BRANCH, 3)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let props = manager.account_properties(&Tx::Read(&rtx), 0).unwrap();
    assert_eq!(props.last_used_external_index, 5);
    assert_eq!(props.last_returned_external_index, 5);
    assert_eq!(props.last_used_internal_index, NO_CHILD_INDEX);
    drop(rtx);

    let wtx = db.begin_write().unwrap();
    manager
        .mark_returned_child_index(&wtx, 0, EXTERNAL_BRANCH, 9)
        .unwrap();
    manager
        .mark_used_child_index(&wtx, 0, INTERNAL_BRANCH, 0)
        .unwrap();
    assert!(matches!(
        manager.mark_used_child_index(&wtx, 0, 2, 1),
        Err(Error::Invalid(_))
    ));
    wtx.commit().unwrap();

    // A fresh manager sees the same state
    let manager = open_manager(&db);
    let rtx = db.begin_read().unwrap();
    let props = manager.account_properties(&Tx::Read(&rtx), 0).unwrap();
    assert_eq!(props.last_returned_external_index, 9);
    assert_eq!(props.last_used_external_index, 5);
    assert_eq!(props.last_used_internal_index, 0);
    assert_eq!(props.last_returned_internal_index, 0);
}

#[test]
fn slip0044_coin_type_upgrade() {
    let (_file, db, manager) = create_seeded();

    let rtx = db.begin_read().unwrap();
    assert_eq!(manager.coin_type(&Tx::Read(&rtx)).unwrap(), LEGACY_COIN_TYPE);
    let stored = manager.account_extended_pub_key(&Tx::Read(&rtx), 0).unwrap();
    assert_same_xpub(
        &stored,
        &expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 0),
    );
    drop(rtx);

    let wtx = db.begin_write().unwrap();
    manager.upgrade_to_slip0044_coin_type(&wtx).unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    assert_eq!(
        manager.coin_type(&Tx::Read(&rtx)).unwrap(),
        SLIP0044_COIN_TYPE
    );
    let stored = manager.account_extended_pub_key(&Tx::Read(&rtx), 0).unwrap();
    assert_same_xpub(
        &stored,
        &expected_account_xpub(&TEST_SEED, SLIP0044_COIN_TYPE, 0),
    );
    drop(rtx);

    // Upgrading twice is invalid
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.upgrade_to_slip0044_coin_type(&wtx),
        Err(Error::Invalid(_))
    ));
    drop(wtx);

    // New accounts now derive from the SLIP-0044 subtree
    manager.unlock(PRIV_PASS).unwrap();
    let wtx = db.begin_write().unwrap();
    assert_eq!(manager.new_account(&wtx, "post-upgrade").unwrap(), 1);
    wtx.commit().unwrap();
    let rtx = db.begin_read().unwrap();
    let stored = manager.account_extended_pub_key(&Tx::Read(&rtx), 1).unwrap();
    assert_same_xpub(
        &stored,
        &expected_account_xpub(&TEST_SEED, SLIP0044_COIN_TYPE, 1),
    );
}

#[test]
fn upgrade_rejected_after_any_usage() {
    let (_file, db, manager) = create_seeded();
    let wtx = db.begin_write().unwrap();
    manager
        .mark_returned_child_index(&wtx, 0, EXTERNAL_BRANCH, 0)
        .unwrap();
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.upgrade_to_slip0044_coin_type(&wtx),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn change_passphrase_roundtrips() {
    let (_file, db, manager) = create_seeded();

    // Wrong old passphrase is rejected without touching anything
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.change_passphrase(&wtx, b"wrong", b"newer", true),
        Err(Error::Passphrase)
    ));
    drop(wtx);

    // Private change while unlocked
    manager.unlock(PRIV_PASS).unwrap();
    let wtx = db.begin_write().unwrap();
    manager
        .change_passphrase(&wtx, PRIV_PASS, b"second", true)
        .unwrap();
    wtx.commit().unwrap();
    manager.unlocked_with_passphrase(b"second").unwrap();
    manager.lock().unwrap();
    assert!(matches!(manager.unlock(PRIV_PASS), Err(Error::Passphrase)));
    manager.unlock(b"second").unwrap();
    manager.lock().unwrap();

    // Private change while locked leaves the store locked
    let wtx = db.begin_write().unwrap();
    manager
        .change_passphrase(&wtx, b"second", b"third", true)
        .unwrap();
    wtx.commit().unwrap();
    assert!(manager.is_locked());
    manager.unlock(b"third").unwrap();
    manager.lock().unwrap();

    // Public change applies to reopening
    let wtx = db.begin_write().unwrap();
    manager
        .change_passphrase(&wtx, PUB_PASS, b"open sesame", false)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        Manager::open(&Tx::Read(&rtx), chain_params(), PUB_PASS),
        Err(Error::Passphrase)
    ));
    let reopened = Manager::open(&Tx::Read(&rtx), chain_params(), b"open sesame").unwrap();
    reopened.unlock(b"third").unwrap();
}

#[test]
fn import_private_key_roundtrip() {
    let (_file, db, manager) = create_seeded();
    let secp = Secp256k1::new();
    let secret = secp256k1::SecretKey::from_slice(&[0x11; 32]).unwrap();
    let key = bitcoin::PrivateKey::new(secret, Network::Regtest);
    let wif = key.to_wif();
    let pubkey_bytes = key.public_key(&secp).to_bytes();
    let hash = hash160(&pubkey_bytes);

    // Import requires the store unlocked
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_private_key(&wtx, &wif),
        Err(Error::Locked(_))
    ));
    drop(wtx);

    manager.unlock(PRIV_PASS).unwrap();
    let wtx = db.begin_write().unwrap();
    let imported = manager.import_private_key(&wtx, &wif).unwrap();
    assert_eq!(imported.account(), IMPORTED_ACCOUNT);
    assert_eq!(imported.hash160(), &hash);
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_private_key(&wtx, &wif),
        Err(Error::Exist(_))
    ));
    drop(wtx);

    // The released key matches the imported one
    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let released = manager
        .private_key(&tx, &AddressRef::PubkeyHash(hash))
        .unwrap();
    assert_eq!(released.public_key().to_bytes(), pubkey_bytes);
    assert_eq!(released.secret_key(), secret);
    drop(released);

    // Locked again, release fails with Locked
    manager.lock().unwrap();
    assert!(matches!(
        manager.private_key(&tx, &AddressRef::PubkeyHash(hash)),
        Err(Error::Locked(_))
    ));
    // But resolution still works through the public crypto key
    let resolved = manager
        .address(&tx, &AddressRef::PubkeyHash(hash))
        .unwrap();
    assert!(matches!(resolved, ManagedAddress::ImportedKey { .. }));
}

#[test]
fn import_script_roundtrip() {
    let (_file, db, manager) = create_seeded();
    // Works while locked: only the public crypto key is involved
    let script = b"\x52\x21\x03\xaa\x21\x03\xbb\x52\xae".to_vec();
    let hash = hash160(&script);

    let wtx = db.begin_write().unwrap();
    let imported = manager.import_script(&wtx, &script).unwrap();
    assert_eq!(imported.hash160(), &hash);
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_script(&wtx, &script),
        Err(Error::Exist(_))
    ));
    drop(wtx);

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    match manager.address(&tx, &AddressRef::ScriptHash(hash)).unwrap() {
        ManagedAddress::ImportedScript {
            script_hash,
            script: stored,
        } => {
            assert_eq!(script_hash, hash);
            assert_eq!(stored, script);
        }
        other => panic!("expected a script address, got {other:?}"),
    }
    // Scripts have no private key at all
    assert!(matches!(
        manager.private_key(&tx, &AddressRef::ScriptHash(hash)),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn sync_account_to_addr_index() {
    let (_file, db, manager) = create_seeded();
    let account_xpub = expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 0);

    let wtx = db.begin_write().unwrap();
    manager
        .sync_account_to_addr_index(&wtx, 0, 5, EXTERNAL_BRANCH)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    for index in 0..=5 {
        let pubkey = child_pubkey(&account_xpub, EXTERNAL_BRANCH, index);
        let resolved = manager.address(&tx, &AddressRef::Pubkey(&pubkey)).unwrap();
        assert_eq!(resolved.index(), Some(index));
    }
    // Index 6 was not generated
    let pubkey6 = child_pubkey(&account_xpub, EXTERNAL_BRANCH, 6);
    assert!(matches!(
        manager.address(&tx, &AddressRef::Pubkey(&pubkey6)),
        Err(Error::NotExist(_))
    ));
    drop(tx);
    drop(rtx);

    // Re-syncing the same range is a no-op, extending it fills the gap only
    let wtx = db.begin_write().unwrap();
    manager
        .sync_account_to_addr_index(&wtx, 0, 5, EXTERNAL_BRANCH)
        .unwrap();
    manager
        .sync_account_to_addr_index(&wtx, 0, 8, EXTERNAL_BRANCH)
        .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let pubkey8 = child_pubkey(&account_xpub, EXTERNAL_BRANCH, 8);
    assert_eq!(
        manager
            .address(&tx, &AddressRef::Pubkey(&pubkey8))
            .unwrap()
            .index(),
        Some(8)
    );
    drop(tx);
    drop(rtx);

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.sync_account_to_addr_index(&wtx, IMPORTED_ACCOUNT, 5, EXTERNAL_BRANCH),
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        manager.sync_account_to_addr_index(&wtx, 0, 5, 3),
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        manager.sync_account_to_addr_index(&wtx, 0, MAX_ADDRESSES_PER_ACCOUNT + 1, EXTERNAL_BRANCH),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn convert_to_watching_only_strips_private_material() {
    let (_file, db, manager) = create_seeded();
    manager.unlock(PRIV_PASS).unwrap();

    let secp = Secp256k1::new();
    let secret = secp256k1::SecretKey::from_slice(&[0x13; 32]).unwrap();
    let key = bitcoin::PrivateKey::new(secret, Network::Regtest);
    let hash = hash160(&key.public_key(&secp).to_bytes());

    let wtx = db.begin_write().unwrap();
    manager.import_private_key(&wtx, &key.to_wif()).unwrap();
    manager
        .sync_account_to_addr_index(&wtx, 0, 2, EXTERNAL_BRANCH)
        .unwrap();
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    manager.convert_to_watching_only(&wtx).unwrap();
    // Idempotent
    manager.convert_to_watching_only(&wtx).unwrap();
    wtx.commit().unwrap();

    assert!(manager.is_watching_only());
    assert!(matches!(manager.unlock(PRIV_PASS), Err(Error::WatchingOnly)));

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    assert!(matches!(
        manager.private_key(&tx, &AddressRef::PubkeyHash(hash)),
        Err(Error::WatchingOnly)
    ));
    // Public-side resolution is unaffected
    assert!(manager.address(&tx, &AddressRef::PubkeyHash(hash)).is_ok());
    drop(tx);
    drop(rtx);

    // The conversion is persistent: a fresh manager opens watching-only and
    // finds no private ciphertext anywhere
    let reopened = open_manager(&db);
    assert!(reopened.is_watching_only());
    assert!(matches!(reopened.unlock(PRIV_PASS), Err(Error::WatchingOnly)));
    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    assert!(matches!(
        reopened.private_key(&tx, &AddressRef::PubkeyHash(hash)),
        Err(Error::WatchingOnly)
    ));
    let chained = child_pubkey(
        &expected_account_xpub(&TEST_SEED, LEGACY_COIN_TYPE, 0),
        EXTERNAL_BRANCH,
        1,
    );
    assert!(matches!(
        reopened.private_key(&tx, &AddressRef::Pubkey(&chained)),
        Err(Error::WatchingOnly)
    ));
}

#[test]
fn import_xpub_account() {
    let (_file, db, manager) = create_seeded();
    // Works while locked
    let xpub = expected_account_xpub(&OTHER_SEED, LEGACY_COIN_TYPE, 7);
    let wtx = db.begin_write().unwrap();
    let account = manager.import_xpub_account(&wtx, "cold", &xpub).unwrap();
    wtx.commit().unwrap();
    assert_eq!(account, IMPORTED_ACCOUNT + 1);

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    assert_eq!(manager.account_number(&tx, "cold").unwrap(), account);
    let props = manager.account_properties(&tx, account).unwrap();
    assert_eq!(props.account_type, AccountType::Bip0044);
    assert!(!props.account_encrypted);
    assert!(!props.account_unlocked);
    assert_same_xpub(
        &manager.account_extended_pub_key(&tx, account).unwrap(),
        &xpub,
    );
    drop(tx);
    drop(rtx);

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_xpub_account(&wtx, "cold", &xpub),
        Err(Error::Exist(_))
    ));
}

#[test]
fn import_voting_account() {
    let (_file, db, manager) = create_seeded();
    let secp = Secp256k1::new();
    let master = ExtendedPrivKey::new_master(Network::Regtest, &OTHER_SEED).unwrap();
    let path = [
        ChildNumber::from_hardened_idx(44).unwrap(),
        ChildNumber::from_hardened_idx(LEGACY_COIN_TYPE).unwrap(),
        ChildNumber::from_hardened_idx(0).unwrap(),
    ];
    let voting_xpriv = master.derive_priv(&secp, &path).unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_voting_account(&wtx, &voting_xpriv, b"", "voting"),
        Err(Error::Invalid(_))
    ));
    let account = manager
        .import_voting_account(&wtx, &voting_xpriv, b"vote", "voting")
        .unwrap();
    wtx.commit().unwrap();
    assert_eq!(account, IMPORTED_ACCOUNT + 1);

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let props = manager.account_properties(&tx, account).unwrap();
    assert_eq!(props.account_type, AccountType::ImportedVoting);
    assert!(props.account_encrypted);
    assert!(!props.account_unlocked);

    manager.unlock_account(&tx, account, b"vote").unwrap();
    assert!(manager.account_properties(&tx, account).unwrap().account_unlocked);
    drop(tx);
    drop(rtx);

    // Record its first voting address and re-import the same key: the
    // duplicate probe on external child 0 rejects it
    let voting_xpub = ExtendedPubKey::from_priv(&secp, &voting_xpriv);
    let child0 = child_pubkey(&voting_xpub, EXTERNAL_BRANCH, 0);
    let wtx = db.begin_write().unwrap();
    manager
        .record_derived_address(&wtx, account, EXTERNAL_BRANCH, 0, &child0)
        .unwrap();
    wtx.commit().unwrap();
    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.import_voting_account(&wtx, &voting_xpriv, b"vote", "voting2"),
        Err(Error::Exist(_))
    ));
    drop(wtx);

    // The voting address releases its key through the account unlock
    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    let released = manager
        .private_key(&tx, &AddressRef::Pubkey(&child0))
        .unwrap();
    assert_eq!(released.public_key().inner, child0);
}

#[test]
fn rename_account_rules() {
    let (_file, db, manager) = create_seeded();
    manager.unlock(PRIV_PASS).unwrap();
    let wtx = db.begin_write().unwrap();
    assert_eq!(manager.new_account(&wtx, "alpha").unwrap(), 1);
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.rename_account(&wtx, IMPORTED_ACCOUNT, "anything"),
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        manager.rename_account(&wtx, 1, "imported"),
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        manager.rename_account(&wtx, 1, "default"),
        Err(Error::Exist(_))
    ));
    manager.rename_account(&wtx, 1, "beta").unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    let tx = Tx::Read(&rtx);
    assert_eq!(manager.account_number(&tx, "beta").unwrap(), 1);
    assert!(matches!(
        manager.account_number(&tx, "alpha"),
        Err(Error::NotExist(_))
    ));
    assert_eq!(manager.account_name(&tx, 1).unwrap(), "beta");
    assert_eq!(
        manager.account_properties(&tx, 1).unwrap().account_name,
        "beta"
    );
}

#[test]
fn new_account_space_exhaustion() {
    let (_file, db, manager) = create_seeded();
    manager.unlock(PRIV_PASS).unwrap();
    // Force the counter to the boundary
    let wtx = db.begin_write().unwrap();
    database::put_last_account(&wtx, MAX_ACCOUNT_NUM).unwrap();
    wtx.commit().unwrap();

    let wtx = db.begin_write().unwrap();
    assert!(matches!(
        manager.new_account(&wtx, "overflow"),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn invalid_branch_in_persisted_row_is_rejected() {
    let (_file, db, manager) = create_seeded();
    // A corrupt row with an out-of-range branch fails resolution cleanly
    let hash = [0x77u8; 20];
    let wtx = db.begin_write().unwrap();
    crate::database::addresses::put_address(
        &wtx,
        &hash,
        0,
        &crate::database::addresses::AddressRow::Chained {
            account: 0,
            branch: 7,
            index: 0,
        },
    )
    .unwrap();
    wtx.commit().unwrap();

    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        manager.address(&Tx::Read(&rtx), &AddressRef::PubkeyHash(hash)),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn close_scrubs_and_disables() {
    let (_file, db, manager) = create_seeded();
    manager.unlock(PRIV_PASS).unwrap();
    manager.close();
    assert!(matches!(manager.unlock(PRIV_PASS), Err(Error::Invalid(_))));
    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        manager.account_properties(&Tx::Read(&rtx), 0),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn unknown_address_is_not_exist() {
    let (_file, db, manager) = create_seeded();
    let rtx = db.begin_read().unwrap();
    assert!(matches!(
        manager.address(&Tx::Read(&rtx), &AddressRef::PubkeyHash([9u8; 20])),
        Err(Error::NotExist(_))
    ));
}
