//! Transactional RocksDB backend.

use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Transaction,
    TransactionDB, TransactionDBOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;

/// Column family names.
pub(crate) const CF_ASSETS: &str = "assets";
pub(crate) const CF_CHANNELS: &str = "channels";
pub(crate) const CF_CHANNELS_BY_WALLET: &str = "channels_by_wallet";
pub(crate) const CF_APP_SESSIONS: &str = "app_sessions";
pub(crate) const CF_APP_SESSIONS_BY_PARTICIPANT: &str = "app_sessions_by_participant";
pub(crate) const CF_LEDGER_ENTRIES: &str = "ledger_entries";
pub(crate) const CF_ENTRIES_BY_BUCKET: &str = "entries_by_bucket";
pub(crate) const CF_ENTRIES_BY_SIGNER: &str = "entries_by_signer";
pub(crate) const CF_BALANCES: &str = "balances";
pub(crate) const CF_LEDGER_TRANSACTIONS: &str = "ledger_transactions";
pub(crate) const CF_TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";
pub(crate) const CF_SESSION_KEYS: &str = "session_keys";
pub(crate) const CF_SESSION_KEYS_BY_APP: &str = "session_keys_by_app";

const ALL_CFS: [&str; 13] = [
    CF_ASSETS,
    CF_CHANNELS,
    CF_CHANNELS_BY_WALLET,
    CF_APP_SESSIONS,
    CF_APP_SESSIONS_BY_PARTICIPANT,
    CF_LEDGER_ENTRIES,
    CF_ENTRIES_BY_BUCKET,
    CF_ENTRIES_BY_SIGNER,
    CF_BALANCES,
    CF_LEDGER_TRANSACTIONS,
    CF_TRANSACTIONS_BY_ACCOUNT,
    CF_SESSION_KEYS,
    CF_SESSION_KEYS_BY_APP,
];

/// Tunables for opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a transaction waits for a row lock before failing, in milliseconds.
    pub lock_timeout_ms: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
        }
    }
}

/// RocksDB-backed relational store for the clearing node.
pub struct Store {
    db: TransactionDB,
    entry_seq: AtomicU64,
    transaction_seq: AtomicU64,
}

impl Store {
    /// Open or create a store at the given path with default options.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open or create a store at the given path.
    pub fn open_with(path: &Path, options: &StoreOptions) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(options.lock_timeout_ms);

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)?;

        let entry_seq = last_sequence(&db, CF_LEDGER_ENTRIES)?;
        let transaction_seq = last_sequence(&db, CF_LEDGER_TRANSACTIONS)?;

        tracing::info!(
            path = %path.display(),
            entry_seq,
            transaction_seq,
            "store opened"
        );

        Ok(Self {
            db,
            entry_seq: AtomicU64::new(entry_seq),
            transaction_seq: AtomicU64::new(transaction_seq),
        })
    }

    /// Begin a new transaction.
    pub fn begin(&self) -> StoreTx<'_> {
        StoreTx {
            store: self,
            txn: self.db.transaction(),
        }
    }

    pub(crate) fn next_entry_id(&self) -> u64 {
        self.entry_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.transaction_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }
}

/// Highest id stored in a table keyed by big-endian `u64`.
fn last_sequence(db: &TransactionDB, name: &'static str) -> Result<u64, StoreError> {
    let cf = db
        .cf_handle(name)
        .ok_or(StoreError::MissingColumnFamily(name))?;
    match db.iterator_cf(cf, IteratorMode::End).next() {
        Some(item) => {
            let (key, _) = item?;
            crate::keys::decode_id(&key).ok_or(StoreError::CorruptKey(name))
        }
        None => Ok(0),
    }
}

/// A store transaction.
///
/// Reads observe the transaction's own writes. `*_for_update` reads take an
/// exclusive row lock held until commit or rollback, serializing concurrent
/// read-then-write sequences on the same row.
pub struct StoreTx<'a> {
    store: &'a Store,
    txn: Transaction<'a, TransactionDB>,
}

impl<'a> StoreTx<'a> {
    /// Commit all writes atomically.
    pub fn commit(self) -> Result<(), StoreError> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard all writes.
    pub fn rollback(self) -> Result<(), StoreError> {
        self.txn.rollback()?;
        Ok(())
    }

    pub(crate) fn store(&self) -> &'a Store {
        self.store
    }

    pub(crate) fn get_raw(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.store.cf(cf_name)?;
        Ok(self.txn.get_cf(cf, key)?)
    }

    pub(crate) fn get_raw_for_update(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.store.cf(cf_name)?;
        Ok(self.txn.get_for_update_cf(cf, key, true)?)
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        match self.get_raw(cf_name, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn get_json_for_update<T: DeserializeOwned>(
        &self,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        match self.get_raw_for_update(cf_name, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn put_raw(
        &self,
        cf_name: &'static str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        let cf = self.store.cf(cf_name)?;
        self.txn.put_cf(cf, key, value)?;
        Ok(())
    }

    pub(crate) fn put_json<T: Serialize>(
        &self,
        cf_name: &'static str,
        key: &[u8],
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.put_raw(cf_name, key, &bytes)
    }

    pub(crate) fn delete(&self, cf_name: &'static str, key: &[u8]) -> Result<(), StoreError> {
        let cf = self.store.cf(cf_name)?;
        self.txn.delete_cf(cf, key)?;
        Ok(())
    }

    /// All key/value pairs whose key starts with `prefix`, in key order.
    pub(crate) fn scan_prefix(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.store.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .txn
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Decode every value whose key starts with `prefix`.
    pub(crate) fn scan_json<T: DeserializeOwned>(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        self.scan_prefix(cf_name, prefix)?
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(StoreError::from))
            .collect()
    }
}
