//! RocksDB audit journal for the Haulage node.
//!
//! The engine keeps its books in memory; this store mirrors every ledger
//! entry and payment record it produces so operators can inspect the
//! history after a restart. Nothing is replayed from it: a node never
//! starts on a journal that already holds records unless that journal is
//! first moved aside with [`archive_journal`].

use anyhow::Result;
use haulage_core::{PaymentId, WalletId};
use haulage_settlement::{EntrySink, LedgerEntry, PaymentRecord};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Column family names for different data types.
const CF_LEDGER: &str = "ledger";
const CF_PAYMENTS: &str = "payments";
const CF_STATE: &str = "state";

/// RocksDB-backed storage for the Haulage node.
pub struct Storage {
    db: DB,
}

/// `<wallet>/<sequence>` with the sequence zero-padded so keys sort in
/// journal order.
fn entry_key(wallet_id: &WalletId, sequence: u64) -> String {
    format!("{wallet_id}/{sequence:020}")
}

impl Storage {
    /// Open or create a RocksDB database at the given path with column families.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LEDGER, Options::default()),
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    /// Put a value into a column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    /// Get a value from a column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        let value = self.db.get_cf(&cf, key)?;
        Ok(value)
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(cf_name, key.as_bytes(), &bytes)
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        match self.get(cf_name, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a ledger entry, replacing any earlier version of it.
    ///
    /// Entries change status after they are appended (a pending deposit
    /// posts, a withdrawal fails), so the latest write wins.
    pub fn put_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.put_json(CF_LEDGER, &entry_key(&entry.wallet_id, entry.sequence), entry)
    }

    pub fn get_entry(&self, wallet_id: &WalletId, sequence: u64) -> Result<Option<LedgerEntry>> {
        self.get_json(CF_LEDGER, &entry_key(wallet_id, sequence))
    }

    /// Every stored entry of one wallet, in journal order.
    pub fn wallet_entries(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let cf = self
            .db
            .cf_handle(CF_LEDGER)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_LEDGER))?;
        let prefix = format!("{wallet_id}/");
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    /// Store a payment record snapshot.
    pub fn put_payment(&self, record: &PaymentRecord) -> Result<()> {
        self.put_json(CF_PAYMENTS, &record.id.to_string(), record)
    }

    /// Get a payment record.
    pub fn get_payment(&self, id: &PaymentId) -> Result<Option<PaymentRecord>> {
        self.get_json(CF_PAYMENTS, &id.to_string())
    }

    /// Whether any ledger entry or payment record has been journaled.
    pub fn holds_records(&self) -> Result<bool> {
        for cf_name in [CF_LEDGER, CF_PAYMENTS] {
            let cf = self
                .db
                .cf_handle(cf_name)
                .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
            if let Some(item) = self.db.iterator_cf(&cf, IteratorMode::Start).next() {
                item?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Store node state.
    pub fn put_state<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put_json(CF_STATE, key, value)
    }

    /// Get node state.
    pub fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_json(CF_STATE, key)
    }
}

/// Move a journal directory aside to `<dir>.archived-<timestamp>`.
///
/// The database must be closed first.
pub fn archive_journal(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("cannot archive journal at {}", path.display()))?;
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let target = path.with_file_name(format!("{}.archived-{stamp}", name.to_string_lossy()));
    std::fs::rename(path, &target)?;
    Ok(target)
}

impl EntrySink for Storage {
    fn record(&self, entry: &LedgerEntry) {
        if let Err(e) = self.put_entry(entry) {
            tracing::error!(
                wallet_id = %entry.wallet_id,
                sequence = entry.sequence,
                error = %e,
                "failed to journal ledger entry"
            );
        }
    }
}
