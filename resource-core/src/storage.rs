//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `userres` - Resource totals (key: account)
//! - `delband` - Delegations (key: from || '|' || to)
//! - `refunds` - Pending refunds (key: owner)
//! - `voters` - Vote-bearing stake (key: voter)
//! - `payouts` - Payout outbox (key: owner)
//! - `global` - Market counters and payout key sequence (single row)
//!
//! Each committed transition is written as one `WriteBatch` holding exactly
//! the rows it touched: puts for live rows, deletes for erased ones.

use crate::{
    error::{Error, Result},
    tables::{
        DelegatedBandwidth, DelegationKey, EconomyState, GlobalRow, RefundRequest,
        ScheduledPayout, Table, UserResources, VoterStake,
    },
    types::AccountName,
    Config,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

/// Column family names
const CF_USERRES: &str = "userres";
const CF_DELBAND: &str = "delband";
const CF_REFUNDS: &str = "refunds";
const CF_VOTERS: &str = "voters";
const CF_PAYOUTS: &str = "payouts";
const CF_GLOBAL: &str = "global";

const ALL_CFS: [&str; 6] = [
    CF_USERRES, CF_DELBAND, CF_REFUNDS, CF_VOTERS, CF_PAYOUTS, CF_GLOBAL,
];

const GLOBAL_KEY: &[u8] = b"global";

/// Durable home of committed economy state
///
/// The actor persists through this seam after every commit.
pub trait StateStore {
    /// Write every row touched since the last persist; dirty marks survive a failure
    fn persist(&self, state: &mut EconomyState) -> Result<usize>;

    /// Release the store
    fn close(self: Box<Self>) -> Result<()>;
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            "Opened RocksDB at {:?} with {} column families",
            path,
            ALL_CFS.iter().filter(|name| db.cf_handle(name).is_some()).count()
        );

        Ok(Self { db })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        if name == CF_GLOBAL {
            opts.set_compression_type(rocksdb::DBCompressionType::None);
        } else {
            // Rows are small and read on every load
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Write every row touched since the last persist (atomic)
    ///
    /// Returns the number of rows written or deleted. Dirty marks are
    /// cleared only once the batch is durable.
    pub fn persist(&self, state: &mut EconomyState) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut touched = 0;

        touched += self.stage(&mut batch, CF_USERRES, &state.resources, account_key)?;
        touched += self.stage(&mut batch, CF_DELBAND, &state.delegations, delegation_key)?;
        touched += self.stage(&mut batch, CF_REFUNDS, &state.refunds, account_key)?;
        touched += self.stage(&mut batch, CF_VOTERS, &state.voters, account_key)?;
        touched += self.stage(&mut batch, CF_PAYOUTS, &state.payouts, account_key)?;

        if state.global_dirty {
            let cf = self.cf_handle(CF_GLOBAL)?;
            batch.put_cf(cf, GLOBAL_KEY, bincode::serialize(&state.global)?);
            touched += 1;
        }

        if touched == 0 {
            return Ok(0);
        }

        self.db.write(batch)?;
        state.clear_dirty();

        tracing::debug!(rows = touched, "State persisted");
        Ok(touched)
    }

    fn stage<K, V>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        table: &Table<K, V>,
        encode_key: fn(&K) -> Vec<u8>,
    ) -> Result<usize>
    where
        K: Ord + Clone,
        V: Clone + Serialize,
    {
        let cf = self.cf_handle(cf_name)?;
        for key in table.dirty() {
            match table.get(key) {
                Some(row) => batch.put_cf(cf, encode_key(key), bincode::serialize(row)?),
                None => batch.delete_cf(cf, encode_key(key)),
            }
        }
        Ok(table.dirty().len())
    }

    /// Rebuild the in-memory state
    ///
    /// `max_ram_size` seeds the market when no global row was ever written.
    pub fn load_state(&self, max_ram_size: u64) -> Result<EconomyState> {
        let mut state = EconomyState::new(max_ram_size);

        let cf = self.cf_handle(CF_GLOBAL)?;
        let stored_global = self.db.get_cf(cf, GLOBAL_KEY)?;
        if let Some(bytes) = &stored_global {
            state.global = bincode::deserialize::<GlobalRow>(bytes)?;
        }

        for row in self.scan::<UserResources>(CF_USERRES)? {
            state.resources.load(row.owner.clone(), row);
        }
        for row in self.scan::<DelegatedBandwidth>(CF_DELBAND)? {
            state.delegations.load((row.from.clone(), row.to.clone()), row);
        }
        for row in self.scan::<RefundRequest>(CF_REFUNDS)? {
            state.refunds.load(row.owner.clone(), row);
        }
        for row in self.scan::<VoterStake>(CF_VOTERS)? {
            state.voters.load(row.owner.clone(), row);
        }
        for row in self.scan::<ScheduledPayout>(CF_PAYOUTS)? {
            state.payouts.load(row.owner.clone(), row);
        }

        state.clear_dirty();
        state.global_dirty = stored_global.is_none();

        tracing::info!(
            accounts = state.resources.len(),
            delegations = state.delegations.len(),
            refunds = state.refunds.len(),
            payouts = state.payouts.len(),
            "State loaded"
        );
        Ok(state)
    }

    fn scan<V: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<V>> {
        let cf = self.cf_handle(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(bincode::deserialize(&value)?);
        }
        Ok(rows)
    }

    /// Whether nothing was ever persisted here
    pub fn is_fresh(&self) -> Result<bool> {
        for name in ALL_CFS {
            let cf = self.cf_handle(name)?;
            if let Some(item) = self.db.iterator_cf(cf, IteratorMode::Start).next() {
                item?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            accounts: self.approximate_count(self.cf_handle(CF_USERRES)?)?,
            delegations: self.approximate_count(self.cf_handle(CF_DELBAND)?)?,
            refunds: self.approximate_count(self.cf_handle(CF_REFUNDS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        // RocksDB property for approximate count
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl StateStore for Storage {
    fn persist(&self, state: &mut EconomyState) -> Result<usize> {
        Storage::persist(self, state)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Storage::close(*self)
    }
}

fn account_key(account: &AccountName) -> Vec<u8> {
    account.as_str().as_bytes().to_vec()
}

fn delegation_key((from, to): &DelegationKey) -> Vec<u8> {
    let mut key = from.as_str().as_bytes().to_vec();
    key.push(b'|'); // Separator
    key.extend_from_slice(to.as_str().as_bytes());
    key
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Resource rows
    pub accounts: u64,
    /// Delegation rows
    pub delegations: u64,
    /// Refund rows
    pub refunds: u64,
}
