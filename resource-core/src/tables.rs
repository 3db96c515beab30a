//! Persistent tables of the resource economy
//!
//! Every table is a keyed map where a missing row means "all zero".
//! Erasing a row is the normal way back to zero, not a special case.
//!
//! Tables carry two pieces of bookkeeping besides their rows:
//! - a set of keys touched since the last persist, so storage writes
//!   exactly those rows (put if live, delete if erased) in one batch
//! - an undo journal while a transition is open, so a rejected transition
//!   restores every row it touched

use crate::types::{AccountName, Asset, BlockTimestamp, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Keyed table with touched-key tracking and an undo journal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
pub struct Table<K: Ord, V> {
    rows: BTreeMap<K, V>,
    #[serde(skip)]
    dirty: BTreeSet<K>,
    #[serde(skip)]
    journal: Option<BTreeMap<K, Option<V>>>,
}

impl<K: Ord, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            dirty: BTreeSet::new(),
            journal: None,
        }
    }
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    /// Look up a row
    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    /// Copy of a row, if any
    pub fn find(&self, key: &K) -> Option<V> {
        self.rows.get(key).cloned()
    }

    /// Whether a row exists
    pub fn contains(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    /// Insert or replace a row
    pub fn put(&mut self, key: K, value: V) {
        self.remember(&key);
        self.dirty.insert(key.clone());
        self.rows.insert(key, value);
    }

    /// Remove a row, returning it
    pub fn erase(&mut self, key: &K) -> Option<V> {
        if !self.rows.contains_key(key) {
            return None;
        }
        self.remember(key);
        self.dirty.insert(key.clone());
        self.rows.remove(key)
    }

    /// Iterate live rows in key order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rows.iter()
    }

    /// Number of live rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keys touched since the last persist
    pub fn dirty(&self) -> &BTreeSet<K> {
        &self.dirty
    }

    /// Drain the set of keys touched since the last call
    pub fn take_dirty(&mut self) -> BTreeSet<K> {
        std::mem::take(&mut self.dirty)
    }

    /// Start journaling changes
    pub(crate) fn begin(&mut self) {
        self.journal = Some(BTreeMap::new());
    }

    /// Keep changes made since [`Table::begin`]
    pub(crate) fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo changes made since [`Table::begin`]
    pub(crate) fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (key, original) in journal {
            match original {
                Some(value) => {
                    self.rows.insert(key, value);
                }
                None => {
                    self.rows.remove(&key);
                }
            }
        }
    }

    /// Insert a row loaded from storage without marking it dirty
    pub(crate) fn load(&mut self, key: K, value: V) {
        self.rows.insert(key, value);
    }

    fn remember(&mut self, key: &K) {
        if let Some(journal) = self.journal.as_mut() {
            if !journal.contains_key(key) {
                journal.insert(key.clone(), self.rows.get(key).cloned());
            }
        }
    }
}

/// Ledger-wide RAM market counters (singleton)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMarketState {
    /// Total RAM capacity (bytes)
    pub max_ram_size: u64,
    /// Bytes currently sold
    pub total_ram_bytes_reserved: u64,
    /// Tokens currently staked for RAM (raw units)
    pub total_ram_stake: i64,
}

impl GlobalMarketState {
    /// Fresh market with the given capacity
    pub fn new(max_ram_size: u64) -> Self {
        Self {
            max_ram_size,
            total_ram_bytes_reserved: 0,
            total_ram_stake: 0,
        }
    }

    /// Unsold capacity
    pub fn free_ram(&self) -> u64 {
        self.max_ram_size.saturating_sub(self.total_ram_bytes_reserved)
    }
}

/// Per-account resource totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResources {
    /// Account these totals belong to
    pub owner: AccountName,
    /// Net bandwidth weight staked toward this account
    pub net_weight: Asset,
    /// CPU bandwidth weight staked toward this account
    pub cpu_weight: Asset,
    /// Tokens paid for this account's RAM
    pub ram_stake: Asset,
    /// RAM quota (bytes)
    pub ram_bytes: i64,
}

impl UserResources {
    /// Zero-valued row
    pub fn empty(owner: AccountName, symbol: &Symbol) -> Self {
        Self {
            owner,
            net_weight: Asset::zero(symbol),
            cpu_weight: Asset::zero(symbol),
            ram_stake: Asset::zero(symbol),
            ram_bytes: 0,
        }
    }

    /// All four fields are zero
    pub fn is_empty(&self) -> bool {
        self.net_weight.is_zero()
            && self.cpu_weight.is_zero()
            && self.ram_stake.is_zero()
            && self.ram_bytes == 0
    }
}

/// Stake delegated by `from` toward `to`'s bandwidth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedBandwidth {
    /// Delegator (owner of the stake)
    pub from: AccountName,
    /// Recipient of the bandwidth
    pub to: AccountName,
    /// Net weight
    pub net_weight: Asset,
    /// CPU weight
    pub cpu_weight: Asset,
}

impl DelegatedBandwidth {
    /// Both weights are zero
    pub fn is_empty(&self) -> bool {
        self.net_weight.is_zero() && self.cpu_weight.is_zero()
    }
}

/// Delegation key, scoped under the delegator
pub type DelegationKey = (AccountName, AccountName);

/// Pending refund awaiting the delay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Owner of the refund
    pub owner: AccountName,
    /// Last time an unstaking contribution was merged in
    pub request_time: BlockTimestamp,
    /// Unstaked net weight
    pub net_amount: Asset,
    /// Unstaked cpu weight
    pub cpu_amount: Asset,
    /// Proceeds of RAM sales
    pub ram_amount: Asset,
    /// Bytes sold for `ram_amount`
    pub ram_bytes: i64,
}

impl RefundRequest {
    /// Zero-valued request stamped at `now`
    pub fn empty(owner: AccountName, symbol: &Symbol, now: BlockTimestamp) -> Self {
        Self {
            owner,
            request_time: now,
            net_amount: Asset::zero(symbol),
            cpu_amount: Asset::zero(symbol),
            ram_amount: Asset::zero(symbol),
            ram_bytes: 0,
        }
    }

    /// Every component is zero
    pub fn is_empty(&self) -> bool {
        self.net_amount.is_zero()
            && self.cpu_amount.is_zero()
            && self.ram_amount.is_zero()
            && self.ram_bytes == 0
    }

    /// `net + cpu + ram`
    pub fn total(&self) -> crate::Result<Asset> {
        self.net_amount
            .checked_add(&self.cpu_amount)?
            .checked_add(&self.ram_amount)
    }
}

/// Vote-bearing stake of an account
///
/// `proxy` and `producers` belong to the voting subsystem; the resource
/// economy only adjusts `staked` and reads the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterStake {
    /// Voter account
    pub owner: AccountName,
    /// Tokens staked by this voter (raw units)
    pub staked: i64,
    /// Proxy the voter delegates its vote to
    pub proxy: Option<AccountName>,
    /// Producers the voter votes for
    pub producers: Vec<AccountName>,
}

impl VoterStake {
    /// Fresh voter with no stake
    pub fn new(owner: AccountName) -> Self {
        Self {
            owner,
            staked: 0,
            proxy: None,
            producers: Vec::new(),
        }
    }

    /// Whether a stake change must be reflected in vote tallies
    pub fn has_votes(&self) -> bool {
        self.proxy.is_some() || !self.producers.is_empty()
    }
}

/// Idempotency key of a scheduled payout
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PayoutKey(pub u64);

/// Outbox entry: release `owner`'s refund no earlier than `fire_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPayout {
    /// Refund owner
    pub owner: AccountName,
    /// Earliest block time the payout may fire
    pub fire_at: BlockTimestamp,
    /// Idempotency key, unique per schedule call
    pub key: PayoutKey,
}

/// Singleton row: market counters and the payout key sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRow {
    /// RAM market counters
    pub market: GlobalMarketState,
    /// Next payout idempotency key
    pub next_payout_key: u64,
}

/// Complete state of the resource economy
///
/// Threaded explicitly through every transition; the caller loads it
/// before and persists it after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyState {
    /// Market counters and sequences
    pub global: GlobalRow,
    /// Whether `global` changed since the last persist
    #[serde(skip)]
    pub global_dirty: bool,
    #[serde(skip)]
    global_checkpoint: Option<GlobalRow>,
    /// Resource Ledger
    pub resources: Table<AccountName, UserResources>,
    /// Delegation Ledger
    pub delegations: Table<DelegationKey, DelegatedBandwidth>,
    /// Refund Queue
    pub refunds: Table<AccountName, RefundRequest>,
    /// Voting stake
    pub voters: Table<AccountName, VoterStake>,
    /// Deferred payout outbox
    pub payouts: Table<AccountName, ScheduledPayout>,
}

impl EconomyState {
    /// Empty state with the given RAM capacity
    pub fn new(max_ram_size: u64) -> Self {
        Self {
            global: GlobalRow {
                market: GlobalMarketState::new(max_ram_size),
                next_payout_key: 0,
            },
            global_dirty: true,
            global_checkpoint: None,
            resources: Table::default(),
            delegations: Table::default(),
            refunds: Table::default(),
            voters: Table::default(),
            payouts: Table::default(),
        }
    }

    /// RAM market counters
    pub fn market(&self) -> &GlobalMarketState {
        &self.global.market
    }

    /// Mutable RAM market counters
    pub fn market_mut(&mut self) -> &mut GlobalMarketState {
        self.global_dirty = true;
        &mut self.global.market
    }

    /// Allocate the next payout key
    pub fn next_payout_key(&mut self) -> PayoutKey {
        self.global_dirty = true;
        let key = PayoutKey(self.global.next_payout_key);
        self.global.next_payout_key += 1;
        key
    }

    /// Open a transition: journal every change until commit or rollback
    pub(crate) fn begin(&mut self) {
        self.global_checkpoint = Some(self.global.clone());
        self.resources.begin();
        self.delegations.begin();
        self.refunds.begin();
        self.voters.begin();
        self.payouts.begin();
    }

    /// Keep every change since [`EconomyState::begin`]
    pub(crate) fn commit(&mut self) {
        self.global_checkpoint = None;
        self.resources.commit();
        self.delegations.commit();
        self.refunds.commit();
        self.voters.commit();
        self.payouts.commit();
    }

    /// Undo every change since [`EconomyState::begin`]
    pub(crate) fn rollback(&mut self) {
        if let Some(global) = self.global_checkpoint.take() {
            self.global = global;
        }
        self.resources.rollback();
        self.delegations.rollback();
        self.refunds.rollback();
        self.voters.rollback();
        self.payouts.rollback();
    }

    /// Forget touched-key marks once they are durable
    pub fn clear_dirty(&mut self) {
        self.global_dirty = false;
        self.resources.take_dirty();
        self.delegations.take_dirty();
        self.refunds.take_dirty();
        self.voters.take_dirty();
        self.payouts.take_dirty();
    }

    /// Delegations made by `from`, in recipient order
    pub fn delegations_from<'a>(
        &'a self,
        from: &'a AccountName,
    ) -> impl Iterator<Item = &'a DelegatedBandwidth> + 'a {
        self.delegations
            .iter()
            .filter(move |((owner, _), _)| owner == from)
            .map(|(_, row)| row)
    }

    /// Content digest over canonical encoding of all live rows
    ///
    /// Two states with the same rows have the same digest regardless of
    /// which keys are marked dirty.
    pub fn digest(&self) -> crate::Result<[u8; 32]> {
        let bytes = bincode::serialize(self)?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountName {
        AccountName::new("alice").unwrap()
    }

    #[test]
    fn test_table_tracks_touched_keys() {
        let mut table: Table<AccountName, i64> = Table::default();
        table.put(alice(), 5);
        assert_eq!(table.get(&alice()), Some(&5));

        let dirty = table.take_dirty();
        assert!(dirty.contains(&alice()));
        assert!(table.take_dirty().is_empty());

        assert_eq!(table.erase(&alice()), Some(5));
        assert!(table.take_dirty().contains(&alice()));

        // Erasing a missing row touches nothing
        assert_eq!(table.erase(&alice()), None);
        assert!(table.take_dirty().is_empty());
    }

    #[test]
    fn test_rollback_restores_touched_rows() {
        let symbol = Symbol::new("SYS", 4).unwrap();
        let bob = AccountName::new("bob").unwrap();
        let mut state = EconomyState::new(1024);
        state.resources.put(alice(), UserResources::empty(alice(), &symbol));
        let before = state.digest().unwrap();

        state.begin();
        state.resources.erase(&alice());
        state.resources.put(bob.clone(), UserResources::empty(bob.clone(), &symbol));
        state.market_mut().total_ram_bytes_reserved = 7;
        state.next_payout_key();
        state.rollback();

        assert!(state.resources.contains(&alice()));
        assert!(!state.resources.contains(&bob));
        assert_eq!(state.market().total_ram_bytes_reserved, 0);
        assert_eq!(state.global.next_payout_key, 0);
        assert_eq!(state.digest().unwrap(), before);
    }

    #[test]
    fn test_digest_ignores_dirty_marks() {
        let symbol = Symbol::new("SYS", 4).unwrap();
        let mut a = EconomyState::new(1024);
        a.resources.put(alice(), UserResources::empty(alice(), &symbol));

        let mut b = a.clone();
        b.resources.take_dirty();
        b.global_dirty = false;

        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_refund_total() {
        let symbol = Symbol::new("SYS", 4).unwrap();
        let mut refund = RefundRequest::empty(alice(), &symbol, BlockTimestamp::from_secs(1));
        assert!(refund.is_empty());
        refund.net_amount = Asset::new(30, symbol.clone());
        refund.ram_amount = Asset::new(12, symbol);
        assert_eq!(refund.total().unwrap().amount(), 42);
    }
}
