//! Collaborators provided by the surrounding ledger runtime
//!
//! The economy never reaches these directly while a transition is being
//! computed, except for read-only supply queries. Side effects are queued as
//! [`Effect`]s and dispatched only after the transition has fully validated,
//! so a rejected transition leaves no trace anywhere.

use crate::tables::PayoutKey;
use crate::types::{AccountName, Asset, BlockTimestamp, Symbol};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Translates stake totals into enforced per-account limits
pub trait QuotaManager {
    /// Set limits for `account`; assumed infallible for non-negative input
    fn set_limits(&mut self, account: &AccountName, ram_bytes: i64, net_weight: i64, cpu_weight: i64);
}

/// Fungible token ledger
pub trait TokenLedger {
    /// Move `quantity` from `from` to `to`
    fn transfer(
        &mut self,
        from: &AccountName,
        to: &AccountName,
        quantity: &Asset,
        memo: &str,
    ) -> Result<()>;

    /// Current circulating supply of `symbol`
    fn supply(&self, symbol: &Symbol) -> Result<Asset>;
}

/// Producer-vote bookkeeping
pub trait VoterRegistry {
    /// Recompute vote weight for `voter` after its stake changed
    fn update_votes(
        &mut self,
        voter: &AccountName,
        proxy: Option<&AccountName>,
        producers: &[AccountName],
        recompute_now: bool,
    );
}

/// Runtime-side delayed execution; at most one item per owner
pub trait DeferredScheduler {
    /// Arrange for `owner`'s refund to be released at `fire_at`
    fn schedule(&mut self, owner: &AccountName, fire_at: BlockTimestamp, key: PayoutKey);

    /// Drop any pending item for `owner`
    fn cancel(&mut self, owner: &AccountName);
}

/// Everything the economy needs from its runtime
pub trait Host: QuotaManager + TokenLedger + VoterRegistry + DeferredScheduler {}

impl<T: QuotaManager + TokenLedger + VoterRegistry + DeferredScheduler> Host for T {}

/// External side effect of a committed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Token transfer
    Transfer {
        /// Payer
        from: AccountName,
        /// Payee
        to: AccountName,
        /// Amount
        quantity: Asset,
        /// Memo
        memo: String,
    },
    /// Quota resync
    SetLimits {
        /// Account
        account: AccountName,
        /// RAM quota
        ram_bytes: i64,
        /// Net weight
        net_weight: i64,
        /// CPU weight
        cpu_weight: i64,
    },
    /// Vote recomputation
    UpdateVotes {
        /// Voter whose stake changed
        voter: AccountName,
        /// Voter's proxy
        proxy: Option<AccountName>,
        /// Voter's producers
        producers: Vec<AccountName>,
    },
    /// Payout (re)scheduled
    SchedulePayout {
        /// Refund owner
        owner: AccountName,
        /// Earliest fire time
        fire_at: BlockTimestamp,
        /// Idempotency key
        key: PayoutKey,
    },
    /// Payout cancelled
    CancelPayout {
        /// Refund owner
        owner: AccountName,
    },
}

/// Dispatch queued effects to the host
///
/// Transfers go first: they are the only fallible effect, and a transition
/// emits at most one, so a rejection happens before anything else has been
/// told about the transition.
pub fn dispatch<H: Host + ?Sized>(host: &mut H, effects: &[Effect]) -> Result<()> {
    debug_assert!(
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Transfer { .. }))
            .count()
            <= 1,
        "a transition emits at most one transfer"
    );

    for effect in effects {
        if let Effect::Transfer {
            from,
            to,
            quantity,
            memo,
        } = effect
        {
            host.transfer(from, to, quantity, memo)?;
        }
    }

    for effect in effects {
        match effect {
            Effect::Transfer { .. } => {}
            Effect::SetLimits {
                account,
                ram_bytes,
                net_weight,
                cpu_weight,
            } => host.set_limits(account, *ram_bytes, *net_weight, *cpu_weight),
            Effect::UpdateVotes {
                voter,
                proxy,
                producers,
            } => host.update_votes(voter, proxy.as_ref(), producers, false),
            Effect::SchedulePayout {
                owner,
                fire_at,
                key,
            } => {
                // Replace, never stack
                host.cancel(owner);
                host.schedule(owner, *fire_at, *key);
            }
            Effect::CancelPayout { owner } => host.cancel(owner),
        }
    }

    Ok(())
}

/// Limits last pushed for an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// RAM quota
    pub ram_bytes: i64,
    /// Net weight
    pub net_weight: i64,
    /// CPU weight
    pub cpu_weight: i64,
}

/// In-process host: token balances, recorded limits, votes and schedule
///
/// Used by tests and by the replay tool in place of a real node.
#[derive(Debug, Clone)]
pub struct InMemoryHost {
    symbol: Symbol,
    supply: i64,
    balances: BTreeMap<AccountName, i64>,
    limits: BTreeMap<AccountName, Limits>,
    vote_updates: Vec<AccountName>,
    scheduled: BTreeMap<AccountName, (BlockTimestamp, PayoutKey)>,
}

impl InMemoryHost {
    /// Empty ledger for `symbol`
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            supply: 0,
            balances: BTreeMap::new(),
            limits: BTreeMap::new(),
            vote_updates: Vec::new(),
            scheduled: BTreeMap::new(),
        }
    }

    /// Mint `amount` raw units to `account`
    pub fn issue(&mut self, account: &AccountName, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(Error::InvalidAmount("must issue a positive amount".to_string()));
        }
        self.supply = self
            .supply
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount("supply overflow".to_string()))?;
        *self.balances.entry(account.clone()).or_insert(0) += amount;
        Ok(())
    }

    /// Balance of `account` in raw units
    pub fn balance(&self, account: &AccountName) -> i64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Sum of all balances; equals supply when nothing leaked
    pub fn total_balances(&self) -> i64 {
        self.balances.values().sum()
    }

    /// Circulating supply in raw units
    pub fn supply_amount(&self) -> i64 {
        self.supply
    }

    /// Limits last set for `account`
    pub fn limits(&self, account: &AccountName) -> Option<Limits> {
        self.limits.get(account).copied()
    }

    /// Voters notified so far, in order
    pub fn vote_updates(&self) -> &[AccountName] {
        &self.vote_updates
    }

    /// Currently scheduled payout for `owner`
    pub fn scheduled(&self, owner: &AccountName) -> Option<(BlockTimestamp, PayoutKey)> {
        self.scheduled.get(owner).copied()
    }
}

impl QuotaManager for InMemoryHost {
    fn set_limits(&mut self, account: &AccountName, ram_bytes: i64, net_weight: i64, cpu_weight: i64) {
        self.limits.insert(
            account.clone(),
            Limits {
                ram_bytes,
                net_weight,
                cpu_weight,
            },
        );
    }
}

impl TokenLedger for InMemoryHost {
    fn transfer(
        &mut self,
        from: &AccountName,
        to: &AccountName,
        quantity: &Asset,
        memo: &str,
    ) -> Result<()> {
        if quantity.symbol() != &self.symbol {
            return Err(Error::TransferFailed(format!(
                "unknown symbol {}",
                quantity.symbol()
            )));
        }
        if !quantity.is_positive() {
            return Err(Error::TransferFailed("must transfer positive quantity".to_string()));
        }
        if from == to {
            return Err(Error::TransferFailed("cannot transfer to self".to_string()));
        }

        let available = self.balance(from);
        if available < quantity.amount() {
            return Err(Error::TransferFailed(format!(
                "overdrawn balance: {} holds {}, needs {}",
                from,
                quantity.with_amount(available),
                quantity
            )));
        }

        *self.balances.entry(from.clone()).or_insert(0) -= quantity.amount();
        *self.balances.entry(to.clone()).or_insert(0) += quantity.amount();

        tracing::debug!(%from, %to, %quantity, memo, "Token transfer");
        Ok(())
    }

    fn supply(&self, symbol: &Symbol) -> Result<Asset> {
        if symbol != &self.symbol {
            return Err(Error::NotFound(format!("token {} not issued", symbol)));
        }
        Ok(Asset::new(self.supply, symbol.clone()))
    }
}

impl VoterRegistry for InMemoryHost {
    fn update_votes(
        &mut self,
        voter: &AccountName,
        _proxy: Option<&AccountName>,
        _producers: &[AccountName],
        _recompute_now: bool,
    ) {
        self.vote_updates.push(voter.clone());
    }
}

impl DeferredScheduler for InMemoryHost {
    fn schedule(&mut self, owner: &AccountName, fire_at: BlockTimestamp, key: PayoutKey) {
        self.scheduled.insert(owner.clone(), (fire_at, key));
    }

    fn cancel(&mut self, owner: &AccountName) {
        self.scheduled.remove(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> AccountName {
        AccountName::new(s).unwrap()
    }

    fn sys() -> Symbol {
        Symbol::new("SYS", 4).unwrap()
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut host = InMemoryHost::new(sys());
        host.issue(&name("alice"), 100).unwrap();

        host.transfer(&name("alice"), &name("bob"), &Asset::new(40, sys()), "memo")
            .unwrap();

        assert_eq!(host.balance(&name("alice")), 60);
        assert_eq!(host.balance(&name("bob")), 40);
        assert_eq!(host.total_balances(), host.supply_amount());
    }

    #[test]
    fn test_overdraw_rejected() {
        let mut host = InMemoryHost::new(sys());
        host.issue(&name("alice"), 10).unwrap();

        let err = host
            .transfer(&name("alice"), &name("bob"), &Asset::new(11, sys()), "")
            .unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));
        assert_eq!(host.balance(&name("alice")), 10);
    }

    #[test]
    fn test_dispatch_aborts_before_notifications_on_failed_transfer() {
        let mut host = InMemoryHost::new(sys());
        let effects = vec![
            Effect::SetLimits {
                account: name("bob"),
                ram_bytes: 0,
                net_weight: 5,
                cpu_weight: 0,
            },
            Effect::Transfer {
                from: name("alice"),
                to: name("eosio.stake"),
                quantity: Asset::new(5, sys()),
                memo: "stake bandwidth".to_string(),
            },
        ];

        assert!(dispatch(&mut host, &effects).is_err());
        assert!(host.limits(&name("bob")).is_none());
    }

    #[test]
    fn test_schedule_replaces_previous() {
        let mut host = InMemoryHost::new(sys());
        let effects = vec![
            Effect::SchedulePayout {
                owner: name("alice"),
                fire_at: BlockTimestamp::from_secs(10),
                key: PayoutKey(0),
            },
            Effect::SchedulePayout {
                owner: name("alice"),
                fire_at: BlockTimestamp::from_secs(20),
                key: PayoutKey(1),
            },
        ];

        dispatch(&mut host, &effects).unwrap();
        assert_eq!(
            host.scheduled(&name("alice")),
            Some((BlockTimestamp::from_secs(20), PayoutKey(1)))
        );
    }
}
