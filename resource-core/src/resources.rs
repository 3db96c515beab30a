//! Resource Ledger and Delegation Ledger
//!
//! Per-account totals and per-(delegator, recipient) stakes. Every write to
//! a totals row is followed by a quota resync with the account's new
//! `(ram_bytes, net_weight, cpu_weight)`; a deleted row resyncs to zeros.

use crate::host::Effect;
use crate::tables::{DelegatedBandwidth, UserResources};
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset};
use crate::{Error, Result};

impl Transaction<'_> {
    /// Adjust the stake `from` delegates toward `to`
    pub(crate) fn apply_delegation_delta(
        &mut self,
        from: &AccountName,
        to: &AccountName,
        net_delta: &Asset,
        cpu_delta: &Asset,
    ) -> Result<()> {
        let key = (from.clone(), to.clone());
        let mut row = self
            .state
            .delegations
            .find(&key)
            .unwrap_or_else(|| DelegatedBandwidth {
                from: from.clone(),
                to: to.clone(),
                net_weight: self.zero(),
                cpu_weight: self.zero(),
            });

        row.net_weight = row.net_weight.checked_add(net_delta)?;
        row.cpu_weight = row.cpu_weight.checked_add(cpu_delta)?;

        if row.net_weight.is_negative() {
            return Err(Error::InsufficientStake(format!(
                "insufficient staked net bandwidth from {} to {}",
                from, to
            )));
        }
        if row.cpu_weight.is_negative() {
            return Err(Error::InsufficientStake(format!(
                "insufficient staked cpu bandwidth from {} to {}",
                from, to
            )));
        }

        if row.is_empty() {
            self.state.delegations.erase(&key);
        } else {
            self.state.delegations.put(key, row);
        }
        Ok(())
    }

    /// Adjust `receiver`'s total bandwidth weights
    pub(crate) fn apply_totals_delta(
        &mut self,
        receiver: &AccountName,
        net_delta: &Asset,
        cpu_delta: &Asset,
    ) -> Result<()> {
        let mut row = self.totals_row(receiver);

        row.net_weight = row.net_weight.checked_add(net_delta)?;
        row.cpu_weight = row.cpu_weight.checked_add(cpu_delta)?;

        if row.net_weight.is_negative() {
            return Err(Error::InsufficientStake(format!(
                "insufficient staked total net bandwidth for {}",
                receiver
            )));
        }
        if row.cpu_weight.is_negative() {
            return Err(Error::InsufficientStake(format!(
                "insufficient staked total cpu bandwidth for {}",
                receiver
            )));
        }

        self.store_totals(row);
        Ok(())
    }

    /// Adjust `receiver`'s RAM quota and the stake paid for it
    ///
    /// Callers validate holdings beforehand, so going negative here is an
    /// accounting bug.
    pub(crate) fn apply_ram_delta(
        &mut self,
        receiver: &AccountName,
        bytes_delta: i64,
        stake_delta: &Asset,
    ) -> Result<()> {
        let mut row = self.totals_row(receiver);

        row.ram_bytes = row
            .ram_bytes
            .checked_add(bytes_delta)
            .ok_or_else(|| Error::InvalidAmount(format!("RAM quota overflow for {}", receiver)))?;
        row.ram_stake = row.ram_stake.checked_add(stake_delta)?;

        if row.ram_bytes < 0 || row.ram_stake.is_negative() {
            tracing::error!(
                account = %receiver,
                ram_bytes = row.ram_bytes,
                ram_stake = %row.ram_stake,
                "Negative RAM holdings"
            );
            return Err(Error::InvariantViolation(format!(
                "negative RAM holdings for {}",
                receiver
            )));
        }

        self.store_totals(row);
        Ok(())
    }

    fn totals_row(&self, account: &AccountName) -> UserResources {
        self.state
            .resources
            .find(account)
            .unwrap_or_else(|| UserResources::empty(account.clone(), &self.config.core_symbol))
    }

    /// Write a totals row (erasing it when empty) and resync quotas
    fn store_totals(&mut self, row: UserResources) {
        let limits = Effect::SetLimits {
            account: row.owner.clone(),
            ram_bytes: row.ram_bytes,
            net_weight: row.net_weight.amount(),
            cpu_weight: row.cpu_weight.amount(),
        };

        if row.is_empty() {
            self.state.resources.erase(&row.owner);
        } else {
            self.state.resources.put(row.owner.clone(), row);
        }
        self.emit(limits);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EconomyConfig;
    use crate::host::{Effect, InMemoryHost};
    use crate::tables::EconomyState;
    use crate::transaction::Transaction;
    use crate::types::{AccountName, Asset, BlockTimestamp};
    use crate::Error;

    fn name(s: &str) -> AccountName {
        AccountName::new(s).unwrap()
    }

    fn sys(amount: i64) -> Asset {
        Asset::new(amount, EconomyConfig::default().core_symbol)
    }

    #[test]
    fn test_delegation_row_lifecycle() {
        let config = EconomyConfig::default();
        let host = InMemoryHost::new(config.core_symbol.clone());
        let mut state = EconomyState::new(config.max_ram_size);
        let signer = name("alice");
        let mut tx = Transaction::new(&mut state, &config, &host, &signer, BlockTimestamp::default());

        tx.apply_delegation_delta(&name("alice"), &name("bob"), &sys(100), &sys(50))
            .unwrap();
        tx.apply_delegation_delta(&name("alice"), &name("bob"), &sys(-100), &sys(-50))
            .unwrap();
        drop(tx);

        assert!(state.delegations.is_empty());
    }

    #[test]
    fn test_over_undelegation_rejected() {
        let config = EconomyConfig::default();
        let host = InMemoryHost::new(config.core_symbol.clone());
        let mut state = EconomyState::new(config.max_ram_size);
        let signer = name("alice");
        let mut tx = Transaction::new(&mut state, &config, &host, &signer, BlockTimestamp::default());

        tx.apply_delegation_delta(&name("alice"), &name("bob"), &sys(10), &sys(0))
            .unwrap();
        let err = tx
            .apply_delegation_delta(&name("alice"), &name("bob"), &sys(-11), &sys(0))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientStake(_)));

        let err = tx
            .apply_totals_delta(&name("bob"), &sys(0), &sys(-1))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientStake(_)));
    }

    #[test]
    fn test_totals_resync_limits_even_on_delete() {
        let config = EconomyConfig::default();
        let host = InMemoryHost::new(config.core_symbol.clone());
        let mut state = EconomyState::new(config.max_ram_size);
        let signer = name("alice");
        let mut tx = Transaction::new(&mut state, &config, &host, &signer, BlockTimestamp::default());

        tx.apply_totals_delta(&name("bob"), &sys(7), &sys(3)).unwrap();
        tx.apply_totals_delta(&name("bob"), &sys(-7), &sys(-3)).unwrap();

        let effects = tx.into_effects();
        assert_eq!(
            effects.last(),
            Some(&Effect::SetLimits {
                account: name("bob"),
                ram_bytes: 0,
                net_weight: 0,
                cpu_weight: 0,
            })
        );
        assert!(!state.resources.contains(&name("bob")));
    }

    #[test]
    fn test_ram_row_kept_while_bandwidth_remains() {
        let config = EconomyConfig::default();
        let host = InMemoryHost::new(config.core_symbol.clone());
        let mut state = EconomyState::new(config.max_ram_size);
        let signer = name("alice");
        let mut tx = Transaction::new(&mut state, &config, &host, &signer, BlockTimestamp::default());

        tx.apply_totals_delta(&name("bob"), &sys(5), &sys(0)).unwrap();
        tx.apply_ram_delta(&name("bob"), 100, &sys(20)).unwrap();
        tx.apply_ram_delta(&name("bob"), -100, &sys(-20)).unwrap();
        assert!(tx.apply_ram_delta(&name("bob"), -1, &sys(0)).unwrap_err().is_fatal());
        drop(tx);

        let row = state.resources.get(&name("bob")).unwrap();
        assert_eq!(row.net_weight, sys(5));
        assert_eq!(row.ram_bytes, 0);
    }
}
