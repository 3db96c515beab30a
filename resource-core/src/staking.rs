//! Bandwidth staking transitions
//!
//! `delegate` and `undelegate` funnel into [`Transaction::change_bandwidth`],
//! which updates both ledgers, merges into the owner's refund, collects any
//! uncovered stake from the payer and adjusts the owner's voting stake.

use crate::host::Effect;
use crate::refunds::RefundDelta;
use crate::tables::VoterStake;
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset};
use crate::{Error, Result};

/// Who owns a delegation (and its refund rights)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeOwnership {
    /// The staker keeps ownership
    SelfOwned,
    /// Ownership moves to the receiver
    Transferred,
}

impl StakeOwnership {
    /// Resolve from the `transfer` flag
    pub fn from_transfer_flag(transfer: bool) -> Self {
        if transfer {
            StakeOwnership::Transferred
        } else {
            StakeOwnership::SelfOwned
        }
    }

    /// Owner of the delegation between `from` and `receiver`
    pub fn owner<'a>(&self, from: &'a AccountName, receiver: &'a AccountName) -> &'a AccountName {
        match self {
            StakeOwnership::SelfOwned => from,
            StakeOwnership::Transferred => receiver,
        }
    }
}

impl Transaction<'_> {
    /// Stake `net` and `cpu` from `from` toward `receiver`
    pub(crate) fn delegate(
        &mut self,
        from: &AccountName,
        receiver: &AccountName,
        net: &Asset,
        cpu: &Asset,
        transfer: bool,
    ) -> Result<Asset> {
        self.require_core_symbol(net)?;
        self.require_core_symbol(cpu)?;
        if net.is_negative() || cpu.is_negative() {
            return Err(Error::InvalidAmount("must stake a positive amount".to_string()));
        }
        if !net.checked_add(cpu)?.is_positive() {
            return Err(Error::InvalidAmount("must stake a positive amount".to_string()));
        }
        if transfer && from == receiver {
            return Err(Error::InvalidAmount(
                "cannot use transfer flag if delegating to self".to_string(),
            ));
        }
        if transfer && (from == &self.config.stake_account || receiver == &self.config.stake_account) {
            return Err(Error::InvalidAmount(
                "the staking pool cannot take part in stake transfers".to_string(),
            ));
        }

        self.change_bandwidth(
            from,
            receiver,
            net,
            cpu,
            StakeOwnership::from_transfer_flag(transfer),
        )
    }

    /// Release `net` and `cpu` that `from` staked toward `receiver`
    pub(crate) fn undelegate(
        &mut self,
        from: &AccountName,
        receiver: &AccountName,
        net: &Asset,
        cpu: &Asset,
    ) -> Result<Asset> {
        self.require_core_symbol(net)?;
        self.require_core_symbol(cpu)?;
        if net.is_negative() || cpu.is_negative() {
            return Err(Error::InvalidAmount("must unstake a positive amount".to_string()));
        }
        if !net.checked_add(cpu)?.is_positive() {
            return Err(Error::InvalidAmount("must unstake a positive amount".to_string()));
        }

        self.change_bandwidth(
            from,
            receiver,
            &net.checked_neg()?,
            &cpu.checked_neg()?,
            StakeOwnership::SelfOwned,
        )
    }

    /// Apply signed bandwidth deltas; returns the amount collected from `from`
    ///
    /// An increase offsets the owner's pending refund only for a self-owned
    /// stake toward oneself; any other increase is collected in full and
    /// leaves the refund and its payout untouched.
    pub(crate) fn change_bandwidth(
        &mut self,
        from: &AccountName,
        receiver: &AccountName,
        net_delta: &Asset,
        cpu_delta: &Asset,
        ownership: StakeOwnership,
    ) -> Result<Asset> {
        self.require_auth(from)?;
        if net_delta.is_zero() && cpu_delta.is_zero() {
            return Err(Error::InvalidAmount("should stake non-zero amount".to_string()));
        }
        let total = net_delta.checked_add(cpu_delta)?;
        let widest = net_delta.amount().unsigned_abs().max(cpu_delta.amount().unsigned_abs());
        if total.amount().unsigned_abs() < widest {
            return Err(Error::InvalidDelta(
                "net and cpu deltas cannot be opposite signs".to_string(),
            ));
        }

        let owner = ownership.owner(from, receiver).clone();

        self.apply_delegation_delta(&owner, receiver, net_delta, cpu_delta)?;
        self.apply_totals_delta(receiver, net_delta, cpu_delta)?;

        let mut collected = self.zero();
        if owner != self.config.stake_account {
            let offsets_refund = ownership == StakeOwnership::SelfOwned && from == receiver;
            let leftover = if total.is_negative() || offsets_refund {
                self.merge_refund(&owner, &RefundDelta::bandwidth(net_delta.clone(), cpu_delta.clone()))?
            } else {
                total.clone()
            };

            if leftover.is_positive() {
                self.emit(Effect::Transfer {
                    from: from.clone(),
                    to: self.config.stake_account.clone(),
                    quantity: leftover.clone(),
                    memo: "stake bandwidth".to_string(),
                });
                collected = leftover;
            }
        }

        self.update_voting_stake(&owner, total.amount())?;

        tracing::debug!(
            from = %from,
            receiver = %receiver,
            owner = %owner,
            net = %net_delta,
            cpu = %cpu_delta,
            collected = %collected,
            "Bandwidth changed"
        );
        Ok(collected)
    }

    /// Release `owner`'s matured refund from the staking pool
    pub(crate) fn claim_refund(&mut self, owner: &AccountName) -> Result<Asset> {
        self.require_auth(owner)?;
        let row = self.claimable_refund(owner)?;
        let amount = row.total()?;

        self.state.refunds.erase(owner);
        self.cancel_payout(owner);

        if amount.is_positive() {
            self.emit(Effect::Transfer {
                from: self.config.stake_account.clone(),
                to: owner.clone(),
                quantity: amount.clone(),
                memo: "unstake".to_string(),
            });
        }

        tracing::info!(owner = %owner, amount = %amount, "Refund claimed");
        Ok(amount)
    }

    /// Adjust `voter`'s vote-bearing stake by `delta` raw units
    pub(crate) fn update_voting_stake(&mut self, voter: &AccountName, delta: i64) -> Result<()> {
        let mut row = self
            .state
            .voters
            .find(voter)
            .unwrap_or_else(|| VoterStake::new(voter.clone()));

        row.staked = row
            .staked
            .checked_add(delta)
            .ok_or_else(|| Error::InvalidAmount(format!("voting stake overflow for {}", voter)))?;
        if row.staked < 0 {
            return Err(Error::NegativeVotingStake(format!(
                "stake for voting cannot be negative ({})",
                voter
            )));
        }

        if row.has_votes() {
            self.emit(Effect::UpdateVotes {
                voter: voter.clone(),
                proxy: row.proxy.clone(),
                producers: row.producers.clone(),
            });
        }

        if row.staked == 0 && !row.has_votes() {
            self.state.voters.erase(voter);
        } else {
            self.state.voters.put(voter.clone(), row);
        }
        Ok(())
    }

    /// Record whom `voter` votes for, as reported by the voting subsystem
    pub(crate) fn set_voter_preferences(
        &mut self,
        voter: &AccountName,
        proxy: Option<AccountName>,
        producers: Vec<AccountName>,
    ) -> Result<()> {
        self.require_auth(voter)?;
        if proxy.as_ref() == Some(voter) {
            return Err(Error::InvalidAmount("cannot proxy to self".to_string()));
        }
        if proxy.is_some() && !producers.is_empty() {
            return Err(Error::InvalidAmount(
                "cannot vote for producers and proxy at same time".to_string(),
            ));
        }

        let mut row = self
            .state
            .voters
            .find(voter)
            .unwrap_or_else(|| VoterStake::new(voter.clone()));
        row.proxy = proxy;
        row.producers = producers;

        if row.has_votes() && row.staked > 0 {
            self.emit(Effect::UpdateVotes {
                voter: voter.clone(),
                proxy: row.proxy.clone(),
                producers: row.producers.clone(),
            });
        }

        if row.staked == 0 && !row.has_votes() {
            self.state.voters.erase(voter);
        } else {
            self.state.voters.put(voter.clone(), row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_resolution() {
        let alice = AccountName::new("alice").unwrap();
        let bob = AccountName::new("bob").unwrap();

        assert_eq!(StakeOwnership::from_transfer_flag(false).owner(&alice, &bob), &alice);
        assert_eq!(StakeOwnership::from_transfer_flag(true).owner(&alice, &bob), &bob);
    }
}
