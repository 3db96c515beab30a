//! Refund Queue
//!
//! At most one pending refund per owner. Unstaked bandwidth and RAM sale
//! proceeds accumulate into it; re-staking offsets it before any new tokens
//! move. The payout is re-armed against `request_time` after every merge.

use crate::tables::RefundRequest;
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset};
use crate::{Error, Result};

/// Signed contribution to an owner's pending refund
///
/// Positive components are re-stakes (they offset the refund); negative
/// components are unstakes (they add to it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundDelta {
    /// Net bandwidth delta
    pub net: Asset,
    /// CPU bandwidth delta
    pub cpu: Asset,
    /// RAM token delta
    pub ram_amount: Asset,
    /// RAM bytes delta
    pub ram_bytes: i64,
}

impl RefundDelta {
    /// Bandwidth-only contribution
    pub fn bandwidth(net: Asset, cpu: Asset) -> Self {
        let zero = net.with_amount(0);
        Self {
            net,
            cpu,
            ram_amount: zero,
            ram_bytes: 0,
        }
    }

    /// RAM-only contribution
    pub fn ram(amount: Asset, bytes: i64) -> Self {
        let zero = amount.with_amount(0);
        Self {
            net: zero.clone(),
            cpu: zero,
            ram_amount: amount,
            ram_bytes: bytes,
        }
    }

    fn unstakes(&self) -> bool {
        self.net.is_negative() || self.cpu.is_negative() || self.ram_amount.is_negative()
    }

    /// Sum of the positive components, owed in full when nothing is pending
    fn positive_total(&self) -> Result<Asset> {
        let zero = self.net.with_amount(0);
        [&self.net, &self.cpu, &self.ram_amount]
            .into_iter()
            .filter(|a| a.is_positive())
            .try_fold(zero, |acc, a| acc.checked_add(a))
    }
}

/// Fold one signed component into a pending amount, returning the excess
/// a re-stake could not absorb
fn merge_component(pending: &mut Asset, delta: &Asset) -> Result<Asset> {
    if delta.is_negative() {
        *pending = pending.checked_sub(delta)?;
        return Ok(delta.with_amount(0));
    }

    *pending = pending.checked_sub(delta)?;
    if pending.is_negative() {
        let leftover = pending.checked_neg()?;
        *pending = pending.with_amount(0);
        Ok(leftover)
    } else {
        Ok(delta.with_amount(0))
    }
}

impl Transaction<'_> {
    /// Merge `delta` into `owner`'s pending refund
    ///
    /// Returns the part of the re-staked amount that no pending refund
    /// covered; the caller must collect it from the payer.
    pub(crate) fn merge_refund(&mut self, owner: &AccountName, delta: &RefundDelta) -> Result<Asset> {
        let unstaking = delta.unstakes();

        let mut row = match self.state.refunds.find(owner) {
            Some(row) => row,
            None if unstaking => {
                RefundRequest::empty(owner.clone(), &self.config.core_symbol, self.now)
            }
            None => return delta.positive_total(),
        };

        if unstaking {
            row.request_time = self.now;
        }

        let leftover = merge_component(&mut row.net_amount, &delta.net)?
            .checked_add(&merge_component(&mut row.cpu_amount, &delta.cpu)?)?
            .checked_add(&merge_component(&mut row.ram_amount, &delta.ram_amount)?)?;

        row.ram_bytes = row.ram_bytes.saturating_sub(delta.ram_bytes).max(0);
        if row.ram_amount.is_zero() {
            row.ram_bytes = 0;
        }

        if row.net_amount.is_negative() || row.cpu_amount.is_negative() || row.ram_amount.is_negative()
        {
            tracing::error!(
                owner = %owner,
                net = %row.net_amount,
                cpu = %row.cpu_amount,
                ram = %row.ram_amount,
                "Negative refund after merge"
            );
            return Err(Error::InvariantViolation(format!(
                "negative refund for {} after merge",
                owner
            )));
        }

        tracing::debug!(
            owner = %owner,
            net = %row.net_amount,
            cpu = %row.cpu_amount,
            ram = %row.ram_amount,
            leftover = %leftover,
            "Refund merged"
        );

        if row.is_empty() {
            self.state.refunds.erase(owner);
            self.cancel_payout(owner);
        } else {
            let fire_at = row.request_time.plus_secs(self.config.refund_delay_secs);
            self.state.refunds.put(owner.clone(), row);
            self.schedule_payout(owner, fire_at);
        }

        Ok(leftover)
    }

    /// Pending refund of `owner`, if it may be released now
    pub(crate) fn claimable_refund(&self, owner: &AccountName) -> Result<RefundRequest> {
        let row = self.state.refunds.find(owner).ok_or_else(|| {
            Error::NotFound(format!("refund request not found for {}", owner))
        })?;

        let due = row.request_time.plus_secs(self.config.refund_delay_secs);
        if due > self.now {
            return Err(Error::TooEarly(format!(
                "refund for {} is not available until {}",
                owner, due
            )));
        }
        Ok(row)
    }
}
