//! Deferred payout outbox
//!
//! One entry per owner, `(owner, fire_at, key)`. Scheduling replaces any
//! previous entry in the same step; the matching host effect cancels and
//! re-sends as one unit, so two payouts for one owner never coexist.

use crate::host::Effect;
use crate::tables::{EconomyState, ScheduledPayout};
use crate::transaction::Transaction;
use crate::types::{AccountName, BlockTimestamp};

impl Transaction<'_> {
    /// Arm (or re-arm) `owner`'s payout for `fire_at`
    pub(crate) fn schedule_payout(&mut self, owner: &AccountName, fire_at: BlockTimestamp) {
        let key = self.state.next_payout_key();
        self.state.payouts.put(
            owner.clone(),
            ScheduledPayout {
                owner: owner.clone(),
                fire_at,
                key,
            },
        );

        tracing::debug!(owner = %owner, fire_at = %fire_at, key = key.0, "Payout scheduled");
        self.emit(Effect::SchedulePayout {
            owner: owner.clone(),
            fire_at,
            key,
        });
    }

    /// Drop `owner`'s payout, if any
    pub(crate) fn cancel_payout(&mut self, owner: &AccountName) {
        if self.state.payouts.erase(owner).is_some() {
            tracing::debug!(owner = %owner, "Payout cancelled");
            self.emit(Effect::CancelPayout {
                owner: owner.clone(),
            });
        }
    }
}

/// Entries due at `now`, oldest first
pub fn due_payouts(state: &EconomyState, now: BlockTimestamp) -> Vec<ScheduledPayout> {
    let mut due: Vec<ScheduledPayout> = state
        .payouts
        .iter()
        .filter(|(_, p)| p.fire_at <= now)
        .map(|(_, p)| p.clone())
        .collect();
    due.sort_by_key(|p| (p.fire_at, p.key));
    due
}
