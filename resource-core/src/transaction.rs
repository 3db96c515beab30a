//! Working context of a single state transition
//!
//! A [`Transaction`] borrows the journaled state for the duration of one
//! transition and queues external effects. Component modules extend it with
//! their own operations (`resources`, `refunds`, `scheduler`, `staking`,
//! `ram_market`), so every mutation path goes through the same effect queue.

use crate::config::EconomyConfig;
use crate::host::{Effect, TokenLedger};
use crate::tables::EconomyState;
use crate::types::{AccountName, Asset, BlockTimestamp};
use crate::{Error, Result};

/// One in-flight transition
pub struct Transaction<'a> {
    pub(crate) state: &'a mut EconomyState,
    pub(crate) config: &'a EconomyConfig,
    pub(crate) tokens: &'a dyn TokenLedger,
    pub(crate) signer: &'a AccountName,
    pub(crate) now: BlockTimestamp,
    effects: Vec<Effect>,
}

impl<'a> Transaction<'a> {
    /// Open a transition over `state` (already journaled by the caller)
    pub(crate) fn new(
        state: &'a mut EconomyState,
        config: &'a EconomyConfig,
        tokens: &'a dyn TokenLedger,
        signer: &'a AccountName,
        now: BlockTimestamp,
    ) -> Self {
        Self {
            state,
            config,
            tokens,
            signer,
            now,
            effects: Vec::new(),
        }
    }

    /// Queue an external effect
    pub(crate) fn emit(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Zero of the core symbol
    pub(crate) fn zero(&self) -> Asset {
        Asset::zero(&self.config.core_symbol)
    }

    /// Signer must be `account`
    pub(crate) fn require_auth(&self, account: &AccountName) -> Result<()> {
        if self.signer != account {
            return Err(Error::Unauthorized(format!(
                "missing authority of {} (signed by {})",
                account, self.signer
            )));
        }
        Ok(())
    }

    /// Quantity must be denominated in the core symbol
    pub(crate) fn require_core_symbol(&self, quantity: &Asset) -> Result<()> {
        if quantity.symbol() != &self.config.core_symbol {
            return Err(Error::InvalidAmount(format!(
                "{} is not denominated in {}",
                quantity, self.config.core_symbol
            )));
        }
        Ok(())
    }

    /// Effects queued so far
    #[cfg(test)]
    pub(crate) fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Close the transition, yielding its effects
    pub(crate) fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}
