//! RAM market: token/byte conversion, reserve accounting and RAM trades
//!
//! # Pricing
//!
//! Purchases use one global instantaneous price derived from total
//! capacity and the circulating token supply:
//!
//! ```text
//! bytes_per_token = floor(max_ram_size * 10^precision / supply)
//! bytes           = floor(bytes_per_token * tokens / 10^precision)
//! ```
//!
//! The price follows token supply only; it does not rise as free RAM runs
//! out. Sales are priced at the seller's own average cost
//! (`ram_stake / ram_bytes`), not at the market price.
//!
//! All rounding favours the market.

use crate::host::Effect;
use crate::refunds::RefundDelta;
use crate::tables::{GlobalMarketState, UserResources};
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset};
use crate::{Error, Result};

/// Instantaneous purchase price, bytes per whole token
pub fn bytes_per_token(market: &GlobalMarketState, supply: &Asset) -> Result<u128> {
    if !supply.is_positive() {
        return Err(Error::InvalidAmount(format!(
            "token supply must be positive, got {}",
            supply
        )));
    }
    let unit = supply.symbol().unit();
    Ok(u128::from(market.max_ram_size) * unit / supply.amount() as u128)
}

/// Bytes bought by spending `tokens`
pub fn quote_buy(market: &GlobalMarketState, supply: &Asset, tokens: &Asset) -> Result<i64> {
    if !tokens.is_positive() {
        return Err(Error::InvalidAmount("must purchase a positive amount".to_string()));
    }
    let price = bytes_per_token(market, supply)?;
    let bytes = price
        .checked_mul(tokens.amount() as u128)
        .ok_or_else(|| Error::InvalidAmount(format!("purchase of {} overflows", tokens)))?
        / supply.symbol().unit();

    let bytes = i64::try_from(bytes)
        .map_err(|_| Error::InvalidAmount(format!("purchase of {} overflows", tokens)))?;
    if bytes <= 0 {
        return Err(Error::InvalidAmount("must reserve a positive amount".to_string()));
    }
    Ok(bytes)
}

/// Tokens charged for exactly `bytes`, rounded up
pub fn quote_exact_bytes(market: &GlobalMarketState, supply: &Asset, bytes: i64) -> Result<Asset> {
    if bytes <= 0 {
        return Err(Error::InvalidAmount("must reserve a positive amount".to_string()));
    }
    let price = bytes_per_token(market, supply)?;
    if price == 0 {
        return Err(Error::InvalidAmount(
            "RAM price exceeds representable range".to_string(),
        ));
    }

    let numerator = (bytes as u128) * supply.symbol().unit();
    let amount = (numerator + price - 1) / price;
    let amount = i64::try_from(amount)
        .map_err(|_| Error::InvalidAmount(format!("cost of {} bytes overflows", bytes)))?;

    Ok(supply.with_amount(amount))
}

/// Tokens returned for selling `bytes` at the seller's average cost
pub fn quote_sell(resources: &UserResources, bytes: i64) -> Result<Asset> {
    if bytes <= 0 {
        return Err(Error::InvalidAmount("cannot sell negative byte".to_string()));
    }
    if resources.ram_bytes < bytes {
        return Err(Error::InsufficientQuota(format!(
            "{} holds {} bytes, cannot sell {}",
            resources.owner, resources.ram_bytes, bytes
        )));
    }

    // ram_bytes >= bytes > 0 here
    let tokens = (resources.ram_stake.amount() as i128) * (bytes as i128)
        / (resources.ram_bytes as i128);
    let tokens = i64::try_from(tokens)
        .map_err(|_| Error::InvariantViolation("RAM stake out of range".to_string()))?;

    if tokens <= 1 {
        return Err(Error::AmountTooSmall(
            "token amount received from selling ram is too low".to_string(),
        ));
    }
    Ok(resources.ram_stake.with_amount(tokens))
}

/// Record a purchase of `bytes` for `tokens` in the global counters
pub fn reserve(market: &mut GlobalMarketState, bytes: i64, tokens: &Asset) -> Result<()> {
    let bytes = u64::try_from(bytes)
        .map_err(|_| Error::InvariantViolation(format!("negative reservation {}", bytes)))?;

    if bytes > market.free_ram() {
        return Err(Error::InsufficientQuota(format!(
            "only {} bytes of RAM remain, requested {}",
            market.free_ram(),
            bytes
        )));
    }

    market.total_ram_bytes_reserved += bytes;
    market.total_ram_stake = market
        .total_ram_stake
        .checked_add(tokens.amount())
        .ok_or_else(|| Error::InvariantViolation("total RAM stake overflow".to_string()))?;

    check_invariants(market)
}

/// Record a sale of `bytes` for `tokens` in the global counters
pub fn release(market: &mut GlobalMarketState, bytes: i64, tokens: &Asset) -> Result<()> {
    let bytes = u64::try_from(bytes)
        .map_err(|_| Error::InvariantViolation(format!("negative release {}", bytes)))?;

    market.total_ram_bytes_reserved = market
        .total_ram_bytes_reserved
        .checked_sub(bytes)
        .ok_or_else(|| {
            Error::InvariantViolation("attempt to release more RAM than reserved".to_string())
        })?;
    market.total_ram_stake -= tokens.amount();

    check_invariants(market)
}

/// Reserve counters must stay within bounds
pub fn check_invariants(market: &GlobalMarketState) -> Result<()> {
    if market.total_ram_bytes_reserved > market.max_ram_size {
        tracing::error!(
            reserved = market.total_ram_bytes_reserved,
            max = market.max_ram_size,
            "RAM reserve exceeds capacity"
        );
        return Err(Error::InvariantViolation(
            "reserved RAM exceeds capacity".to_string(),
        ));
    }
    if market.total_ram_stake < 0 {
        tracing::error!(
            total_ram_stake = market.total_ram_stake,
            "Negative total RAM stake"
        );
        return Err(Error::InvariantViolation(
            "attempt to unstake more tokens than previously staked".to_string(),
        ));
    }
    Ok(())
}

impl Transaction<'_> {
    /// Spend `quantity` from `payer` on RAM for `receiver`; returns bytes bought
    pub(crate) fn buy_ram(
        &mut self,
        payer: &AccountName,
        receiver: &AccountName,
        quantity: &Asset,
    ) -> Result<i64> {
        self.require_auth(payer)?;
        self.require_core_symbol(quantity)?;
        if !quantity.is_positive() {
            return Err(Error::InvalidAmount("must purchase a positive amount".to_string()));
        }

        let supply = self.tokens.supply(&self.config.core_symbol)?;
        let bytes = quote_buy(self.state.market(), &supply, quantity)?;
        self.update_ram(payer, receiver, bytes, quantity)?;
        Ok(bytes)
    }

    /// Buy exactly `bytes` for `receiver` at the current price; returns the cost
    pub(crate) fn buy_ram_bytes(
        &mut self,
        payer: &AccountName,
        receiver: &AccountName,
        bytes: u32,
    ) -> Result<Asset> {
        self.require_auth(payer)?;

        let supply = self.tokens.supply(&self.config.core_symbol)?;
        let cost = quote_exact_bytes(self.state.market(), &supply, i64::from(bytes))?;
        if !cost.is_positive() {
            return Err(Error::InvalidAmount("must purchase a positive amount".to_string()));
        }
        self.update_ram(payer, receiver, i64::from(bytes), &cost)?;
        Ok(cost)
    }

    /// Sell `bytes` of `account`'s RAM back at its average cost
    ///
    /// Proceeds join the account's pending refund rather than paying out
    /// immediately.
    pub(crate) fn sell_ram(&mut self, account: &AccountName, bytes: i64) -> Result<Asset> {
        self.require_auth(account)?;
        if account == &self.config.stake_account {
            return Err(Error::InvalidAmount(
                "the staking pool cannot sell RAM".to_string(),
            ));
        }

        let holdings = self.state.resources.find(account).ok_or_else(|| {
            Error::NotFound(format!("no resource row for {}", account))
        })?;
        let tokens = quote_sell(&holdings, bytes)?;

        release(self.state.market_mut(), bytes, &tokens)?;
        self.apply_ram_delta(account, -bytes, &tokens.checked_neg()?)?;
        self.merge_refund(account, &RefundDelta::ram(tokens.checked_neg()?, -bytes))?;

        tracing::info!(account = %account, bytes, proceeds = %tokens, "RAM sold");
        Ok(tokens)
    }

    fn update_ram(
        &mut self,
        payer: &AccountName,
        receiver: &AccountName,
        bytes: i64,
        quantity: &Asset,
    ) -> Result<()> {
        reserve(self.state.market_mut(), bytes, quantity)?;
        self.apply_ram_delta(receiver, bytes, quantity)?;

        let leftover = if receiver == &self.config.stake_account {
            quantity.clone()
        } else {
            self.merge_refund(receiver, &RefundDelta::ram(quantity.clone(), bytes))?
        };

        if leftover.is_positive() {
            if payer == &self.config.stake_account {
                return Err(Error::InvalidAmount(
                    "the staking pool cannot pay for RAM".to_string(),
                ));
            }
            self.emit(Effect::Transfer {
                from: payer.clone(),
                to: self.config.stake_account.clone(),
                quantity: leftover.clone(),
                memo: "stake ram".to_string(),
            });
        }

        tracing::info!(
            payer = %payer,
            receiver = %receiver,
            bytes,
            cost = %quantity,
            paid = %leftover,
            "RAM bought"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountName, Symbol};

    fn sys() -> Symbol {
        Symbol::new("SYS", 4).unwrap()
    }

    fn market() -> GlobalMarketState {
        // 1 GiB of RAM, 1_000_000.0000 SYS supply -> 1073 bytes per token
        GlobalMarketState::new(1024 * 1024 * 1024)
    }

    fn supply() -> Asset {
        Asset::new(1_000_000_0000, sys())
    }

    #[test]
    fn test_price_from_capacity_and_supply() {
        assert_eq!(bytes_per_token(&market(), &supply()).unwrap(), 1073);
    }

    #[test]
    fn test_price_ignores_reserved_bytes() {
        let mut m = market();
        let before = bytes_per_token(&m, &supply()).unwrap();
        m.total_ram_bytes_reserved = m.max_ram_size / 2;
        assert_eq!(bytes_per_token(&m, &supply()).unwrap(), before);
    }

    #[test]
    fn test_quote_buy() {
        let bytes = quote_buy(&market(), &supply(), &Asset::new(10_000, sys())).unwrap();
        assert_eq!(bytes, 1073);
    }

    #[test]
    fn test_quote_buy_rejects_dust() {
        let err = quote_buy(&market(), &supply(), &Asset::new(1, sys())).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));

        let err = quote_buy(&market(), &supply(), &Asset::new(0, sys())).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }

    #[test]
    fn test_exact_bytes_never_undercharges() {
        for bytes in [1, 7, 1073, 1074, 65_536] {
            let cost = quote_exact_bytes(&market(), &supply(), bytes).unwrap();
            let bought = quote_buy(&market(), &supply(), &cost).unwrap();
            assert!(bought >= bytes, "{} tokens bought only {} of {} bytes", cost, bought, bytes);
        }
    }

    #[test]
    fn test_sell_at_average_cost() {
        let mut res = UserResources::empty(AccountName::new("alice").unwrap(), &sys());
        res.ram_bytes = 1000;
        res.ram_stake = Asset::new(5000, sys());

        assert_eq!(quote_sell(&res, 500).unwrap().amount(), 2500);
        assert!(matches!(quote_sell(&res, 1001), Err(Error::InsufficientQuota(_))));
        assert!(matches!(quote_sell(&res, 0), Err(Error::InvalidAmount(_))));
        // 5000 * 1 / 1000 = 5 ok; shrink stake so one byte is worth < 2 units
        res.ram_stake = Asset::new(1500, sys());
        assert!(matches!(quote_sell(&res, 1), Err(Error::AmountTooSmall(_))));
    }

    #[test]
    fn test_reserve_and_release() {
        let mut m = GlobalMarketState::new(100);
        reserve(&mut m, 60, &Asset::new(10, sys())).unwrap();
        assert_eq!(m.total_ram_bytes_reserved, 60);
        assert_eq!(m.total_ram_stake, 10);

        assert!(matches!(
            reserve(&mut m, 41, &Asset::new(1, sys())),
            Err(Error::InsufficientQuota(_))
        ));

        release(&mut m, 60, &Asset::new(10, sys())).unwrap();
        assert_eq!(m, GlobalMarketState::new(100));
    }

    #[test]
    fn test_release_past_zero_is_fatal() {
        let mut m = GlobalMarketState::new(100);
        let err = release(&mut m, 1, &Asset::new(0, sys())).unwrap_err();
        assert!(err.is_fatal());

        let mut m = GlobalMarketState::new(100);
        m.total_ram_bytes_reserved = 10;
        let err = release(&mut m, 5, &Asset::new(3, sys())).unwrap_err();
        assert!(err.is_fatal());
    }
}
