//! Core value types
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact integer arithmetic for token amounts
//! - Human-readable text forms for configuration and replay files

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Maximum length of an account name
pub const MAX_ACCOUNT_NAME_LEN: usize = 12;

/// Ledger account name (`[a-z1-5.]{1,12}`, no trailing dot)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl AccountName {
    /// Parse and validate an account name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid_chars = name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'1'..=b'5' | b'.'));

        if name.is_empty() || name.len() > MAX_ACCOUNT_NAME_LEN || !valid_chars || name.ends_with('.')
        {
            return Err(Error::InvalidAmount(format!("Invalid account name '{}'", name)));
        }

        Ok(Self(name))
    }

    /// Construct from a name known to be valid (constants, defaults)
    pub(crate) fn new_unchecked(name: &str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid built-in account name {name}");
        Self(name.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AccountName> for String {
    fn from(name: AccountName) -> Self {
        name.0
    }
}

impl FromStr for AccountName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token symbol: up to 7 uppercase letters and a decimal precision
///
/// Text form is `"<precision>,<CODE>"`, e.g. `"4,SYS"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    code: String,
    precision: u8,
}

impl Symbol {
    /// Largest supported precision
    pub const MAX_PRECISION: u8 = 18;

    /// Create a validated symbol
    pub fn new(code: impl Into<String>, precision: u8) -> Result<Self> {
        let code = code.into();
        if code.is_empty() || code.len() > 7 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidAmount(format!("Invalid symbol code '{}'", code)));
        }
        if precision > Self::MAX_PRECISION {
            return Err(Error::InvalidAmount(format!(
                "Symbol precision {} exceeds {}",
                precision,
                Self::MAX_PRECISION
            )));
        }
        Ok(Self { code, precision })
    }

    pub(crate) fn new_unchecked(code: &str, precision: u8) -> Self {
        debug_assert!(Self::new(code, precision).is_ok(), "invalid built-in symbol {code}");
        Self {
            code: code.to_string(),
            precision,
        }
    }

    /// Symbol code (e.g. `SYS`)
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number of decimal places
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// `10^precision`
    pub fn unit(&self) -> u128 {
        10u128.pow(u32::from(self.precision))
    }
}

impl TryFrom<String> for Symbol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

impl FromStr for Symbol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| Error::InvalidAmount(format!("Malformed symbol '{}'", s)))?;
        let precision = precision
            .trim()
            .parse::<u8>()
            .map_err(|e| Error::InvalidAmount(format!("Malformed symbol '{}': {}", s, e)))?;
        Self::new(code.trim(), precision)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision, self.code)
    }
}

/// Token quantity in the smallest unit of its symbol
///
/// Text form is `"<decimal> <CODE>"` with exactly `precision` decimals,
/// e.g. `"10.5000 SYS"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset {
    amount: i64,
    symbol: Symbol,
}

impl Asset {
    /// Create from raw units
    pub fn new(amount: i64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    /// Zero of the given symbol
    pub fn zero(symbol: &Symbol) -> Self {
        Self::new(0, symbol.clone())
    }

    /// Raw units
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Symbol
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Whether the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Whether the amount is strictly negative
    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// Same symbol, different amount
    pub fn with_amount(&self, amount: i64) -> Self {
        Self::new(amount, self.symbol.clone())
    }

    /// Checked addition; symbols must match
    pub fn checked_add(&self, other: &Asset) -> Result<Asset> {
        self.ensure_same_symbol(other)?;
        self.amount
            .checked_add(other.amount)
            .map(|amount| self.with_amount(amount))
            .ok_or_else(|| Error::InvalidAmount(format!("Overflow adding {} to {}", other, self)))
    }

    /// Checked subtraction; symbols must match
    pub fn checked_sub(&self, other: &Asset) -> Result<Asset> {
        self.ensure_same_symbol(other)?;
        self.amount
            .checked_sub(other.amount)
            .map(|amount| self.with_amount(amount))
            .ok_or_else(|| {
                Error::InvalidAmount(format!("Overflow subtracting {} from {}", other, self))
            })
    }

    /// Checked negation
    pub fn checked_neg(&self) -> Result<Asset> {
        self.amount
            .checked_neg()
            .map(|amount| self.with_amount(amount))
            .ok_or_else(|| Error::InvalidAmount(format!("Cannot negate {}", self)))
    }

    /// Exact decimal value
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.amount, u32::from(self.symbol.precision))
    }

    fn ensure_same_symbol(&self, other: &Asset) -> Result<()> {
        if self.symbol != other.symbol {
            return Err(Error::InvalidAmount(format!(
                "Symbol mismatch: {} vs {}",
                self.symbol, other.symbol
            )));
        }
        Ok(())
    }
}

impl TryFrom<String> for Asset {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.to_string()
    }
}

impl FromStr for Asset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (number, code) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| Error::InvalidAmount(format!("Malformed asset '{}'", s)))?;

        let value = Decimal::from_str(number)
            .map_err(|e| Error::InvalidAmount(format!("Malformed asset '{}': {}", s, e)))?;
        let precision = u8::try_from(value.scale())
            .map_err(|_| Error::InvalidAmount(format!("Malformed asset '{}'", s)))?;
        let symbol = Symbol::new(code.trim(), precision)?;

        let amount = i64::try_from(value.mantissa())
            .map_err(|_| Error::InvalidAmount(format!("Asset '{}' out of range", s)))?;

        Ok(Self { amount, symbol })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.*} {}",
            usize::from(self.symbol.precision),
            self.to_decimal(),
            self.symbol.code
        )
    }
}

/// Ledger block time, whole seconds since the Unix epoch
///
/// This is the only clock the economy reads; wall-clock time never enters
/// a transition.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockTimestamp(u32);

impl BlockTimestamp {
    /// From seconds since epoch
    pub fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    /// Seconds since epoch
    pub fn as_secs(&self) -> u32 {
        self.0
    }

    /// Saturating add of a delay in seconds
    pub fn plus_secs(&self, secs: u32) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// As UTC datetime (for logs and reports)
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.0), 0).unwrap_or_default()
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%dT%H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sys() -> Symbol {
        Symbol::new("SYS", 4).unwrap()
    }

    #[test]
    fn test_account_name_validation() {
        assert!(AccountName::new("alice").is_ok());
        assert!(AccountName::new("eosio.stake").is_ok());
        assert!(AccountName::new("").is_err());
        assert!(AccountName::new("Alice").is_err());
        assert!(AccountName::new("bob6").is_err());
        assert!(AccountName::new("trailing.").is_err());
        assert!(AccountName::new("thirteenchars").is_err());
    }

    #[test]
    fn test_symbol_text_form() {
        let symbol: Symbol = "4,SYS".parse().unwrap();
        assert_eq!(symbol, sys());
        assert_eq!(symbol.to_string(), "4,SYS");
        assert_eq!(symbol.unit(), 10_000);
        assert!("SYS".parse::<Symbol>().is_err());
        assert!("4,sys".parse::<Symbol>().is_err());
    }

    #[test]
    fn test_asset_text_form() {
        let asset: Asset = "10.5000 SYS".parse().unwrap();
        assert_eq!(asset.amount(), 105_000);
        assert_eq!(asset.symbol(), &sys());
        assert_eq!(asset.to_string(), "10.5000 SYS");

        let negative = Asset::new(-25, sys());
        assert_eq!(negative.to_string(), "-0.0025 SYS");
    }

    #[test]
    fn test_asset_arithmetic_checks_symbol() {
        let a = Asset::new(10, sys());
        let b = Asset::new(3, sys());
        assert_eq!(a.checked_sub(&b).unwrap().amount(), 7);
        assert_eq!(a.checked_add(&b).unwrap().amount(), 13);

        let other = Asset::new(1, Symbol::new("EOS", 4).unwrap());
        assert!(a.checked_add(&other).is_err());
        assert!(Asset::new(i64::MAX, sys()).checked_add(&b).is_err());
    }

    #[test]
    fn test_block_timestamp() {
        let t = BlockTimestamp::from_secs(100);
        assert_eq!(t.plus_secs(50).as_secs(), 150);
        assert_eq!(BlockTimestamp::from_secs(u32::MAX).plus_secs(1).as_secs(), u32::MAX);
        assert_eq!(BlockTimestamp::from_secs(0).to_string(), "1970-01-01T00:00:00");
    }
}
