//! Error types for the resource economy

use thiserror::Error;

/// Result type for resource economy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Resource economy errors
///
/// Every variant aborts the transition that raised it. Validation failures
/// are the caller's to correct and resubmit; [`Error::InvariantViolation`]
/// means the accounting itself is broken and must never be retried.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive or malformed quantity
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unstaking more than is delegated
    #[error("Insufficient stake: {0}")]
    InsufficientStake(String),

    /// Selling more RAM than held, or buying past capacity
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// Conversion rounds to a useless value
    #[error("Amount too small: {0}")]
    AmountTooSmall(String),

    /// Net and cpu deltas of opposite sign
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),

    /// Voting stake would go negative
    #[error("Negative voting stake: {0}")]
    NegativeVotingStake(String),

    /// Missing row (refund request, resource row)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already present
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Refund claimed before the delay elapsed
    #[error("Too early: {0}")]
    TooEarly(String),

    /// Signer is not the required principal
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token ledger rejected a transfer
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Internal accounting invariant breached
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB); nothing was applied
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transition committed and dispatched but not yet durable; never resubmit
    #[error("Persist failed after commit: {0}")]
    PersistFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must not be answered by resubmitting
    ///
    /// Broken accounting, or a transition that already took effect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation(_) | Error::PersistFailed(_))
    }

    /// Short machine-readable kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InsufficientStake(_) => "insufficient_stake",
            Error::InsufficientQuota(_) => "insufficient_quota",
            Error::AmountTooSmall(_) => "amount_too_small",
            Error::InvalidDelta(_) => "invalid_delta",
            Error::NegativeVotingStake(_) => "negative_voting_stake",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::TooEarly(_) => "too_early",
            Error::Unauthorized(_) => "unauthorized",
            Error::TransferFailed(_) => "transfer_failed",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Storage(_) => "storage",
            Error::PersistFailed(_) => "persist_failed",
            Error::Serialization(_) => "serialization",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::InvariantViolation("reserve".into()).is_fatal());
        assert!(!Error::TooEarly("refund".into()).is_fatal());
        assert!(!Error::InsufficientStake("net".into()).is_fatal());
        assert!(Error::PersistFailed("batch".into()).is_fatal());
        assert!(!Error::Storage("open".into()).is_fatal());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::InvalidDelta("x".into()).kind(), "invalid_delta");
        assert_eq!(Error::from("boom").kind(), "other");
    }
}
