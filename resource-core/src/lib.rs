//! Resource Economy Core
//!
//! Staking, RAM market and delayed refunds for a ledger's consumable
//! resources.
//!
//! # Architecture
//!
//! - **Journaled Tables**: Every transition is all-or-nothing
//! - **Effect Outbox**: Host side effects dispatch only after validation
//! - **Payout Outbox**: One cancellable refund payout per owner
//! - **Single Writer**: One actor task applies and persists transitions

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Token conservation: staking pool == Σ(stakes) + Σ(RAM stake) + Σ(pending refunds)
//! - Non-negativity: no weight, stake or refund component ever drops below zero
//! - Row deletion: a row whose components are all zero does not exist
//! - Ledger time only: block timestamps are the sole clock

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod config;
pub mod tables;
pub mod host;
pub mod ram_market;
pub mod refunds;
pub mod scheduler;
pub mod staking;
pub mod economy;
pub mod storage;
pub mod actor;
pub mod metrics;

mod resources;
mod transaction;

// Re-exports
pub use error::{Error, Result};
pub use types::{AccountName, Asset, BlockTimestamp, Symbol};
pub use tables::{EconomyState, GlobalMarketState, PayoutKey};
pub use host::{Effect, Host, InMemoryHost};
pub use economy::{Outcome, Receipt, ResourceEconomy, Transition, TransitionContext};
pub use actor::{spawn_economy_actor, spawn_economy_actor_with_store, EconomyHandle};
pub use config::{Config, EconomyConfig};
pub use storage::{StateStore, Storage};
