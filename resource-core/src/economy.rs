//! Stake mutation orchestrator
//!
//! [`ResourceEconomy`] owns the state tables and the host, and applies one
//! [`Transition`] at a time. Each transition runs against journaled tables;
//! its effects reach the host only after it has fully validated, and any
//! failure (including a rejected token transfer) rolls every table back.
//!
//! # Example
//!
//! ```no_run
//! use resource_core::{
//!     AccountName, Asset, BlockTimestamp, EconomyConfig, InMemoryHost, ResourceEconomy,
//!     Transition, TransitionContext,
//! };
//!
//! fn main() -> resource_core::Result<()> {
//!     let config = EconomyConfig::default();
//!     let mut host = InMemoryHost::new(config.core_symbol.clone());
//!     let alice = AccountName::new("alice")?;
//!     host.issue(&alice, 1_000_0000)?;
//!
//!     let mut economy = ResourceEconomy::new(config.clone(), host)?;
//!     let ctx = TransitionContext::new(alice.clone(), BlockTimestamp::from_secs(1_000));
//!     economy.apply(
//!         &ctx,
//!         &Transition::Delegate {
//!             from: alice.clone(),
//!             receiver: alice,
//!             net: Asset::new(10_0000, config.core_symbol.clone()),
//!             cpu: Asset::new(10_0000, config.core_symbol),
//!             transfer: false,
//!         },
//!     )?;
//!     Ok(())
//! }
//! ```

use crate::config::EconomyConfig;
use crate::host::{dispatch, Effect, Host};
use crate::metrics::Metrics;
use crate::ram_market;
use crate::scheduler::due_payouts;
use crate::tables::{EconomyState, GlobalMarketState, UserResources};
use crate::transaction::Transaction;
use crate::types::{AccountName, Asset, BlockTimestamp};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Upper bound for RAM capacity (1 PiB, exclusive)
pub const MAX_RAM_CAPACITY: u64 = 1024 * 1024 * 1024 * 1024 * 1024;

/// A state transition request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Transition {
    /// Stake bandwidth from `from` toward `receiver`
    Delegate {
        /// Staker and payer
        from: AccountName,
        /// Account receiving the bandwidth
        receiver: AccountName,
        /// Net stake
        net: Asset,
        /// CPU stake
        cpu: Asset,
        /// Hand ownership of the stake to `receiver`
        #[serde(default)]
        transfer: bool,
    },
    /// Release bandwidth `from` staked toward `receiver`
    Undelegate {
        /// Stake owner
        from: AccountName,
        /// Account holding the bandwidth
        receiver: AccountName,
        /// Net to release
        net: Asset,
        /// CPU to release
        cpu: Asset,
    },
    /// Spend tokens on RAM
    BuyRam {
        /// Payer
        payer: AccountName,
        /// Account receiving the RAM
        receiver: AccountName,
        /// Tokens to spend
        quantity: Asset,
    },
    /// Buy an exact number of RAM bytes
    BuyRamBytes {
        /// Payer
        payer: AccountName,
        /// Account receiving the RAM
        receiver: AccountName,
        /// Bytes to buy
        bytes: u32,
    },
    /// Sell RAM back at average cost
    SellRam {
        /// Seller
        account: AccountName,
        /// Bytes to sell
        bytes: i64,
    },
    /// Release a matured refund
    ClaimRefund {
        /// Refund owner
        owner: AccountName,
    },
    /// Register a new account with empty resources
    NewAccount {
        /// Creating account
        creator: AccountName,
        /// Account to create
        account: AccountName,
    },
    /// Raise RAM capacity
    SetRam {
        /// New capacity in bytes
        max_ram_size: u64,
    },
    /// Record a voter's proxy or producer choice
    SetVoterPreferences {
        /// Voter
        voter: AccountName,
        /// Proxy, if voting by proxy
        #[serde(default)]
        proxy: Option<AccountName>,
        /// Producers voted for
        #[serde(default)]
        producers: Vec<AccountName>,
    },
}

impl Transition {
    /// Action label for logs and metrics
    pub fn action(&self) -> &'static str {
        match self {
            Transition::Delegate { .. } => "delegate",
            Transition::Undelegate { .. } => "undelegate",
            Transition::BuyRam { .. } => "buy_ram",
            Transition::BuyRamBytes { .. } => "buy_ram_bytes",
            Transition::SellRam { .. } => "sell_ram",
            Transition::ClaimRefund { .. } => "claim_refund",
            Transition::NewAccount { .. } => "new_account",
            Transition::SetRam { .. } => "set_ram",
            Transition::SetVoterPreferences { .. } => "set_voter_preferences",
        }
    }
}

/// Who signed a transition, and the block time it executes at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    /// Authorizing account
    pub signer: AccountName,
    /// Block time
    pub now: BlockTimestamp,
}

impl TransitionContext {
    /// Context for `signer` at `now`
    pub fn new(signer: AccountName, now: BlockTimestamp) -> Self {
        Self { signer, now }
    }
}

/// Result of a committed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Bandwidth staked; `collected` is what the payer transferred
    Staked {
        /// Tokens moved into the staking pool
        collected: Asset,
    },
    /// Bandwidth released into the refund queue
    Unstaked,
    /// RAM bought
    RamBought {
        /// Bytes credited
        bytes: i64,
        /// Tokens charged
        cost: Asset,
    },
    /// RAM sold
    RamSold {
        /// Bytes released
        bytes: i64,
        /// Tokens added to the pending refund
        proceeds: Asset,
    },
    /// Refund paid out
    Refunded {
        /// Tokens released
        amount: Asset,
    },
    /// Account registered
    AccountCreated,
    /// RAM capacity raised
    RamResized {
        /// New capacity
        max_ram_size: u64,
    },
    /// Voter preferences stored
    VotesRecorded,
}

/// Outcome plus every effect dispatched to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// What happened
    pub outcome: Outcome,
    /// Effects, in emission order
    pub effects: Vec<Effect>,
}

/// Compact view of the committed state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomySummary {
    /// RAM market counters
    pub market: GlobalMarketState,
    /// Live resource rows
    pub accounts: usize,
    /// Live delegation rows
    pub delegations: usize,
    /// Live refund rows
    pub pending_refunds: usize,
    /// Scheduled payouts
    pub scheduled_payouts: usize,
    /// Hex state digest
    pub digest: String,
}

/// The resource economy and its host
pub struct ResourceEconomy<H> {
    state: EconomyState,
    host: H,
    config: EconomyConfig,
    metrics: Metrics,
}

impl<H> std::fmt::Debug for ResourceEconomy<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEconomy")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H: Host> ResourceEconomy<H> {
    /// Fresh economy with empty tables
    pub fn new(config: EconomyConfig, host: H) -> Result<Self> {
        let state = EconomyState::new(config.max_ram_size);
        Self::with_state(config, host, state)
    }

    /// Economy over previously loaded state
    pub fn with_state(config: EconomyConfig, host: H, state: EconomyState) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        metrics.observe_state(&state);
        Ok(Self {
            state,
            host,
            config,
            metrics,
        })
    }

    /// Committed state
    pub fn state(&self) -> &EconomyState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut EconomyState {
        &mut self.state
    }

    /// Host collaborators
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host, for setup outside of transitions
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Economy parameters
    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Split into state and host
    pub fn into_parts(self) -> (EconomyState, H) {
        (self.state, self.host)
    }

    /// Apply one transition atomically
    pub fn apply(&mut self, ctx: &TransitionContext, transition: &Transition) -> Result<Receipt> {
        let action = transition.action();
        self.state.begin();

        match self.run(ctx, transition) {
            Ok(receipt) => {
                self.state.commit();
                self.metrics.record_applied(action);
                if let Outcome::Refunded { amount } = &receipt.outcome {
                    self.metrics.record_refund_paid(amount.amount());
                }
                self.metrics.observe_state(&self.state);

                tracing::info!(
                    action,
                    signer = %ctx.signer,
                    now = %ctx.now,
                    effects = receipt.effects.len(),
                    "Transition applied"
                );
                Ok(receipt)
            }
            Err(err) => {
                self.state.rollback();
                self.metrics.record_rejected(err.kind());

                if err.is_fatal() {
                    tracing::error!(action, signer = %ctx.signer, error = %err, "Fatal accounting error");
                } else {
                    tracing::warn!(action, signer = %ctx.signer, error = %err, "Transition rejected");
                }
                Err(err)
            }
        }
    }

    fn run(&mut self, ctx: &TransitionContext, transition: &Transition) -> Result<Receipt> {
        let (outcome, effects) = {
            let mut tx = Transaction::new(
                &mut self.state,
                &self.config,
                &self.host,
                &ctx.signer,
                ctx.now,
            );
            let outcome = execute(&mut tx, transition)?;
            (outcome, tx.into_effects())
        };

        dispatch(&mut self.host, &effects)?;
        Ok(Receipt { outcome, effects })
    }

    /// Fire every payout due at `now`, oldest first
    ///
    /// Each fires as a `claim_refund` signed by its owner. An entry whose
    /// claim fails is dropped so it cannot fire twice.
    pub fn fire_due_payouts(&mut self, now: BlockTimestamp) -> Vec<(AccountName, Result<Receipt>)> {
        let mut fired = Vec::new();

        for payout in due_payouts(&self.state, now) {
            let ctx = TransitionContext::new(payout.owner.clone(), now);
            let claim = Transition::ClaimRefund {
                owner: payout.owner.clone(),
            };

            let result = self.apply(&ctx, &claim);
            if let Err(err) = &result {
                let still_armed = self
                    .state
                    .payouts
                    .get(&payout.owner)
                    .map(|p| p.key == payout.key)
                    .unwrap_or(false);
                if still_armed {
                    self.state.payouts.erase(&payout.owner);
                    self.host.cancel(&payout.owner);
                }
                tracing::warn!(owner = %payout.owner, key = payout.key.0, error = %err, "Payout dropped");
            }
            fired.push((payout.owner, result));
        }

        fired
    }

    /// Summary of the committed state
    pub fn summary(&self) -> Result<EconomySummary> {
        let digest = blake3::Hash::from(self.state.digest()?);
        Ok(EconomySummary {
            market: self.state.market().clone(),
            accounts: self.state.resources.len(),
            delegations: self.state.delegations.len(),
            pending_refunds: self.state.refunds.len(),
            scheduled_payouts: self.state.payouts.len(),
            digest: digest.to_hex().to_string(),
        })
    }
}

fn execute(tx: &mut Transaction<'_>, transition: &Transition) -> Result<Outcome> {
    match transition {
        Transition::Delegate {
            from,
            receiver,
            net,
            cpu,
            transfer,
        } => {
            let collected = tx.delegate(from, receiver, net, cpu, *transfer)?;
            Ok(Outcome::Staked { collected })
        }
        Transition::Undelegate {
            from,
            receiver,
            net,
            cpu,
        } => {
            tx.undelegate(from, receiver, net, cpu)?;
            Ok(Outcome::Unstaked)
        }
        Transition::BuyRam {
            payer,
            receiver,
            quantity,
        } => {
            let bytes = tx.buy_ram(payer, receiver, quantity)?;
            Ok(Outcome::RamBought {
                bytes,
                cost: quantity.clone(),
            })
        }
        Transition::BuyRamBytes {
            payer,
            receiver,
            bytes,
        } => {
            let cost = tx.buy_ram_bytes(payer, receiver, *bytes)?;
            Ok(Outcome::RamBought {
                bytes: i64::from(*bytes),
                cost,
            })
        }
        Transition::SellRam { account, bytes } => {
            let proceeds = tx.sell_ram(account, *bytes)?;
            Ok(Outcome::RamSold {
                bytes: *bytes,
                proceeds,
            })
        }
        Transition::ClaimRefund { owner } => {
            let amount = tx.claim_refund(owner)?;
            Ok(Outcome::Refunded { amount })
        }
        Transition::NewAccount { creator, account } => {
            tx.new_account(creator, account)?;
            Ok(Outcome::AccountCreated)
        }
        Transition::SetRam { max_ram_size } => {
            tx.set_ram(*max_ram_size)?;
            Ok(Outcome::RamResized {
                max_ram_size: *max_ram_size,
            })
        }
        Transition::SetVoterPreferences {
            voter,
            proxy,
            producers,
        } => {
            tx.set_voter_preferences(voter, proxy.clone(), producers.clone())?;
            Ok(Outcome::VotesRecorded)
        }
    }
}

impl Transaction<'_> {
    /// Register `account` with a zero resource row and zero limits
    fn new_account(&mut self, creator: &AccountName, account: &AccountName) -> Result<()> {
        self.require_auth(&self.config.system_account)?;
        if self.state.resources.contains(account) {
            return Err(Error::AlreadyExists(format!("account {} already exists", account)));
        }

        self.state.resources.put(
            account.clone(),
            UserResources::empty(account.clone(), &self.config.core_symbol),
        );
        self.emit(Effect::SetLimits {
            account: account.clone(),
            ram_bytes: 0,
            net_weight: 0,
            cpu_weight: 0,
        });

        tracing::info!(creator = %creator, account = %account, "Account created");
        Ok(())
    }

    /// Raise RAM capacity to `max_ram_size`
    fn set_ram(&mut self, max_ram_size: u64) -> Result<()> {
        self.require_auth(&self.config.system_account)?;

        let market = self.state.market();
        if max_ram_size >= MAX_RAM_CAPACITY {
            return Err(Error::InvalidAmount("ram size is unrealistic".to_string()));
        }
        if max_ram_size <= market.total_ram_bytes_reserved {
            return Err(Error::InvalidAmount(
                "attempt to set max below reserved".to_string(),
            ));
        }
        if max_ram_size <= market.max_ram_size {
            return Err(Error::InvalidAmount("ram may only be increased".to_string()));
        }

        let market = self.state.market_mut();
        let previous = market.max_ram_size;
        market.max_ram_size = max_ram_size;
        ram_market::check_invariants(market)?;

        tracing::info!(previous, max_ram_size, "RAM capacity raised");
        Ok(())
    }
}
