//! Actor-based concurrency for the resource economy
//!
//! Single-writer pattern using Tokio actors: one task owns the economy and
//! its store, and every transition is applied and persisted in mailbox
//! order. Callers hold a cloneable [`EconomyHandle`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               EconomyHandle (Clone)                   │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              EconomyActor (Single Task)               │
//! │   ResourceEconomy::apply()  →  StateStore::persist() │
//! │        (journaled tables)      (one WriteBatch)       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Persist failures
//!
//! A transition that committed but could not be written is answered with
//! [`Error::PersistFailed`]: it already moved tokens and must not be
//! resubmitted. Until a later write succeeds the actor applies nothing new;
//! each `Apply` or `FireDue` first retries the pending write and answers
//! [`Error::Storage`] (nothing applied) while it keeps failing.

use crate::economy::{EconomySummary, Receipt, ResourceEconomy, Transition, TransitionContext};
use crate::host::Host;
use crate::storage::StateStore;
use crate::types::{AccountName, BlockTimestamp};
use crate::{Error, Result, Storage};
use tokio::sync::{mpsc, oneshot};

/// Payouts fired by one `FireDue`, with each claim's result
pub type FiredPayouts = Vec<(AccountName, Result<Receipt>)>;

/// Message sent to the economy actor
pub enum EconomyMessage<H> {
    /// Apply one transition
    Apply {
        /// Signer and block time
        ctx: TransitionContext,
        /// Requested transition
        transition: Transition,
        /// Reply
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Fire payouts due at `now`
    FireDue {
        /// Block time
        now: BlockTimestamp,
        /// Reply: one entry per fired payout
        response: oneshot::Sender<Result<FiredPayouts>>,
    },

    /// Summarize committed state
    Snapshot {
        /// Reply
        response: oneshot::Sender<Result<EconomySummary>>,
    },

    /// Stop the actor and hand the economy back
    Shutdown {
        /// Reply
        response: oneshot::Sender<ResourceEconomy<H>>,
    },
}

/// Actor that owns the economy
pub struct EconomyActor<H> {
    economy: ResourceEconomy<H>,
    store: Option<Box<dyn StateStore + Send>>,
    mailbox: mpsc::Receiver<EconomyMessage<H>>,
}

impl<H: Host> EconomyActor<H> {
    /// Create new actor; `store` is `None` for in-memory operation
    pub fn new(
        economy: ResourceEconomy<H>,
        store: Option<Box<dyn StateStore + Send>>,
        mailbox: mpsc::Receiver<EconomyMessage<H>>,
    ) -> Self {
        Self {
            economy,
            store,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                EconomyMessage::Apply {
                    ctx,
                    transition,
                    response,
                } => {
                    let _ = response.send(self.handle_apply(&ctx, &transition));
                }

                EconomyMessage::FireDue { now, response } => {
                    let _ = response.send(self.handle_fire_due(now));
                }

                EconomyMessage::Snapshot { response } => {
                    let _ = response.send(self.economy.summary());
                }

                EconomyMessage::Shutdown { response } => {
                    if let Err(e) = self.persist() {
                        tracing::error!("Error persisting on shutdown: {}", e);
                    }
                    // Release the database lock before the caller regains control
                    if let Some(store) = self.store.take() {
                        if let Err(e) = store.close() {
                            tracing::error!("Error closing storage: {}", e);
                        }
                    }
                    let _ = response.send(self.economy);
                    return;
                }
            }
        }

        // Mailbox closed
        if let Err(e) = self.persist() {
            tracing::error!("Error persisting on close: {}", e);
        }
    }

    fn handle_apply(&mut self, ctx: &TransitionContext, transition: &Transition) -> Result<Receipt> {
        self.flush_pending()?;
        let receipt = self.economy.apply(ctx, transition)?;
        self.persist_committed(transition.action())?;
        Ok(receipt)
    }

    fn handle_fire_due(&mut self, now: BlockTimestamp) -> Result<FiredPayouts> {
        self.flush_pending()?;
        let fired = self.economy.fire_due_payouts(now);
        if !fired.is_empty() {
            self.persist_committed("fire_due")?;
        }
        Ok(fired)
    }

    /// Retry a write left over from an earlier failure; nothing is applied on error
    fn flush_pending(&mut self) -> Result<()> {
        self.persist().map_err(|e| {
            tracing::warn!(error = %e, "Earlier commit still not durable; refusing new work");
            Error::Storage(format!("earlier commit not yet persisted: {}", e))
        })
    }

    fn persist_committed(&mut self, action: &str) -> Result<()> {
        self.persist().map_err(|e| {
            tracing::error!(action, error = %e, "Committed transition not persisted");
            Error::PersistFailed(format!("{} committed but not persisted: {}", action, e))
        })
    }

    fn persist(&mut self) -> Result<()> {
        if let Some(store) = &self.store {
            store.persist(self.economy.state_mut())?;
        }
        Ok(())
    }
}

/// Handle for sending messages to the actor
pub struct EconomyHandle<H> {
    sender: mpsc::Sender<EconomyMessage<H>>,
}

impl<H> Clone for EconomyHandle<H> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<H: Host> EconomyHandle<H> {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<EconomyMessage<H>>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EconomyMessage<H>,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Apply a transition
    pub async fn apply(&self, ctx: TransitionContext, transition: Transition) -> Result<Receipt> {
        self.request(|response| EconomyMessage::Apply {
            ctx,
            transition,
            response,
        })
        .await?
    }

    /// Fire payouts due at `now`
    pub async fn fire_due(&self, now: BlockTimestamp) -> Result<FiredPayouts> {
        self.request(|response| EconomyMessage::FireDue { now, response })
            .await?
    }

    /// Summarize committed state
    pub async fn snapshot(&self) -> Result<EconomySummary> {
        self.request(|response| EconomyMessage::Snapshot { response })
            .await?
    }

    /// Shutdown actor, returning the economy
    pub async fn shutdown(&self) -> Result<ResourceEconomy<H>> {
        self.request(|response| EconomyMessage::Shutdown { response })
            .await
    }
}

/// Spawn the economy actor over RocksDB storage (or none)
pub fn spawn_economy_actor<H>(
    economy: ResourceEconomy<H>,
    storage: Option<Storage>,
    mailbox_capacity: usize,
) -> EconomyHandle<H>
where
    H: Host + Send + 'static,
{
    let store = storage.map(|s| Box::new(s) as Box<dyn StateStore + Send>);
    spawn_economy_actor_with_store(economy, store, mailbox_capacity)
}

/// Spawn the economy actor over any [`StateStore`]
pub fn spawn_economy_actor_with_store<H>(
    economy: ResourceEconomy<H>,
    store: Option<Box<dyn StateStore + Send>>,
    mailbox_capacity: usize,
) -> EconomyHandle<H>
where
    H: Host + Send + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = EconomyActor::new(economy, store, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    EconomyHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomyConfig;
    use crate::host::InMemoryHost;
    use crate::tables::EconomyState;
    use crate::types::Asset;
    use crate::Config;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Store whose writes fail while `failing` is set
    struct FlakyStore {
        failing: Arc<AtomicBool>,
        writes: Arc<AtomicUsize>,
    }

    impl StateStore for FlakyStore {
        fn persist(&self, state: &mut EconomyState) -> Result<usize> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            state.clear_dirty();
            Ok(1)
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn name(s: &str) -> AccountName {
        AccountName::new(s).unwrap()
    }

    fn economy(config: &EconomyConfig) -> ResourceEconomy<InMemoryHost> {
        let mut host = InMemoryHost::new(config.core_symbol.clone());
        host.issue(&name("alice"), 1_000_0000).unwrap();
        ResourceEconomy::new(config.clone(), host).unwrap()
    }

    fn stake(config: &EconomyConfig, amount: i64) -> Transition {
        Transition::Delegate {
            from: name("alice"),
            receiver: name("alice"),
            net: Asset::new(amount, config.core_symbol.clone()),
            cpu: Asset::new(amount, config.core_symbol.clone()),
            transfer: false,
        }
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let config = EconomyConfig::default();
        let handle = spawn_economy_actor(economy(&config), None, 16);

        let economy = handle.shutdown().await.unwrap();
        assert!(economy.state().resources.is_empty());
        assert!(handle.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_actor_apply_and_reject() {
        let config = EconomyConfig::default();
        let handle = spawn_economy_actor(economy(&config), None, 16);
        let ctx = TransitionContext::new(name("alice"), BlockTimestamp::from_secs(10));

        handle.apply(ctx.clone(), stake(&config, 100)).await.unwrap();
        let err = handle.apply(ctx, stake(&config, 1_000_0000)).await.unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));

        let summary = handle.snapshot().await.unwrap();
        assert_eq!(summary.accounts, 1);
        assert_eq!(summary.delegations, 1);

        let economy = handle.shutdown().await.unwrap();
        assert_eq!(economy.host().balance(&config.stake_account), 200);
    }

    #[tokio::test]
    async fn test_actor_persists_and_fires_payouts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let delay = config.economy.refund_delay_secs;

        let storage = Storage::open(&config).unwrap();
        let handle = spawn_economy_actor(economy(&config.economy), Some(storage), 16);

        let at = |secs| TransitionContext::new(name("alice"), BlockTimestamp::from_secs(secs));
        handle.apply(at(10), stake(&config.economy, 100)).await.unwrap();
        handle
            .apply(
                at(20),
                Transition::Undelegate {
                    from: name("alice"),
                    receiver: name("alice"),
                    net: Asset::new(100, config.economy.core_symbol.clone()),
                    cpu: Asset::new(0, config.economy.core_symbol.clone()),
                },
            )
            .await
            .unwrap();

        let fired = handle.fire_due(BlockTimestamp::from_secs(20 + delay)).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert!(fired[0].1.is_ok());

        let economy = handle.shutdown().await.unwrap();
        let (state, _) = economy.into_parts();

        let storage = Storage::open(&config).unwrap();
        let reloaded = storage.load_state(config.economy.max_ram_size).unwrap();
        assert_eq!(reloaded.digest().unwrap(), state.digest().unwrap());
        assert!(reloaded.refunds.is_empty());
        assert!(reloaded.payouts.is_empty());
    }

    #[tokio::test]
    async fn test_unpersisted_commit_is_fatal_and_blocks_new_work() {
        let config = EconomyConfig::default();
        let failing = Arc::new(AtomicBool::new(true));
        let writes = Arc::new(AtomicUsize::new(0));
        let store = FlakyStore {
            failing: failing.clone(),
            writes: writes.clone(),
        };
        let handle = spawn_economy_actor_with_store(economy(&config), Some(Box::new(store)), 16);
        let ctx = TransitionContext::new(name("alice"), BlockTimestamp::from_secs(10));

        // Committed and charged, but not durable
        let err = handle.apply(ctx.clone(), stake(&config, 100)).await.unwrap_err();
        assert!(matches!(err, Error::PersistFailed(_)));
        assert!(err.is_fatal());

        // Nothing new is applied while the write keeps failing
        let err = handle.apply(ctx.clone(), stake(&config, 100)).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!err.is_fatal());
        assert!(matches!(
            handle.fire_due(BlockTimestamp::from_secs(11)).await,
            Err(Error::Storage(_))
        ));

        // The pending write is flushed before the next transition
        failing.store(false, Ordering::SeqCst);
        handle.apply(ctx, stake(&config, 100)).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);

        let economy = handle.shutdown().await.unwrap();
        // Two stakes of 200; the refused one never charged
        assert_eq!(economy.host().balance(&config.stake_account), 400);
        let row = economy
            .state()
            .delegations
            .get(&(name("alice"), name("alice")))
            .unwrap();
        assert_eq!(row.net_weight.amount(), 200);
    }
}
