//! Scenario replay binary
//!
//! Replays a JSON scenario (genesis balances plus signed, timestamped
//! transitions) through the economy actor and prints the final summary.
//!
//! ```text
//! resource-replay <scenario.json> [--config <config.toml>]
//! ```
//!
//! Token balances live in an in-process host seeded from the scenario's
//! genesis, so a persisting replay requires an empty `data_dir`.

use anyhow::{bail, Context};
use resource_core::{
    spawn_economy_actor, AccountName, Asset, BlockTimestamp, Config, EconomyState, InMemoryHost,
    ResourceEconomy, Storage, Transition, TransitionContext,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct Scenario {
    genesis: Genesis,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Genesis {
    balances: BTreeMap<AccountName, Asset>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Step {
    Apply {
        signer: AccountName,
        time: u32,
        transition: Transition,
    },
    FireDue {
        time: u32,
    },
}

#[derive(Debug, Serialize)]
struct Report {
    applied: usize,
    rejected: usize,
    payouts_fired: usize,
    stake_pool_balance: Asset,
    summary: resource_core::economy::EconomySummary,
}

struct Args {
    scenario: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut scenario = None;
    let mut config = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config needs a path")?));
            }
            _ if scenario.is_none() => scenario = Some(PathBuf::from(arg)),
            other => bail!("unexpected argument {}", other),
        }
    }

    Ok(Args {
        scenario: scenario.context("usage: resource-replay <scenario.json> [--config <config.toml>]")?,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("RESOURCE_LOG_JSON").is_ok() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        scenario = %args.scenario.display(),
        "Starting replay"
    );

    let text = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("reading {}", args.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&text).context("parsing scenario")?;

    let economy_config = config.economy.clone();
    let mut host = InMemoryHost::new(economy_config.core_symbol.clone());
    for (account, balance) in &scenario.genesis.balances {
        if balance.symbol() != &economy_config.core_symbol {
            bail!("genesis balance {} for {} is not in the core symbol", balance, account);
        }
        host.issue(account, balance.amount())?;
    }

    let (storage, state) = if config.runtime.persist {
        let storage = Storage::open(&config)?;
        // Genesis balances back the stakes of this run only
        if !storage.is_fresh()? {
            bail!(
                "{} already holds economy state; replay needs an empty data_dir",
                config.data_dir.display()
            );
        }
        let state = storage.load_state(economy_config.max_ram_size)?;
        (Some(storage), state)
    } else {
        (None, EconomyState::new(economy_config.max_ram_size))
    };

    let economy = ResourceEconomy::with_state(economy_config.clone(), host, state)?;
    let handle = spawn_economy_actor(economy, storage, config.runtime.mailbox_capacity);

    let mut applied = 0;
    let mut rejected = 0;
    let mut payouts_fired = 0;

    for (index, step) in scenario.steps.into_iter().enumerate() {
        match step {
            Step::Apply {
                signer,
                time,
                transition,
            } => {
                let action = transition.action();
                let ctx = TransitionContext::new(signer, BlockTimestamp::from_secs(time));
                match handle.apply(ctx, transition).await {
                    Ok(_) => applied += 1,
                    Err(e) if e.is_fatal() => {
                        return Err(e).with_context(|| format!("step {} ({}) failed fatally", index, action));
                    }
                    Err(e) => {
                        rejected += 1;
                        tracing::warn!(step = index, action, error = %e, "Step rejected");
                    }
                }
            }
            Step::FireDue { time } => {
                for (owner, result) in handle.fire_due(BlockTimestamp::from_secs(time)).await? {
                    match result {
                        Ok(_) => payouts_fired += 1,
                        Err(e) => tracing::warn!(step = index, %owner, error = %e, "Payout failed"),
                    }
                }
            }
        }
    }

    let summary = handle.snapshot().await?;
    let economy = handle.shutdown().await?;
    let pool = &economy.config().stake_account;

    let report = Report {
        applied,
        rejected,
        payouts_fired,
        stake_pool_balance: Asset::new(
            economy.host().balance(pool),
            economy.config().core_symbol.clone(),
        ),
        summary,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("Replay finished");
    Ok(())
}
