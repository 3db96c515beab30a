//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the resource economy.
//!
//! # Metrics
//!
//! - `resource_transitions_applied_total{action}` - Committed transitions
//! - `resource_transitions_rejected_total{kind}` - Aborted transitions by error kind
//! - `resource_refunds_paid_total` - Raw token units released by refund claims
//! - `resource_ram_bytes_reserved` - Reserved RAM bytes
//! - `resource_ram_stake` - Tokens staked for RAM (raw units)
//! - `resource_pending_refunds` - Live refund requests

use crate::tables::EconomyState;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transitions by action
    pub transitions_applied: IntCounterVec,

    /// Rejected transitions by error kind
    pub transitions_rejected: IntCounterVec,

    /// Tokens released by claims
    pub refunds_paid: IntCounter,

    /// Reserved RAM
    pub ram_bytes_reserved: IntGauge,

    /// RAM stake
    pub ram_stake: IntGauge,

    /// Live refund rows
    pub pending_refunds: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transitions_applied = IntCounterVec::new(
            Opts::new(
                "resource_transitions_applied_total",
                "Total number of committed transitions",
            ),
            &["action"],
        )?;
        registry.register(Box::new(transitions_applied.clone()))?;

        let transitions_rejected = IntCounterVec::new(
            Opts::new(
                "resource_transitions_rejected_total",
                "Total number of rejected transitions",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(transitions_rejected.clone()))?;

        let refunds_paid = IntCounter::new(
            "resource_refunds_paid_total",
            "Raw token units released by refund claims",
        )?;
        registry.register(Box::new(refunds_paid.clone()))?;

        let ram_bytes_reserved =
            IntGauge::new("resource_ram_bytes_reserved", "Reserved RAM bytes")?;
        registry.register(Box::new(ram_bytes_reserved.clone()))?;

        let ram_stake = IntGauge::new("resource_ram_stake", "Tokens staked for RAM")?;
        registry.register(Box::new(ram_stake.clone()))?;

        let pending_refunds =
            IntGauge::new("resource_pending_refunds", "Live refund requests")?;
        registry.register(Box::new(pending_refunds.clone()))?;

        Ok(Self {
            transitions_applied,
            transitions_rejected,
            refunds_paid,
            ram_bytes_reserved,
            ram_stake,
            pending_refunds,
            registry,
        })
    }

    /// Record a committed transition
    pub fn record_applied(&self, action: &str) {
        self.transitions_applied.with_label_values(&[action]).inc();
    }

    /// Record a rejected transition
    pub fn record_rejected(&self, kind: &str) {
        self.transitions_rejected.with_label_values(&[kind]).inc();
    }

    /// Record a refund release
    pub fn record_refund_paid(&self, amount: i64) {
        if let Ok(amount) = u64::try_from(amount) {
            self.refunds_paid.inc_by(amount);
        }
    }

    /// Refresh gauges from committed state
    pub fn observe_state(&self, state: &EconomyState) {
        let market = state.market();
        self.ram_bytes_reserved
            .set(i64::try_from(market.total_ram_bytes_reserved).unwrap_or(i64::MAX));
        self.ram_stake.set(market.total_ram_stake);
        self.pending_refunds
            .set(i64::try_from(state.refunds.len()).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.refunds_paid.get(), 0);
        assert_eq!(metrics.pending_refunds.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors in one process must not collide
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_applied("delegate");
        assert_eq!(a.transitions_applied.with_label_values(&["delegate"]).get(), 1);
        assert_eq!(b.transitions_applied.with_label_values(&["delegate"]).get(), 0);
    }

    #[test]
    fn test_observe_state() {
        let metrics = Metrics::new().unwrap();
        let mut state = EconomyState::new(1_000);
        state.market_mut().total_ram_bytes_reserved = 400;
        state.market_mut().total_ram_stake = 25;

        metrics.observe_state(&state);
        assert_eq!(metrics.ram_bytes_reserved.get(), 400);
        assert_eq!(metrics.ram_stake.get(), 25);
    }

    #[test]
    fn test_record_rejected_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejected("too_early");
        metrics.record_rejected("too_early");
        assert_eq!(metrics.transitions_rejected.with_label_values(&["too_early"]).get(), 2);
        assert!(!metrics.registry().gather().is_empty());
    }
}
