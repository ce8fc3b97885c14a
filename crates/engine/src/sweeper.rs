use crate::error::EngineError;
use api_client::PriceSource;
use chrono::{DateTime, Utc};
use database::Store;
use executor::{ExecutionEngine, ExecutionError, FillOutcome};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Tally of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending orders looked at.
    pub examined: usize,
    pub filled: usize,
    pub not_eligible: usize,
    /// Rejected for insufficient funds or shares; still pending.
    pub insufficient: usize,
    /// Skipped because of a price or storage failure; still pending.
    pub failed: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} filled={} not_eligible={} insufficient={} failed={}",
            self.examined, self.filled, self.not_eligible, self.insufficient, self.failed
        )
    }
}

/// Re-evaluates every resting order on a fixed period.
///
/// This component is designed to run in a concurrent background task next to
/// the HTTP server. Each order goes through the same
/// [`ExecutionEngine::try_fill`] as a submission, so the two paths serialize
/// on the portfolio lock. Nothing that happens to one order stops the sweep.
pub struct Sweeper {
    engine: ExecutionEngine,
    store: Arc<dyn Store>,
    prices: Arc<dyn PriceSource>,
    period: Duration,
}

impl Sweeper {
    pub fn new(engine: ExecutionEngine, prices: Arc<dyn PriceSource>, period: Duration) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
            prices,
            period,
        }
    }

    /// One pass over all pending orders. Only failing to list the pending
    /// orders is an error; per-order problems are counted in the report.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let orders = self.store.pending_orders().await?;
        let mut report = SweepReport {
            examined: orders.len(),
            ..SweepReport::default()
        };
        if orders.is_empty() {
            tracing::debug!("No pending orders.");
            return Ok(report);
        }

        // One quote per stock per sweep; `None` marks a stock whose price failed.
        let mut prices: HashMap<Uuid, Option<Decimal>> = HashMap::new();

        for order in &orders {
            let price = match prices.get(&order.stock_id) {
                Some(cached) => *cached,
                None => {
                    let fetched = self.reference_price(order.stock_id).await;
                    prices.insert(order.stock_id, fetched);
                    fetched
                }
            };
            let Some(price) = price else {
                report.failed += 1;
                continue;
            };

            match self.engine.try_fill(order, price, now).await {
                Ok(FillOutcome::Filled(_)) => report.filled += 1,
                Ok(FillOutcome::NotEligible(_)) => report.not_eligible += 1,
                Err(
                    e @ (ExecutionError::InsufficientFunds { .. }
                    | ExecutionError::InsufficientShares { .. }),
                ) => {
                    tracing::debug!(order_id = %order.id, reason = %e, "Order left pending.");
                    report.insufficient += 1;
                }
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "Order could not be processed.");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            filled = report.filled,
            not_eligible = report.not_eligible,
            insufficient = report.insufficient,
            failed = report.failed,
            "Sweep complete."
        );
        Ok(report)
    }

    async fn reference_price(&self, stock_id: Uuid) -> Option<Decimal> {
        let stock = match self.store.get_stock(stock_id).await {
            Ok(Some(stock)) => stock,
            Ok(None) => {
                tracing::warn!(%stock_id, "Pending order references a missing stock.");
                return None;
            }
            Err(e) => {
                tracing::warn!(%stock_id, error = %e, "Failed to load stock.");
                return None;
            }
        };
        match self.prices.get_price(&stock.ticker_symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(ticker = %stock.ticker_symbol, error = %e, "Price unavailable; skipping its orders.");
                None
            }
        }
    }

    /// Sweeps on every tick until `shutdown` flips to `true` or its sender is
    /// dropped. The first sweep happens immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(period_secs = self.period.as_secs(), "Starting order sweeper.");
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "Sweep failed.");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Order sweeper stopped.");
    }
}
