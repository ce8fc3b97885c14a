use crate::error::EngineError;
use api_client::error::ApiError;
use api_client::PriceSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::StockQuery;
use database::Store;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// A `PriceSource` that answers with the `market_price` last stored for the
/// ticker. This is the reference price the sweeper fills against.
#[derive(Clone)]
pub struct StoredPrices {
    store: Arc<dyn Store>,
}

impl StoredPrices {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PriceSource for StoredPrices {
    async fn get_price(&self, ticker: &str) -> Result<Decimal, ApiError> {
        let query = StockQuery {
            ticker: Some(ticker.to_string()),
            company: None,
        };
        let stocks = self.store.list_stocks(&query).await.map_err(|e| {
            tracing::warn!(ticker, error = %e, "Could not read stored price.");
            ApiError::Unavailable(ticker.to_string())
        })?;
        stocks
            .into_iter()
            .find(|s| s.ticker_symbol.eq_ignore_ascii_case(ticker))
            .map(|s| s.market_price)
            .ok_or_else(|| ApiError::Unavailable(ticker.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub updated: usize,
    pub failed: usize,
}

/// Periodically copies quotes from a `PriceSource` into the stock records.
pub struct PriceRefresher {
    store: Arc<dyn Store>,
    source: Arc<dyn PriceSource>,
    period: Duration,
}

impl PriceRefresher {
    pub fn new(store: Arc<dyn Store>, source: Arc<dyn PriceSource>, period: Duration) -> Self {
        Self {
            store,
            source,
            period,
        }
    }

    /// Refreshes every stock once. A failing ticker is logged and skipped.
    pub async fn refresh_once(&self, now: DateTime<Utc>) -> Result<RefreshReport, EngineError> {
        let stocks = self.store.list_stocks(&StockQuery::default()).await?;
        let mut report = RefreshReport::default();

        for stock in stocks {
            let price = match self.source.get_price(&stock.ticker_symbol).await {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!(ticker = %stock.ticker_symbol, error = %e, "Quote unavailable.");
                    report.failed += 1;
                    continue;
                }
            };
            match self.store.update_stock_price(stock.id, price, now).await {
                Ok(()) => {
                    tracing::debug!(ticker = %stock.ticker_symbol, %price, "Price updated.");
                    report.updated += 1;
                }
                Err(e) => {
                    tracing::warn!(ticker = %stock.ticker_symbol, error = %e, "Failed to store price.");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(updated = report.updated, failed = report.failed, "Price refresh complete.");
        Ok(report)
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped. The
    /// first refresh happens immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(period_secs = self.period.as_secs(), "Starting price refresher.");
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.refresh_once(Utc::now()).await {
                        tracing::error!(error = %e, "Price refresh failed.");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Price refresher stopped.");
    }
}
