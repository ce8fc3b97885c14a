use crate::error::{EngineError, ValidationErrors};
use chrono::{DateTime, Utc};
use core_types::{Stock, StockQuery};
use database::Store;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// The tradable instruments.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Blank filters are ignored.
    pub async fn list(&self, query: StockQuery) -> Result<Vec<Stock>, EngineError> {
        let query = StockQuery {
            ticker: query.ticker.filter(|t| !t.trim().is_empty()),
            company: query.company.filter(|c| !c.trim().is_empty()),
        };
        Ok(self.store.list_stocks(&query).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Stock, EngineError> {
        self.store
            .get_stock(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Stock"))
    }

    pub async fn add(
        &self,
        ticker: &str,
        company_name: &str,
        sector: Option<String>,
        market_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Stock, EngineError> {
        let ticker = ticker.trim().to_uppercase();
        let mut errors = ValidationErrors::new();
        if ticker.is_empty() || ticker.len() > 10 {
            errors.add("ticker_symbol", "Ticker symbol must be 1 to 10 characters");
        }
        if company_name.trim().is_empty() {
            errors.add("company_name", "Company name is required");
        }
        if market_price <= Decimal::ZERO {
            errors.add("market_price", "Market price must be a positive number");
        }
        errors.check()?;

        let stock = Stock {
            id: Uuid::new_v4(),
            ticker_symbol: ticker,
            company_name: company_name.trim().to_string(),
            sector,
            market_price,
            last_updated: now,
        };
        self.store.insert_stock(&stock).await?;
        tracing::info!(stock_id = %stock.id, ticker = %stock.ticker_symbol, "Stock listed.");
        Ok(stock)
    }
}
