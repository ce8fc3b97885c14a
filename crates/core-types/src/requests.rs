//! Inbound payloads. Fields are optional on purpose: presence is checked by the
//! services so that every missing field can be reported at once.

use crate::error::CoreError;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRequest {
    pub portfolio_id: Option<Uuid>,
    pub stock_id: Option<Uuid>,
    pub order_type: Option<String>,
    pub quantity: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub scheduled_time: Option<String>,
}

/// Partial update of a pending order. For the nullable fields the outer
/// `Option` tells whether the key was sent at all; an explicit `null` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderUpdate {
    pub quantity: Option<Decimal>,
    #[serde(default, deserialize_with = "present")]
    pub target_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "present")]
    pub scheduled_time: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioRequest {
    pub name: Option<String>,
    pub portfolio_balance: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchlistRequest {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchlistStockRequest {
    pub stock_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockQuery {
    pub ticker: Option<String>,
    pub company: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Parses an ISO 8601 timestamp. Offsets are honoured; a timestamp without an
/// offset is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            CoreError::InvalidInput(
                "scheduled_time".to_string(),
                "Invalid scheduled_time format. Must be ISO 8601.".to_string(),
            )
        })
}
