use crate::error::ApiError;
use crate::responses::ApiErrorResponse;
use async_trait::async_trait;
use configuration::PriceFeedConfig;
use rust_decimal::Decimal;

pub mod error;
pub mod responses;

// --- Public API ---
pub use responses::QuoteResponse;

/// Supplies the current reference price of an instrument.
///
/// This trait is the contract the execution path and the price refresher use,
/// allowing the underlying implementation (REST quotes, stored prices or a
/// test double) to be swapped out. Failures are transient from the caller's
/// point of view: the affected order or ticker is skipped for this cycle.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, ticker: &str) -> Result<Decimal, ApiError>;
}

/// A `PriceSource` backed by Finnhub's REST `/quote` endpoint.
#[derive(Clone)]
pub struct FinnhubClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubClient {
    pub fn new(config: &PriceFeedConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Fetches the full quote for a symbol.
    pub async fn quote(&self, ticker: &str) -> Result<QuoteResponse, ApiError> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", ticker), ("token", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<QuoteResponse>(&text)
                .map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            Err(ApiError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl PriceSource for FinnhubClient {
    async fn get_price(&self, ticker: &str) -> Result<Decimal, ApiError> {
        self.quote(ticker).await?.current_price(ticker)
    }
}
