use crate::error::ApiError;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Number;
use std::str::FromStr;

/// The body of `GET /quote`. Only the current price is used.
///
/// Prices arrive as JSON numbers; they are kept as `serde_json::Number` and
/// converted from their textual form so no binary float is involved.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    /// Current price.
    #[serde(rename = "c")]
    pub current: Option<Number>,
    /// Previous close.
    #[serde(rename = "pc")]
    pub previous_close: Option<Number>,
    /// Quote timestamp, UNIX seconds.
    #[serde(rename = "t")]
    pub timestamp: Option<i64>,
}

/// The body Finnhub returns alongside a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
}

impl QuoteResponse {
    /// The current price as a `Decimal`. Finnhub answers unknown symbols with
    /// a zero quote, which is reported as missing data.
    pub fn current_price(&self, ticker: &str) -> Result<Decimal, ApiError> {
        let raw = self
            .current
            .as_ref()
            .ok_or_else(|| ApiError::InvalidData(format!("No current price for {ticker}")))?;
        let price = Decimal::from_str(&raw.to_string())
            .or_else(|_| Decimal::from_scientific(&raw.to_string()))
            .map_err(|e| ApiError::Deserialization(format!("{ticker}: {e}")))?;
        if price <= Decimal::ZERO {
            return Err(ApiError::InvalidData(format!(
                "Quote for {ticker} has no positive price ({price})"
            )));
        }
        Ok(price.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(json: &str) -> QuoteResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reads_current_price_exactly() {
        let q = quote(r#"{"c":189.84,"d":1.2,"dp":0.63,"h":190.1,"l":187.5,"o":188,"pc":188.64,"t":1718035200}"#);
        assert_eq!(q.current_price("AAPL").unwrap(), dec!(189.84));
        assert_eq!(q.timestamp, Some(1718035200));
    }

    #[test]
    fn zero_quote_means_unknown_symbol() {
        let q = quote(r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#);
        assert!(matches!(q.current_price("NOPE"), Err(ApiError::InvalidData(_))));
    }

    #[test]
    fn missing_price_is_reported() {
        let q = quote(r#"{}"#);
        assert!(matches!(q.current_price("AAPL"), Err(ApiError::InvalidData(_))));
    }
}
