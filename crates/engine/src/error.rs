use api_client::error::ApiError;
use database::DbError;
use executor::ExecutionError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Field name to message, for every problem found in one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map holding a single problem.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Records a problem. The first message per field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok` when nothing was recorded.
    pub fn check(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    #[error("Forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Market is closed. Order not executed.")]
    MarketClosed,

    #[error("Insufficient funds. Required: {required}, Available: {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Not enough shares to sell. Requested: {requested}, Available: {available}")]
    InsufficientShares {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Order {0} is no longer pending")]
    OrderNotPending(Uuid),

    #[error("Database error: {0}")]
    Storage(#[from] DbError),

    #[error("Price source error: {0}")]
    Price(#[from] ApiError),
}

impl EngineError {
    pub fn not_found(what: &str) -> Self {
        EngineError::NotFound(what.to_string())
    }

    /// Unwraps a checked `Decimal` operation, reporting overflow on `field`.
    pub(crate) fn in_range(value: Option<Decimal>, field: &str) -> Result<Decimal, Self> {
        value.ok_or_else(|| {
            EngineError::Validation(ValidationErrors::single(field, "Amount is out of range"))
        })
    }
}

impl From<ExecutionError> for EngineError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::InsufficientFunds {
                required,
                available,
            } => EngineError::InsufficientFunds {
                required,
                available,
            },
            ExecutionError::InsufficientShares {
                requested,
                available,
            } => EngineError::InsufficientShares {
                requested,
                available,
            },
            ExecutionError::AmountOverflow { .. } => EngineError::Validation(
                ValidationErrors::single("quantity", "Order amount is out of range"),
            ),
            ExecutionError::PortfolioNotFound(_) => EngineError::not_found("Portfolio"),
            ExecutionError::Storage(e) => EngineError::Storage(e),
        }
    }
}
