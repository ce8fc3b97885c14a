use database::DbError;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ExecutionError {
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

    #[error("Order amount is out of range. Quantity: {quantity}, Price: {price}")]
    AmountOverflow { quantity: Decimal, price: Decimal },

    #[error("Portfolio {0} not found")]
    PortfolioNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}
