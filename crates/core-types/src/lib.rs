pub mod enums;
pub mod error;
pub mod requests;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderStatus};
pub use error::CoreError;
pub use requests::{
    parse_timestamp, OrderRequest, OrderUpdate, PortfolioRequest, PortfolioUpdate, StockQuery,
    TransferRequest, WatchlistRequest, WatchlistStockRequest,
};
pub use structs::{Holding, Order, Portfolio, Stock, User, Watchlist};
