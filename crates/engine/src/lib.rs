//! # Meridian Engine
//!
//! The application services of the paper-trading platform. Each service owns
//! one area of the domain and speaks in `EngineError`, which the HTTP layer
//! maps onto status codes:
//!
//! - [`OrderIntake`]: validates, stores and (when immediate) fills orders.
//! - [`Accounts`]: users, portfolios, cash transfers and valuations.
//! - [`Catalog`] and [`Watchlists`]: the instrument list and per-user lists.
//! - [`Sweeper`] and [`PriceRefresher`]: the background loops.

use database::Store;
use executor::{ExecutionEngine, MarketClock};
use std::sync::Arc;

pub mod accounts;
pub mod catalog;
pub mod error;
pub mod intake;
pub mod prices;
pub mod sweeper;
pub mod watchlists;

#[cfg(test)]
mod testing;

pub use accounts::{Accounts, PortfolioSummary, Position};
pub use catalog::Catalog;
pub use error::{EngineError, ValidationErrors};
pub use intake::OrderIntake;
pub use prices::{PriceRefresher, RefreshReport, StoredPrices};
pub use sweeper::{SweepReport, Sweeper};
pub use watchlists::Watchlists;

/// Every request-facing service, wired to one store and one clock.
#[derive(Clone)]
pub struct Services {
    pub accounts: Accounts,
    pub intake: OrderIntake,
    pub catalog: Catalog,
    pub watchlists: Watchlists,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, clock: MarketClock) -> Self {
        let engine = ExecutionEngine::new(Arc::clone(&store), clock);
        Self {
            accounts: Accounts::new(Arc::clone(&store)),
            intake: OrderIntake::new(engine),
            catalog: Catalog::new(Arc::clone(&store)),
            watchlists: Watchlists::new(store),
        }
    }
}
