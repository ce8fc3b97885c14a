use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Holding, Order, Portfolio, Stock, StockQuery, User, Watchlist};
use rust_decimal::Decimal;
use uuid::Uuid;

/// The persistence contract the services are written against.
///
/// Plain reads and the few single-row writes that never race with a fill
/// live here. Everything that moves money or shares goes through a
/// [`UnitOfWork`] obtained from [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError>;
    async fn insert_user(&self, user: &User) -> Result<(), DbError>;

    async fn get_stock(&self, id: Uuid) -> Result<Option<Stock>, DbError>;
    /// Case-insensitive substring search. With both filters set, a stock
    /// matching either one is returned.
    async fn list_stocks(&self, query: &StockQuery) -> Result<Vec<Stock>, DbError>;
    async fn insert_stock(&self, stock: &Stock) -> Result<(), DbError>;
    async fn update_stock_price(
        &self,
        id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, DbError>;
    async fn list_portfolios(&self, user_id: Uuid) -> Result<Vec<Portfolio>, DbError>;
    async fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>, DbError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError>;
    async fn list_orders(&self, portfolio_id: Uuid) -> Result<Vec<Order>, DbError>;
    /// Every order still in `pending`, oldest first.
    async fn pending_orders(&self) -> Result<Vec<Order>, DbError>;

    async fn insert_watchlist(&self, watchlist: &Watchlist) -> Result<(), DbError>;
    async fn get_watchlist(&self, id: Uuid) -> Result<Option<Watchlist>, DbError>;
    async fn list_watchlists(&self, user_id: Uuid) -> Result<Vec<Watchlist>, DbError>;
    async fn delete_watchlist(&self, id: Uuid) -> Result<(), DbError>;
    /// Returns `false` when the stock was already on the list.
    async fn add_watchlist_stock(&self, watchlist_id: Uuid, stock_id: Uuid)
    -> Result<bool, DbError>;
    /// Returns `false` when the stock was not on the list.
    async fn remove_watchlist_stock(
        &self,
        watchlist_id: Uuid,
        stock_id: Uuid,
    ) -> Result<bool, DbError>;
}

/// A transaction over the account records.
///
/// `lock_*` reads a row and holds an exclusive lock on it until the unit is
/// committed or dropped, so a check made after locking cannot be invalidated
/// by a concurrent writer. Callers take the user lock before any portfolio
/// lock. Dropping a unit without calling [`UnitOfWork::commit`] discards every
/// write made through it.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_user(&mut self, id: Uuid) -> Result<Option<User>, DbError>;
    async fn lock_portfolio(&mut self, id: Uuid) -> Result<Option<Portfolio>, DbError>;

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, DbError>;
    async fn holding(
        &mut self,
        portfolio_id: Uuid,
        stock_id: Uuid,
    ) -> Result<Option<Holding>, DbError>;
    async fn holdings_count(&mut self, portfolio_id: Uuid) -> Result<u64, DbError>;

    /// Persists the user's cash balance.
    async fn save_user(&mut self, user: &User) -> Result<(), DbError>;
    /// Inserts or updates; `initial_investment` is only ever written on insert.
    async fn save_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), DbError>;
    /// Removes the portfolio together with its holdings and orders.
    async fn delete_portfolio(&mut self, id: Uuid) -> Result<(), DbError>;
    /// Inserts or updates the single holding of `(portfolio_id, stock_id)`.
    async fn save_holding(&mut self, holding: &Holding) -> Result<(), DbError>;
    async fn delete_holding(&mut self, id: Uuid) -> Result<(), DbError>;
    /// Inserts or updates.
    async fn save_order(&mut self, order: &Order) -> Result<(), DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;
}
