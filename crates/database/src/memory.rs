use crate::error::DbError;
use crate::store::{Store, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Holding, Order, OrderStatus, Portfolio, Stock, StockQuery, User, Watchlist};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// An in-process [`Store`] with the same locking and rollback behaviour as
/// the PostgreSQL one. Used by the test suites.
///
/// Row locks are one `tokio` mutex per locked record, dropped from the map once
/// no unit holds or waits on it. Writes made through a unit are staged and only
/// applied to the tables on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    stocks: HashMap<Uuid, Stock>,
    portfolios: HashMap<Uuid, Portfolio>,
    holdings: HashMap<Uuid, Holding>,
    orders: HashMap<Uuid, Order>,
    watchlists: HashMap<Uuid, Watchlist>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    User(Uuid),
    Portfolio(Uuid),
}

#[derive(Debug, Clone)]
enum Write {
    User(User),
    Portfolio(Portfolio),
    DeletePortfolio(Uuid),
    Holding(Holding),
    DeleteHolding(Uuid),
    Order(Order),
}

impl Tables {
    fn apply(&mut self, write: &Write) {
        match write {
            Write::User(user) => {
                if let Some(row) = self.users.get_mut(&user.id) {
                    row.cash_balance = user.cash_balance;
                    row.updated_at = user.updated_at;
                }
            }
            Write::Portfolio(portfolio) => match self.portfolios.get_mut(&portfolio.id) {
                Some(row) => {
                    row.name = portfolio.name.clone();
                    row.portfolio_balance = portfolio.portfolio_balance;
                    row.updated_at = portfolio.updated_at;
                }
                None => {
                    self.portfolios.insert(portfolio.id, portfolio.clone());
                }
            },
            Write::DeletePortfolio(id) => {
                self.portfolios.remove(id);
                self.holdings.retain(|_, h| h.portfolio_id != *id);
                self.orders.retain(|_, o| o.portfolio_id != *id);
            }
            Write::Holding(holding) => {
                let existing = self.holdings.values_mut().find(|h| {
                    h.portfolio_id == holding.portfolio_id && h.stock_id == holding.stock_id
                });
                match existing {
                    Some(row) => {
                        row.quantity = holding.quantity;
                        row.updated_at = holding.updated_at;
                    }
                    None => {
                        self.holdings.insert(holding.id, holding.clone());
                    }
                }
            }
            Write::DeleteHolding(id) => {
                self.holdings.remove(id);
            }
            Write::Order(order) => {
                self.orders.insert(order.id, order.clone());
            }
        }
    }

    fn holding(&self, portfolio_id: Uuid, stock_id: Uuid) -> Option<Holding> {
        self.holdings
            .values()
            .find(|h| h.portfolio_id == portfolio_id && h.stock_id == stock_id)
            .cloned()
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_lock(&self, key: LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key).or_default().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            guards: Vec::new(),
            held: HashSet::new(),
            writes: Vec::new(),
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), DbError> {
        self.tables().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_stock(&self, id: Uuid) -> Result<Option<Stock>, DbError> {
        Ok(self.tables().stocks.get(&id).cloned())
    }

    async fn list_stocks(&self, query: &StockQuery) -> Result<Vec<Stock>, DbError> {
        let tables = self.tables();
        let mut stocks: Vec<Stock> = tables
            .stocks
            .values()
            .filter(|s| match (&query.ticker, &query.company) {
                (None, None) => true,
                (ticker, company) => {
                    ticker.as_deref().is_some_and(|t| contains_ignore_case(&s.ticker_symbol, t))
                        || company
                            .as_deref()
                            .is_some_and(|c| contains_ignore_case(&s.company_name, c))
                }
            })
            .cloned()
            .collect();
        stocks.sort_by(|a, b| a.ticker_symbol.cmp(&b.ticker_symbol));
        Ok(stocks)
    }

    async fn insert_stock(&self, stock: &Stock) -> Result<(), DbError> {
        self.tables().stocks.insert(stock.id, stock.clone());
        Ok(())
    }

    async fn update_stock_price(
        &self,
        id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut tables = self.tables();
        let stock = tables.stocks.get_mut(&id).ok_or(DbError::NotFound)?;
        stock.market_price = price;
        stock.last_updated = at;
        Ok(())
    }

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, DbError> {
        Ok(self.tables().portfolios.get(&id).cloned())
    }

    async fn list_portfolios(&self, user_id: Uuid) -> Result<Vec<Portfolio>, DbError> {
        let mut portfolios: Vec<Portfolio> = self
            .tables()
            .portfolios
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        portfolios.sort_by_key(|p| p.created_at);
        Ok(portfolios)
    }

    async fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>, DbError> {
        let mut holdings: Vec<Holding> = self
            .tables()
            .holdings
            .values()
            .filter(|h| h.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        holdings.sort_by_key(|h| h.created_at);
        Ok(holdings)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError> {
        Ok(self.tables().orders.get(&id).cloned())
    }

    async fn list_orders(&self, portfolio_id: Uuid) -> Result<Vec<Order>, DbError> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|o| o.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, DbError> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn insert_watchlist(&self, watchlist: &Watchlist) -> Result<(), DbError> {
        self.tables().watchlists.insert(watchlist.id, watchlist.clone());
        Ok(())
    }

    async fn get_watchlist(&self, id: Uuid) -> Result<Option<Watchlist>, DbError> {
        Ok(self.tables().watchlists.get(&id).cloned())
    }

    async fn list_watchlists(&self, user_id: Uuid) -> Result<Vec<Watchlist>, DbError> {
        let mut watchlists: Vec<Watchlist> = self
            .tables()
            .watchlists
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        watchlists.sort_by_key(|w| w.created_at);
        Ok(watchlists)
    }

    async fn delete_watchlist(&self, id: Uuid) -> Result<(), DbError> {
        self.tables().watchlists.remove(&id);
        Ok(())
    }

    async fn add_watchlist_stock(
        &self,
        watchlist_id: Uuid,
        stock_id: Uuid,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables();
        let watchlist = tables.watchlists.get_mut(&watchlist_id).ok_or(DbError::NotFound)?;
        if watchlist.stock_ids.contains(&stock_id) {
            return Ok(false);
        }
        watchlist.stock_ids.push(stock_id);
        Ok(true)
    }

    async fn remove_watchlist_stock(
        &self,
        watchlist_id: Uuid,
        stock_id: Uuid,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables();
        let watchlist = tables.watchlists.get_mut(&watchlist_id).ok_or(DbError::NotFound)?;
        let before = watchlist.stock_ids.len();
        watchlist.stock_ids.retain(|id| *id != stock_id);
        Ok(watchlist.stock_ids.len() != before)
    }
}

/// A unit of work over a [`MemoryStore`]. Locks are released when the unit
/// is dropped, after its writes (if committed) are visible.
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    guards: Vec<OwnedMutexGuard<()>>,
    held: HashSet<LockKey>,
    writes: Vec<Write>,
}

impl MemoryUnitOfWork {
    async fn acquire(&mut self, key: LockKey) {
        if self.held.contains(&key) {
            return;
        }
        let lock = self.store.record_lock(key);
        let guard = lock.lock_owned().await;
        self.guards.push(guard);
        self.held.insert(key);
    }

    /// Reads through the staged writes of this unit.
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.store.tables();
        if self.writes.is_empty() {
            return f(&tables);
        }
        let mut view = tables.clone();
        drop(tables);
        for write in &self.writes {
            view.apply(write);
        }
        f(&view)
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        self.guards.clear();
        // A lock nobody else holds or waits on is only referenced by the map.
        let mut locks = self.store.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.held {
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_user(&mut self, id: Uuid) -> Result<Option<User>, DbError> {
        self.acquire(LockKey::User(id)).await;
        Ok(self.read(|t| t.users.get(&id).cloned()))
    }

    async fn lock_portfolio(&mut self, id: Uuid) -> Result<Option<Portfolio>, DbError> {
        self.acquire(LockKey::Portfolio(id)).await;
        Ok(self.read(|t| t.portfolios.get(&id).cloned()))
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, DbError> {
        Ok(self.read(|t| t.orders.get(&id).cloned()))
    }

    async fn holding(
        &mut self,
        portfolio_id: Uuid,
        stock_id: Uuid,
    ) -> Result<Option<Holding>, DbError> {
        Ok(self.read(|t| t.holding(portfolio_id, stock_id)))
    }

    async fn holdings_count(&mut self, portfolio_id: Uuid) -> Result<u64, DbError> {
        Ok(self.read(|t| {
            t.holdings.values().filter(|h| h.portfolio_id == portfolio_id).count() as u64
        }))
    }

    async fn save_user(&mut self, user: &User) -> Result<(), DbError> {
        self.writes.push(Write::User(user.clone()));
        Ok(())
    }

    async fn save_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), DbError> {
        self.writes.push(Write::Portfolio(portfolio.clone()));
        Ok(())
    }

    async fn delete_portfolio(&mut self, id: Uuid) -> Result<(), DbError> {
        self.writes.push(Write::DeletePortfolio(id));
        Ok(())
    }

    async fn save_holding(&mut self, holding: &Holding) -> Result<(), DbError> {
        self.writes.push(Write::Holding(holding.clone()));
        Ok(())
    }

    async fn delete_holding(&mut self, id: Uuid) -> Result<(), DbError> {
        self.writes.push(Write::DeleteHolding(id));
        Ok(())
    }

    async fn save_order(&mut self, order: &Order) -> Result<(), DbError> {
        self.writes.push(Write::Order(order.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        {
            let mut tables = self.store.tables();
            for write in &self.writes {
                tables.apply(write);
            }
        }
        // guards drop here, after the writes are visible
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderSide;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn seeded() -> (MemoryStore, Portfolio, Stock) {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            cash_balance: dec!(1000),
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await.unwrap();
        let stock = Stock {
            id: Uuid::new_v4(),
            ticker_symbol: "AAPL".into(),
            company_name: "Apple Inc.".into(),
            sector: Some("Technology".into()),
            market_price: dec!(150),
            last_updated: now,
        };
        store.insert_stock(&stock).await.unwrap();
        let portfolio = Portfolio {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: "Growth".into(),
            portfolio_balance: dec!(500),
            initial_investment: dec!(500),
            created_at: now,
            updated_at: now,
        };
        let mut unit = store.begin().await.unwrap();
        unit.save_portfolio(&portfolio).await.unwrap();
        unit.commit().await.unwrap();
        (store, portfolio, stock)
    }

    #[tokio::test]
    async fn dropped_unit_discards_writes() {
        let (store, portfolio, _) = seeded().await;
        {
            let mut unit = store.begin().await.unwrap();
            let mut locked = unit.lock_portfolio(portfolio.id).await.unwrap().unwrap();
            locked.portfolio_balance = dec!(0);
            unit.save_portfolio(&locked).await.unwrap();
        }
        let stored = store.get_portfolio(portfolio.id).await.unwrap().unwrap();
        assert_eq!(stored.portfolio_balance, dec!(500));
    }

    #[tokio::test]
    async fn unit_reads_its_own_staged_writes() {
        let (store, portfolio, stock) = seeded().await;
        let mut unit = store.begin().await.unwrap();
        unit.lock_portfolio(portfolio.id).await.unwrap();
        unit.save_holding(&Holding::new(portfolio.id, stock.id, dec!(3), Utc::now()))
            .await
            .unwrap();

        let staged = unit.holding(portfolio.id, stock.id).await.unwrap().unwrap();
        assert_eq!(staged.quantity, dec!(3));
        assert!(store.list_holdings(portfolio.id).await.unwrap().is_empty());

        unit.commit().await.unwrap();
        assert_eq!(store.list_holdings(portfolio.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn holding_upsert_keeps_one_row_per_stock() {
        let (store, portfolio, stock) = seeded().await;
        for quantity in [dec!(2), dec!(7)] {
            let mut unit = store.begin().await.unwrap();
            unit.save_holding(&Holding::new(portfolio.id, stock.id, quantity, Utc::now()))
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }
        let holdings = store.list_holdings(portfolio.id).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, dec!(7));
    }

    #[tokio::test]
    async fn initial_investment_is_not_overwritten() {
        let (store, mut portfolio, _) = seeded().await;
        portfolio.initial_investment = dec!(1);
        portfolio.name = "Renamed".into();
        let mut unit = store.begin().await.unwrap();
        unit.save_portfolio(&portfolio).await.unwrap();
        unit.commit().await.unwrap();

        let stored = store.get_portfolio(portfolio.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.initial_investment, dec!(500));
    }

    #[tokio::test]
    async fn deleting_a_portfolio_cascades() {
        let (store, portfolio, stock) = seeded().await;
        let order = Order::new(portfolio.id, stock.id, OrderSide::Buy, dec!(1), Some(dec!(100)), None, Utc::now());
        let mut unit = store.begin().await.unwrap();
        unit.save_order(&order).await.unwrap();
        unit.save_holding(&Holding::new(portfolio.id, stock.id, dec!(1), Utc::now()))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin().await.unwrap();
        unit.delete_portfolio(portfolio.id).await.unwrap();
        unit.commit().await.unwrap();

        assert!(store.get_portfolio(portfolio.id).await.unwrap().is_none());
        assert!(store.get_order(order.id).await.unwrap().is_none());
        assert!(store.list_holdings(portfolio.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn portfolio_lock_serializes_units() {
        let (store, portfolio, _) = seeded().await;

        let mut first = store.begin().await.unwrap();
        let mut locked = first.lock_portfolio(portfolio.id).await.unwrap().unwrap();

        let contender = store.clone();
        let id = portfolio.id;
        let waiter = tokio::spawn(async move {
            let mut unit = contender.begin().await.unwrap();
            let seen = unit.lock_portfolio(id).await.unwrap().unwrap();
            seen.portfolio_balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        locked.portfolio_balance = dec!(125);
        first.save_portfolio(&locked).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), dec!(125));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn record_locks_are_released_with_their_units() {
        let (store, portfolio, _) = seeded().await;
        let lock_count = || store.inner.locks.lock().unwrap().len();

        let mut first = store.begin().await.unwrap();
        first.lock_user(portfolio.user_id).await.unwrap();
        first.lock_portfolio(portfolio.id).await.unwrap();
        assert_eq!(lock_count(), 2);

        let contender = store.clone();
        let id = portfolio.id;
        let waiter = tokio::spawn(async move {
            let mut unit = contender.begin().await.unwrap();
            unit.lock_portfolio(id).await.unwrap();
            unit.commit().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the waiter still needs the portfolio lock; only the user lock goes
        drop(first);
        waiter.await.unwrap();
        assert_eq!(lock_count(), 0);

        for _ in 0..10 {
            let mut unit = store.begin().await.unwrap();
            unit.lock_portfolio(portfolio.id).await.unwrap();
        }
        assert_eq!(lock_count(), 0);
    }

    #[tokio::test]
    async fn stock_search_matches_either_filter() {
        let (store, _, _) = seeded().await;
        let now = Utc::now();
        store
            .insert_stock(&Stock {
                id: Uuid::new_v4(),
                ticker_symbol: "MSFT".into(),
                company_name: "Microsoft Corporation".into(),
                sector: None,
                market_price: dec!(300),
                last_updated: now,
            })
            .await
            .unwrap();

        let query = StockQuery { ticker: Some("aap".into()), company: Some("micro".into()) };
        assert_eq!(store.list_stocks(&query).await.unwrap().len(), 2);

        let query = StockQuery { ticker: Some("ms".into()), company: None };
        let found = store.list_stocks(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ticker_symbol, "MSFT");

        assert_eq!(store.list_stocks(&StockQuery::default()).await.unwrap().len(), 2);
    }
}
