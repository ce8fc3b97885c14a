use crate::error::DbError;
use crate::store::{Store, UnitOfWork};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Holding, Order, Portfolio, Stock, StockQuery, User, Watchlist};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, Transaction};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, cash_balance, created_at, updated_at";
const STOCK_COLUMNS: &str =
    "id, ticker_symbol, company_name, sector, market_price, last_updated";
const PORTFOLIO_COLUMNS: &str =
    "id, user_id, name, portfolio_balance, initial_investment, created_at, updated_at";
const HOLDING_COLUMNS: &str = "id, portfolio_id, stock_id, quantity, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, portfolio_id, stock_id, order_type, quantity, target_price, \
     scheduled_time, status, executed_price, created_at, updated_at, executed_at, deleted_at";
const WATCHLIST_SELECT: &str = r#"
    SELECT w.id, w.user_id, w.name, w.created_at, w.updated_at,
           COALESCE(array_agg(ws.stock_id ORDER BY ws.created_at)
                    FILTER (WHERE ws.stock_id IS NOT NULL), '{}') AS stock_ids
    FROM watchlists AS w
    LEFT JOIN watchlist_stocks AS ws ON ws.watchlist_id = w.id
"#;

/// The `PgStore` provides the PostgreSQL implementation of [`Store`]. It
/// encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

// Row structs. Enums are stored as text and decoded in `TryFrom`.

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: Uuid,
    username: String,
    email: String,
    cash_balance: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            cash_balance: row.cash_balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbStock {
    id: Uuid,
    ticker_symbol: String,
    company_name: String,
    sector: Option<String>,
    market_price: Decimal,
    last_updated: DateTime<Utc>,
}

impl From<DbStock> for Stock {
    fn from(row: DbStock) -> Self {
        Stock {
            id: row.id,
            ticker_symbol: row.ticker_symbol,
            company_name: row.company_name,
            sector: row.sector,
            market_price: row.market_price,
            last_updated: row.last_updated,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbPortfolio {
    id: Uuid,
    user_id: Uuid,
    name: String,
    portfolio_balance: Decimal,
    initial_investment: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbPortfolio> for Portfolio {
    fn from(row: DbPortfolio) -> Self {
        Portfolio {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            portfolio_balance: row.portfolio_balance,
            initial_investment: row.initial_investment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbHolding {
    id: Uuid,
    portfolio_id: Uuid,
    stock_id: Uuid,
    quantity: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DbHolding> for Holding {
    fn from(row: DbHolding) -> Self {
        Holding {
            id: row.id,
            portfolio_id: row.portfolio_id,
            stock_id: row.stock_id,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbOrder {
    id: Uuid,
    portfolio_id: Uuid,
    stock_id: Uuid,
    order_type: String,
    quantity: Decimal,
    target_price: Option<Decimal>,
    scheduled_time: Option<DateTime<Utc>>,
    status: String,
    executed_price: Option<Decimal>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbOrder> for Order {
    type Error = DbError;

    fn try_from(row: DbOrder) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            portfolio_id: row.portfolio_id,
            stock_id: row.stock_id,
            side: row
                .order_type
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order {}: {e}", row.id)))?,
            quantity: row.quantity,
            target_price: row.target_price,
            scheduled_time: row.scheduled_time,
            status: row
                .status
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order {}: {e}", row.id)))?,
            executed_price: row.executed_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
            executed_at: row.executed_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbWatchlist {
    id: Uuid,
    user_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    stock_ids: Vec<Uuid>,
}

impl From<DbWatchlist> for Watchlist {
    fn from(row: DbWatchlist) -> Self {
        Watchlist {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            stock_ids: row.stock_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn into_orders(rows: Vec<DbOrder>) -> Result<Vec<Order>, DbError> {
    rows.into_iter().map(Order::try_from).collect()
}

impl PgStore {
    /// Creates a new `PgStore` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn insert_user(&self, user: &User) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, cash_balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.cash_balance)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stock(&self, id: Uuid) -> Result<Option<Stock>, DbError> {
        let row = sqlx::query_as::<_, DbStock>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stocks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Stock::from))
    }

    async fn list_stocks(&self, query: &StockQuery) -> Result<Vec<Stock>, DbError> {
        let ticker = query.ticker.as_deref().map(|t| format!("%{t}%"));
        let company = query.company.as_deref().map(|c| format!("%{c}%"));

        // NULL patterns disable their side of the filter; both NULL lists everything.
        let rows = sqlx::query_as::<_, DbStock>(&format!(
            r#"
            SELECT {STOCK_COLUMNS} FROM stocks
            WHERE ($1::TEXT IS NULL AND $2::TEXT IS NULL)
               OR ticker_symbol ILIKE $1
               OR company_name ILIKE $2
            ORDER BY ticker_symbol ASC
            "#
        ))
        .bind(ticker)
        .bind(company)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Stock::from).collect())
    }

    async fn insert_stock(&self, stock: &Stock) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO stocks (id, ticker_symbol, company_name, sector, market_price, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(stock.id)
        .bind(&stock.ticker_symbol)
        .bind(&stock.company_name)
        .bind(&stock.sector)
        .bind(stock.market_price)
        .bind(stock.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_stock_price(
        &self,
        id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE stocks SET market_price = $2, last_updated = $3 WHERE id = $1")
                .bind(id)
                .bind(price)
                .bind(at)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, DbError> {
        let row = sqlx::query_as::<_, DbPortfolio>(&format!(
            "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Portfolio::from))
    }

    async fn list_portfolios(&self, user_id: Uuid) -> Result<Vec<Portfolio>, DbError> {
        let rows = sqlx::query_as::<_, DbPortfolio>(&format!(
            "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Portfolio::from).collect())
    }

    async fn list_holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>, DbError> {
        let rows = sqlx::query_as::<_, DbHolding>(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holdings WHERE portfolio_id = $1 ORDER BY created_at ASC"
        ))
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Holding::from).collect())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError> {
        let row = sqlx::query_as::<_, DbOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders(&self, portfolio_id: Uuid) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, DbOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE portfolio_id = $1 ORDER BY created_at DESC"
        ))
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        into_orders(rows)
    }

    async fn pending_orders(&self) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, DbOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_orders(rows)
    }

    async fn insert_watchlist(&self, watchlist: &Watchlist) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO watchlists (id, user_id, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(watchlist.id)
        .bind(watchlist.user_id)
        .bind(&watchlist.name)
        .bind(watchlist.created_at)
        .bind(watchlist.updated_at)
        .execute(&mut *tx)
        .await?;

        for stock_id in &watchlist.stock_ids {
            sqlx::query(
                "INSERT INTO watchlist_stocks (watchlist_id, stock_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(watchlist.id)
            .bind(stock_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_watchlist(&self, id: Uuid) -> Result<Option<Watchlist>, DbError> {
        let row = sqlx::query_as::<_, DbWatchlist>(&format!(
            "{WATCHLIST_SELECT} WHERE w.id = $1 GROUP BY w.id"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Watchlist::from))
    }

    async fn list_watchlists(&self, user_id: Uuid) -> Result<Vec<Watchlist>, DbError> {
        let rows = sqlx::query_as::<_, DbWatchlist>(&format!(
            "{WATCHLIST_SELECT} WHERE w.user_id = $1 GROUP BY w.id ORDER BY w.created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Watchlist::from).collect())
    }

    async fn delete_watchlist(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM watchlists WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_watchlist_stock(
        &self,
        watchlist_id: Uuid,
        stock_id: Uuid,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO watchlist_stocks (watchlist_id, stock_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(watchlist_id)
        .bind(stock_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_watchlist_stock(
        &self,
        watchlist_id: Uuid,
        stock_id: Uuid,
    ) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM watchlist_stocks WHERE watchlist_id = $1 AND stock_id = $2")
                .bind(watchlist_id)
                .bind(stock_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// A unit of work backed by a single PostgreSQL transaction. Row locks are
/// taken with `SELECT ... FOR UPDATE`; dropping the transaction rolls it back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_user(&mut self, id: Uuid) -> Result<Option<User>, DbError> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(User::from))
    }

    async fn lock_portfolio(&mut self, id: Uuid) -> Result<Option<Portfolio>, DbError> {
        let row = sqlx::query_as::<_, DbPortfolio>(&format!(
            "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Portfolio::from))
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>, DbError> {
        let row = sqlx::query_as::<_, DbOrder>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn holding(
        &mut self,
        portfolio_id: Uuid,
        stock_id: Uuid,
    ) -> Result<Option<Holding>, DbError> {
        let row = sqlx::query_as::<_, DbHolding>(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holdings WHERE portfolio_id = $1 AND stock_id = $2"
        ))
        .bind(portfolio_id)
        .bind(stock_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Holding::from))
    }

    async fn holdings_count(&mut self, portfolio_id: Uuid) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM holdings WHERE portfolio_id = $1")
            .bind(portfolio_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn save_user(&mut self, user: &User) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET cash_balance = $2, updated_at = $3 WHERE id = $1")
            .bind(user.id)
            .bind(user.cash_balance)
            .bind(user.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, user_id, name, portfolio_balance, initial_investment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                portfolio_balance = EXCLUDED.portfolio_balance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(portfolio.id)
        .bind(portfolio.user_id)
        .bind(&portfolio.name)
        .bind(portfolio.portfolio_balance)
        .bind(portfolio.initial_investment)
        .bind(portfolio.created_at)
        .bind(portfolio.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_portfolio(&mut self, id: Uuid) -> Result<(), DbError> {
        // holdings and orders go with it through ON DELETE CASCADE
        sqlx::query("DELETE FROM portfolios WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save_holding(&mut self, holding: &Holding) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO holdings (id, portfolio_id, stock_id, quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (portfolio_id, stock_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(holding.id)
        .bind(holding.portfolio_id)
        .bind(holding.stock_id)
        .bind(holding.quantity)
        .bind(holding.created_at)
        .bind(holding.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_holding(&mut self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM holdings WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn save_order(&mut self, order: &Order) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, portfolio_id, stock_id, order_type, quantity, target_price, scheduled_time,
                status, executed_price, created_at, updated_at, executed_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                target_price = EXCLUDED.target_price,
                scheduled_time = EXCLUDED.scheduled_time,
                status = EXCLUDED.status,
                executed_price = EXCLUDED.executed_price,
                updated_at = EXCLUDED.updated_at,
                executed_at = EXCLUDED.executed_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(order.id)
        .bind(order.portfolio_id)
        .bind(order.stock_id)
        .bind(order.side.as_str())
        .bind(order.quantity)
        .bind(order.target_price)
        .bind(order.scheduled_time)
        .bind(order.status.as_str())
        .bind(order.executed_price)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.executed_at)
        .bind(order.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }
}
