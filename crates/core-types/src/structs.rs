use crate::enums::{OrderSide, OrderStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account holder. `cash_balance` is the money not allocated to any portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub cash_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named pot of cash and positions owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Spendable cash allocated to this portfolio.
    pub portfolio_balance: Decimal,
    /// Funds deposited at creation. Never changes afterwards; only used for gain/loss reporting.
    pub initial_investment: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The position a portfolio holds in a single stock. At most one per (portfolio, stock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub stock_id: Uuid,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    pub fn new(portfolio_id: Uuid, stock_id: Uuid, quantity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            stock_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A tradable instrument. `market_price` is only ever written by the price integrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub id: Uuid,
    pub ticker_symbol: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub market_price: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// A buy or sell instruction against a portfolio.
///
/// An order without `target_price` and `scheduled_time` is *immediate*; a
/// `target_price` makes it a limit order and a `scheduled_time` keeps it
/// dormant until that instant has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub stock_id: Uuid,
    #[serde(rename = "order_type")]
    pub side: OrderSide,
    pub quantity: Decimal,
    pub target_price: Option<Decimal>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub executed_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds a new `pending` order.
    pub fn new(
        portfolio_id: Uuid,
        stock_id: Uuid,
        side: OrderSide,
        quantity: Decimal,
        target_price: Option<Decimal>,
        scheduled_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            stock_id,
            side,
            quantity,
            target_price,
            scheduled_time,
            status: OrderStatus::Pending,
            executed_price: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            deleted_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// No limit price and no schedule: eligible for a fill attempt at submission time.
    pub fn is_immediate(&self) -> bool {
        self.target_price.is_none() && self.scheduled_time.is_none()
    }

    /// Records a fill. Price and timestamp are always set together.
    pub fn mark_executed(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.status = OrderStatus::Executed;
        self.executed_price = Some(price);
        self.executed_at = Some(at);
        self.updated_at = at;
    }

    /// Soft-deletes the order.
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) {
        self.status = OrderStatus::Cancelled;
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

/// A user's named list of stocks to keep an eye on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub stock_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
