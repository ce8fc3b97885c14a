//! Shared fixtures for the service tests.

use crate::{Accounts, OrderIntake};
use chrono::Utc;
use core_types::{Portfolio, Stock, User};
use database::{MemoryStore, Store};
use executor::{ExecutionEngine, MarketClock};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

pub struct Fixture {
    pub store: MemoryStore,
    pub user: User,
    pub portfolio: Portfolio,
    pub stock: Stock,
    pub intake: OrderIntake,
    pub accounts: Accounts,
}

/// A user with 10,000 cash, one portfolio holding `balance`, and AAPL at 150.00.
/// The market is always open.
pub async fn fixture(balance: Decimal) -> Fixture {
    let store = MemoryStore::new();
    let now = Utc::now();

    let user = User {
        id: Uuid::new_v4(),
        username: "alice".into(),
        email: "alice@example.com".into(),
        cash_balance: dec!(10000),
        created_at: now,
        updated_at: now,
    };
    store.insert_user(&user).await.unwrap();

    let stock = Stock {
        id: Uuid::new_v4(),
        ticker_symbol: "AAPL".into(),
        company_name: "Apple Inc.".into(),
        sector: Some("Technology".into()),
        market_price: dec!(150.00),
        last_updated: now,
    };
    store.insert_stock(&stock).await.unwrap();

    let portfolio = Portfolio {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: "Main".into(),
        portfolio_balance: balance,
        initial_investment: balance,
        created_at: now,
        updated_at: now,
    };
    let mut unit = store.begin().await.unwrap();
    unit.save_portfolio(&portfolio).await.unwrap();
    unit.commit().await.unwrap();

    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let engine = ExecutionEngine::new(Arc::clone(&shared), MarketClock::always_open());
    Fixture {
        intake: OrderIntake::new(engine),
        accounts: Accounts::new(shared),
        store,
        user,
        portfolio,
        stock,
    }
}

impl Fixture {
    pub fn shared_store(&self) -> Arc<dyn Store> {
        Arc::new(self.store.clone())
    }

    pub async fn balance(&self) -> Decimal {
        self.store
            .get_portfolio(self.portfolio.id)
            .await
            .unwrap()
            .unwrap()
            .portfolio_balance
    }

    pub async fn cash(&self) -> Decimal {
        self.store.get_user(self.user.id).await.unwrap().unwrap().cash_balance
    }

    /// Registers a second user and returns its id.
    pub async fn other_user(&self) -> Uuid {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "mallory".into(),
            email: "mallory@example.com".into(),
            cash_balance: dec!(0),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user).await.unwrap();
        user.id
    }

    pub async fn add_stock(&self, ticker: &str, price: Decimal) -> Stock {
        let stock = Stock {
            id: Uuid::new_v4(),
            ticker_symbol: ticker.into(),
            company_name: format!("{ticker} Corp."),
            sector: None,
            market_price: price,
            last_updated: Utc::now(),
        };
        self.store.insert_stock(&stock).await.unwrap();
        stock
    }
}
