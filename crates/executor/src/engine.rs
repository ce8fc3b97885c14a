use crate::clock::MarketClock;
use crate::error::ExecutionError;
use crate::ledger::{self, HoldingChange};
use chrono::{DateTime, Utc};
use core_types::{Order, OrderSide, OrderStatus};
use database::{Store, UnitOfWork};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

/// Why a pending order was left alone.
#[derive(Debug, Clone, PartialEq)]
pub enum Ineligibility {
    /// Already executed or cancelled.
    NotPending(OrderStatus),
    /// Scheduled for a later instant.
    Scheduled(DateTime<Utc>),
    /// Market order outside the trading session.
    MarketClosed,
    /// Limit order whose price condition does not hold.
    LimitNotReached { price: Decimal, target: Decimal },
    /// The order (or its portfolio) no longer exists.
    Gone,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligibility::NotPending(status) => write!(f, "order is {status}"),
            Ineligibility::Scheduled(at) => write!(f, "scheduled for {at}"),
            Ineligibility::MarketClosed => write!(f, "market is closed"),
            Ineligibility::LimitNotReached { price, target } => {
                write!(f, "price {price} has not reached target {target}")
            }
            Ineligibility::Gone => write!(f, "order no longer exists"),
        }
    }
}

/// The result of a fill attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Filled(Order),
    NotEligible(Ineligibility),
}

/// Converts pending orders into executed ones against a reference price.
///
/// Every fill runs in a single unit of work holding the portfolio lock, so the
/// eligibility check, the balance/holding checks and the writes observe one
/// consistent state and two fills against the same portfolio are serialized.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn Store>,
    clock: MarketClock,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn Store>, clock: MarketClock) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &MarketClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The eligibility rules, evaluated in order and short-circuiting.
    ///
    /// Only plain market orders are gated on the trading session; a limit
    /// order is triggered by price alone.
    pub fn check_eligibility(
        &self,
        order: &Order,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), Ineligibility> {
        if order.status != OrderStatus::Pending {
            return Err(Ineligibility::NotPending(order.status));
        }
        if let Some(at) = order.scheduled_time {
            if at > now {
                return Err(Ineligibility::Scheduled(at));
            }
        }
        match order.target_price {
            None if !self.clock.is_open(now) => Err(Ineligibility::MarketClosed),
            None => Ok(()),
            Some(target) => {
                let reached = match order.side {
                    OrderSide::Buy => price <= target,
                    OrderSide::Sell => price >= target,
                };
                if reached {
                    Ok(())
                } else {
                    Err(Ineligibility::LimitNotReached { price, target })
                }
            }
        }
    }

    /// Attempts to fill a stored pending order at `price`.
    ///
    /// The order is re-read under the portfolio lock, so whatever `order`
    /// the caller holds only identifies it. Calling this on an order that has
    /// since been executed or cancelled is a no-op returning `NotEligible`.
    /// Insufficient funds or shares leave the order pending and are returned
    /// as errors.
    pub async fn try_fill(
        &self,
        order: &Order,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, ExecutionError> {
        let mut unit = self.store.begin().await?;

        let Some(mut portfolio) = unit.lock_portfolio(order.portfolio_id).await? else {
            return Ok(FillOutcome::NotEligible(Ineligibility::Gone));
        };
        let Some(mut current) = unit.order(order.id).await? else {
            return Ok(FillOutcome::NotEligible(Ineligibility::Gone));
        };

        if let Err(reason) = self.check_eligibility(&current, price, now) {
            tracing::debug!(order_id = %current.id, %reason, "Order not eligible.");
            return Ok(FillOutcome::NotEligible(reason));
        }

        let holding = unit.holding(current.portfolio_id, current.stock_id).await?;
        let change = ledger::apply_fill(&mut portfolio, holding, &current, price, now)?;
        current.mark_executed(price, now);

        persist(&mut *unit, &portfolio, change, &current).await?;
        unit.commit().await?;

        tracing::info!(
            order_id = %current.id,
            portfolio_id = %current.portfolio_id,
            side = %current.side,
            quantity = %current.quantity,
            price = %price,
            "Order filled."
        );
        Ok(FillOutcome::Filled(current))
    }

    /// Fills an order that has not been stored yet and stores it executed.
    ///
    /// This is the synchronous submission path: the caller has already
    /// decided the order may trade now. On any error nothing is written, not
    /// even the order.
    pub async fn fill_new(
        &self,
        mut order: Order,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Order, ExecutionError> {
        let mut unit = self.store.begin().await?;

        let mut portfolio = unit
            .lock_portfolio(order.portfolio_id)
            .await?
            .ok_or(ExecutionError::PortfolioNotFound(order.portfolio_id))?;
        let holding = unit.holding(order.portfolio_id, order.stock_id).await?;
        let change = ledger::apply_fill(&mut portfolio, holding, &order, price, now)?;
        order.mark_executed(price, now);

        persist(&mut *unit, &portfolio, change, &order).await?;
        unit.commit().await?;

        tracing::info!(
            order_id = %order.id,
            portfolio_id = %order.portfolio_id,
            side = %order.side,
            quantity = %order.quantity,
            price = %price,
            "Order executed on submission."
        );
        Ok(order)
    }
}

async fn persist(
    unit: &mut dyn UnitOfWork,
    portfolio: &core_types::Portfolio,
    change: HoldingChange,
    order: &Order,
) -> Result<(), ExecutionError> {
    unit.save_portfolio(portfolio).await?;
    match change {
        HoldingChange::Upsert(holding) => unit.save_holding(&holding).await?,
        HoldingChange::Remove(holding) => unit.delete_holding(holding.id).await?,
    }
    unit.save_order(order).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use core_types::{Holding, Portfolio, Stock, User};
    use database::MemoryStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: MemoryStore,
        engine: ExecutionEngine,
        portfolio: Portfolio,
        stock: Stock,
    }

    async fn fixture(balance: Decimal, held: Option<Decimal>) -> Fixture {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "trader".into(),
            email: "trader@example.com".into(),
            cash_balance: dec!(0),
            created_at: now,
            updated_at: now,
        };
        store.insert_user(&user).await.unwrap();
        let stock = Stock {
            id: Uuid::new_v4(),
            ticker_symbol: "AAPL".into(),
            company_name: "Apple Inc.".into(),
            sector: None,
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
        if let Some(quantity) = held {
            unit.save_holding(&Holding::new(portfolio.id, stock.id, quantity, now))
                .await
                .unwrap();
        }
        unit.commit().await.unwrap();

        let engine = ExecutionEngine::new(Arc::new(store.clone()), MarketClock::always_open());
        Fixture { store, engine, portfolio, stock }
    }

    impl Fixture {
        async fn pending(&self, side: OrderSide, quantity: Decimal, target: Option<Decimal>) -> Order {
            let order = Order::new(self.portfolio.id, self.stock.id, side, quantity, target, None, Utc::now());
            let mut unit = self.store.begin().await.unwrap();
            unit.save_order(&order).await.unwrap();
            unit.commit().await.unwrap();
            order
        }

        async fn balance(&self) -> Decimal {
            self.store.get_portfolio(self.portfolio.id).await.unwrap().unwrap().portfolio_balance
        }

        async fn held(&self) -> Option<Decimal> {
            self.store
                .list_holdings(self.portfolio.id)
                .await
                .unwrap()
                .into_iter()
                .find(|h| h.stock_id == self.stock.id)
                .map(|h| h.quantity)
        }

        async fn status(&self, order: &Order) -> OrderStatus {
            self.store.get_order(order.id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn market_buy_fills_at_reference_price() {
        let fx = fixture(dec!(1000.00), None).await;
        let order = fx.pending(OrderSide::Buy, dec!(5), None).await;

        let outcome = fx.engine.try_fill(&order, dec!(150.00), Utc::now()).await.unwrap();
        let FillOutcome::Filled(filled) = outcome else { panic!("expected a fill") };

        assert_eq!(filled.status, OrderStatus::Executed);
        assert_eq!(filled.executed_price, Some(dec!(150.00)));
        assert!(filled.executed_at.is_some());
        assert_eq!(fx.balance().await, dec!(250.00));
        assert_eq!(fx.held().await, Some(dec!(5)));
        assert_eq!(fx.status(&order).await, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn insufficient_funds_leaves_order_pending() {
        let fx = fixture(dec!(100.00), None).await;
        let order = fx.pending(OrderSide::Buy, dec!(5), None).await;

        let err = fx.engine.try_fill(&order, dec!(150.00), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientFunds { .. }));
        assert_eq!(fx.balance().await, dec!(100.00));
        assert_eq!(fx.status(&order).await, OrderStatus::Pending);
        assert_eq!(fx.held().await, None);
    }

    #[tokio::test]
    async fn oversell_changes_nothing() {
        let fx = fixture(dec!(0), Some(dec!(3))).await;
        let order = fx.pending(OrderSide::Sell, dec!(5), None).await;

        let err = fx.engine.try_fill(&order, dec!(10), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientShares { .. }));
        assert_eq!(fx.held().await, Some(dec!(3)));
        assert_eq!(fx.balance().await, dec!(0));
        assert_eq!(fx.status(&order).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn second_attempt_is_a_no_op() {
        let fx = fixture(dec!(1000), None).await;
        let order = fx.pending(OrderSide::Buy, dec!(2), None).await;

        let first = fx.engine.try_fill(&order, dec!(100), Utc::now()).await.unwrap();
        assert!(matches!(first, FillOutcome::Filled(_)));
        let second = fx.engine.try_fill(&order, dec!(100), Utc::now()).await.unwrap();
        assert_eq!(
            second,
            FillOutcome::NotEligible(Ineligibility::NotPending(OrderStatus::Executed))
        );
        assert_eq!(fx.balance().await, dec!(800));
        assert_eq!(fx.held().await, Some(dec!(2)));
    }

    #[tokio::test]
    async fn limit_buy_boundary_is_inclusive() {
        let fx = fixture(dec!(1000), None).await;
        let order = fx.pending(OrderSide::Buy, dec!(1), Some(dec!(100))).await;

        let outcome = fx.engine.try_fill(&order, dec!(101), Utc::now()).await.unwrap();
        assert!(matches!(
            outcome,
            FillOutcome::NotEligible(Ineligibility::LimitNotReached { .. })
        ));
        assert_eq!(fx.status(&order).await, OrderStatus::Pending);

        let outcome = fx.engine.try_fill(&order, dec!(100), Utc::now()).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Filled(_)));
        assert_eq!(fx.balance().await, dec!(900));
    }

    #[tokio::test]
    async fn limit_sell_needs_price_at_or_above_target() {
        let fx = fixture(dec!(0), Some(dec!(10))).await;
        let order = fx.pending(OrderSide::Sell, dec!(4), Some(dec!(50))).await;

        let outcome = fx.engine.try_fill(&order, dec!(49.99), Utc::now()).await.unwrap();
        assert!(matches!(outcome, FillOutcome::NotEligible(_)));

        let outcome = fx.engine.try_fill(&order, dec!(52), Utc::now()).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Filled(_)));
        assert_eq!(fx.balance().await, dec!(208));
        assert_eq!(fx.held().await, Some(dec!(6)));
    }

    #[tokio::test]
    async fn scheduled_order_waits_for_its_time() {
        let fx = fixture(dec!(1000), None).await;
        let now = Utc::now();
        let order = Order::new(fx.portfolio.id, fx.stock.id, OrderSide::Buy, dec!(1), None, Some(now + Duration::hours(1)), now);
        let mut unit = fx.store.begin().await.unwrap();
        unit.save_order(&order).await.unwrap();
        unit.commit().await.unwrap();

        let outcome = fx.engine.try_fill(&order, dec!(10), now).await.unwrap();
        assert!(matches!(outcome, FillOutcome::NotEligible(Ineligibility::Scheduled(_))));

        let later = now + Duration::hours(2);
        let outcome = fx.engine.try_fill(&order, dec!(10), later).await.unwrap();
        let FillOutcome::Filled(filled) = outcome else { panic!("expected a fill") };
        assert_eq!(filled.executed_at, Some(later));
        assert_eq!(fx.status(&order).await, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn market_order_is_gated_but_limit_order_is_not() {
        let mut fx = fixture(dec!(1000), None).await;
        fx.engine = ExecutionEngine::new(
            Arc::new(fx.store.clone()),
            MarketClock::new(
                chrono_tz::America::New_York,
                chrono::NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ),
        );
        let saturday = Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap();

        let market = fx.pending(OrderSide::Buy, dec!(1), None).await;
        let outcome = fx.engine.try_fill(&market, dec!(10), saturday).await.unwrap();
        assert_eq!(outcome, FillOutcome::NotEligible(Ineligibility::MarketClosed));

        let limit = fx.pending(OrderSide::Buy, dec!(1), Some(dec!(10))).await;
        let outcome = fx.engine.try_fill(&limit, dec!(10), saturday).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Filled(_)));
    }

    #[tokio::test]
    async fn cancelled_order_is_not_filled() {
        let fx = fixture(dec!(1000), None).await;
        let mut order = fx.pending(OrderSide::Buy, dec!(1), None).await;
        order.mark_cancelled(Utc::now());
        let mut unit = fx.store.begin().await.unwrap();
        unit.save_order(&order).await.unwrap();
        unit.commit().await.unwrap();

        let outcome = fx.engine.try_fill(&order, dec!(10), Utc::now()).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::NotEligible(Ineligibility::NotPending(OrderStatus::Cancelled))
        );
        assert_eq!(fx.balance().await, dec!(1000));
    }

    #[tokio::test]
    async fn fill_new_persists_only_on_success() {
        let fx = fixture(dec!(100), None).await;
        let now = Utc::now();

        let rejected = Order::new(fx.portfolio.id, fx.stock.id, OrderSide::Buy, dec!(5), None, None, now);
        let err = fx.engine.fill_new(rejected.clone(), dec!(150), now).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InsufficientFunds { .. }));
        assert!(fx.store.get_order(rejected.id).await.unwrap().is_none());

        let accepted = Order::new(fx.portfolio.id, fx.stock.id, OrderSide::Buy, dec!(0.5), None, None, now);
        let filled = fx.engine.fill_new(accepted, dec!(150), now).await.unwrap();
        assert_eq!(filled.status, OrderStatus::Executed);
        assert_eq!(fx.store.get_order(filled.id).await.unwrap(), Some(filled));
        assert_eq!(fx.balance().await, dec!(25));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sells_cannot_oversell() {
        let fx = fixture(dec!(0), Some(dec!(10))).await;
        let first = fx.pending(OrderSide::Sell, dec!(6), None).await;
        let second = fx.pending(OrderSide::Sell, dec!(6), None).await;

        let (a, b) = tokio::join!(
            {
                let engine = fx.engine.clone();
                tokio::spawn(async move { engine.try_fill(&first, dec!(20), Utc::now()).await })
            },
            {
                let engine = fx.engine.clone();
                tokio::spawn(async move { engine.try_fill(&second, dec!(20), Utc::now()).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        let filled = results
            .iter()
            .filter(|r| matches!(r, Ok(FillOutcome::Filled(_))))
            .count();
        let short = results
            .iter()
            .filter(|r| {
                matches!(r, Err(ExecutionError::InsufficientShares { available, .. }) if *available == dec!(4))
            })
            .count();
        assert_eq!(filled, 1);
        assert_eq!(short, 1);
        assert_eq!(fx.held().await, Some(dec!(4)));
        assert_eq!(fx.balance().await, dec!(120));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buys_cannot_overspend() {
        let fx = fixture(dec!(1000), None).await;
        let first = fx.pending(OrderSide::Buy, dec!(4), None).await;
        let second = fx.pending(OrderSide::Buy, dec!(4), None).await;

        let (a, b) = tokio::join!(
            {
                let engine = fx.engine.clone();
                tokio::spawn(async move { engine.try_fill(&first, dec!(150), Utc::now()).await })
            },
            {
                let engine = fx.engine.clone();
                tokio::spawn(async move { engine.try_fill(&second, dec!(150), Utc::now()).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        let filled = results
            .iter()
            .filter(|r| matches!(r, Ok(FillOutcome::Filled(_))))
            .count();
        let short = results
            .iter()
            .filter(|r| {
                matches!(r, Err(ExecutionError::InsufficientFunds { available, .. }) if *available == dec!(400))
            })
            .count();
        assert_eq!(filled, 1);
        assert_eq!(short, 1);
        assert_eq!(fx.balance().await, dec!(400));
        assert_eq!(fx.held().await, Some(dec!(4)));
    }
}
