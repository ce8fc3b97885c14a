use crate::accounts::owned_portfolio;
use crate::error::{EngineError, ValidationErrors};
use chrono::{DateTime, Utc};
use core_types::{parse_timestamp, Order, OrderRequest, OrderSide, OrderUpdate};
use database::Store;
use executor::ExecutionEngine;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

const QUANTITY_MESSAGE: &str = "Quantity must be a positive number.";
const TARGET_PRICE_MESSAGE: &str = "Target price must be a positive number.";

/// Accepts, amends and cancels orders on behalf of a user.
///
/// Immediate orders are executed synchronously through the
/// [`ExecutionEngine`]; limit and scheduled orders are stored `pending` and
/// left to the sweeper.
#[derive(Clone)]
pub struct OrderIntake {
    store: Arc<dyn Store>,
    engine: ExecutionEngine,
}

impl OrderIntake {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self {
            store: Arc::clone(engine.store()),
            engine,
        }
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        request: OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Order, EngineError> {
        let mut errors = ValidationErrors::new();

        if request.portfolio_id.is_none() {
            errors.add("portfolio_id", "Portfolio ID is required.");
        }
        if request.stock_id.is_none() {
            errors.add("stock_id", "Stock ID is required.");
        }
        let side = match request.order_type.as_deref().map(str::parse::<OrderSide>) {
            Some(Ok(side)) => Some(side),
            _ => {
                errors.add("order_type", "Order type must be either 'buy' or 'sell'.");
                None
            }
        };
        match request.quantity {
            Some(q) if q > Decimal::ZERO => {}
            _ => errors.add("quantity", QUANTITY_MESSAGE),
        }
        if request.target_price.is_some_and(|p| p <= Decimal::ZERO) {
            errors.add("target_price", TARGET_PRICE_MESSAGE);
        }
        let scheduled_time = match request.scheduled_time.as_deref() {
            Some(raw) => parse_schedule(raw, &mut errors),
            None => None,
        };

        let (Some(portfolio_id), Some(stock_id), Some(side), Some(quantity)) =
            (request.portfolio_id, request.stock_id, side, request.quantity)
        else {
            return Err(EngineError::Validation(errors));
        };
        errors.check()?;

        owned_portfolio(self.store.as_ref(), user_id, portfolio_id).await?;
        let stock = self
            .store
            .get_stock(stock_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Stock"))?;

        let order = Order::new(
            portfolio_id,
            stock_id,
            side,
            quantity,
            request.target_price,
            scheduled_time,
            now,
        );

        if !order.is_immediate() {
            let mut unit = self.store.begin().await?;
            unit.save_order(&order).await?;
            unit.commit().await?;
            tracing::info!(
                order_id = %order.id,
                portfolio_id = %portfolio_id,
                ticker = %stock.ticker_symbol,
                side = %side,
                "Resting order accepted."
            );
            return Ok(order);
        }

        if !self.engine.clock().is_open(now) {
            tracing::debug!(portfolio_id = %portfolio_id, "Immediate order rejected: market closed.");
            return Err(EngineError::MarketClosed);
        }

        let order = self.engine.fill_new(order, stock.market_price, now).await?;
        Ok(order)
    }

    /// Fetches an order owned by the user.
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, EngineError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order"))?;
        owned_portfolio(self.store.as_ref(), user_id, order.portfolio_id).await?;
        Ok(order)
    }

    /// Amends quantity, target price or schedule of a pending order.
    ///
    /// The change is made under the portfolio lock, so it cannot interleave
    /// with a fill of the same order.
    pub async fn update_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        update: OrderUpdate,
        now: DateTime<Utc>,
    ) -> Result<Order, EngineError> {
        let mut errors = ValidationErrors::new();
        if update.quantity.is_some_and(|q| q <= Decimal::ZERO) {
            errors.add("quantity", QUANTITY_MESSAGE);
        }
        if let Some(Some(price)) = update.target_price {
            if price <= Decimal::ZERO {
                errors.add("target_price", TARGET_PRICE_MESSAGE);
            }
        }
        let scheduled_time = match &update.scheduled_time {
            Some(Some(raw)) => Some(parse_schedule(raw, &mut errors)),
            Some(None) => Some(None),
            None => None,
        };
        errors.check()?;

        let existing = self.get_order(user_id, order_id).await?;

        let mut unit = self.store.begin().await?;
        unit.lock_portfolio(existing.portfolio_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Portfolio"))?;
        let mut order = unit
            .order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order"))?;
        if !order.is_pending() {
            return Err(EngineError::OrderNotPending(order_id));
        }

        if let Some(quantity) = update.quantity {
            order.quantity = quantity;
        }
        if let Some(target_price) = update.target_price {
            order.target_price = target_price;
        }
        if let Some(scheduled_time) = scheduled_time {
            order.scheduled_time = scheduled_time;
        }
        order.updated_at = now;

        unit.save_order(&order).await?;
        unit.commit().await?;

        tracing::info!(order_id = %order.id, "Order updated.");
        Ok(order)
    }

    /// Cancels a pending order. An order that has already executed or been
    /// cancelled is not touched and the call fails with `OrderNotPending`.
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Order, EngineError> {
        let existing = self.get_order(user_id, order_id).await?;

        let mut unit = self.store.begin().await?;
        unit.lock_portfolio(existing.portfolio_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Portfolio"))?;
        let mut order = unit
            .order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order"))?;
        if !order.is_pending() {
            return Err(EngineError::OrderNotPending(order_id));
        }

        order.mark_cancelled(now);
        unit.save_order(&order).await?;
        unit.commit().await?;

        tracing::info!(order_id = %order.id, "Order cancelled.");
        Ok(order)
    }
}

fn parse_schedule(raw: &str, errors: &mut ValidationErrors) -> Option<DateTime<Utc>> {
    match parse_timestamp(raw) {
        Ok(at) => Some(at),
        Err(e) => {
            errors.add("scheduled_time", e.message());
            None
        }
    }
}
