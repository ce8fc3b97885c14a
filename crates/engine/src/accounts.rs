use crate::error::{EngineError, ValidationErrors};
use chrono::{DateTime, Utc};
use core_types::{
    Holding, Order, Portfolio, PortfolioRequest, PortfolioUpdate, TransferRequest, User,
};
use database::{Store, UnitOfWork};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Loads a portfolio and checks that `user_id` owns it.
pub(crate) async fn owned_portfolio(
    store: &dyn Store,
    user_id: Uuid,
    portfolio_id: Uuid,
) -> Result<Portfolio, EngineError> {
    let portfolio = store
        .get_portfolio(portfolio_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Portfolio"))?;
    if portfolio.user_id != user_id {
        return Err(EngineError::Forbidden);
    }
    Ok(portfolio)
}

/// A holding valued at the stock's current market price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub stock_id: Uuid,
    pub ticker_symbol: String,
    pub quantity: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub portfolio: Portfolio,
    pub positions: Vec<Position>,
    pub holdings_value: Decimal,
    /// Cash plus holdings.
    pub total_value: Decimal,
    /// `total_value - initial_investment`.
    pub gain_loss: Decimal,
}

/// Users, portfolios and the cash moving between them.
///
/// Every operation that changes a balance locks the user before the
/// portfolio.
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn Store>,
}

impl Accounts {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        cash_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<User, EngineError> {
        let mut errors = ValidationErrors::new();
        if username.trim().is_empty() {
            errors.add("username", "Username is required");
        }
        if !email.contains('@') {
            errors.add("email", "Email must be a valid address");
        }
        if cash_balance < Decimal::ZERO {
            errors.add("cash_balance", "Cash balance must be a non-negative number");
        }
        errors.check()?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            cash_balance,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "User registered.");
        Ok(user)
    }

    pub async fn user(&self, user_id: Uuid) -> Result<User, EngineError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("User"))
    }

    pub async fn list_portfolios(&self, user_id: Uuid) -> Result<Vec<Portfolio>, EngineError> {
        Ok(self.store.list_portfolios(user_id).await?)
    }

    pub async fn portfolio(&self, user_id: Uuid, id: Uuid) -> Result<Portfolio, EngineError> {
        owned_portfolio(self.store.as_ref(), user_id, id).await
    }

    pub async fn holdings(&self, user_id: Uuid, id: Uuid) -> Result<Vec<Holding>, EngineError> {
        owned_portfolio(self.store.as_ref(), user_id, id).await?;
        Ok(self.store.list_holdings(id).await?)
    }

    pub async fn orders(&self, user_id: Uuid, id: Uuid) -> Result<Vec<Order>, EngineError> {
        owned_portfolio(self.store.as_ref(), user_id, id).await?;
        Ok(self.store.list_orders(id).await?)
    }

    /// Values every holding at its stock's current price.
    pub async fn summary(&self, user_id: Uuid, id: Uuid) -> Result<PortfolioSummary, EngineError> {
        let portfolio = owned_portfolio(self.store.as_ref(), user_id, id).await?;
        let holdings = self.store.list_holdings(id).await?;

        let mut positions = Vec::with_capacity(holdings.len());
        for holding in holdings {
            let stock = self
                .store
                .get_stock(holding.stock_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Stock"))?;
            let market_value = EngineError::in_range(
                holding.quantity.checked_mul(stock.market_price),
                "holdings",
            )?;
            positions.push(Position {
                stock_id: stock.id,
                ticker_symbol: stock.ticker_symbol,
                quantity: holding.quantity,
                market_price: stock.market_price,
                market_value,
            });
        }

        let holdings_value = positions.iter().try_fold(Decimal::ZERO, |sum, p| {
            EngineError::in_range(sum.checked_add(p.market_value), "holdings")
        })?;
        let total_value = EngineError::in_range(
            portfolio.portfolio_balance.checked_add(holdings_value),
            "holdings",
        )?;
        let gain_loss = EngineError::in_range(
            total_value.checked_sub(portfolio.initial_investment),
            "holdings",
        )?;
        Ok(PortfolioSummary {
            portfolio,
            positions,
            holdings_value,
            total_value,
            gain_loss,
        })
    }

    /// Opens a portfolio funded from the user's cash.
    pub async fn create_portfolio(
        &self,
        user_id: Uuid,
        request: PortfolioRequest,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        let name = request.name.as_deref().map(str::trim).unwrap_or_default();
        let balance = request.portfolio_balance.unwrap_or(Decimal::ZERO);

        let mut errors = ValidationErrors::new();
        if name.is_empty() {
            errors.add("name", "Portfolio name is required");
        }
        if balance < Decimal::ZERO {
            errors.add("portfolio_balance", "Portfolio balance must be a non-negative number");
        }
        errors.check()?;

        let mut unit = self.store.begin().await?;
        let mut user = unit
            .lock_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("User"))?;
        if user.cash_balance < balance {
            return Err(EngineError::InsufficientFunds {
                required: balance,
                available: user.cash_balance,
            });
        }

        user.cash_balance -= balance;
        user.updated_at = now;
        let portfolio = Portfolio {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            portfolio_balance: balance,
            initial_investment: balance,
            created_at: now,
            updated_at: now,
        };
        unit.save_user(&user).await?;
        unit.save_portfolio(&portfolio).await?;
        unit.commit().await?;

        tracing::info!(portfolio_id = %portfolio.id, user_id = %user_id, balance = %balance, "Portfolio created.");
        Ok(portfolio)
    }

    pub async fn rename_portfolio(
        &self,
        user_id: Uuid,
        id: Uuid,
        update: PortfolioUpdate,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        let Some(name) = update.name.as_deref().map(str::trim) else {
            return self.portfolio(user_id, id).await;
        };
        if name.is_empty() {
            return Err(EngineError::Validation(ValidationErrors::single(
                "name",
                "Portfolio name is required",
            )));
        }

        let mut unit = self.store.begin().await?;
        let mut portfolio = lock_owned(&mut *unit, user_id, id).await?;
        portfolio.name = name.to_string();
        portfolio.updated_at = now;
        unit.save_portfolio(&portfolio).await?;
        unit.commit().await?;
        Ok(portfolio)
    }

    /// Moves cash from the user into the portfolio.
    pub async fn deposit(
        &self,
        user_id: Uuid,
        id: Uuid,
        request: TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        let amount = transfer_amount(&request)?;

        let mut unit = self.store.begin().await?;
        let mut user = unit
            .lock_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("User"))?;
        let mut portfolio = lock_owned(&mut *unit, user_id, id).await?;
        if user.cash_balance < amount {
            return Err(EngineError::InsufficientFunds {
                required: amount,
                available: user.cash_balance,
            });
        }

        portfolio.portfolio_balance =
            EngineError::in_range(portfolio.portfolio_balance.checked_add(amount), "amount")?;
        user.cash_balance -= amount;
        user.updated_at = now;
        portfolio.updated_at = now;
        unit.save_user(&user).await?;
        unit.save_portfolio(&portfolio).await?;
        unit.commit().await?;

        tracing::info!(portfolio_id = %id, amount = %amount, "Deposit.");
        Ok(portfolio)
    }

    /// Moves cash from the portfolio back to the user.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        id: Uuid,
        request: TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        let amount = transfer_amount(&request)?;

        let mut unit = self.store.begin().await?;
        let mut user = unit
            .lock_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("User"))?;
        let mut portfolio = lock_owned(&mut *unit, user_id, id).await?;
        if portfolio.portfolio_balance < amount {
            return Err(EngineError::InsufficientFunds {
                required: amount,
                available: portfolio.portfolio_balance,
            });
        }

        user.cash_balance = EngineError::in_range(user.cash_balance.checked_add(amount), "amount")?;
        portfolio.portfolio_balance -= amount;
        portfolio.updated_at = now;
        user.updated_at = now;
        unit.save_user(&user).await?;
        unit.save_portfolio(&portfolio).await?;
        unit.commit().await?;

        tracing::info!(portfolio_id = %id, amount = %amount, "Withdrawal.");
        Ok(portfolio)
    }

    /// Closes an empty portfolio and returns its cash to the user. Its order
    /// history goes with it.
    pub async fn delete_portfolio(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut unit = self.store.begin().await?;
        let mut user = unit
            .lock_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("User"))?;
        let portfolio = lock_owned(&mut *unit, user_id, id).await?;

        if unit.holdings_count(id).await? > 0 {
            return Err(EngineError::Validation(ValidationErrors::single(
                "holdings",
                "Please liquidate all holdings before deleting the portfolio.",
            )));
        }

        user.cash_balance = EngineError::in_range(
            user.cash_balance.checked_add(portfolio.portfolio_balance),
            "portfolio_balance",
        )?;
        user.updated_at = now;
        unit.save_user(&user).await?;
        unit.delete_portfolio(id).await?;
        unit.commit().await?;

        tracing::info!(portfolio_id = %id, returned = %portfolio.portfolio_balance, "Portfolio deleted.");
        Ok(())
    }
}

async fn lock_owned(
    unit: &mut dyn UnitOfWork,
    user_id: Uuid,
    id: Uuid,
) -> Result<Portfolio, EngineError> {
    let portfolio = unit
        .lock_portfolio(id)
        .await?
        .ok_or_else(|| EngineError::not_found("Portfolio"))?;
    if portfolio.user_id != user_id {
        return Err(EngineError::Forbidden);
    }
    Ok(portfolio)
}

fn transfer_amount(request: &TransferRequest) -> Result<Decimal, EngineError> {
    match request.amount {
        Some(amount) if amount > Decimal::ZERO => Ok(amount),
        _ => Err(EngineError::Validation(ValidationErrors::single(
            "amount",
            "Amount must be a positive number",
        ))),
    }
}
