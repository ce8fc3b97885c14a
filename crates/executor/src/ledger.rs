use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use core_types::{Holding, Order, OrderSide, Portfolio};
use rust_decimal::Decimal;

/// What a fill does to the portfolio's position in the traded stock.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingChange {
    /// Insert or update the holding.
    Upsert(Holding),
    /// The position went to zero; drop the row.
    Remove(Holding),
}

/// Applies a fill of `order` at `price` to the portfolio's cash and the
/// current holding of the stock.
///
/// This is the whole state transition of a fill. It does not check
/// eligibility and does not persist anything; on error neither argument has
/// been touched.
pub fn apply_fill(
    portfolio: &mut Portfolio,
    holding: Option<Holding>,
    order: &Order,
    price: Decimal,
    now: DateTime<Utc>,
) -> Result<HoldingChange, ExecutionError> {
    let overflow = || ExecutionError::AmountOverflow {
        quantity: order.quantity,
        price,
    };
    let amount = order.quantity.checked_mul(price).ok_or_else(overflow)?;

    let change = match order.side {
        OrderSide::Buy => {
            if portfolio.portfolio_balance < amount {
                return Err(ExecutionError::InsufficientFunds {
                    required: amount,
                    available: portfolio.portfolio_balance,
                });
            }
            let mut holding = holding.unwrap_or_else(|| {
                Holding::new(order.portfolio_id, order.stock_id, Decimal::ZERO, now)
            });
            let quantity = holding.quantity.checked_add(order.quantity).ok_or_else(overflow)?;

            portfolio.portfolio_balance -= amount;
            holding.quantity = quantity;
            holding.updated_at = now;
            HoldingChange::Upsert(holding)
        }
        OrderSide::Sell => {
            let available = holding.as_ref().map_or(Decimal::ZERO, |h| h.quantity);
            let mut holding = match holding {
                Some(h) if h.quantity >= order.quantity => h,
                _ => {
                    return Err(ExecutionError::InsufficientShares {
                        requested: order.quantity,
                        available,
                    });
                }
            };
            let balance = portfolio
                .portfolio_balance
                .checked_add(amount)
                .ok_or_else(overflow)?;

            portfolio.portfolio_balance = balance;
            holding.quantity -= order.quantity;
            holding.updated_at = now;
            if holding.quantity.is_zero() {
                HoldingChange::Remove(holding)
            } else {
                HoldingChange::Upsert(holding)
            }
        }
    };

    portfolio.updated_at = now;
    Ok(change)
}
