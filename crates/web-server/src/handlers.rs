use crate::{
    error::AppError,
    extract::{AppJson, CurrentUser},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use core_types::{
    OrderRequest, OrderUpdate, PortfolioRequest, PortfolioUpdate, StockQuery, TransferRequest,
    WatchlistRequest, WatchlistStockRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

type Reply = Result<Json<Value>, AppError>;
type Created = Result<(StatusCode, Json<Value>), AppError>;

/// # GET /api/users/current
pub async fn current_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Reply {
    let user = state.services.accounts.user(user_id).await?;
    Ok(Json(json!({ "user": user })))
}

// --- Portfolios ---

/// # GET /api/portfolios
pub async fn list_portfolios(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Reply {
    let portfolios = state.services.accounts.list_portfolios(user_id).await?;
    Ok(Json(json!({ "portfolios": portfolios })))
}

/// # POST /api/portfolios
/// Funds the new portfolio from the caller's cash balance.
pub async fn create_portfolio(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    AppJson(request): AppJson<PortfolioRequest>,
) -> Created {
    let portfolio = state
        .services
        .accounts
        .create_portfolio(user_id, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "portfolio": portfolio }))))
}

/// # GET /api/portfolios/:id
pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let portfolio = state.services.accounts.portfolio(user_id, id).await?;
    Ok(Json(json!({ "portfolio": portfolio })))
}

/// # PUT /api/portfolios/:id
pub async fn rename_portfolio(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    AppJson(update): AppJson<PortfolioUpdate>,
) -> Reply {
    let portfolio = state
        .services
        .accounts
        .rename_portfolio(user_id, id, update, Utc::now())
        .await?;
    Ok(Json(json!({ "portfolio": portfolio })))
}

/// # DELETE /api/portfolios/:id
pub async fn delete_portfolio(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    state
        .services
        .accounts
        .delete_portfolio(user_id, id, Utc::now())
        .await?;
    Ok(Json(json!({ "message": "Portfolio deleted successfully" })))
}

/// # GET /api/portfolios/:id/holdings
pub async fn portfolio_holdings(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let holdings = state.services.accounts.holdings(user_id, id).await?;
    Ok(Json(json!({ "holdings": holdings })))
}

/// # GET /api/portfolios/:id/orders
pub async fn portfolio_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let orders = state.services.accounts.orders(user_id, id).await?;
    Ok(Json(json!({ "orders": orders })))
}

/// # GET /api/portfolios/:id/summary
pub async fn portfolio_summary(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let summary = state.services.accounts.summary(user_id, id).await?;
    Ok(Json(json!({ "summary": summary })))
}

/// # POST /api/portfolios/:id/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<TransferRequest>,
) -> Reply {
    let portfolio = state
        .services
        .accounts
        .deposit(user_id, id, request, Utc::now())
        .await?;
    Ok(Json(json!({ "portfolio": portfolio })))
}

/// # POST /api/portfolios/:id/withdraw
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<TransferRequest>,
) -> Reply {
    let portfolio = state
        .services
        .accounts
        .withdraw(user_id, id, request, Utc::now())
        .await?;
    Ok(Json(json!({ "portfolio": portfolio })))
}

// --- Orders ---

/// # POST /api/orders
/// Immediate orders come back already executed; everything else is stored
/// as pending for the sweeper.
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    AppJson(request): AppJson<OrderRequest>,
) -> Created {
    let order = state
        .services
        .intake
        .submit(user_id, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "order": order }))))
}

/// # GET /api/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let order = state.services.intake.get_order(user_id, id).await?;
    Ok(Json(json!({ "order": order })))
}

/// # PUT /api/orders/:id
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    AppJson(update): AppJson<OrderUpdate>,
) -> Reply {
    let order = state
        .services
        .intake
        .update_order(user_id, id, update, Utc::now())
        .await?;
    Ok(Json(json!({ "order": order })))
}

/// # DELETE /api/orders/:id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let order = state
        .services
        .intake
        .cancel_order(user_id, id, Utc::now())
        .await?;
    Ok(Json(json!({ "order": order, "message": "Order canceled successfully" })))
}

// --- Stocks ---

/// # GET /api/stocks?ticker=&company=
pub async fn list_stocks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StockQuery>,
) -> Reply {
    let stocks = state.services.catalog.list(query).await?;
    Ok(Json(json!({ "stocks": stocks })))
}

/// # GET /api/stocks/:id
pub async fn get_stock(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Reply {
    let stock = state.services.catalog.get(id).await?;
    Ok(Json(json!({ "stock": stock })))
}

// --- Watchlists ---

/// # GET /api/watchlists
pub async fn list_watchlists(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Reply {
    let watchlists = state.services.watchlists.list(user_id).await?;
    Ok(Json(json!({ "watchlists": watchlists })))
}

/// # POST /api/watchlists
pub async fn create_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    AppJson(request): AppJson<WatchlistRequest>,
) -> Created {
    let watchlist = state
        .services
        .watchlists
        .create(user_id, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "watchlist": watchlist }))))
}

/// # GET /api/watchlists/:id
pub async fn get_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    let watchlist = state.services.watchlists.get(user_id, id).await?;
    Ok(Json(json!({ "watchlist": watchlist })))
}

/// # DELETE /api/watchlists/:id
pub async fn delete_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Reply {
    state.services.watchlists.delete(user_id, id).await?;
    Ok(Json(json!({ "message": "Watchlist deleted successfully" })))
}

/// # POST /api/watchlists/:id/stocks
pub async fn add_watchlist_stock(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    AppJson(request): AppJson<WatchlistStockRequest>,
) -> Reply {
    let watchlist = state
        .services
        .watchlists
        .add_stock(user_id, id, request)
        .await?;
    Ok(Json(json!({
        "watchlist": watchlist,
        "message": "Stock added to watchlist successfully"
    })))
}

/// # DELETE /api/watchlists/:id/stocks/:stock_id
pub async fn remove_watchlist_stock(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path((id, stock_id)): Path<(Uuid, Uuid)>,
) -> Reply {
    let watchlist = state
        .services
        .watchlists
        .remove_stock(user_id, id, stock_id)
        .await?;
    Ok(Json(json!({
        "watchlist": watchlist,
        "message": "Stock removed from watchlist successfully"
    })))
}
