use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use engine::Services;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};

pub mod error;
pub mod extract;
pub mod handlers;

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

/// Builds the `/api` router over the given services.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any())
        .expose_headers(ExposeHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/users/current", get(handlers::current_user))
        .route(
            "/api/portfolios",
            get(handlers::list_portfolios).post(handlers::create_portfolio),
        )
        .route(
            "/api/portfolios/:id",
            get(handlers::get_portfolio)
                .put(handlers::rename_portfolio)
                .delete(handlers::delete_portfolio),
        )
        .route("/api/portfolios/:id/holdings", get(handlers::portfolio_holdings))
        .route("/api/portfolios/:id/orders", get(handlers::portfolio_orders))
        .route("/api/portfolios/:id/summary", get(handlers::portfolio_summary))
        .route("/api/portfolios/:id/deposit", post(handlers::deposit))
        .route("/api/portfolios/:id/withdraw", post(handlers::withdraw))
        .route("/api/orders", post(handlers::submit_order))
        .route(
            "/api/orders/:id",
            get(handlers::get_order)
                .put(handlers::update_order)
                .delete(handlers::cancel_order),
        )
        .route("/api/stocks", get(handlers::list_stocks))
        .route("/api/stocks/:id", get(handlers::get_stock))
        .route(
            "/api/watchlists",
            get(handlers::list_watchlists).post(handlers::create_watchlist),
        )
        .route(
            "/api/watchlists/:id",
            get(handlers::get_watchlist).delete(handlers::delete_watchlist),
        )
        .route("/api/watchlists/:id/stocks", post(handlers::add_watchlist_stock))
        .route(
            "/api/watchlists/:id/stocks/:stock_id",
            axum::routing::delete(handlers::remove_watchlist_stock),
        )
        .with_state(Arc::new(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
}

/// Serves the API on `addr` until `shutdown` resolves, then drains in-flight
/// requests.
pub async fn run_server<F>(addr: SocketAddr, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Web server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use chrono::Utc;
    use core_types::{Stock, User};
    use database::{MemoryStore, Store};
    use executor::MarketClock;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        app: Router,
        user: Uuid,
        stock: Uuid,
    }

    async fn test_app() -> TestApp {
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
            market_price: dec!(150),
            last_updated: now,
        };
        store.insert_stock(&stock).await.unwrap();

        let services = Services::new(Arc::new(store), MarketClock::always_open());
        TestApp {
            app: router(AppState { services }),
            user: user.id,
            stock: stock.id,
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(extract::USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let t = test_app().await;
        let response = t
            .app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_bad_identity_is_unauthorized() {
        let t = test_app().await;
        let (status, _) = send(&t.app, Method::GET, "/api/portfolios", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::get("/api/portfolios")
            .header(extract::USER_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn market_buy_round_trip() {
        let t = test_app().await;
        let (status, body) = send(
            &t.app,
            Method::POST,
            "/api/portfolios",
            Some(t.user),
            Some(json!({ "name": "Main", "portfolio_balance": "1000" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let portfolio_id = body["portfolio"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &t.app,
            Method::POST,
            "/api/orders",
            Some(t.user),
            Some(json!({
                "portfolio_id": portfolio_id,
                "stock_id": t.stock,
                "order_type": "buy",
                "quantity": "2"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["order"]["status"], "executed");

        let uri = format!("/api/portfolios/{portfolio_id}/holdings");
        let (status, body) = send(&t.app, Method::GET, &uri, Some(t.user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["holdings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_errors_are_itemized() {
        let t = test_app().await;
        let (status, body) = send(
            &t.app,
            Method::POST,
            "/api/orders",
            Some(t.user),
            Some(json!({ "order_type": "hold" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation error");
        assert!(body["errors"]["order_type"].is_string());
        assert!(body["errors"]["quantity"].is_string());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let t = test_app().await;
        let request = Request::post("/api/watchlists")
            .header(extract::USER_ID_HEADER, t.user.to_string())
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_users_portfolio_is_forbidden() {
        let t = test_app().await;
        let (_, body) = send(
            &t.app,
            Method::POST,
            "/api/portfolios",
            Some(t.user),
            Some(json!({ "name": "Main", "portfolio_balance": "0" })),
        )
        .await;
        let uri = format!("/api/portfolios/{}", body["portfolio"]["id"].as_str().unwrap());

        let (status, _) = send(&t.app, Method::GET, &uri, Some(Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = format!("/api/portfolios/{}", Uuid::new_v4());
        let (status, body) = send(&t.app, Method::GET, &missing, Some(t.user), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Portfolio not found");
    }

    #[tokio::test]
    async fn stock_search_filters_by_ticker() {
        let t = test_app().await;
        let (status, body) = send(&t.app, Method::GET, "/api/stocks?ticker=aa", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stocks"].as_array().unwrap().len(), 1);

        let (_, body) = send(&t.app, Method::GET, "/api/stocks?ticker=zz", None, None).await;
        assert!(body["stocks"].as_array().unwrap().is_empty());
    }
}
