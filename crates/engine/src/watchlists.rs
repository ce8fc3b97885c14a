use crate::error::{EngineError, ValidationErrors};
use chrono::{DateTime, Utc};
use core_types::{Watchlist, WatchlistRequest, WatchlistStockRequest};
use database::Store;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct Watchlists {
    store: Arc<dyn Store>,
}

impl Watchlists {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        request: WatchlistRequest,
        now: DateTime<Utc>,
    ) -> Result<Watchlist, EngineError> {
        let name = request.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(EngineError::Validation(ValidationErrors::single(
                "name",
                "Watchlist name is required",
            )));
        }
        let watchlist = Watchlist {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            stock_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_watchlist(&watchlist).await?;
        Ok(watchlist)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Watchlist>, EngineError> {
        Ok(self.store.list_watchlists(user_id).await?)
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Watchlist, EngineError> {
        let watchlist = self
            .store
            .get_watchlist(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Watchlist"))?;
        if watchlist.user_id != user_id {
            return Err(EngineError::Forbidden);
        }
        Ok(watchlist)
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), EngineError> {
        self.get(user_id, id).await?;
        self.store.delete_watchlist(id).await?;
        Ok(())
    }

    pub async fn add_stock(
        &self,
        user_id: Uuid,
        id: Uuid,
        request: WatchlistStockRequest,
    ) -> Result<Watchlist, EngineError> {
        let Some(stock_id) = request.stock_id else {
            return Err(EngineError::Validation(ValidationErrors::single(
                "stock_id",
                "Stock ID is required",
            )));
        };
        self.get(user_id, id).await?;
        self.store
            .get_stock(stock_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Stock"))?;

        if !self.store.add_watchlist_stock(id, stock_id).await? {
            return Err(EngineError::Validation(ValidationErrors::single(
                "stock_id",
                "Stock is already in the watchlist",
            )));
        }
        self.get(user_id, id).await
    }

    pub async fn remove_stock(
        &self,
        user_id: Uuid,
        id: Uuid,
        stock_id: Uuid,
    ) -> Result<Watchlist, EngineError> {
        self.get(user_id, id).await?;
        if !self.store.remove_watchlist_stock(id, stock_id).await? {
            return Err(EngineError::not_found("Watchlist stock"));
        }
        self.get(user_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn stocks_are_added_once() {
        let fx = fixture(dec!(0)).await;
        let lists = Watchlists::new(fx.shared_store());
        let list = lists
            .create(fx.user.id, WatchlistRequest { name: Some("Tech".into()) }, Utc::now())
            .await
            .unwrap();

        let request = WatchlistStockRequest { stock_id: Some(fx.stock.id) };
        let list = lists.add_stock(fx.user.id, list.id, request.clone()).await.unwrap();
        assert_eq!(list.stock_ids, vec![fx.stock.id]);

        let err = lists.add_stock(fx.user.id, list.id, request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(e) if e.get("stock_id") == Some("Stock is already in the watchlist")));

        let list = lists.remove_stock(fx.user.id, list.id, fx.stock.id).await.unwrap();
        assert!(list.stock_ids.is_empty());
        let err = lists.remove_stock(fx.user.id, list.id, fx.stock.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn watchlists_are_private() {
        let fx = fixture(dec!(0)).await;
        let lists = Watchlists::new(fx.shared_store());
        let list = lists
            .create(fx.user.id, WatchlistRequest { name: Some("Mine".into()) }, Utc::now())
            .await
            .unwrap();
        let stranger = fx.other_user().await;

        assert!(matches!(lists.get(stranger, list.id).await, Err(EngineError::Forbidden)));
        assert!(matches!(lists.delete(stranger, list.id).await, Err(EngineError::Forbidden)));
        assert!(lists.list(stranger).await.unwrap().is_empty());

        lists.delete(fx.user.id, list.id).await.unwrap();
        assert!(matches!(lists.get(fx.user.id, list.id).await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn name_is_required() {
        let fx = fixture(dec!(0)).await;
        let lists = Watchlists::new(fx.shared_store());
        let err = lists.create(fx.user.id, WatchlistRequest::default(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
