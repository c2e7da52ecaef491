use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use sqlx::{Pool, Postgres};

use crate::models::basket::Basket;
use crate::query::upsert::upsert_basket;

/// Thread-safe in-memory cache for (user_id, basket name) → basket lookups.
/// Baskets are never deleted, so entries stay valid for the lifetime of the process.
#[derive(Clone, Default)]
pub struct BasketCache {
    cache: Arc<RwLock<HashMap<(i64, String), Basket>>>,
}

impl BasketCache {
    pub fn new() -> Self {
        BasketCache { cache: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Returns the cached basket, or upserts it with the given policy and caches the stored row
    pub async fn find_or_insert(
        &self,
        user_id: i64,
        name: &str,
        desired_utxo_count: i32,
        min_utxo_value: i64,
        pool: &Pool<Postgres>,
    ) -> Result<Basket, sqlx::Error> {
        if let Some(basket) = self.get(user_id, name) {
            return Ok(basket);
        }
        let basket = upsert_basket(user_id, name, desired_utxo_count, min_utxo_value, pool).await?;
        debug!("Basket '{}' for user {} → basket_id {}", name, user_id, basket.basket_id);
        self.insert(basket.clone());
        Ok(basket)
    }

    pub fn get(&self, user_id: i64, name: &str) -> Option<Basket> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(&(user_id, name.to_string())).cloned()
    }

    pub fn insert(&self, basket: Basket) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert((basket.user_id, basket.name.clone()), basket);
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn basket(user_id: i64, name: &str, basket_id: i64) -> Basket {
        Basket { basket_id, user_id, name: name.to_string(), desired_utxo_count: 32, min_utxo_value: 1000, created_at: Utc::now() }
    }

    #[test]
    fn test_basket_cache_new() {
        let cache = BasketCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get(1, "default").map(|b| b.basket_id), None);
    }

    #[test]
    fn test_basket_cache_is_keyed_by_user() {
        let cache = BasketCache::new();
        cache.insert(basket(1, "default", 10));
        cache.insert(basket(2, "default", 20));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1, "default").map(|b| b.basket_id), Some(10));
        assert_eq!(cache.get(2, "default").map(|b| b.basket_id), Some(20));
        assert_eq!(cache.get(3, "default").map(|b| b.basket_id), None);
    }
}
