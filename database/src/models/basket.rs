use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Basket {
    pub basket_id: i64,
    pub user_id: i64,
    pub name: String,
    pub desired_utxo_count: i32,
    pub min_utxo_value: i64,
    pub created_at: DateTime<Utc>,
}
