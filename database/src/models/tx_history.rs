use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct TxHistory {
    pub history_id: i64,
    pub transaction_id: i64,
    pub note: String,
    pub created_at: DateTime<Utc>,
}
