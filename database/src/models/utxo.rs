use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Spendable projection of an output row, as consumed by funding.
#[derive(Debug, Clone, FromRow)]
pub struct Utxo {
    pub output_id: i64,
    pub user_id: i64,
    pub basket_id: Option<i64>,
    pub txid: Option<String>,
    pub vout: i32,
    pub satoshis: i64,
    pub estimated_input_size: i32,
    pub reserved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}
