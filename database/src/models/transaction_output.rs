use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct TransactionOutput {
    pub output_id: i64,
    pub user_id: i64,
    pub transaction_id: Option<i64>,
    pub basket_id: Option<i64>,
    pub txid: Option<String>,
    pub vout: i32,
    pub satoshis: i64,
    pub locking_script: Option<Vec<u8>>,
    pub is_change: bool,
    pub spendable: bool,
    pub provided_by: String,
    pub purpose: String,
    pub derivation_suffix: Option<String>,
    pub description: String,
    pub estimated_input_size: i32,
    pub spent_by: Option<i64>,
    pub reserved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransactionOutput {
    pub user_id: i64,
    pub basket_id: Option<i64>,
    pub txid: Option<String>,
    pub vout: i32,
    pub satoshis: i64,
    pub locking_script: Option<Vec<u8>>,
    pub is_change: bool,
    pub spendable: bool,
    pub provided_by: String,
    pub purpose: String,
    pub derivation_suffix: Option<String>,
    pub description: String,
    pub estimated_input_size: i32,
}
