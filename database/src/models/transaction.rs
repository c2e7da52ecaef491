use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub transaction_id: i64,
    pub user_id: i64,
    pub status: String,
    pub reference: String,
    pub txid: Option<String>,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub description: String,
    pub version: i64,
    pub lock_time: i64,
    pub broadcast_mode: String,
    pub raw_tx: Option<Vec<u8>>,
    pub input_proof: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i64,
    pub status: String,
    pub reference: String,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub description: String,
    pub version: i64,
    pub lock_time: i64,
    pub broadcast_mode: String,
    pub input_proof: Option<Vec<u8>>,
}
