use log::trace;
use sqlx::{Error, Pool, Postgres};

use crate::models::basket::Basket;

/// Returns the existing basket or creates it with the given policy.
pub async fn upsert_basket(
    user_id: i64,
    name: &str,
    desired_utxo_count: i32,
    min_utxo_value: i64,
    pool: &Pool<Postgres>,
) -> Result<Basket, Error> {
    trace!("Upserting basket '{}' for user {}", name, user_id);
    let sql = "INSERT INTO baskets (user_id, name, desired_utxo_count, min_utxo_value) VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
        RETURNING basket_id, user_id, name, desired_utxo_count, min_utxo_value, created_at";
    sqlx::query_as::<_, Basket>(sql).bind(user_id).bind(name).bind(desired_utxo_count).bind(min_utxo_value).fetch_one(pool).await
}

/// Registers a broadcast request for `txid` and returns its current status, 'unsent' when new.
pub async fn upsert_known_tx(txid: &str, raw_tx: &[u8], input_proof: &[u8], pool: &Pool<Postgres>) -> Result<String, Error> {
    let sql = "INSERT INTO known_txs (txid, raw_tx, input_proof) VALUES ($1, $2, $3)
        ON CONFLICT (txid) DO UPDATE SET updated_at = now()
        RETURNING status";
    sqlx::query_scalar(sql).bind(txid).bind(raw_tx).bind(input_proof).fetch_one(pool).await
}
