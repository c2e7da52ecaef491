use chrono::{DateTime, Utc};
use sqlx::{Error, Pool, Postgres};

use crate::models::transaction::Transaction;
use crate::models::transaction_output::TransactionOutput;
use crate::models::tx_history::TxHistory;
use crate::models::utxo::Utxo;
use crate::query::common::{OUTPUT_COLUMNS, TRANSACTION_COLUMNS};

const UTXO_COLUMNS: &str = "output_id, user_id, basket_id, txid, vout, satoshis, estimated_input_size, reserved_by, created_at, touched_at";

/// Unclaimed spendable outputs ordered by value, largest first, resuming after `after` = (satoshis, output_id).
pub async fn select_spendable_utxos(
    user_id: i64,
    basket_id: i64,
    after: Option<(i64, i64)>,
    limit: i64,
    pool: &Pool<Postgres>,
) -> Result<Vec<Utxo>, Error> {
    let sql = format!(
        "SELECT {UTXO_COLUMNS} FROM outputs
        WHERE user_id = $1 AND basket_id = $2 AND spendable AND spent_by IS NULL AND reserved_by IS NULL AND txid IS NOT NULL
          AND ($3::BIGINT IS NULL OR (satoshis, output_id) < ($3, $4))
        ORDER BY satoshis DESC, output_id DESC
        LIMIT $5"
    );
    sqlx::query_as::<_, Utxo>(&sql)
        .bind(user_id)
        .bind(basket_id)
        .bind(after.map(|(satoshis, _)| satoshis))
        .bind(after.map(|(_, output_id)| output_id).unwrap_or(0))
        .bind(limit)
        .fetch_all(pool)
        .await
}

pub async fn count_spendable_utxos(user_id: i64, basket_id: i64, pool: &Pool<Postgres>) -> Result<i64, Error> {
    let sql = "SELECT COUNT(*) FROM outputs
        WHERE user_id = $1 AND basket_id = $2 AND spendable AND spent_by IS NULL AND reserved_by IS NULL AND txid IS NOT NULL";
    sqlx::query_scalar(sql).bind(user_id).bind(basket_id).fetch_one(pool).await
}

pub async fn select_utxo_by_outpoint(user_id: i64, txid: &str, vout: i32, pool: &Pool<Postgres>) -> Result<Option<Utxo>, Error> {
    let sql = format!(
        "SELECT {UTXO_COLUMNS} FROM outputs
        WHERE user_id = $1 AND txid = $2 AND vout = $3 AND spendable AND spent_by IS NULL"
    );
    sqlx::query_as::<_, Utxo>(&sql).bind(user_id).bind(txid).bind(vout).fetch_optional(pool).await
}

pub async fn select_transaction_by_reference(
    user_id: i64,
    reference: &str,
    pool: &Pool<Postgres>,
) -> Result<Option<Transaction>, Error> {
    let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = $1 AND reference = $2");
    sqlx::query_as::<_, Transaction>(&sql).bind(user_id).bind(reference).fetch_optional(pool).await
}

pub async fn select_transactions_by_status(
    statuses: &[String],
    updated_before: DateTime<Utc>,
    limit: i64,
    pool: &Pool<Postgres>,
) -> Result<Vec<Transaction>, Error> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
        WHERE status = ANY($1) AND updated_at < $2
        ORDER BY updated_at
        LIMIT $3"
    );
    sqlx::query_as::<_, Transaction>(&sql).bind(statuses).bind(updated_before).bind(limit).fetch_all(pool).await
}

pub async fn select_outputs_by_transaction(transaction_id: i64, pool: &Pool<Postgres>) -> Result<Vec<TransactionOutput>, Error> {
    let sql = format!("SELECT {OUTPUT_COLUMNS} FROM outputs WHERE transaction_id = $1 ORDER BY vout");
    sqlx::query_as::<_, TransactionOutput>(&sql).bind(transaction_id).fetch_all(pool).await
}

pub async fn select_inputs_by_transaction(transaction_id: i64, pool: &Pool<Postgres>) -> Result<Vec<TransactionOutput>, Error> {
    let sql = format!("SELECT {OUTPUT_COLUMNS} FROM outputs WHERE spent_by = $1 ORDER BY output_id");
    sqlx::query_as::<_, TransactionOutput>(&sql).bind(transaction_id).fetch_all(pool).await
}

pub async fn select_tx_history(transaction_id: i64, pool: &Pool<Postgres>) -> Result<Vec<TxHistory>, Error> {
    let sql = "SELECT history_id, transaction_id, note, created_at FROM tx_history WHERE transaction_id = $1 ORDER BY history_id";
    sqlx::query_as::<_, TxHistory>(sql).bind(transaction_id).fetch_all(pool).await
}
