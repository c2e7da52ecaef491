use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Error, Pool, Postgres};

use crate::models::commission::NewCommission;
use crate::models::transaction::NewTransaction;
use crate::models::transaction_output::NewTransactionOutput;
use crate::query::common::generate_placeholders;

/// Persists a created action in one database transaction: the record, its outputs, the spend marks
/// on its reserved inputs, the optional commission and the first history note.
/// Returns `None` (and rolls back) if any input is no longer reserved under the record's reference.
pub async fn insert_transaction(
    transaction: &NewTransaction,
    outputs: &[NewTransactionOutput],
    input_output_ids: &[i64],
    commission: Option<&NewCommission>,
    pool: &Pool<Postgres>,
) -> Result<Option<i64>, Error> {
    let mut tx = pool.begin().await?;

    let transaction_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (user_id, status, reference, is_outgoing, satoshis, description, version, lock_time,
            broadcast_mode, input_proof)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING transaction_id",
    )
    .bind(transaction.user_id)
    .bind(&transaction.status)
    .bind(&transaction.reference)
    .bind(transaction.is_outgoing)
    .bind(transaction.satoshis)
    .bind(&transaction.description)
    .bind(transaction.version)
    .bind(transaction.lock_time)
    .bind(&transaction.broadcast_mode)
    .bind(&transaction.input_proof)
    .fetch_one(&mut *tx)
    .await?;

    if !outputs.is_empty() {
        let sql = insert_outputs_sql(outputs.len());
        bind_outputs(sqlx::query(&sql), transaction_id, outputs).execute(&mut *tx).await?;
    }

    let spent = sqlx::query(
        "UPDATE outputs SET spent_by = $1, spendable = false, touched_at = now()
        WHERE output_id = ANY($2) AND reserved_by = $3 AND spent_by IS NULL",
    )
    .bind(transaction_id)
    .bind(input_output_ids)
    .bind(&transaction.reference)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if spent != input_output_ids.len() as u64 {
        tx.rollback().await?;
        return Ok(None);
    }

    if let Some(commission) = commission {
        sqlx::query(
            "INSERT INTO commissions (user_id, transaction_id, satoshis, key_offset, locking_script) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(commission.user_id)
        .bind(transaction_id)
        .bind(commission.satoshis)
        .bind(&commission.key_offset)
        .bind(&commission.locking_script)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("INSERT INTO tx_history (transaction_id, note) VALUES ($1, $2)")
        .bind(transaction_id)
        .bind(format!("created: {}", transaction.status))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(transaction_id))
}

fn insert_outputs_sql(rows: usize) -> String {
    const COLS: usize = 14;
    format!(
        "INSERT INTO outputs (transaction_id, user_id, basket_id, txid, vout, satoshis, locking_script, is_change, spendable,
            provided_by, purpose, derivation_suffix, description, estimated_input_size)
        VALUES {}",
        generate_placeholders(rows, COLS)
    )
}

fn bind_outputs<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    transaction_id: i64,
    outputs: &'q [NewTransactionOutput],
) -> Query<'q, Postgres, PgArguments> {
    for output in outputs {
        query = query.bind(transaction_id);
        query = query.bind(output.user_id);
        query = query.bind(output.basket_id);
        query = query.bind(&output.txid);
        query = query.bind(output.vout);
        query = query.bind(output.satoshis);
        query = query.bind(&output.locking_script);
        query = query.bind(output.is_change);
        query = query.bind(output.spendable);
        query = query.bind(&output.provided_by);
        query = query.bind(&output.purpose);
        query = query.bind(&output.derivation_suffix);
        query = query.bind(&output.description);
        query = query.bind(output.estimated_input_size);
    }
    query
}

pub async fn insert_tx_history(transaction_id: i64, note: &str, pool: &Pool<Postgres>) -> Result<u64, Error> {
    Ok(sqlx::query("INSERT INTO tx_history (transaction_id, note) VALUES ($1, $2)")
        .bind(transaction_id)
        .bind(note)
        .execute(pool)
        .await?
        .rows_affected())
}
