use sqlx::{Error, Pool, Postgres};

/// Conditional claim, succeeds for exactly one caller per unreserved output.
pub async fn claim_utxo(output_id: i64, reservation: &str, pool: &Pool<Postgres>) -> Result<u64, Error> {
    let sql = "UPDATE outputs SET reserved_by = $2, touched_at = now()
        WHERE output_id = $1 AND reserved_by IS NULL AND spent_by IS NULL AND spendable";
    Ok(sqlx::query(sql).bind(output_id).bind(reservation).execute(pool).await?.rows_affected())
}

/// Drops claims that never made it into a persisted transaction.
pub async fn release_reservation(reservation: &str, pool: &Pool<Postgres>) -> Result<u64, Error> {
    let sql = "UPDATE outputs SET reserved_by = NULL, touched_at = now() WHERE reserved_by = $1 AND spent_by IS NULL";
    Ok(sqlx::query(sql).bind(reservation).execute(pool).await?.rows_affected())
}

/// Moves the record to `status` if it is still in one of `expected_statuses`, noting the change in its history.
pub async fn update_transaction_status(
    transaction_id: i64,
    expected_statuses: &[String],
    status: &str,
    note: &str,
    pool: &Pool<Postgres>,
) -> Result<u64, Error> {
    let mut tx = pool.begin().await?;
    let rows_affected =
        sqlx::query("UPDATE transactions SET status = $2, updated_at = now() WHERE transaction_id = $1 AND status = ANY($3)")
            .bind(transaction_id)
            .bind(status)
            .bind(expected_statuses)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    if rows_affected == 0 {
        tx.rollback().await?;
        return Ok(0);
    }
    sqlx::query("INSERT INTO tx_history (transaction_id, note) VALUES ($1, $2)")
        .bind(transaction_id)
        .bind(note)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(rows_affected)
}

/// Stores the signed bytes, the learned change scripts and the new status atomically.
/// Only applies while the record is still in one of `expected_statuses`.
pub async fn update_signed_transaction(
    transaction_id: i64,
    expected_statuses: &[String],
    txid: &str,
    raw_tx: &[u8],
    status: &str,
    change_scripts: &[(i64, Vec<u8>)],
    pool: &Pool<Postgres>,
) -> Result<u64, Error> {
    let mut tx = pool.begin().await?;
    let rows_affected = sqlx::query(
        "UPDATE transactions SET txid = $2, raw_tx = $3, status = $4, updated_at = now()
        WHERE transaction_id = $1 AND status = ANY($5)",
    )
    .bind(transaction_id)
    .bind(txid)
    .bind(raw_tx)
    .bind(status)
    .bind(expected_statuses)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if rows_affected == 0 {
        tx.rollback().await?;
        return Ok(0);
    }
    sqlx::query(
        "UPDATE outputs SET txid = $2, spendable = (basket_id IS NOT NULL AND locking_script IS NOT NULL), touched_at = now()
        WHERE transaction_id = $1",
    )
    .bind(transaction_id)
    .bind(txid)
    .execute(&mut *tx)
    .await?;
    for (output_id, locking_script) in change_scripts {
        sqlx::query("UPDATE outputs SET locking_script = $2, spendable = true, touched_at = now() WHERE output_id = $1")
            .bind(output_id)
            .bind(locking_script)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("INSERT INTO tx_history (transaction_id, note) VALUES ($1, $2)")
        .bind(transaction_id)
        .bind(format!("signed: {status}"))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(rows_affected)
}

/// Returns the inputs of a failed transaction to the spendable set and disables its outputs.
pub async fn release_transaction_inputs(transaction_id: i64, pool: &Pool<Postgres>) -> Result<u64, Error> {
    let mut tx = pool.begin().await?;
    let released = sqlx::query(
        "UPDATE outputs SET spent_by = NULL, reserved_by = NULL, spendable = true, touched_at = now() WHERE spent_by = $1",
    )
    .bind(transaction_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    sqlx::query("UPDATE outputs SET spendable = false, touched_at = now() WHERE transaction_id = $1")
        .bind(transaction_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(released)
}

pub async fn update_known_tx_status(txid: &str, status: &str, pool: &Pool<Postgres>) -> Result<u64, Error> {
    let sql = "UPDATE known_txs SET status = $2, attempts = attempts + 1, updated_at = now() WHERE txid = $1";
    Ok(sqlx::query(sql).bind(txid).bind(status).execute(pool).await?.rows_affected())
}
