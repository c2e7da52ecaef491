use itertools::Itertools;

/// Builds `($1, $2), ($3, $4), ...` for multi-row VALUES clauses.
pub fn generate_placeholders(rows: usize, columns: usize) -> String {
    (0..rows).map(|row| format!("({})", (1..=columns).map(|col| format!("${}", row * columns + col)).join(", "))).join(", ")
}

pub const OUTPUT_COLUMNS: &str = "output_id, user_id, transaction_id, basket_id, txid, vout, satoshis, locking_script, is_change,
    spendable, provided_by, purpose, derivation_suffix, description, estimated_input_size, spent_by, reserved_by, created_at, touched_at";

pub const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, status, reference, txid, is_outgoing, satoshis, description, version,
    lock_time, broadcast_mode, raw_tx, input_proof, created_at, updated_at";
