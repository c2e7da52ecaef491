use crate::actions::status::TxStatus;
use crate::error::{WalletError, to_i64, to_u64};
use crate::storage::{
    Basket, BasketStore, ClaimOutcome, NewTransaction, OutputRecord, OutputStore, Page, TransactionRecord, TransactionStore,
    Utxo, UtxoStore,
};
use crate::tx::{OutPoint, TxId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use wallet_storage_cli::storage_config::BasketPolicy;
use wallet_storage_database::basket_cache::BasketCache;
use wallet_storage_database::client::WalletDbClient;
use wallet_storage_database::models;

/// Postgres backed storage, the claim semantics come from conditional updates in the database crate
#[derive(Clone)]
pub struct PostgresStore {
    client: WalletDbClient,
    baskets: BasketCache,
}

impl PostgresStore {
    pub fn new(client: WalletDbClient) -> Self {
        PostgresStore { client, baskets: BasketCache::new() }
    }

    pub fn client(&self) -> &WalletDbClient {
        &self.client
    }
}

fn to_u32(value: i64, field: &str) -> Result<u32, WalletError> {
    u32::try_from(value).map_err(|_| WalletError::Unexpected(format!("{field} out of range: {value}")))
}

fn to_vout(vout: i32) -> Result<u32, WalletError> {
    u32::try_from(vout).map_err(|_| WalletError::Unexpected(format!("negative vout {vout}")))
}

fn from_vout(vout: u32) -> Result<i32, WalletError> {
    i32::try_from(vout).map_err(|_| WalletError::validation(format!("vout {vout} out of range")))
}

fn utxo_from_row(row: models::utxo::Utxo) -> Result<Utxo, WalletError> {
    let txid = row
        .txid
        .as_deref()
        .ok_or_else(|| WalletError::Unexpected(format!("spendable output {} has no txid", row.output_id)))?
        .parse::<TxId>()?;
    Ok(Utxo {
        output_id: row.output_id,
        user_id: row.user_id,
        basket_id: row.basket_id,
        outpoint: OutPoint::new(txid, to_vout(row.vout)?),
        satoshis: to_u64(row.satoshis, "satoshis")?,
        estimated_input_size: to_u64(row.estimated_input_size as i64, "estimated_input_size")?,
        reserved_by: row.reserved_by,
    })
}

fn output_from_row(row: models::transaction_output::TransactionOutput) -> Result<OutputRecord, WalletError> {
    Ok(OutputRecord {
        output_id: row.output_id,
        vout: to_vout(row.vout)?,
        satoshis: to_u64(row.satoshis, "satoshis")?,
        locking_script: row.locking_script,
        basket_id: row.basket_id,
        is_change: row.is_change,
        spendable: row.spendable,
        provided_by: row.provided_by.parse()?,
        purpose: row.purpose,
        derivation_suffix: row.derivation_suffix,
        description: row.description,
    })
}

fn transaction_from_row(row: models::transaction::Transaction) -> Result<TransactionRecord, WalletError> {
    Ok(TransactionRecord {
        transaction_id: row.transaction_id,
        user_id: row.user_id,
        status: row.status.parse()?,
        reference: row.reference,
        txid: row.txid.as_deref().map(str::parse::<TxId>).transpose()?,
        is_outgoing: row.is_outgoing,
        satoshis: row.satoshis,
        description: row.description,
        version: to_u32(row.version, "version")?,
        lock_time: to_u32(row.lock_time, "lock_time")?,
        broadcast_mode: row.broadcast_mode.parse()?,
        raw_tx: row.raw_tx,
        input_proof: row.input_proof,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn basket_from_row(row: models::basket::Basket) -> Result<Basket, WalletError> {
    Ok(Basket {
        basket_id: row.basket_id,
        user_id: row.user_id,
        name: row.name,
        desired_utxo_count: to_u32(row.desired_utxo_count as i64, "desired_utxo_count")?,
        min_utxo_value: to_u64(row.min_utxo_value, "min_utxo_value")?,
    })
}

fn status_strings(statuses: &[TxStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl UtxoStore for PostgresStore {
    async fn find_candidates(&self, user_id: i64, basket_id: i64, page: Page) -> Result<Vec<Utxo>, WalletError> {
        let after = match page.after {
            Some(cursor) => Some((to_i64(cursor.satoshis, "satoshis")?, cursor.output_id)),
            None => None,
        };
        let rows = self.client.select_spendable_utxos(user_id, basket_id, after, page.limit as i64).await?;
        trace!("Fetched {} funding candidates for user {} after {:?}", rows.len(), user_id, after);
        rows.into_iter().map(utxo_from_row).collect()
    }

    async fn find_by_outpoint(&self, user_id: i64, outpoint: &OutPoint) -> Result<Option<Utxo>, WalletError> {
        let row = self.client.select_utxo_by_outpoint(user_id, &outpoint.txid.to_string(), from_vout(outpoint.vout)?).await?;
        row.map(utxo_from_row).transpose()
    }

    async fn claim(&self, utxo: &Utxo, reservation: &str) -> Result<ClaimOutcome, WalletError> {
        match self.client.claim_utxo(utxo.output_id, reservation).await? {
            0 => Ok(ClaimOutcome::AlreadyClaimed),
            _ => Ok(ClaimOutcome::Claimed),
        }
    }

    async fn release(&self, reservation: &str) -> Result<u64, WalletError> {
        Ok(self.client.release_reservation(reservation).await?)
    }

    async fn count_spendable(&self, user_id: i64, basket_id: i64) -> Result<u64, WalletError> {
        to_u64(self.client.count_spendable_utxos(user_id, basket_id).await?, "count")
    }
}

#[async_trait]
impl OutputStore for PostgresStore {
    async fn find_outputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutputRecord>, WalletError> {
        self.client.select_outputs_by_transaction(transaction_id).await?.into_iter().map(output_from_row).collect()
    }

    async fn find_inputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutPoint>, WalletError> {
        self.client
            .select_inputs_by_transaction(transaction_id)
            .await?
            .into_iter()
            .map(|row| {
                let txid = row
                    .txid
                    .as_deref()
                    .ok_or_else(|| WalletError::Unexpected(format!("input {} has no txid", row.output_id)))?
                    .parse()?;
                Ok(OutPoint::new(txid, to_vout(row.vout)?))
            })
            .collect()
    }
}

#[async_trait]
impl BasketStore for PostgresStore {
    async fn find_or_insert_basket(&self, user_id: i64, name: &str, policy: &BasketPolicy) -> Result<Basket, WalletError> {
        let desired = i32::try_from(policy.desired_utxo_count)
            .map_err(|_| WalletError::Configuration(format!("desired_utxo_count {} too large", policy.desired_utxo_count)))?;
        let min_value = to_i64(policy.min_utxo_value, "min_utxo_value")?;
        let row = self.baskets.find_or_insert(user_id, name, desired, min_value, self.client.pool()).await?;
        basket_from_row(row)
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<i64, WalletError> {
        let record = models::transaction::NewTransaction {
            user_id: transaction.user_id,
            status: transaction.status.as_str().to_string(),
            reference: transaction.reference.clone(),
            is_outgoing: transaction.is_outgoing,
            satoshis: transaction.satoshis,
            description: transaction.description.clone(),
            version: transaction.version as i64,
            lock_time: transaction.lock_time as i64,
            broadcast_mode: transaction.broadcast_mode.as_str().to_string(),
            input_proof: transaction.input_proof.clone(),
        };
        let outputs = transaction
            .outputs
            .iter()
            .map(|output| {
                Ok(models::transaction_output::NewTransactionOutput {
                    user_id: transaction.user_id,
                    basket_id: output.basket_id,
                    txid: None,
                    vout: from_vout(output.vout)?,
                    satoshis: to_i64(output.satoshis, "satoshis")?,
                    locking_script: output.locking_script.clone(),
                    is_change: output.is_change,
                    spendable: false,
                    provided_by: output.provided_by.as_str().to_string(),
                    purpose: output.purpose.clone(),
                    derivation_suffix: output.derivation_suffix.clone(),
                    description: output.description.clone(),
                    estimated_input_size: i32::try_from(output.estimated_input_size)
                        .map_err(|_| WalletError::validation("estimated input size out of range"))?,
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;
        let commission = match &transaction.commission {
            Some(commission) => Some(models::commission::NewCommission {
                user_id: transaction.user_id,
                satoshis: to_i64(commission.satoshis, "commission")?,
                key_offset: commission.key_offset.clone(),
                locking_script: commission.locking_script.clone(),
            }),
            None => None,
        };
        match self.client.insert_transaction(&record, &outputs, &transaction.inputs, commission.as_ref()).await? {
            Some(transaction_id) => {
                debug!("Persisted transaction {} as {} ({})", transaction.reference, transaction_id, transaction.status);
                Ok(transaction_id)
            }
            None => Err(WalletError::ConcurrencyConflict(format!(
                "inputs of {} are no longer reserved",
                transaction.reference
            ))),
        }
    }

    async fn find_by_reference(&self, user_id: i64, reference: &str) -> Result<Option<TransactionRecord>, WalletError> {
        self.client.select_transaction_by_reference(user_id, reference).await?.map(transaction_from_row).transpose()
    }

    async fn find_by_status(
        &self,
        statuses: &[TxStatus],
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>, WalletError> {
        self.client
            .select_transactions_by_status(&status_strings(statuses), updated_before, limit as i64)
            .await?
            .into_iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn record_signed(
        &self,
        transaction_id: i64,
        expected: &[TxStatus],
        txid: &TxId,
        raw_tx: &[u8],
        status: TxStatus,
        change_scripts: &[(i64, Vec<u8>)],
    ) -> Result<bool, WalletError> {
        let rows = self
            .client
            .update_signed_transaction(
                transaction_id,
                &status_strings(expected),
                &txid.to_string(),
                raw_tx,
                status.as_str(),
                change_scripts,
            )
            .await?;
        Ok(rows > 0)
    }

    async fn update_status(
        &self,
        transaction_id: i64,
        expected: &[TxStatus],
        status: TxStatus,
        note: &str,
    ) -> Result<bool, WalletError> {
        let rows =
            self.client.update_transaction_status(transaction_id, &status_strings(expected), status.as_str(), note).await?;
        Ok(rows > 0)
    }

    async fn add_history(&self, transaction_id: i64, note: &str) -> Result<(), WalletError> {
        self.client.insert_tx_history(transaction_id, note).await?;
        Ok(())
    }

    async fn history(&self, transaction_id: i64) -> Result<Vec<String>, WalletError> {
        Ok(self.client.select_tx_history(transaction_id).await?.into_iter().map(|h| h.note).collect())
    }

    async fn release_inputs(&self, transaction_id: i64) -> Result<u64, WalletError> {
        Ok(self.client.release_transaction_inputs(transaction_id).await?)
    }

    async fn upsert_broadcast_request(&self, txid: &TxId, raw_tx: &[u8], input_proof: &[u8]) -> Result<String, WalletError> {
        Ok(self.client.upsert_known_tx(&txid.to_string(), raw_tx, input_proof).await?)
    }

    async fn update_broadcast_request(&self, txid: &TxId, status: &str) -> Result<(), WalletError> {
        self.client.update_known_tx_status(&txid.to_string(), status).await?;
        Ok(())
    }
}
