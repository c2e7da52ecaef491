use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Error, Pool, Postgres};

use crate::models::commission::NewCommission;
use crate::models::transaction::{NewTransaction, Transaction};
use crate::models::transaction_output::{NewTransactionOutput, TransactionOutput};
use crate::models::tx_history::TxHistory;
use crate::models::utxo::Utxo;
use crate::query;

const SCHEMA_VERSION: &str = "1";

#[derive(Clone)]
pub struct WalletDbClient {
    pool: Pool<Postgres>,
}

impl WalletDbClient {
    pub async fn new(url: &str, pool_size: u32) -> Result<WalletDbClient, Error> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(10))
            .max_connections(pool_size)
            .connect(url)
            .await?;
        Ok(WalletDbClient { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub async fn create_schema(&self) -> Result<(), Error> {
        match query::misc::select_var("schema_version", &self.pool).await {
            Ok(version) if version == SCHEMA_VERSION => {
                info!("Schema v{} is up to date", version);
                Ok(())
            }
            Ok(version) => {
                warn!("Found schema v{}, expected v{}. Upgrade not supported", version, SCHEMA_VERSION);
                Err(Error::Protocol(format!("unsupported schema version {version}")))
            }
            Err(_) => {
                info!("Applying schema v{}", SCHEMA_VERSION);
                query::misc::execute_ddl(include_str!("migrations/schema/up.sql"), &self.pool).await
            }
        }
    }

    pub async fn drop_schema(&self) -> Result<(), Error> {
        debug!("Dropping schema");
        query::misc::execute_ddl(include_str!("migrations/schema/down.sql"), &self.pool).await
    }

    pub async fn select_spendable_utxos(
        &self,
        user_id: i64,
        basket_id: i64,
        after: Option<(i64, i64)>,
        limit: i64,
    ) -> Result<Vec<Utxo>, Error> {
        query::select::select_spendable_utxos(user_id, basket_id, after, limit, &self.pool).await
    }

    pub async fn count_spendable_utxos(&self, user_id: i64, basket_id: i64) -> Result<i64, Error> {
        query::select::count_spendable_utxos(user_id, basket_id, &self.pool).await
    }

    pub async fn select_utxo_by_outpoint(&self, user_id: i64, txid: &str, vout: i32) -> Result<Option<Utxo>, Error> {
        query::select::select_utxo_by_outpoint(user_id, txid, vout, &self.pool).await
    }

    pub async fn claim_utxo(&self, output_id: i64, reservation: &str) -> Result<u64, Error> {
        query::update::claim_utxo(output_id, reservation, &self.pool).await
    }

    pub async fn release_reservation(&self, reservation: &str) -> Result<u64, Error> {
        query::update::release_reservation(reservation, &self.pool).await
    }

    pub async fn insert_transaction(
        &self,
        transaction: &NewTransaction,
        outputs: &[NewTransactionOutput],
        input_output_ids: &[i64],
        commission: Option<&NewCommission>,
    ) -> Result<Option<i64>, Error> {
        query::insert::insert_transaction(transaction, outputs, input_output_ids, commission, &self.pool).await
    }

    pub async fn select_transaction_by_reference(&self, user_id: i64, reference: &str) -> Result<Option<Transaction>, Error> {
        query::select::select_transaction_by_reference(user_id, reference, &self.pool).await
    }

    pub async fn select_transactions_by_status(
        &self,
        statuses: &[String],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, Error> {
        query::select::select_transactions_by_status(statuses, updated_before, limit, &self.pool).await
    }

    pub async fn select_outputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<TransactionOutput>, Error> {
        query::select::select_outputs_by_transaction(transaction_id, &self.pool).await
    }

    pub async fn select_inputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<TransactionOutput>, Error> {
        query::select::select_inputs_by_transaction(transaction_id, &self.pool).await
    }

    pub async fn update_transaction_status(
        &self,
        transaction_id: i64,
        expected_statuses: &[String],
        status: &str,
        note: &str,
    ) -> Result<u64, Error> {
        query::update::update_transaction_status(transaction_id, expected_statuses, status, note, &self.pool).await
    }

    pub async fn update_signed_transaction(
        &self,
        transaction_id: i64,
        expected_statuses: &[String],
        txid: &str,
        raw_tx: &[u8],
        status: &str,
        change_scripts: &[(i64, Vec<u8>)],
    ) -> Result<u64, Error> {
        query::update::update_signed_transaction(transaction_id, expected_statuses, txid, raw_tx, status, change_scripts, &self.pool)
            .await
    }

    pub async fn release_transaction_inputs(&self, transaction_id: i64) -> Result<u64, Error> {
        query::update::release_transaction_inputs(transaction_id, &self.pool).await
    }

    pub async fn insert_tx_history(&self, transaction_id: i64, note: &str) -> Result<u64, Error> {
        query::insert::insert_tx_history(transaction_id, note, &self.pool).await
    }

    pub async fn select_tx_history(&self, transaction_id: i64) -> Result<Vec<TxHistory>, Error> {
        query::select::select_tx_history(transaction_id, &self.pool).await
    }

    pub async fn upsert_known_tx(&self, txid: &str, raw_tx: &[u8], input_proof: &[u8]) -> Result<String, Error> {
        query::upsert::upsert_known_tx(txid, raw_tx, input_proof, &self.pool).await
    }

    pub async fn update_known_tx_status(&self, txid: &str, status: &str) -> Result<u64, Error> {
        query::update::update_known_tx_status(txid, status, &self.pool).await
    }
}
