pub mod memory;
pub mod postgres;

use crate::actions::status::{BroadcastMode, TxStatus};
use crate::error::WalletError;
use crate::tx::{OutPoint, TxId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use wallet_storage_cli::storage_config::BasketPolicy;

/// An unspent output owned by a user, as seen by funding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub output_id: i64,
    pub user_id: i64,
    pub basket_id: Option<i64>,
    pub outpoint: OutPoint,
    pub satoshis: u64,
    pub estimated_input_size: u64,
    pub reserved_by: Option<String>,
}

/// Keyset position within the candidate ordering (satoshis DESC, output_id DESC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub satoshis: u64,
    pub output_id: i64,
}

impl From<&Utxo> for Cursor {
    fn from(utxo: &Utxo) -> Self {
        Cursor { satoshis: utxo.satoshis, output_id: utxo.output_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub after: Option<Cursor>,
    pub limit: u32,
}

impl Page {
    pub fn first(limit: u32) -> Self {
        Page { after: None, limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Basket {
    pub basket_id: i64,
    pub user_id: i64,
    pub name: String,
    pub desired_utxo_count: u32,
    pub min_utxo_value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvidedBy {
    You,
    Storage,
}

impl ProvidedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvidedBy::You => "you",
            ProvidedBy::Storage => "storage",
        }
    }
}

impl fmt::Display for ProvidedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvidedBy {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "you" => Ok(ProvidedBy::You),
            "storage" => Ok(ProvidedBy::Storage),
            other => Err(WalletError::Unexpected(format!("unknown output provider '{other}'"))),
        }
    }
}

pub const PURPOSE_CHANGE: &str = "change";
pub const PURPOSE_COMMISSION: &str = "storage-commission";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub output_id: i64,
    pub vout: u32,
    pub satoshis: u64,
    pub locking_script: Option<Vec<u8>>,
    pub basket_id: Option<i64>,
    pub is_change: bool,
    pub spendable: bool,
    pub provided_by: ProvidedBy,
    pub purpose: String,
    pub derivation_suffix: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction_id: i64,
    pub user_id: i64,
    pub status: TxStatus,
    pub reference: String,
    pub txid: Option<TxId>,
    pub is_outgoing: bool,
    /// Net effect on the user's balance
    pub satoshis: i64,
    pub description: String,
    pub version: u32,
    pub lock_time: u32,
    pub broadcast_mode: BroadcastMode,
    pub raw_tx: Option<Vec<u8>>,
    pub input_proof: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutput {
    pub vout: u32,
    pub satoshis: u64,
    /// Unknown for storage owned change until the signed transaction arrives
    pub locking_script: Option<Vec<u8>>,
    pub basket_id: Option<i64>,
    pub is_change: bool,
    pub provided_by: ProvidedBy,
    pub purpose: String,
    pub derivation_suffix: Option<String>,
    pub description: String,
    pub estimated_input_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommission {
    pub satoshis: u64,
    pub key_offset: String,
    pub locking_script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: i64,
    pub status: TxStatus,
    pub reference: String,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub description: String,
    pub version: u32,
    pub lock_time: u32,
    pub broadcast_mode: BroadcastMode,
    pub input_proof: Option<Vec<u8>>,
    pub outputs: Vec<NewOutput>,
    /// Reserved outputs consumed by this transaction, all claimed under `reference`
    pub inputs: Vec<i64>,
    pub commission: Option<NewCommission>,
}

#[async_trait]
pub trait UtxoStore: Send + Sync {
    /// Spendable, unreserved outputs in descending value order
    async fn find_candidates(&self, user_id: i64, basket_id: i64, page: Page) -> Result<Vec<Utxo>, WalletError>;

    async fn find_by_outpoint(&self, user_id: i64, outpoint: &OutPoint) -> Result<Option<Utxo>, WalletError>;

    /// Atomically reserves the output, at most one reservation can win
    async fn claim(&self, utxo: &Utxo, reservation: &str) -> Result<ClaimOutcome, WalletError>;

    /// Releases every claim made under the reservation that was not consumed
    async fn release(&self, reservation: &str) -> Result<u64, WalletError>;

    async fn count_spendable(&self, user_id: i64, basket_id: i64) -> Result<u64, WalletError>;
}

#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn find_outputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutputRecord>, WalletError>;

    async fn find_inputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutPoint>, WalletError>;
}

#[async_trait]
pub trait BasketStore: Send + Sync {
    async fn find_or_insert_basket(&self, user_id: i64, name: &str, policy: &BasketPolicy) -> Result<Basket, WalletError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persists the record atomically. Fails with a concurrency conflict if any input lost its claim.
    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<i64, WalletError>;

    async fn find_by_reference(&self, user_id: i64, reference: &str) -> Result<Option<TransactionRecord>, WalletError>;

    async fn find_by_status(
        &self,
        statuses: &[TxStatus],
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>, WalletError>;

    /// Applies the signed transaction if the record is still in one of `expected`.
    /// Returns false when the record moved on concurrently.
    async fn record_signed(
        &self,
        transaction_id: i64,
        expected: &[TxStatus],
        txid: &TxId,
        raw_tx: &[u8],
        status: TxStatus,
        change_scripts: &[(i64, Vec<u8>)],
    ) -> Result<bool, WalletError>;

    /// Moves the record to `status` if it is still in one of `expected`, returns whether it moved
    async fn update_status(
        &self,
        transaction_id: i64,
        expected: &[TxStatus],
        status: TxStatus,
        note: &str,
    ) -> Result<bool, WalletError>;

    async fn add_history(&self, transaction_id: i64, note: &str) -> Result<(), WalletError>;

    async fn history(&self, transaction_id: i64) -> Result<Vec<String>, WalletError>;

    /// Returns the inputs of a failed transaction to the spendable set
    async fn release_inputs(&self, transaction_id: i64) -> Result<u64, WalletError>;

    /// Registers a broadcast request and returns its current status string
    async fn upsert_broadcast_request(&self, txid: &TxId, raw_tx: &[u8], input_proof: &[u8]) -> Result<String, WalletError>;

    async fn update_broadcast_request(&self, txid: &TxId, status: &str) -> Result<(), WalletError>;
}

/// The storage seams the pipeline works against
#[derive(Clone)]
pub struct Stores {
    pub utxos: Arc<dyn UtxoStore>,
    pub outputs: Arc<dyn OutputStore>,
    pub baskets: Arc<dyn BasketStore>,
    pub transactions: Arc<dyn TransactionStore>,
}

impl Stores {
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: UtxoStore + OutputStore + BasketStore + TransactionStore + 'static,
    {
        Stores { utxos: store.clone(), outputs: store.clone(), baskets: store.clone(), transactions: store }
    }
}
