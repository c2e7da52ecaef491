use crate::actions::status::TxStatus;
use crate::error::WalletError;
use crate::storage::{
    Basket, BasketStore, ClaimOutcome, NewCommission, NewTransaction, OutputRecord, OutputStore, Page, ProvidedBy,
    TransactionRecord, TransactionStore, Utxo, UtxoStore,
};
use crate::tx::size::P2PKH_INPUT_SIZE;
use crate::tx::{OutPoint, TxId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use wallet_storage_cli::storage_config::BasketPolicy;

#[derive(Debug, Clone)]
struct OutputRow {
    user_id: i64,
    transaction_id: Option<i64>,
    txid: Option<TxId>,
    record: OutputRecord,
    estimated_input_size: u64,
    spent_by: Option<i64>,
    reserved_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub status: String,
    pub attempts: u32,
    pub raw_tx: Vec<u8>,
    pub input_proof: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    outputs: BTreeMap<i64, OutputRow>,
    transactions: BTreeMap<i64, TransactionRecord>,
    baskets: Vec<Basket>,
    commissions: Vec<(i64, NewCommission)>,
    history: Vec<(i64, String)>,
    broadcast_requests: HashMap<TxId, BroadcastRequest>,
}

fn insert_basket(state: &mut MemoryState, user_id: i64, name: &str, policy: &BasketPolicy) -> Basket {
    let basket = Basket {
        basket_id: state.next_id(),
        user_id,
        name: name.to_string(),
        desired_utxo_count: policy.desired_utxo_count,
        min_utxo_value: policy.min_utxo_value,
    };
    state.baskets.push(basket.clone());
    basket
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn to_utxo(output_id: i64, row: &OutputRow) -> Option<Utxo> {
        Some(Utxo {
            output_id,
            user_id: row.user_id,
            basket_id: row.record.basket_id,
            outpoint: OutPoint::new(row.txid?, row.record.vout),
            satoshis: row.record.satoshis,
            estimated_input_size: row.estimated_input_size,
            reserved_by: row.reserved_by.clone(),
        })
    }
}

/// Process local store with the same claim semantics as the database, used by tests and tooling
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a confirmed spendable output to a basket
    pub fn add_utxo(&self, user_id: i64, basket_id: i64, outpoint: OutPoint, satoshis: u64) -> Utxo {
        let mut state = self.lock();
        let output_id = state.next_id();
        let row = OutputRow {
            user_id,
            transaction_id: None,
            txid: Some(outpoint.txid),
            record: OutputRecord {
                output_id,
                vout: outpoint.vout,
                satoshis,
                locking_script: Some(vec![0x76, 0xa9, 0x14]),
                basket_id: Some(basket_id),
                is_change: true,
                spendable: true,
                provided_by: ProvidedBy::Storage,
                purpose: "change".to_string(),
                derivation_suffix: None,
                description: String::new(),
            },
            estimated_input_size: P2PKH_INPUT_SIZE,
            spent_by: None,
            reserved_by: None,
        };
        state.outputs.insert(output_id, row);
        Utxo {
            output_id,
            user_id,
            basket_id: Some(basket_id),
            outpoint,
            satoshis,
            estimated_input_size: P2PKH_INPUT_SIZE,
            reserved_by: None,
        }
    }

    pub fn add_basket(&self, user_id: i64, name: &str, policy: &BasketPolicy) -> Basket {
        insert_basket(&mut self.lock(), user_id, name, policy)
    }

    pub fn output(&self, output_id: i64) -> Option<OutputRecord> {
        self.lock().outputs.get(&output_id).map(|row| row.record.clone())
    }

    pub fn reserved_by(&self, output_id: i64) -> Option<String> {
        self.lock().outputs.get(&output_id).and_then(|row| row.reserved_by.clone())
    }

    pub fn spent_by(&self, output_id: i64) -> Option<i64> {
        self.lock().outputs.get(&output_id).and_then(|row| row.spent_by)
    }

    pub fn transaction(&self, transaction_id: i64) -> Option<TransactionRecord> {
        self.lock().transactions.get(&transaction_id).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    pub fn commission(&self, transaction_id: i64) -> Option<NewCommission> {
        self.lock().commissions.iter().find(|(id, _)| *id == transaction_id).map(|(_, c)| c.clone())
    }

    pub fn broadcast_request(&self, txid: &TxId) -> Option<BroadcastRequest> {
        self.lock().broadcast_requests.get(txid).cloned()
    }

    pub fn set_broadcast_status(&self, txid: &TxId, raw_tx: &[u8], status: &str) {
        let mut state = self.lock();
        let request = state.broadcast_requests.entry(*txid).or_insert_with(|| BroadcastRequest {
            status: String::new(),
            attempts: 0,
            raw_tx: raw_tx.to_vec(),
            input_proof: Vec::new(),
        });
        request.status = status.to_string();
    }

    pub fn set_updated_at(&self, transaction_id: i64, updated_at: DateTime<Utc>) {
        if let Some(record) = self.lock().transactions.get_mut(&transaction_id) {
            record.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl UtxoStore for MemoryStore {
    async fn find_candidates(&self, user_id: i64, basket_id: i64, page: Page) -> Result<Vec<Utxo>, WalletError> {
        let state = self.lock();
        let mut candidates: Vec<Utxo> = state
            .outputs
            .iter()
            .filter(|(_, row)| {
                row.user_id == user_id
                    && row.record.basket_id == Some(basket_id)
                    && row.record.spendable
                    && row.spent_by.is_none()
                    && row.reserved_by.is_none()
            })
            .filter_map(|(output_id, row)| MemoryState::to_utxo(*output_id, row))
            .filter(|utxo| page.after.is_none_or(|after| (utxo.satoshis, utxo.output_id) < (after.satoshis, after.output_id)))
            .collect();
        candidates.sort_by(|a, b| (b.satoshis, b.output_id).cmp(&(a.satoshis, a.output_id)));
        candidates.truncate(page.limit as usize);
        Ok(candidates)
    }

    async fn find_by_outpoint(&self, user_id: i64, outpoint: &OutPoint) -> Result<Option<Utxo>, WalletError> {
        let state = self.lock();
        Ok(state
            .outputs
            .iter()
            .filter(|(_, row)| {
                row.user_id == user_id
                    && row.txid == Some(outpoint.txid)
                    && row.record.vout == outpoint.vout
                    && row.record.spendable
                    && row.spent_by.is_none()
            })
            .find_map(|(output_id, row)| MemoryState::to_utxo(*output_id, row)))
    }

    async fn claim(&self, utxo: &Utxo, reservation: &str) -> Result<ClaimOutcome, WalletError> {
        let mut state = self.lock();
        match state.outputs.get_mut(&utxo.output_id) {
            Some(row) if row.reserved_by.is_none() && row.spent_by.is_none() && row.record.spendable => {
                row.reserved_by = Some(reservation.to_string());
                Ok(ClaimOutcome::Claimed)
            }
            _ => Ok(ClaimOutcome::AlreadyClaimed),
        }
    }

    async fn release(&self, reservation: &str) -> Result<u64, WalletError> {
        let mut state = self.lock();
        let mut released = 0;
        for row in state.outputs.values_mut() {
            if row.spent_by.is_none() && row.reserved_by.as_deref() == Some(reservation) {
                row.reserved_by = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn count_spendable(&self, user_id: i64, basket_id: i64) -> Result<u64, WalletError> {
        let state = self.lock();
        Ok(state
            .outputs
            .values()
            .filter(|row| {
                row.user_id == user_id
                    && row.record.basket_id == Some(basket_id)
                    && row.record.spendable
                    && row.spent_by.is_none()
                    && row.reserved_by.is_none()
                    && row.txid.is_some()
            })
            .count() as u64)
    }
}

#[async_trait]
impl OutputStore for MemoryStore {
    async fn find_outputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutputRecord>, WalletError> {
        let state = self.lock();
        let mut outputs: Vec<OutputRecord> = state
            .outputs
            .values()
            .filter(|row| row.transaction_id == Some(transaction_id))
            .map(|row| row.record.clone())
            .collect();
        outputs.sort_by_key(|output| output.vout);
        Ok(outputs)
    }

    async fn find_inputs_by_transaction(&self, transaction_id: i64) -> Result<Vec<OutPoint>, WalletError> {
        let state = self.lock();
        Ok(state
            .outputs
            .values()
            .filter(|row| row.spent_by == Some(transaction_id))
            .filter_map(|row| row.txid.map(|txid| OutPoint::new(txid, row.record.vout)))
            .collect())
    }
}

#[async_trait]
impl BasketStore for MemoryStore {
    async fn find_or_insert_basket(&self, user_id: i64, name: &str, policy: &BasketPolicy) -> Result<Basket, WalletError> {
        let mut state = self.lock();
        if let Some(basket) = state.baskets.iter().find(|b| b.user_id == user_id && b.name == name) {
            return Ok(basket.clone());
        }
        Ok(insert_basket(&mut state, user_id, name, policy))
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn create_transaction(&self, transaction: &NewTransaction) -> Result<i64, WalletError> {
        let mut state = self.lock();
        if state.transactions.values().any(|t| t.reference == transaction.reference) {
            return Err(WalletError::Storage(format!("duplicate reference {}", transaction.reference)));
        }
        let lost = transaction.inputs.iter().find(|output_id| {
            state
                .outputs
                .get(*output_id)
                .is_none_or(|row| row.spent_by.is_some() || row.reserved_by.as_deref() != Some(transaction.reference.as_str()))
        });
        if let Some(output_id) = lost {
            return Err(WalletError::ConcurrencyConflict(format!("input {output_id} is no longer reserved")));
        }

        let transaction_id = state.next_id();
        let now = Utc::now();
        state.transactions.insert(
            transaction_id,
            TransactionRecord {
                transaction_id,
                user_id: transaction.user_id,
                status: transaction.status,
                reference: transaction.reference.clone(),
                txid: None,
                is_outgoing: transaction.is_outgoing,
                satoshis: transaction.satoshis,
                description: transaction.description.clone(),
                version: transaction.version,
                lock_time: transaction.lock_time,
                broadcast_mode: transaction.broadcast_mode,
                raw_tx: None,
                input_proof: transaction.input_proof.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        for output in &transaction.outputs {
            let output_id = state.next_id();
            state.outputs.insert(
                output_id,
                OutputRow {
                    user_id: transaction.user_id,
                    transaction_id: Some(transaction_id),
                    txid: None,
                    record: OutputRecord {
                        output_id,
                        vout: output.vout,
                        satoshis: output.satoshis,
                        locking_script: output.locking_script.clone(),
                        basket_id: output.basket_id,
                        is_change: output.is_change,
                        spendable: false,
                        provided_by: output.provided_by,
                        purpose: output.purpose.clone(),
                        derivation_suffix: output.derivation_suffix.clone(),
                        description: output.description.clone(),
                    },
                    estimated_input_size: output.estimated_input_size,
                    spent_by: None,
                    reserved_by: None,
                },
            );
        }
        for output_id in &transaction.inputs {
            if let Some(row) = state.outputs.get_mut(output_id) {
                row.spent_by = Some(transaction_id);
                row.record.spendable = false;
            }
        }
        if let Some(commission) = &transaction.commission {
            state.commissions.push((transaction_id, commission.clone()));
        }
        state.history.push((transaction_id, format!("created: {}", transaction.status)));
        Ok(transaction_id)
    }

    async fn find_by_reference(&self, user_id: i64, reference: &str) -> Result<Option<TransactionRecord>, WalletError> {
        let state = self.lock();
        Ok(state.transactions.values().find(|t| t.user_id == user_id && t.reference == reference).cloned())
    }

    async fn find_by_status(
        &self,
        statuses: &[TxStatus],
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionRecord>, WalletError> {
        let state = self.lock();
        let mut records: Vec<TransactionRecord> = state
            .transactions
            .values()
            .filter(|t| statuses.contains(&t.status) && t.updated_at < updated_before)
            .cloned()
            .collect();
        records.sort_by_key(|t| t.updated_at);
        records.truncate(limit as usize);
        Ok(records)
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
        let mut state = self.lock();
        let Some(record) = state.transactions.get_mut(&transaction_id).filter(|t| expected.contains(&t.status)) else {
            return Ok(false);
        };
        record.txid = Some(*txid);
        record.raw_tx = Some(raw_tx.to_vec());
        record.status = status;
        record.updated_at = Utc::now();

        for (output_id, locking_script) in change_scripts {
            if let Some(row) = state.outputs.get_mut(output_id) {
                row.record.locking_script = Some(locking_script.clone());
            }
        }
        for row in state.outputs.values_mut().filter(|row| row.transaction_id == Some(transaction_id)) {
            row.txid = Some(*txid);
            row.record.spendable = row.record.basket_id.is_some() && row.record.locking_script.is_some();
        }
        state.history.push((transaction_id, format!("signed: {status}")));
        Ok(true)
    }

    async fn update_status(
        &self,
        transaction_id: i64,
        expected: &[TxStatus],
        status: TxStatus,
        note: &str,
    ) -> Result<bool, WalletError> {
        let mut state = self.lock();
        let Some(record) = state.transactions.get_mut(&transaction_id).filter(|t| expected.contains(&t.status)) else {
            return Ok(false);
        };
        record.status = status;
        record.updated_at = Utc::now();
        state.history.push((transaction_id, note.to_string()));
        Ok(true)
    }

    async fn add_history(&self, transaction_id: i64, note: &str) -> Result<(), WalletError> {
        self.lock().history.push((transaction_id, note.to_string()));
        Ok(())
    }

    async fn history(&self, transaction_id: i64) -> Result<Vec<String>, WalletError> {
        let state = self.lock();
        Ok(state.history.iter().filter(|(id, _)| *id == transaction_id).map(|(_, note)| note.clone()).collect())
    }

    async fn release_inputs(&self, transaction_id: i64) -> Result<u64, WalletError> {
        let mut state = self.lock();
        let mut released = 0;
        for row in state.outputs.values_mut() {
            if row.spent_by == Some(transaction_id) {
                row.spent_by = None;
                row.reserved_by = None;
                row.record.spendable = true;
                released += 1;
            } else if row.transaction_id == Some(transaction_id) {
                row.record.spendable = false;
            }
        }
        Ok(released)
    }

    async fn upsert_broadcast_request(&self, txid: &TxId, raw_tx: &[u8], input_proof: &[u8]) -> Result<String, WalletError> {
        let mut state = self.lock();
        let request = state.broadcast_requests.entry(*txid).or_insert_with(|| BroadcastRequest {
            status: "unsent".to_string(),
            attempts: 0,
            raw_tx: raw_tx.to_vec(),
            input_proof: input_proof.to_vec(),
        });
        Ok(request.status.clone())
    }

    async fn update_broadcast_request(&self, txid: &TxId, status: &str) -> Result<(), WalletError> {
        if let Some(request) = self.lock().broadcast_requests.get_mut(txid) {
            request.status = status.to_string();
            request.attempts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Cursor;

    fn outpoint(n: u8) -> OutPoint {
        OutPoint::new(TxId::from_hash([n; 32]), 0)
    }

    #[tokio::test]
    async fn test_candidates_are_paged_largest_first() {
        let store = MemoryStore::new();
        for (n, satoshis) in [(1u8, 500u64), (2, 3000), (3, 1500), (4, 3000)] {
            store.add_utxo(1, 100, outpoint(n), satoshis);
        }
        let first = store.find_candidates(1, 100, Page::first(2)).await.unwrap();
        assert_eq!(first.iter().map(|u| u.satoshis).collect::<Vec<_>>(), vec![3000, 3000]);
        assert!(first[0].output_id > first[1].output_id);

        let after = first.last().map(Cursor::from);
        let second = store.find_candidates(1, 100, Page { after, limit: 2 }).await.unwrap();
        assert_eq!(second.iter().map(|u| u.satoshis).collect::<Vec<_>>(), vec![1500, 500]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let utxo = store.add_utxo(1, 100, outpoint(1), 1000);
        assert_eq!(store.claim(&utxo, "a").await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(store.claim(&utxo, "b").await.unwrap(), ClaimOutcome::AlreadyClaimed);
        assert!(store.find_candidates(1, 100, Page::first(10)).await.unwrap().is_empty());

        assert_eq!(store.release("b").await.unwrap(), 0);
        assert_eq!(store.release("a").await.unwrap(), 1);
        assert_eq!(store.count_spendable(1, 100).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_candidates_are_scoped_to_user_and_basket() {
        let store = MemoryStore::new();
        store.add_utxo(1, 100, outpoint(1), 1000);
        store.add_utxo(2, 100, outpoint(2), 1000);
        store.add_utxo(1, 200, outpoint(3), 1000);
        assert_eq!(store.find_candidates(1, 100, Page::first(10)).await.unwrap().len(), 1);
        assert_eq!(store.count_spendable(3, 100).await.unwrap(), 0);
    }
}
