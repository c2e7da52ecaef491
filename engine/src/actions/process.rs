use crate::actions::send::BroadcastTarget;
use crate::actions::status::{BroadcastMode, TxStatus};
use crate::actions::{ActionPipeline, Auth};
use crate::error::WalletError;
use crate::storage::TransactionRecord;
use crate::tx::raw::RawTransaction;
use crate::tx::{OutPoint, TxId};
use log::info;
use std::collections::HashSet;
use wallet_storage_signal::context::Context;

const SIGNABLE: [TxStatus; 2] = [TxStatus::Unsigned, TxStatus::Unprocessed];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessActionArgs {
    pub is_new_tx: bool,
    pub is_no_send: bool,
    pub is_delayed: bool,
    pub reference: Option<String>,
    pub txid: Option<TxId>,
    pub raw_tx: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessActionResult {
    pub reference: String,
    pub txid: TxId,
    pub status: TxStatus,
}

impl ProcessActionArgs {
    fn signed_parts(&self) -> Result<(&str, &TxId, &[u8]), WalletError> {
        if !self.is_new_tx {
            return Err(WalletError::validation("no new transaction to process"));
        }
        match (&self.reference, &self.txid, &self.raw_tx) {
            (Some(reference), Some(txid), Some(raw_tx)) if !reference.is_empty() && !raw_tx.is_empty() => {
                Ok((reference, txid, raw_tx))
            }
            _ => Err(WalletError::validation("a new transaction requires reference, txid and raw_tx")),
        }
    }
}

impl ActionPipeline {
    /// Accepts the signed form of a created action and advances it towards broadcast.
    /// Nothing is written unless the signed bytes match the created action.
    pub async fn process_action(
        &self,
        ctx: &Context,
        auth: Auth,
        args: &ProcessActionArgs,
    ) -> Result<ProcessActionResult, WalletError> {
        let (reference, txid, raw_tx) = args.signed_parts()?;
        let signed = RawTransaction::parse(raw_tx)?;
        let computed = TxId::of_raw(raw_tx);
        if computed != *txid {
            return Err(WalletError::validation(format!("txid {txid} does not match the signed transaction {computed}")));
        }

        let transactions = &self.inner.stores.transactions;
        let record = transactions
            .find_by_reference(auth.user_id, reference)
            .await?
            .ok_or_else(|| WalletError::validation(format!("unknown transaction reference {reference}")))?;
        if !SIGNABLE.contains(&record.status) {
            return Err(WalletError::validation(format!(
                "transaction {reference} is {}, expected {} or {}",
                record.status,
                TxStatus::Unsigned,
                TxStatus::Unprocessed
            )));
        }
        if !record.is_outgoing {
            return Err(WalletError::validation(format!("transaction {reference} is not outgoing")));
        }
        let input_proof = record
            .input_proof
            .clone()
            .filter(|proof| !proof.is_empty())
            .ok_or_else(|| WalletError::validation(format!("transaction {reference} has no input proof")))?;
        if signed.version != record.version || signed.lock_time != record.lock_time {
            return Err(WalletError::validation("signed version or lock time differs from the created action"));
        }
        let change_scripts = self.match_signed(&record, &signed).await?;

        let mode = BroadcastMode::from_flags(args.is_no_send, args.is_delayed);
        let status = mode.signed_status();
        record.status.check_transition(status)?;
        if ctx.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        let applied =
            transactions.record_signed(record.transaction_id, &SIGNABLE, txid, raw_tx, status, &change_scripts).await?;
        if !applied {
            return Err(WalletError::ConcurrencyConflict(format!("transaction {reference} changed while processing")));
        }
        info!("Processed action {} as {} ({}, {})", reference, txid, status, mode);

        let status = match mode {
            BroadcastMode::NoSend | BroadcastMode::Delayed => status,
            BroadcastMode::Immediate => {
                let target = BroadcastTarget {
                    transaction_id: record.transaction_id,
                    reference: reference.to_string(),
                    txid: *txid,
                    raw_tx: raw_tx.to_vec(),
                    input_proof,
                    status,
                };
                self.broadcast(ctx, &target).await?
            }
        };
        Ok(ProcessActionResult { reference: reference.to_string(), txid: *txid, status })
    }

    /// Cross-checks the signed transaction against what was created and returns the learned change scripts
    async fn match_signed(
        &self,
        record: &TransactionRecord,
        signed: &RawTransaction,
    ) -> Result<Vec<(i64, Vec<u8>)>, WalletError> {
        let outputs = &self.inner.stores.outputs;
        let created = outputs.find_outputs_by_transaction(record.transaction_id).await?;
        if created.len() != signed.outputs.len() {
            return Err(WalletError::validation(format!(
                "signed transaction has {} outputs, the action created {}",
                signed.outputs.len(),
                created.len()
            )));
        }
        let mut change_scripts = Vec::new();
        for output in &created {
            let signed_output = signed
                .outputs
                .get(output.vout as usize)
                .ok_or_else(|| WalletError::validation(format!("signed transaction is missing output {}", output.vout)))?;
            if signed_output.satoshis != output.satoshis {
                return Err(WalletError::validation(format!(
                    "output {} pays {} satoshis, expected {}",
                    output.vout, signed_output.satoshis, output.satoshis
                )));
            }
            match &output.locking_script {
                _ if output.is_change => change_scripts.push((output.output_id, signed_output.locking_script.clone())),
                Some(script) if *script == signed_output.locking_script => {}
                _ => return Err(WalletError::validation(format!("output {} locking script differs", output.vout))),
            }
        }

        let expected: HashSet<OutPoint> = outputs.find_inputs_by_transaction(record.transaction_id).await?.into_iter().collect();
        let actual: HashSet<OutPoint> = signed.inputs.iter().map(|input| input.previous_outpoint).collect();
        if expected != actual || actual.len() != signed.inputs.len() {
            return Err(WalletError::validation("signed inputs differ from the inputs allocated to the action"));
        }
        Ok(change_scripts)
    }
}
