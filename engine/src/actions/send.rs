use crate::actions::ActionPipeline;
use crate::actions::status::TxStatus;
use crate::error::WalletError;
use crate::parallel::map_parallel;
use crate::services::broadcast::{BroadcastReadiness, SubmitOutcome};
use crate::services::queue::ServiceQueueError;
use crate::storage::TransactionRecord;
use crate::tx::TxId;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use wallet_storage_signal::context::Context;

/// Unconsumed broadcast outcomes buffered by `send_waiting`
const SEND_BUFFER: usize = 16;

/// A signed transaction ready to be handed to the broadcasters
#[derive(Debug, Clone)]
pub struct BroadcastTarget {
    pub transaction_id: i64,
    pub reference: String,
    pub txid: TxId,
    pub raw_tx: Vec<u8>,
    pub input_proof: Vec<u8>,
    pub status: TxStatus,
}

impl BroadcastTarget {
    fn from_record(record: TransactionRecord) -> Option<Self> {
        Some(BroadcastTarget {
            transaction_id: record.transaction_id,
            txid: record.txid?,
            raw_tx: record.raw_tx?,
            input_proof: record.input_proof.unwrap_or_default(),
            reference: record.reference,
            status: record.status,
        })
    }
}

impl ActionPipeline {
    async fn transition(&self, target: &BroadcastTarget, from: TxStatus, to: TxStatus, note: &str) -> Result<bool, WalletError> {
        from.check_transition(to)?;
        let moved = self.inner.stores.transactions.update_status(target.transaction_id, &[from], to, note).await?;
        if !moved {
            warn!("Transaction {} left {} concurrently, not moving it to {}", target.reference, from, to);
        }
        Ok(moved)
    }

    async fn fail(&self, target: &BroadcastTarget, from: TxStatus, note: &str) -> Result<TxStatus, WalletError> {
        if self.transition(target, from, TxStatus::Failed, note).await? {
            let released = self.inner.stores.transactions.release_inputs(target.transaction_id).await?;
            info!("Transaction {} failed ({}), released {} inputs", target.reference, note, released);
        }
        Ok(TxStatus::Failed)
    }

    /// Registers the broadcast request and submits the evidence bundle through the broadcaster queue.
    /// A failure of every broadcaster leaves the transaction in sending for a later retry.
    pub(crate) async fn broadcast(&self, ctx: &Context, target: &BroadcastTarget) -> Result<TxStatus, WalletError> {
        let transactions = &self.inner.stores.transactions;
        let request_status =
            transactions.upsert_broadcast_request(&target.txid, &target.raw_tx, &target.input_proof).await?;
        match BroadcastReadiness::from_request_status(&request_status)? {
            BroadcastReadiness::AlreadySent => {
                self.transition(target, target.status, TxStatus::Unproven, "broadcast: already sent").await?;
                return Ok(TxStatus::Unproven);
            }
            BroadcastReadiness::Error => {
                return self.fail(target, target.status, &format!("broadcast: request is {request_status}")).await;
            }
            BroadcastReadiness::Ready => {}
        }

        if target.status != TxStatus::Sending
            && !self.transition(target, target.status, TxStatus::Sending, "broadcast: sending").await?
        {
            return Err(WalletError::ConcurrencyConflict(format!("transaction {} changed before broadcast", target.reference)));
        }

        let bundle = match self.inner.evidence.build_evidence_bundle(&target.txid, &target.raw_tx, &target.input_proof).await {
            Ok(bundle) => Arc::new(bundle),
            Err(err) => {
                warn!("Evidence for {} unavailable: {}", target.reference, err);
                transactions.add_history(target.transaction_id, &format!("broadcast: evidence failed: {err}")).await?;
                return Ok(TxStatus::Sending);
            }
        };

        debug!("Submitting {} through {}", target.txid, self.inner.submit.name());
        match self.inner.submit.run(ctx, bundle).await {
            Ok(SubmitOutcome::Accepted) => {
                transactions.update_broadcast_request(&target.txid, "unmined").await?;
                self.transition(target, TxStatus::Sending, TxStatus::Unproven, "broadcast: accepted").await?;
                info!("Broadcast {} accepted", target.txid);
                Ok(TxStatus::Unproven)
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                transactions.update_broadcast_request(&target.txid, "invalid").await?;
                self.fail(target, TxStatus::Sending, &format!("broadcast: rejected: {reason}")).await
            }
            Err(ServiceQueueError::Cancelled) => Err(WalletError::Cancelled),
            deferred => {
                // the queue never hands back the empty outcome
                let err = match deferred {
                    Err(err) => WalletError::from(err),
                    Ok(_) => WalletError::TransientService("no broadcaster outcome".to_string()),
                };
                warn!("Broadcast of {} deferred: {}", target.txid, err);
                transactions.add_history(target.transaction_id, &format!("broadcast: {err}")).await?;
                Ok(TxStatus::Sending)
            }
        }
    }

    /// Broadcasts queued transactions concurrently. Returns the outcome per reference.
    pub async fn send_waiting(&self, ctx: &Context, limit: u32) -> Result<Vec<(String, Result<TxStatus, WalletError>)>, WalletError> {
        let records = self
            .inner
            .stores
            .transactions
            .find_by_status(&[TxStatus::Unprocessed, TxStatus::Sending], Utc::now(), limit)
            .await?;
        let targets: Vec<BroadcastTarget> = records.into_iter().filter_map(BroadcastTarget::from_record).collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Sending {} waiting transactions", targets.len());
        let pipeline = self.clone();
        let outcomes = map_parallel(ctx, targets, SEND_BUFFER, move |ctx, target| {
            let pipeline = pipeline.clone();
            async move {
                let outcome = pipeline.broadcast(&ctx, &target).await;
                (target.reference, outcome)
            }
        })
        .collect()
        .await;
        Ok(outcomes)
    }
}
