use crate::error::WalletError;
use crate::services::queue::{NamedService, ServiceQueue};
use crate::tx::TxId;
use async_trait::async_trait;
use std::sync::Arc;
use wallet_storage_signal::context::Context;

/// Readiness of a broadcast request, derived from the status recorded for its txid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastReadiness {
    Ready,
    AlreadySent,
    Error,
}

impl BroadcastReadiness {
    pub fn from_request_status(status: &str) -> Result<Self, WalletError> {
        match status {
            "unsent" => Ok(BroadcastReadiness::Ready),
            "sending" | "unmined" | "unconfirmed" | "completed" => Ok(BroadcastReadiness::AlreadySent),
            "invalid" | "doubleSpend" => Ok(BroadcastReadiness::Error),
            other => Err(WalletError::Unexpected(format!("unknown broadcast request status '{other}'"))),
        }
    }
}

/// What a broadcaster reported. `Unknown` is the empty result and makes the queue try the next service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmitOutcome {
    #[default]
    Unknown,
    Accepted,
    Rejected {
        reason: String,
    },
}

#[async_trait]
pub trait EvidenceBuilder: Send + Sync {
    /// Proof of the source transactions, handed to the signer with a created action
    async fn build_input_proof(&self, source_txids: &[TxId]) -> Result<Vec<u8>, WalletError>;

    /// The signed transaction together with the evidence a broadcaster needs to validate it
    async fn build_evidence_bundle(&self, txid: &TxId, raw_tx: &[u8], input_proof: &[u8]) -> Result<Vec<u8>, WalletError>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, ctx: &Context, bundle: &[u8]) -> Result<SubmitOutcome, WalletError>;
}

pub type SubmitQueue = ServiceQueue<Arc<Vec<u8>>, SubmitOutcome>;

pub fn submit_queue(broadcasters: Vec<Arc<dyn Broadcaster>>) -> SubmitQueue {
    let services = broadcasters
        .into_iter()
        .map(|broadcaster| {
            let name = broadcaster.name().to_string();
            NamedService::new(name, move |ctx: Context, bundle: Arc<Vec<u8>>| {
                let broadcaster = broadcaster.clone();
                async move { broadcaster.submit(&ctx, &bundle).await }
            })
        })
        .collect();
    ServiceQueue::new("broadcast", services)
}

/// Length prefixed concatenation of txids, proofs and raw bytes, for deployments without a proof service
#[derive(Debug, Default, Clone, Copy)]
pub struct RawEvidenceBuilder;

impl RawEvidenceBuilder {
    fn push_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
    }
}

#[async_trait]
impl EvidenceBuilder for RawEvidenceBuilder {
    async fn build_input_proof(&self, source_txids: &[TxId]) -> Result<Vec<u8>, WalletError> {
        let mut proof = Vec::with_capacity(source_txids.len() * 32);
        for txid in source_txids {
            proof.extend_from_slice(txid.as_hash());
        }
        Ok(proof)
    }

    async fn build_evidence_bundle(&self, txid: &TxId, raw_tx: &[u8], input_proof: &[u8]) -> Result<Vec<u8>, WalletError> {
        let mut bundle = Vec::with_capacity(32 + raw_tx.len() + input_proof.len() + 8);
        bundle.extend_from_slice(txid.as_hash());
        Self::push_chunk(&mut bundle, input_proof);
        Self::push_chunk(&mut bundle, raw_tx);
        Ok(bundle)
    }
}
