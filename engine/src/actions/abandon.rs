use crate::actions::ActionPipeline;
use crate::actions::status::TxStatus;
use crate::error::WalletError;
use crate::storage::TransactionStore;
use chrono::Utc;
use log::{debug, info};
use std::time::Duration;
use wallet_storage_signal::context::Context;

/// Fails unsigned actions that were not touched for `abandon_after` and returns their inputs
/// to the spendable set. Returns the number of aborted actions.
pub async fn abort_abandoned(
    ctx: &Context,
    transactions: &dyn TransactionStore,
    abandon_after: Duration,
    limit: u32,
) -> Result<u64, WalletError> {
    let abandon_after = chrono::Duration::from_std(abandon_after)
        .map_err(|e| WalletError::Configuration(format!("invalid abandon duration: {e}")))?;
    let cutoff = Utc::now() - abandon_after;
    let records = transactions.find_by_status(&[TxStatus::Unsigned], cutoff, limit).await?;
    let mut aborted = 0;
    for record in records {
        if ctx.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        let moved = transactions
            .update_status(record.transaction_id, &[TxStatus::Unsigned], TxStatus::Failed, "abandoned: never signed")
            .await?;
        if !moved {
            debug!("Action {} was signed concurrently, keeping it", record.reference);
            continue;
        }
        let released = transactions.release_inputs(record.transaction_id).await?;
        debug!("Aborted abandoned action {}, released {} inputs", record.reference, released);
        aborted += 1;
    }
    if aborted > 0 {
        info!("Aborted {} abandoned actions", aborted);
    }
    Ok(aborted)
}

impl ActionPipeline {
    pub async fn abort_abandoned(&self, ctx: &Context, abandon_after: Duration, limit: u32) -> Result<u64, WalletError> {
        abort_abandoned(ctx, self.inner.stores.transactions.as_ref(), abandon_after, limit).await
    }
}
