use crate::change::output_count;
use crate::error::{WalletError, to_i64};
use crate::fee::FeeCalculator;
use crate::storage::{ClaimOutcome, Cursor, Page, Utxo, UtxoStore};
use crate::tx::size::P2PKH_OUTPUT_SIZE;
use log::{debug, trace, warn};
use std::sync::Arc;
use wallet_storage_signal::context::Context;

#[derive(Debug, Clone)]
pub struct FundingRequest<'a> {
    /// Satoshis still to be covered, negative when the transaction already holds a surplus
    pub target_satoshis: i64,
    /// Estimated size of the transaction before any allocated input or change output
    pub current_tx_size: u64,
    pub desired_change_count: u32,
    pub minimum_change_value: u64,
    pub user_id: i64,
    pub basket_id: i64,
    /// Claims are made under this reservation and released on failure
    pub reservation: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingResult {
    pub allocated: Vec<Utxo>,
    pub fee: u64,
    pub change_count: u32,
    pub change_amount: u64,
}

impl FundingResult {
    pub fn allocated_satoshis(&self) -> u64 {
        self.allocated.iter().map(|u| u.satoshis).sum()
    }
}

pub struct Funder {
    utxos: Arc<dyn UtxoStore>,
    fee_calculator: FeeCalculator,
    batch_size: u32,
}

impl Funder {
    pub fn new(utxos: Arc<dyn UtxoStore>, fee_calculator: FeeCalculator, batch_size: u32) -> Self {
        Funder { utxos, fee_calculator, batch_size: batch_size.max(1) }
    }

    pub fn fee_calculator(&self) -> &FeeCalculator {
        &self.fee_calculator
    }

    /// Allocates candidates until the target and the fee for the growing transaction are covered,
    /// then sizes the change. Every claim made here is released if funding fails.
    pub async fn fund(&self, ctx: &Context, request: &FundingRequest<'_>) -> Result<FundingResult, WalletError> {
        let mut allocated = Vec::new();
        match self.fund_inner(ctx, request, &mut allocated).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if !allocated.is_empty() {
                    match self.utxos.release(request.reservation).await {
                        Ok(released) => debug!("Released {} claims of {} after: {}", released, request.reservation, err),
                        Err(release_err) => warn!("Failed to release claims of {}: {}", request.reservation, release_err),
                    }
                }
                Err(err)
            }
        }
    }

    async fn fund_inner(
        &self,
        ctx: &Context,
        request: &FundingRequest<'_>,
        allocated: &mut Vec<Utxo>,
    ) -> Result<FundingResult, WalletError> {
        if ctx.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        let mut tx_size = request.current_tx_size;
        let mut allocated_satoshis: i64 = 0;

        if !self.is_covered(request.target_satoshis, allocated_satoshis, tx_size)? {
            if self.utxos.count_spendable(request.user_id, request.basket_id).await? == 0 {
                return Err(WalletError::NotEnoughFunds { required: self.required(request.target_satoshis, tx_size)?, available: 0 });
            }
            let mut page = Page::first(self.batch_size);
            'batches: loop {
                if ctx.is_cancelled() {
                    return Err(WalletError::Cancelled);
                }
                let batch = self.utxos.find_candidates(request.user_id, request.basket_id, page).await?;
                trace!("Funding {}: {} candidates in batch", request.reservation, batch.len());
                let Some(last) = batch.last() else { break };
                page.after = Some(Cursor::from(last));
                let exhausted = batch.len() < page.limit as usize;

                for utxo in batch {
                    match self.utxos.claim(&utxo, request.reservation).await? {
                        ClaimOutcome::AlreadyClaimed => {
                            trace!("Output {} was claimed concurrently, skipping", utxo.output_id);
                            continue;
                        }
                        ClaimOutcome::Claimed => {}
                    }
                    allocated_satoshis = allocated_satoshis
                        .checked_add(to_i64(utxo.satoshis, "satoshis")?)
                        .ok_or_else(|| WalletError::Unexpected("allocated satoshis overflow".to_string()))?;
                    tx_size += utxo.estimated_input_size;
                    allocated.push(utxo);
                    if self.is_covered(request.target_satoshis, allocated_satoshis, tx_size)? {
                        break 'batches;
                    }
                }
                if exhausted {
                    break;
                }
            }
            if !self.is_covered(request.target_satoshis, allocated_satoshis, tx_size)? {
                return Err(WalletError::NotEnoughFunds {
                    required: self.required(request.target_satoshis, tx_size)?,
                    available: allocated_satoshis,
                });
            }
        }

        let surplus = allocated_satoshis - request.target_satoshis;
        let (change_count, change_amount, fee) =
            self.plan_change(surplus, tx_size, request.desired_change_count, request.minimum_change_value)?;
        debug!(
            "Funded {} with {} inputs ({} sats), fee {}, {} change outputs of {} sats",
            request.reservation,
            allocated.len(),
            allocated_satoshis,
            fee,
            change_count,
            change_amount
        );
        Ok(FundingResult { allocated: std::mem::take(allocated), fee, change_count, change_amount })
    }

    fn fee_for(&self, tx_size: u64) -> Result<i64, WalletError> {
        to_i64(self.fee_calculator.calculate(tx_size)?, "fee")
    }

    fn required(&self, target: i64, tx_size: u64) -> Result<i64, WalletError> {
        target
            .checked_add(self.fee_for(tx_size)?)
            .ok_or_else(|| WalletError::Unexpected("required satoshis overflow".to_string()))
    }

    fn is_covered(&self, target: i64, allocated: i64, tx_size: u64) -> Result<bool, WalletError> {
        Ok(allocated >= self.required(target, tx_size)?)
    }

    /// Settles on a change output count whose fee cost still leaves enough change to fill it.
    /// Change that cannot fill a single output at the floor is folded into the fee.
    fn plan_change(&self, surplus: i64, tx_size: u64, desired: u32, floor: u64) -> Result<(u32, u64, u64), WalletError> {
        let mut count = desired;
        while count > 0 {
            let fee = self.fee_for(tx_size + count as u64 * P2PKH_OUTPUT_SIZE)?;
            let change = surplus - fee;
            if change <= 0 || (change as u64) < floor {
                count -= 1;
                continue;
            }
            let change = change as u64;
            let effective = output_count(count, change, floor);
            if effective == count {
                return Ok((count, change, fee as u64));
            }
            count = effective;
        }
        Ok((0, 0, surplus.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::SAT_PER_KB;
    use crate::storage::memory::MemoryStore;
    use crate::tx::{OutPoint, TxId};
    use wallet_storage_cli::storage_config::FeeModelConfig;

    const USER: i64 = 1;

    fn funder(store: Arc<MemoryStore>, rate: u64, batch_size: u32) -> Funder {
        let calculator = FeeCalculator::new(&FeeModelConfig { model: SAT_PER_KB.to_string(), value: rate }).unwrap();
        Funder::new(store, calculator, batch_size)
    }

    fn seed(store: &MemoryStore, basket_id: i64, values: &[u64]) -> Vec<Utxo> {
        values
            .iter()
            .enumerate()
            .map(|(n, satoshis)| store.add_utxo(USER, basket_id, OutPoint::new(TxId::from_hash([n as u8 + 1; 32]), 0), *satoshis))
            .collect()
    }

    fn request(target: i64, reservation: &str) -> FundingRequest<'_> {
        FundingRequest {
            target_satoshis: target,
            current_tx_size: 44,
            desired_change_count: 1,
            minimum_change_value: 1000,
            user_id: USER,
            basket_id: 100,
            reservation,
        }
    }

    #[tokio::test]
    async fn test_exact_cover_folds_change_into_fee() {
        // 44 + 148 bytes costs 1 sat at 1 sat/kb
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[5001]);
        let result = funder(store.clone(), 1, 10).fund(&Context::new(), &request(5000, "r1")).await.unwrap();
        assert_eq!(result.allocated.len(), 1);
        assert_eq!(result.fee, 1);
        assert_eq!(result.change_count, 0);
        assert_eq!(result.change_amount, 0);
    }

    #[tokio::test]
    async fn test_change_below_floor_folds_into_fee() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[5010]);
        let result = funder(store.clone(), 1, 10).fund(&Context::new(), &request(5000, "r1")).await.unwrap();
        assert_eq!(result.change_count, 0);
        assert_eq!(result.change_amount, 0);
        assert_eq!(result.fee, 10);

        // 6 outputs cannot fit, and a single one of 999 sats is still under the floor
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[6000]);
        let request = FundingRequest { desired_change_count: 6, ..request(5000, "r1") };
        let result = funder(store, 1, 10).fund(&Context::new(), &request).await.unwrap();
        assert_eq!((result.change_count, result.change_amount, result.fee), (0, 0, 1000));
    }

    #[tokio::test]
    async fn test_largest_first_with_change() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[1000, 9000, 3000]);
        let result = funder(store.clone(), 1, 10).fund(&Context::new(), &request(5000, "r1")).await.unwrap();
        assert_eq!(result.allocated.iter().map(|u| u.satoshis).collect::<Vec<_>>(), vec![9000]);
        assert_eq!(result.fee, 1);
        assert_eq!(result.change_count, 1);
        assert_eq!(result.change_amount, 3999);
        assert_eq!(result.allocated_satoshis(), 5000 + result.fee + result.change_amount);
    }

    #[tokio::test]
    async fn test_allocates_across_batches() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[1000, 1000, 1000, 1000, 1000]);
        let result = funder(store.clone(), 1, 2).fund(&Context::new(), &request(3500, "r1")).await.unwrap();
        assert_eq!(result.allocated.len(), 4);
        assert_eq!(result.allocated_satoshis(), 3500 + result.fee + result.change_amount);
    }

    #[tokio::test]
    async fn test_empty_owner_is_not_enough_funds() {
        let store = Arc::new(MemoryStore::new());
        let err = funder(store, 1, 10).fund(&Context::new(), &request(1, "r1")).await.unwrap_err();
        assert!(matches!(err, WalletError::NotEnoughFunds { available: 0, .. }));
    }

    #[tokio::test]
    async fn test_insufficient_funds_releases_claims() {
        let store = Arc::new(MemoryStore::new());
        let utxos = seed(&store, 100, &[1000, 2000]);
        let err = funder(store.clone(), 1, 10).fund(&Context::new(), &request(10_000, "r1")).await.unwrap_err();
        assert!(matches!(err, WalletError::NotEnoughFunds { available: 3000, .. }));
        for utxo in utxos {
            assert_eq!(store.reserved_by(utxo.output_id), None);
        }
    }

    #[tokio::test]
    async fn test_surplus_needs_no_inputs() {
        let store = Arc::new(MemoryStore::new());
        let result = funder(store, 1, 10).fund(&Context::new(), &request(-5000, "r1")).await.unwrap();
        assert!(result.allocated.is_empty());
        assert_eq!(result.fee, 1);
        assert_eq!(result.change_amount, 4999);
    }

    #[tokio::test]
    async fn test_concurrent_funding_shares_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[10_000]);
        let funder = Arc::new(funder(store.clone(), 1, 10));
        let (a, b) = tokio::join!(
            {
                let funder = funder.clone();
                async move { funder.fund(&Context::new(), &request(5000, "a")).await }
            },
            {
                let funder = funder.clone();
                async move { funder.fund(&Context::new(), &request(5000, "b")).await }
            }
        );
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|r| r.as_ref().is_err_and(WalletError::is_not_enough_funds)));
    }

    #[tokio::test]
    async fn test_change_count_shrinks_to_fit_floor() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[8000]);
        let request = FundingRequest { desired_change_count: 6, ..request(2000, "r1") };
        let result = funder(store, 1, 10).fund(&Context::new(), &request).await.unwrap();
        // 5999 change sats with a floor of 1000 can only fill 6 outputs at 5 x 1000 + 999
        assert_eq!(result.change_count, 6);
        assert_eq!(result.change_amount, 5999);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 100, &[8000]);
        let ctx = Context::new();
        ctx.cancel();
        let err = funder(store, 1, 10).fund(&ctx, &request(2000, "r1")).await.unwrap_err();
        assert!(matches!(err, WalletError::Cancelled));
    }
}
