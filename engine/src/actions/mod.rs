pub mod abandon;
pub mod create;
pub mod process;
pub mod send;
pub mod status;

use crate::commission::{CommissionLocker, CommissionPolicy};
use crate::error::WalletError;
use crate::fee::FeeCalculator;
use crate::funder::Funder;
use crate::random::Randomizer;
use crate::services::broadcast::{Broadcaster, EvidenceBuilder, SubmitQueue, submit_queue};
use crate::storage::Stores;
use std::sync::Arc;
use wallet_storage_cli::storage_config::{BasketPolicy, Commission, StorageConfig};

/// The authenticated caller of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Auth {
    pub user_id: i64,
}

pub struct PipelineDeps {
    pub stores: Stores,
    pub evidence: Arc<dyn EvidenceBuilder>,
    pub broadcasters: Vec<Arc<dyn Broadcaster>>,
    pub randomizer: Arc<dyn Randomizer>,
    pub commission_locker: Option<Arc<dyn CommissionLocker>>,
}

struct PipelineInner {
    stores: Stores,
    funder: Funder,
    randomizer: Arc<dyn Randomizer>,
    evidence: Arc<dyn EvidenceBuilder>,
    submit: SubmitQueue,
    commission: Option<CommissionPolicy>,
    default_basket: BasketPolicy,
    randomize_outputs: bool,
}

/// Creates, signs off and broadcasts actions. Cheap to clone.
#[derive(Clone)]
pub struct ActionPipeline {
    inner: Arc<PipelineInner>,
}

impl ActionPipeline {
    pub fn new(config: &StorageConfig, deps: PipelineDeps) -> Result<Self, WalletError> {
        let fee_calculator = FeeCalculator::new(&config.fee_model)?;
        let commission = match &config.commission {
            Commission::Disabled => None,
            Commission::Enabled { public_key, satoshis } => {
                let locker = deps.commission_locker.ok_or_else(|| {
                    WalletError::Configuration("commission is enabled but no commission locker was provided".to_string())
                })?;
                Some(CommissionPolicy { public_key: public_key.clone(), satoshis: *satoshis, locker })
            }
        };
        let funder = Funder::new(deps.stores.utxos.clone(), fee_calculator, config.candidate_batch_size);
        Ok(ActionPipeline {
            inner: Arc::new(PipelineInner {
                stores: deps.stores,
                funder,
                randomizer: deps.randomizer,
                evidence: deps.evidence,
                submit: submit_queue(deps.broadcasters),
                commission,
                default_basket: config.default_basket.clone(),
                randomize_outputs: config.randomize_outputs,
            }),
        })
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn funder(&self) -> &Funder {
        &self.inner.funder
    }
}
