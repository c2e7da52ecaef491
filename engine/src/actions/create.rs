use crate::actions::status::{BroadcastMode, TxStatus};
use crate::actions::{ActionPipeline, Auth};
use crate::change::ChangeDistributor;
use crate::error::{WalletError, to_i64};
use crate::funder::{FundingRequest, FundingResult};
use crate::random::{random_id, shuffle};
use crate::storage::{
    Basket, ClaimOutcome, NewCommission, NewOutput, NewTransaction, PURPOSE_CHANGE, PURPOSE_COMMISSION, ProvidedBy, Utxo,
};
use crate::tx::size::{P2PKH_INPUT_SIZE, P2PKH_OUTPUT_SIZE, input_size, output_size, transaction_size};
use crate::tx::{OutPoint, TxId};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use wallet_storage_cli::storage_config::DEFAULT_BASKET_NAME;
pub use wallet_storage_cli::storage_config::MAX_SATOSHIS;
use wallet_storage_signal::context::Context;

const MIN_DESCRIPTION_LENGTH: usize = 5;
const MAX_DESCRIPTION_LENGTH: usize = 2000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateActionOptions {
    pub accept_delayed_broadcast: bool,
    pub no_send: bool,
    /// Overrides the configured output shuffling for this action
    pub randomize_outputs: Option<bool>,
}

/// An output the caller already owns and spends in this action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateActionInput {
    pub outpoint: OutPoint,
    pub unlocking_script_length: u64,
    pub input_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateActionOutput {
    pub locking_script: Vec<u8>,
    pub satoshis: u64,
    pub output_description: String,
    /// Track the output in this basket of the caller
    pub basket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateActionArgs {
    pub description: String,
    pub inputs: Vec<CreateActionInput>,
    pub outputs: Vec<CreateActionOutput>,
    pub version: u32,
    pub lock_time: u32,
    pub options: CreateActionOptions,
    pub is_new_tx: bool,
    pub is_no_send: bool,
    pub is_delayed: bool,
}

impl Default for CreateActionArgs {
    fn default() -> Self {
        CreateActionArgs {
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            version: 1,
            lock_time: 0,
            options: CreateActionOptions::default(),
            is_new_tx: false,
            is_no_send: false,
            is_delayed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInput {
    pub vin: u32,
    pub outpoint: OutPoint,
    pub satoshis: u64,
    pub unlocking_script_length: u64,
    pub provided_by: ProvidedBy,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutput {
    pub vout: u32,
    pub satoshis: u64,
    /// Absent for change, the signer derives it from `derivation_suffix`
    pub locking_script: Option<Vec<u8>>,
    pub provided_by: ProvidedBy,
    pub purpose: String,
    pub basket: Option<String>,
    pub derivation_suffix: Option<String>,
    pub description: String,
}

/// Everything the client needs to sign the created action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateActionResult {
    pub reference: String,
    pub version: u32,
    pub lock_time: u32,
    pub inputs: Vec<ActionInput>,
    pub outputs: Vec<ActionOutput>,
    pub fee: u64,
    pub input_proof: Vec<u8>,
    pub status: TxStatus,
}

fn check_description(what: &str, description: &str, min: usize) -> Result<(), WalletError> {
    if (min..=MAX_DESCRIPTION_LENGTH).contains(&description.len()) {
        Ok(())
    } else {
        Err(WalletError::validation(format!(
            "{what} must be between {min} and {MAX_DESCRIPTION_LENGTH} bytes, got {}",
            description.len()
        )))
    }
}

impl CreateActionArgs {
    /// Rejects inconsistent flags and malformed outputs before anything is claimed
    pub fn validate(&self) -> Result<(), WalletError> {
        check_description("description", &self.description, MIN_DESCRIPTION_LENGTH)?;

        let has_content = !self.inputs.is_empty() || !self.outputs.is_empty();
        if self.is_new_tx != has_content {
            return Err(WalletError::validation(format!(
                "is_new_tx is {} but the action has {} inputs and {} outputs",
                self.is_new_tx,
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        if !self.is_new_tx {
            return Err(WalletError::validation("nothing to create, the action has no inputs or outputs"));
        }
        if self.is_delayed != self.options.accept_delayed_broadcast {
            return Err(WalletError::validation("is_delayed must match options.accept_delayed_broadcast"));
        }
        if self.is_no_send != self.options.no_send {
            return Err(WalletError::validation("is_no_send must match options.no_send"));
        }

        let mut total: u64 = 0;
        for (vout, output) in self.outputs.iter().enumerate() {
            if output.locking_script.is_empty() {
                return Err(WalletError::validation(format!("output {vout} has an empty locking script")));
            }
            if output.satoshis > MAX_SATOSHIS {
                return Err(WalletError::validation(format!("output {vout} exceeds the maximum of {MAX_SATOSHIS} satoshis")));
            }
            check_description(&format!("output {vout} description"), &output.output_description, 0)?;
            match output.basket.as_deref() {
                Some("") => return Err(WalletError::validation(format!("output {vout} has an empty basket name"))),
                Some(DEFAULT_BASKET_NAME) => {
                    return Err(WalletError::validation(format!("basket '{DEFAULT_BASKET_NAME}' is reserved for change")));
                }
                _ => {}
            }
            total = total.saturating_add(output.satoshis);
        }
        if total > MAX_SATOSHIS {
            return Err(WalletError::validation(format!("outputs total {total} exceeds {MAX_SATOSHIS} satoshis")));
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input.outpoint) {
                return Err(WalletError::validation(format!("input {} is listed twice", input.outpoint)));
            }
            check_description(&format!("input {} description", input.outpoint), &input.input_description, 0)?;
        }
        Ok(())
    }
}

struct ClaimedInput {
    utxo: Utxo,
    unlocking_script_length: u64,
    provided_by: ProvidedBy,
    description: String,
}

struct PlannedOutput {
    output: NewOutput,
    basket: Option<String>,
}

impl ActionPipeline {
    /// Funds and persists a new unsigned action. On any failure every claim made for it is released.
    pub async fn create_action(
        &self,
        ctx: &Context,
        auth: Auth,
        args: &CreateActionArgs,
    ) -> Result<CreateActionResult, WalletError> {
        args.validate()?;
        if ctx.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        let stores = &self.inner.stores;
        let policy = &self.inner.default_basket;
        let change_basket = stores.baskets.find_or_insert_basket(auth.user_id, DEFAULT_BASKET_NAME, policy).await?;
        let mut baskets = HashMap::new();
        for name in args.outputs.iter().filter_map(|o| o.basket.as_deref()).unique() {
            let basket = stores.baskets.find_or_insert_basket(auth.user_id, name, policy).await?;
            baskets.insert(name.to_string(), basket.basket_id);
        }

        let reference = random_id(16);
        match self.build_action(ctx, auth, args, &reference, &change_basket, &baskets).await {
            Ok(result) => Ok(result),
            Err(err) => {
                match stores.utxos.release(&reference).await {
                    Ok(released) => debug!("Released {} claims of failed action {}", released, reference),
                    Err(release_err) => warn!("Failed to release claims of action {}: {}", reference, release_err),
                }
                Err(err)
            }
        }
    }

    async fn build_action(
        &self,
        ctx: &Context,
        auth: Auth,
        args: &CreateActionArgs,
        reference: &str,
        change_basket: &Basket,
        baskets: &HashMap<String, i64>,
    ) -> Result<CreateActionResult, WalletError> {
        let inner = &self.inner;
        let stores = &inner.stores;

        let mut inputs = Vec::with_capacity(args.inputs.len());
        for input in &args.inputs {
            let utxo = stores.utxos.find_by_outpoint(auth.user_id, &input.outpoint).await?.ok_or_else(|| {
                WalletError::validation(format!("input {} is not a spendable output of this user", input.outpoint))
            })?;
            if stores.utxos.claim(&utxo, reference).await? == ClaimOutcome::AlreadyClaimed {
                return Err(WalletError::ConcurrencyConflict(format!(
                    "input {} is reserved by another action",
                    input.outpoint
                )));
            }
            inputs.push(ClaimedInput {
                utxo,
                unlocking_script_length: input.unlocking_script_length,
                provided_by: ProvidedBy::You,
                description: input.input_description.clone(),
            });
        }
        let provided_satoshis: u64 = inputs.iter().map(|i| i.utxo.satoshis).sum();

        let commission = self.commission_output()?;
        let commission_satoshis = commission.as_ref().map_or(0, |c| c.satoshis);
        let output_satoshis = args
            .outputs
            .iter()
            .try_fold(commission_satoshis, |total, o| total.checked_add(o.satoshis))
            .ok_or_else(|| WalletError::validation("outputs and commission total overflows"))?;
        let target = to_i64(output_satoshis, "outputs total")? - to_i64(provided_satoshis, "inputs total")?;

        let input_sizes: Vec<u64> = inputs.iter().map(|i| input_size(i.unlocking_script_length)).collect();
        let mut output_sizes: Vec<u64> = args.outputs.iter().map(|o| output_size(o.locking_script.len() as u64)).collect();
        if commission.is_some() {
            output_sizes.push(P2PKH_OUTPUT_SIZE);
        }
        let spendable = stores.utxos.count_spendable(auth.user_id, change_basket.basket_id).await?;
        let desired_change_count = (change_basket.desired_utxo_count as u64).saturating_sub(spendable).max(1) as u32;

        let funding = inner
            .funder
            .fund(
                ctx,
                &FundingRequest {
                    target_satoshis: target,
                    current_tx_size: transaction_size(&input_sizes, &output_sizes),
                    desired_change_count,
                    minimum_change_value: change_basket.min_utxo_value,
                    user_id: auth.user_id,
                    basket_id: change_basket.basket_id,
                    reservation: reference,
                },
            )
            .await?;
        let FundingResult { allocated, fee, change_count, change_amount } = funding;
        inputs.extend(allocated.into_iter().map(|utxo| ClaimedInput {
            unlocking_script_length: utxo.estimated_input_size.saturating_sub(input_size(0)),
            utxo,
            provided_by: ProvidedBy::Storage,
            description: String::new(),
        }));

        let change = ChangeDistributor::new(change_basket.min_utxo_value, inner.randomizer.clone())
            .distribute(change_count, change_amount)?;
        let mut outputs = self.plan_outputs(args, baskets, commission.as_ref(), change_basket, change);
        if args.options.randomize_outputs.unwrap_or(inner.randomize_outputs) {
            shuffle(inner.randomizer.as_ref(), &mut outputs);
        }
        for (vout, planned) in outputs.iter_mut().enumerate() {
            planned.output.vout = vout as u32;
        }

        let source_txids: Vec<TxId> = inputs.iter().map(|i| i.utxo.outpoint.txid).sorted().dedup().collect();
        let input_proof = inner.evidence.build_input_proof(&source_txids).await?;

        if ctx.is_cancelled() {
            return Err(WalletError::Cancelled);
        }
        let consumed_satoshis = inputs.iter().map(|i| i.utxo.satoshis).sum::<u64>();
        let transaction = NewTransaction {
            user_id: auth.user_id,
            status: TxStatus::Unsigned,
            reference: reference.to_string(),
            is_outgoing: true,
            satoshis: to_i64(change_amount, "change")? - to_i64(consumed_satoshis, "inputs total")?,
            description: args.description.clone(),
            version: args.version,
            lock_time: args.lock_time,
            broadcast_mode: BroadcastMode::from_flags(args.is_no_send, args.is_delayed),
            input_proof: Some(input_proof.clone()),
            outputs: outputs.iter().map(|p| p.output.clone()).collect(),
            inputs: inputs.iter().map(|i| i.utxo.output_id).collect(),
            commission: commission.map(|c| c.record),
        };
        let transaction_id = stores.transactions.create_transaction(&transaction).await?;
        info!(
            "Created action {} (#{}) for user {}: {} inputs, {} outputs, fee {} sats",
            reference,
            transaction_id,
            auth.user_id,
            inputs.len(),
            outputs.len(),
            fee
        );

        Ok(CreateActionResult {
            reference: reference.to_string(),
            version: args.version,
            lock_time: args.lock_time,
            inputs: inputs
                .into_iter()
                .enumerate()
                .map(|(vin, i)| ActionInput {
                    vin: vin as u32,
                    outpoint: i.utxo.outpoint,
                    satoshis: i.utxo.satoshis,
                    unlocking_script_length: i.unlocking_script_length,
                    provided_by: i.provided_by,
                    description: i.description,
                })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|p| ActionOutput {
                    vout: p.output.vout,
                    satoshis: p.output.satoshis,
                    locking_script: p.output.locking_script,
                    provided_by: p.output.provided_by,
                    purpose: p.output.purpose,
                    basket: p.basket,
                    derivation_suffix: p.output.derivation_suffix,
                    description: p.output.description,
                })
                .collect(),
            fee,
            input_proof,
            status: TxStatus::Unsigned,
        })
    }

    fn commission_output(&self) -> Result<Option<PlannedCommission>, WalletError> {
        let Some(policy) = &self.inner.commission else { return Ok(None) };
        let key_offset = random_id(32);
        let locking_script = policy.locker.locking_script(&policy.public_key, &key_offset)?;
        Ok(Some(PlannedCommission {
            satoshis: policy.satoshis,
            record: NewCommission { satoshis: policy.satoshis, key_offset, locking_script },
        }))
    }

    fn plan_outputs(
        &self,
        args: &CreateActionArgs,
        baskets: &HashMap<String, i64>,
        commission: Option<&PlannedCommission>,
        change_basket: &Basket,
        change: impl Iterator<Item = u64>,
    ) -> Vec<PlannedOutput> {
        let user_outputs = args.outputs.iter().map(|o| PlannedOutput {
            output: NewOutput {
                vout: 0,
                satoshis: o.satoshis,
                locking_script: Some(o.locking_script.clone()),
                basket_id: o.basket.as_ref().and_then(|name| baskets.get(name).copied()),
                is_change: false,
                provided_by: ProvidedBy::You,
                purpose: String::new(),
                derivation_suffix: None,
                description: o.output_description.clone(),
                estimated_input_size: P2PKH_INPUT_SIZE,
            },
            basket: o.basket.clone(),
        });
        let commission_output = commission.map(|c| PlannedOutput {
            output: NewOutput {
                vout: 0,
                satoshis: c.satoshis,
                locking_script: Some(c.record.locking_script.clone()),
                basket_id: None,
                is_change: false,
                provided_by: ProvidedBy::Storage,
                purpose: PURPOSE_COMMISSION.to_string(),
                derivation_suffix: None,
                description: String::new(),
                estimated_input_size: P2PKH_INPUT_SIZE,
            },
            basket: None,
        });
        let change_outputs = change.map(|satoshis| PlannedOutput {
            output: NewOutput {
                vout: 0,
                satoshis,
                locking_script: None,
                basket_id: Some(change_basket.basket_id),
                is_change: true,
                provided_by: ProvidedBy::Storage,
                purpose: PURPOSE_CHANGE.to_string(),
                derivation_suffix: Some(random_id(16)),
                description: String::new(),
                estimated_input_size: P2PKH_INPUT_SIZE,
            },
            basket: Some(change_basket.name.clone()),
        });
        user_outputs.chain(commission_output).chain(change_outputs).collect()
    }
}

struct PlannedCommission {
    satoshis: u64,
    record: NewCommission,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(satoshis: u64) -> CreateActionOutput {
        CreateActionOutput {
            locking_script: vec![0x76, 0xa9],
            satoshis,
            output_description: "payment".to_string(),
            basket: None,
        }
    }

    fn args() -> CreateActionArgs {
        CreateActionArgs {
            description: "pay the rent".to_string(),
            outputs: vec![output(5000)],
            is_new_tx: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_args() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn test_description_length() {
        let args = CreateActionArgs { description: "pay".to_string(), ..args() };
        assert!(matches!(args.validate(), Err(WalletError::Validation(_))));
    }

    #[test]
    fn test_flags_must_agree() {
        assert!(CreateActionArgs { is_new_tx: false, ..args() }.validate().is_err());
        assert!(CreateActionArgs { is_delayed: true, ..args() }.validate().is_err());
        assert!(CreateActionArgs { is_no_send: true, ..args() }.validate().is_err());

        let options = CreateActionOptions { no_send: true, accept_delayed_broadcast: true, ..Default::default() };
        assert!(CreateActionArgs { is_no_send: true, is_delayed: true, options, ..args() }.validate().is_ok());
    }

    #[test]
    fn test_empty_action_is_rejected() {
        let args = CreateActionArgs { outputs: vec![], is_new_tx: false, ..args() };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_output_checks() {
        let empty_script = CreateActionOutput { locking_script: vec![], ..output(1) };
        assert!(CreateActionArgs { outputs: vec![empty_script], ..args() }.validate().is_err());

        assert!(CreateActionArgs { outputs: vec![output(MAX_SATOSHIS + 1)], ..args() }.validate().is_err());
        assert!(CreateActionArgs { outputs: vec![output(MAX_SATOSHIS), output(1)], ..args() }.validate().is_err());

        let reserved = CreateActionOutput { basket: Some(DEFAULT_BASKET_NAME.to_string()), ..output(1) };
        assert!(CreateActionArgs { outputs: vec![reserved], ..args() }.validate().is_err());
    }

    #[test]
    fn test_duplicate_inputs() {
        let input = CreateActionInput {
            outpoint: OutPoint::new(TxId::from_hash([1; 32]), 0),
            unlocking_script_length: 107,
            input_description: String::new(),
        };
        let args = CreateActionArgs { inputs: vec![input.clone(), input], ..args() };
        assert!(args.validate().is_err());
    }
}
