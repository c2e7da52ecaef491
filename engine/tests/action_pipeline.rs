use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wallet_storage_cli::storage_config::{BasketPolicy, Commission, DEFAULT_BASKET_NAME, MAX_SATOSHIS, StorageConfig};
use wallet_storage_engine::actions::create::{
    CreateActionArgs, CreateActionInput, CreateActionOptions, CreateActionOutput, CreateActionResult,
};
use wallet_storage_engine::actions::process::ProcessActionArgs;
use wallet_storage_engine::actions::status::{BroadcastMode, TxStatus};
use wallet_storage_engine::actions::{ActionPipeline, Auth, PipelineDeps};
use wallet_storage_engine::commission::CommissionLocker;
use wallet_storage_engine::error::WalletError;
use wallet_storage_engine::random::{Randomizer, SequenceRandomizer, ZeroRandomizer};
use wallet_storage_engine::services::broadcast::{Broadcaster, EvidenceBuilder, RawEvidenceBuilder, SubmitOutcome};
use wallet_storage_engine::storage::memory::MemoryStore;
use wallet_storage_engine::storage::{
    Basket, NewOutput, NewTransaction, OutputStore, PURPOSE_CHANGE, PURPOSE_COMMISSION, ProvidedBy, Stores, TransactionRecord,
    TransactionStore, Utxo,
};
use wallet_storage_engine::tx::raw::{RawInput, RawOutput, RawTransaction};
use wallet_storage_engine::tx::{OutPoint, TxId};
use wallet_storage_signal::context::Context;

const USER: Auth = Auth { user_id: 1 };
const PAYMENT_SCRIPT: [u8; 3] = [0x76, 0xa9, 0x14];
const PUB_KEY: &str = "02a1633cafcc01ebfb6d78e39f687a1f0995c62fc95f51ead10a02ee0be551b5dc";

struct Scripted {
    name: &'static str,
    outcome: Result<SubmitOutcome, String>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(name: &'static str, outcome: Result<SubmitOutcome, String>) -> Arc<Self> {
        Arc::new(Scripted { name, outcome, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broadcaster for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn submit(&self, _ctx: &Context, bundle: &[u8]) -> Result<SubmitOutcome, WalletError> {
        assert!(!bundle.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map_err(WalletError::TransientService)
    }
}

struct NoBundle;

#[async_trait]
impl EvidenceBuilder for NoBundle {
    async fn build_input_proof(&self, source_txids: &[TxId]) -> Result<Vec<u8>, WalletError> {
        RawEvidenceBuilder.build_input_proof(source_txids).await
    }

    async fn build_evidence_bundle(&self, _txid: &TxId, _raw_tx: &[u8], _input_proof: &[u8]) -> Result<Vec<u8>, WalletError> {
        Err(WalletError::TransientService("proof service offline".to_string()))
    }
}

struct OffsetLocker;

impl CommissionLocker for OffsetLocker {
    fn locking_script(&self, public_key: &str, key_offset: &str) -> Result<Vec<u8>, WalletError> {
        assert_eq!(public_key, PUB_KEY);
        let mut script = vec![0xaa];
        script.extend_from_slice(key_offset.as_bytes());
        Ok(script)
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    pipeline: ActionPipeline,
    basket: Basket,
    ctx: Context,
}

fn config(desired_utxo_count: u32) -> StorageConfig {
    StorageConfig {
        default_basket: BasketPolicy { desired_utxo_count, min_utxo_value: 1000 },
        randomize_outputs: false,
        ..Default::default()
    }
}

fn harness_with(
    config: StorageConfig,
    broadcasters: Vec<Arc<dyn Broadcaster>>,
    evidence: Arc<dyn EvidenceBuilder>,
    commission_locker: Option<Arc<dyn CommissionLocker>>,
) -> Harness {
    harness_randomized(config, broadcasters, evidence, commission_locker, Arc::new(ZeroRandomizer))
}

fn harness_randomized(
    config: StorageConfig,
    broadcasters: Vec<Arc<dyn Broadcaster>>,
    evidence: Arc<dyn EvidenceBuilder>,
    commission_locker: Option<Arc<dyn CommissionLocker>>,
    randomizer: Arc<dyn Randomizer>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let basket = store.add_basket(USER.user_id, DEFAULT_BASKET_NAME, &config.default_basket);
    let deps = PipelineDeps {
        stores: Stores::from_shared(store.clone()),
        evidence,
        broadcasters,
        randomizer,
        commission_locker,
    };
    let pipeline = ActionPipeline::new(&config, deps).unwrap();
    Harness { store, pipeline, basket, ctx: Context::new() }
}

fn harness(broadcasters: Vec<Arc<dyn Broadcaster>>) -> Harness {
    harness_with(config(1), broadcasters, Arc::new(RawEvidenceBuilder), None)
}

fn outpoint(n: u8) -> OutPoint {
    OutPoint::new(TxId::from_hash([n; 32]), 0)
}

fn payment(satoshis: u64) -> CreateActionArgs {
    CreateActionArgs {
        description: "pay the rent".to_string(),
        outputs: vec![CreateActionOutput {
            locking_script: PAYMENT_SCRIPT.to_vec(),
            satoshis,
            output_description: "landlord".to_string(),
            basket: None,
        }],
        is_new_tx: true,
        ..Default::default()
    }
}

fn change_script(vout: u32) -> Vec<u8> {
    vec![0x76, 0xa9, 0x14, vout as u8, 0x88, 0xac]
}

/// Builds the signed form of a created action, deriving change scripts from their vout
fn sign(created: &CreateActionResult) -> RawTransaction {
    RawTransaction {
        version: created.version,
        inputs: created
            .inputs
            .iter()
            .map(|input| RawInput {
                previous_outpoint: input.outpoint,
                unlocking_script: vec![0x51; input.unlocking_script_length as usize],
                sequence: u32::MAX,
            })
            .collect(),
        outputs: created
            .outputs
            .iter()
            .map(|output| RawOutput {
                satoshis: output.satoshis,
                locking_script: output.locking_script.clone().unwrap_or_else(|| change_script(output.vout)),
            })
            .collect(),
        lock_time: created.lock_time,
    }
}

fn process_args(reference: &str, signed: &RawTransaction) -> ProcessActionArgs {
    let raw_tx = signed.serialize().unwrap();
    ProcessActionArgs {
        is_new_tx: true,
        reference: Some(reference.to_string()),
        txid: Some(TxId::of_raw(&raw_tx)),
        raw_tx: Some(raw_tx),
        ..Default::default()
    }
}

impl Harness {
    fn fund(&self, n: u8, satoshis: u64) -> Utxo {
        self.store.add_utxo(USER.user_id, self.basket.basket_id, outpoint(n), satoshis)
    }

    async fn record(&self, reference: &str) -> TransactionRecord {
        self.store.find_by_reference(USER.user_id, reference).await.unwrap().unwrap()
    }

    /// Stores an unsigned record paying `PAYMENT_SCRIPT` and returns a matching signed transaction
    async fn insert_record(&self, reference: &str, is_outgoing: bool, input_proof: Option<Vec<u8>>) -> RawTransaction {
        let transaction = NewTransaction {
            user_id: USER.user_id,
            status: TxStatus::Unsigned,
            reference: reference.to_string(),
            is_outgoing,
            satoshis: -5000,
            description: "pay the rent".to_string(),
            version: 1,
            lock_time: 0,
            broadcast_mode: BroadcastMode::Immediate,
            input_proof,
            outputs: vec![NewOutput {
                vout: 0,
                satoshis: 5000,
                locking_script: Some(PAYMENT_SCRIPT.to_vec()),
                basket_id: None,
                is_change: false,
                provided_by: ProvidedBy::You,
                purpose: String::new(),
                derivation_suffix: None,
                description: "landlord".to_string(),
                estimated_input_size: 148,
            }],
            inputs: vec![],
            commission: None,
        };
        self.store.create_transaction(&transaction).await.unwrap();
        RawTransaction {
            version: 1,
            inputs: vec![RawInput { previous_outpoint: outpoint(9), unlocking_script: vec![0x51; 107], sequence: u32::MAX }],
            outputs: vec![RawOutput { satoshis: 5000, locking_script: PAYMENT_SCRIPT.to_vec() }],
            lock_time: 0,
        }
    }

    async fn create_and_process(&self, args: &CreateActionArgs, no_send: bool, delayed: bool) -> (CreateActionResult, TxId, TxStatus) {
        let created = self.pipeline.create_action(&self.ctx, USER, args).await.unwrap();
        let signed = sign(&created);
        let args = ProcessActionArgs { is_no_send: no_send, is_delayed: delayed, ..process_args(&created.reference, &signed) };
        let processed = self.pipeline.process_action(&self.ctx, USER, &args).await.unwrap();
        assert_eq!(processed.txid, signed.txid());
        (created, processed.txid, processed.status)
    }
}

#[tokio::test]
async fn test_immediate_broadcast_reaches_unproven() {
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    let h = harness(vec![arc.clone()]);
    let utxo = h.fund(1, 10_000);

    let (created, txid, status) = h.create_and_process(&payment(5000), false, false).await;
    assert_eq!(created.status, TxStatus::Unsigned);
    assert_eq!(created.inputs.len(), 1);
    assert_eq!(created.inputs[0].provided_by, ProvidedBy::Storage);
    assert_eq!(created.inputs[0].unlocking_script_length, 107);
    let paid: u64 = created.outputs.iter().map(|o| o.satoshis).sum();
    assert_eq!(paid + created.fee, 10_000);
    assert_eq!(created.outputs.iter().filter(|o| o.purpose == PURPOSE_CHANGE).count(), 1);
    assert_eq!(status, TxStatus::Unproven);
    assert_eq!(arc.calls(), 1);

    let record = h.record(&created.reference).await;
    assert_eq!(record.status, TxStatus::Unproven);
    assert_eq!(record.txid, Some(txid));
    assert_eq!(h.store.spent_by(utxo.output_id), Some(record.transaction_id));
    assert_eq!(h.store.broadcast_request(&txid).unwrap().status, "unmined");

    let outputs = h.store.find_outputs_by_transaction(record.transaction_id).await.unwrap();
    let change = outputs.iter().find(|o| o.is_change).unwrap();
    assert!(change.spendable);
    assert_eq!(change.locking_script, Some(change_script(change.vout)));
    let payment = outputs.iter().find(|o| !o.is_change).unwrap();
    assert!(!payment.spendable);
}

#[tokio::test]
async fn test_no_send_is_never_broadcast() {
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    let h = harness(vec![arc.clone()]);
    h.fund(1, 10_000);

    let options = CreateActionOptions { no_send: true, ..Default::default() };
    let args = CreateActionArgs { is_no_send: true, options, ..payment(5000) };
    let (created, txid, status) = h.create_and_process(&args, true, false).await;
    assert_eq!(status, TxStatus::NoSend);
    assert_eq!(arc.calls(), 0);
    assert!(h.store.broadcast_request(&txid).is_none());

    let before = h.record(&created.reference).await;
    let history = h.store.history(before.transaction_id).await.unwrap();
    let signed = sign(&created);
    let again = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &signed)).await;
    assert!(matches!(&again, Err(WalletError::Validation(msg)) if msg.contains("nosend")), "{again:?}");
    assert_eq!(h.record(&created.reference).await, before);
    assert_eq!(h.store.history(before.transaction_id).await.unwrap(), history);
}

#[tokio::test]
async fn test_delayed_broadcast_is_sent_later() {
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    let h = harness(vec![arc.clone()]);
    h.fund(1, 10_000);

    let options = CreateActionOptions { accept_delayed_broadcast: true, ..Default::default() };
    let args = CreateActionArgs { is_delayed: true, options, ..payment(5000) };
    let (created, _, status) = h.create_and_process(&args, false, true).await;
    assert_eq!(status, TxStatus::Unprocessed);
    assert_eq!(arc.calls(), 0);

    let outcomes = h.pipeline.send_waiting(&h.ctx, 10).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, created.reference);
    assert_eq!(outcomes[0].1.as_ref().ok(), Some(&TxStatus::Unproven));
    assert_eq!(h.record(&created.reference).await.status, TxStatus::Unproven);
    assert!(h.pipeline.send_waiting(&h.ctx, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_txid_mismatch_changes_nothing() {
    let h = harness(vec![Scripted::new("arc", Ok(SubmitOutcome::Accepted))]);
    h.fund(1, 10_000);
    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();

    let args = ProcessActionArgs { txid: Some(TxId::from_hash([7; 32])), ..process_args(&created.reference, &sign(&created)) };
    let result = h.pipeline.process_action(&h.ctx, USER, &args).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));

    let record = h.record(&created.reference).await;
    assert_eq!(record.status, TxStatus::Unsigned);
    assert!(record.raw_tx.is_none());
    assert!(record.txid.is_none());
}

#[tokio::test]
async fn test_signed_outputs_must_match() {
    let h = harness(vec![Scripted::new("arc", Ok(SubmitOutcome::Accepted))]);
    h.fund(1, 10_000);
    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();
    let payment_vout = created.outputs.iter().position(|o| o.purpose.is_empty()).unwrap();

    let mut overpaid = sign(&created);
    overpaid.outputs[payment_vout].satoshis += 1;
    let result = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &overpaid)).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));

    let mut redirected = sign(&created);
    redirected.outputs[payment_vout].locking_script = vec![0x6a];
    let result = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &redirected)).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));

    let mut extra_input = sign(&created);
    extra_input.inputs.push(RawInput { previous_outpoint: outpoint(9), unlocking_script: vec![], sequence: 0 });
    let result = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &extra_input)).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));

    let mut relocked = sign(&created);
    relocked.lock_time = 500;
    let result = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &relocked)).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));

    assert_eq!(h.record(&created.reference).await.status, TxStatus::Unsigned);
}

#[tokio::test]
async fn test_rejection_fails_and_releases_inputs() {
    let rejected = SubmitOutcome::Rejected { reason: "missing inputs".to_string() };
    let h = harness(vec![Scripted::new("arc", Ok(rejected))]);
    let utxo = h.fund(1, 10_000);

    let (created, txid, status) = h.create_and_process(&payment(5000), false, false).await;
    assert_eq!(status, TxStatus::Failed);
    let record = h.record(&created.reference).await;
    assert_eq!(record.status, TxStatus::Failed);
    assert_eq!(h.store.spent_by(utxo.output_id), None);
    assert!(h.store.output(utxo.output_id).unwrap().spendable);
    assert_eq!(h.store.broadcast_request(&txid).unwrap().status, "invalid");

    let outputs = h.store.find_outputs_by_transaction(record.transaction_id).await.unwrap();
    assert!(outputs.iter().all(|o| !o.spendable));

    let history = h.store.history(record.transaction_id).await.unwrap();
    assert!(history.iter().any(|note| note.contains("missing inputs")));

    let again = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &sign(&created))).await;
    assert!(matches!(again, Err(WalletError::Validation(_))));
    assert_eq!(h.record(&created.reference).await, record);
    assert_eq!(h.store.history(record.transaction_id).await.unwrap(), history);
}

#[tokio::test]
async fn test_only_outgoing_records_are_processed() {
    let h = harness(vec![Scripted::new("arc", Ok(SubmitOutcome::Accepted))]);
    let signed = h.insert_record("incoming", false, Some(vec![1])).await;

    let result = h.pipeline.process_action(&h.ctx, USER, &process_args("incoming", &signed)).await;
    assert!(matches!(&result, Err(WalletError::Validation(msg)) if msg.contains("not outgoing")), "{result:?}");
    let record = h.record("incoming").await;
    assert_eq!(record.status, TxStatus::Unsigned);
    assert!(record.txid.is_none() && record.raw_tx.is_none());
}

#[tokio::test]
async fn test_record_without_input_proof_is_rejected() {
    let h = harness(vec![Scripted::new("arc", Ok(SubmitOutcome::Accepted))]);
    for (reference, proof) in [("unproofed", None), ("empty-proof", Some(vec![]))] {
        let signed = h.insert_record(reference, true, proof).await;
        let result = h.pipeline.process_action(&h.ctx, USER, &process_args(reference, &signed)).await;
        assert!(matches!(&result, Err(WalletError::Validation(msg)) if msg.contains("no input proof")), "{result:?}");
        let record = h.record(reference).await;
        assert_eq!(record.status, TxStatus::Unsigned);
        assert!(record.txid.is_none() && record.raw_tx.is_none());
        assert!(h.store.broadcast_request(&signed.txid()).is_none());
    }
}

#[tokio::test]
async fn test_failing_broadcasters_leave_sending() {
    let first = Scripted::new("first", Err("timeout".to_string()));
    let second = Scripted::new("second", Err("503".to_string()));
    let h = harness(vec![first.clone(), second.clone()]);
    let utxo = h.fund(1, 10_000);

    let (created, _, status) = h.create_and_process(&payment(5000), false, false).await;
    assert_eq!(status, TxStatus::Sending);
    assert_eq!((first.calls(), second.calls()), (1, 1));

    let record = h.record(&created.reference).await;
    assert_eq!(record.status, TxStatus::Sending);
    assert_eq!(h.store.spent_by(utxo.output_id), Some(record.transaction_id));
    let history = h.store.history(record.transaction_id).await.unwrap();
    assert!(history.iter().any(|note| note.starts_with("broadcast:") && note.contains("503")));

    let outcomes = h.pipeline.send_waiting(&h.ctx, 10).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1.as_ref().ok(), Some(&TxStatus::Sending));
    assert_eq!((first.calls(), second.calls()), (2, 2));
}

#[tokio::test]
async fn test_missing_evidence_leaves_sending() {
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    let h = harness_with(config(1), vec![arc.clone()], Arc::new(NoBundle), None);
    h.fund(1, 10_000);

    let (created, _, status) = h.create_and_process(&payment(5000), false, false).await;
    assert_eq!(status, TxStatus::Sending);
    assert_eq!(arc.calls(), 0);
    let record = h.record(&created.reference).await;
    let history = h.store.history(record.transaction_id).await.unwrap();
    assert!(history.iter().any(|note| note.contains("evidence failed")));
}

#[tokio::test]
async fn test_already_sent_request_is_not_resubmitted() {
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    let h = harness(vec![arc.clone()]);
    h.fund(1, 10_000);
    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();
    let signed = sign(&created);
    let raw_tx = signed.serialize().unwrap();
    h.store.set_broadcast_status(&TxId::of_raw(&raw_tx), &raw_tx, "unmined");

    let processed = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &signed)).await.unwrap();
    assert_eq!(processed.status, TxStatus::Unproven);
    assert_eq!(arc.calls(), 0);
}

#[tokio::test]
async fn test_double_spent_request_fails() {
    let h = harness(vec![Scripted::new("arc", Ok(SubmitOutcome::Accepted))]);
    let utxo = h.fund(1, 10_000);
    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();
    let signed = sign(&created);
    let raw_tx = signed.serialize().unwrap();
    h.store.set_broadcast_status(&TxId::of_raw(&raw_tx), &raw_tx, "doubleSpend");

    let processed = h.pipeline.process_action(&h.ctx, USER, &process_args(&created.reference, &signed)).await.unwrap();
    assert_eq!(processed.status, TxStatus::Failed);
    assert_eq!(h.store.spent_by(utxo.output_id), None);
}

#[tokio::test]
async fn test_not_enough_funds_releases_claims() {
    let h = harness(vec![]);
    let small = h.fund(1, 1000);
    let other = h.fund(2, 2000);

    let result = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await;
    assert!(result.unwrap_err().is_not_enough_funds());
    assert_eq!(h.store.reserved_by(small.output_id), None);
    assert_eq!(h.store.reserved_by(other.output_id), None);
    assert_eq!(h.store.transaction_count(), 0);

    let stranger = Auth { user_id: 2 };
    match h.pipeline.create_action(&h.ctx, stranger, &payment(5000)).await {
        Err(WalletError::NotEnoughFunds { available, .. }) => assert_eq!(available, 0),
        other => panic!("expected NotEnoughFunds, got {other:?}"),
    }
}

#[tokio::test]
async fn test_user_input_covers_outputs() {
    let h = harness(vec![]);
    let tokens = h.store.add_basket(USER.user_id, "tokens", &BasketPolicy { desired_utxo_count: 1, min_utxo_value: 1 });
    let own = h.store.add_utxo(USER.user_id, tokens.basket_id, outpoint(3), 20_000);
    let pool = h.fund(1, 50_000);

    let args = CreateActionArgs {
        inputs: vec![CreateActionInput {
            outpoint: own.outpoint,
            unlocking_script_length: 107,
            input_description: "my coin".to_string(),
        }],
        ..payment(5000)
    };
    let created = h.pipeline.create_action(&h.ctx, USER, &args).await.unwrap();
    assert_eq!(created.inputs.len(), 1);
    assert_eq!(created.inputs[0].provided_by, ProvidedBy::You);
    assert_eq!(created.inputs[0].description, "my coin");
    let change: u64 = created.outputs.iter().filter(|o| o.purpose == PURPOSE_CHANGE).map(|o| o.satoshis).sum();
    assert_eq!(change + 5000 + created.fee, 20_000);
    assert_eq!(h.store.reserved_by(pool.output_id), None);

    let second = h.pipeline.create_action(&h.ctx, USER, &args).await;
    assert!(matches!(second, Err(WalletError::Validation(_))));
}

#[tokio::test]
async fn test_change_is_split_towards_desired_count() {
    let h = harness_with(config(4), vec![], Arc::new(RawEvidenceBuilder), None);
    h.fund(1, 100_000);

    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();
    let change: Vec<_> = created.outputs.iter().filter(|o| o.purpose == PURPOSE_CHANGE).collect();
    assert_eq!(change.len(), 3);
    assert!(change.iter().all(|o| o.satoshis >= 1000 && o.locking_script.is_none()));
    assert!(change.iter().all(|o| o.derivation_suffix.is_some()));
    assert_eq!(change.iter().map(|o| o.satoshis).sum::<u64>() + 5000 + created.fee, 100_000);
    assert!(created.outputs.iter().enumerate().all(|(vout, o)| o.vout == vout as u32));
}

#[tokio::test]
async fn test_commission_output() {
    let config = StorageConfig {
        commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: 10 },
        ..config(1)
    };
    let h = harness_with(config.clone(), vec![], Arc::new(RawEvidenceBuilder), Some(Arc::new(OffsetLocker)));
    h.fund(1, 10_000);

    let created = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await.unwrap();
    let commission = created.outputs.iter().find(|o| o.purpose == PURPOSE_COMMISSION).unwrap();
    assert_eq!(commission.satoshis, 10);
    assert_eq!(commission.provided_by, ProvidedBy::Storage);
    let paid: u64 = created.outputs.iter().map(|o| o.satoshis).sum();
    assert_eq!(paid + created.fee, 10_000);

    let record = h.record(&created.reference).await;
    let stored = h.store.commission(record.transaction_id).unwrap();
    assert_eq!(stored.key_offset.len(), 64);
    assert_eq!(commission.locking_script.as_ref(), Some(&stored.locking_script));

    let deps = PipelineDeps {
        stores: Stores::from_shared(Arc::new(MemoryStore::new())),
        evidence: Arc::new(RawEvidenceBuilder),
        broadcasters: vec![],
        randomizer: Arc::new(ZeroRandomizer),
        commission_locker: None,
    };
    assert!(matches!(ActionPipeline::new(&config, deps), Err(WalletError::Configuration(_))));
}

#[tokio::test]
async fn test_shuffled_outputs_are_renumbered() {
    let config = StorageConfig {
        commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: 10 },
        randomize_outputs: true,
        ..config(1)
    };
    let arc = Scripted::new("arc", Ok(SubmitOutcome::Accepted));
    // swaps the last output with the first, then keeps the middle in place
    let randomizer = Arc::new(SequenceRandomizer::new([0, 1]));
    let h = harness_randomized(config, vec![arc.clone()], Arc::new(RawEvidenceBuilder), Some(Arc::new(OffsetLocker)), randomizer);
    h.fund(1, 10_000);

    let (created, _, status) = h.create_and_process(&payment(5000), false, false).await;
    assert_eq!(status, TxStatus::Unproven);
    assert_eq!(arc.calls(), 1);
    let purposes: Vec<&str> = created.outputs.iter().map(|o| o.purpose.as_str()).collect();
    assert_eq!(purposes, vec![PURPOSE_CHANGE, PURPOSE_COMMISSION, ""]);
    assert!(created.outputs.iter().enumerate().all(|(vout, o)| o.vout == vout as u32));

    let record = h.record(&created.reference).await;
    let outputs = h.store.find_outputs_by_transaction(record.transaction_id).await.unwrap();
    let change = outputs.iter().find(|o| o.is_change).unwrap();
    assert_eq!(change.vout, 0);
    assert_eq!(change.locking_script, Some(change_script(0)));
    assert!(change.spendable);
    let commission = outputs.iter().find(|o| o.purpose == PURPOSE_COMMISSION).unwrap();
    assert_eq!(commission.vout, 1);
    assert_eq!(outputs.iter().find(|o| o.purpose.is_empty()).unwrap().vout, 2);
}

#[tokio::test]
async fn test_commission_at_supply_limit_is_not_enough_funds() {
    let config = StorageConfig {
        commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: MAX_SATOSHIS },
        ..config(1)
    };
    let h = harness_with(config, vec![], Arc::new(RawEvidenceBuilder), Some(Arc::new(OffsetLocker)));
    let utxo = h.fund(1, 10_000);

    let result = h.pipeline.create_action(&h.ctx, USER, &payment(MAX_SATOSHIS)).await;
    assert!(result.unwrap_err().is_not_enough_funds());
    assert_eq!(h.store.reserved_by(utxo.output_id), None);
    assert_eq!(h.store.transaction_count(), 0);
}

#[tokio::test]
async fn test_concurrent_creates_claim_exclusively() {
    let h = harness(vec![]);
    let utxo = h.fund(1, 10_000);

    let args = payment(5000);
    let (a, b) = tokio::join!(
        h.pipeline.create_action(&h.ctx, USER, &args),
        h.pipeline.create_action(&h.ctx, USER, &args)
    );
    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(lost.is_not_enough_funds());
    assert_eq!(h.store.transaction_count(), 1);
    assert_eq!(h.store.spent_by(utxo.output_id), Some(h.record(&won.reference).await.transaction_id));
}

#[tokio::test]
async fn test_abandoned_actions_are_aborted() {
    let h = harness(vec![]);
    let old = h.fund(1, 10_500);
    let fresh = h.fund(2, 10_000);

    let stale = h.pipeline.create_action(&h.ctx, USER, &payment(9000)).await.unwrap();
    let recent = h.pipeline.create_action(&h.ctx, USER, &payment(9000)).await.unwrap();
    let stale_id = h.record(&stale.reference).await.transaction_id;
    h.store.set_updated_at(stale_id, Utc::now() - chrono::Duration::hours(2));

    let aborted = h.pipeline.abort_abandoned(&h.ctx, Duration::from_secs(3600), 10).await.unwrap();
    assert_eq!(aborted, 1);
    assert_eq!(h.record(&stale.reference).await.status, TxStatus::Failed);
    assert_eq!(h.record(&recent.reference).await.status, TxStatus::Unsigned);
    assert_eq!(h.store.spent_by(old.output_id), None);
    assert!(h.store.spent_by(fresh.output_id).is_some());

    let signed = sign(&stale);
    let result = h.pipeline.process_action(&h.ctx, USER, &process_args(&stale.reference, &signed)).await;
    assert!(matches!(result, Err(WalletError::Validation(_))));
}

#[tokio::test]
async fn test_cancelled_create_claims_nothing() {
    let h = harness(vec![]);
    let utxo = h.fund(1, 10_000);
    h.ctx.cancel();

    let result = h.pipeline.create_action(&h.ctx, USER, &payment(5000)).await;
    assert!(matches!(result, Err(WalletError::Cancelled)));
    assert_eq!(h.store.reserved_by(utxo.output_id), None);
    assert_eq!(h.store.transaction_count(), 0);
}
