use crate::error::WalletError;
use crate::tx::{OutPoint, TxId};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::transaction::{Transaction, TxIn, TxOut, Version};
use bitcoin::{Amount, ScriptBuf, Sequence, Txid, Witness};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    pub previous_outpoint: OutPoint,
    pub unlocking_script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
}

/// A transaction in the legacy serialization format. Witness data is never accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub version: u32,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
    pub lock_time: u32,
}

impl RawTransaction {
    pub fn parse(bytes: &[u8]) -> Result<Self, WalletError> {
        let tx: Transaction =
            deserialize(bytes).map_err(|e| WalletError::validation(format!("malformed transaction: {e}")))?;
        if tx.input.iter().any(|input| !input.witness.is_empty()) {
            return Err(WalletError::validation("witness serialization is not supported"));
        }
        Ok(RawTransaction::from(&tx))
    }

    /// Legacy serialization. A transaction without inputs cannot be told apart from
    /// a witness marker, so one is required.
    pub fn serialize(&self) -> Result<Vec<u8>, WalletError> {
        if self.inputs.is_empty() {
            return Err(WalletError::validation("transaction has no inputs"));
        }
        Ok(serialize(&self.to_transaction()))
    }

    pub fn txid(&self) -> TxId {
        TxId::from_hash(self.to_transaction().compute_txid().to_byte_array())
    }

    fn to_transaction(&self) -> Transaction {
        Transaction {
            version: Version(self.version as i32),
            lock_time: LockTime::from_consensus(self.lock_time),
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: bitcoin::OutPoint {
                        txid: Txid::from_byte_array(*input.previous_outpoint.txid.as_hash()),
                        vout: input.previous_outpoint.vout,
                    },
                    script_sig: ScriptBuf::from_bytes(input.unlocking_script.clone()),
                    sequence: Sequence(input.sequence),
                    witness: Witness::new(),
                })
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|output| TxOut {
                    value: Amount::from_sat(output.satoshis),
                    script_pubkey: ScriptBuf::from_bytes(output.locking_script.clone()),
                })
                .collect(),
        }
    }
}

impl From<&Transaction> for RawTransaction {
    fn from(tx: &Transaction) -> Self {
        RawTransaction {
            version: tx.version.0 as u32,
            inputs: tx
                .input
                .iter()
                .map(|input| RawInput {
                    previous_outpoint: OutPoint::new(
                        TxId::from_hash(input.previous_output.txid.to_byte_array()),
                        input.previous_output.vout,
                    ),
                    unlocking_script: input.script_sig.to_bytes(),
                    sequence: input.sequence.0,
                })
                .collect(),
            outputs: tx
                .output
                .iter()
                .map(|output| RawOutput { satoshis: output.value.to_sat(), locking_script: output.script_pubkey.to_bytes() })
                .collect(),
            lock_time: tx.lock_time.to_consensus_u32(),
        }
    }
}
