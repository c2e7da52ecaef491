pub mod basket;
pub mod commission;
pub mod transaction;
pub mod transaction_output;
pub mod tx_history;
pub mod utxo;
