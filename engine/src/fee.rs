use crate::error::WalletError;
use wallet_storage_cli::storage_config::FeeModelConfig;

pub const SAT_PER_KB: &str = "sat/kb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeModel {
    SatPerKb(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    model: FeeModel,
}

impl FeeCalculator {
    pub fn new(config: &FeeModelConfig) -> Result<Self, WalletError> {
        match config.model.as_str() {
            SAT_PER_KB => Ok(FeeCalculator { model: FeeModel::SatPerKb(config.value) }),
            other => Err(WalletError::Configuration(format!("unsupported fee model '{other}', expected '{SAT_PER_KB}'"))),
        }
    }

    pub fn model(&self) -> FeeModel {
        self.model
    }

    /// Fee in satoshis for a transaction of `tx_size` bytes, charged per started kilobyte
    pub fn calculate(&self, tx_size: u64) -> Result<u64, WalletError> {
        match self.model {
            FeeModel::SatPerKb(rate) => tx_size.div_ceil(1000).checked_mul(rate).ok_or_else(|| {
                WalletError::Unexpected(format!("fee overflow for {tx_size} bytes at {rate} sat/kb"))
            }),
        }
    }
}
