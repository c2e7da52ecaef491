use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    /// Fatal at startup, e.g. an unsupported fee model
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rejects a single request, nothing is persisted
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not enough funds: required {required} satoshis, available {available}")]
    NotEnoughFunds { required: i64, available: i64 },

    /// An output was claimed by a concurrent action, the caller may retry
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("transient service error: {0}")]
    TransientService(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("change distribution failed: {0}")]
    Distribution(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl WalletError {
    pub fn validation(message: impl Into<String>) -> Self {
        WalletError::Validation(message.into())
    }

    pub fn is_not_enough_funds(&self) -> bool {
        matches!(self, WalletError::NotEnoughFunds { .. })
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        WalletError::Storage(err.to_string())
    }
}

/// Narrows a stored signed integer into the unsigned domain type.
pub(crate) fn to_u64(value: i64, field: &str) -> Result<u64, WalletError> {
    u64::try_from(value).map_err(|_| WalletError::Unexpected(format!("negative {field}: {value}")))
}

pub(crate) fn to_i64(value: u64, field: &str) -> Result<i64, WalletError> {
    i64::try_from(value).map_err(|_| WalletError::Unexpected(format!("{field} out of range: {value}")))
}
