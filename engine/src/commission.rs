use crate::error::WalletError;
use std::sync::Arc;

/// Derives the locking script paying the storage operator's key offset by `key_offset`.
/// Key derivation is outside this crate so the script is supplied by the host.
pub trait CommissionLocker: Send + Sync {
    fn locking_script(&self, public_key: &str, key_offset: &str) -> Result<Vec<u8>, WalletError>;
}

#[derive(Clone)]
pub struct CommissionPolicy {
    pub public_key: String,
    pub satoshis: u64,
    pub locker: Arc<dyn CommissionLocker>,
}
