#[derive(Debug, Clone)]
pub struct NewCommission {
    pub user_id: i64,
    pub satoshis: i64,
    pub key_offset: String,
    pub locking_script: Vec<u8>,
}
