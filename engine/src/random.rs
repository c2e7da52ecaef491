use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Source of randomness for change noise and output shuffling.
/// `uint64(max)` returns a value in `[0, max]`, both ends inclusive.
pub trait Randomizer: Send + Sync {
    fn uint64(&self, max: u64) -> u64;
}

/// Thread local CSPRNG, used outside of tests
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomizer;

impl Randomizer for OsRandomizer {
    fn uint64(&self, max: u64) -> u64 {
        rand::rng().random_range(0..=max)
    }
}

/// Always returns zero, which disables change noise and makes shuffles deterministic
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroRandomizer;

impl Randomizer for ZeroRandomizer {
    fn uint64(&self, _max: u64) -> u64 {
        0
    }
}

/// Replays a fixed sequence, clamped to `max`. Yields zero once exhausted.
#[derive(Debug, Default)]
pub struct SequenceRandomizer {
    values: Mutex<VecDeque<u64>>,
}

impl SequenceRandomizer {
    pub fn new(values: impl IntoIterator<Item = u64>) -> Self {
        SequenceRandomizer { values: Mutex::new(values.into_iter().collect()) }
    }
}

impl Randomizer for SequenceRandomizer {
    fn uint64(&self, max: u64) -> u64 {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.pop_front().unwrap_or(0).min(max)
    }
}

/// Fisher-Yates shuffle driven by the given randomizer
pub fn shuffle<T>(randomizer: &dyn Randomizer, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = randomizer.uint64(i as u64) as usize;
        items.swap(i, j);
    }
}

/// Random identifier used for references and key derivation suffixes
pub fn random_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}
