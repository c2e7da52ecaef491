use crate::error::WalletError;
use crate::random::Randomizer;
use std::sync::Arc;

/// Splits a change amount into outputs that are each at least `floor` satoshis
/// when the amount allows it.
pub struct ChangeDistributor {
    floor: u64,
    randomizer: Arc<dyn Randomizer>,
}

impl ChangeDistributor {
    pub fn new(floor: u64, randomizer: Arc<dyn Randomizer>) -> Self {
        ChangeDistributor { floor, randomizer }
    }

    /// Returns the values of the change outputs, which always sum to `amount`.
    pub fn distribute(&self, count: u32, amount: u64) -> Result<std::vec::IntoIter<u64>, WalletError> {
        let values = match (count, amount) {
            (0, _) | (_, 0) => Vec::new(),
            (1, amount) => vec![amount],
            (count, amount) => match self.floor.checked_mul(count as u64) {
                Some(threshold) if amount == threshold => vec![self.floor; count as usize],
                Some(threshold) if amount > threshold => self.saturated(count as usize, amount),
                _ => self.unsaturated(count, amount)?,
            },
        };
        Ok(values.into_iter())
    }

    /// Number of outputs `distribute` will actually produce for these arguments
    pub fn output_count(&self, count: u32, amount: u64) -> u32 {
        output_count(count, amount, self.floor)
    }

    /// Every output clears the floor. Random noise is taken from each value and
    /// handed to its mirror position so the outputs do not look uniform.
    fn saturated(&self, count: usize, amount: u64) -> Vec<u64> {
        let base = amount / count as u64;
        let remainder = amount % count as u64;
        let mut values = vec![base; count];
        values[0] += remainder;

        let noise: Vec<u64> = values.iter().map(|v| self.randomizer.uint64(v.saturating_sub(self.floor))).collect();
        values.iter().enumerate().map(|(i, v)| v - noise[i] + noise[count - 1 - i]).collect()
    }

    /// Some outputs are dropped so the rest can sit at the floor, with the
    /// leftover placed first.
    fn unsaturated(&self, count: u32, amount: u64) -> Result<Vec<u64>, WalletError> {
        for saturated in (0..count as u64).rev() {
            let Some(reserved) = saturated.checked_mul(self.floor) else { continue };
            if reserved < amount {
                let mut values = Vec::with_capacity(saturated as usize + 1);
                values.push(amount - reserved);
                values.extend(std::iter::repeat_n(self.floor, saturated as usize));
                return Ok(values);
            }
        }
        Err(WalletError::Distribution(format!("cannot split {amount} satoshis into {count} outputs")))
    }
}

pub fn output_count(count: u32, amount: u64, floor: u64) -> u32 {
    match (count, amount) {
        (0, _) | (_, 0) => 0,
        (1, _) => 1,
        (count, amount) => match floor.checked_mul(count as u64) {
            Some(threshold) if amount >= threshold => count,
            _ => (0..count as u64)
                .rev()
                .find(|saturated| saturated.checked_mul(floor).is_some_and(|reserved| reserved < amount))
                .map_or(0, |saturated| saturated as u32 + 1),
        },
    }
}
