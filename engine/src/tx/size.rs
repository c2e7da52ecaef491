/// Size of a P2PKH change output: value, script length and a 25 byte script
pub const P2PKH_OUTPUT_SIZE: u64 = 34;
/// Size of an input spending P2PKH with a 107 byte unlocking script
pub const P2PKH_INPUT_SIZE: u64 = 148;
/// Unlocking script length assumed for storage owned inputs
pub const P2PKH_UNLOCKING_SCRIPT_LENGTH: u64 = 107;

pub const fn varint_size(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub const fn input_size(unlocking_script_length: u64) -> u64 {
    32 + 4 + varint_size(unlocking_script_length) + unlocking_script_length + 4
}

pub const fn output_size(locking_script_length: u64) -> u64 {
    8 + varint_size(locking_script_length) + locking_script_length
}

/// Serialized size from the sizes of each input and output
pub fn transaction_size(input_sizes: &[u64], output_sizes: &[u64]) -> u64 {
    4 + varint_size(input_sizes.len() as u64)
        + input_sizes.iter().sum::<u64>()
        + varint_size(output_sizes.len() as u64)
        + output_sizes.iter().sum::<u64>()
        + 4
}
