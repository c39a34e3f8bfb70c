//! Rotating leader election for actions only one validator needs to take.
//!
//! The phase's first block hash picks a starting validator. As blocks pass
//! without progress the eligible window widens, so a silent leader cannot
//! stall the protocol.
use crate::crypto_tools::hash::Output;

/// Blocks elapsed past the desperation delay, or 0 before that.
pub fn blocks_since_desperation(current_height: u64, phase_start: u64, desperation_delay: u64) -> u64 {
    current_height.saturating_sub(phase_start.saturating_add(desperation_delay))
}

/// How many validators are eligible after `blocks_since_desperation` blocks.
pub fn num_allowed(num_validators: usize, blocks_since_desperation: u64, desperation_factor: u64) -> usize {
    let mut num_allowed: usize = 1;
    let mut remaining = blocks_since_desperation;
    while remaining > 0 {
        remaining = remaining.saturating_sub(desperation_factor / num_allowed as u64);
        num_allowed += 1;
        if num_allowed >= num_validators {
            break;
        }
    }
    num_allowed
}

/// `block_hash` as a big-endian integer modulo `n`.
fn hash_mod(block_hash: &Output, n: usize) -> usize {
    let n = n as u128;
    block_hash
        .as_bytes()
        .iter()
        .fold(0u128, |acc, b| (acc * 256 + u128::from(*b)) % n) as usize
}

/// Whether the validator at 0-based `my_index` may act now.
pub fn am_i_leading(
    num_validators: usize,
    my_index: usize,
    blocks_since_desperation: u64,
    block_hash: &Output,
    desperation_factor: u64,
) -> bool {
    if num_validators == 0 {
        return false;
    }
    let allowed = num_allowed(num_validators, blocks_since_desperation, desperation_factor);
    let start = hash_mod(block_hash, num_validators);
    let end = (start + allowed) % num_validators;

    if end > start {
        my_index >= start && my_index < end
    } else {
        my_index >= start || my_index < end
    }
}
