//! Flake-style id generation
//!
//! 64-bit ids with milliseconds since epoch in the high bits and 22 bits of
//! random entropy below, so ids allocated by independent processes sort
//! roughly by creation time without coordination.

use chrono::Utc;
use rand::Rng;

const ENTROPY_BITS: u32 = 22;

/// Allocate a new id.
pub fn next_id() -> u64 {
    let millis = Utc::now().timestamp_millis() as u64;
    let noise: u64 = rand::thread_rng().gen_range(0..(1u64 << ENTROPY_BITS));
    (millis << ENTROPY_BITS) | noise
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct() {
        let a = next_id();
        let b = next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_high_bits_encode_time() {
        let before = Utc::now().timestamp_millis() as u64;
        let id = next_id();
        let after = Utc::now().timestamp_millis() as u64;

        let encoded = id >> ENTROPY_BITS;
        assert!(encoded >= before);
        assert!(encoded <= after);
    }
}
