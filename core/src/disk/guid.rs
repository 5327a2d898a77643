//! GUID generation for disks and partitions.
//!
//! Seeded from the monotonic clock mixed with a process-wide call counter and
//! stretched with a linear congruential step per byte. This is NOT a source
//! of cryptographic randomness: two generators started at the same tick
//! diverge only through the counter. Good enough to keep identifiers on one
//! machine apart, nothing more.

use crate::time::Clock;
use core::sync::atomic::{AtomicU64, Ordering};
use uguid::Guid;

static GUID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub trait GuidSource {
    fn next_guid(&self) -> Guid;
}

pub struct GuidGenerator<C: Clock> {
    clock: C,
}

impl<C: Clock> GuidGenerator<C> {
    pub const fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> GuidSource for GuidGenerator<C> {
    fn next_guid(&self) -> Guid {
        let count = GUID_COUNTER.fetch_add(1, Ordering::Relaxed);
        guid_from_seed(self.clock.now_ms() ^ (count << 32))
    }
}

/// Deterministic part of generation: the same seed gives the same GUID.
pub fn guid_from_seed(mut seed: u64) -> Guid {
    let mut rfc = [0u8; 16];
    for byte in rfc.iter_mut() {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        *byte = (seed >> 32) as u8;
    }

    // Version 4, RFC 4122 variant
    rfc[6] = (rfc[6] & 0x0F) | 0x40;
    rfc[8] = (rfc[8] & 0x3F) | 0x80;

    Guid::from_bytes(to_mixed_endian(rfc))
}

/// RFC 4122 byte order to the little-endian-fields order used on disk.
fn to_mixed_endian(rfc: [u8; 16]) -> [u8; 16] {
    let mut out = rfc;
    out[..4].reverse();
    out[4..6].reverse();
    out[6..8].reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_version_and_variant() {
        let guid = guid_from_seed(0xDEAD_BEEF);
        let text = format!("{}", guid);
        let text = text.as_bytes();
        assert_eq!(text[14], b'4');
        assert!(matches!(text[19], b'8' | b'9' | b'a' | b'b'));
    }

    #[test]
    fn test_seed_is_deterministic() {
        assert_eq!(guid_from_seed(42), guid_from_seed(42));
        assert_ne!(guid_from_seed(42), guid_from_seed(43));
    }

    #[test]
    fn test_same_tick_still_differs() {
        let clock = ManualClock::new(1000);
        let gen = GuidGenerator::new(&clock);
        assert_ne!(gen.next_guid(), gen.next_guid());
    }
}
