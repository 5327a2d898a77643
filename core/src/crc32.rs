//! CRC-32/ISO-HDLC (reflected, polynomial 0xEDB88320).
//!
//! This is the checksum the GPT header and partition entry array carry.
//! `crc32` takes a running value so a checksum can be built across several
//! buffers: `crc32(crc32(0, a), b) == crc32_compute(a ++ b)`.

const POLY: u32 = 0xEDB8_8320;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a CRC32 from `seed` (0 to start a new checksum) over `buf`.
pub fn crc32(seed: u32, buf: &[u8]) -> u32 {
    let mut crc = !seed;
    for &byte in buf {
        crc = TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

pub fn crc32_compute(buf: &[u8]) -> u32 {
    crc32(0, buf)
}
