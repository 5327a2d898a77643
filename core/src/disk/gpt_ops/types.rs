// GPT on-disk structures and their byte codecs

use crate::crc32::crc32_compute;
use crate::error::{DiskError, Result};
use alloc::string::String;
use uguid::Guid;

/// "EFI PART"
pub const GPT_SIGNATURE: u64 = 0x5452_4150_2049_4645;
pub const GPT_REVISION: u32 = 0x0001_0000;
pub const GPT_HEADER_SIZE: u32 = 92;
pub const GPT_ENTRY_COUNT: usize = 128;
pub const GPT_ENTRY_SIZE: usize = 128;
pub const GPT_NAME_UNITS: usize = 36;
pub const ENTRY_ARRAY_BYTES: usize = GPT_ENTRY_COUNT * GPT_ENTRY_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GptHeader {
    pub signature: u64,
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_array_crc32: u32,
}

impl GptHeader {
    pub fn encode(&self) -> [u8; GPT_HEADER_SIZE as usize] {
        let mut out = [0u8; GPT_HEADER_SIZE as usize];
        out[0..8].copy_from_slice(&self.signature.to_le_bytes());
        out[8..12].copy_from_slice(&self.revision.to_le_bytes());
        out[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.header_crc32.to_le_bytes());
        // 20..24 reserved
        out[24..32].copy_from_slice(&self.my_lba.to_le_bytes());
        out[32..40].copy_from_slice(&self.alternate_lba.to_le_bytes());
        out[40..48].copy_from_slice(&self.first_usable_lba.to_le_bytes());
        out[48..56].copy_from_slice(&self.last_usable_lba.to_le_bytes());
        out[56..72].copy_from_slice(&self.disk_guid.to_bytes());
        out[72..80].copy_from_slice(&self.partition_entry_lba.to_le_bytes());
        out[80..84].copy_from_slice(&self.num_partition_entries.to_le_bytes());
        out[84..88].copy_from_slice(&self.partition_entry_size.to_le_bytes());
        out[88..92].copy_from_slice(&self.partition_array_crc32.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < GPT_HEADER_SIZE as usize {
            return Err(DiskError::InvalidArgument);
        }
        let header = Self {
            signature: le_u64(bytes, 0),
            revision: le_u32(bytes, 8),
            header_size: le_u32(bytes, 12),
            header_crc32: le_u32(bytes, 16),
            my_lba: le_u64(bytes, 24),
            alternate_lba: le_u64(bytes, 32),
            first_usable_lba: le_u64(bytes, 40),
            last_usable_lba: le_u64(bytes, 48),
            disk_guid: guid_at(bytes, 56),
            partition_entry_lba: le_u64(bytes, 72),
            num_partition_entries: le_u32(bytes, 80),
            partition_entry_size: le_u32(bytes, 84),
            partition_array_crc32: le_u32(bytes, 88),
        };
        if header.signature != GPT_SIGNATURE {
            return Err(DiskError::NotFound);
        }
        Ok(header)
    }

    /// CRC32 of the encoded header with its own CRC field held at zero.
    pub fn compute_crc32(&self) -> u32 {
        let mut zeroed = self.clone();
        zeroed.header_crc32 = 0;
        let len = self.header_size.min(GPT_HEADER_SIZE) as usize;
        crc32_compute(&zeroed.encode()[..len])
    }

    pub fn update_crc32(&mut self) {
        self.header_crc32 = self.compute_crc32();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GptEntry {
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub first_lba: u64,
    /// Inclusive
    pub last_lba: u64,
    pub attributes: u64,
    /// UTF-16LE code units, zero-padded
    pub name: [u16; GPT_NAME_UNITS],
}

impl GptEntry {
    pub const EMPTY: Self = Self {
        type_guid: Guid::ZERO,
        unique_guid: Guid::ZERO,
        first_lba: 0,
        last_lba: 0,
        attributes: 0,
        name: [0; GPT_NAME_UNITS],
    };

    pub fn is_used(&self) -> bool {
        self.type_guid != Guid::ZERO
    }

    /// Store `name` as UTF-16, truncated to 36 code units.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; GPT_NAME_UNITS];
        for (slot, unit) in self.name.iter_mut().zip(name.encode_utf16()) {
            *slot = unit;
        }
    }

    pub fn name_string(&self) -> String {
        let len = self
            .name
            .iter()
            .position(|&unit| unit == 0)
            .unwrap_or(GPT_NAME_UNITS);
        char::decode_utf16(self.name[..len].iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..16].copy_from_slice(&self.type_guid.to_bytes());
        out[16..32].copy_from_slice(&self.unique_guid.to_bytes());
        out[32..40].copy_from_slice(&self.first_lba.to_le_bytes());
        out[40..48].copy_from_slice(&self.last_lba.to_le_bytes());
        out[48..56].copy_from_slice(&self.attributes.to_le_bytes());
        for (i, unit) in self.name.iter().enumerate() {
            out[56 + i * 2..58 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut name = [0u16; GPT_NAME_UNITS];
        for (i, unit) in name.iter_mut().enumerate() {
            *unit = u16::from_le_bytes([bytes[56 + i * 2], bytes[57 + i * 2]]);
        }
        Self {
            type_guid: guid_at(bytes, 0),
            unique_guid: guid_at(bytes, 16),
            first_lba: le_u64(bytes, 32),
            last_lba: le_u64(bytes, 40),
            attributes: le_u64(bytes, 48),
            name,
        }
    }
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn guid_at(bytes: &[u8], at: usize) -> Guid {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&bytes[at..at + 16]);
    Guid::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = GptHeader {
            signature: GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE,
            header_crc32: 0,
            my_lba: 1,
            alternate_lba: 0x1FFF,
            first_usable_lba: 34,
            last_usable_lba: 0x1FDE,
            disk_guid: Guid::ZERO,
            partition_entry_lba: 2,
            num_partition_entries: 128,
            partition_entry_size: 128,
            partition_array_crc32: 0xAABB_CCDD,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], b"EFI PART");
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x01, 0x00]);
        assert_eq!(bytes[12], 92);
        assert_eq!(&bytes[88..92], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(GptHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_crc_ignores_stored_crc() {
        let mut header = GptHeader::decode(&{
            let mut raw = [0u8; 92];
            raw[0..8].copy_from_slice(b"EFI PART");
            raw[12] = 92;
            raw
        })
        .unwrap();
        let expected = header.compute_crc32();
        header.header_crc32 = 0x1234_5678;
        assert_eq!(header.compute_crc32(), expected);
    }

    #[test]
    fn test_decode_rejects_bad_signature() {
        assert_eq!(GptHeader::decode(&[0u8; 92]), Err(DiskError::NotFound));
    }

    #[test]
    fn test_name_truncated_and_padded() {
        let mut entry = GptEntry::EMPTY;
        entry.set_name("ESP");
        assert_eq!(&entry.name[..4], &[b'E' as u16, b'S' as u16, b'P' as u16, 0]);
        assert_eq!(entry.name_string(), "ESP");

        let long = "a-partition-name-well-beyond-thirty-six-units";
        entry.set_name(long);
        assert_eq!(entry.name_string(), &long[..GPT_NAME_UNITS]);
    }

    #[test]
    fn test_entry_name_offset() {
        let mut entry = GptEntry::EMPTY;
        entry.set_name("root");
        let mut raw = [0u8; GPT_ENTRY_SIZE];
        entry.encode(&mut raw);
        assert_eq!(&raw[56..64], &[b'r', 0, b'o', 0, b'o', 0, b't', 0]);
        assert_eq!(GptEntry::decode(&raw), entry);
    }
}
