// Reading a partition table back
//
// Header and entry array are fetched through gpt_disk_io, which also
// recomputes both CRC32 fields independently of our writer. Entries are then
// decoded with our own codec so names and GUIDs come back byte-for-byte.

use super::types::*;
use crate::block::{read_bytes, BlockDevice, BlockIoAdapter};
use crate::disk::partition::{PartitionInfo, PartitionKind};
use crate::error::{DiskError, Result};
use crate::log_warn;
use alloc::vec;
use alloc::vec::Vec;
use gpt_disk_io::Disk;

/// A validated primary table
#[derive(Clone, Debug)]
pub struct GptTable {
    pub header: GptHeader,
    pub partitions: Vec<PartitionInfo>,
}

impl GptTable {
    pub fn partition(&self, index: u32) -> Option<&PartitionInfo> {
        self.partitions.iter().find(|p| p.index == index)
    }
}

/// Read and validate the primary GPT of `dev`.
///
/// `NotFound` when there is no GPT signature, `IoError` when either CRC32
/// does not match.
pub fn read_table(dev: &dyn BlockDevice) -> Result<GptTable> {
    let block_size = dev.block_size() as usize;

    let mut disk = Disk::new(BlockIoAdapter::new(dev)).map_err(|_| DiskError::IoError)?;
    let mut block = vec![0u8; block_size];
    let raw_header = disk
        .read_primary_gpt_header(&mut block)
        .map_err(|_| DiskError::IoError)?;

    if !raw_header.is_signature_valid() {
        return Err(DiskError::NotFound);
    }
    if raw_header.calculate_header_crc32() != raw_header.header_crc32 {
        log_warn!("gpt: primary header CRC mismatch on {}", dev.name());
        return Err(DiskError::IoError);
    }

    let mut header_bytes = [0u8; GPT_HEADER_SIZE as usize];
    read_bytes(dev, block_size as u64, &mut header_bytes)?;
    let header = GptHeader::decode(&header_bytes)?;

    if header.partition_entry_size as usize != GPT_ENTRY_SIZE
        || header.num_partition_entries as usize > GPT_ENTRY_COUNT
    {
        return Err(DiskError::InvalidArgument);
    }

    let layout = raw_header
        .get_partition_entry_array_layout()
        .map_err(|_| DiskError::InvalidArgument)?;
    let array_bytes = header.num_partition_entries as usize * GPT_ENTRY_SIZE;
    let mut storage = vec![0u8; array_bytes.div_ceil(block_size) * block_size];
    let array = disk
        .read_gpt_partition_entry_array(layout, &mut storage)
        .map_err(|_| DiskError::IoError)?;

    if array.calculate_crc32() != raw_header.partition_entry_array_crc32 {
        log_warn!("gpt: entry array CRC mismatch on {}", dev.name());
        return Err(DiskError::IoError);
    }

    let partitions = array.storage()[..array_bytes]
        .chunks_exact(GPT_ENTRY_SIZE)
        .map(GptEntry::decode)
        .enumerate()
        .filter(|(_, entry)| entry.is_used())
        .map(|(index, entry)| PartitionInfo {
            index: index as u32,
            kind: PartitionKind::from_type_guid(&entry.type_guid),
            type_guid: entry.type_guid,
            unique_guid: entry.unique_guid,
            first_lba: entry.first_lba,
            last_lba: entry.last_lba,
            name: entry.name_string(),
        })
        .collect();

    Ok(GptTable { header, partitions })
}
