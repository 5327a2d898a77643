// GPT construction and writing
//
// The table is built in memory against one device, then written in a fixed
// order: protective MBR, primary header, primary entries, backup entries,
// backup header. The sequence is not atomic; an interrupted write leaves an
// inconsistent table and the caller is expected to run it again.

use super::types::*;
use crate::block::DeviceHandle;
use crate::crc32::crc32_compute;
use crate::disk::guid::GuidSource;
use crate::error::{DiskError, Result};
use crate::{log_error, log_info};
use alloc::vec;
use alloc::vec::Vec;
use uguid::Guid;

const MBR_PARTITION_OFFSET: usize = 446;
const MBR_TYPE_GPT_PROTECTIVE: u8 = 0xEE;

pub struct GptContext {
    dev: DeviceHandle,
    header: GptHeader,
    entries: Vec<GptEntry>,
    entry_table_blocks: u64,
}

impl GptContext {
    /// Fresh, empty table covering the whole device.
    pub fn create(dev: DeviceHandle, guids: &dyn GuidSource) -> Result<Self> {
        let block_size = dev.block_size() as u64;
        if block_size < GPT_HEADER_SIZE as u64 {
            return Err(DiskError::InvalidArgument);
        }
        let total = dev.total_blocks();
        let entry_table_blocks = (ENTRY_ARRAY_BYTES as u64).div_ceil(block_size);

        // MBR + header + entries on both ends, and at least one usable block
        if total < 2 * (2 + entry_table_blocks) + 1 {
            log_error!("gpt: {} too small for a partition table", dev.name());
            return Err(DiskError::OutOfSpace);
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(GPT_ENTRY_COUNT)
            .map_err(|_| DiskError::OutOfSpace)?;
        entries.resize(GPT_ENTRY_COUNT, GptEntry::EMPTY);

        let header = GptHeader {
            signature: GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE,
            header_crc32: 0,
            my_lba: 1,
            alternate_lba: total - 1,
            first_usable_lba: 2 + entry_table_blocks,
            last_usable_lba: total - 2 - entry_table_blocks,
            disk_guid: guids.next_guid(),
            partition_entry_lba: 2,
            num_partition_entries: GPT_ENTRY_COUNT as u32,
            partition_entry_size: GPT_ENTRY_SIZE as u32,
            partition_array_crc32: 0,
        };

        log_info!(
            "gpt: new table on {}, usable LBA {}..={}",
            dev.name(),
            header.first_usable_lba,
            header.last_usable_lba
        );

        Ok(Self {
            dev,
            header,
            entries,
            entry_table_blocks,
        })
    }

    pub fn header(&self) -> &GptHeader {
        &self.header
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.dev
    }

    pub fn entry_table_blocks(&self) -> u64 {
        self.entry_table_blocks
    }

    pub fn partition(&self, index: usize) -> Option<&GptEntry> {
        self.entries.get(index).filter(|entry| entry.is_used())
    }

    pub fn used_partitions(&self) -> impl Iterator<Item = (usize, &GptEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_used())
    }

    /// Fill slot `index` with the inclusive range `start..=end`.
    pub fn add_partition(
        &mut self,
        index: usize,
        name: &str,
        start: u64,
        end: u64,
        type_guid: Guid,
        guids: &dyn GuidSource,
    ) -> Result<()> {
        if index >= GPT_ENTRY_COUNT || start > end || type_guid == Guid::ZERO {
            return Err(DiskError::InvalidArgument);
        }
        if start < self.header.first_usable_lba || end > self.header.last_usable_lba {
            log_error!(
                "gpt: partition {} ({}..={}) outside usable window",
                index,
                start,
                end
            );
            return Err(DiskError::OutOfSpace);
        }

        let entry = &mut self.entries[index];
        entry.type_guid = type_guid;
        entry.unique_guid = guids.next_guid();
        entry.first_lba = start;
        entry.last_lba = end;
        entry.attributes = 0;
        entry.set_name(name);

        log_info!("gpt: partition {} '{}' at {}..={}", index, name, start, end);
        Ok(())
    }

    fn encode_entries(&self) -> Result<Vec<u8>> {
        let len = self.entry_table_blocks as usize * self.dev.block_size() as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| DiskError::OutOfSpace)?;
        buf.resize(len, 0);
        for (entry, slot) in self.entries.iter().zip(buf.chunks_exact_mut(GPT_ENTRY_SIZE)) {
            entry.encode(slot);
        }
        Ok(buf)
    }

    fn protective_mbr(&self) -> Vec<u8> {
        let mut sector = vec![0u8; self.dev.block_size() as usize];
        let sectors = (self.dev.total_blocks() - 1).min(u32::MAX as u64) as u32;

        let part = &mut sector[MBR_PARTITION_OFFSET..MBR_PARTITION_OFFSET + 16];
        part[0] = 0x00; // not bootable
        part[1..4].copy_from_slice(&[0x00, 0x02, 0x00]);
        part[4] = MBR_TYPE_GPT_PROTECTIVE;
        part[5..8].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
        part[8..12].copy_from_slice(&1u32.to_le_bytes());
        part[12..16].copy_from_slice(&sectors.to_le_bytes());

        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    fn write_header(&self, header: &GptHeader) -> Result<()> {
        let mut block = vec![0u8; self.dev.block_size() as usize];
        block[..GPT_HEADER_SIZE as usize].copy_from_slice(&header.encode());
        self.dev.write(header.my_lba, &block, 1)
    }

    /// Backup copy: LBAs swapped, entries right below the backup header.
    pub fn backup_header(&self) -> GptHeader {
        let mut backup = self.header.clone();
        backup.my_lba = self.header.alternate_lba;
        backup.alternate_lba = self.header.my_lba;
        backup.partition_entry_lba = self.header.alternate_lba - self.entry_table_blocks;
        backup.update_crc32();
        backup
    }

    /// Write MBR, primary and backup copies. Stops at the first failure.
    pub fn write(&mut self) -> Result<()> {
        let count = self.entry_table_blocks as u32;

        step(self.dev.write(0, &self.protective_mbr(), 1), "protective MBR")?;

        let entries = self.encode_entries()?;
        self.header.partition_array_crc32 = crc32_compute(&entries[..ENTRY_ARRAY_BYTES]);
        self.header.update_crc32();

        step(self.write_header(&self.header), "primary header")?;
        step(
            self.dev
                .write(self.header.partition_entry_lba, &entries, count),
            "primary entry array",
        )?;

        let backup = self.backup_header();
        step(
            self.dev.write(backup.partition_entry_lba, &entries, count),
            "backup entry array",
        )?;
        step(self.write_header(&backup), "backup header")?;

        self.dev.flush()?;
        log_info!(
            "gpt: table written to {} (array crc {:#010x})",
            self.dev.name(),
            self.header.partition_array_crc32
        );
        Ok(())
    }
}

fn step(result: Result<()>, what: &str) -> Result<()> {
    if let Err(err) = result {
        log_error!("gpt: {} write failed: {}", what, err);
    }
    result
}
