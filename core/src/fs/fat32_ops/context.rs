// FAT32 filesystem context and FAT operations

use crate::error::{DiskError, Result};
use crate::fs::fat32_format::FAT_EOC;
use alloc::vec;
use alloc::vec::Vec;
use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;
const FIRST_DATA_CLUSTER: u32 = 2;
// Cluster numbers are 28 bits; 0x0FFF_FFF7 and above are reserved markers
const MAX_FAT_ENTRIES: u32 = 0x0FFF_FFF7;

/// Geometry read from a volume's boot sector
pub struct Fat32Context {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_size: u32,
    pub num_fats: u32,
    pub root_cluster: u32,
    pub data_start_sector: u32,
    pub cluster_count: u32,
}

impl Fat32Context {
    pub fn from_boot_sector<B: BlockIo<Error = DiskError>>(
        block_io: &mut B,
        partition_start: u64,
    ) -> Result<Self> {
        let sector_size = block_io.block_size().to_u32();
        let mut boot_sector = vec![0u8; sector_size as usize];
        block_io.read_blocks(Lba(partition_start), &mut boot_sector)?;

        if boot_sector[510] != 0x55 || boot_sector[511] != 0xAA {
            return Err(DiskError::NotFound);
        }

        let bytes_per_sector = u16::from_le_bytes([boot_sector[0x0B], boot_sector[0x0C]]) as u32;
        let sectors_per_cluster = boot_sector[0x0D] as u32;
        let reserved_sectors = u16::from_le_bytes([boot_sector[0x0E], boot_sector[0x0F]]) as u32;
        let num_fats = boot_sector[0x10] as u32;
        let total_sectors = le_u32(&boot_sector, 0x20);
        let fat_size = le_u32(&boot_sector, 0x24);
        let root_cluster = le_u32(&boot_sector, 0x2C);

        if bytes_per_sector != sector_size || sectors_per_cluster == 0 || num_fats == 0 {
            return Err(DiskError::InvalidArgument);
        }

        let data_start_sector = num_fats
            .checked_mul(fat_size)
            .and_then(|fats| fats.checked_add(reserved_sectors))
            .ok_or(DiskError::InvalidArgument)?;
        // Never address clusters the FAT has no entry for
        let fat_entries =
            (fat_size as u64 * bytes_per_sector as u64 / 4).min(MAX_FAT_ENTRIES as u64) as u32;
        let cluster_count = (total_sectors.saturating_sub(data_start_sector) / sectors_per_cluster)
            .min(fat_entries.saturating_sub(FIRST_DATA_CLUSTER));

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_size,
            num_fats,
            root_cluster,
            data_start_sector,
            cluster_count,
        })
    }

    pub fn cluster_bytes(&self) -> usize {
        (self.sectors_per_cluster * self.bytes_per_sector) as usize
    }

    fn is_data_cluster(&self, cluster: u32) -> bool {
        (FIRST_DATA_CLUSTER..FIRST_DATA_CLUSTER + self.cluster_count).contains(&cluster)
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_start_sector + ((cluster - FIRST_DATA_CLUSTER) * self.sectors_per_cluster)
    }

    /// Sector (relative to the partition) holding `cluster`'s FAT entry in
    /// the first FAT, and the byte offset inside it.
    fn fat_position(&self, cluster: u32) -> (u32, usize) {
        let fat_offset = cluster * 4;
        (
            self.reserved_sectors + fat_offset / self.bytes_per_sector,
            (fat_offset % self.bytes_per_sector) as usize,
        )
    }

    pub fn read_fat_entry<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        cluster: u32,
    ) -> Result<u32> {
        let (fat_sector, entry_offset) = self.fat_position(cluster);
        let mut sector = vec![0u8; self.bytes_per_sector as usize];
        block_io.read_blocks(Lba(partition_start + fat_sector as u64), &mut sector)?;

        Ok(le_u32(&sector, entry_offset) & FAT_ENTRY_MASK)
    }

    /// Update `cluster`'s entry in every FAT copy.
    pub fn write_fat_entry<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        cluster: u32,
        value: u32,
    ) -> Result<()> {
        let (fat_sector, entry_offset) = self.fat_position(cluster);
        let mut sector = vec![0u8; self.bytes_per_sector as usize];

        for fat_num in 0..self.num_fats {
            let sector_lba = partition_start + (fat_sector + fat_num * self.fat_size) as u64;
            block_io.read_blocks(Lba(sector_lba), &mut sector)?;

            // Upper four bits are reserved and must survive
            let old = le_u32(&sector, entry_offset);
            let new = (old & !FAT_ENTRY_MASK) | (value & FAT_ENTRY_MASK);
            sector[entry_offset..entry_offset + 4].copy_from_slice(&new.to_le_bytes());

            block_io.write_blocks(Lba(sector_lba), &sector)?;
        }

        Ok(())
    }

    /// First free cluster at or after `start_from`, scanning a FAT sector
    /// at a time.
    pub fn find_free_cluster<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        start_from: u32,
    ) -> Result<u32> {
        let end = FIRST_DATA_CLUSTER + self.cluster_count;
        let entries_per_sector = self.bytes_per_sector / 4;
        let mut sector = vec![0u8; self.bytes_per_sector as usize];
        let mut cluster = start_from.max(FIRST_DATA_CLUSTER);

        while cluster < end {
            let (fat_sector, _) = self.fat_position(cluster);
            block_io.read_blocks(Lba(partition_start + fat_sector as u64), &mut sector)?;

            let sector_end = ((cluster / entries_per_sector) + 1) * entries_per_sector;
            while cluster < sector_end.min(end) {
                let offset = ((cluster % entries_per_sector) * 4) as usize;
                if le_u32(&sector, offset) & FAT_ENTRY_MASK == 0 {
                    return Ok(cluster);
                }
                cluster += 1;
            }
        }

        Err(DiskError::OutOfSpace)
    }

    /// Claim a free cluster at or after `hint`, marking it end-of-chain.
    pub fn allocate_cluster<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        hint: u32,
    ) -> Result<u32> {
        let cluster = match self.find_free_cluster(block_io, partition_start, hint) {
            Err(DiskError::OutOfSpace) if hint > FIRST_DATA_CLUSTER => {
                self.find_free_cluster(block_io, partition_start, FIRST_DATA_CLUSTER)?
            }
            other => other?,
        };
        self.write_fat_entry(block_io, partition_start, cluster, FAT_EOC)?;
        Ok(cluster)
    }

    /// Cluster numbers of the chain starting at `first`.
    pub fn cluster_chain<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        first: u32,
    ) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut cluster = first;
        while self.is_data_cluster(cluster) {
            // A loop in the FAT would otherwise never end
            if chain.len() as u32 >= self.cluster_count {
                return Err(DiskError::IoError);
            }
            chain.push(cluster);
            cluster = self.read_fat_entry(block_io, partition_start, cluster)?;
        }
        Ok(chain)
    }

    /// Return every cluster of the chain starting at `first` to the free pool.
    pub fn free_chain<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        first: u32,
    ) -> Result<()> {
        for cluster in self.cluster_chain(block_io, partition_start, first)? {
            self.write_fat_entry(block_io, partition_start, cluster, 0)?;
        }
        Ok(())
    }

    pub fn read_cluster<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        cluster: u32,
        buf: &mut [u8],
    ) -> Result<()> {
        if !self.is_data_cluster(cluster) || buf.len() != self.cluster_bytes() {
            return Err(DiskError::InvalidArgument);
        }
        let lba = partition_start + self.cluster_to_sector(cluster) as u64;
        block_io.read_blocks(Lba(lba), buf)
    }

    pub fn write_cluster<B: BlockIo<Error = DiskError>>(
        &self,
        block_io: &mut B,
        partition_start: u64,
        cluster: u32,
        data: &[u8],
    ) -> Result<()> {
        if !self.is_data_cluster(cluster) || data.len() != self.cluster_bytes() {
            return Err(DiskError::InvalidArgument);
        }
        let lba = partition_start + self.cluster_to_sector(cluster) as u64;
        block_io.write_blocks(Lba(lba), data)
    }
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
