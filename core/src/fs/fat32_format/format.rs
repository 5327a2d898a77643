// FAT32 filesystem formatter

use crate::block::{BlockDevice, BlockIoAdapter};
use crate::error::{DiskError, Result};
use crate::log_info;
use alloc::vec;
use alloc::vec::Vec;
use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

pub const RESERVED_SECTORS: u16 = 32;
pub const SECTORS_PER_CLUSTER: u8 = 8;
pub const NUM_FATS: u8 = 2;
pub const ROOT_CLUSTER: u32 = 2;
pub const FSINFO_SECTOR: u16 = 1;
pub const BACKUP_BOOT_SECTOR: u16 = 6;

pub const FAT_MEDIA_ENTRY: u32 = 0x0FFF_FFF8;
pub const FAT_EOC: u32 = 0x0FFF_FFFF;

const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
const FSINFO_STRUC_SIG: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;

#[derive(Clone, Copy, Debug)]
pub struct Fat32Options<'a> {
    pub label: &'a str,
    pub volume_id: u32,
}

impl Default for Fat32Options<'_> {
    fn default() -> Self {
        Self {
            label: "EFI SYSTEM",
            volume_id: 0x1234_5678,
        }
    }
}

/// Geometry chosen by the formatter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fat32Layout {
    pub bytes_per_sector: u32,
    pub total_sectors: u32,
    pub fat_size: u32,
    /// First data sector, relative to the partition
    pub data_start: u32,
    pub cluster_count: u32,
}

impl Fat32Layout {
    fn new(bytes_per_sector: u32, total_sectors: u32) -> Result<Self> {
        // One 4-byte FAT entry per cluster the volume could hold
        let clusters = total_sectors / SECTORS_PER_CLUSTER as u32;
        let fat_size = (clusters as u64 * 4).div_ceil(bytes_per_sector as u64) as u32;
        let data_start = RESERVED_SECTORS as u32 + NUM_FATS as u32 * fat_size;

        if total_sectors < data_start + SECTORS_PER_CLUSTER as u32 {
            return Err(DiskError::OutOfSpace);
        }

        Ok(Self {
            bytes_per_sector,
            total_sectors,
            fat_size,
            data_start,
            cluster_count: (total_sectors - data_start) / SECTORS_PER_CLUSTER as u32,
        })
    }
}

/// 11-byte volume label, space padded, truncated if longer.
pub fn volume_label(label: &str) -> [u8; 11] {
    let mut out = [b' '; 11];
    let len = label.len().min(11);
    out[..len].copy_from_slice(&label.as_bytes()[..len]);
    out
}

fn boot_sector(layout: &Fat32Layout, hidden_sectors: u32, options: &Fat32Options<'_>) -> Vec<u8> {
    let mut bs = vec![0u8; layout.bytes_per_sector as usize];

    bs[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]); // JMP short + NOP
    bs[3..11].copy_from_slice(b"MSWIN4.1");
    bs[11..13].copy_from_slice(&(layout.bytes_per_sector as u16).to_le_bytes());
    bs[13] = SECTORS_PER_CLUSTER;
    bs[14..16].copy_from_slice(&RESERVED_SECTORS.to_le_bytes());
    bs[16] = NUM_FATS;
    // root_entry_count, total_sectors_16, fat_size_16 stay 0 on FAT32
    bs[21] = 0xF8; // fixed disk
    bs[24..26].copy_from_slice(&63u16.to_le_bytes());
    bs[26..28].copy_from_slice(&255u16.to_le_bytes());
    bs[28..32].copy_from_slice(&hidden_sectors.to_le_bytes());
    bs[32..36].copy_from_slice(&layout.total_sectors.to_le_bytes());
    bs[36..40].copy_from_slice(&layout.fat_size.to_le_bytes());
    bs[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    bs[48..50].copy_from_slice(&FSINFO_SECTOR.to_le_bytes());
    bs[50..52].copy_from_slice(&BACKUP_BOOT_SECTOR.to_le_bytes());
    bs[64] = 0x80;
    bs[66] = 0x29; // extended boot signature
    bs[67..71].copy_from_slice(&options.volume_id.to_le_bytes());
    bs[71..82].copy_from_slice(&volume_label(options.label));
    bs[82..90].copy_from_slice(b"FAT32   ");
    bs[510] = 0x55;
    bs[511] = 0xAA;
    bs
}

fn fsinfo_sector(layout: &Fat32Layout) -> Vec<u8> {
    let mut sector = vec![0u8; layout.bytes_per_sector as usize];
    sector[0..4].copy_from_slice(&FSINFO_LEAD_SIG.to_le_bytes());
    sector[484..488].copy_from_slice(&FSINFO_STRUC_SIG.to_le_bytes());
    // Root directory already holds one cluster
    sector[488..492].copy_from_slice(&(layout.cluster_count - 1).to_le_bytes());
    sector[492..496].copy_from_slice(&(ROOT_CLUSTER + 1).to_le_bytes());
    sector[508..512].copy_from_slice(&FSINFO_TRAIL_SIG.to_le_bytes());
    sector
}

/// Format `partition_sectors` blocks at `partition_lba_start` as FAT32.
///
/// Writes boot sector, FSInfo, backup boot sector, both FATs (zeroed apart
/// from the media, end-of-chain and root entries) and an empty root
/// directory cluster.
pub fn format_fat32<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    partition_sectors: u64,
    options: &Fat32Options<'_>,
) -> Result<Fat32Layout> {
    let bytes_per_sector = block_io.block_size().to_u32();
    if !(512..=4096).contains(&bytes_per_sector) {
        return Err(DiskError::InvalidArgument);
    }
    let total_sectors = u32::try_from(partition_sectors).map_err(|_| DiskError::InvalidArgument)?;
    let end = partition_lba_start
        .checked_add(partition_sectors)
        .ok_or(DiskError::InvalidArgument)?;
    if end > block_io.num_blocks()? {
        return Err(DiskError::InvalidArgument);
    }

    let layout = Fat32Layout::new(bytes_per_sector, total_sectors)?;
    let hidden_sectors = partition_lba_start.min(u32::MAX as u64) as u32;
    let start = partition_lba_start;

    let boot_bytes = boot_sector(&layout, hidden_sectors, options);
    block_io.write_blocks(Lba(start), &boot_bytes)?;
    block_io.write_blocks(Lba(start + FSINFO_SECTOR as u64), &fsinfo_sector(&layout))?;
    block_io.write_blocks(Lba(start + BACKUP_BOOT_SECTOR as u64), &boot_bytes)?;

    let mut first_fat_sector = vec![0u8; bytes_per_sector as usize];
    first_fat_sector[0..4].copy_from_slice(&FAT_MEDIA_ENTRY.to_le_bytes());
    first_fat_sector[4..8].copy_from_slice(&FAT_EOC.to_le_bytes());
    first_fat_sector[8..12].copy_from_slice(&FAT_EOC.to_le_bytes());
    let empty_sector = vec![0u8; bytes_per_sector as usize];

    for fat in 0..NUM_FATS as u64 {
        let fat_start = start + RESERVED_SECTORS as u64 + fat * layout.fat_size as u64;
        block_io.write_blocks(Lba(fat_start), &first_fat_sector)?;
        for sector in 1..layout.fat_size as u64 {
            block_io.write_blocks(Lba(fat_start + sector), &empty_sector)?;
        }
    }

    let root_lba = start + layout.data_start as u64;
    for sector in 0..SECTORS_PER_CLUSTER as u64 {
        block_io.write_blocks(Lba(root_lba + sector), &empty_sector)?;
    }

    block_io.flush()?;
    log_info!(
        "fat32: {} sectors, FAT size {}, {} clusters at LBA {}",
        layout.total_sectors,
        layout.fat_size,
        layout.cluster_count,
        start
    );
    Ok(layout)
}

/// Format an EFI System Partition on a registered device.
pub fn format_esp(
    dev: &dyn BlockDevice,
    partition_lba_start: u64,
    partition_sectors: u64,
    label: &str,
) -> Result<Fat32Layout> {
    let options = Fat32Options {
        label,
        ..Fat32Options::default()
    };
    format_fat32(
        &mut BlockIoAdapter::new(dev),
        partition_lba_start,
        partition_sectors,
        &options,
    )
}
