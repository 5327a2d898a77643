// FAT32 post-format verification

use super::format::{
    BACKUP_BOOT_SECTOR, FAT_EOC, FAT_MEDIA_ENTRY, FSINFO_SECTOR, NUM_FATS, RESERVED_SECTORS,
    ROOT_CLUSTER,
};
use crate::error::{DiskError, Result};
use crate::log_warn;
use alloc::vec;
use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn reject(what: &str) -> DiskError {
    log_warn!("fat32: verify failed: {}", what);
    DiskError::IoError
}

/// Check the structures `format_fat32` lays down.
///
/// `NotFound` if the boot sector does not describe a FAT32 volume at all,
/// `IoError` for a damaged one.
pub fn verify_fat32<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
) -> Result<()> {
    let sector_size = block_io.block_size().to_u32() as usize;
    let mut boot = vec![0u8; sector_size];
    block_io.read_blocks(Lba(partition_lba_start), &mut boot)?;

    if boot[510] != 0x55 || boot[511] != 0xAA || &boot[82..90] != b"FAT32   " {
        return Err(DiskError::NotFound);
    }
    if le_u16(&boot, 11) as usize != sector_size {
        return Err(reject("bytes per sector"));
    }
    if le_u16(&boot, 14) != RESERVED_SECTORS || boot[16] != NUM_FATS {
        return Err(reject("reserved sectors / FAT count"));
    }
    if le_u32(&boot, 44) != ROOT_CLUSTER {
        return Err(reject("root cluster"));
    }
    if le_u16(&boot, 48) != FSINFO_SECTOR || le_u16(&boot, 50) != BACKUP_BOOT_SECTOR {
        return Err(reject("FSInfo / backup location"));
    }
    let fat_size = le_u32(&boot, 36);

    let mut buffer = vec![0u8; sector_size];
    block_io.read_blocks(Lba(partition_lba_start + FSINFO_SECTOR as u64), &mut buffer)?;
    if le_u32(&buffer, 0) != 0x4161_5252
        || le_u32(&buffer, 484) != 0x6141_7272
        || le_u32(&buffer, 508) != 0xAA55_0000
    {
        return Err(reject("FSInfo signatures"));
    }

    block_io.read_blocks(
        Lba(partition_lba_start + BACKUP_BOOT_SECTOR as u64),
        &mut buffer,
    )?;
    if buffer != boot {
        return Err(reject("backup boot sector differs"));
    }

    for fat in 0..NUM_FATS as u64 {
        let lba = partition_lba_start + RESERVED_SECTORS as u64 + fat * fat_size as u64;
        block_io.read_blocks(Lba(lba), &mut buffer)?;
        if le_u32(&buffer, 0) != FAT_MEDIA_ENTRY
            || le_u32(&buffer, 4) != FAT_EOC
            || le_u32(&buffer, 8) & 0x0FFF_FFFF < 0x0FFF_FFF8
        {
            return Err(reject("reserved FAT entries"));
        }
    }

    Ok(())
}
