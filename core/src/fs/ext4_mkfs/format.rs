// EXT4 mkfs writer

use super::layout::*;
use crate::block::BlockDevice;
use crate::disk::guid::{GuidGenerator, GuidSource};
use crate::error::{DiskError, Result};
use crate::time::Clock;
use crate::{log_info, log_warn};
use alloc::vec;

/// Zero-fill granularity for inode tables
const ZERO_CHUNK_BLOCKS: u64 = 16;

#[derive(Clone, Copy, Debug)]
pub struct Ext4Options<'a> {
    pub label: &'a str,
    pub reserved_percent: u8,
}

impl Default for Ext4Options<'_> {
    fn default() -> Self {
        Self {
            label: "",
            reserved_percent: 5,
        }
    }
}

/// Filesystem blocks mapped onto a partition's device blocks.
struct PartitionWriter<'a> {
    dev: &'a dyn BlockDevice,
    start_lba: u64,
    sectors_per_block: u64,
    block_count: u64,
}

impl PartitionWriter<'_> {
    fn write_blocks(&self, block: u64, data: &[u8]) -> Result<()> {
        let blocks = data.len() as u64 / BLOCK_SIZE;
        if data.len() as u64 % BLOCK_SIZE != 0 || block + blocks > self.block_count {
            return Err(DiskError::InvalidArgument);
        }
        let lba = self.start_lba + block * self.sectors_per_block;
        let count = u32::try_from(blocks * self.sectors_per_block)
            .map_err(|_| DiskError::InvalidArgument)?;
        self.dev.write(lba, data, count)
    }

    fn zero_blocks(&self, first: u64, count: u64) -> Result<()> {
        let chunk = vec![0u8; (ZERO_CHUNK_BLOCKS * BLOCK_SIZE) as usize];
        let mut done = 0;
        while done < count {
            let n = (count - done).min(ZERO_CHUNK_BLOCKS);
            self.write_blocks(first + done, &chunk[..(n * BLOCK_SIZE) as usize])?;
            done += n;
        }
        Ok(())
    }
}

/// Lay down an empty EXT4 skeleton on `num_sectors` device blocks at
/// `start_lba`.
///
/// Writes: superblock, one descriptor block, per-group bitmaps and zeroed
/// inode tables, the root inode and its directory block. No journal,
/// extent trees or resize inode are populated even though the feature
/// flags advertise them. Bitmaps leave every block free; only the counters
/// account for metadata.
pub fn mkfs(
    dev: &dyn BlockDevice,
    start_lba: u64,
    num_sectors: u64,
    options: &Ext4Options<'_>,
    clock: &dyn Clock,
) -> Result<Ext4Geometry> {
    let dev_block = dev.block_size() as u64;
    if dev_block == 0 || dev_block > BLOCK_SIZE || BLOCK_SIZE % dev_block != 0 {
        return Err(DiskError::InvalidArgument);
    }
    let end = start_lba
        .checked_add(num_sectors)
        .ok_or(DiskError::InvalidArgument)?;
    if end > dev.total_blocks() {
        return Err(DiskError::InvalidArgument);
    }

    let geo = Ext4Geometry::for_partition(num_sectors * dev_block, options.reserved_percent)?;
    let out = PartitionWriter {
        dev,
        start_lba,
        sectors_per_block: BLOCK_SIZE / dev_block,
        block_count: geo.block_count,
    };

    log_info!(
        "ext4: {} blocks, {} groups, {} inodes on {} at LBA {}",
        geo.block_count,
        geo.group_count,
        geo.inode_count,
        dev.name(),
        start_lba
    );

    let now_secs = (clock.now_ms() / 1000) as u32;
    let uuid = GuidGenerator::new(clock).next_guid().to_bytes();

    // Block 0: boot area + superblock
    let mut block = vec![0u8; BLOCK_SIZE as usize];
    let sb = Ext4Superblock::new(&geo, options.label, uuid, now_secs);
    block[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE].copy_from_slice(&sb.encode());
    out.write_blocks(0, &block)?;

    // Block 1: group descriptors
    block.fill(0);
    let described = geo.described_groups();
    for (group, desc) in (0..described).zip(block.chunks_exact_mut(DESC_SIZE)) {
        encode_group_desc(&geo, group, desc);
    }
    out.write_blocks(1, &block)?;
    if described < geo.group_count {
        log_warn!(
            "ext4: descriptor table covers {} of {} groups",
            described,
            geo.group_count
        );
    }

    for group in 0..geo.group_count {
        write_block_bitmap(&out, &geo, group, &mut block)?;
        write_inode_bitmap(&out, &geo, group, &mut block)?;
        out.zero_blocks(geo.inode_table(group), INODE_TABLE_BLOCKS)?;
    }

    // Root inode lives in the first inode table block (inode 2 = index 1)
    block.fill(0);
    let slot = (ROOT_INODE - 1) as usize * INODE_SIZE as usize;
    encode_root_inode(
        geo.root_dir_block(),
        now_secs,
        &mut block[slot..slot + INODE_SIZE as usize],
    );
    out.write_blocks(geo.inode_table(0), &block)?;

    block.fill(0);
    encode_root_dir_block(&mut block);
    out.write_blocks(geo.root_dir_block(), &block)?;

    dev.flush()?;
    log_info!("ext4: mkfs complete, label '{}'", sb.label());
    Ok(geo)
}

/// All blocks free; bits past the end of a short trailing group are set.
///
/// Metadata blocks are not marked in use here. The superblock and
/// descriptor free counts subtract them anyway, so the two disagree.
fn write_block_bitmap(
    out: &PartitionWriter<'_>,
    geo: &Ext4Geometry,
    group: u32,
    block: &mut [u8],
) -> Result<()> {
    block.fill(0);
    for bit in geo.blocks_in_group(group)..BLOCKS_PER_GROUP {
        set_bit(block, bit as usize);
    }
    out.write_blocks(geo.block_bitmap(group), block)
}

/// Reserved inodes in use in group 0; padding past the group's inodes set.
fn write_inode_bitmap(
    out: &PartitionWriter<'_>,
    geo: &Ext4Geometry,
    group: u32,
    block: &mut [u8],
) -> Result<()> {
    block.fill(0);
    if group == 0 {
        for bit in 0..RESERVED_INODES as usize {
            set_bit(block, bit);
        }
    }
    block[INODES_PER_GROUP as usize / 8..].fill(0xFF);
    out.write_blocks(geo.inode_bitmap(group), block)
}

fn set_bit(bitmap: &mut [u8], bit: usize) {
    bitmap[bit / 8] |= 1 << (bit % 8);
}

/// Decode the superblock of the volume at `start_lba`.
pub fn read_superblock(dev: &dyn BlockDevice, start_lba: u64) -> Result<Ext4Superblock> {
    let mut raw = [0u8; SUPERBLOCK_SIZE];
    crate::block::read_bytes(
        dev,
        start_lba * dev.block_size() as u64 + SUPERBLOCK_OFFSET as u64,
        &mut raw,
    )?;
    Ext4Superblock::decode(&raw)
}
