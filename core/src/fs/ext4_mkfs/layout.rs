// EXT4 geometry and on-disk structure codecs

use crate::error::{DiskError, Result};

pub const EXT4_MAGIC: u16 = 0xEF53;
pub const BLOCK_SIZE: u64 = 4096;
pub const LOG_BLOCK_SIZE: u32 = 2; // 1024 << 2
pub const BLOCKS_PER_GROUP: u64 = 32768;
pub const INODES_PER_GROUP: u32 = 8192;
pub const INODE_SIZE: u32 = 256;
pub const INODE_TABLE_BLOCKS: u64 = INODES_PER_GROUP as u64 * INODE_SIZE as u64 / BLOCK_SIZE;
pub const RESERVED_INODES: u32 = 10;
pub const ROOT_INODE: u32 = 2;
pub const FIRST_INODE: u32 = 11;
pub const DESC_SIZE: usize = 64;
pub const SUPERBLOCK_OFFSET: usize = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;

pub const COMPAT_RESIZE_INODE: u32 = 0x0010;
pub const COMPAT_DIR_INDEX: u32 = 0x0020;
pub const INCOMPAT_FILETYPE: u32 = 0x0002;
pub const INCOMPAT_EXTENTS: u32 = 0x0040;
pub const INCOMPAT_64BIT: u32 = 0x0080;
pub const INCOMPAT_FLEX_BG: u32 = 0x0200;
pub const RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
pub const RO_COMPAT_LARGE_FILE: u32 = 0x0002;
pub const RO_COMPAT_HUGE_FILE: u32 = 0x0008;
pub const RO_COMPAT_GDT_CSUM: u32 = 0x0010;
pub const RO_COMPAT_DIR_NLINK: u32 = 0x0020;
pub const RO_COMPAT_EXTRA_ISIZE: u32 = 0x0040;

const S_IFDIR: u16 = 0x4000;
const FT_DIR: u8 = 2;

/// Block layout of a formatted volume.
///
/// Group 0 starts with the superblock (block 0) and the descriptor block
/// (block 1). Every group then has block bitmap, inode bitmap and inode
/// table back to back. The root directory's data block follows group 0's
/// inode table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ext4Geometry {
    pub block_count: u64,
    pub group_count: u32,
    pub inode_count: u32,
    pub reserved_blocks: u64,
}

impl Ext4Geometry {
    pub fn for_partition(partition_bytes: u64, reserved_percent: u8) -> Result<Self> {
        if reserved_percent > 50 {
            return Err(DiskError::InvalidArgument);
        }
        let mut block_count = partition_bytes / BLOCK_SIZE;
        if block_count <= group_overhead(0) + 1 {
            return Err(DiskError::OutOfSpace);
        }

        let mut group_count = block_count.div_ceil(BLOCKS_PER_GROUP);
        let tail = block_count - (group_count - 1) * BLOCKS_PER_GROUP;
        if group_count > 1 && tail <= group_overhead(1) {
            // Not even room for the trailing group's own metadata
            block_count -= tail;
            group_count -= 1;
        }

        let group_count = u32::try_from(group_count).map_err(|_| DiskError::OutOfSpace)?;
        let inode_count = group_count
            .checked_mul(INODES_PER_GROUP)
            .ok_or(DiskError::OutOfSpace)?;

        Ok(Self {
            block_count,
            group_count,
            inode_count,
            reserved_blocks: block_count * reserved_percent as u64 / 100,
        })
    }

    pub fn group_start(&self, group: u32) -> u64 {
        group as u64 * BLOCKS_PER_GROUP
    }

    pub fn blocks_in_group(&self, group: u32) -> u64 {
        (self.block_count - self.group_start(group)).min(BLOCKS_PER_GROUP)
    }

    pub fn block_bitmap(&self, group: u32) -> u64 {
        self.group_start(group) + if group == 0 { 2 } else { 0 }
    }

    pub fn inode_bitmap(&self, group: u32) -> u64 {
        self.block_bitmap(group) + 1
    }

    pub fn inode_table(&self, group: u32) -> u64 {
        self.block_bitmap(group) + 2
    }

    pub fn root_dir_block(&self) -> u64 {
        self.inode_table(0) + INODE_TABLE_BLOCKS
    }

    /// Groups whose descriptors fit in the single descriptor block.
    pub fn described_groups(&self) -> u32 {
        self.group_count.min((BLOCK_SIZE as usize / DESC_SIZE) as u32)
    }

    /// Blocks not taken by metadata or the root directory.
    ///
    /// The block bitmaps written by `mkfs` do not mark that metadata, so
    /// this count is lower than the bitmap's free bits.
    pub fn free_blocks_in_group(&self, group: u32) -> u64 {
        let used = group_overhead(group) + if group == 0 { 1 } else { 0 };
        self.blocks_in_group(group).saturating_sub(used)
    }

    pub fn free_blocks(&self) -> u64 {
        (0..self.group_count)
            .map(|g| self.free_blocks_in_group(g))
            .sum()
    }

    pub fn free_inodes(&self) -> u32 {
        self.inode_count - RESERVED_INODES
    }
}

/// Metadata blocks at the start of a group.
fn group_overhead(group: u32) -> u64 {
    let super_and_gdt = if group == 0 { 2 } else { 0 };
    super_and_gdt + 2 + INODE_TABLE_BLOCKS
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ext4Superblock {
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub r_blocks_count: u64,
    pub free_blocks_count: u64,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub wtime: u32,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub rev_level: u32,
    pub first_ino: u32,
    pub inode_size: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub desc_size: u16,
    pub mkfs_time: u32,
}

impl Ext4Superblock {
    pub fn new(geo: &Ext4Geometry, label: &str, uuid: [u8; 16], now_secs: u32) -> Self {
        // 15 bytes of label, byte 15 always NUL
        let mut volume_name = [0u8; 16];
        let len = label.len().min(15);
        volume_name[..len].copy_from_slice(&label.as_bytes()[..len]);

        Self {
            inodes_count: geo.inode_count,
            blocks_count: geo.block_count,
            r_blocks_count: geo.reserved_blocks,
            free_blocks_count: geo.free_blocks(),
            free_inodes_count: geo.free_inodes(),
            first_data_block: 0,
            log_block_size: LOG_BLOCK_SIZE,
            blocks_per_group: BLOCKS_PER_GROUP as u32,
            inodes_per_group: INODES_PER_GROUP,
            wtime: now_secs,
            magic: EXT4_MAGIC,
            state: 1,  // cleanly unmounted
            errors: 1, // continue
            rev_level: 1,
            first_ino: FIRST_INODE,
            inode_size: INODE_SIZE as u16,
            feature_compat: COMPAT_RESIZE_INODE | COMPAT_DIR_INDEX,
            feature_incompat: INCOMPAT_FILETYPE
                | INCOMPAT_EXTENTS
                | INCOMPAT_64BIT
                | INCOMPAT_FLEX_BG,
            feature_ro_compat: RO_COMPAT_SPARSE_SUPER
                | RO_COMPAT_LARGE_FILE
                | RO_COMPAT_HUGE_FILE
                | RO_COMPAT_GDT_CSUM
                | RO_COMPAT_DIR_NLINK
                | RO_COMPAT_EXTRA_ISIZE,
            uuid,
            volume_name,
            desc_size: DESC_SIZE as u16,
            mkfs_time: now_secs,
        }
    }

    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut sb = [0u8; SUPERBLOCK_SIZE];
        put_u32(&mut sb, 0, self.inodes_count);
        put_u32(&mut sb, 4, self.blocks_count as u32);
        put_u32(&mut sb, 8, self.r_blocks_count as u32);
        put_u32(&mut sb, 12, self.free_blocks_count as u32);
        put_u32(&mut sb, 16, self.free_inodes_count);
        put_u32(&mut sb, 20, self.first_data_block);
        put_u32(&mut sb, 24, self.log_block_size);
        put_u32(&mut sb, 28, self.log_block_size); // cluster == block
        put_u32(&mut sb, 32, self.blocks_per_group);
        put_u32(&mut sb, 36, self.blocks_per_group);
        put_u32(&mut sb, 40, self.inodes_per_group);
        put_u32(&mut sb, 48, self.wtime);
        put_u16(&mut sb, 54, 0xFFFF); // max mount count
        put_u16(&mut sb, 56, self.magic);
        put_u16(&mut sb, 58, self.state);
        put_u16(&mut sb, 60, self.errors);
        put_u32(&mut sb, 64, self.wtime); // last check
        put_u32(&mut sb, 76, self.rev_level);
        put_u32(&mut sb, 84, self.first_ino);
        put_u16(&mut sb, 88, self.inode_size);
        put_u32(&mut sb, 92, self.feature_compat);
        put_u32(&mut sb, 96, self.feature_incompat);
        put_u32(&mut sb, 100, self.feature_ro_compat);
        sb[104..120].copy_from_slice(&self.uuid);
        sb[120..136].copy_from_slice(&self.volume_name);
        put_u16(&mut sb, 254, self.desc_size);
        put_u32(&mut sb, 264, self.mkfs_time);
        put_u32(&mut sb, 336, (self.blocks_count >> 32) as u32);
        put_u32(&mut sb, 340, (self.r_blocks_count >> 32) as u32);
        put_u32(&mut sb, 344, (self.free_blocks_count >> 32) as u32);
        put_u16(&mut sb, 348, 32); // min extra isize
        put_u16(&mut sb, 350, 32); // want extra isize
        sb
    }

    pub fn decode(sb: &[u8]) -> Result<Self> {
        if sb.len() < SUPERBLOCK_SIZE || get_u16(sb, 56) != EXT4_MAGIC {
            return Err(DiskError::NotFound);
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&sb[104..120]);
        let mut volume_name = [0u8; 16];
        volume_name.copy_from_slice(&sb[120..136]);

        Ok(Self {
            inodes_count: get_u32(sb, 0),
            blocks_count: get_u32(sb, 4) as u64 | (get_u32(sb, 336) as u64) << 32,
            r_blocks_count: get_u32(sb, 8) as u64 | (get_u32(sb, 340) as u64) << 32,
            free_blocks_count: get_u32(sb, 12) as u64 | (get_u32(sb, 344) as u64) << 32,
            free_inodes_count: get_u32(sb, 16),
            first_data_block: get_u32(sb, 20),
            log_block_size: get_u32(sb, 24),
            blocks_per_group: get_u32(sb, 32),
            inodes_per_group: get_u32(sb, 40),
            wtime: get_u32(sb, 48),
            magic: get_u16(sb, 56),
            state: get_u16(sb, 58),
            errors: get_u16(sb, 60),
            rev_level: get_u32(sb, 76),
            first_ino: get_u32(sb, 84),
            inode_size: get_u16(sb, 88),
            feature_compat: get_u32(sb, 92),
            feature_incompat: get_u32(sb, 96),
            feature_ro_compat: get_u32(sb, 100),
            uuid,
            volume_name,
            desc_size: get_u16(sb, 254),
            mkfs_time: get_u32(sb, 264),
        })
    }

    pub fn label(&self) -> &str {
        let len = self.volume_name.iter().position(|&b| b == 0).unwrap_or(16);
        core::str::from_utf8(&self.volume_name[..len]).unwrap_or("")
    }
}

/// 64-byte group descriptor for `group`.
pub fn encode_group_desc(geo: &Ext4Geometry, group: u32, out: &mut [u8]) {
    let block_bitmap = geo.block_bitmap(group);
    let inode_bitmap = geo.inode_bitmap(group);
    let inode_table = geo.inode_table(group);
    let free_blocks = geo.free_blocks_in_group(group);
    let (free_inodes, used_dirs) = if group == 0 {
        (INODES_PER_GROUP - RESERVED_INODES, 1)
    } else {
        (INODES_PER_GROUP, 0)
    };

    put_u32(out, 0, block_bitmap as u32);
    put_u32(out, 4, inode_bitmap as u32);
    put_u32(out, 8, inode_table as u32);
    put_u16(out, 12, free_blocks as u16);
    put_u16(out, 14, free_inodes as u16);
    put_u16(out, 16, used_dirs);
    put_u16(out, 28, free_inodes as u16); // itable unused
    put_u32(out, 32, (block_bitmap >> 32) as u32);
    put_u32(out, 36, (inode_bitmap >> 32) as u32);
    put_u32(out, 40, (inode_table >> 32) as u32);
    put_u16(out, 44, (free_blocks >> 16) as u16);
}

/// Root directory inode: mode 0755, two links, one direct data block.
pub fn encode_root_inode(data_block: u64, now_secs: u32, out: &mut [u8]) {
    put_u16(out, 0, S_IFDIR | 0o755);
    put_u32(out, 4, BLOCK_SIZE as u32);
    put_u32(out, 8, now_secs);
    put_u32(out, 12, now_secs);
    put_u32(out, 16, now_secs);
    put_u16(out, 26, 2);
    put_u32(out, 28, (BLOCK_SIZE / 512) as u32);
    put_u32(out, 40, data_block as u32);
    put_u16(out, 128, 32); // extra isize
}

/// `.` and `..` for the root, the second entry stretched to the block end.
pub fn encode_root_dir_block(out: &mut [u8]) {
    put_u32(out, 0, ROOT_INODE);
    put_u16(out, 4, 12);
    out[6] = 1;
    out[7] = FT_DIR;
    out[8] = b'.';

    put_u32(out, 12, ROOT_INODE);
    put_u16(out, 16, (BLOCK_SIZE - 12) as u16);
    out[18] = 2;
    out[19] = FT_DIR;
    out[20] = b'.';
    out[21] = b'.';
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
