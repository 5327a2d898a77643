//! Minimal EXT4 formatter.
//!
//! Fixed 4 KiB blocks, 32768 blocks and 8192 inodes of 256 bytes per group.
//! The result is a bootstrap skeleton (superblock, descriptors, bitmaps,
//! inode tables, root directory) rather than a complete filesystem: there
//! is no journal, no extent tree, a single descriptor block, and no group
//! descriptor checksums even though `GDT_CSUM` is advertised.

mod format;
mod layout;

pub use format::{mkfs, read_superblock, Ext4Options};
pub use layout::{
    Ext4Geometry, Ext4Superblock, BLOCKS_PER_GROUP, BLOCK_SIZE, EXT4_MAGIC, INODES_PER_GROUP,
    INODE_SIZE, INODE_TABLE_BLOCKS, ROOT_INODE,
};
