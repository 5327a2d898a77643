//! Test doubles shared by the workspace's integration tests.
//!
//! `MemoryDisk` stands in for a registered block device, `MemoryFs` for the
//! host filesystem the copy engine reads from and writes to.

mod memory_disk;
mod memory_fs;

pub use memory_disk::{MemoryDisk, Op};
pub use memory_fs::{MemFile, MemoryFs, Node};
