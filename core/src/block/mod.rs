//! Block device contract.
//!
//! Every layer above the drivers (GPT engine, formatters, installer) talks to
//! storage only through [`BlockDevice`]. Drivers implement it, the
//! [`DeviceRegistry`] owns the instances, and callers hold cheap
//! [`DeviceHandle`] clones.
//!
//! Byte-granular access on top of the block contract lives in [`bytes`];
//! [`BlockIoAdapter`] bridges a device into the `gpt_disk_io` ecosystem.

mod adapter;
pub mod bytes;
mod registry;

pub use adapter::BlockIoAdapter;
pub use bytes::{read_bytes, write_bytes};
pub use registry::DeviceRegistry;

use crate::error::{DiskError, Result};
use alloc::sync::Arc;

/// Shared reference to a registered device
pub type DeviceHandle = Arc<dyn BlockDevice>;

/// Read/write-by-LBA storage.
///
/// `read` and `write` transfer exactly `count` blocks; `buf` must be
/// `count * block_size` bytes long.
pub trait BlockDevice {
    fn name(&self) -> &str;

    /// Total capacity in bytes
    fn size_bytes(&self) -> u64;

    fn block_size(&self) -> u32;

    fn read(&self, lba: u64, buf: &mut [u8], count: u32) -> Result<()>;

    fn write(&self, lba: u64, buf: &[u8], count: u32) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn total_blocks(&self) -> u64 {
        match self.block_size() {
            0 => 0,
            bs => self.size_bytes() / bs as u64,
        }
    }
}

/// Validate a transfer against the device geometry before touching hardware.
pub fn check_io_args<D: BlockDevice + ?Sized>(
    dev: &D,
    lba: u64,
    buf_len: usize,
    count: u32,
) -> Result<()> {
    let block_size = dev.block_size() as usize;
    if count == 0 || block_size == 0 {
        return Err(DiskError::InvalidArgument);
    }
    let expected = (count as usize)
        .checked_mul(block_size)
        .ok_or(DiskError::InvalidArgument)?;
    if buf_len != expected {
        return Err(DiskError::InvalidArgument);
    }
    let end = lba
        .checked_add(count as u64)
        .ok_or(DiskError::InvalidArgument)?;
    if end > dev.total_blocks() {
        return Err(DiskError::InvalidArgument);
    }
    Ok(())
}
