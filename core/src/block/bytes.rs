// Byte-range access on top of the block contract
//
// Unaligned writes read the covering blocks first so bytes outside the
// requested range survive. No retries: the first failure is returned.

use super::BlockDevice;
use crate::error::{DiskError, Result};
use alloc::vec::Vec;

/// Blocks covering `[offset, offset + len)`.
struct Span {
    first_lba: u64,
    count: u32,
    /// Offset of the requested range inside the first block
    head: usize,
}

fn covering_span<D: BlockDevice + ?Sized>(dev: &D, offset: u64, len: usize) -> Result<Span> {
    let block_size = dev.block_size() as u64;
    if block_size == 0 {
        return Err(DiskError::InvalidArgument);
    }
    let end = offset
        .checked_add(len as u64)
        .ok_or(DiskError::InvalidArgument)?;
    if end > dev.size_bytes() {
        return Err(DiskError::InvalidArgument);
    }

    let first_lba = offset / block_size;
    let last_lba = (end - 1) / block_size;
    let count = u32::try_from(last_lba - first_lba + 1).map_err(|_| DiskError::InvalidArgument)?;

    Ok(Span {
        first_lba,
        count,
        head: (offset % block_size) as usize,
    })
}

fn scratch(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DiskError::OutOfSpace)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Read `buf.len()` bytes starting at byte `offset`.
pub fn read_bytes<D: BlockDevice + ?Sized>(dev: &D, offset: u64, buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let span = covering_span(dev, offset, buf.len())?;
    let mut blocks = scratch(span.count as usize * dev.block_size() as usize)?;

    dev.read(span.first_lba, &mut blocks, span.count)?;
    buf.copy_from_slice(&blocks[span.head..span.head + buf.len()]);
    Ok(())
}

/// Write `data` starting at byte `offset`.
///
/// Whole-block, block-aligned writes go straight to the device. Anything
/// else costs one read of the covering blocks before the write.
pub fn write_bytes<D: BlockDevice + ?Sized>(dev: &D, offset: u64, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let block_size = dev.block_size() as usize;
    let span = covering_span(dev, offset, data.len())?;

    if span.head == 0 && data.len() % block_size == 0 {
        return dev.write(span.first_lba, data, span.count);
    }

    let mut blocks = scratch(span.count as usize * block_size)?;
    dev.read(span.first_lba, &mut blocks, span.count)?;
    blocks[span.head..span.head + data.len()].copy_from_slice(data);
    dev.write(span.first_lba, &blocks, span.count)
}
