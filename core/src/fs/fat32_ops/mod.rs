// FAT32 filesystem operations - minimal implementation for bootloader installation
//
// 8.3 short names only, no long file names: a name that does not fit is
// rejected rather than truncated. Directories stay one cluster. A failed
// write hands its clusters back to the free pool.

mod context;
mod directory;
mod file_ops;
mod types;

pub use context::Fat32Context;
pub use types::{fits_short_name, short_name, DirEntry};

use crate::error::{DiskError, Result};
use crate::log_info;
use alloc::vec::Vec;
use gpt_disk_io::BlockIo;

/// Write a new file at `path`, creating missing parent directories.
pub fn write_file<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let ctx = Fat32Context::from_boot_sector(block_io, partition_lba_start)?;

    let path = path.trim_matches('/');
    let (parent, name) = match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    };
    if name.is_empty() {
        return Err(DiskError::InvalidArgument);
    }

    let dir_cluster = directory::create_directory(block_io, partition_lba_start, &ctx, parent)?;
    file_ops::write_file_in_directory(
        block_io,
        partition_lba_start,
        &ctx,
        dir_cluster,
        name,
        data,
    )?;

    block_io.flush()?;
    log_info!("fat32: wrote /{} ({} bytes)", path, data.len());
    Ok(())
}

/// Create directory (creates full path)
pub fn create_directory<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    path: &str,
) -> Result<()> {
    let ctx = Fat32Context::from_boot_sector(block_io, partition_lba_start)?;
    directory::create_directory(block_io, partition_lba_start, &ctx, path)?;
    block_io.flush()?;
    Ok(())
}

/// Read file data from FAT32 partition
pub fn read_file<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    path: &str,
) -> Result<Vec<u8>> {
    let ctx = Fat32Context::from_boot_sector(block_io, partition_lba_start)?;
    file_ops::read_file(block_io, partition_lba_start, &ctx, path)
}

/// Check if file exists
pub fn file_exists<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    path: &str,
) -> Result<bool> {
    let ctx = Fat32Context::from_boot_sector(block_io, partition_lba_start)?;
    file_ops::file_exists(block_io, partition_lba_start, &ctx, path)
}

/// Names in the directory at `path` (8.3 form), in on-disk order.
pub fn list_directory<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    path: &str,
) -> Result<Vec<DirEntry>> {
    let ctx = Fat32Context::from_boot_sector(block_io, partition_lba_start)?;
    let cluster = if path.trim_matches('/').is_empty() {
        ctx.root_cluster
    } else {
        let entry = file_ops::resolve(block_io, partition_lba_start, &ctx, path)?;
        if !entry.is_directory() {
            return Err(DiskError::InvalidArgument);
        }
        entry.first_cluster()
    };

    let mut entries = Vec::new();
    directory::scan_directory::<_, (), _>(block_io, partition_lba_start, &ctx, cluster, |entry| {
        if entry.name[0] != b'.' {
            entries.push(*entry);
        }
        None
    })?;
    Ok(entries)
}
