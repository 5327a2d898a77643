// FAT32 file read/write operations

use super::context::Fat32Context;
use super::directory::{add_dir_entry, find_entry};
use super::types::{fits_short_name, DirEntry, ATTR_ARCHIVE};
use crate::error::{DiskError, Result};
use crate::log_warn;
use alloc::vec;
use alloc::vec::Vec;
use gpt_disk_io::BlockIo;

/// Store `data` as a new file `name` in the directory at `dir_cluster`.
///
/// On failure every cluster claimed for the file is released again.
pub fn write_file_in_directory<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    dir_cluster: u32,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let file_size = u32::try_from(data.len()).map_err(|_| DiskError::InvalidArgument)?;
    if !fits_short_name(name) {
        return Err(DiskError::InvalidArgument);
    }
    if find_entry(block_io, partition_start, ctx, dir_cluster, name)?.is_some() {
        return Err(DiskError::InvalidArgument);
    }

    let mut first_cluster = 0;
    let result = write_chain(block_io, partition_start, ctx, name, data, &mut first_cluster)
        .and_then(|()| {
            let mut entry = DirEntry::empty();
            entry.set_name(name);
            entry.attr = ATTR_ARCHIVE;
            entry.set_first_cluster(first_cluster);
            entry.file_size = file_size;
            add_dir_entry(block_io, partition_start, ctx, dir_cluster, &entry)
        });

    if let Err(err) = result {
        if first_cluster != 0 {
            release(block_io, partition_start, ctx, first_cluster);
        }
        return Err(err);
    }
    Ok(())
}

/// Write `data` into a fresh cluster chain, recording its head in `first`
/// as soon as it exists.
#[cfg_attr(not(feature = "fat32_debug"), allow(unused_variables))]
fn write_chain<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    name: &str,
    data: &[u8],
    first: &mut u32,
) -> Result<()> {
    let cluster_size = ctx.cluster_bytes();
    let mut cluster_data = vec![0u8; cluster_size];
    let mut prev_cluster = 0;

    // Each new cluster is linked before its data is written, so the chain
    // from `first` always covers everything allocated
    for chunk in data.chunks(cluster_size) {
        let cluster = ctx.allocate_cluster(block_io, partition_start, prev_cluster + 1)?;
        if prev_cluster == 0 {
            *first = cluster;
        } else {
            ctx.write_fat_entry(block_io, partition_start, prev_cluster, cluster)?;
        }

        cluster_data[..chunk.len()].copy_from_slice(chunk);
        cluster_data[chunk.len()..].fill(0);
        ctx.write_cluster(block_io, partition_start, cluster, &cluster_data)?;

        #[cfg(feature = "fat32_debug")]
        crate::log_debug!("fat32: {} cluster {} <- {} bytes", name, cluster, chunk.len());
        prev_cluster = cluster;
    }
    Ok(())
}

/// Best-effort rollback of a chain; a failure here only loses space.
pub(super) fn release<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    first_cluster: u32,
) {
    if let Err(err) = ctx.free_chain(block_io, partition_start, first_cluster) {
        log_warn!("fat32: could not release chain at cluster {}: {}", first_cluster, err);
    }
}

/// Look up the entry at `path`.
pub fn resolve<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    ctx: &Fat32Context,
    path: &str,
) -> Result<DirEntry> {
    let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
    let mut current_cluster = ctx.root_cluster;

    while let Some(part) = parts.next() {
        let entry = find_entry(block_io, partition_lba_start, ctx, current_cluster, part)?
            .ok_or(DiskError::NotFound)?;

        if parts.peek().is_none() {
            return Ok(entry);
        }
        if !entry.is_directory() {
            return Err(DiskError::NotFound);
        }
        current_cluster = entry.first_cluster();
    }

    // Empty path: the root itself has no entry
    Err(DiskError::InvalidArgument)
}

pub fn read_file<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    ctx: &Fat32Context,
    path: &str,
) -> Result<Vec<u8>> {
    let entry = resolve(block_io, partition_lba_start, ctx, path)?;
    if entry.is_directory() {
        return Err(DiskError::InvalidArgument);
    }

    let file_size = entry.file_size as usize;
    let mut data = Vec::new();
    data.try_reserve_exact(file_size)
        .map_err(|_| DiskError::OutOfSpace)?;

    let mut cluster_data = vec![0u8; ctx.cluster_bytes()];
    for cluster in ctx.cluster_chain(block_io, partition_lba_start, entry.first_cluster())? {
        if data.len() >= file_size {
            break;
        }
        ctx.read_cluster(block_io, partition_lba_start, cluster, &mut cluster_data)?;
        let take = (file_size - data.len()).min(cluster_data.len());
        data.extend_from_slice(&cluster_data[..take]);
    }

    if data.len() != file_size {
        // Chain shorter than the recorded size
        return Err(DiskError::IoError);
    }
    Ok(data)
}

pub fn file_exists<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    ctx: &Fat32Context,
    path: &str,
) -> Result<bool> {
    match resolve(block_io, partition_lba_start, ctx, path) {
        Ok(_) => Ok(true),
        Err(DiskError::NotFound) => Ok(false),
        Err(err) => Err(err),
    }
}
