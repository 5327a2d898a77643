// FAT32 directory operations

use super::context::Fat32Context;
use super::file_ops::release;
use super::types::{fits_short_name, short_name, DirEntry, ATTR_DIRECTORY, DIR_ENTRY_SIZE};
use crate::error::{DiskError, Result};
use alloc::vec;
use gpt_disk_io::BlockIo;

/// Call `visit` on every in-use entry of the directory at `dir_cluster`
/// until it returns `Some`.
pub fn scan_directory<B, T, F>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    dir_cluster: u32,
    mut visit: F,
) -> Result<Option<T>>
where
    B: BlockIo<Error = DiskError>,
    F: FnMut(&DirEntry) -> Option<T>,
{
    let mut cluster_data = vec![0u8; ctx.cluster_bytes()];

    for cluster in ctx.cluster_chain(block_io, partition_start, dir_cluster)? {
        ctx.read_cluster(block_io, partition_start, cluster, &mut cluster_data)?;

        for raw in cluster_data.chunks_exact(DIR_ENTRY_SIZE) {
            let entry = DirEntry::decode(raw);
            if entry.is_end() {
                return Ok(None);
            }
            if !entry.is_visible() {
                continue;
            }
            if let Some(found) = visit(&entry) {
                return Ok(Some(found));
            }
        }
    }

    Ok(None)
}

pub fn find_entry<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    dir_cluster: u32,
    name: &str,
) -> Result<Option<DirEntry>> {
    let wanted = short_name(name);
    scan_directory(block_io, partition_start, ctx, dir_cluster, |entry| {
        (entry.name == wanted).then_some(*entry)
    })
}

pub fn ensure_directory_exists<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    parent_cluster: u32,
    name: &str,
) -> Result<u32> {
    match find_entry(block_io, partition_start, ctx, parent_cluster, name)? {
        Some(entry) if entry.is_directory() => Ok(entry.first_cluster()),
        // A file is in the way
        Some(_) => Err(DiskError::InvalidArgument),
        None => create_directory_in_parent(block_io, partition_start, ctx, parent_cluster, name),
    }
}

pub fn create_directory_in_parent<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    parent_cluster: u32,
    name: &str,
) -> Result<u32> {
    if !fits_short_name(name) {
        return Err(DiskError::InvalidArgument);
    }
    let new_cluster = ctx.allocate_cluster(block_io, partition_start, parent_cluster)?;

    match link_directory(block_io, partition_start, ctx, parent_cluster, new_cluster, name) {
        Ok(()) => Ok(new_cluster),
        Err(err) => {
            release(block_io, partition_start, ctx, new_cluster);
            Err(err)
        }
    }
}

fn link_directory<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    parent_cluster: u32,
    new_cluster: u32,
    name: &str,
) -> Result<()> {
    // Initialize new directory cluster with . and .. entries
    let mut cluster_data = vec![0u8; ctx.cluster_bytes()];

    let mut dot_entry = DirEntry::empty();
    dot_entry.name = *b".          ";
    dot_entry.attr = ATTR_DIRECTORY;
    dot_entry.set_first_cluster(new_cluster);
    dot_entry.encode(&mut cluster_data[..DIR_ENTRY_SIZE]);

    // '..' of a top-level directory points at cluster 0, not the root cluster
    let mut dotdot_entry = DirEntry::empty();
    dotdot_entry.name = *b"..         ";
    dotdot_entry.attr = ATTR_DIRECTORY;
    if parent_cluster != ctx.root_cluster {
        dotdot_entry.set_first_cluster(parent_cluster);
    }
    dotdot_entry.encode(&mut cluster_data[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);

    ctx.write_cluster(block_io, partition_start, new_cluster, &cluster_data)?;

    let mut entry = DirEntry::empty();
    entry.set_name(name);
    entry.attr = ATTR_DIRECTORY;
    entry.set_first_cluster(new_cluster);
    add_dir_entry(block_io, partition_start, ctx, parent_cluster, &entry)
}

/// Store `entry` in the first free slot of the directory.
///
/// Directories never grow past their existing clusters; a full one is
/// `BufferFull`.
pub fn add_dir_entry<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_start: u64,
    ctx: &Fat32Context,
    dir_cluster: u32,
    entry: &DirEntry,
) -> Result<()> {
    let mut cluster_data = vec![0u8; ctx.cluster_bytes()];

    for cluster in ctx.cluster_chain(block_io, partition_start, dir_cluster)? {
        ctx.read_cluster(block_io, partition_start, cluster, &mut cluster_data)?;

        let free_slot = cluster_data
            .chunks_exact(DIR_ENTRY_SIZE)
            .position(|raw| DirEntry::decode(raw).is_free());

        if let Some(slot) = free_slot {
            let at = slot * DIR_ENTRY_SIZE;
            entry.encode(&mut cluster_data[at..at + DIR_ENTRY_SIZE]);
            return ctx.write_cluster(block_io, partition_start, cluster, &cluster_data);
        }
    }

    Err(DiskError::BufferFull)
}

/// Create every missing directory along `path`, returning the last one's
/// cluster.
pub fn create_directory<B: BlockIo<Error = DiskError>>(
    block_io: &mut B,
    partition_lba_start: u64,
    ctx: &Fat32Context,
    path: &str,
) -> Result<u32> {
    let mut current_cluster = ctx.root_cluster;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current_cluster =
            ensure_directory_exists(block_io, partition_lba_start, ctx, current_cluster, part)?;
    }

    Ok(current_cluster)
}
