// Two-pass recursive copy

use super::vfs::{join_path, DirListing, FileKind, FileSystem, OpenMode};
use super::{CopyOptions, CopyProgress, ProgressCallback};
use crate::error::{DiskError, Result};
use crate::{log_debug, log_error, log_info};
use alloc::string::String;
use alloc::vec::Vec;

/// Sum of regular file sizes under `path`.
///
/// Anything at `exclude` is left out, so a target mounted inside the
/// source tree is not counted.
pub fn calculate_total_size<F: FileSystem>(
    fs: &mut F,
    path: &str,
    exclude: Option<&str>,
    options: &CopyOptions,
) -> Result<u64> {
    let meta = fs.stat(path)?;
    match meta.kind {
        FileKind::File => Ok(meta.size),
        FileKind::Other => Ok(0),
        FileKind::Directory => {
            let mut total = 0u64;
            for child in list_children(fs, path, options)? {
                if exclude == Some(child.as_str()) {
                    continue;
                }
                total += calculate_total_size(fs, &child, exclude, options)?;
            }
            Ok(total)
        }
    }
}

fn list_children<F: FileSystem>(
    fs: &mut F,
    path: &str,
    options: &CopyOptions,
) -> Result<Vec<String>> {
    let mut listing = DirListing::with_capacity(options.max_dir_entries);
    fs.read_dir(path, &mut listing)?;
    Ok(listing.entries().map(|name| join_path(path, name)).collect())
}

fn chunk_buffer(size: usize) -> Result<Vec<u8>> {
    if size == 0 {
        return Err(DiskError::InvalidArgument);
    }
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| DiskError::OutOfSpace)?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Stream `size` bytes from `src` into a fresh `dst`.
///
/// `progress` is updated and `callback` invoked after every chunk. Both
/// files are closed on every path out.
pub fn copy_file<F: FileSystem>(
    fs: &mut F,
    src: &str,
    dst: &str,
    size: u64,
    options: &CopyOptions,
    progress: &mut CopyProgress,
    callback: &mut Option<ProgressCallback<'_>>,
) -> Result<()> {
    let mut buffer = chunk_buffer(options.chunk_size)?;

    let mut src_file = fs.open(src, OpenMode::Read).map_err(|err| {
        log_error!("copy: failed to open source {}: {}", src, err);
        err
    })?;
    let mut dst_file = match fs.open(dst, OpenMode::WriteCreateTruncate) {
        Ok(file) => file,
        Err(err) => {
            log_error!("copy: failed to create {}: {}", dst, err);
            let _ = fs.close(src_file);
            return Err(err);
        }
    };

    let streamed = stream(
        fs,
        &mut src_file,
        &mut dst_file,
        src,
        size,
        &mut buffer,
        progress,
        callback,
    );

    let closed_src = fs.close(src_file);
    let closed_dst = fs.close(dst_file);
    streamed.and(closed_src).and(closed_dst)?;

    log_debug!("copy: {} -> {} ({} bytes)", src, dst, size);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn stream<F: FileSystem>(
    fs: &mut F,
    src_file: &mut F::File,
    dst_file: &mut F::File,
    src: &str,
    size: u64,
    buffer: &mut [u8],
    progress: &mut CopyProgress,
    callback: &mut Option<ProgressCallback<'_>>,
) -> Result<()> {
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;

        let bytes_read = fs.read(src_file, &mut buffer[..want])?;
        if bytes_read == 0 {
            log_error!("copy: {} ended {} bytes early", src, remaining);
            return Err(DiskError::IoError);
        }

        let bytes_written = fs.write(dst_file, &buffer[..bytes_read])?;
        if bytes_written != bytes_read {
            log_error!(
                "copy: short write for {} ({} of {})",
                src,
                bytes_written,
                bytes_read
            );
            return Err(DiskError::IoError);
        }

        remaining -= bytes_read as u64;
        progress.copied_bytes += bytes_read as u64;
        if progress.current_path != src {
            progress.current_path.clear();
            progress.current_path.push_str(src);
        }
        if let Some(cb) = callback.as_mut() {
            cb(progress.copied_bytes, progress.total_bytes, src);
        }
    }
    Ok(())
}

/// Create `dst` and copy the contents of `src` into it.
///
/// Stops at the first failing entry; later siblings are not attempted.
#[allow(clippy::too_many_arguments)]
pub fn copy_directory<F: FileSystem>(
    fs: &mut F,
    src: &str,
    dst: &str,
    exclude: Option<&str>,
    options: &CopyOptions,
    progress: &mut CopyProgress,
    callback: &mut Option<ProgressCallback<'_>>,
) -> Result<()> {
    fs.mkdir(dst).map_err(|err| {
        log_error!("copy: failed to create directory {}: {}", dst, err);
        err
    })?;

    let mut listing = DirListing::with_capacity(options.max_dir_entries);
    fs.read_dir(src, &mut listing)?;

    for name in listing.entries() {
        let src_child = join_path(src, name);
        if exclude == Some(src_child.as_str()) {
            continue;
        }
        let dst_child = join_path(dst, name);

        let meta = fs.stat(&src_child)?;
        match meta.kind {
            FileKind::Directory => copy_directory(
                fs, &src_child, &dst_child, exclude, options, progress, callback,
            )?,
            FileKind::File => copy_file(
                fs, &src_child, &dst_child, meta.size, options, progress, callback,
            )?,
            FileKind::Other => log_debug!("copy: skipping special file {}", src_child),
        }
    }

    Ok(())
}

/// Copy the tree at `src_root` into `dst_root`.
///
/// Returns the final progress; on success `copied_bytes == total_bytes`
/// unless the source changed between the sizing and copying passes.
pub fn copy_filesystem<F: FileSystem>(
    fs: &mut F,
    src_root: &str,
    dst_root: &str,
    options: &CopyOptions,
    mut callback: Option<ProgressCallback<'_>>,
) -> Result<CopyProgress> {
    if src_root.is_empty() || dst_root.is_empty() {
        return Err(DiskError::InvalidArgument);
    }
    if !fs.stat(src_root)?.is_dir() {
        return Err(DiskError::InvalidArgument);
    }

    log_info!("copy: {} -> {}", src_root, dst_root);

    // A target mounted under the source must not copy into itself
    let exclude = Some(dst_root.trim_end_matches('/')).filter(|d| !d.is_empty());

    let total_bytes = calculate_total_size(fs, src_root, exclude, options)?;
    log_info!("copy: {} bytes to copy", total_bytes);

    let mut progress = CopyProgress::new(total_bytes);
    copy_directory(
        fs,
        src_root,
        dst_root,
        exclude,
        options,
        &mut progress,
        &mut callback,
    )
    .map_err(|err| {
        log_error!("copy: failed after {} bytes: {}", progress.copied_bytes, err);
        err
    })?;

    log_info!("copy: done, {} bytes", progress.copied_bytes);
    Ok(progress)
}
