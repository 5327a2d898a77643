//! Recursive file copy with progress reporting.
//!
//! The engine walks the source tree twice: once to total its size, once to
//! copy. The total goes stale if the tree changes between the passes, so the
//! percentage it feeds is advisory only. Nothing is rolled back on failure;
//! a partially written destination file stays behind.

mod engine;
mod vfs;

pub use engine::{calculate_total_size, copy_directory, copy_file, copy_filesystem};
pub use vfs::{join_path, DirListing, FileKind, FileSystem, Metadata, OpenMode};

use alloc::string::String;

/// Default streaming buffer size.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;
/// Default bound on the entries of one directory listing.
pub const MAX_DIR_ENTRIES: usize = 256;

/// Progress callback: (copied_bytes, total_bytes, current_path)
pub type ProgressCallback<'a> = &'a mut dyn FnMut(u64, u64, &str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    pub chunk_size: usize,
    pub max_dir_entries: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: COPY_CHUNK_SIZE,
            max_dir_entries: MAX_DIR_ENTRIES,
        }
    }
}

/// Running state of a copy, updated after every chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyProgress {
    pub copied_bytes: u64,
    pub total_bytes: u64,
    pub current_path: String,
}

impl CopyProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            copied_bytes: 0,
            total_bytes,
            current_path: String::new(),
        }
    }

    /// Whole percent done, clamped to 100. An empty tree counts as done.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.copied_bytes.saturating_mul(100) / self.total_bytes;
        pct.min(100) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.copied_bytes >= self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut progress = CopyProgress::new(200);
        assert_eq!(progress.percent(), 0);
        progress.copied_bytes = 50;
        assert_eq!(progress.percent(), 25);
        // Source grew between passes
        progress.copied_bytes = 300;
        assert_eq!(progress.percent(), 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_empty_tree_is_done() {
        assert_eq!(CopyProgress::new(0).percent(), 100);
    }
}
