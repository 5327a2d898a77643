// Filesystem interface the copy engine runs against

use crate::error::{DiskError, Result};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    /// Devices, links and anything else the engine skips
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: FileKind,
    pub size: u64,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Write, creating the file or truncating an existing one
    WriteCreateTruncate,
}

/// Names of one directory, bounded so an oversized directory is an error
/// rather than a silent truncation.
#[derive(Debug, Clone)]
pub struct DirListing {
    names: Vec<String>,
    capacity: usize,
}

impl DirListing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            names: Vec::new(),
            capacity,
        }
    }

    /// Append a name; `BufferFull` once the listing holds `capacity` names.
    pub fn push(&mut self, name: &str) -> Result<()> {
        if self.names.len() >= self.capacity {
            return Err(DiskError::BufferFull);
        }
        self.names.push(name.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Names other than `.` and `..`.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| *name != "." && *name != "..")
    }
}

/// Operations a mounted filesystem exposes to the copy engine.
pub trait FileSystem {
    type File;

    fn stat(&mut self, path: &str) -> Result<Metadata>;

    /// Push every name in the directory at `path` into `listing`.
    fn read_dir(&mut self, path: &str, listing: &mut DirListing) -> Result<()>;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Self::File>;

    /// Returns bytes read; 0 at end of file.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize>;

    /// Returns bytes written, which may be short.
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize>;

    fn close(&mut self, file: Self::File) -> Result<()>;

    /// Create a directory. Succeeds if it already exists.
    fn mkdir(&mut self, path: &str) -> Result<()>;
}

/// `parent/name`, without doubling a trailing slash on `parent`.
pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "bin"), "/bin");
        assert_eq!(join_path("/mnt/target/", "bin"), "/mnt/target/bin");
        assert_eq!(join_path("/mnt/target", "bin"), "/mnt/target/bin");
        assert_eq!(join_path("/mnt", "/etc"), "/mnt/etc");
    }

    #[test]
    fn test_listing_bounded() {
        let mut listing = DirListing::with_capacity(2);
        listing.push("a").unwrap();
        listing.push("b").unwrap();
        assert_eq!(listing.push("c"), Err(DiskError::BufferFull));
        assert_eq!(listing.len(), 2);
    }

    #[test]
    fn test_listing_skips_dot_entries() {
        let mut listing = DirListing::with_capacity(8);
        for name in [".", "..", "etc", "bin"] {
            listing.push(name).unwrap();
        }
        let names: Vec<&str> = listing.entries().collect();
        assert_eq!(names, ["etc", "bin"]);
    }
}
