// Path-keyed in-memory filesystem for the copy engine

use provision_core::copy::{DirListing, FileKind, FileSystem, Metadata, OpenMode};
use provision_core::{DiskError, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
    Device,
}

pub struct MemFile {
    path: String,
    pos: usize,
    writable: bool,
}

/// Path-keyed in-memory filesystem with failure injection.
pub struct MemoryFs {
    pub nodes: BTreeMap<String, Node>,
    /// Directories created through `mkdir`, in order
    pub created_dirs: Vec<String>,
    pub fail_read_of: Option<String>,
    /// Cap on bytes accepted per `write` call
    pub short_write: Option<usize>,
    pub open_files: usize,
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => "/",
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes,
            created_dirs: Vec::new(),
            fail_read_of: None,
            short_write: None,
            open_files: 0,
        }
    }

    pub fn add_dir(&mut self, path: &str) {
        self.nodes.insert(normalize(path), Node::Dir);
    }

    pub fn add_file(&mut self, path: &str, data: &[u8]) {
        self.nodes.insert(normalize(path), Node::File(data.to_vec()));
    }

    pub fn add_device(&mut self, path: &str) {
        self.nodes.insert(normalize(path), Node::Device);
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::File(data)) => Some(data),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.get(&normalize(path)), Some(Node::Dir))
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFs {
    type File = MemFile;

    fn stat(&mut self, path: &str) -> Result<Metadata> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::Dir) => Ok(Metadata {
                kind: FileKind::Directory,
                size: 0,
            }),
            Some(Node::File(data)) => Ok(Metadata {
                kind: FileKind::File,
                size: data.len() as u64,
            }),
            Some(Node::Device) => Ok(Metadata {
                kind: FileKind::Other,
                size: 0,
            }),
            None => Err(DiskError::NotFound),
        }
    }

    fn read_dir(&mut self, path: &str, listing: &mut DirListing) -> Result<()> {
        let dir = normalize(path);
        if !self.is_dir(&dir) {
            return Err(DiskError::NotFound);
        }
        listing.push(".")?;
        listing.push("..")?;
        for key in self.nodes.keys() {
            if key != "/" && parent_of(key) == dir {
                let name = key.rsplit('/').next().unwrap_or(key);
                listing.push(name)?;
            }
        }
        Ok(())
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<MemFile> {
        let path = normalize(path);
        match mode {
            OpenMode::Read => {
                if !matches!(self.nodes.get(&path), Some(Node::File(_))) {
                    return Err(DiskError::NotFound);
                }
            }
            OpenMode::WriteCreateTruncate => {
                if !self.is_dir(parent_of(&path)) {
                    return Err(DiskError::NotFound);
                }
                self.nodes.insert(path.clone(), Node::File(Vec::new()));
            }
        }
        self.open_files += 1;
        Ok(MemFile {
            path,
            pos: 0,
            writable: mode == OpenMode::WriteCreateTruncate,
        })
    }

    fn read(&mut self, file: &mut MemFile, buf: &mut [u8]) -> Result<usize> {
        if self.fail_read_of.as_deref() == Some(file.path.as_str()) {
            return Err(DiskError::IoError);
        }
        let Some(Node::File(data)) = self.nodes.get(&file.path) else {
            return Err(DiskError::NotFound);
        };
        let n = buf.len().min(data.len() - file.pos.min(data.len()));
        buf[..n].copy_from_slice(&data[file.pos..file.pos + n]);
        file.pos += n;
        Ok(n)
    }

    fn write(&mut self, file: &mut MemFile, data: &[u8]) -> Result<usize> {
        if !file.writable {
            return Err(DiskError::InvalidArgument);
        }
        let n = self.short_write.map_or(data.len(), |cap| data.len().min(cap));
        let Some(Node::File(contents)) = self.nodes.get_mut(&file.path) else {
            return Err(DiskError::NotFound);
        };
        contents.extend_from_slice(&data[..n]);
        file.pos += n;
        Ok(n)
    }

    fn close(&mut self, _file: MemFile) -> Result<()> {
        self.open_files -= 1;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(Node::Dir) => return Ok(()),
            Some(_) => return Err(DiskError::InvalidArgument),
            None => {}
        }
        if !self.is_dir(parent_of(&path)) {
            return Err(DiskError::NotFound);
        }
        self.nodes.insert(path.clone(), Node::Dir);
        self.created_dirs.push(path);
        Ok(())
    }
}
