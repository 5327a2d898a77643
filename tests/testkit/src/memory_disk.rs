// Sparse in-memory block device with operation tracing and fault injection

use provision_core::{BlockDevice, DiskError, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Flush,
}

/// Sparse block device: only blocks that were written with non-zero data
/// are stored, so multi-GiB geometries stay cheap.
pub struct MemoryDisk {
    name: String,
    block_size: u32,
    block_count: u64,
    blocks: RefCell<BTreeMap<u64, Vec<u8>>>,
    trace: RefCell<Vec<(Op, u64, u32)>>,
    reads: Cell<usize>,
    writes: Cell<usize>,
    fail_write_at: Cell<Option<usize>>,
    fail_reads: Cell<bool>,
}

impl MemoryDisk {
    pub fn new(name: &str, block_size: u32, block_count: u64) -> Self {
        Self {
            name: name.to_string(),
            block_size,
            block_count,
            blocks: RefCell::new(BTreeMap::new()),
            trace: RefCell::new(Vec::new()),
            reads: Cell::new(0),
            writes: Cell::new(0),
            fail_write_at: Cell::new(None),
            fail_reads: Cell::new(false),
        }
    }

    /// 512-byte sectors, `mib` MiB in total
    pub fn with_mib(name: &str, mib: u64) -> Self {
        Self::new(name, 512, mib * 2048)
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn reset_counters(&self) {
        self.reads.set(0);
        self.writes.set(0);
        self.trace.borrow_mut().clear();
    }

    /// Every operation since the last reset: (op, lba, count)
    pub fn trace(&self) -> Vec<(Op, u64, u32)> {
        self.trace.borrow().clone()
    }

    /// Fail the write that would make the write counter exceed `n`.
    pub fn fail_write_after(&self, n: usize) {
        self.fail_write_at.set(Some(n));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    pub fn block(&self, lba: u64) -> Vec<u8> {
        self.blocks
            .borrow()
            .get(&lba)
            .cloned()
            .unwrap_or_else(|| vec![0u8; self.block_size as usize])
    }

    pub fn bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        let bs = self.block_size as u64;
        (0..len as u64)
            .map(|i| {
                let at = offset + i;
                self.block(at / bs)[(at % bs) as usize]
            })
            .collect()
    }

    /// Store raw bytes without touching the counters.
    pub fn poke(&self, offset: u64, data: &[u8]) {
        let bs = self.block_size as u64;
        let mut blocks = self.blocks.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            let at = offset + i as u64;
            let block = blocks
                .entry(at / bs)
                .or_insert_with(|| vec![0u8; bs as usize]);
            block[(at % bs) as usize] = *byte;
        }
    }
}

impl BlockDevice for MemoryDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.block_count * self.block_size as u64
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read(&self, lba: u64, buf: &mut [u8], count: u32) -> Result<()> {
        provision_core::block::check_io_args(self, lba, buf.len(), count)?;
        self.reads.set(self.reads.get() + 1);
        self.trace.borrow_mut().push((Op::Read, lba, count));
        if self.fail_reads.get() {
            return Err(DiskError::IoError);
        }

        let bs = self.block_size as usize;
        let blocks = self.blocks.borrow();
        for (i, chunk) in buf.chunks_exact_mut(bs).enumerate() {
            match blocks.get(&(lba + i as u64)) {
                Some(data) => chunk.copy_from_slice(data),
                None => chunk.fill(0),
            }
        }
        Ok(())
    }

    fn write(&self, lba: u64, buf: &[u8], count: u32) -> Result<()> {
        provision_core::block::check_io_args(self, lba, buf.len(), count)?;
        if let Some(limit) = self.fail_write_at.get() {
            if self.writes.get() >= limit {
                return Err(DiskError::IoError);
            }
        }
        self.writes.set(self.writes.get() + 1);
        self.trace.borrow_mut().push((Op::Write, lba, count));

        let bs = self.block_size as usize;
        let mut blocks = self.blocks.borrow_mut();
        for (i, chunk) in buf.chunks_exact(bs).enumerate() {
            let lba = lba + i as u64;
            if chunk.iter().all(|&b| b == 0) {
                blocks.remove(&lba);
            } else {
                blocks.insert(lba, chunk.to_vec());
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.trace.borrow_mut().push((Op::Flush, 0, 0));
        Ok(())
    }
}
