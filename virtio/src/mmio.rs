//! Device memory access.
//!
//! Everything that touches memory the device can see lives here: volatile
//! MMIO register access and DMA buffers shared with the device. The rest of
//! the crate is safe code on top of [`RegisterFile`] and [`DmaBuffer`].

use alloc::vec::Vec;
use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, Ordering};
use provision_core::{DiskError, Result};

/// 32-bit register access by byte offset.
pub trait RegisterFile {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

/// A fixed window of MMIO registers.
pub struct MmioRegion {
    base: usize,
    len: usize,
}

impl MmioRegion {
    /// # Safety
    /// `base..base + len` must be a mapped device register window that stays
    /// valid for as long as the region exists, and no other code may drive
    /// the same device concurrently.
    pub const unsafe fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    fn addr(&self, offset: usize) -> usize {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "mmio offset {:#x} outside {:#x}-byte window",
            offset,
            self.len
        );
        self.base + offset
    }
}

impl RegisterFile for MmioRegion {
    fn read32(&self, offset: usize) -> u32 {
        let addr = self.addr(offset);
        // SAFETY: in bounds of the window promised valid by `new`, aligned
        unsafe { ptr::read_volatile(addr as *const u32) }
    }

    fn write32(&self, offset: usize, value: u32) {
        let addr = self.addr(offset);
        // SAFETY: as above
        unsafe { ptr::write_volatile(addr as *mut u32, value) };
        fence(Ordering::SeqCst);
    }
}

/// Evenly spaced register windows, e.g. the virtio-mmio slots of a board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotTable {
    pub base: usize,
    pub stride: usize,
    pub count: usize,
}

impl SlotTable {
    /// # Safety
    /// Every slot must satisfy the contract of [`MmioRegion::new`] with
    /// `len = stride`.
    pub unsafe fn regions(self) -> impl Iterator<Item = MmioRegion> {
        (0..self.count).map(move |i| MmioRegion {
            base: self.base + i * self.stride,
            len: self.stride,
        })
    }
}

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; 16]);

/// Zeroed, 16-byte aligned memory handed to the device by address.
///
/// Physical addresses are identity mapped. All access goes through
/// volatile reads and writes since the device may change the contents at
/// any time while a request is outstanding.
pub struct DmaBuffer {
    ptr: NonNull<Chunk>,
    chunks: usize,
    len: usize,
}

// The buffer owns its allocation outright
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(DiskError::InvalidArgument);
        }
        let chunks = len.div_ceil(16);
        let mut storage: Vec<Chunk> = Vec::new();
        storage
            .try_reserve_exact(chunks)
            .map_err(|_| DiskError::OutOfSpace)?;
        storage.resize(chunks, Chunk([0; 16]));

        let raw = alloc::boxed::Box::into_raw(storage.into_boxed_slice());
        let ptr = NonNull::new(raw as *mut Chunk).ok_or(DiskError::OutOfSpace)?;
        Ok(Self { ptr, chunks, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus address of byte 0.
    pub fn phys_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    fn at(&self, offset: usize, size: usize) -> *mut u8 {
        assert!(
            offset % size.min(8) == 0 && offset + size <= self.len,
            "dma access {}+{} outside {}-byte buffer",
            offset,
            size,
            self.len
        );
        // SAFETY: offset checked against the allocation above
        unsafe { (self.ptr.as_ptr() as *mut u8).add(offset) }
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        // SAFETY: `at` bounds-checks
        unsafe { ptr::read_volatile(self.at(offset, 1)) }
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        unsafe { ptr::write_volatile(self.at(offset, 1), value) }
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        unsafe { ptr::read_volatile(self.at(offset, 2) as *const u16) }
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        unsafe { ptr::write_volatile(self.at(offset, 2) as *mut u16, value) }
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.at(offset, 4) as *const u32) }
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.at(offset, 4) as *mut u32, value) }
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        unsafe { ptr::write_volatile(self.at(offset, 8) as *mut u64, value) }
    }

    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        if out.is_empty() {
            return;
        }
        let src = self.at(offset, 1);
        assert!(offset + out.len() <= self.len);
        fence(Ordering::SeqCst);
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: range checked above
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let dst = self.at(offset, 1);
        assert!(offset + data.len() <= self.len);
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: range checked above
            unsafe { ptr::write_volatile(dst.add(i), *byte) };
        }
        fence(Ordering::SeqCst);
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: reconstructs exactly the boxed slice leaked in `new`
        unsafe {
            drop(alloc::boxed::Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.chunks,
            )));
        }
    }
}
