//! Split virtqueue.
//!
//! One [`DmaBuffer`] holds the three rings back to back:
//!
//! ```text
//! desc  [size]  16 bytes each, 16-aligned
//! avail         flags, idx, ring[size], used_event
//! used          flags, idx, ring[size] of (id, len), avail_event; 4-aligned
//! ```

use crate::mmio::DmaBuffer;
use core::sync::atomic::{fence, Ordering};
use provision_core::{DiskError, Result};

pub const DESC_F_NEXT: u16 = 1;
pub const DESC_F_WRITE: u16 = 2;

const DESC_SIZE: usize = 16;
const USED_ELEM_SIZE: usize = 8;

/// Largest queue the driver will set up regardless of what the device offers
pub const QUEUE_CAP: u16 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// A completed chain taken off the used ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedElem {
    pub id: u32,
    pub len: u32,
}

pub struct Virtqueue {
    mem: DmaBuffer,
    size: u16,
    avail_offset: usize,
    used_offset: usize,
    next_avail: u16,
    last_used: u16,
}

impl Virtqueue {
    /// Allocate zeroed rings for `size` entries.
    pub fn new(size: u16) -> Result<Self> {
        if size == 0 || size > QUEUE_CAP {
            return Err(DiskError::InvalidArgument);
        }
        let n = size as usize;
        let avail_offset = n * DESC_SIZE;
        let avail_len = 4 + 2 * n + 2;
        let used_offset = (avail_offset + avail_len + 3) & !3;
        let used_len = 4 + USED_ELEM_SIZE * n + 2;

        let mem = DmaBuffer::new(used_offset + used_len)?;
        Ok(Self {
            mem,
            size,
            avail_offset,
            used_offset,
            next_avail: 0,
            last_used: 0,
        })
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn desc_addr(&self) -> u64 {
        self.mem.phys_addr()
    }

    pub fn avail_addr(&self) -> u64 {
        self.mem.phys_addr() + self.avail_offset as u64
    }

    pub fn used_addr(&self) -> u64 {
        self.mem.phys_addr() + self.used_offset as u64
    }

    pub fn set_descriptor(&mut self, index: u16, desc: Descriptor) -> Result<()> {
        if index >= self.size || desc.next >= self.size {
            return Err(DiskError::InvalidArgument);
        }
        let at = index as usize * DESC_SIZE;
        self.mem.write_u64(at, desc.addr);
        self.mem.write_u32(at + 8, desc.len);
        self.mem.write_u16(at + 12, desc.flags);
        self.mem.write_u16(at + 14, desc.next);
        Ok(())
    }

    pub fn descriptor(&self, index: u16) -> Option<Descriptor> {
        if index >= self.size {
            return None;
        }
        let at = index as usize * DESC_SIZE;
        let lo = self.mem.read_u32(at) as u64;
        let hi = self.mem.read_u32(at + 4) as u64;
        Some(Descriptor {
            addr: lo | (hi << 32),
            len: self.mem.read_u32(at + 8),
            flags: self.mem.read_u16(at + 12),
            next: self.mem.read_u16(at + 14),
        })
    }

    /// Publish the chain starting at `head`.
    ///
    /// The ring slot is written before the index so the device never sees
    /// an index covering an unwritten slot.
    pub fn submit(&mut self, head: u16) {
        let slot = (self.next_avail % self.size) as usize;
        self.mem.write_u16(self.avail_offset + 4 + 2 * slot, head);
        fence(Ordering::SeqCst);

        self.next_avail = self.next_avail.wrapping_add(1);
        self.mem.write_u16(self.avail_offset + 2, self.next_avail);
        fence(Ordering::SeqCst);
    }

    pub fn avail_idx(&self) -> u16 {
        self.mem.read_u16(self.avail_offset + 2)
    }

    pub fn used_idx(&self) -> u16 {
        fence(Ordering::SeqCst);
        self.mem.read_u16(self.used_offset + 2)
    }

    /// Take the next completion, if the device has produced one.
    pub fn pop_used(&mut self) -> Option<UsedElem> {
        if self.used_idx() == self.last_used {
            return None;
        }
        let slot = (self.last_used % self.size) as usize;
        let at = self.used_offset + 4 + USED_ELEM_SIZE * slot;
        let elem = UsedElem {
            id: self.mem.read_u32(at),
            len: self.mem.read_u32(at + 4),
        };
        self.last_used = self.last_used.wrapping_add(1);
        Some(elem)
    }

    /// Requests submitted but not yet seen on the used ring
    pub fn in_flight(&self) -> u16 {
        self.next_avail.wrapping_sub(self.last_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_layout() {
        let q = Virtqueue::new(128).unwrap();
        assert_eq!(q.desc_addr() % 16, 0);
        assert_eq!(q.avail_addr() - q.desc_addr(), 128 * 16);
        // 2048 + 4 + 256 + 2 = 2310, rounded up to 2312
        assert_eq!(q.used_addr() - q.desc_addr(), 2312);
        assert_eq!(q.used_addr() % 4, 0);
    }

    #[test]
    fn test_descriptor_round_trip() {
        let mut q = Virtqueue::new(8).unwrap();
        let desc = Descriptor {
            addr: 0x1234_5678_9abc,
            len: 512,
            flags: DESC_F_NEXT | DESC_F_WRITE,
            next: 2,
        };
        q.set_descriptor(1, desc).unwrap();
        assert_eq!(q.descriptor(1), Some(desc));
        assert_eq!(q.set_descriptor(8, desc), Err(DiskError::InvalidArgument));
    }

    #[test]
    fn test_submit_advances_avail() {
        let mut q = Virtqueue::new(4).unwrap();
        for _ in 0..5 {
            q.submit(0);
        }
        assert_eq!(q.avail_idx(), 5);
        assert_eq!(q.in_flight(), 5);
        assert_eq!(q.pop_used(), None);
    }
}
