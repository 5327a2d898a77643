// Device side of a virtio-mmio block device, for driving the driver in tests
//
// Walks the rings the driver programs by raw address, the same way a
// hypervisor would read guest memory.

#![allow(dead_code)]

use provision_virtio::regs::*;
use provision_virtio::RegisterFile;
use std::cell::{Cell, RefCell};
use std::ptr;
use std::rc::Rc;

pub const SECTOR: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub req_type: u32,
    pub sector: u64,
    pub data_len: u32,
    pub descriptors: usize,
    pub data_writable: bool,
}

pub struct FakeDevice {
    pub magic: Cell<u32>,
    pub version: Cell<u32>,
    pub device_id: Cell<u32>,
    pub device_features: Cell<u64>,
    /// Whether FEATURES_OK sticks when the driver sets it
    pub accept_features: Cell<bool>,
    pub queue_num_max: Cell<u32>,
    /// Never complete a request
    pub stall: Cell<bool>,
    /// Status byte returned for every request
    pub reply_status: Cell<u8>,

    status: Cell<u32>,
    features_sel: Cell<u32>,
    driver_features_sel: Cell<u32>,
    driver_features: Cell<u64>,
    queue_num: Cell<u32>,
    queue_ready: Cell<u32>,
    desc: Cell<u64>,
    avail: Cell<u64>,
    used: Cell<u64>,
    seen_avail: Cell<u16>,

    pub notifies: Cell<u32>,
    pub requests: RefCell<Vec<Request>>,
    disk: RefCell<Vec<u8>>,
}

impl FakeDevice {
    pub fn new(sectors: usize) -> Rc<Self> {
        Rc::new(Self {
            magic: Cell::new(MAGIC),
            version: Cell::new(MODERN_VERSION),
            device_id: Cell::new(DEVICE_ID_BLOCK),
            device_features: Cell::new(VIRTIO_F_VERSION_1 | VIRTIO_BLK_F_FLUSH),
            accept_features: Cell::new(true),
            queue_num_max: Cell::new(256),
            stall: Cell::new(false),
            reply_status: Cell::new(0),
            status: Cell::new(0),
            features_sel: Cell::new(0),
            driver_features_sel: Cell::new(0),
            driver_features: Cell::new(0),
            queue_num: Cell::new(0),
            queue_ready: Cell::new(0),
            desc: Cell::new(0),
            avail: Cell::new(0),
            used: Cell::new(0),
            seen_avail: Cell::new(0),
            notifies: Cell::new(0),
            requests: RefCell::new(Vec::new()),
            disk: RefCell::new(vec![0u8; sectors * SECTOR]),
        })
    }

    pub fn status(&self) -> u32 {
        self.status.get()
    }

    pub fn driver_features(&self) -> u64 {
        self.driver_features.get()
    }

    pub fn queue_num(&self) -> u32 {
        self.queue_num.get()
    }

    pub fn queue_ready(&self) -> u32 {
        self.queue_ready.get()
    }

    pub fn sector(&self, n: usize) -> Vec<u8> {
        self.disk.borrow()[n * SECTOR..(n + 1) * SECTOR].to_vec()
    }

    pub fn fill_sector(&self, n: usize, byte: u8) {
        self.disk.borrow_mut()[n * SECTOR..(n + 1) * SECTOR].fill(byte);
    }

    fn capacity(&self) -> u64 {
        (self.disk.borrow().len() / SECTOR) as u64
    }

    fn reset(&self) {
        self.status.set(0);
        self.queue_ready.set(0);
        self.seen_avail.set(0);
    }

    fn process(&self) {
        if self.stall.get() || self.queue_ready.get() != 1 {
            return;
        }
        let size = self.queue_num.get() as u16;
        let avail = self.avail.get() as usize;
        let used = self.used.get() as usize;

        let avail_idx = unsafe { read16(avail + 2) };
        while self.seen_avail.get() != avail_idx {
            let slot = (self.seen_avail.get() % size) as usize;
            let head = unsafe { read16(avail + 4 + 2 * slot) };
            let chain = self.chain(head);
            let written = self.serve(&chain);

            unsafe {
                let used_idx = read16(used + 2);
                let at = used + 4 + 8 * (used_idx % size) as usize;
                ptr::write_volatile(at as *mut u32, head as u32);
                ptr::write_volatile((at + 4) as *mut u32, written);
                ptr::write_volatile((used + 2) as *mut u16, used_idx.wrapping_add(1));
            }
            self.seen_avail.set(self.seen_avail.get().wrapping_add(1));
        }
    }

    /// (addr, len, flags) of every descriptor in the chain
    fn chain(&self, head: u16) -> Vec<(usize, u32, u16)> {
        let desc = self.desc.get() as usize;
        let mut out = Vec::new();
        let mut index = head;
        loop {
            let at = desc + 16 * index as usize;
            let (addr, len, flags, next) = unsafe {
                (
                    ptr::read_volatile(at as *const u64) as usize,
                    ptr::read_volatile((at + 8) as *const u32),
                    ptr::read_volatile((at + 12) as *const u16),
                    ptr::read_volatile((at + 14) as *const u16),
                )
            };
            out.push((addr, len, flags));
            if flags & 1 == 0 || out.len() > 16 {
                break;
            }
            index = next;
        }
        out
    }

    /// Execute one request, returning bytes written into guest memory.
    fn serve(&self, chain: &[(usize, u32, u16)]) -> u32 {
        let (header, _, _) = chain[0];
        let (status_addr, _, _) = chain[chain.len() - 1];
        let (req_type, sector) = unsafe {
            (
                ptr::read_volatile(header as *const u32),
                ptr::read_volatile((header + 8) as *const u64),
            )
        };
        let data = if chain.len() == 3 { Some(chain[1]) } else { None };

        self.requests.borrow_mut().push(Request {
            req_type,
            sector,
            data_len: data.map_or(0, |d| d.1),
            descriptors: chain.len(),
            data_writable: data.map_or(false, |d| d.2 & 2 != 0),
        });

        let mut status = self.reply_status.get();
        let mut written = 1;
        if status == 0 {
            let mut disk = self.disk.borrow_mut();
            match (req_type, data) {
                (0, Some((addr, len, _))) | (1, Some((addr, len, _))) => {
                    let start = sector as usize * SECTOR;
                    let end = start + len as usize;
                    if end > disk.len() {
                        status = 1;
                    } else if req_type == 0 {
                        unsafe {
                            ptr::copy_nonoverlapping(disk[start..end].as_ptr(), addr as *mut u8, len as usize)
                        };
                        written += len;
                    } else {
                        unsafe {
                            ptr::copy_nonoverlapping(addr as *const u8, disk[start..end].as_mut_ptr(), len as usize)
                        };
                    }
                }
                (4, None) => {}
                _ => status = 2,
            }
        }
        unsafe { ptr::write_volatile(status_addr as *mut u8, status) };
        written
    }
}

unsafe fn read16(addr: usize) -> u16 {
    ptr::read_volatile(addr as *const u16)
}

fn set_low(cell: &Cell<u64>, value: u32) {
    cell.set((cell.get() & !0xFFFF_FFFF) | value as u64);
}

fn set_high(cell: &Cell<u64>, value: u32) {
    cell.set((cell.get() & 0xFFFF_FFFF) | ((value as u64) << 32));
}

/// Register window handed to the driver; the test keeps the other `Rc`.
pub struct FakeRegs(pub Rc<FakeDevice>);

impl RegisterFile for FakeRegs {
    fn read32(&self, offset: usize) -> u32 {
        let dev = &self.0;
        match offset {
            MAGIC_VALUE => dev.magic.get(),
            VERSION => dev.version.get(),
            DEVICE_ID => dev.device_id.get(),
            DEVICE_FEATURES => (dev.device_features.get() >> (32 * dev.features_sel.get())) as u32,
            QUEUE_NUM_MAX => dev.queue_num_max.get(),
            QUEUE_READY => dev.queue_ready.get(),
            STATUS => dev.status.get(),
            CONFIG => dev.capacity() as u32,
            o if o == CONFIG + 4 => (dev.capacity() >> 32) as u32,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let dev = &self.0;
        match offset {
            DEVICE_FEATURES_SEL => dev.features_sel.set(value.min(1)),
            DRIVER_FEATURES_SEL => dev.driver_features_sel.set(value.min(1)),
            DRIVER_FEATURES => {
                if dev.driver_features_sel.get() == 0 {
                    set_low(&dev.driver_features, value);
                } else {
                    set_high(&dev.driver_features, value);
                }
            }
            QUEUE_NUM => dev.queue_num.set(value),
            QUEUE_READY => dev.queue_ready.set(value),
            QUEUE_DESC_LOW => set_low(&dev.desc, value),
            QUEUE_DESC_HIGH => set_high(&dev.desc, value),
            QUEUE_DRIVER_LOW => set_low(&dev.avail, value),
            QUEUE_DRIVER_HIGH => set_high(&dev.avail, value),
            QUEUE_DEVICE_LOW => set_low(&dev.used, value),
            QUEUE_DEVICE_HIGH => set_high(&dev.used, value),
            QUEUE_NOTIFY => {
                dev.notifies.set(dev.notifies.get() + 1);
                dev.process();
            }
            STATUS => {
                if value == 0 {
                    dev.reset();
                } else if value & STATUS_FEATURES_OK != 0 && !dev.accept_features.get() {
                    dev.status.set(value & !STATUS_FEATURES_OK);
                } else {
                    dev.status.set(value);
                }
            }
            _ => {}
        }
    }
}
