//! VirtIO block device driver.
//!
//! # Architecture
//!
//! VirtIO-blk uses a single virtqueue for all I/O operations.
//! Each request is a descriptor chain:
//!   1. Request header (16 bytes): type, reserved, sector
//!   2. Data buffer: read/write data (absent for flush)
//!   3. Status byte: completion status
//!
//! Exactly one request is in flight. The queue lock is held from submit
//! until the used ring shows the completion, which is found by polling.
//! Header, status byte and data live in one scratch [`DmaBuffer`] per
//! request, freed on every return path.

use crate::mmio::{DmaBuffer, RegisterFile};
use crate::queue::{Descriptor, Virtqueue, DESC_F_NEXT, DESC_F_WRITE, QUEUE_CAP};
use crate::regs::*;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use provision_core::block::check_io_args;
use provision_core::time::Clock;
use provision_core::{log_debug, log_error, log_info, log_warn};
use provision_core::{BlockDevice, DiskError, Result};
use spin::Mutex;

/// virtio-blk always addresses 512-byte sectors
pub const SECTOR_SIZE: u32 = 512;

/// Larger transfers are split into several requests
pub const MAX_SECTORS_PER_REQUEST: u32 = 128;
const REQUEST_BYTES: usize = (MAX_SECTORS_PER_REQUEST * SECTOR_SIZE) as usize;

const RESET_SPIN_LIMIT: u32 = 1_000_000;

/// Required features
const REQUIRED_FEATURES: u64 = VIRTIO_F_VERSION_1;

/// Desired features
const DESIRED_FEATURES: u64 = VIRTIO_BLK_F_FLUSH | VIRTIO_BLK_F_RO;

// ═══════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// VirtIO-blk request header (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VirtioBlkReqHeader {
    /// Request type: 0=read, 1=write, 4=flush
    pub req_type: u32,
    /// Reserved
    pub reserved: u32,
    /// Starting sector
    pub sector: u64,
}

impl VirtioBlkReqHeader {
    pub const TYPE_IN: u32 = 0; // Read
    pub const TYPE_OUT: u32 = 1; // Write
    pub const TYPE_FLUSH: u32 = 4;

    pub const SIZE: usize = 16;

    fn store(&self, buf: &mut DmaBuffer, at: usize) {
        buf.write_u32(at, self.req_type);
        buf.write_u32(at + 4, self.reserved);
        buf.write_u64(at + 8, self.sector);
    }
}

/// Status codes
pub const VIRTIO_BLK_S_OK: u8 = 0;
pub const VIRTIO_BLK_S_IOERR: u8 = 1;
pub const VIRTIO_BLK_S_UNSUPP: u8 = 2;

/// Written before submission so a device that never answers is visible
const STATUS_PENDING: u8 = 0xFF;

// Scratch buffer layout
const HEADER_OFFSET: usize = 0;
const STATUS_OFFSET: usize = 16;
const DATA_OFFSET: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// VirtIO-blk driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtioBlkConfig {
    /// Upper bound on the queue size, further capped at [`QUEUE_CAP`]
    pub queue_cap: u16,
    /// Used-ring polls before a request is declared lost
    pub poll_limit: u32,
    /// Optional wall-clock bound on top of `poll_limit`
    pub timeout_ms: Option<u64>,
}

impl Default for VirtioBlkConfig {
    fn default() -> Self {
        Self {
            queue_cap: QUEUE_CAP,
            poll_limit: 10_000,
            timeout_ms: None,
        }
    }
}

/// Initialization errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtioBlkInitError {
    /// No virtio magic at this address
    NotVirtio,
    /// Legacy or unknown transport revision
    UnsupportedVersion(u32),
    /// A virtio device, but not a block device
    WrongDeviceType(u32),
    /// Device reset failed
    ResetFailed,
    /// Feature negotiation failed
    FeatureNegotiationFailed,
    /// Queue setup failed
    QueueSetupFailed,
    /// Ring memory could not be allocated
    OutOfMemory,
}

impl VirtioBlkInitError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VirtioBlkInitError::NotVirtio => "no virtio device",
            VirtioBlkInitError::UnsupportedVersion(_) => "unsupported transport version",
            VirtioBlkInitError::WrongDeviceType(_) => "not a block device",
            VirtioBlkInitError::ResetFailed => "device reset failed",
            VirtioBlkInitError::FeatureNegotiationFailed => "feature negotiation failed",
            VirtioBlkInitError::QueueSetupFailed => "queue setup failed",
            VirtioBlkInitError::OutOfMemory => "out of memory for rings",
        }
    }
}

impl fmt::Display for VirtioBlkInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtioBlkInitError::UnsupportedVersion(v) | VirtioBlkInitError::WrongDeviceType(v) => {
                write!(f, "{} ({})", self.as_str(), v)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

impl From<VirtioBlkInitError> for DiskError {
    fn from(err: VirtioBlkInitError) -> Self {
        match err {
            VirtioBlkInitError::NotVirtio
            | VirtioBlkInitError::UnsupportedVersion(_)
            | VirtioBlkInitError::WrongDeviceType(_) => DiskError::NotFound,
            VirtioBlkInitError::OutOfMemory => DiskError::OutOfSpace,
            VirtioBlkInitError::ResetFailed
            | VirtioBlkInitError::FeatureNegotiationFailed
            | VirtioBlkInitError::QueueSetupFailed => DiskError::IoError,
        }
    }
}

/// Check the identification registers without touching device state.
pub fn identify<R: RegisterFile + ?Sized>(regs: &R) -> core::result::Result<(), VirtioBlkInitError> {
    if regs.read32(MAGIC_VALUE) != MAGIC {
        return Err(VirtioBlkInitError::NotVirtio);
    }
    let version = regs.read32(VERSION);
    if version != MODERN_VERSION {
        return Err(VirtioBlkInitError::UnsupportedVersion(version));
    }
    let device_id = regs.read32(DEVICE_ID);
    if device_id != DEVICE_ID_BLOCK {
        return Err(VirtioBlkInitError::WrongDeviceType(device_id));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// DRIVER
// ═══════════════════════════════════════════════════════════════════════════

struct QueueState {
    vq: Virtqueue,
    /// Set after a lost request; the device has been reset and the queue
    /// is unusable
    broken: bool,
}

enum Payload<'a> {
    None,
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Payload<'_> {
    fn len(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Read(buf) => buf.len(),
            Payload::Write(buf) => buf.len(),
        }
    }
}

/// VirtIO block device driver.
pub struct VirtioBlk<R: RegisterFile> {
    name: String,
    regs: R,
    clock: Arc<dyn Clock>,
    config: VirtioBlkConfig,
    /// Negotiated features
    features: u64,
    /// Capacity in 512-byte sectors
    capacity: u64,
    queue: Mutex<QueueState>,
}

impl<R: RegisterFile> VirtioBlk<R> {
    /// Bring the device from reset to DRIVER_OK and read its capacity.
    pub fn new(
        name: &str,
        regs: R,
        clock: Arc<dyn Clock>,
        config: VirtioBlkConfig,
    ) -> core::result::Result<Self, VirtioBlkInitError> {
        identify(&regs)?;

        // ═══════════════════════════════════════════════════════════════════
        // STEP 1: Reset device
        // ═══════════════════════════════════════════════════════════════════
        regs.write32(STATUS, 0);

        // Wait for reset (simple spin - bounded)
        let mut reset = false;
        for _ in 0..RESET_SPIN_LIMIT {
            if regs.read32(STATUS) == 0 {
                reset = true;
                break;
            }
            core::hint::spin_loop();
        }
        if !reset {
            return Err(VirtioBlkInitError::ResetFailed);
        }

        // ═══════════════════════════════════════════════════════════════════
        // STEP 2: Set ACKNOWLEDGE
        // ═══════════════════════════════════════════════════════════════════
        let mut status = STATUS_ACKNOWLEDGE;
        regs.write32(STATUS, status);

        // ═══════════════════════════════════════════════════════════════════
        // STEP 3: Set DRIVER
        // ═══════════════════════════════════════════════════════════════════
        status |= STATUS_DRIVER;
        regs.write32(STATUS, status);

        // ═══════════════════════════════════════════════════════════════════
        // STEP 4: Feature negotiation
        // ═══════════════════════════════════════════════════════════════════
        let device_features = read_device_features(&regs);
        if device_features & REQUIRED_FEATURES != REQUIRED_FEATURES {
            log_warn!("virtio-blk: {} lacks VIRTIO_F_VERSION_1", name);
            return Err(fail(&regs, VirtioBlkInitError::FeatureNegotiationFailed));
        }
        let features = REQUIRED_FEATURES | (DESIRED_FEATURES & device_features);
        write_driver_features(&regs, features);

        // ═══════════════════════════════════════════════════════════════════
        // STEP 5: Set FEATURES_OK
        // ═══════════════════════════════════════════════════════════════════
        status |= STATUS_FEATURES_OK;
        regs.write32(STATUS, status);

        // Verify features accepted
        if regs.read32(STATUS) & STATUS_FEATURES_OK == 0 {
            log_warn!("virtio-blk: {} refused features {:#x}", name, features);
            return Err(fail(&regs, VirtioBlkInitError::FeatureNegotiationFailed));
        }

        // ═══════════════════════════════════════════════════════════════════
        // STEP 6: Setup virtqueue (queue 0)
        // ═══════════════════════════════════════════════════════════════════
        let vq = setup_queue(&regs, config.queue_cap).map_err(|e| fail(&regs, e))?;

        // ═══════════════════════════════════════════════════════════════════
        // STEP 7: Set DRIVER_OK
        // ═══════════════════════════════════════════════════════════════════
        status |= STATUS_DRIVER_OK;
        regs.write32(STATUS, status);

        // ═══════════════════════════════════════════════════════════════════
        // STEP 8: Read device info
        // ═══════════════════════════════════════════════════════════════════
        let capacity = regs.read32(CONFIG) as u64 | ((regs.read32(CONFIG + 4) as u64) << 32);

        log_info!(
            "virtio-blk: {} ready, {} sectors, queue size {}{}",
            name,
            capacity,
            vq.size(),
            if features & VIRTIO_BLK_F_RO != 0 { ", read-only" } else { "" }
        );

        Ok(Self {
            name: String::from(name),
            regs,
            clock,
            config,
            features,
            capacity,
            queue: Mutex::new(QueueState { vq, broken: false }),
        })
    }

    pub fn features(&self) -> u64 {
        self.features
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    pub fn queue_size(&self) -> u16 {
        self.queue.lock().vq.size()
    }

    pub fn is_read_only(&self) -> bool {
        self.features & VIRTIO_BLK_F_RO != 0
    }

    /// Transfer `count` sectors starting at `sector`, in requests of at most
    /// [`MAX_SECTORS_PER_REQUEST`].
    pub fn rw(&self, sector: u64, count: u32, buf: &mut [u8], is_write: bool) -> Result<()> {
        if is_write {
            self.write_sectors(sector, count, buf)
        } else {
            self.read_sectors(sector, count, buf)
        }
    }

    fn read_sectors(&self, sector: u64, count: u32, buf: &mut [u8]) -> Result<()> {
        check_io_args(self, sector, buf.len(), count)?;
        for (i, chunk) in buf.chunks_mut(REQUEST_BYTES).enumerate() {
            let at = sector + (i as u64) * MAX_SECTORS_PER_REQUEST as u64;
            self.request(VirtioBlkReqHeader::TYPE_IN, at, Payload::Read(chunk))?;
        }
        Ok(())
    }

    fn write_sectors(&self, sector: u64, count: u32, data: &[u8]) -> Result<()> {
        check_io_args(self, sector, data.len(), count)?;
        if self.is_read_only() {
            log_warn!("virtio-blk: {} is read-only", self.name);
            return Err(DiskError::InvalidArgument);
        }
        for (i, chunk) in data.chunks(REQUEST_BYTES).enumerate() {
            let at = sector + (i as u64) * MAX_SECTORS_PER_REQUEST as u64;
            self.request(VirtioBlkReqHeader::TYPE_OUT, at, Payload::Write(chunk))?;
        }
        Ok(())
    }

    fn request(&self, req_type: u32, sector: u64, payload: Payload<'_>) -> Result<()> {
        let data_len = payload.len();
        let mut scratch = DmaBuffer::new(DATA_OFFSET + data_len)?;
        VirtioBlkReqHeader {
            req_type,
            reserved: 0,
            sector,
        }
        .store(&mut scratch, HEADER_OFFSET);
        scratch.write_u8(STATUS_OFFSET, STATUS_PENDING);
        if let Payload::Write(data) = &payload {
            scratch.write_bytes(DATA_OFFSET, data);
        }

        let mut state = self.queue.lock();
        if state.broken {
            return Err(DiskError::IoError);
        }

        let base = scratch.phys_addr();
        let mut status_index = 1;
        state.vq.set_descriptor(
            0,
            Descriptor {
                addr: base + HEADER_OFFSET as u64,
                len: VirtioBlkReqHeader::SIZE as u32,
                flags: DESC_F_NEXT,
                next: 1,
            },
        )?;
        if data_len > 0 {
            // The device writes into the buffer only for reads
            let flags = match &payload {
                Payload::Read(_) => DESC_F_NEXT | DESC_F_WRITE,
                _ => DESC_F_NEXT,
            };
            state.vq.set_descriptor(
                1,
                Descriptor {
                    addr: base + DATA_OFFSET as u64,
                    len: data_len as u32,
                    flags,
                    next: 2,
                },
            )?;
            status_index = 2;
        }
        state.vq.set_descriptor(
            status_index,
            Descriptor {
                addr: base + STATUS_OFFSET as u64,
                len: 1,
                flags: DESC_F_WRITE,
                next: 0,
            },
        )?;

        state.vq.submit(0);
        self.regs.write32(QUEUE_NOTIFY, 0);

        if let Err(err) = self.wait(&mut state.vq) {
            log_error!(
                "virtio-blk: {} request type {} at sector {} lost, resetting device",
                self.name,
                req_type,
                sector
            );
            // A reset device no longer touches the rings or `scratch`
            self.regs.write32(STATUS, 0);
            state.broken = true;
            return Err(err);
        }
        drop(state);

        match scratch.read_u8(STATUS_OFFSET) {
            VIRTIO_BLK_S_OK => {}
            status => {
                log_warn!(
                    "virtio-blk: {} request type {} at sector {} failed, status {}",
                    self.name,
                    req_type,
                    sector,
                    status
                );
                return Err(DiskError::IoError);
            }
        }

        if let Payload::Read(buf) = payload {
            scratch.read_bytes(DATA_OFFSET, buf);
        }
        Ok(())
    }

    /// Poll the used ring until the outstanding request completes.
    fn wait(&self, vq: &mut Virtqueue) -> Result<()> {
        let deadline = self
            .config
            .timeout_ms
            .map(|ms| self.clock.now_ms().saturating_add(ms));

        for _ in 0..self.config.poll_limit {
            if let Some(used) = vq.pop_used() {
                if used.id != 0 {
                    log_warn!("virtio-blk: {} completed unknown chain {}", self.name, used.id);
                    return Err(DiskError::IoError);
                }
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if self.clock.now_ms() >= deadline {
                    break;
                }
            }
            core::hint::spin_loop();
        }
        Err(DiskError::Timeout)
    }
}

impl<R: RegisterFile> BlockDevice for VirtioBlk<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.capacity.saturating_mul(SECTOR_SIZE as u64)
    }

    fn block_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn read(&self, lba: u64, buf: &mut [u8], count: u32) -> Result<()> {
        self.read_sectors(lba, count, buf)
    }

    fn write(&self, lba: u64, buf: &[u8], count: u32) -> Result<()> {
        self.write_sectors(lba, count, buf)
    }

    fn flush(&self) -> Result<()> {
        if self.features & VIRTIO_BLK_F_FLUSH == 0 {
            log_debug!("virtio-blk: {} has no flush, skipping", self.name);
            return Ok(());
        }
        self.request(VirtioBlkReqHeader::TYPE_FLUSH, 0, Payload::None)
    }
}

impl<R: RegisterFile> Drop for VirtioBlk<R> {
    fn drop(&mut self) {
        // Stop the device before the rings are freed
        self.regs.write32(STATUS, 0);
    }
}

fn fail<R: RegisterFile + ?Sized>(regs: &R, err: VirtioBlkInitError) -> VirtioBlkInitError {
    let status = regs.read32(STATUS);
    regs.write32(STATUS, status | STATUS_FAILED);
    err
}

fn read_device_features<R: RegisterFile + ?Sized>(regs: &R) -> u64 {
    regs.write32(DEVICE_FEATURES_SEL, 0);
    let low = regs.read32(DEVICE_FEATURES) as u64;
    regs.write32(DEVICE_FEATURES_SEL, 1);
    let high = regs.read32(DEVICE_FEATURES) as u64;
    low | (high << 32)
}

fn write_driver_features<R: RegisterFile + ?Sized>(regs: &R, features: u64) {
    regs.write32(DRIVER_FEATURES_SEL, 0);
    regs.write32(DRIVER_FEATURES, features as u32);
    regs.write32(DRIVER_FEATURES_SEL, 1);
    regs.write32(DRIVER_FEATURES, (features >> 32) as u32);
}

fn write_addr<R: RegisterFile + ?Sized>(regs: &R, low: usize, high: usize, addr: u64) {
    regs.write32(low, addr as u32);
    regs.write32(high, (addr >> 32) as u32);
}

fn setup_queue<R: RegisterFile + ?Sized>(
    regs: &R,
    cap: u16,
) -> core::result::Result<Virtqueue, VirtioBlkInitError> {
    regs.write32(QUEUE_SEL, 0);
    if regs.read32(QUEUE_READY) != 0 {
        return Err(VirtioBlkInitError::QueueSetupFailed);
    }

    let max = regs.read32(QUEUE_NUM_MAX);
    let size = max.min(cap.min(QUEUE_CAP) as u32) as u16;
    // Header, data and status need three descriptors
    if size < 3 {
        log_warn!("virtio-blk: queue too small ({} entries)", max);
        return Err(VirtioBlkInitError::QueueSetupFailed);
    }

    let vq = Virtqueue::new(size).map_err(|_| VirtioBlkInitError::OutOfMemory)?;
    regs.write32(QUEUE_NUM, size as u32);
    write_addr(regs, QUEUE_DESC_LOW, QUEUE_DESC_HIGH, vq.desc_addr());
    write_addr(regs, QUEUE_DRIVER_LOW, QUEUE_DRIVER_HIGH, vq.avail_addr());
    write_addr(regs, QUEUE_DEVICE_LOW, QUEUE_DEVICE_HIGH, vq.used_addr());
    regs.write32(QUEUE_READY, 1);

    if regs.read32(QUEUE_READY) != 1 {
        return Err(VirtioBlkInitError::QueueSetupFailed);
    }
    Ok(vq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VirtioBlkConfig::default();
        assert_eq!(config.queue_cap, 128);
        assert_eq!(config.poll_limit, 10_000);
        assert_eq!(config.timeout_ms, None);
    }

    #[test]
    fn test_init_error_mapping() {
        assert_eq!(DiskError::from(VirtioBlkInitError::NotVirtio), DiskError::NotFound);
        assert_eq!(
            DiskError::from(VirtioBlkInitError::QueueSetupFailed),
            DiskError::IoError
        );
        assert_eq!(
            DiskError::from(VirtioBlkInitError::OutOfMemory),
            DiskError::OutOfSpace
        );
    }

    #[test]
    fn test_init_error_display() {
        let text = alloc::format!("{}", VirtioBlkInitError::UnsupportedVersion(1));
        assert_eq!(text, "unsupported transport version (1)");
    }
}
