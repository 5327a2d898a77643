//! VirtIO block transport
//!
//! Drives modern (version 2) virtio-mmio block devices through a single
//! split virtqueue and exposes them as [`provision_core::BlockDevice`]s.
//! All volatile register and device-shared memory access is confined to
//! [`mmio`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod blk;
pub mod mmio;
pub mod probe;
pub mod queue;
pub mod regs;

pub use blk::{VirtioBlk, VirtioBlkConfig, VirtioBlkInitError};
pub use mmio::{DmaBuffer, MmioRegion, RegisterFile, SlotTable};
pub use probe::{discover_into, probe, QEMU_VIRT_SLOTS};
