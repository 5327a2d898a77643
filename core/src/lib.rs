//! Provisioning Core Library
//!
//! Disk provisioning for the installer: block device contract and registry,
//! GPT partitioning, EXT4 and FAT32 formatting, and the recursive file copy
//! engine. Designed to be no_std compatible (requires `alloc`).

#![cfg_attr(not(test), no_std)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::new_without_default)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

pub mod logger;

pub mod block;
pub mod copy;
pub mod crc32;
pub mod disk;
pub mod error;
pub mod fs;
pub mod time;

pub use block::{BlockDevice, DeviceHandle, DeviceRegistry};
pub use error::{DiskError, Result};
