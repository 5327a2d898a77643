//! Installer pipeline
//!
//! Composition root for disk provisioning: partition the target disk, format
//! both partitions, copy the running system over and install the boot files
//! on the ESP.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bootloader;
pub mod pipeline;
pub mod plan;
pub mod platform;

pub use bootloader::{grub_config, install_bootloader};
pub use pipeline::{InstallProgress, InstallReport, InstallStage, Installer};
pub use plan::{Arch, InstallPlan, PartitionLayout};
