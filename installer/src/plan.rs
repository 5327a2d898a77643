// What to install where

use alloc::format;
use alloc::string::{String, ToString};
use provision_core::copy::CopyOptions;
use provision_core::{DiskError, Result};

const MIB: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Architecture this crate was built for
    pub const fn native() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else {
            Arch::X86_64
        }
    }

    /// Removable-media boot file name firmware looks for
    pub const fn boot_file(&self) -> &'static str {
        match self {
            Arch::X86_64 => "BOOTX64.EFI",
            Arch::Aarch64 => "BOOTAA64.EFI",
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstallPlan {
    pub esp_size_mb: u64,
    /// GPT partition names
    pub esp_name: String,
    pub root_name: String,
    /// Filesystem labels
    pub root_label: String,
    pub esp_label: String,
    pub source_root: String,
    /// Where the new root filesystem is reachable in the host filesystem
    pub target_root: String,
    pub arch: Arch,
    /// Kernel path for the boot menu entry; the ESP boot file when `None`
    pub kernel_path: Option<String>,
    pub kernel_cmdline_root: String,
    pub ext4_reserved_percent: u8,
    pub copy: CopyOptions,
}

impl Default for InstallPlan {
    fn default() -> Self {
        Self {
            esp_size_mb: 200,
            esp_name: "ESP".to_string(),
            root_name: "vib-os-root".to_string(),
            root_label: "vib-os".to_string(),
            esp_label: "EFI SYSTEM".to_string(),
            source_root: "/".to_string(),
            target_root: "/mnt/target".to_string(),
            arch: Arch::native(),
            kernel_path: None,
            kernel_cmdline_root: "/dev/vda2".to_string(),
            ext4_reserved_percent: 5,
            copy: CopyOptions::default(),
        }
    }
}

impl InstallPlan {
    pub fn boot_file_path(&self) -> String {
        format!("/EFI/BOOT/{}", self.arch.boot_file())
    }

    pub fn kernel_path(&self) -> String {
        self.kernel_path
            .clone()
            .unwrap_or_else(|| self.boot_file_path())
    }
}

/// Two-partition layout: ESP first, root filling the rest of the usable window.
///
/// All bounds are inclusive LBAs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionLayout {
    pub esp_start: u64,
    pub esp_end: u64,
    pub root_start: u64,
    pub root_end: u64,
}

impl PartitionLayout {
    pub fn compute(
        first_usable: u64,
        last_usable: u64,
        block_size: u32,
        esp_size_mb: u64,
    ) -> Result<Self> {
        if block_size == 0 || first_usable > last_usable {
            return Err(DiskError::InvalidArgument);
        }
        let esp_blocks = esp_size_mb
            .checked_mul(MIB)
            .ok_or(DiskError::InvalidArgument)?
            / block_size as u64;
        if esp_blocks == 0 {
            return Err(DiskError::InvalidArgument);
        }

        let esp_end = first_usable + esp_blocks - 1;
        // Root needs at least one block after the ESP
        if esp_end >= last_usable {
            return Err(DiskError::OutOfSpace);
        }

        Ok(Self {
            esp_start: first_usable,
            esp_end,
            root_start: esp_end + 1,
            root_end: last_usable,
        })
    }

    pub fn esp_blocks(&self) -> u64 {
        self.esp_end - self.esp_start + 1
    }

    pub fn root_blocks(&self) -> u64 {
        self.root_end - self.root_start + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan() {
        let plan = InstallPlan {
            arch: Arch::X86_64,
            ..InstallPlan::default()
        };
        assert_eq!(plan.esp_size_mb, 200);
        assert_eq!(plan.kernel_path(), "/EFI/BOOT/BOOTX64.EFI");

        let plan = InstallPlan {
            arch: Arch::Aarch64,
            kernel_path: Some("/boot/vmlinuz".to_string()),
            ..InstallPlan::default()
        };
        assert_eq!(plan.boot_file_path(), "/EFI/BOOT/BOOTAA64.EFI");
        assert_eq!(plan.kernel_path(), "/boot/vmlinuz");
    }

    #[test]
    fn test_layout_default_esp() {
        let layout = PartitionLayout::compute(34, 2_097_118, 512, 200).unwrap();
        assert_eq!(layout.esp_start, 34);
        assert_eq!(layout.esp_blocks(), 409_600);
        assert_eq!(layout.root_start, 34 + 409_600);
        assert_eq!(layout.root_end, 2_097_118);
    }

    #[test]
    fn test_layout_4k_blocks() {
        let layout = PartitionLayout::compute(6, 100_000, 4096, 200).unwrap();
        assert_eq!(layout.esp_blocks(), 51_200);
    }

    #[test]
    fn test_layout_no_room_for_root() {
        assert_eq!(
            PartitionLayout::compute(34, 409_633, 512, 200),
            Err(DiskError::OutOfSpace)
        );
        assert!(PartitionLayout::compute(34, 409_634, 512, 200).is_ok());
    }

    #[test]
    fn test_layout_rejects_empty_esp() {
        assert_eq!(
            PartitionLayout::compute(34, 1000, 512, 0),
            Err(DiskError::InvalidArgument)
        );
    }
}
