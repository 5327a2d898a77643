// Boot files on the ESP
//
// The kernel image goes to the removable-media path firmware probes
// (`/EFI/BOOT/BOOT<arch>.EFI`) next to a GRUB menu pointing at the root
// partition.

use crate::plan::InstallPlan;
use alloc::format;
use alloc::string::String;
use provision_core::block::BlockIoAdapter;
use provision_core::fs::{create_directory, write_file};
use provision_core::{log_info, BlockDevice, Result};

pub const BOOT_DIR: &str = "/EFI/BOOT";
pub const GRUB_CONFIG_PATH: &str = "/EFI/BOOT/GRUB.CFG";

pub fn grub_config(kernel_path: &str, root_device: &str) -> String {
    format!(
        "set timeout=3\nmenuentry \"vib-OS\" {{\n    linux {} root={} console=tty0\n}}\n",
        kernel_path, root_device
    )
}

/// Write the kernel and boot menu onto a freshly formatted ESP.
pub fn install_bootloader(
    dev: &dyn BlockDevice,
    esp_lba_start: u64,
    plan: &InstallPlan,
    kernel_image: &[u8],
) -> Result<()> {
    let mut io = BlockIoAdapter::new(dev);
    let boot_file = plan.boot_file_path();

    create_directory(&mut io, esp_lba_start, BOOT_DIR)?;
    write_file(&mut io, esp_lba_start, &boot_file, kernel_image)?;

    let config = grub_config(&plan.kernel_path(), &plan.kernel_cmdline_root);
    write_file(&mut io, esp_lba_start, GRUB_CONFIG_PATH, config.as_bytes())?;

    log_info!(
        "bootloader: {} ({} bytes) and {} installed",
        boot_file,
        kernel_image.len(),
        GRUB_CONFIG_PATH
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grub_config_text() {
        assert_eq!(
            grub_config("/EFI/BOOT/BOOTX64.EFI", "/dev/vda2"),
            "set timeout=3\n\
             menuentry \"vib-OS\" {\n    \
             linux /EFI/BOOT/BOOTX64.EFI root=/dev/vda2 console=tty0\n\
             }\n"
        );
    }
}
