//! End-to-end install onto one registered disk.
//!
//! Stages run strictly in order and the first failure aborts the install.
//! Nothing is rolled back: a failed run leaves whatever was already written.

use crate::bootloader::install_bootloader;
use crate::plan::{InstallPlan, PartitionLayout};
use provision_core::block::BlockIoAdapter;
use provision_core::copy::{copy_filesystem, CopyProgress, FileSystem, ProgressCallback};
use provision_core::disk::{read_table, GptContext, GptTable, GuidSource, PartitionKind};
use provision_core::fs::{ext4_mkfs, format_esp, verify_fat32, Ext4Options, Fat32Layout};
use provision_core::fs::ext4_mkfs::Ext4Geometry;
use provision_core::time::Clock;
use provision_core::{log_error, log_info};
use provision_core::{BlockDevice, DeviceHandle, DeviceRegistry, DiskError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallStage {
    Partitioning,
    FormattingRoot,
    FormattingEsp,
    CopyingFiles,
    InstallingBootloader,
    Complete,
}

impl InstallStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            InstallStage::Partitioning => "Creating partition table",
            InstallStage::FormattingRoot => "Formatting root partition",
            InstallStage::FormattingEsp => "Formatting EFI system partition",
            InstallStage::CopyingFiles => "Copying files",
            InstallStage::InstallingBootloader => "Installing bootloader",
            InstallStage::Complete => "Complete",
        }
    }

    /// Overall percentage when the stage begins
    pub const fn start_percent(&self) -> u8 {
        match self {
            InstallStage::Partitioning => 5,
            InstallStage::FormattingRoot => 20,
            InstallStage::FormattingEsp => 25,
            InstallStage::CopyingFiles => 30,
            InstallStage::InstallingBootloader => 90,
            InstallStage::Complete => 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstallProgress<'a> {
    pub stage: InstallStage,
    pub percent: u8,
    /// Copy counters; zero outside the copy stage
    pub copied_bytes: u64,
    pub total_bytes: u64,
    pub current_file: &'a str,
}

/// What a successful install produced
#[derive(Clone, Debug)]
pub struct InstallReport {
    pub layout: PartitionLayout,
    pub table: GptTable,
    pub root: Ext4Geometry,
    pub esp: Fat32Layout,
    pub copy: CopyProgress,
}

/// File copy occupies 30..=90 of the overall percentage.
pub fn copy_percent(copied: u64, total: u64) -> u8 {
    let pct = if total == 0 {
        100
    } else {
        (copied.saturating_mul(100) / total).min(100)
    };
    30 + (pct * 60 / 100) as u8
}

fn at_stage<T>(stage: InstallStage, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        log_error!("installer: {} failed: {}", stage.as_str(), err);
    }
    result
}

pub struct Installer<'a> {
    plan: InstallPlan,
    clock: &'a dyn Clock,
    guids: &'a dyn GuidSource,
}

impl<'a> Installer<'a> {
    pub fn new(plan: InstallPlan, clock: &'a dyn Clock, guids: &'a dyn GuidSource) -> Self {
        Self { plan, clock, guids }
    }

    pub fn plan(&self) -> &InstallPlan {
        &self.plan
    }

    /// Install onto the registered device `device_name`.
    ///
    /// `fs` is the host filesystem the system tree is copied through;
    /// `kernel_image` becomes the ESP boot file.
    pub fn run<F: FileSystem>(
        &self,
        registry: &DeviceRegistry,
        device_name: &str,
        fs: &mut F,
        kernel_image: &[u8],
        progress: &mut dyn FnMut(&InstallProgress<'_>),
    ) -> Result<InstallReport> {
        let dev = registry.find(device_name)?;
        log_info!(
            "installer: installing onto {} ({} bytes)",
            dev.name(),
            dev.size_bytes()
        );

        let mut report_stage = |stage: InstallStage| {
            progress(&InstallProgress {
                stage,
                percent: stage.start_percent(),
                copied_bytes: 0,
                total_bytes: 0,
                current_file: "",
            });
        };

        // Stage 1: partition table
        report_stage(InstallStage::Partitioning);
        let (layout, table) = at_stage(InstallStage::Partitioning, self.partition(&dev))?;

        // Stage 2: filesystems
        report_stage(InstallStage::FormattingRoot);
        let options = Ext4Options {
            label: &self.plan.root_label,
            reserved_percent: self.plan.ext4_reserved_percent,
        };
        let root = at_stage(
            InstallStage::FormattingRoot,
            ext4_mkfs(&*dev, layout.root_start, layout.root_blocks(), &options, self.clock),
        )?;

        report_stage(InstallStage::FormattingEsp);
        let esp = at_stage(InstallStage::FormattingEsp, self.format_esp(&*dev, &layout))?;

        // Stage 3: system files
        report_stage(InstallStage::CopyingFiles);
        let copy = {
            let on_copy: ProgressCallback<'_> = &mut |copied: u64, total: u64, path: &str| {
                progress(&InstallProgress {
                    stage: InstallStage::CopyingFiles,
                    percent: copy_percent(copied, total),
                    copied_bytes: copied,
                    total_bytes: total,
                    current_file: path,
                });
            };
            at_stage(
                InstallStage::CopyingFiles,
                copy_filesystem(
                    fs,
                    &self.plan.source_root,
                    &self.plan.target_root,
                    &self.plan.copy,
                    Some(on_copy),
                ),
            )?
        };

        // Stage 4: boot files
        let mut report_stage = |stage: InstallStage| {
            progress(&InstallProgress {
                stage,
                percent: stage.start_percent(),
                copied_bytes: copy.copied_bytes,
                total_bytes: copy.total_bytes,
                current_file: "",
            });
        };
        report_stage(InstallStage::InstallingBootloader);
        at_stage(
            InstallStage::InstallingBootloader,
            install_bootloader(&*dev, layout.esp_start, &self.plan, kernel_image)
                .and_then(|()| dev.flush()),
        )?;

        report_stage(InstallStage::Complete);
        log_info!("installer: {} installed", dev.name());

        Ok(InstallReport {
            layout,
            table,
            root,
            esp,
            copy,
        })
    }

    /// Write a fresh GPT with the ESP and root partitions and read it back.
    fn partition(&self, handle: &DeviceHandle) -> Result<(PartitionLayout, GptTable)> {
        let dev: &dyn BlockDevice = &**handle;
        let mut gpt = GptContext::create(handle.clone(), self.guids)?;
        let header = gpt.header();
        let layout = PartitionLayout::compute(
            header.first_usable_lba,
            header.last_usable_lba,
            dev.block_size(),
            self.plan.esp_size_mb,
        )?;

        gpt.add_partition(
            0,
            &self.plan.esp_name,
            layout.esp_start,
            layout.esp_end,
            PartitionKind::EfiSystem.type_guid(),
            self.guids,
        )?;
        gpt.add_partition(
            1,
            &self.plan.root_name,
            layout.root_start,
            layout.root_end,
            PartitionKind::LinuxFilesystem.type_guid(),
            self.guids,
        )?;
        gpt.write()?;

        let table = read_table(dev)?;
        let matches = |index: u32, kind: PartitionKind, start: u64, end: u64| {
            table.partition(index).map_or(false, |p| {
                p.kind == Some(kind) && p.first_lba == start && p.last_lba == end
            })
        };
        if !matches(0, PartitionKind::EfiSystem, layout.esp_start, layout.esp_end)
            || !matches(1, PartitionKind::LinuxFilesystem, layout.root_start, layout.root_end)
        {
            log_error!("installer: partition table on {} did not read back", dev.name());
            return Err(DiskError::IoError);
        }

        Ok((layout, table))
    }

    fn format_esp(&self, dev: &dyn BlockDevice, layout: &PartitionLayout) -> Result<Fat32Layout> {
        let esp = format_esp(dev, layout.esp_start, layout.esp_blocks(), &self.plan.esp_label)?;
        verify_fat32(&mut BlockIoAdapter::new(dev), layout.esp_start)?;
        Ok(esp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_percent_mapping() {
        assert_eq!(copy_percent(0, 1000), 30);
        assert_eq!(copy_percent(500, 1000), 60);
        assert_eq!(copy_percent(1000, 1000), 90);
        assert_eq!(copy_percent(2000, 1000), 90);
        assert_eq!(copy_percent(0, 0), 90);
    }

    #[test]
    fn test_stage_percent_order() {
        let stages = [
            InstallStage::Partitioning,
            InstallStage::FormattingRoot,
            InstallStage::FormattingEsp,
            InstallStage::CopyingFiles,
            InstallStage::InstallingBootloader,
            InstallStage::Complete,
        ];
        assert!(stages
            .windows(2)
            .all(|w| w[0] < w[1] && w[0].start_percent() < w[1].start_percent()));
    }
}
