// Partition information and type mapping

use alloc::string::String;
use gpt_disk_types::{guid, Guid};

const LINUX_FILESYSTEM: Guid = guid!("0fc63daf-8483-4772-8e79-3d69d8477de4");
const LINUX_SWAP: Guid = guid!("0657fd6d-a4ab-43c4-84e5-0933c84b4f4f");

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    EfiSystem,
    LinuxFilesystem,
    LinuxSwap,
    BasicData,
}

impl PartitionKind {
    /// On-disk partition type GUID
    pub fn type_guid(&self) -> Guid {
        use gpt_disk_types::GptPartitionType as GptType;

        match self {
            PartitionKind::EfiSystem => GptType::EFI_SYSTEM.0,
            PartitionKind::BasicData => GptType::BASIC_DATA.0,
            PartitionKind::LinuxFilesystem => LINUX_FILESYSTEM,
            PartitionKind::LinuxSwap => LINUX_SWAP,
        }
    }

    pub fn from_type_guid(guid: &Guid) -> Option<Self> {
        [
            PartitionKind::EfiSystem,
            PartitionKind::LinuxFilesystem,
            PartitionKind::LinuxSwap,
            PartitionKind::BasicData,
        ]
        .into_iter()
        .find(|kind| kind.type_guid() == *guid)
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            PartitionKind::EfiSystem => "EFI System",
            PartitionKind::LinuxFilesystem => "Linux FS",
            PartitionKind::LinuxSwap => "Linux Swap",
            PartitionKind::BasicData => "Basic Data",
        }
    }
}

/// A used slot of a partition table as read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub index: u32,
    pub kind: Option<PartitionKind>,
    pub type_guid: Guid,
    pub unique_guid: Guid,
    pub first_lba: u64,
    /// Inclusive
    pub last_lba: u64,
    pub name: String,
}

impl PartitionInfo {
    pub fn num_blocks(&self) -> u64 {
        self.last_lba - self.first_lba + 1
    }

    pub fn size_bytes(&self, block_size: u32) -> u64 {
        self.num_blocks() * block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_guid_round_trip() {
        for kind in [
            PartitionKind::EfiSystem,
            PartitionKind::LinuxFilesystem,
            PartitionKind::LinuxSwap,
            PartitionKind::BasicData,
        ] {
            assert_eq!(PartitionKind::from_type_guid(&kind.type_guid()), Some(kind));
        }
    }

    #[test]
    fn test_esp_on_disk_bytes() {
        // c12a7328-f81f-11d2-ba4b-00a0c93ec93b, mixed-endian
        let bytes = PartitionKind::EfiSystem.type_guid().to_bytes();
        assert_eq!(&bytes[..4], &[0x28, 0x73, 0x2a, 0xc1]);
        assert_eq!(&bytes[8..], &[0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9, 0x3b]);
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(PartitionKind::from_type_guid(&Guid::ZERO), None);
    }
}
