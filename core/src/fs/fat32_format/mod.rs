mod format;
mod verify;

pub use format::{format_esp, format_fat32, volume_label, Fat32Layout, Fat32Options};
pub(crate) use format::{FAT_EOC, ROOT_CLUSTER};
pub use verify::verify_fat32;
