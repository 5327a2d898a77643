// Filesystem formatters and the FAT32 write path

pub mod ext4_mkfs;
pub mod fat32_format;
pub mod fat32_ops;

pub use ext4_mkfs::{mkfs as ext4_mkfs, Ext4Options};
pub use fat32_format::{format_esp, format_fat32, verify_fat32, Fat32Layout, Fat32Options};
pub use fat32_ops::{create_directory, file_exists, list_directory, read_file, write_file};
