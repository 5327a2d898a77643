// Disk-level operations: partition tables and identifiers

pub mod gpt_ops;
pub mod guid;
pub mod partition;

pub use gpt_ops::{read_table, GptContext, GptEntry, GptHeader, GptTable};
pub use guid::{GuidGenerator, GuidSource};
pub use partition::{PartitionInfo, PartitionKind};
