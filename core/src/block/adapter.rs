// gpt_disk_io bridge
//
// Lets `gpt_disk_io::Disk` and the FAT32 code, both written against
// `BlockIo`, run on any registered device.

use super::BlockDevice;
use crate::error::DiskError;
use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};

pub struct BlockIoAdapter<'a> {
    dev: &'a dyn BlockDevice,
}

impl<'a> BlockIoAdapter<'a> {
    pub fn new(dev: &'a dyn BlockDevice) -> Self {
        Self { dev }
    }

    pub fn device(&self) -> &'a dyn BlockDevice {
        self.dev
    }

    fn block_count(&self, len: usize) -> Result<u32, DiskError> {
        let block_size = self.dev.block_size() as usize;
        if block_size == 0 || len % block_size != 0 {
            return Err(DiskError::InvalidArgument);
        }
        u32::try_from(len / block_size).map_err(|_| DiskError::InvalidArgument)
    }
}

impl BlockIo for BlockIoAdapter<'_> {
    type Error = DiskError;

    fn block_size(&self) -> BlockSize {
        // Registration guarantees a power of two; 512 covers the rest.
        BlockSize::new(self.dev.block_size()).unwrap_or(BlockSize::BS_512)
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok(self.dev.total_blocks())
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        let count = self.block_count(dst.len())?;
        if count == 0 {
            return Ok(());
        }
        self.dev.read(start_lba.0, dst, count)
    }

    fn write_blocks(&mut self, start_lba: Lba, src: &[u8]) -> Result<(), Self::Error> {
        let count = self.block_count(src.len())?;
        if count == 0 {
            return Ok(());
        }
        self.dev.write(start_lba.0, src, count)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.dev.flush()
    }
}
