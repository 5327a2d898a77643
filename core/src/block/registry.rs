// Device registry
//
// Owned by the composition root and passed by reference. Newest device
// first, matching the order drivers announce themselves.

use super::{BlockDevice, DeviceHandle};
use crate::error::{DiskError, Result};
use crate::log_info;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

pub struct DeviceRegistry {
    devices: VecDeque<DeviceHandle>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: VecDeque::new(),
        }
    }

    /// Register a device, returning the handle callers should keep.
    pub fn register<D: BlockDevice + 'static>(&mut self, dev: D) -> Result<DeviceHandle> {
        let handle: DeviceHandle = Arc::new(dev);
        self.register_handle(handle.clone())?;
        Ok(handle)
    }

    pub fn register_handle(&mut self, dev: DeviceHandle) -> Result<()> {
        if dev.name().is_empty() {
            return Err(DiskError::InvalidArgument);
        }
        let block_size = dev.block_size();
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(DiskError::InvalidArgument);
        }

        log_info!(
            "block: registered {} ({} bytes, {}-byte blocks)",
            dev.name(),
            dev.size_bytes(),
            block_size
        );
        self.devices.push_front(dev);
        Ok(())
    }

    /// Most recently registered device, if any.
    pub fn first(&self) -> Option<DeviceHandle> {
        self.devices.front().cloned()
    }

    pub fn enumerate(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.iter()
    }

    pub fn find(&self, name: &str) -> Result<DeviceHandle> {
        self.devices
            .iter()
            .find(|dev| dev.name() == name)
            .cloned()
            .ok_or(DiskError::NotFound)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    struct NullDevice {
        name: String,
        block_size: u32,
    }

    impl NullDevice {
        fn new(name: &str, block_size: u32) -> Self {
            Self {
                name: String::from(name),
                block_size,
            }
        }
    }

    impl BlockDevice for NullDevice {
        fn name(&self) -> &str {
            &self.name
        }
        fn size_bytes(&self) -> u64 {
            self.block_size as u64 * 16
        }
        fn block_size(&self) -> u32 {
            self.block_size
        }
        fn read(&self, _lba: u64, _buf: &mut [u8], _count: u32) -> Result<()> {
            Ok(())
        }
        fn write(&self, _lba: u64, _buf: &[u8], _count: u32) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let mut registry = DeviceRegistry::new();
        let result = registry.register(NullDevice::new("", 512));
        assert_eq!(result.err(), Some(DiskError::InvalidArgument));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_bad_block_size() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.register(NullDevice::new("vda", 0)).is_err());
        assert!(registry.register(NullDevice::new("vda", 520)).is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_newest_first() {
        let mut registry = DeviceRegistry::new();
        registry.register(NullDevice::new("vda", 512)).unwrap();
        registry.register(NullDevice::new("vdb", 512)).unwrap();

        let names: Vec<_> = registry.enumerate().map(|d| String::from(d.name())).collect();
        assert_eq!(names, ["vdb", "vda"]);
        assert_eq!(registry.first().unwrap().name(), "vdb");
    }

    #[test]
    fn test_find() {
        let mut registry = DeviceRegistry::new();
        registry.register(NullDevice::new("vda", 4096)).unwrap();

        assert_eq!(registry.find("vda").unwrap().block_size(), 4096);
        assert_eq!(registry.find("sda").err(), Some(DiskError::NotFound));
    }
}
