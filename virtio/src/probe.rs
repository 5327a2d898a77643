// virtio-mmio discovery
//
// Callers turn a slot table into register windows (the one unsafe step,
// see `SlotTable::regions`) and hand them here.

use crate::blk::{identify, VirtioBlk, VirtioBlkConfig};
use crate::mmio::{RegisterFile, SlotTable};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use provision_core::time::Clock;
use provision_core::{log_debug, log_warn, DeviceRegistry};

/// virtio-mmio transports of QEMU's `virt` machine
pub const QEMU_VIRT_SLOTS: SlotTable = SlotTable {
    base: 0x0a00_0000,
    stride: 0x200,
    count: 8,
};

pub fn is_block_device<R: RegisterFile + ?Sized>(regs: &R) -> bool {
    identify(regs).is_ok()
}

/// Keep the windows that hold a modern virtio block device, in slot order.
pub fn probe<R, I>(regions: I) -> Vec<R>
where
    R: RegisterFile,
    I: IntoIterator<Item = R>,
{
    regions
        .into_iter()
        .enumerate()
        .filter_map(|(slot, regs)| match identify(&regs) {
            Ok(()) => Some(regs),
            Err(err) => {
                log_debug!("virtio: slot {}: {}", slot, err);
                None
            }
        })
        .collect()
}

/// `vda`, `vdb`, ... `vdz`
pub fn device_name(index: usize) -> Option<String> {
    if index >= 26 {
        return None;
    }
    Some(format!("vd{}", (b'a' + index as u8) as char))
}

/// Initialize every block device found and register it.
///
/// Devices that fail to initialize are logged and skipped. Returns how many
/// were registered.
pub fn discover_into<R, I>(
    registry: &mut DeviceRegistry,
    regions: I,
    clock: Arc<dyn Clock>,
    config: VirtioBlkConfig,
) -> usize
where
    R: RegisterFile + 'static,
    I: IntoIterator<Item = R>,
{
    let mut registered = 0;
    for regs in probe(regions) {
        let Some(name) = device_name(registered) else {
            log_warn!("virtio-blk: out of device names, ignoring remaining disks");
            break;
        };
        let dev = match VirtioBlk::new(&name, regs, clock.clone(), config) {
            Ok(dev) => dev,
            Err(err) => {
                log_warn!("virtio-blk: {} init failed: {}", name, err);
                continue;
            }
        };
        match registry.register(dev) {
            Ok(_) => registered += 1,
            Err(err) => log_warn!("virtio-blk: {} not registered: {}", name, err),
        }
    }
    registered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(device_name(0).as_deref(), Some("vda"));
        assert_eq!(device_name(3).as_deref(), Some("vdd"));
        assert_eq!(device_name(25).as_deref(), Some("vdz"));
        assert_eq!(device_name(26), None);
    }

    #[test]
    fn test_qemu_slots() {
        assert_eq!(QEMU_VIRT_SLOTS.base, 0x0a00_0000);
        assert_eq!(QEMU_VIRT_SLOTS.stride, 0x200);
        assert_eq!(QEMU_VIRT_SLOTS.count, 8);
    }
}
