// Disk discovery on supported machines

use alloc::sync::Arc;
use provision_core::time::Clock;
use provision_core::DeviceRegistry;
use provision_virtio::{discover_into, VirtioBlkConfig, QEMU_VIRT_SLOTS};

/// Register every virtio block disk of a QEMU `virt` machine, returning
/// how many were found.
///
/// # Safety
/// Must run on QEMU `virt` with the virtio-mmio window identity mapped,
/// and nothing else may be driving those devices.
pub unsafe fn discover_qemu_virt_disks(
    registry: &mut DeviceRegistry,
    clock: Arc<dyn Clock>,
    config: VirtioBlkConfig,
) -> usize {
    discover_into(registry, QEMU_VIRT_SLOTS.regions(), clock, config)
}
