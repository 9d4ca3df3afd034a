// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The device model contract and the process-wide device registry.
//!
//! Device classes are described by static [`DeviceDescriptor`]s collected in
//! the registry tables below; the tables are read-only after initialisation.
//! Each CCD instantiates the descriptors selected by its config and hands
//! the instances to its I/O manager for routing.

pub mod unk_0x03010000;

use crate::addr::PspAddr;

/// A memory-mapped device instance.
///
/// Access lengths are always 1, 2 or 4 bytes and naturally aligned. A read
/// handler fills the bytes it implements; the I/O manager zeroes the buffer
/// beforehand so untouched bytes read as zero.
pub trait MmioDevice {
    /// Returns the device to its power-on state.
    fn reset(&mut self) {}

    /// Handles a read at `offset` within the device's region.
    fn mmio_read(&mut self, offset: u32, dst: &mut [u8]);

    /// Handles a write at `offset` within the device's region.
    fn mmio_write(&mut self, offset: u32, src: &[u8]);
}

/// Static description of a device class.
pub struct DeviceDescriptor {
    /// Short name, used by the config's device selection list.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Base of the device's region in the PSP (or SMN) address space.
    pub base: PspAddr,
    /// Size of the device's region.
    pub region_size: u32,
    /// Creates a fresh instance in its power-on state.
    pub factory: fn() -> Box<dyn MmioDevice>,
}

/// A per-CCD device instantiation.
pub struct DeviceInstance {
    /// The descriptor this instance was created from.
    pub desc: &'static DeviceDescriptor,
    /// The device state.
    pub dev: Box<dyn MmioDevice>,
}

/// All known MMIO device classes.
pub static MMIO_DEVICES: &[&DeviceDescriptor] = &[&unk_0x03010000::DEVICE];

/// All known SMN device classes. SMN peripherals are currently reached
/// through proxied passthrough slots only.
pub static SMN_DEVICES: &[&DeviceDescriptor] = &[];

/// Instantiates the registered MMIO devices, filtered by the config's
/// device-name list (`None` instantiates all of them).
pub fn instantiate_mmio(filter: Option<&[String]>) -> Vec<DeviceInstance> {
    MMIO_DEVICES
        .iter()
        .filter(|desc| filter.is_none_or(|names| names.iter().any(|n| n == desc.name)))
        .map(|desc| DeviceInstance {
            desc,
            dev: (desc.factory)(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_instantiation_honours_filter() {
        assert_eq!(instantiate_mmio(None).len(), MMIO_DEVICES.len());
        assert_eq!(instantiate_mmio(Some(&[])).len(), 0);
        let picked = instantiate_mmio(Some(&["unk-0x03010000".to_owned()]));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].desc.base, PspAddr::new(0x0301_0000));
    }
}
