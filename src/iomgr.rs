// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The I/O manager: PSP-side memory layout and access routing.
//!
//! The manager owns the table of trapped regions and is the only component
//! that registers trap regions with the engine. During a run, the [`IoBus`]
//! borrows the routing table together with the device instances, the x86
//! mapping cache and the proxy channel, and dispatches every trapped access
//! to its target.

use crate::{
    addr::PspAddr,
    devices::DeviceInstance,
    engine::{Engine, IoBridge, RegionId},
    error::{Error, Result},
    proxy::PspProxy,
    x86map::X86MapCache,
};
use log::{trace, warn};

/// Granularity of an SMN mapping slot on the PSP side.
pub const SMN_SLOT_SIZE: u32 = 0x0010_0000;

/// What a trapped region resolves to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionTarget {
    /// A device instance, by index into the CCD's instance list.
    Device(usize),
    /// A cached x86 window, by mapping slot.
    X86Window(usize),
    /// An SMN window forwarded byte-exact to the proxy's memory view.
    SmnPassthrough,
}

struct Region {
    base: PspAddr,
    size: u32,
    target: RegionTarget,
    live: bool,
}

struct SmnSlot {
    base: PspAddr,
    refs: u32,
    region: RegionId,
}

/// Region table and access router for one CCD.
#[derive(Default)]
pub struct IoMgr {
    regions: Vec<Region>,
    smn_slots: Vec<SmnSlot>,
}

impl IoMgr {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn overlaps_live(&self, base: PspAddr, size: u32) -> bool {
        let start = u64::from(base.0);
        let end = start + u64::from(size);
        self.regions.iter().filter(|r| r.live).any(|r| {
            let rstart = u64::from(r.base.0);
            start < rstart + u64::from(r.size) && rstart < end
        })
    }

    /// Registers a trapped region with the engine and records its target.
    ///
    /// Regions must not overlap any live region.
    pub fn register_mmio_region(
        &mut self,
        engine: &mut dyn Engine,
        base: PspAddr,
        size: u32,
        target: RegionTarget,
    ) -> Result<RegionId> {
        if self.overlaps_live(base, size) {
            return Err(Error::BadAddress(base));
        }
        let id = RegionId(self.regions.len() as u32);
        engine.map_trap(base, size, id)?;
        self.regions.push(Region {
            base,
            size,
            target,
            live: true,
        });
        trace!("registered region {id:?} at {base}+{size:#x} -> {target:?}");
        Ok(id)
    }

    /// Removes a region from the engine's memory map and retires its id.
    pub fn unregister_region(&mut self, engine: &mut dyn Engine, id: RegionId) -> Result<()> {
        let region = self
            .regions
            .get_mut(id.0 as usize)
            .filter(|r| r.live)
            .ok_or(Error::BadAddress(PspAddr::new(0)))?;
        region.live = false;
        engine.unmap(region.base, region.size)
    }

    /// Maps the SMN slot containing `psp_addr` as a proxy passthrough.
    ///
    /// The slots are 1 MiB granular; mapping an already-mapped slot only
    /// bumps a reference count.
    pub fn map_smn_slot(&mut self, engine: &mut dyn Engine, psp_addr: PspAddr) -> Result<()> {
        let base = psp_addr.align_down(SMN_SLOT_SIZE);
        if let Some(slot) = self.smn_slots.iter_mut().find(|s| s.base == base) {
            slot.refs += 1;
            return Ok(());
        }
        let region =
            self.register_mmio_region(engine, base, SMN_SLOT_SIZE, RegionTarget::SmnPassthrough)?;
        self.smn_slots.push(SmnSlot {
            base,
            refs: 1,
            region,
        });
        Ok(())
    }

    /// Drops one reference on the SMN slot containing `psp_addr`,
    /// unregistering the region when the last reference goes away.
    pub fn unmap_smn_slot(&mut self, engine: &mut dyn Engine, psp_addr: PspAddr) -> Result<()> {
        let base = psp_addr.align_down(SMN_SLOT_SIZE);
        let Some(idx) = self.smn_slots.iter().position(|s| s.base == base) else {
            warn!("unmap of SMN address {psp_addr} with no mapped slot");
            return Ok(());
        };
        self.smn_slots[idx].refs -= 1;
        if self.smn_slots[idx].refs == 0 {
            let slot = self.smn_slots.remove(idx);
            self.unregister_region(engine, slot.region)?;
        }
        Ok(())
    }

    /// Number of live SMN passthrough slots.
    pub fn smn_slot_count(&self) -> usize {
        self.smn_slots.len()
    }

    /// Tears down every SMN passthrough slot, regardless of reference
    /// counts. Used by the CCD reset.
    pub fn release_smn_slots(&mut self, engine: &mut dyn Engine) -> Result<()> {
        while let Some(slot) = self.smn_slots.pop() {
            self.unregister_region(engine, slot.region)?;
        }
        Ok(())
    }

    fn route(&self, id: RegionId) -> Option<(PspAddr, RegionTarget)> {
        self.regions
            .get(id.0 as usize)
            .filter(|r| r.live)
            .map(|r| (r.base, r.target))
    }
}

/// The access path wired into [`Engine::run`]: disjoint borrows of
/// everything a trapped access may touch.
pub struct IoBus<'a> {
    iomgr: &'a IoMgr,
    devices: &'a mut [DeviceInstance],
    x86: &'a mut X86MapCache,
    proxy: &'a mut dyn PspProxy,
    fault: Option<Error>,
}

impl<'a> IoBus<'a> {
    /// Builds the bus for one execution slice.
    pub fn new(
        iomgr: &'a IoMgr,
        devices: &'a mut [DeviceInstance],
        x86: &'a mut X86MapCache,
        proxy: &'a mut dyn PspProxy,
    ) -> Self {
        Self {
            iomgr,
            devices,
            x86,
            proxy,
            fault: None,
        }
    }

    /// An error raised by an access during the slice, if any. The engine
    /// stops at the first faulted access.
    pub fn take_fault(&mut self) -> Option<Error> {
        self.fault.take()
    }

    fn record_fault(&mut self, err: Error) {
        warn!("I/O access failed: {err}");
        self.fault.get_or_insert(err);
    }
}

impl IoBridge for IoBus<'_> {
    fn mmio_read(&mut self, region: RegionId, offset: u32, dst: &mut [u8]) {
        // Bytes the handler leaves untouched read as zero.
        dst.fill(0);
        let Some((base, target)) = self.iomgr.route(region) else {
            warn!("read through unregistered region {region:?}");
            return;
        };
        match target {
            RegionTarget::Device(idx) => match self.devices.get_mut(idx) {
                Some(instance) => instance.dev.mmio_read(offset, dst),
                None => warn!("read routed to missing device instance {idx}"),
            },
            RegionTarget::X86Window(slot) => {
                if let Err(err) = self.x86.read(slot, offset, dst, self.proxy) {
                    self.record_fault(err);
                }
            }
            RegionTarget::SmnPassthrough => {
                let addr = base.offset(offset);
                if let Err(err) = self.proxy.mem_read(addr, dst) {
                    self.record_fault(err);
                }
            }
        }
    }

    fn mmio_write(&mut self, region: RegionId, offset: u32, src: &[u8]) {
        let Some((base, target)) = self.iomgr.route(region) else {
            warn!("write through unregistered region {region:?}");
            return;
        };
        match target {
            RegionTarget::Device(idx) => match self.devices.get_mut(idx) {
                Some(instance) => instance.dev.mmio_write(offset, src),
                None => warn!("write routed to missing device instance {idx}"),
            },
            RegionTarget::X86Window(slot) => {
                if let Err(err) = self.x86.write(slot, offset, src, self.proxy) {
                    self.record_fault(err);
                }
            }
            RegionTarget::SmnPassthrough => {
                let addr = base.offset(offset);
                if let Err(err) = self.proxy.mem_write(addr, src) {
                    self.record_fault(err);
                }
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.fault.is_some()
    }
}
