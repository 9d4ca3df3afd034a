// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Lazily cached windows into x86 host-physical memory.
//!
//! The real PSP maps x86 pages into a 64 MiB window of its own address
//! space. The emulator has no x86 memory of its own, so mapped windows are
//! mirrored from the proxy PSP instead — but a proxy round-trip per access
//! is far too slow. Each window therefore keeps a local buffer with two
//! monotonic watermarks:
//!
//! * `psp_highest_read` bounds the span faulted in from the proxy; reads
//!   below it are served locally.
//! * `psp_highest_written` bounds the span dirtied by the guest; the whole
//!   span is pushed back to the proxy in one write when the window is
//!   unmapped.
//!
//! While a window is live the local buffer is the only authority for its
//! contents, so a read after a write always observes the write.

use crate::{
    addr::{PAGE_SIZE, PspAddr, X86PAddr},
    engine::RegionId,
    error::{Error, Result},
    proxy::PspProxy,
};
use log::{trace, warn};

/// Number of x86 mapping slots the real PSP provides.
pub const MAX_WINDOWS: usize = 8;

/// Size of one x86 mapping slot.
const SLOT_SIZE: u64 = 0x0400_0000;

/// One cached x86 mapping.
pub struct X86Window {
    phys_x86_base: X86PAddr,
    psp_base_4k: PspAddr,
    psp_base: PspAddr,
    psp_highest_read: PspAddr,
    psp_highest_written: PspAddr,
    size: u32,
    size_4k: u32,
    region: Option<RegionId>,
    buf: Vec<u8>,
}

impl X86Window {
    fn new(phys: X86PAddr, psp_addr: PspAddr) -> Self {
        // The hardware maps up to the next 64 MiB boundary of the x86
        // address, at 4 KiB granularity on the PSP side.
        let size = (phys.align_down(SLOT_SIZE).0 + SLOT_SIZE - phys.0) as u32;
        let psp_base_4k = psp_addr.align_down(PAGE_SIZE);
        Self {
            phys_x86_base: phys,
            psp_base_4k,
            psp_base: psp_addr,
            psp_highest_read: psp_base_4k,
            psp_highest_written: PspAddr::new(0),
            size,
            size_4k: (size + PAGE_SIZE) & !(PAGE_SIZE - 1),
            region: None,
            buf: Vec::new(),
        }
    }

    /// The x86 host-physical base of the mapping.
    pub fn phys_base(&self) -> X86PAddr {
        self.phys_x86_base
    }

    /// The PSP address the mapping was allocated at.
    pub fn psp_base(&self) -> PspAddr {
        self.psp_base
    }

    /// The 4 KiB-aligned base of the trapped region.
    pub fn psp_base_4k(&self) -> PspAddr {
        self.psp_base_4k
    }

    /// Exclusive upper bound of the span faulted in from the proxy.
    pub fn psp_highest_read(&self) -> PspAddr {
        self.psp_highest_read
    }

    /// Exclusive upper bound of the span dirtied by the guest, or address 0
    /// if nothing has been written.
    pub fn psp_highest_written(&self) -> PspAddr {
        self.psp_highest_written
    }

    /// Size of the mapping as the firmware sees it.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Size of the trapped region (4 KiB granular).
    pub fn size_4k(&self) -> u32 {
        self.size_4k
    }

    fn end_4k(&self) -> PspAddr {
        self.psp_base_4k.offset(self.size_4k)
    }

    fn grow_to(&mut self, len: usize) -> Result<()> {
        if self.buf.len() < len {
            let extra = len - self.buf.len();
            self.buf
                .try_reserve_exact(extra)
                .map_err(|_| Error::OutOfMemory(len))?;
            self.buf.resize(len, 0);
        }
        Ok(())
    }

    /// Faults proxy memory in up to (at least) `upto`, rounded to the next
    /// page boundary and capped at the region end.
    fn fault_in(&mut self, upto: PspAddr, proxy: &mut dyn PspProxy) -> Result<()> {
        let new_read = upto.align_up(PAGE_SIZE).min(self.end_4k());
        if new_read <= self.psp_highest_read {
            return Ok(());
        }
        self.grow_to(new_read.offset_from(self.psp_base_4k) as usize)?;
        let lo = self.psp_highest_read.offset_from(self.psp_base_4k) as usize;
        let hi = new_read.offset_from(self.psp_base_4k) as usize;
        trace!(
            "x86 window {}: faulting in {}..{}",
            self.psp_base, self.psp_highest_read, new_read
        );
        proxy.mem_read(self.psp_highest_read, &mut self.buf[lo..hi])?;
        self.psp_highest_read = new_read;
        Ok(())
    }

    fn read(&mut self, offset: u32, dst: &mut [u8], proxy: &mut dyn PspProxy) -> Result<()> {
        let addr = self.psp_base_4k.offset(offset);
        let end = addr.offset(dst.len() as u32);
        if end > self.psp_highest_read {
            self.fault_in(end, proxy)?;
        }
        let lo = addr.offset_from(self.psp_base_4k) as usize;
        dst.copy_from_slice(&self.buf[lo..lo + dst.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, src: &[u8], proxy: &mut dyn PspProxy) -> Result<()> {
        let addr = self.psp_base_4k.offset(offset);
        let end = addr.offset(src.len() as u32);
        // A write above the read watermark would leave an unfetched hole
        // below it, so fill the gap first. The span being overwritten needs
        // no pre-fault.
        if addr > self.psp_highest_read {
            self.fault_in(addr, proxy)?;
        }
        self.grow_to(end.offset_from(self.psp_base_4k) as usize)?;
        let lo = addr.offset_from(self.psp_base_4k) as usize;
        self.buf[lo..lo + src.len()].copy_from_slice(src);
        self.psp_highest_written = self.psp_highest_written.max(end);
        self.psp_highest_read = self.psp_highest_read.max(end);
        Ok(())
    }

    /// Pushes the dirtied span back to the proxy in a single write.
    fn sync_out(&self, proxy: &mut dyn PspProxy) {
        if self.psp_highest_written <= self.psp_base {
            return;
        }
        let lo = self.psp_base.offset_from(self.psp_base_4k) as usize;
        let hi = self.psp_highest_written.offset_from(self.psp_base_4k) as usize;
        if let Err(err) = proxy.mem_write(self.psp_base, &self.buf[lo..hi]) {
            warn!("syncing x86 window at {} back failed: {err}", self.psp_base);
        }
    }
}

/// The save-state region handed out by the supervisor, kept alive across
/// application exits. Unlike the cached windows it is backed directly by
/// engine RAM.
struct PrivStateRegion {
    psp_base_4k: PspAddr,
    size_4k: u32,
    state_region_size: u32,
}

/// The per-core table of cached x86 mappings.
#[derive(Default)]
pub struct X86MapCache {
    windows: [Option<X86Window>; MAX_WINDOWS],
    priv_state: Option<PrivStateRegion>,
}

impl X86MapCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a free slot for a new window.
    ///
    /// Fails with [`Error::TooManyWindows`] when all slots are live; the
    /// real PSP has exactly eight and well-behaved firmware never exceeds
    /// them.
    pub fn insert(&mut self, phys: X86PAddr, psp_addr: PspAddr) -> Result<usize> {
        let slot = self
            .windows
            .iter()
            .position(Option::is_none)
            .ok_or(Error::TooManyWindows)?;
        self.windows[slot] = Some(X86Window::new(phys, psp_addr));
        Ok(slot)
    }

    /// Records the trap region id a slot was registered under.
    pub fn set_region(&mut self, slot: usize, region: RegionId) {
        if let Some(window) = &mut self.windows[slot] {
            window.region = Some(region);
        }
    }

    /// The trapped extent of a live slot, for region registration.
    pub fn trap_extent(&self, slot: usize) -> Option<(PspAddr, u32)> {
        self.window(slot).map(|w| (w.psp_base_4k, w.size_4k))
    }

    /// Looks a live window up by the PSP address the firmware mapped it at.
    pub fn find_by_base(&self, psp_addr: PspAddr) -> Option<usize> {
        self.windows
            .iter()
            .position(|w| w.as_ref().is_some_and(|w| w.psp_base == psp_addr))
    }

    /// A live window by slot index.
    pub fn window(&self, slot: usize) -> Option<&X86Window> {
        self.windows.get(slot).and_then(Option::as_ref)
    }

    /// Number of live windows.
    pub fn live_windows(&self) -> usize {
        self.windows.iter().filter(|w| w.is_some()).count()
    }

    /// Serves a trapped read landing in `slot`.
    pub fn read(
        &mut self,
        slot: usize,
        offset: u32,
        dst: &mut [u8],
        proxy: &mut dyn PspProxy,
    ) -> Result<()> {
        let window = self.windows[slot]
            .as_mut()
            .ok_or(Error::BadAddress(PspAddr::new(0)))?;
        window.read(offset, dst, proxy)
    }

    /// Serves a trapped write landing in `slot`.
    pub fn write(
        &mut self,
        slot: usize,
        offset: u32,
        src: &[u8],
        proxy: &mut dyn PspProxy,
    ) -> Result<()> {
        let window = self.windows[slot]
            .as_mut()
            .ok_or(Error::BadAddress(PspAddr::new(0)))?;
        window.write(offset, src, proxy)
    }

    /// Tears a window down: syncs the dirtied span back to the proxy and
    /// frees the slot. Returns the trap region to unregister.
    pub fn unmap(&mut self, slot: usize, proxy: &mut dyn PspProxy) -> Option<RegionId> {
        let window = self.windows[slot].take()?;
        window.sync_out(proxy);
        window.region
    }

    /// Frees a slot without any sync, for map attempts that failed halfway.
    pub fn discard(&mut self, slot: usize) {
        self.windows[slot] = None;
    }

    /// Pushes every dirty window back to the proxy without freeing anything.
    pub fn sync_all(&self, proxy: &mut dyn PspProxy) {
        for window in self.windows.iter().flatten() {
            window.sync_out(proxy);
        }
    }

    /// Drops all windows without syncing, returning the trap regions to
    /// unregister.
    pub fn release_windows(&mut self) -> Vec<RegionId> {
        self.windows
            .iter_mut()
            .filter_map(|slot| slot.take().and_then(|w| w.region))
            .collect()
    }

    /// Records the save-state region; returns the RAM extent for the caller
    /// to map. `None` if the region already exists.
    pub fn init_priv_state(
        &mut self,
        psp_addr: PspAddr,
        state_region_size: u32,
    ) -> Option<(PspAddr, u32)> {
        if self.priv_state.is_some() {
            return None;
        }
        // Same geometry as a mapping slot, computed on the PSP address; the
        // backing x86 address of the privileged DRAM is never revealed.
        let size = (u64::from(psp_addr.0 & !(SLOT_SIZE as u32 - 1)) + SLOT_SIZE
            - u64::from(psp_addr.0)) as u32;
        let psp_base_4k = psp_addr.align_down(PAGE_SIZE);
        let size_4k = (size + PAGE_SIZE) & !(PAGE_SIZE - 1);
        self.priv_state = Some(PrivStateRegion {
            psp_base_4k,
            size_4k,
            state_region_size,
        });
        Some((psp_base_4k, size_4k))
    }

    /// Size the application requested for the save-state region.
    pub fn state_region_size(&self) -> u32 {
        self.priv_state
            .as_ref()
            .map_or(0, |region| region.state_region_size)
    }

    /// Drops the save-state region, returning the RAM extent to unmap.
    pub fn release_priv_state(&mut self) -> Option<(PspAddr, u32)> {
        self.priv_state
            .take()
            .map(|region| (region.psp_base_4k, region.size_4k))
    }
}
