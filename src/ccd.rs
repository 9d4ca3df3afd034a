// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! One emulated CCD: a PSP core with its peripherals.
//!
//! The CCD owns the core, the I/O manager and the device instances, and
//! drives the engine's run loop: enter the engine, dispatch on the exit
//! reason, re-enter. The proxy channel is borrowed per call so several CCDs
//! can share one physical PSP.

use crate::{
    cfg::{EmuConfig, EmuMode},
    cpu::PspCore,
    devices::{self, DeviceInstance},
    engine::{Engine, ExecLimits, RunExit},
    error::Result,
    iomgr::{IoBus, IoMgr, RegionTarget},
    proxy::PspProxy,
    svc::{self, SvcCtx, SvcState},
};
use log::{info, warn};
use std::time::Instant;

/// Why [`Ccd::run`] returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CcdStop {
    /// The application issued its exit syscall.
    AppExited,
    /// The instruction budget was exhausted; run again to continue.
    InsnLimit,
    /// The wall-clock budget was exhausted; run again to continue.
    Timeout,
    /// The engine stopped on request or ran out of code.
    Stopped,
}

/// A single emulated CCD.
pub struct Ccd {
    id_socket: u32,
    id_ccd: u32,
    core: PspCore,
    iomgr: IoMgr,
    devices: Vec<DeviceInstance>,
    svc: Option<SvcState>,
}

impl Ccd {
    /// Creates a CCD: core, device instances per the config's device list,
    /// loaded images, and — in application mode — the supervisor emulation.
    pub fn create(
        engine: Box<dyn Engine>,
        id_socket: u32,
        id_ccd: u32,
        cfg: &EmuConfig,
    ) -> Result<Self> {
        let mut core = PspCore::create(engine, cfg.mode)?;
        core.set_ccd_id(id_ccd);
        let mut iomgr = IoMgr::new();
        let instances = devices::instantiate_mmio(cfg.devices.as_deref());
        for (idx, instance) in instances.iter().enumerate() {
            iomgr.register_mmio_region(
                core.engine(),
                instance.desc.base,
                instance.desc.region_size,
                RegionTarget::Device(idx),
            )?;
        }
        core.load_images(cfg)?;
        let svc = (cfg.mode == EmuMode::App).then(|| SvcState::new(cfg));
        info!(
            "created CCD {id_socket}/{id_ccd} with {} devices",
            instances.len()
        );
        Ok(Self {
            id_socket,
            id_ccd,
            core,
            iomgr,
            devices: instances,
            svc,
        })
    }

    /// The socket this CCD sits in.
    pub fn socket_id(&self) -> u32 {
        self.id_socket
    }

    /// The id of this CCD.
    pub fn ccd_id(&self) -> u32 {
        self.id_ccd
    }

    /// The PSP core.
    pub fn core(&self) -> &PspCore {
        &self.core
    }

    /// Mutable access to the PSP core.
    pub fn core_mut(&mut self) -> &mut PspCore {
        &mut self.core
    }

    /// Runs the core until the application exits, a budget runs out, the
    /// engine stops, or an error unwinds execution.
    ///
    /// The budgets span the whole call: instruction and wall-clock
    /// accounting continues across syscall suspensions.
    pub fn run(&mut self, proxy: &mut dyn PspProxy, limits: ExecLimits) -> Result<CcdStop> {
        let deadline = limits.timeout.map(|timeout| Instant::now() + timeout);
        let mut insns_left = limits.insns;
        loop {
            let slice_limits = ExecLimits {
                insns: insns_left,
                timeout: deadline.map(|d| d.saturating_duration_since(Instant::now())),
            };
            let (slice, fault) = {
                let (engine, x86) = self.core.engine_and_cache();
                let mut bus = IoBus::new(&self.iomgr, &mut self.devices, x86, proxy);
                let slice = engine.run(&mut bus, slice_limits);
                let fault = bus.take_fault();
                (slice, fault)
            };
            if let Some(fault) = fault {
                return Err(fault);
            }
            let slice = slice?;
            if let Some(left) = &mut insns_left {
                *left = left.saturating_sub(slice.insns_retired);
            }
            match slice.exit {
                RunExit::Svc { index } => {
                    match &self.svc {
                        Some(state) => {
                            let mut ctx = SvcCtx {
                                core: &mut self.core,
                                iomgr: &mut self.iomgr,
                                proxy,
                            };
                            svc::dispatch(state, &mut ctx, index)?;
                        }
                        None => warn!("svc {index:#x} intercepted outside application mode"),
                    }
                    if self.core.halted() {
                        return Ok(CcdStop::AppExited);
                    }
                    if insns_left == Some(0) {
                        return Ok(CcdStop::InsnLimit);
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Ok(CcdStop::Timeout);
                    }
                }
                RunExit::InsnLimit => return Ok(CcdStop::InsnLimit),
                RunExit::Timeout => return Ok(CcdStop::Timeout),
                RunExit::Stopped => return Ok(CcdStop::Stopped),
            }
        }
    }

    /// Returns the CCD to the state right after creation: x86 windows are
    /// released, devices and SRAM re-initialised, images re-attached and
    /// the supervisor state rebuilt.
    pub fn reset(&mut self, cfg: &EmuConfig) -> Result<()> {
        let (engine, x86) = self.core.engine_and_cache();
        for region in x86.release_windows() {
            self.iomgr.unregister_region(engine, region)?;
        }
        self.iomgr.release_smn_slots(engine)?;
        self.core.reset(cfg)?;
        for instance in &mut self.devices {
            instance.dev.reset();
        }
        self.svc = (cfg.mode == EmuMode::App).then(|| SvcState::new(cfg));
        info!("reset CCD {}/{}", self.id_socket, self.id_ccd);
        Ok(())
    }

    /// Tears the CCD down, pushing pending x86 window writes back to the
    /// proxy first. Devices and memory are released on drop.
    pub fn destroy(self, proxy: &mut dyn PspProxy) {
        self.core.x86_cache().sync_all(proxy);
        info!("destroyed CCD {}/{}", self.id_socket, self.id_ccd);
    }
}
