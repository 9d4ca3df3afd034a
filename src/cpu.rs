// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A single PSP core: the engine plus the memory image it executes from.

use crate::{
    addr::{PAGE_SIZE, PspAddr},
    cfg::{EmuConfig, EmuMode},
    engine::{CoreReg, Engine, Prot},
    error::Result,
    x86map::X86MapCache,
};
use log::info;

/// Base of the PSP's SRAM.
pub const SRAM_BASE: PspAddr = PspAddr::new(0);

/// Size of the PSP's SRAM (Zen generation).
pub const SRAM_SIZE: u32 = 0x0004_0000;

/// The boot-ROM service page lives in the top SRAM page.
pub const BOOT_ROM_SVC_PAGE: PspAddr = PspAddr::new(SRAM_SIZE - PAGE_SIZE);

/// Base of the on-chip bootloader ROM region.
pub const ROM_BASE: PspAddr = PspAddr::new(0xffff_0000);

/// Size of the on-chip bootloader ROM region.
pub const ROM_SIZE: u32 = 0x0001_0000;

/// Load-time image header size. Images that still carry the header are
/// loaded one header below their code address.
const IMAGE_HDR_SIZE: u32 = 0x100;

/// Code address of an injected application.
const APP_CODE_ADDR: PspAddr = PspAddr::new(0x0001_5100);

/// Code address of the off-chip bootloader.
const SYSTEM_CODE_ADDR: PspAddr = PspAddr::new(0x0000_0100);

/// One emulated PSP core.
///
/// Owns the engine instance, the SRAM mapped through it, and the x86 mapping
/// cache. The supervisor state borrows all of this during a syscall.
pub struct PspCore {
    engine: Box<dyn Engine>,
    mode: EmuMode,
    id_ccd: u32,
    halted: bool,
    app_stack: Option<(PspAddr, u32)>,
    x86: X86MapCache,
}

impl PspCore {
    /// Creates a core in the given mode: SRAM is mapped at address 0 and,
    /// in on-chip BL mode, the boot ROM region at its architectural base.
    pub fn create(mut engine: Box<dyn Engine>, mode: EmuMode) -> Result<Self> {
        engine.map_ram(SRAM_BASE, SRAM_SIZE, Prot::all())?;
        if mode == EmuMode::SystemOnChipBl {
            engine.map_ram(ROM_BASE, ROM_SIZE, Prot::all())?;
        }
        Ok(Self {
            engine,
            mode,
            id_ccd: 0,
            halted: false,
            app_stack: None,
            x86: X86MapCache::new(),
        })
    }

    /// The emulation mode the core was created in.
    pub fn mode(&self) -> EmuMode {
        self.mode
    }

    /// Sets the id of the CCD containing this core.
    pub fn set_ccd_id(&mut self, id_ccd: u32) {
        self.id_ccd = id_ccd;
    }

    /// The id of the CCD containing this core.
    pub fn ccd_id(&self) -> u32 {
        self.id_ccd
    }

    /// Marks the core as halted; `CCD.run` returns once the current syscall
    /// completes.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Whether the core has been halted by an application exit.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Reads guest memory.
    pub fn mem_read(&mut self, addr: PspAddr, dst: &mut [u8]) -> Result<()> {
        self.engine.mem_read(addr, dst)
    }

    /// Writes guest memory.
    pub fn mem_write(&mut self, addr: PspAddr, src: &[u8]) -> Result<()> {
        self.engine.mem_write(addr, src)
    }

    /// Reads a little-endian word from guest memory.
    pub fn read_u32(&mut self, addr: PspAddr) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.engine.mem_read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a little-endian word to guest memory.
    pub fn write_u32(&mut self, addr: PspAddr, value: u32) -> Result<()> {
        self.engine.mem_write(addr, &value.to_le_bytes())
    }

    /// Writes a little-endian doubleword to guest memory.
    pub fn write_u64(&mut self, addr: PspAddr, value: u64) -> Result<()> {
        self.engine.mem_write(addr, &value.to_le_bytes())
    }

    /// Reads a general-purpose register.
    pub fn reg(&self, reg: CoreReg) -> Result<u32> {
        self.engine.reg(reg)
    }

    /// Writes a general-purpose register.
    pub fn set_reg(&mut self, reg: CoreReg, value: u32) -> Result<()> {
        self.engine.set_reg(reg, value)
    }

    /// Sets the address execution continues from.
    pub fn set_exec_start(&mut self, addr: PspAddr) {
        self.engine.set_start(addr);
    }

    /// The x86 mapping cache.
    pub fn x86_cache(&self) -> &X86MapCache {
        &self.x86
    }

    /// Mutable access to the engine.
    pub fn engine(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    /// Disjoint borrows of the engine and the x86 cache, for callers that
    /// drive one while updating the other.
    pub fn engine_and_cache(&mut self) -> (&mut dyn Engine, &mut X86MapCache) {
        (self.engine.as_mut(), &mut self.x86)
    }

    /// Maps the application stack and remembers it for teardown on reset.
    pub(crate) fn map_app_stack(&mut self, base: PspAddr, size: u32) -> Result<()> {
        self.engine.map_ram(base, size, Prot::RW)?;
        self.app_stack = Some((base, size));
        Ok(())
    }

    /// Loads the configured images and points the PC at the mode's entry.
    pub fn load_images(&mut self, cfg: &EmuConfig) -> Result<()> {
        let entry = match self.mode {
            EmuMode::App => {
                if let Some(bin) = &cfg.bin_load {
                    self.engine
                        .mem_write(load_base(APP_CODE_ADDR, cfg.bin_contains_hdr), bin)?;
                }
                APP_CODE_ADDR
            }
            EmuMode::System => {
                if let Some(bin) = &cfg.bin_load {
                    self.engine
                        .mem_write(load_base(SYSTEM_CODE_ADDR, cfg.bin_contains_hdr), bin)?;
                }
                SYSTEM_CODE_ADDR
            }
            EmuMode::SystemOnChipBl => {
                if let Some(rom) = &cfg.on_chip_bl {
                    self.engine.mem_write(ROM_BASE, rom)?;
                }
                ROM_BASE
            }
        };
        if let Some(page) = &cfg.boot_rom_svc_page {
            self.engine.mem_write(BOOT_ROM_SVC_PAGE, page)?;
        }
        if let Some(app) = &cfg.app_preload {
            self.engine
                .mem_write(APP_CODE_ADDR.align_down(PAGE_SIZE), app)?;
        }
        info!("core {}: images loaded, entry {entry}", self.id_ccd);
        self.engine.set_start(entry);
        Ok(())
    }

    /// Returns the core to its power-on memory state and reloads the
    /// configured images. x86 windows must already have been released by
    /// the owning CCD.
    pub fn reset(&mut self, cfg: &EmuConfig) -> Result<()> {
        if let Some((base, size)) = self.x86.release_priv_state() {
            self.engine.unmap(base, size)?;
        }
        if let Some((base, size)) = self.app_stack.take() {
            self.engine.unmap(base, size)?;
        }
        self.engine
            .mem_write(SRAM_BASE, &vec![0u8; SRAM_SIZE as usize])?;
        if self.mode == EmuMode::SystemOnChipBl {
            self.engine
                .mem_write(ROM_BASE, &vec![0u8; ROM_SIZE as usize])?;
        }
        for reg in CoreReg::ALL {
            self.engine.set_reg(reg, 0)?;
        }
        self.halted = false;
        self.load_images(cfg)
    }
}

/// Where an image goes: at its code address, or one header lower when the
/// image still carries the 256-byte header.
fn load_base(code_addr: PspAddr, contains_hdr: bool) -> PspAddr {
    if contains_hdr {
        PspAddr::new(code_addr.0 - IMAGE_HDR_SIZE)
    } else {
        code_addr
    }
}
