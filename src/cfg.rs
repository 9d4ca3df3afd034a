// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Emulator configuration descriptor.
//!
//! The config is plain data, filled in by the frontend: paths are kept for
//! diagnostics, but image contents arrive as byte blobs — parsing flash
//! images and loading files from disk is the caller's job.

use std::path::PathBuf;

/// What part of the PSP firmware stack is being emulated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmuMode {
    /// A single user-mode application with the supervisor interface emulated.
    App,
    /// Full system emulation with the off-chip bootloader and supervisor.
    System,
    /// Full system emulation starting from the on-chip bootloader.
    SystemOnChipBl,
}

/// Micro-architecture the emulated PSP belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MicroArch {
    /// Original Zen.
    Zen,
    /// Zen+.
    ZenPlus,
    /// Zen 2.
    Zen2,
}

/// AMD CPU market segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CpuSegment {
    /// Ryzen (consumer).
    Ryzen,
    /// Ryzen Pro (business).
    RyzenPro,
    /// Threadripper (HEDT).
    Threadripper,
    /// Epyc (server).
    Epyc,
}

/// ACPI sleep state the emulation starts from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcpiState {
    /// S0: working.
    S0,
    /// S1: sleeping with processor context maintained.
    S1,
    /// S2.
    S2,
    /// S3: suspend to RAM.
    S3,
    /// S4: suspend to disk.
    S4,
    /// S5: soft off.
    S5,
}

/// Global emulator configuration, shared by all sockets and CCDs.
#[derive(Clone, Debug)]
pub struct EmuConfig {
    /// Emulation mode.
    pub mode: EmuMode,
    /// Micro-architecture being emulated.
    pub micro_arch: MicroArch,
    /// CPU segment being emulated.
    pub cpu_segment: CpuSegment,
    /// ACPI system state the emulator starts from.
    pub acpi_state: AcpiState,
    /// Path the flash ROM image was loaded from.
    pub path_flash_rom: Option<PathBuf>,
    /// Path the on-chip bootloader was loaded from.
    pub path_on_chip_bl: Option<PathBuf>,
    /// Path the injected binary was loaded from.
    pub path_bin_load: Option<PathBuf>,
    /// Path the boot-ROM service page was loaded from.
    pub path_boot_rom_svc_page: Option<PathBuf>,
    /// Path the preloaded app was loaded from.
    pub path_app_preload: Option<PathBuf>,
    /// Flash ROM content.
    pub flash_rom: Option<Vec<u8>>,
    /// On-chip bootloader content, required in on-chip BL mode.
    pub on_chip_bl: Option<Vec<u8>>,
    /// Binary to inject; if absent the frontend extracts one from flash.
    pub bin_load: Option<Vec<u8>>,
    /// Boot-ROM service page to place in the top SRAM page.
    pub boot_rom_svc_page: Option<Vec<u8>>,
    /// App binary to preload alongside the mode image.
    pub app_preload: Option<Vec<u8>>,
    /// Whether injected binaries carry the 256-byte header prefix. Affects
    /// the load address.
    pub bin_contains_hdr: bool,
    /// Whether to load the PSP directory from flash into the service page.
    pub load_psp_dir: bool,
    /// Whether the firmware debug mode (no signature checks) is enabled.
    pub psp_dbg_mode: bool,
    /// Whether to intercept syscall 6 and divert it to the host log.
    pub intercept_svc6: bool,
    /// Whether to trace every supervisor call.
    pub trace_svcs: bool,
    /// Whether the timer device ticks in real time.
    pub timer_realtime: bool,
    /// Debugger port to listen on; 0 disables the debugger.
    pub dbg_port: u16,
    /// Address of the proxy PSP, if one is configured.
    pub proxy_addr: Option<String>,
    /// Path of the trace log to write, if enabled.
    pub trace_log: Option<PathBuf>,
    /// Remote endpoint the emulated UART connects to.
    pub uart_remote_addr: Option<String>,
    /// Port of the EM100 flash emulator; 0 disables it.
    pub em100_emu_port: u16,
    /// Number of sockets in the emulated system.
    pub sockets: u32,
    /// Number of CCDs per socket.
    pub ccds_per_socket: u32,
    /// Names of the devices to instantiate; `None` instantiates all of them.
    pub devices: Option<Vec<String>>,
}

impl EmuConfig {
    /// Creates a config with the given mode and everything else defaulted to
    /// a single-socket, single-CCD system with all devices instantiated.
    pub fn new(mode: EmuMode) -> Self {
        Self {
            mode,
            micro_arch: MicroArch::Zen,
            cpu_segment: CpuSegment::Ryzen,
            acpi_state: AcpiState::S5,
            path_flash_rom: None,
            path_on_chip_bl: None,
            path_bin_load: None,
            path_boot_rom_svc_page: None,
            path_app_preload: None,
            flash_rom: None,
            on_chip_bl: None,
            bin_load: None,
            boot_rom_svc_page: None,
            app_preload: None,
            bin_contains_hdr: true,
            load_psp_dir: false,
            psp_dbg_mode: false,
            intercept_svc6: false,
            trace_svcs: false,
            timer_realtime: false,
            dbg_port: 0,
            proxy_addr: None,
            trace_log: None,
            uart_remote_addr: None,
            em100_emu_port: 0,
            sockets: 1,
            ccds_per_socket: 1,
            devices: None,
        }
    }
}
