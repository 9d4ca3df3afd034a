// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The seam between the emulator core and the ARM instruction-set
//! interpreter.
//!
//! The interpreter itself is an external collaborator. Everything the core
//! needs from it is captured by the [`Engine`] trait: a memory map with RAM
//! and trap-region backing, register access, and a blocking `run` that
//! reports why execution suspended. Trapped loads and stores are routed to
//! the [`IoBridge`] supplied to [`Engine::run`], tagged with the region id
//! the trap was registered under, so no callback ever needs to capture core
//! state.

#[cfg(test)]
pub mod fake;

use crate::{addr::PspAddr, error::Result};
use bitflags::bitflags;
use core::time::Duration;
use num_enum::{IntoPrimitive, TryFromPrimitive};

bitflags! {
    /// Protection attributes of a mapped RAM region.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Prot: u32 {
        /// Region is readable.
        const READ = 1 << 0;
        /// Region is writable.
        const WRITE = 1 << 1;
        /// Region is executable.
        const EXEC = 1 << 2;
    }
}

impl Prot {
    /// Read/write data memory.
    pub const RW: Self = Self::READ.union(Self::WRITE);
}

/// The general-purpose registers exposed by the engine.
#[derive(Copy, Clone, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum CoreReg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl CoreReg {
    /// All registers, in index order.
    pub const ALL: [Self; 16] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::Sp,
        Self::Lr,
        Self::Pc,
    ];
}

/// Identifies a trap region registered with [`Engine::map_trap`].
///
/// The engine hands the id back on every trapped access; the I/O manager
/// uses it as an index into its routing table. Ids are never reused.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct RegionId(pub u32);

/// Execution budget for one [`Engine::run`] invocation.
#[derive(Copy, Clone, Debug, Default)]
pub struct ExecLimits {
    /// Maximum number of instructions to retire; `None` is unlimited.
    pub insns: Option<u64>,
    /// Wall-clock budget; `None` is unlimited.
    pub timeout: Option<Duration>,
}

/// Why [`Engine::run`] returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunExit {
    /// Guest code executed `SVC #index` from user mode. The PC has already
    /// advanced past the instruction; the caller handles the call and
    /// re-enters to resume.
    Svc {
        /// The 24-bit immediate of the `SVC` instruction.
        index: u32,
    },
    /// The instruction budget was exhausted.
    InsnLimit,
    /// The wall-clock budget was exhausted.
    Timeout,
    /// A stop was requested through [`Engine::stop`] or the bridge.
    Stopped,
}

/// One completed execution slice.
#[derive(Copy, Clone, Debug)]
pub struct RunSlice {
    /// Why the slice ended.
    pub exit: RunExit,
    /// Instructions retired during the slice.
    pub insns_retired: u64,
}

/// Receiver for loads and stores that land in trap regions.
///
/// Access lengths are always 1, 2 or 4 bytes and naturally aligned. On a
/// read the bridge fills `dst`; bytes it leaves untouched read as zero.
pub trait IoBridge {
    /// Handles a trapped read at `offset` within `region`.
    fn mmio_read(&mut self, region: RegionId, offset: u32, dst: &mut [u8]);

    /// Handles a trapped write at `offset` within `region`.
    fn mmio_write(&mut self, region: RegionId, offset: u32, src: &[u8]);

    /// Polled by the engine between accesses; returning true unwinds the
    /// run cleanly with [`RunExit::Stopped`].
    fn stop_requested(&self) -> bool {
        false
    }
}

/// An ARM32 interpreter as consumed by the emulator core.
///
/// Implementations are single-threaded from the caller's perspective; all
/// suspension happens by returning from [`Engine::run`].
pub trait Engine {
    /// Installs a zero-initialised RAM region at `[base, base + size)`.
    fn map_ram(&mut self, base: PspAddr, size: u32, prot: Prot) -> Result<()>;

    /// Installs a trap region; accesses are routed to the bridge under the
    /// given region id.
    fn map_trap(&mut self, base: PspAddr, size: u32, region: RegionId) -> Result<()>;

    /// Removes a region previously installed at exactly `[base, base + size)`.
    fn unmap(&mut self, base: PspAddr, size: u32) -> Result<()>;

    /// Reads guest memory into `dst`. Fails with `BadAddress` if any part
    /// of the range is not RAM-backed.
    fn mem_read(&mut self, addr: PspAddr, dst: &mut [u8]) -> Result<()>;

    /// Writes `src` into guest memory. Fails with `BadAddress` if any part
    /// of the range is not RAM-backed.
    fn mem_write(&mut self, addr: PspAddr, src: &[u8]) -> Result<()>;

    /// Reads a general-purpose register.
    fn reg(&self, reg: CoreReg) -> Result<u32>;

    /// Writes a general-purpose register.
    fn set_reg(&mut self, reg: CoreReg, value: u32) -> Result<()>;

    /// Sets the address execution continues from on the next run.
    fn set_start(&mut self, addr: PspAddr);

    /// Runs guest code until an exit condition is hit.
    fn run(&mut self, bridge: &mut dyn IoBridge, limits: ExecLimits) -> Result<RunSlice>;

    /// Requests that the current or next run stop as soon as possible.
    fn stop(&mut self);
}
