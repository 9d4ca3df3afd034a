// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The channel to a physical "proxy" PSP.
//!
//! Syscalls the emulator cannot (or does not want to) emulate locally are
//! executed on a real PSP reached over a debug transport. The transport is
//! an external collaborator; the core only needs the three operations below
//! plus the convention that the scratch region is free between calls.

#[cfg(test)]
pub mod fake;

use crate::{addr::PspAddr, error::Result};

/// Base of the scratch region in the proxy's PSP address space.
///
/// SVC handlers may stage buffers anywhere inside the scratch region while a
/// proxied call is in flight; the region is guaranteed unused by the proxy
/// firmware between calls.
pub const SCRATCH_BASE: PspAddr = PspAddr::new(0x0002_0000);

/// Size of the proxy scratch region.
pub const SCRATCH_SIZE: u32 = 0x0004_0000;

/// Synchronous request/response channel to the proxy PSP.
///
/// All operations block until the proxy responds. The handle is borrowed by
/// the SVC handlers for the duration of a run; none of them may close it.
pub trait PspProxy {
    /// Executes syscall `idx` on the proxy and returns the value the real
    /// firmware left in `R0`.
    fn svc_call(&mut self, idx: u32, a0: u32, a1: u32, a2: u32, a3: u32) -> Result<u32>;

    /// Reads proxy PSP memory into `dst`.
    fn mem_read(&mut self, addr: PspAddr, dst: &mut [u8]) -> Result<()>;

    /// Writes `src` into proxy PSP memory.
    fn mem_write(&mut self, addr: PspAddr, src: &[u8]) -> Result<()>;
}
