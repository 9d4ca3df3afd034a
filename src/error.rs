// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Crate-wide error type.

use crate::addr::PspAddr;
use thiserror::Error;

/// Result alias used throughout the emulator core.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the emulator core.
///
/// Errors raised inside an SVC handler are never fatal: the dispatcher logs
/// them and reports status `0x9` to the emulated firmware. Errors at
/// construction time or from the engine mid-run propagate to the caller.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// An allocation failed, at startup or while growing a mapping cache.
    #[error("out of memory allocating {0:#x} bytes")]
    OutOfMemory(usize),
    /// The CPU engine could not be initialised.
    #[error("CPU engine initialisation failed")]
    EngineInit,
    /// The CPU engine faulted while executing guest code.
    #[error("CPU engine execution failed")]
    EngineExec,
    /// An access touched unmapped PSP address space.
    #[error("access to unmapped PSP address {0}")]
    BadAddress(PspAddr),
    /// The channel to the proxy PSP failed.
    #[error("proxy channel I/O failed")]
    ProxyIo,
    /// All eight x86 mapping slots are in use.
    #[error("no free x86 mapping slot")]
    TooManyWindows,
    /// The given syscall has no emulation.
    #[error("syscall {0:#x} not implemented")]
    NotImplemented(u32),
}
