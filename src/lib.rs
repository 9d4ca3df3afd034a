// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Functional emulator core for the AMD Platform Security Processor.
//!
//! The PSP is the 32-bit ARM security coprocessor embedded in AMD's x86
//! CPUs. This crate executes its firmware — on-chip bootloader, off-chip
//! bootloader, SEV application — out of context, without the surrounding
//! x86 system: an external ARM interpreter is driven through the
//! [`engine::Engine`] seam, MMIO and SMN accesses are routed to device
//! models, supervisor calls from user-mode firmware are emulated or
//! forwarded to a physical proxy PSP, and x86 memory mapped by the firmware
//! is mirrored through lazy write-coalescing windows.
//!
//! The entry point is [`ccd::Ccd`], the assembly of one PSP core with its
//! peripherals.

pub mod addr;
pub mod ccd;
pub mod cfg;
pub mod cpu;
pub mod devices;
pub mod engine;
pub mod error;
pub mod iomgr;
pub mod proxy;
pub mod svc;
pub mod x86map;

pub use addr::{PspAddr, SmnAddr, X86PAddr};
pub use ccd::{Ccd, CcdStop};
pub use cfg::{EmuConfig, EmuMode};
pub use engine::{Engine, ExecLimits};
pub use error::{Error, Result};
pub use proxy::PspProxy;
