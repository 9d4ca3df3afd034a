// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Unknown control block at MMIO `0x03010000`.
//!
//! Purpose unidentified. The on-chip bootloader busy-waits on bit 8 of the
//! register at offset `0x104` before it proceeds, so that register reads as
//! `0x100`; everything else reads as zero and ignores writes.

use super::{DeviceDescriptor, MmioDevice};
use crate::addr::PspAddr;
use log::debug;

/// Registration record for the device.
pub static DEVICE: DeviceDescriptor = DeviceDescriptor {
    name: "unk-0x03010000",
    description: "Unknown control block at 0x03010000",
    base: PspAddr::new(0x0301_0000),
    region_size: 0x1000,
    factory: new_boxed,
};

fn new_boxed() -> Box<dyn MmioDevice> {
    Box::new(Unk0x03010000)
}

struct Unk0x03010000;

impl MmioDevice for Unk0x03010000 {
    fn mmio_read(&mut self, offset: u32, dst: &mut [u8]) {
        match offset {
            // The on-chip bootloader waits for bit 8 here.
            0x104 if dst.len() == 4 => dst.copy_from_slice(&0x100u32.to_le_bytes()),
            _ => debug!("unk-0x03010000: unhandled read at {offset:#x}"),
        }
    }

    fn mmio_write(&mut self, offset: u32, src: &[u8]) {
        debug!(
            "unk-0x03010000: discarding write of {} bytes at {offset:#x}",
            src.len()
        );
    }
}
