// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A scriptable fake engine for unit tests.
//!
//! The fake keeps a real memory map (RAM regions and trap regions) and a
//! register file, but instead of interpreting ARM code it replays a script
//! of memory accesses and `SVC` events queued by the test. Each script step
//! counts as one retired instruction.

use super::{CoreReg, Engine, ExecLimits, IoBridge, Prot, RegionId, RunExit, RunSlice};
use crate::{
    addr::PspAddr,
    error::{Error, Result},
};
use std::collections::VecDeque;

/// One step of a scripted execution.
#[derive(Copy, Clone, Debug)]
pub enum ScriptOp {
    /// Load a 32-bit word; the value read is appended to the load log.
    LoadU32(PspAddr),
    /// Store a 32-bit word.
    StoreU32(PspAddr, u32),
    /// Load a 32-bit word and store it elsewhere.
    CopyU32(PspAddr, PspAddr),
    /// Execute `SVC #imm`: the PC advances by 4 and the run suspends.
    Svc(u32),
}

struct RamRegion {
    base: PspAddr,
    data: Vec<u8>,
    #[allow(dead_code)]
    prot: Prot,
}

struct TrapRegion {
    base: PspAddr,
    size: u32,
    region: RegionId,
}

/// Fake [`Engine`] implementation driven by a script.
#[derive(Default)]
pub struct FakeEngine {
    regs: [u32; 16],
    ram: Vec<RamRegion>,
    traps: Vec<TrapRegion>,
    script: VecDeque<ScriptOp>,
    loads: Vec<u32>,
    stop_pending: bool,
}

impl FakeEngine {
    /// Creates an empty fake engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the execution script.
    pub fn push_op(&mut self, op: ScriptOp) {
        self.script.push_back(op);
    }

    /// Values observed by `LoadU32` steps, in script order.
    pub fn loads(&self) -> &[u32] {
        &self.loads
    }

    /// Whether any region (RAM or trap) covers `addr`.
    pub fn is_mapped(&self, addr: PspAddr) -> bool {
        self.find_ram(addr, 1).is_some() || self.find_trap(addr).is_some()
    }

    fn find_ram(&self, addr: PspAddr, len: usize) -> Option<(usize, usize)> {
        let start = u64::from(addr.0);
        let end = start + len as u64;
        self.ram.iter().enumerate().find_map(|(idx, region)| {
            let base = u64::from(region.base.0);
            (start >= base && end <= base + region.data.len() as u64)
                .then(|| (idx, (start - base) as usize))
        })
    }

    fn find_trap(&self, addr: PspAddr) -> Option<(RegionId, u32)> {
        let at = u64::from(addr.0);
        self.traps.iter().find_map(|trap| {
            let base = u64::from(trap.base.0);
            (at >= base && at < base + u64::from(trap.size))
                .then(|| (trap.region, (at - base) as u32))
        })
    }

    fn overlaps(&self, base: PspAddr, size: u32) -> bool {
        let start = u64::from(base.0);
        let end = start + u64::from(size);
        let ram = self.ram.iter().map(|r| (r.base, r.data.len() as u32));
        let traps = self.traps.iter().map(|t| (t.base, t.size));
        ram.chain(traps).any(|(rbase, rsize)| {
            let rstart = u64::from(rbase.0);
            start < rstart + u64::from(rsize) && rstart < end
        })
    }

    fn load_u32(&mut self, bridge: &mut dyn IoBridge, addr: PspAddr) -> Result<u32> {
        let mut buf = [0u8; 4];
        if let Some((idx, off)) = self.find_ram(addr, 4) {
            buf.copy_from_slice(&self.ram[idx].data[off..off + 4]);
        } else if let Some((region, off)) = self.find_trap(addr) {
            bridge.mmio_read(region, off, &mut buf);
        } else {
            return Err(Error::BadAddress(addr));
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn store_u32(&mut self, bridge: &mut dyn IoBridge, addr: PspAddr, value: u32) -> Result<()> {
        let buf = value.to_le_bytes();
        if let Some((idx, off)) = self.find_ram(addr, 4) {
            self.ram[idx].data[off..off + 4].copy_from_slice(&buf);
        } else if let Some((region, off)) = self.find_trap(addr) {
            bridge.mmio_write(region, off, &buf);
        } else {
            return Err(Error::BadAddress(addr));
        }
        Ok(())
    }

    fn access(&mut self, bridge: &mut dyn IoBridge, op: ScriptOp) -> Result<()> {
        match op {
            ScriptOp::LoadU32(addr) => {
                let value = self.load_u32(bridge, addr)?;
                self.loads.push(value);
            }
            ScriptOp::StoreU32(addr, value) => self.store_u32(bridge, addr, value)?,
            ScriptOp::CopyU32(src, dst) => {
                let value = self.load_u32(bridge, src)?;
                self.store_u32(bridge, dst, value)?;
            }
            ScriptOp::Svc(_) => unreachable!("handled by the run loop"),
        }
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn map_ram(&mut self, base: PspAddr, size: u32, prot: Prot) -> Result<()> {
        if self.overlaps(base, size) {
            return Err(Error::BadAddress(base));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size as usize)
            .map_err(|_| Error::OutOfMemory(size as usize))?;
        data.resize(size as usize, 0);
        self.ram.push(RamRegion { base, data, prot });
        Ok(())
    }

    fn map_trap(&mut self, base: PspAddr, size: u32, region: RegionId) -> Result<()> {
        if self.overlaps(base, size) {
            return Err(Error::BadAddress(base));
        }
        self.traps.push(TrapRegion { base, size, region });
        Ok(())
    }

    fn unmap(&mut self, base: PspAddr, size: u32) -> Result<()> {
        if let Some(idx) = self
            .ram
            .iter()
            .position(|r| r.base == base && r.data.len() as u32 == size)
        {
            self.ram.remove(idx);
            return Ok(());
        }
        if let Some(idx) = self
            .traps
            .iter()
            .position(|t| t.base == base && t.size == size)
        {
            self.traps.remove(idx);
            return Ok(());
        }
        Err(Error::BadAddress(base))
    }

    fn mem_read(&mut self, addr: PspAddr, dst: &mut [u8]) -> Result<()> {
        let (idx, off) = self
            .find_ram(addr, dst.len())
            .ok_or(Error::BadAddress(addr))?;
        dst.copy_from_slice(&self.ram[idx].data[off..off + dst.len()]);
        Ok(())
    }

    fn mem_write(&mut self, addr: PspAddr, src: &[u8]) -> Result<()> {
        let (idx, off) = self
            .find_ram(addr, src.len())
            .ok_or(Error::BadAddress(addr))?;
        self.ram[idx].data[off..off + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn reg(&self, reg: CoreReg) -> Result<u32> {
        Ok(self.regs[usize::from(u8::from(reg))])
    }

    fn set_reg(&mut self, reg: CoreReg, value: u32) -> Result<()> {
        self.regs[usize::from(u8::from(reg))] = value;
        Ok(())
    }

    fn set_start(&mut self, addr: PspAddr) {
        self.regs[usize::from(u8::from(CoreReg::Pc))] = addr.0;
    }

    fn run(&mut self, bridge: &mut dyn IoBridge, limits: ExecLimits) -> Result<RunSlice> {
        let mut retired = 0u64;
        loop {
            if self.stop_pending || bridge.stop_requested() {
                self.stop_pending = false;
                return Ok(RunSlice {
                    exit: RunExit::Stopped,
                    insns_retired: retired,
                });
            }
            if limits.insns.is_some_and(|max| retired >= max) {
                return Ok(RunSlice {
                    exit: RunExit::InsnLimit,
                    insns_retired: retired,
                });
            }
            let Some(op) = self.script.pop_front() else {
                return Ok(RunSlice {
                    exit: RunExit::Stopped,
                    insns_retired: retired,
                });
            };
            retired += 1;
            if let ScriptOp::Svc(index) = op {
                let pc = usize::from(u8::from(CoreReg::Pc));
                self.regs[pc] = self.regs[pc].wrapping_add(4);
                return Ok(RunSlice {
                    exit: RunExit::Svc { index },
                    insns_retired: retired,
                });
            }
            self.access(bridge, op)?;
        }
    }

    fn stop(&mut self) {
        self.stop_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBridge;

    impl IoBridge for NullBridge {
        fn mmio_read(&mut self, _region: RegionId, _offset: u32, _dst: &mut [u8]) {}
        fn mmio_write(&mut self, _region: RegionId, _offset: u32, _src: &[u8]) {}
    }

    #[test]
    fn ram_round_trip() {
        let mut engine = FakeEngine::new();
        engine.map_ram(PspAddr::new(0), 0x1000, Prot::RW).unwrap();
        engine.mem_write(PspAddr::new(0x10), &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        engine.mem_read(PspAddr::new(0x10), &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn unmapped_access_fails() {
        let mut engine = FakeEngine::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            engine.mem_read(PspAddr::new(0x8000_0000), &mut buf),
            Err(Error::BadAddress(PspAddr::new(0x8000_0000)))
        );
    }

    #[test]
    fn overlapping_map_rejected() {
        let mut engine = FakeEngine::new();
        engine.map_ram(PspAddr::new(0), 0x2000, Prot::RW).unwrap();
        assert!(engine.map_ram(PspAddr::new(0x1000), 0x1000, Prot::RW).is_err());
    }

    #[test]
    fn svc_advances_pc_and_suspends() {
        let mut engine = FakeEngine::new();
        engine.set_start(PspAddr::new(0x100));
        engine.push_op(ScriptOp::Svc(0x42));
        let slice = engine.run(&mut NullBridge, ExecLimits::default()).unwrap();
        assert_eq!(slice.exit, RunExit::Svc { index: 0x42 });
        assert_eq!(slice.insns_retired, 1);
        assert_eq!(engine.reg(CoreReg::Pc).unwrap(), 0x104);
    }

    #[test]
    fn insn_limit_is_honoured() {
        let mut engine = FakeEngine::new();
        engine.map_ram(PspAddr::new(0), 0x1000, Prot::RW).unwrap();
        for _ in 0..10 {
            engine.push_op(ScriptOp::StoreU32(PspAddr::new(0), 7));
        }
        let limits = ExecLimits {
            insns: Some(4),
            timeout: None,
        };
        let slice = engine.run(&mut NullBridge, limits).unwrap();
        assert_eq!(slice.exit, RunExit::InsnLimit);
        assert_eq!(slice.insns_retired, 4);
    }
}
