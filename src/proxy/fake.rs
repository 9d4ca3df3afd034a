// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory fake proxy for unit tests.

use super::PspProxy;
use crate::{
    addr::PspAddr,
    error::{Error, Result},
};
use std::collections::{BTreeMap, VecDeque};

/// One proxied syscall as recorded by [`FakeProxy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SvcCall {
    /// The syscall index.
    pub idx: u32,
    /// The four argument registers.
    pub args: [u32; 4],
}

/// A fake proxy backed by a sparse byte map.
///
/// Syscall results are popped from a queue primed by the test (defaulting
/// to 0), and every call is logged for inspection. Memory reads of bytes
/// never written return zero, like freshly scrubbed PSP SRAM.
#[derive(Default)]
pub struct FakeProxy {
    mem: BTreeMap<u32, u8>,
    results: VecDeque<Result<u32>>,
    calls: Vec<SvcCall>,
    fail_io: bool,
}

impl FakeProxy {
    /// Creates an empty fake proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next unanswered `svc_call`.
    pub fn push_result(&mut self, result: Result<u32>) {
        self.results.push_back(result);
    }

    /// Makes all subsequent memory operations fail.
    pub fn fail_io(&mut self) {
        self.fail_io = true;
    }

    /// The proxied syscalls recorded so far.
    pub fn calls(&self) -> &[SvcCall] {
        &self.calls
    }

    /// Writes bytes directly into the fake's memory.
    pub fn preload(&mut self, addr: PspAddr, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.mem.insert(addr.0 + i as u32, *byte);
        }
    }

    /// Reads bytes directly out of the fake's memory.
    pub fn peek(&self, addr: PspAddr, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.mem.get(&(addr.0 + i as u32)).copied().unwrap_or(0))
            .collect()
    }
}

impl PspProxy for FakeProxy {
    fn svc_call(&mut self, idx: u32, a0: u32, a1: u32, a2: u32, a3: u32) -> Result<u32> {
        self.calls.push(SvcCall {
            idx,
            args: [a0, a1, a2, a3],
        });
        self.results.pop_front().unwrap_or(Ok(0))
    }

    fn mem_read(&mut self, addr: PspAddr, dst: &mut [u8]) -> Result<()> {
        if self.fail_io {
            return Err(Error::ProxyIo);
        }
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.mem.get(&(addr.0 + i as u32)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn mem_write(&mut self, addr: PspAddr, src: &[u8]) -> Result<()> {
        if self.fail_io {
            return Err(Error::ProxyIo);
        }
        for (i, byte) in src.iter().enumerate() {
            self.mem.insert(addr.0 + i as u32, *byte);
        }
        Ok(())
    }
}
