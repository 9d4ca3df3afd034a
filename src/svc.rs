// Copyright The PSPEmu Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Emulation of the supervisor-call interface.
//!
//! In application mode the guest has no supervisor underneath it, so every
//! `SVC` suspends the engine and lands here. A syscall is either emulated
//! locally (stack setup, debug log) or executed on the proxy PSP, with the
//! referenced buffers staged through the proxy's scratch region and the
//! results mirrored back into guest memory.
//!
//! A handler reads its arguments from `R0..R3` and returns the status that
//! the dispatcher writes into `R0`; errors inside a handler are never fatal
//! to the emulator and surface to the guest as the firmware's generic
//! memory-error status.

use crate::{
    addr::{PspAddr, SmnAddr, X86PAddr},
    cfg::EmuConfig,
    cpu::PspCore,
    engine::{CoreReg, Prot},
    error::{Error, Result},
    iomgr::{IoMgr, RegionTarget},
    proxy::{PspProxy, SCRATCH_BASE},
};
use arrayvec::ArrayVec;
use log::{debug, info, warn};
use num_enum::TryFromPrimitive;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, little_endian::U32 as U32Le};

/// Status reported to the guest on success.
pub const PSP_STATUS_SUCCESS: u32 = 0x0;

/// The firmware's generic memory-error status, reported for every internal
/// failure and for unimplemented syscalls.
pub const PSP_STATUS_GENERAL_MEMORY_ERROR: u32 = 0x9;

/// The debug-log syscall, subject to interception.
const SVC_DBG_LOG: u32 = 0x06;

/// Syscall used to obtain the state buffer when an application exits.
const SVC_GET_STATE_BUFFER: u32 = 0x3c;

/// Base of the application stack mapped by `AppInit`.
const APP_STACK_BASE: PspAddr = PspAddr::new(0x0005_0000);

/// Size of the application stack.
const APP_STACK_SIZE: u32 = 0x2000;

/// Initial stack pointer handed to the application.
const APP_STACK_TOP: u32 = 0x0005_2000;

/// Upper bound on a debug-log string.
const DBG_LOG_MAX: usize = 512;

/// The user stack region mirrored around forwarded crypto requests.
const USER_STACK_BASE: PspAddr = PspAddr::new(0x0006_0000);

/// Size of the mirrored user stack region.
const USER_STACK_SIZE: u32 = 0x2000;

// Proxy-side staging addresses, all inside the scratch region. The layout
// matches what the real supervisor tolerates between calls.
const SCRATCH_AUX: PspAddr = PspAddr::new(0x0002_1000);
const SCRATCH_ALT: PspAddr = PspAddr::new(0x0002_1e2c);
const CCP_BUF1_STAGE: PspAddr = PspAddr::new(0x0002_1100);
const CCP_BUF2_STAGE: PspAddr = PspAddr::new(0x0002_1200);
const CCP_BUF0_STAGE: PspAddr = PspAddr::new(0x0002_2000);
const CRYPTO_CONSTS_STAGE: PspAddr = PspAddr::new(0x0002_2000);
const CRYPTO_OUT_STAGE: PspAddr = PspAddr::new(0x0002_2500);
const CRYPTO_REQ_STAGE: PspAddr = PspAddr::new(0x0002_3000);

/// Address of the firmware's built-in curve constant table.
const CONST_TABLE_ADDR: PspAddr = PspAddr::new(0x0001_c6ac);

/// Size of the built-in curve constant table.
const CONST_TABLE_LEN: u32 = 508;

/// Size of a caller-supplied curve parameter block.
const CURVE_PARAMS_LEN: u32 = 144;

/// Supervisor emulation state for one core.
pub struct SvcState {
    trace_svcs: bool,
    intercept_svc6: bool,
}

impl SvcState {
    /// Creates the state with the tracing/interception flags of the config.
    pub fn new(cfg: &EmuConfig) -> Self {
        Self {
            trace_svcs: cfg.trace_svcs,
            intercept_svc6: cfg.intercept_svc6,
        }
    }
}

/// Everything a syscall handler may touch, borrowed for one dispatch.
pub struct SvcCtx<'a> {
    /// The core that issued the syscall.
    pub core: &'a mut PspCore,
    /// The I/O manager of the owning CCD.
    pub iomgr: &'a mut IoMgr,
    /// The proxy channel.
    pub proxy: &'a mut dyn PspProxy,
}

/// A syscall handler: returns the status to report in `R0`.
type SvcHandler = fn(&mut SvcCtx, u32) -> Result<u32>;

/// The syscall dispatch table, indexed by the `SVC` immediate.
const SYSCALL_TABLE: [Option<SvcHandler>; 0x49] = [
    Some(svc_app_exit),               // 0x00: application exit
    Some(svc_app_init),               // 0x01: initialise application stack
    None,                             // 0x02: load entry from flash
    Some(svc_smn_map),                // 0x03: map SMN address, extended
    Some(svc_smn_map),                // 0x04: map SMN address
    Some(svc_smn_unmap),              // 0x05: unmap SMN address
    Some(svc_dbg_log),                // 0x06: debug log
    Some(svc_x86_mem_map),            // 0x07: map x86 memory into PSP space
    Some(svc_x86_mem_unmap),          // 0x08: unmap x86 memory
    Some(svc_x86_copy_to_psp),        // 0x09: copy x86 memory to PSP
    Some(svc_x86_copy_from_psp),      // 0x0a: write value to x86 memory
    None,                             // 0x0b: invalidate/clean memory
    None,                             // 0x0c: CCP crypto request
    None,                             // 0x0d
    None,                             // 0x0e
    None,                             // 0x0f
    None,                             // 0x10
    None,                             // 0x11
    None,                             // 0x12
    None,                             // 0x13
    None,                             // 0x14
    None,                             // 0x15
    None,                             // 0x16
    None,                             // 0x17
    None,                             // 0x18
    None,                             // 0x19
    None,                             // 0x1a
    None,                             // 0x1b
    None,                             // 0x1c
    None,                             // 0x1d
    None,                             // 0x1e
    None,                             // 0x1f
    None,                             // 0x20
    None,                             // 0x21
    None,                             // 0x22
    None,                             // 0x23
    None,                             // 0x24
    Some(svc_x86_mem_map),            // 0x25: map x86 memory, extended
    None,                             // 0x26
    None,                             // 0x27
    Some(svc_smu_msg),                // 0x28: execute request on the SMU
    None,                             // 0x29
    None,                             // 0x2a
    None,                             // 0x2b
    None,                             // 0x2c
    None,                             // 0x2d
    None,                             // 0x2e
    None,                             // 0x2f
    None,                             // 0x30
    None,                             // 0x31
    Some(svc_fwd_buffer),             // 0x32: forwarded buffer operation
    Some(svc_fwd_buffer),             // 0x33: forwarded buffer operation
    None,                             // 0x34
    None,                             // 0x35
    None,                             // 0x36
    None,                             // 0x37
    Some(svc_ccp_req),                // 0x38: forwarded CCP request
    Some(svc_rng),                    // 0x39: random number generation
    None,                             // 0x3a
    None,                             // 0x3b
    Some(svc_query_save_state_region), // 0x3c: query SEV save-state region
    None,                             // 0x3d
    None,                             // 0x3e
    None,                             // 0x3f
    None,                             // 0x40
    Some(svc_crypto_req),             // 0x41: forwarded crypto operation
    Some(svc_fuse_read),              // 0x42: fuse read
    None,                             // 0x43
    None,                             // 0x44
    None,                             // 0x45
    None,                             // 0x46
    None,                             // 0x47
    Some(svc_query_smm_region),       // 0x48: query SMM region boundaries
];

/// Dispatches one intercepted `SVC`.
///
/// Handler failures are coerced into the guest-visible generic error; only
/// register-file access failures propagate, as the engine is unusable then.
pub fn dispatch(state: &SvcState, ctx: &mut SvcCtx, index: u32) -> Result<()> {
    if state.trace_svcs {
        let args: Result<Vec<u32>> = [CoreReg::R0, CoreReg::R1, CoreReg::R2, CoreReg::R3]
            .iter()
            .map(|&reg| ctx.core.reg(reg))
            .collect();
        if let Ok(args) = args {
            info!(
                "svc {index:#04x} r0={:#010x} r1={:#010x} r2={:#010x} r3={:#010x}",
                args[0], args[1], args[2], args[3]
            );
        }
    }
    let handler = if index == SVC_DBG_LOG && state.intercept_svc6 {
        Some(svc_dbg_log as SvcHandler)
    } else {
        SYSCALL_TABLE.get(index as usize).copied().flatten()
    };
    let status = match handler {
        Some(handler) => handler(ctx, index).unwrap_or_else(|err| {
            warn!("syscall {index:#x} failed: {err}");
            PSP_STATUS_GENERAL_MEMORY_ERROR
        }),
        None => {
            warn!("{}", Error::NotImplemented(index));
            PSP_STATUS_GENERAL_MEMORY_ERROR
        }
    };
    ctx.core.set_reg(CoreReg::R0, status)
}

/// Allocates a zeroed staging buffer, failing instead of aborting: the
/// length is guest controlled.
fn alloc_buf(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Copies a guest buffer into proxy memory.
fn guest_to_proxy(ctx: &mut SvcCtx, guest: PspAddr, staged: PspAddr, len: u32) -> Result<()> {
    let mut buf = alloc_buf(len as usize)?;
    ctx.core.mem_read(guest, &mut buf)?;
    ctx.proxy.mem_write(staged, &buf)
}

/// Copies proxy memory back into a guest buffer.
fn proxy_to_guest(ctx: &mut SvcCtx, staged: PspAddr, guest: PspAddr, len: u32) -> Result<()> {
    let mut buf = alloc_buf(len as usize)?;
    ctx.proxy.mem_read(staged, &mut buf)?;
    ctx.core.mem_write(guest, &buf)
}

/// One buffer staged in proxy scratch for the duration of a forwarded call.
struct BufMirror {
    guest: PspAddr,
    staged: PspAddr,
    len: u32,
}

fn mirror_in(ctx: &mut SvcCtx, plan: &[BufMirror]) -> Result<()> {
    for mirror in plan {
        guest_to_proxy(ctx, mirror.guest, mirror.staged, mirror.len)?;
    }
    Ok(())
}

fn mirror_out(ctx: &mut SvcCtx, plan: &[BufMirror]) -> Result<()> {
    for mirror in plan {
        proxy_to_guest(ctx, mirror.staged, mirror.guest, mirror.len)?;
    }
    Ok(())
}

fn read_req_words<const N: usize>(ctx: &mut SvcCtx, addr: PspAddr) -> Result<[u32; N]> {
    let mut raw = alloc_buf(N * 4)?;
    ctx.core.mem_read(addr, &mut raw)?;
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

fn svc_app_exit(ctx: &mut SvcCtx, _index: u32) -> Result<u32> {
    let size = ctx.core.x86_cache().state_region_size();
    let status = match ctx.proxy.svc_call(SVC_GET_STATE_BUFFER, size, 0, 0, 0) {
        Ok(_) => PSP_STATUS_SUCCESS,
        Err(err) => {
            warn!("requesting the state buffer failed: {err}");
            PSP_STATUS_GENERAL_MEMORY_ERROR
        }
    };
    ctx.core.halt();
    Ok(status)
}

fn svc_app_init(ctx: &mut SvcCtx, _index: u32) -> Result<u32> {
    let stack_slot = PspAddr::new(ctx.core.reg(CoreReg::R2)?);
    ctx.core.map_app_stack(APP_STACK_BASE, APP_STACK_SIZE)?;
    ctx.core.write_u32(stack_slot, APP_STACK_TOP)?;
    Ok(PSP_STATUS_SUCCESS)
}

fn svc_smn_map(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let smn = SmnAddr::new(ctx.core.reg(CoreReg::R0)?);
    // The extended variant targets another CCD.
    let ccd_target = if index == 0x03 {
        ctx.core.reg(CoreReg::R1)?
    } else {
        0
    };
    debug!("mapping SMN address {smn} on CCD {ccd_target:#x}");
    let mapped = ctx.proxy.svc_call(index, smn.0, ccd_target, 0, 0)?;
    ctx.iomgr
        .map_smn_slot(ctx.core.engine(), PspAddr::new(mapped))?;
    Ok(mapped)
}

fn svc_smn_unmap(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let addr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    debug!("unmapping SMN address {addr}");
    ctx.iomgr.unmap_smn_slot(ctx.core.engine(), addr)?;
    ctx.proxy.svc_call(index, addr.0, 0, 0, 0)
}

fn svc_dbg_log(ctx: &mut SvcCtx, _index: u32) -> Result<u32> {
    let ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let mut buf = [0u8; DBG_LOG_MAX];
    ctx.core.mem_read(ptr, &mut buf)?;
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let msg = String::from_utf8_lossy(&buf[..len]);
    info!("PSP log: {}", msg.trim_end());
    Ok(PSP_STATUS_SUCCESS)
}

fn svc_x86_mem_map(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let low = ctx.core.reg(CoreReg::R0)?;
    let high = ctx.core.reg(CoreReg::R1)?;
    let mem_type = ctx.core.reg(CoreReg::R2)?;
    let phys = X86PAddr::from_parts(low, high);
    let mapped = ctx.proxy.svc_call(index, low, high, mem_type, 0)?;
    debug!("mapping x86 address {phys} (memory target {mem_type}) at {mapped:#x}");
    let (engine, x86) = ctx.core.engine_and_cache();
    let slot = x86.insert(phys, PspAddr::new(mapped))?;
    let (base, size) = x86
        .trap_extent(slot)
        .ok_or(Error::BadAddress(PspAddr::new(mapped)))?;
    match ctx
        .iomgr
        .register_mmio_region(engine, base, size, RegionTarget::X86Window(slot))
    {
        Ok(region) => {
            x86.set_region(slot, region);
            Ok(mapped)
        }
        Err(err) => {
            x86.discard(slot);
            Err(err)
        }
    }
}

fn svc_x86_mem_unmap(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let addr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    debug!("unmapping x86 address mapped at {addr}");
    let (engine, x86) = ctx.core.engine_and_cache();
    if let Some(slot) = x86.find_by_base(addr)
        && let Some(region) = x86.unmap(slot, ctx.proxy)
    {
        ctx.iomgr.unregister_region(engine, region)?;
    }
    ctx.proxy.svc_call(index, addr.0, 0, 0, 0)
}

fn svc_x86_copy_to_psp(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let dst = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let low = ctx.core.reg(CoreReg::R1)?;
    let high = ctx.core.reg(CoreReg::R2)?;
    let len = ctx.core.reg(CoreReg::R3)?;
    let status = ctx.proxy.svc_call(index, dst.0, low, high, len)?;
    if status == PSP_STATUS_SUCCESS {
        // The proxy copied into its own PSP memory; mirror that back.
        proxy_to_guest(ctx, dst, dst, len)?;
    }
    Ok(status)
}

fn svc_x86_copy_from_psp(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    // The value travels in the registers, so this is a pure forward.
    let a0 = ctx.core.reg(CoreReg::R0)?;
    let a1 = ctx.core.reg(CoreReg::R1)?;
    let a2 = ctx.core.reg(CoreReg::R2)?;
    let a3 = ctx.core.reg(CoreReg::R3)?;
    ctx.proxy.svc_call(index, a0, a1, a2, a3)
}

fn svc_smu_msg(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let id_msg = ctx.core.reg(CoreReg::R0)?;
    let arg0 = ctx.core.reg(CoreReg::R1)?;
    let ret_ptr = ctx.core.reg(CoreReg::R2)?;
    let scratch = if ret_ptr != 0 { SCRATCH_BASE.0 } else { 0 };
    let status = ctx.proxy.svc_call(index, id_msg, arg0, scratch, 0)?;
    if ret_ptr != 0 {
        let mut word = [0u8; 4];
        ctx.proxy.mem_read(SCRATCH_BASE, &mut word)?;
        ctx.core.mem_write(PspAddr::new(ret_ptr), &word)?;
    }
    Ok(status)
}

fn svc_fwd_buffer(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let buf_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let len = ctx.core.reg(CoreReg::R1)?;
    let staged = if index == 0x33 { SCRATCH_ALT } else { SCRATCH_BASE };
    guest_to_proxy(ctx, buf_ptr, staged, len)?;
    let status = ctx.proxy.svc_call(index, staged.0, len, 0, 0)?;
    if status == PSP_STATUS_SUCCESS {
        proxy_to_guest(ctx, staged, buf_ptr, len)?;
    }
    Ok(status)
}

/// Request block of the forwarded CCP syscall, as laid out in guest memory.
#[derive(Clone, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
struct CcpRequest {
    buf0: U32Le,
    buf0_len: U32Le,
    mode: U32Le,
    buf1: U32Le,
    buf1_len: U32Le,
    buf2: U32Le,
    arg3: U32Le,
    arg4: U32Le,
    arg5: U32Le,
}

fn svc_ccp_req(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let req_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let mut raw = [0u8; size_of::<CcpRequest>()];
    ctx.core.mem_read(req_ptr, &mut raw)?;
    let req = CcpRequest::read_from_bytes(&raw).map_err(|_| Error::BadAddress(req_ptr))?;
    // Only the request shape the SEV app is known to issue is forwarded.
    if req.mode.get() != 0x2 || req.buf1_len.get() != 0x20 {
        warn!("CCP request with unsupported shape, failing");
        return Ok(PSP_STATUS_GENERAL_MEMORY_ERROR);
    }

    let mut proxy_req = req.clone();
    let mut plan = ArrayVec::<BufMirror, 3>::new();
    if req.buf0.get() != 0 {
        proxy_req.buf0 = U32Le::new(CCP_BUF0_STAGE.0);
        plan.push(BufMirror {
            guest: PspAddr::new(req.buf0.get()),
            staged: CCP_BUF0_STAGE,
            len: req.buf0_len.get(),
        });
    }
    proxy_req.buf1 = U32Le::new(CCP_BUF1_STAGE.0);
    if req.buf1.get() != 0 {
        plan.push(BufMirror {
            guest: PspAddr::new(req.buf1.get()),
            staged: CCP_BUF1_STAGE,
            len: req.buf1_len.get(),
        });
    }
    if req.buf2.get() != 0 {
        proxy_req.buf2 = U32Le::new(CCP_BUF2_STAGE.0);
        plan.push(BufMirror {
            guest: PspAddr::new(req.buf2.get()),
            staged: CCP_BUF2_STAGE,
            len: 0x20,
        });
    }
    ctx.proxy.mem_write(SCRATCH_BASE, proxy_req.as_bytes())?;
    mirror_in(ctx, &plan)?;
    let status = ctx.proxy.svc_call(index, SCRATCH_BASE.0, 0, 0, 0)?;
    if status == PSP_STATUS_SUCCESS {
        mirror_out(ctx, &plan)?;
    }
    Ok(status)
}

fn svc_rng(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let buf_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let len = ctx.core.reg(CoreReg::R1)?;
    debug!("filling {len:#x} bytes at {buf_ptr} with random data");
    let status = ctx.proxy.svc_call(index, SCRATCH_BASE.0, len, 0, 0)?;
    if status == PSP_STATUS_SUCCESS {
        proxy_to_guest(ctx, SCRATCH_BASE, buf_ptr, len)?;
    }
    Ok(status)
}

fn svc_query_save_state_region(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let size = ctx.core.reg(CoreReg::R0)?;
    let addr = ctx.proxy.svc_call(index, size, 0, 0, 0)?;
    debug!("SEV save-state region of {size:#x} bytes at {addr:#x}");
    let (engine, x86) = ctx.core.engine_and_cache();
    if let Some((base, region_size)) = x86.init_priv_state(PspAddr::new(addr), size)
        && let Err(err) = engine.map_ram(base, region_size, Prot::all())
    {
        x86.release_priv_state();
        return Err(err);
    }
    Ok(addr)
}

/// Variants of the forwarded crypto request, keyed by the first request
/// word. Field meanings are partially reverse engineered; pointer words
/// reference either the user stack or the firmware's curve constant table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
enum CryptoOp {
    /// Curve parameters supplied by the caller.
    CallerParams = 1,
    /// Built-in constant table, one buffer possibly outside the stack.
    BuiltinParamsAlt = 2,
    /// Built-in constant table, stack buffers only.
    BuiltinParams = 3,
    /// Built-in constant table, every pointer word rebased.
    BuiltinParamsWide = 5,
}

/// Rebases a user-stack address into the scratch copy of the stack.
fn rebase_stack(addr: u32) -> u32 {
    SCRATCH_BASE.0.wrapping_add(addr.wrapping_sub(USER_STACK_BASE.0))
}

/// Rebases a constant-table address into the staged copy of the table.
fn rebase_consts(addr: u32) -> u32 {
    CRYPTO_CONSTS_STAGE
        .0
        .wrapping_add(addr.wrapping_sub(CONST_TABLE_ADDR.0))
}

fn svc_crypto_req(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let req_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let words: [u32; 8] = read_req_words(ctx, req_ptr)?;
    let Ok(op) = CryptoOp::try_from(words[0]) else {
        warn!("crypto request subtype {:#x} not implemented", words[0]);
        return Ok(PSP_STATUS_GENERAL_MEMORY_ERROR);
    };

    // Buffers live on the user stack; mirror the whole stack around the
    // call and rewrite stack pointers into its scratch copy.
    let mut plan = ArrayVec::<BufMirror, 2>::new();
    plan.push(BufMirror {
        guest: USER_STACK_BASE,
        staged: SCRATCH_BASE,
        len: USER_STACK_SIZE,
    });
    let mut proxy_req = [0u32; 8];
    match op {
        CryptoOp::CallerParams => {
            guest_to_proxy(
                ctx,
                PspAddr::new(words[2]),
                CRYPTO_CONSTS_STAGE,
                CURVE_PARAMS_LEN,
            )?;
            proxy_req[0] = words[0];
            proxy_req[1] = rebase_stack(words[1]);
            proxy_req[2] = CRYPTO_CONSTS_STAGE.0;
            proxy_req[3] = rebase_stack(words[3]);
            proxy_req[4] = rebase_stack(words[4]);
        }
        CryptoOp::BuiltinParamsAlt => {
            guest_to_proxy(ctx, CONST_TABLE_ADDR, CRYPTO_CONSTS_STAGE, CONST_TABLE_LEN)?;
            proxy_req[0] = words[0];
            proxy_req[1] = rebase_stack(words[1]);
            proxy_req[2] = rebase_consts(words[2]);
            proxy_req[3] = if words[3] < USER_STACK_BASE.0 {
                // The one buffer that may live outside the stack.
                plan.push(BufMirror {
                    guest: PspAddr::new(words[3]),
                    staged: CRYPTO_OUT_STAGE,
                    len: 0x400,
                });
                CRYPTO_OUT_STAGE.0
            } else {
                rebase_stack(words[3])
            };
            proxy_req[4] = rebase_stack(words[4]);
        }
        CryptoOp::BuiltinParams => {
            guest_to_proxy(ctx, CONST_TABLE_ADDR, CRYPTO_CONSTS_STAGE, CONST_TABLE_LEN)?;
            proxy_req[0] = words[0];
            proxy_req[1] = rebase_stack(words[1]);
            proxy_req[2] = rebase_consts(words[2]);
            proxy_req[3] = rebase_stack(words[3]);
        }
        CryptoOp::BuiltinParamsWide => {
            guest_to_proxy(ctx, CONST_TABLE_ADDR, CRYPTO_CONSTS_STAGE, CONST_TABLE_LEN)?;
            proxy_req[0] = words[0];
            proxy_req[1] = rebase_stack(words[1]);
            proxy_req[2] = rebase_consts(words[2]);
            proxy_req[3] = rebase_consts(words[3]);
            proxy_req[4] = rebase_stack(words[4]);
            proxy_req[5] = rebase_consts(words[5]);
        }
    }
    mirror_in(ctx, &plan)?;
    let mut req_bytes = [0u8; 32];
    for (chunk, word) in req_bytes.chunks_exact_mut(4).zip(proxy_req) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    ctx.proxy.mem_write(CRYPTO_REQ_STAGE, &req_bytes)?;
    let status = ctx.proxy.svc_call(index, CRYPTO_REQ_STAGE.0, 0, 0, 0)?;
    if status == PSP_STATUS_SUCCESS {
        mirror_out(ctx, &plan)?;
    }
    Ok(status)
}

fn svc_fuse_read(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let buf_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let size_ptr = PspAddr::new(ctx.core.reg(CoreReg::R1)?);
    let len = ctx.core.read_u32(size_ptr)?;
    guest_to_proxy(ctx, buf_ptr, SCRATCH_BASE, len)?;
    ctx.proxy.mem_write(SCRATCH_AUX, &len.to_le_bytes())?;
    let status = ctx.proxy.svc_call(index, SCRATCH_BASE.0, SCRATCH_AUX.0, 0, 0)?;
    // The proxy may shrink the length; mirror both outputs back.
    let mut len_bytes = [0u8; 4];
    ctx.proxy.mem_read(SCRATCH_AUX, &mut len_bytes)?;
    let out_len = u32::from_le_bytes(len_bytes);
    proxy_to_guest(ctx, SCRATCH_BASE, buf_ptr, out_len)?;
    ctx.core.write_u32(size_ptr, out_len)?;
    Ok(status)
}

fn svc_query_smm_region(ctx: &mut SvcCtx, index: u32) -> Result<u32> {
    let start_ptr = PspAddr::new(ctx.core.reg(CoreReg::R0)?);
    let size_ptr = PspAddr::new(ctx.core.reg(CoreReg::R1)?);
    let status = ctx.proxy.svc_call(index, SCRATCH_BASE.0, SCRATCH_AUX.0, 0, 0)?;
    let mut qword = [0u8; 8];
    ctx.proxy.mem_read(SCRATCH_BASE, &mut qword)?;
    ctx.core.mem_write(start_ptr, &qword)?;
    ctx.proxy.mem_read(SCRATCH_AUX, &mut qword)?;
    ctx.core.mem_write(size_ptr, &qword)?;
    Ok(status)
}
