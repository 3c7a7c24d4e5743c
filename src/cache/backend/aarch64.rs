//! AArch64 原生 cache 指令后端 (EL1)
//!
//! # 指令
//! - 按地址 (到 PoC): `dc cvac` 写回，`dc ivac` 丢弃，`dc civac` 写回并丢弃
//! - 整体: 通过 CLIDR_EL1 / CCSIDR_EL1 遍历每一级数据 cache 的 set/way，
//!   使用 `dc csw` / `dc isw` / `dc cisw`
//! - 指令 cache: `ic ivau` (按地址)，`ic iallu` (整体)
//!
//! 区间操作的步长总是来自 CTR_EL0 (硬件的最小 line)，与 feature 无关；
//! `*-line-size-detect` 只决定 [`CacheBackend::detect_line_size`] 是否上报。

use core::arch::asm;

use portable_atomic::{AtomicUsize, Ordering};

use super::{for_each_line, CacheBackend};
use crate::cache::{CacheDomain, CacheError, CacheResult};

/// SCTLR_EL1.C: 数据 cache 使能
const SCTLR_C: u64 = 1 << 2;
/// SCTLR_EL1.I: 指令 cache 使能
const SCTLR_I: u64 = 1 << 12;

/// CTR_EL0 读出的 line 大小，0 表示尚未读取
static DCACHE_LINE: AtomicUsize = AtomicUsize::new(0);
static ICACHE_LINE: AtomicUsize = AtomicUsize::new(0);

/// ARMv8-A 核内 cache
pub struct Aarch64;

#[inline(always)]
fn read_ctr() -> u64 {
    let ctr: u64;
    // SAFETY: CTR_EL0 只读，无副作用
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags)) };
    ctr
}

/// 硬件 line 大小 (字节)
///
/// CTR_EL0.DminLine [19:16] / IminLine [3:0] 是 log2(每行字数)，一字 4 字节。
fn hw_line_size(domain: CacheDomain) -> usize {
    let slot = match domain {
        CacheDomain::Data => &DCACHE_LINE,
        CacheDomain::Instruction => &ICACHE_LINE,
    };
    let cached = slot.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let ctr = read_ctr();
    let log2_words = match domain {
        CacheDomain::Data => (ctr >> 16) & 0xF,
        CacheDomain::Instruction => ctr & 0xF,
    };
    let line = 4usize << log2_words;
    slot.store(line, Ordering::Relaxed);
    line
}

#[inline(always)]
fn dsb_isb() {
    unsafe { asm!("dsb sy", "isb", options(nostack, preserves_flags)) };
}

#[derive(Clone, Copy)]
enum SetWayOp {
    Clean,
    Invalidate,
    CleanInvalidate,
}

/// 遍历到一致性点 (LoC) 为止的每一级数据 cache
fn dcache_set_way(op: SetWayOp) {
    let clidr: u64;
    unsafe { asm!("mrs {}, clidr_el1", out(reg) clidr, options(nomem, nostack, preserves_flags)) };
    let loc = (clidr >> 24) & 0x7;

    for level in 0..loc {
        // Ctype: 2 = 仅数据，3 = 分离，4 = 统一
        let ctype = (clidr >> (level * 3)) & 0x7;
        if ctype < 2 {
            continue;
        }

        let ccsidr: u64;
        unsafe {
            asm!(
                "msr csselr_el1, {sel}",
                "isb",
                "mrs {ccsidr}, ccsidr_el1",
                sel = in(reg) level << 1,
                ccsidr = out(reg) ccsidr,
                options(nostack, preserves_flags)
            );
        }

        let line_shift = (ccsidr & 0x7) + 4;
        let ways = ((ccsidr >> 3) & 0x3FF) + 1;
        let sets = ((ccsidr >> 13) & 0x7FFF) + 1;
        let way_shift = ((ways - 1) as u32).leading_zeros() as u64;

        for way in 0..ways {
            for set in 0..sets {
                let operand = (way << way_shift) | (set << line_shift) | (level << 1);
                unsafe {
                    match op {
                        SetWayOp::Clean => asm!("dc csw, {}", in(reg) operand, options(nostack)),
                        SetWayOp::Invalidate => asm!("dc isw, {}", in(reg) operand, options(nostack)),
                        SetWayOp::CleanInvalidate => {
                            asm!("dc cisw, {}", in(reg) operand, options(nostack))
                        }
                    }
                }
            }
        }
    }

    dsb_isb();
}

impl CacheBackend for Aarch64 {
    const HAS_DCACHE: bool = cfg!(feature = "dcache");
    const HAS_ICACHE: bool = cfg!(feature = "icache");

    fn enable(domain: CacheDomain) {
        let bit = match domain {
            CacheDomain::Data => {
                // 打开前丢弃复位后残留的无效内容
                dcache_set_way(SetWayOp::Invalidate);
                SCTLR_C
            }
            CacheDomain::Instruction => {
                unsafe { asm!("ic iallu", options(nostack)) };
                dsb_isb();
                SCTLR_I
            }
        };
        unsafe {
            asm!(
                "mrs {tmp}, sctlr_el1",
                "orr {tmp}, {tmp}, {bit}",
                "msr sctlr_el1, {tmp}",
                "isb",
                tmp = out(reg) _,
                bit = in(reg) bit,
                options(nostack)
            );
        }
    }

    fn disable(domain: CacheDomain) {
        let bit = match domain {
            CacheDomain::Data => SCTLR_C,
            CacheDomain::Instruction => SCTLR_I,
        };
        unsafe {
            asm!(
                "mrs {tmp}, sctlr_el1",
                "bic {tmp}, {tmp}, {bit}",
                "msr sctlr_el1, {tmp}",
                "isb",
                tmp = out(reg) _,
                bit = in(reg) bit,
                options(nostack)
            );
        }
        if domain == CacheDomain::Data {
            // 关闭后把脏行全部写回
            dcache_set_way(SetWayOp::CleanInvalidate);
        }
    }

    fn flush_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                dcache_set_way(SetWayOp::Clean);
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    unsafe fn invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => dcache_set_way(SetWayOp::Invalidate),
            CacheDomain::Instruction => {
                asm!("ic iallu", options(nostack));
                dsb_isb();
            }
        }
        Ok(())
    }

    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                dcache_set_way(SetWayOp::CleanInvalidate);
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        if domain == CacheDomain::Instruction {
            return Err(CacheError::NotSupported);
        }
        for_each_line(addr, size, hw_line_size(domain), |line| unsafe {
            asm!("dc cvac, {}", in(reg) line, options(nostack));
        });
        unsafe { asm!("dsb sy", options(nostack, preserves_flags)) };
        Ok(())
    }

    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                for_each_line(addr, size, hw_line_size(domain), |line| unsafe {
                    asm!("dc ivac, {}", in(reg) line, options(nostack));
                });
                asm!("dsb sy", options(nostack, preserves_flags));
            }
            CacheDomain::Instruction => {
                for_each_line(addr, size, hw_line_size(domain), |line| unsafe {
                    asm!("ic ivau, {}", in(reg) line, options(nostack));
                });
                dsb_isb();
            }
        }
        Ok(())
    }

    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        if domain == CacheDomain::Instruction {
            return Err(CacheError::NotSupported);
        }
        for_each_line(addr, size, hw_line_size(domain), |line| unsafe {
            asm!("dc civac, {}", in(reg) line, options(nostack));
        });
        unsafe { asm!("dsb sy", options(nostack, preserves_flags)) };
        Ok(())
    }

    fn detect_line_size(domain: CacheDomain) -> Option<usize> {
        let detect = match domain {
            CacheDomain::Data => cfg!(feature = "dcache-line-size-detect"),
            CacheDomain::Instruction => cfg!(feature = "icache-line-size-detect"),
        };
        detect.then(|| hw_line_size(domain))
    }
}
