//! Xtensa 原生 cache 指令后端
//!
//! - 按地址: `dhwb` (写回) / `dhi` (丢弃) / `dhwbi` (写回并丢弃) / `ihi`
//! - 按索引: `diwb` / `dii` / `diwbi` / `iii`，遍历整个 cache
//!
//! 按索引的整体操作需要知道 cache 容量 (`RUSTRTOS_DCACHE_SIZE` /
//! `RUSTRTOS_ICACHE_SIZE`)，为 0 时返回 `NotSupported`。
//! 指令 cache 不会有脏行，写回类操作不支持。
//! Xtensa 上 cache 在复位后由硬件/ROM 打开，enable / disable 不操作硬件。

use core::arch::asm;

use super::{for_each_line, CacheBackend};
use crate::cache::{CacheDomain, CacheError, CacheResult};
use crate::config;

/// Xtensa LX 核内 cache
pub struct Xtensa;

#[inline(always)]
fn dcache_line() -> usize {
    config::DCACHE_LINE_SIZE
}

#[inline(always)]
fn icache_line() -> usize {
    config::ICACHE_LINE_SIZE
}

#[inline(always)]
fn sync() {
    unsafe { asm!("sync", options(nostack, preserves_flags)) };
}

#[inline(always)]
fn isync() {
    unsafe { asm!("isync", options(nostack, preserves_flags)) };
}

/// 按索引遍历整个 cache，`total` 或 `line` 为 0 时不支持
#[inline(always)]
fn for_each_index(total: usize, line: usize, mut op: impl FnMut(usize)) -> CacheResult {
    if total == 0 || line == 0 {
        return Err(CacheError::NotSupported);
    }
    let mut index = 0;
    while index < total {
        op(index);
        index += line;
    }
    Ok(())
}

#[inline(always)]
fn by_address(line: usize, addr: usize, size: usize, op: impl FnMut(usize)) -> CacheResult {
    if line == 0 {
        return Err(CacheError::NotSupported);
    }
    for_each_line(addr, size, line, op);
    Ok(())
}

impl CacheBackend for Xtensa {
    const HAS_DCACHE: bool = cfg!(feature = "dcache");
    const HAS_ICACHE: bool = cfg!(feature = "icache");
    // 开关在这里是空操作，cache 一直处于打开状态
    const ENABLED_AT_BOOT: bool = true;

    #[inline(always)]
    fn enable(_domain: CacheDomain) {}

    #[inline(always)]
    fn disable(_domain: CacheDomain) {}

    fn flush_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                for_each_index(config::DCACHE_SIZE, dcache_line(), |index| unsafe {
                    asm!("diwb {0}, 0", in(reg) index, options(nostack, preserves_flags));
                })?;
                sync();
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    unsafe fn invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                for_each_index(config::DCACHE_SIZE, dcache_line(), |index| unsafe {
                    asm!("dii {0}, 0", in(reg) index, options(nostack, preserves_flags));
                })?;
                sync();
            }
            CacheDomain::Instruction => {
                for_each_index(config::ICACHE_SIZE, icache_line(), |index| unsafe {
                    asm!("iii {0}, 0", in(reg) index, options(nostack, preserves_flags));
                })?;
                isync();
            }
        }
        Ok(())
    }

    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                for_each_index(config::DCACHE_SIZE, dcache_line(), |index| unsafe {
                    asm!("diwbi {0}, 0", in(reg) index, options(nostack, preserves_flags));
                })?;
                sync();
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                by_address(dcache_line(), addr, size, |line| unsafe {
                    asm!("dhwb {0}, 0", in(reg) line, options(nostack, preserves_flags));
                })?;
                sync();
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                by_address(dcache_line(), addr, size, |line| unsafe {
                    asm!("dhi {0}, 0", in(reg) line, options(nostack, preserves_flags));
                })?;
                sync();
            }
            CacheDomain::Instruction => {
                by_address(icache_line(), addr, size, |line| unsafe {
                    asm!("ihi {0}, 0", in(reg) line, options(nostack, preserves_flags));
                })?;
                isync();
            }
        }
        Ok(())
    }

    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                by_address(dcache_line(), addr, size, |line| unsafe {
                    asm!("dhwbi {0}, 0", in(reg) line, options(nostack, preserves_flags));
                })?;
                sync();
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }
}
