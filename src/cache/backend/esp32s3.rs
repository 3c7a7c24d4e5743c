//! ESP32-S3 SoC cache 控制器后端
//!
//! ESP32-S3 的 cache 由 SoC 的 cache 控制器管理 (外部 Flash / PSRAM 映射)，
//! 操作通过芯片 ROM 中的函数完成，符号由 esp-hal 的 ROM 链接脚本提供。
//!
//! - 区间写回 / 丢弃: `Cache_WriteBack_Addr` / `Cache_Invalidate_Addr`
//! - 整体: `Cache_WriteBack_All` / `Cache_Invalidate_DCache_All`
//! - 指令 cache: `Cache_Invalidate_ICache_Items` / `Cache_Invalidate_ICache_All`
//! - 开关: `Cache_Disable_*` 返回 autoload 配置，`Cache_Enable_*` 恢复它
//!
//! 关闭 cache 期间不能从 Flash 取指，开关函数放在 IRAM。

use esp_hal::ram;
use portable_atomic::{AtomicU32, Ordering};

use super::CacheBackend;
use crate::cache::{CacheDomain, CacheError, CacheResult};
use crate::config;

extern "C" {
    fn Cache_WriteBack_Addr(addr: u32, size: u32) -> i32;
    fn Cache_Invalidate_Addr(addr: u32, size: u32) -> i32;
    fn Cache_WriteBack_All();
    fn Cache_Invalidate_DCache_All() -> i32;
    fn Cache_Invalidate_ICache_All() -> i32;
    fn Cache_Invalidate_ICache_Items(addr: u32, items: u32) -> i32;
    fn Cache_Disable_DCache() -> u32;
    fn Cache_Enable_DCache(autoload: u32);
    fn Cache_Disable_ICache() -> u32;
    fn Cache_Enable_ICache(autoload: u32);
    fn Cache_Get_DCache_Line_Size() -> u32;
    fn Cache_Get_ICache_Line_Size() -> u32;
}

/// 关闭时保存的 autoload 配置，打开时恢复
static DCACHE_AUTOLOAD: AtomicU32 = AtomicU32::new(0);
static ICACHE_AUTOLOAD: AtomicU32 = AtomicU32::new(0);

/// ESP32-S3 cache 控制器
pub struct Esp32s3;

/// ROM 返回 0 表示成功
#[inline(always)]
fn rom_result(code: i32) -> CacheResult {
    if code == 0 {
        Ok(())
    } else {
        Err(CacheError::NotSupported)
    }
}

#[ram]
fn enable_cache(domain: CacheDomain) {
    unsafe {
        match domain {
            CacheDomain::Data => Cache_Enable_DCache(DCACHE_AUTOLOAD.load(Ordering::Relaxed)),
            CacheDomain::Instruction => Cache_Enable_ICache(ICACHE_AUTOLOAD.load(Ordering::Relaxed)),
        }
    }
}

#[ram]
fn disable_cache(domain: CacheDomain) {
    unsafe {
        match domain {
            CacheDomain::Data => {
                Cache_WriteBack_All();
                DCACHE_AUTOLOAD.store(Cache_Disable_DCache(), Ordering::Relaxed);
            }
            CacheDomain::Instruction => {
                ICACHE_AUTOLOAD.store(Cache_Disable_ICache(), Ordering::Relaxed);
            }
        }
    }
}

/// 区间长度换算成 ROM 接口的 u32，超出 32 位地址空间的请求不支持
#[inline(always)]
fn rom_span(addr: usize, size: usize) -> Result<(u32, u32), CacheError> {
    let addr = u32::try_from(addr).map_err(|_| CacheError::NotSupported)?;
    let size = u32::try_from(size).map_err(|_| CacheError::NotSupported)?;
    Ok((addr, size))
}

impl CacheBackend for Esp32s3 {
    const HAS_DCACHE: bool = cfg!(feature = "dcache");
    const HAS_ICACHE: bool = cfg!(feature = "icache");
    // 二级引导程序映射 Flash / PSRAM 时已经打开两个 cache
    const ENABLED_AT_BOOT: bool = true;

    #[inline(always)]
    fn enable(domain: CacheDomain) {
        enable_cache(domain);
    }

    #[inline(always)]
    fn disable(domain: CacheDomain) {
        disable_cache(domain);
    }

    fn flush_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                unsafe { Cache_WriteBack_All() };
                Ok(())
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    unsafe fn invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => rom_result(Cache_Invalidate_DCache_All()),
            CacheDomain::Instruction => rom_result(Cache_Invalidate_ICache_All()),
        }
    }

    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult {
        match domain {
            CacheDomain::Data => unsafe {
                Cache_WriteBack_All();
                rom_result(Cache_Invalidate_DCache_All())
            },
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                let (addr, size) = rom_span(addr, size)?;
                rom_result(unsafe { Cache_WriteBack_Addr(addr, size) })
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        let (start, len) = rom_span(addr, size)?;
        match domain {
            CacheDomain::Data => rom_result(Cache_Invalidate_Addr(start, len)),
            CacheDomain::Instruction => {
                let line = Self::detect_line_size(domain).unwrap_or(config::ICACHE_LINE_SIZE);
                if line == 0 {
                    return Err(CacheError::NotSupported);
                }
                let (first, end) = super::line_span(addr, size, line);
                let items = ((end - first) / line) as u32;
                rom_result(Cache_Invalidate_ICache_Items(first as u32, items))
            }
        }
    }

    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        match domain {
            CacheDomain::Data => {
                let (addr, size) = rom_span(addr, size)?;
                unsafe {
                    rom_result(Cache_WriteBack_Addr(addr, size))?;
                    rom_result(Cache_Invalidate_Addr(addr, size))
                }
            }
            CacheDomain::Instruction => Err(CacheError::NotSupported),
        }
    }

    fn detect_line_size(domain: CacheDomain) -> Option<usize> {
        let line = match domain {
            CacheDomain::Data if cfg!(feature = "dcache-line-size-detect") => unsafe {
                Cache_Get_DCache_Line_Size()
            },
            CacheDomain::Instruction if cfg!(feature = "icache-line-size-detect") => unsafe {
                Cache_Get_ICache_Line_Size()
            },
            _ => return None,
        };
        Some(line as usize)
    }
}
