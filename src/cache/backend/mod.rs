//! Cache 后端解析
//!
//! 构建时恰好选定一个 cache 控制实现 (由 build.rs 根据 feature 生成
//! `cache_backend` cfg):
//!
//! | feature            | cfg                   | 实现                     |
//! |--------------------|-----------------------|--------------------------|
//! | `backend-external` | `external`            | [`external::External`]   |
//! | `backend-arch`     | `xtensa` / `aarch64`  | CPU 原生 cache 指令      |
//! | `backend-soc`      | `esp32s3`             | ESP32-S3 ROM cache 控制器 |
//! | (无)               | `stub`                | [`Stub`]                 |
//!
//! [`Active`] 是一个类型别名，所有调用都是静态分发并可内联，
//! 热路径上没有虚表或函数指针。

use super::{CacheDomain, CacheError, CacheResult};

#[cfg(cache_backend = "aarch64")]
pub mod aarch64;
#[cfg(cache_backend = "esp32s3")]
pub mod esp32s3;
#[cfg(cache_backend = "external")]
pub mod external;
#[cfg(cache_backend = "xtensa")]
pub mod xtensa;

/// 构建时选定的后端
#[cfg(cache_backend = "external")]
pub type Active = external::External;

/// 构建时选定的后端
#[cfg(cache_backend = "xtensa")]
pub type Active = xtensa::Xtensa;

/// 构建时选定的后端
#[cfg(cache_backend = "aarch64")]
pub type Active = aarch64::Aarch64;

/// 构建时选定的后端
#[cfg(cache_backend = "esp32s3")]
pub type Active = esp32s3::Esp32s3;

/// 构建时选定的后端
#[cfg(cache_backend = "stub")]
pub type Active = Stub;

/// Cache 控制实现
///
/// 所有方法都是关联函数 (无 `self`)，后端是零大小的类型标记。
/// 后端负责自身需要的屏障指令，保证操作效果在返回前对后续访存可见。
///
/// 区间参数 `addr` / `size` 已由上层过滤掉 `size == 0` 的情况。
pub trait CacheBackend {
    /// 数据 cache 是否编译进来
    const HAS_DCACHE: bool;
    /// 指令 cache 是否编译进来
    const HAS_ICACHE: bool;
    /// 复位后由 ROM / 引导程序打开的 cache，[`Cache`](super::Cache) 以此作为初始状态
    const ENABLED_AT_BOOT: bool = false;

    /// 打开 cache (硬件层面)
    fn enable(domain: CacheDomain);

    /// 关闭 cache (硬件层面)，关闭数据 cache 前需要写回脏行
    fn disable(domain: CacheDomain);

    /// 写回整个 cache
    fn flush_all(domain: CacheDomain) -> CacheResult;

    /// 丢弃整个 cache
    ///
    /// # Safety
    ///
    /// 所有未写回的数据都会丢失。
    unsafe fn invd_all(domain: CacheDomain) -> CacheResult;

    /// 写回并丢弃整个 cache
    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult;

    /// 写回区间内的 cache line
    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    /// 丢弃区间内的 cache line
    ///
    /// # Safety
    ///
    /// `addr` 和 `size` 必须按 line 对齐，否则共享边界 line 的数据会丢失。
    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    /// 写回并丢弃区间内的 cache line
    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    /// 运行时从硬件读取 line 大小，不支持时返回 `None`
    #[inline(always)]
    fn detect_line_size(_domain: CacheDomain) -> Option<usize> {
        None
    }
}

/// 空后端: 未选择任何实现时使用，所有操作返回 `NotSupported`
pub struct Stub;

impl CacheBackend for Stub {
    const HAS_DCACHE: bool = false;
    const HAS_ICACHE: bool = false;

    #[inline(always)]
    fn enable(_domain: CacheDomain) {}

    #[inline(always)]
    fn disable(_domain: CacheDomain) {}

    #[inline(always)]
    fn flush_all(_domain: CacheDomain) -> CacheResult {
        Err(CacheError::NotSupported)
    }

    #[inline(always)]
    unsafe fn invd_all(_domain: CacheDomain) -> CacheResult {
        Err(CacheError::NotSupported)
    }

    #[inline(always)]
    fn flush_and_invd_all(_domain: CacheDomain) -> CacheResult {
        Err(CacheError::NotSupported)
    }

    #[inline(always)]
    fn flush_range(_domain: CacheDomain, _addr: usize, _size: usize) -> CacheResult {
        Err(CacheError::NotSupported)
    }

    #[inline(always)]
    unsafe fn invd_range(_domain: CacheDomain, _addr: usize, _size: usize) -> CacheResult {
        Err(CacheError::NotSupported)
    }

    #[inline(always)]
    fn flush_and_invd_range(_domain: CacheDomain, _addr: usize, _size: usize) -> CacheResult {
        Err(CacheError::NotSupported)
    }
}

/// 把 `[addr, addr + size)` 扩展到完整的 cache line，返回 `(start, end)`
///
/// `line` 必须是 2 的幂。地址空间末尾的区间会饱和到 `usize::MAX & !(line - 1)`。
#[inline(always)]
pub(crate) fn line_span(addr: usize, size: usize, line: usize) -> (usize, usize) {
    let mask = line - 1;
    let start = addr & !mask;
    let end = addr.saturating_add(size).saturating_add(mask) & !mask;
    (start, end)
}

/// 对区间覆盖的每一条 cache line 调用 `op`
#[inline(always)]
pub(crate) fn for_each_line(addr: usize, size: usize, line: usize, mut op: impl FnMut(usize)) {
    let (start, end) = line_span(addr, size, line);
    let mut current = start;
    while current < end {
        op(current);
        current += line;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_span_rounds_outward() {
        assert_eq!(line_span(0x1000, 0x40, 32), (0x1000, 0x1040));
        assert_eq!(line_span(0x1004, 1, 32), (0x1000, 0x1020));
        assert_eq!(line_span(0x101F, 2, 32), (0x1000, 0x1040));
    }

    #[test]
    fn test_for_each_line_visits_every_line_once() {
        let mut lines = [0usize; 8];
        let mut count = 0;
        for_each_line(0x2010, 0x50, 32, |addr| {
            lines[count] = addr;
            count += 1;
        });
        assert_eq!(&lines[..count], &[0x2000, 0x2020, 0x2040, 0x2060]);
    }

    #[test]
    fn test_stub_reports_not_supported() {
        for domain in CacheDomain::ALL {
            assert_eq!(Stub::flush_all(domain), Err(CacheError::NotSupported));
            assert_eq!(Stub::flush_range(domain, 0x1000, 64), Err(CacheError::NotSupported));
            assert_eq!(
                unsafe { Stub::invd_range(domain, 0x1000, 64) },
                Err(CacheError::NotSupported)
            );
            assert_eq!(Stub::detect_line_size(domain), None);
        }
        assert!(!Stub::HAS_DCACHE);
        assert!(!Stub::HAS_ICACHE);
    }
}
