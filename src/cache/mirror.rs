//! 镜像内存地址转换
//!
//! 部分硬件把同一块物理内存映射两次: 一次经过 cache，一次绕过 cache。
//! 两个别名只差地址高 3 位 (512MB 区域编号)，转换是纯计算，不访问内存。
//!
//! 未启用 `mirrored-memory` 时转换是恒等映射，`is_cached` / `is_uncached`
//! 恒为 false。

use crate::config;

/// 区域编号所在的位
const REGION_SHIFT: u32 = 29;
const REGION_MASK: usize = 0x7 << REGION_SHIFT;

/// cached / uncached 区域对
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorMap {
    cached: usize,
    uncached: usize,
}

impl MirrorMap {
    /// 两个区域编号必须不同且小于 8
    pub const fn new(cached: usize, uncached: usize) -> Self {
        assert!(cached < 8 && uncached < 8 && cached != uncached);
        Self { cached, uncached }
    }

    /// 构建时配置的区域对
    pub const fn configured() -> Self {
        Self::new(config::CACHED_REGION, config::UNCACHED_REGION)
    }

    #[inline(always)]
    const fn region_of(addr: usize) -> usize {
        (addr & REGION_MASK) >> REGION_SHIFT
    }

    #[inline(always)]
    const fn with_region(addr: usize, region: usize) -> usize {
        (addr & !REGION_MASK) | (region << REGION_SHIFT)
    }

    /// 地址是否落在 cached 别名区域
    #[inline]
    pub fn is_cached<T>(&self, ptr: *const T) -> bool {
        Self::region_of(ptr.addr()) == self.cached
    }

    /// 地址是否落在 uncached 别名区域
    #[inline]
    pub fn is_uncached<T>(&self, ptr: *const T) -> bool {
        Self::region_of(ptr.addr()) == self.uncached
    }

    /// uncached 别名转成 cached 别名，其他地址原样返回
    #[inline]
    pub fn to_cached<T>(&self, ptr: *mut T) -> *mut T {
        if self.is_uncached(ptr) {
            ptr.map_addr(|addr| Self::with_region(addr, self.cached))
        } else {
            ptr
        }
    }

    /// cached 别名转成 uncached 别名，其他地址原样返回
    #[inline]
    pub fn to_uncached<T>(&self, ptr: *mut T) -> *mut T {
        if self.is_cached(ptr) {
            ptr.map_addr(|addr| Self::with_region(addr, self.uncached))
        } else {
            ptr
        }
    }
}

/// 构建时配置的区域对，仅在 `mirrored-memory` 下生效
const MAP: MirrorMap = MirrorMap::configured();

/// 指针是否位于经过 cache 的别名区域
#[inline]
pub fn is_cached<T>(ptr: *const T) -> bool {
    cfg!(feature = "mirrored-memory") && MAP.is_cached(ptr)
}

/// 指针是否位于绕过 cache 的别名区域
#[inline]
pub fn is_uncached<T>(ptr: *const T) -> bool {
    cfg!(feature = "mirrored-memory") && MAP.is_uncached(ptr)
}

/// 返回同一对象经过 cache 的别名
#[inline]
pub fn to_cached<T>(ptr: *mut T) -> *mut T {
    if cfg!(feature = "mirrored-memory") {
        MAP.to_cached(ptr)
    } else {
        ptr
    }
}

/// 返回同一对象绕过 cache 的别名
///
/// 通过该别名的访问对所有核与 DMA 一致，但每次访问都走总线。
#[inline]
pub fn to_uncached<T>(ptr: *mut T) -> *mut T {
    if cfg!(feature = "mirrored-memory") {
        MAP.to_uncached(ptr)
    } else {
        ptr
    }
}

/// 通过该指针的访问是否天然一致 (无需 cache 维护)
///
/// 有镜像内存时，uncached 别名是一致的；否则只有在没有数据 cache 时才一致。
#[cfg(feature = "mem-coherence")]
#[inline]
pub fn is_mem_coherent<T>(ptr: *const T) -> bool {
    if cfg!(feature = "mirrored-memory") {
        is_uncached(ptr)
    } else {
        !super::global().is_present(super::CacheDomain::Data)
    }
}
