//! 外部 cache 外设后端
//!
//! cache 不在 CPU 内部，而是挂在总线上的独立外设 (例如 L2 控制器)。
//! 外设驱动位于本库之外，通过 [`set_cache_driver!`] 注册一次:
//!
//! ```rust,ignore
//! use rustrtos_cache::cache::backend::external::CacheDriver;
//!
//! struct L2Controller;
//!
//! impl CacheDriver for L2Controller {
//!     // ...
//! }
//!
//! rustrtos_cache::set_cache_driver!(L2Controller);
//! ```
//!
//! 宏生成一组 `#[no_mangle]` 符号，由本模块以 `extern "Rust"` 声明，
//! 在链接时解析。调用是直接调用，没有函数指针表。
//! 未注册驱动会在链接阶段报错。

use super::CacheBackend;
use crate::cache::{CacheDomain, CacheResult};

/// 外部 cache 外设驱动
///
/// 实现者负责自身的屏障和等待完成，返回时操作必须已对后续访存生效。
pub trait CacheDriver {
    /// 打开外设 cache
    fn enable(domain: CacheDomain);

    /// 关闭外设 cache
    fn disable(domain: CacheDomain);

    fn flush_all(domain: CacheDomain) -> CacheResult;

    /// # Safety
    ///
    /// 见 [`CacheBackend::invd_all`]。
    unsafe fn invd_all(domain: CacheDomain) -> CacheResult;

    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult;

    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    /// # Safety
    ///
    /// 见 [`CacheBackend::invd_range`]。
    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;

    /// 外设报告的 line 大小
    fn line_size(_domain: CacheDomain) -> Option<usize> {
        None
    }
}

extern "Rust" {
    fn _rustrtos_cache_enable(domain: CacheDomain);
    fn _rustrtos_cache_disable(domain: CacheDomain);
    fn _rustrtos_cache_flush_all(domain: CacheDomain) -> CacheResult;
    fn _rustrtos_cache_invd_all(domain: CacheDomain) -> CacheResult;
    fn _rustrtos_cache_flush_and_invd_all(domain: CacheDomain) -> CacheResult;
    fn _rustrtos_cache_flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;
    fn _rustrtos_cache_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;
    fn _rustrtos_cache_flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult;
    fn _rustrtos_cache_line_size(domain: CacheDomain) -> Option<usize>;
}

/// 注册外部 cache 驱动
///
/// 整个程序中只能调用一次，重复注册会产生重复符号的链接错误。
#[macro_export]
macro_rules! set_cache_driver {
    ($t:ty) => {
        const _: () = {
            use $crate::cache::backend::external::CacheDriver as _CacheDriver;
            use $crate::cache::{CacheDomain as _Domain, CacheResult as _Result};

            #[no_mangle]
            fn _rustrtos_cache_enable(domain: _Domain) {
                <$t as _CacheDriver>::enable(domain)
            }
            #[no_mangle]
            fn _rustrtos_cache_disable(domain: _Domain) {
                <$t as _CacheDriver>::disable(domain)
            }
            #[no_mangle]
            fn _rustrtos_cache_flush_all(domain: _Domain) -> _Result {
                <$t as _CacheDriver>::flush_all(domain)
            }
            #[no_mangle]
            unsafe fn _rustrtos_cache_invd_all(domain: _Domain) -> _Result {
                <$t as _CacheDriver>::invd_all(domain)
            }
            #[no_mangle]
            fn _rustrtos_cache_flush_and_invd_all(domain: _Domain) -> _Result {
                <$t as _CacheDriver>::flush_and_invd_all(domain)
            }
            #[no_mangle]
            fn _rustrtos_cache_flush_range(domain: _Domain, addr: usize, size: usize) -> _Result {
                <$t as _CacheDriver>::flush_range(domain, addr, size)
            }
            #[no_mangle]
            unsafe fn _rustrtos_cache_invd_range(domain: _Domain, addr: usize, size: usize) -> _Result {
                <$t as _CacheDriver>::invd_range(domain, addr, size)
            }
            #[no_mangle]
            fn _rustrtos_cache_flush_and_invd_range(domain: _Domain, addr: usize, size: usize) -> _Result {
                <$t as _CacheDriver>::flush_and_invd_range(domain, addr, size)
            }
            #[no_mangle]
            fn _rustrtos_cache_line_size(domain: _Domain) -> Option<usize> {
                <$t as _CacheDriver>::line_size(domain)
            }
        };
    };
}

/// 外部外设后端，转发到已注册的 [`CacheDriver`]
pub struct External;

impl CacheBackend for External {
    const HAS_DCACHE: bool = cfg!(feature = "dcache");
    const HAS_ICACHE: bool = cfg!(feature = "icache");

    #[inline(always)]
    fn enable(domain: CacheDomain) {
        unsafe { _rustrtos_cache_enable(domain) }
    }

    #[inline(always)]
    fn disable(domain: CacheDomain) {
        unsafe { _rustrtos_cache_disable(domain) }
    }

    #[inline(always)]
    fn flush_all(domain: CacheDomain) -> CacheResult {
        unsafe { _rustrtos_cache_flush_all(domain) }
    }

    #[inline(always)]
    unsafe fn invd_all(domain: CacheDomain) -> CacheResult {
        _rustrtos_cache_invd_all(domain)
    }

    #[inline(always)]
    fn flush_and_invd_all(domain: CacheDomain) -> CacheResult {
        unsafe { _rustrtos_cache_flush_and_invd_all(domain) }
    }

    #[inline(always)]
    fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        unsafe { _rustrtos_cache_flush_range(domain, addr, size) }
    }

    #[inline(always)]
    unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        _rustrtos_cache_invd_range(domain, addr, size)
    }

    #[inline(always)]
    fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
        unsafe { _rustrtos_cache_flush_and_invd_range(domain, addr, size) }
    }

    #[inline(always)]
    fn detect_line_size(domain: CacheDomain) -> Option<usize> {
        let detect = match domain {
            CacheDomain::Data => cfg!(feature = "dcache-line-size-detect"),
            CacheDomain::Instruction => cfg!(feature = "icache-line-size-detect"),
        };
        if detect {
            unsafe { _rustrtos_cache_line_size(domain) }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicUsize, Ordering};

    static FLUSHED: AtomicUsize = AtomicUsize::new(0);
    static INVALIDATED: AtomicUsize = AtomicUsize::new(0);

    struct TestDriver;

    impl CacheDriver for TestDriver {
        fn enable(_domain: CacheDomain) {}
        fn disable(_domain: CacheDomain) {}
        fn flush_all(_domain: CacheDomain) -> CacheResult {
            Ok(())
        }
        unsafe fn invd_all(_domain: CacheDomain) -> CacheResult {
            Ok(())
        }
        fn flush_and_invd_all(_domain: CacheDomain) -> CacheResult {
            Ok(())
        }
        fn flush_range(_domain: CacheDomain, _addr: usize, size: usize) -> CacheResult {
            FLUSHED.fetch_add(size, Ordering::Relaxed);
            Ok(())
        }
        unsafe fn invd_range(_domain: CacheDomain, _addr: usize, size: usize) -> CacheResult {
            INVALIDATED.fetch_add(size, Ordering::Relaxed);
            Ok(())
        }
        fn flush_and_invd_range(_domain: CacheDomain, _addr: usize, _size: usize) -> CacheResult {
            Ok(())
        }
        fn line_size(_domain: CacheDomain) -> Option<usize> {
            Some(64)
        }
    }

    crate::set_cache_driver!(TestDriver);

    #[test]
    fn test_calls_reach_registered_driver() {
        let before = FLUSHED.load(Ordering::Relaxed);
        assert_eq!(External::flush_range(CacheDomain::Data, 0x1000, 256), Ok(()));
        assert_eq!(FLUSHED.load(Ordering::Relaxed) - before, 256);

        let before = INVALIDATED.load(Ordering::Relaxed);
        assert_eq!(unsafe { External::invd_range(CacheDomain::Data, 0x1000, 64) }, Ok(()));
        assert_eq!(INVALIDATED.load(Ordering::Relaxed) - before, 64);
    }

    #[test]
    fn test_line_size_detection_follows_feature() {
        let expected = if cfg!(feature = "dcache-line-size-detect") {
            Some(64)
        } else {
            None
        };
        assert_eq!(External::detect_line_size(CacheDomain::Data), expected);
    }
}
