//! 数据 cache 区间维护的系统调用处理
//!
//! 非特权线程做非一致 DMA 时需要维护 cache，这里在执行特权实现之前
//! 校验调用者对区间的写权限。
//!
//! # 校验
//!
//! - 区间必须完整落在调用者内存域的某一个可写分区内
//! - invalidate 会丢弃整条 line，所以校验并丢弃的是向外扩展到 line 边界后的
//!   区间，调用者无法借此丢弃分区外的数据
//! - 长度为 0 不访问内存，直接返回成功
//!
//! 校验失败返回 [`SyscallError::AccessFault`]，不执行任何 cache 指令。

use super::domain::AccessPolicy;
use super::{SyscallArgs, SyscallError, SyscallResult};
use crate::cache::backend::line_span;
use crate::cache::{Cache, CacheBackend, CacheDomain, CacheError};
use crate::util::log::{log_trace, log_warn};

impl From<CacheError> for SyscallError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotSupported => SyscallError::NotSupported,
        }
    }
}

/// 特权边界: 调用者的权限 + 实际执行操作的 cache
pub struct Boundary<'a, B: CacheBackend, P: AccessPolicy> {
    cache: &'a Cache<B>,
    policy: &'a P,
}

impl<'a, B: CacheBackend, P: AccessPolicy> Boundary<'a, B, P> {
    pub const fn new(cache: &'a Cache<B>, policy: &'a P) -> Self {
        Self { cache, policy }
    }

    fn validate(&self, addr: usize, size: usize) -> Result<(), SyscallError> {
        if self.policy.can_write(addr, size) {
            Ok(())
        } else {
            log_warn!("cache op on {:#x}+{} outside caller's memory", addr, size);
            Err(SyscallError::AccessFault)
        }
    }

    /// 写回区间
    pub fn data_flush_range(&self, addr: usize, size: usize) -> SyscallResult {
        if size == 0 {
            return Ok(0);
        }
        self.validate(addr, size)?;
        log_trace!("sys flush {:#x}+{}", addr, size);
        self.cache.flush_range(CacheDomain::Data, addr as *const u8, size)?;
        Ok(0)
    }

    /// 丢弃区间
    pub fn data_invd_range(&self, addr: usize, size: usize) -> SyscallResult {
        if size == 0 {
            return Ok(0);
        }
        let end = addr.checked_add(size).ok_or(SyscallError::AccessFault)?;
        let line = self.cache.line_size(CacheDomain::Data);
        let (start, end) = if line == 0 { (addr, end) } else { line_span(addr, size, line) };
        let span = end.saturating_sub(start);
        self.validate(start, span)?;
        log_trace!("sys invd {:#x}+{}", start, span);
        // Safety: 扩展后的区间按 line 对齐，且全部在调用者可写的分区内
        unsafe { self.cache.invd_range(CacheDomain::Data, start as *const u8, span)? };
        Ok(0)
    }

    /// 写回并丢弃区间
    pub fn data_flush_and_invd_range(&self, addr: usize, size: usize) -> SyscallResult {
        if size == 0 {
            return Ok(0);
        }
        self.validate(addr, size)?;
        log_trace!("sys flush+invd {:#x}+{}", addr, size);
        self.cache
            .flush_and_invd_range(CacheDomain::Data, addr as *const u8, size)?;
        Ok(0)
    }
}

/// 处理 DataFlushRange 系统调用
///
/// - arg0: 缓冲区地址
/// - arg1: 长度 (字节)
pub fn handle_data_flush_range<B: CacheBackend, P: AccessPolicy>(
    boundary: &Boundary<'_, B, P>,
    args: &SyscallArgs,
) -> SyscallResult {
    boundary.data_flush_range(args.arg0, args.arg1)
}

/// 处理 DataInvdRange 系统调用
pub fn handle_data_invd_range<B: CacheBackend, P: AccessPolicy>(
    boundary: &Boundary<'_, B, P>,
    args: &SyscallArgs,
) -> SyscallResult {
    boundary.data_invd_range(args.arg0, args.arg1)
}

/// 处理 DataFlushAndInvdRange 系统调用
pub fn handle_data_flush_and_invd_range<B: CacheBackend, P: AccessPolicy>(
    boundary: &Boundary<'_, B, P>,
    args: &SyscallArgs,
) -> SyscallResult {
    boundary.data_flush_and_invd_range(args.arg0, args.arg1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::{take_calls, Call, Mock};
    use crate::mem::placement::CacheLineAligned;
    use crate::syscall::domain::{MemoryDomain, Partition, Supervisor};

    const SIZE: usize = 4096;

    type DataCache = Cache<Mock<true, false>>;

    fn owned_domain(buf: &[u8]) -> MemoryDomain<2> {
        let mut domain = MemoryDomain::new();
        domain.add_partition(Partition::writable(buf)).unwrap();
        domain
    }

    #[test]
    fn test_owned_memory_is_maintained() {
        let cache = DataCache::new();
        let user = CacheLineAligned([0u8; SIZE]);
        let domain = owned_domain(&user.0);
        let boundary = Boundary::new(&cache, &domain);
        let addr = user.0.as_ptr() as usize;

        assert_eq!(boundary.data_flush_range(addr, SIZE), Ok(0));
        assert_eq!(boundary.data_invd_range(addr, SIZE), Ok(0));
        assert_eq!(boundary.data_flush_and_invd_range(addr, SIZE), Ok(0));

        assert_eq!(
            take_calls(),
            [
                Call::Flush(CacheDomain::Data, addr, SIZE),
                Call::Invd(CacheDomain::Data, addr, SIZE),
                Call::FlushAndInvd(CacheDomain::Data, addr, SIZE),
            ]
        );
    }

    #[test]
    fn test_foreign_memory_faults_without_cache_ops() {
        let cache = DataCache::new();
        let user = CacheLineAligned([0u8; 256]);
        let foreign = CacheLineAligned([0u8; 256]);
        let domain = owned_domain(&user.0);
        let boundary = Boundary::new(&cache, &domain);
        let addr = foreign.0.as_ptr() as usize;

        assert_eq!(boundary.data_flush_range(addr, 256), Err(SyscallError::AccessFault));
        assert_eq!(boundary.data_invd_range(addr, 256), Err(SyscallError::AccessFault));
        assert_eq!(
            boundary.data_flush_and_invd_range(addr, 256),
            Err(SyscallError::AccessFault)
        );
        // 部分越界同样拒绝
        let own = user.0.as_ptr() as usize;
        assert_eq!(boundary.data_flush_range(own + 128, 256), Err(SyscallError::AccessFault));

        assert!(take_calls().is_empty());
    }

    #[repr(C, align(256))]
    struct Lines([u8; 256]);

    #[test]
    fn test_invalidate_checks_whole_lines() {
        const LINE: usize = 64;
        let cache: Cache<Mock<true, false, LINE>> = Cache::new();
        let user = Lines([0u8; 256]);
        // 分区从 line 中间开始，丢弃第一条 line 会波及分区外的数据
        let domain = owned_domain(&user.0[LINE / 2..]);
        let boundary = Boundary::new(&cache, &domain);
        let base = user.0.as_ptr() as usize;
        let addr = base + LINE / 2;

        assert_eq!(boundary.data_flush_range(addr, 8), Ok(0));
        assert_eq!(boundary.data_invd_range(addr, 8), Err(SyscallError::AccessFault));

        // 分区内的非对齐请求按整条 line 丢弃
        assert_eq!(boundary.data_invd_range(base + LINE + 4, 8), Ok(0));
        assert_eq!(
            take_calls(),
            [
                Call::Flush(CacheDomain::Data, addr, 8),
                Call::Invd(CacheDomain::Data, base + LINE, LINE),
            ]
        );
    }

    #[test]
    fn test_zero_length_and_missing_cache() {
        let cache = DataCache::new();
        let user = CacheLineAligned([0u8; 64]);
        let domain = owned_domain(&user.0);
        let boundary = Boundary::new(&cache, &domain);
        assert_eq!(boundary.data_flush_range(0xDEAD_0000, 0), Ok(0));
        assert!(take_calls().is_empty());

        let absent: Cache<Mock<false, false>> = Cache::new();
        let boundary = Boundary::new(&absent, &Supervisor);
        assert_eq!(
            boundary.data_flush_range(user.0.as_ptr() as usize, 64),
            Err(SyscallError::NotSupported)
        );
    }

    #[test]
    fn test_handlers_decode_arguments() {
        let cache = DataCache::new();
        let boundary = Boundary::new(&cache, &Supervisor);
        let args = SyscallArgs { arg0: 0x8000, arg1: 64 };
        assert_eq!(handle_data_flush_range(&boundary, &args), Ok(0));
        assert_eq!(handle_data_flush_and_invd_range(&boundary, &args), Ok(0));
        assert_eq!(handle_data_invd_range(&boundary, &args), Ok(0));
        assert_eq!(take_calls().len(), 3);
    }
}
