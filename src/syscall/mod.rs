//! 非特权上下文的 cache 系统调用入口
//!
//! 内核的系统调用分发器把 cache 相关的调用号交给 [`dispatch`]，
//! 参数约定:
//! - 调用号: [`CacheSyscall`]
//! - arg0: 缓冲区地址
//! - arg1: 长度 (字节)
//! - 返回值: 0 成功，负数为 [`SyscallError`]
//!
//! 只有数据 cache 的区间操作对非特权线程开放。

pub mod cache_ops;
pub mod domain;

pub use cache_ops::Boundary;
pub use domain::{AccessPolicy, DomainError, MemoryDomain, Partition, PartitionAccess, Supervisor};

use crate::cache::CacheBackend;
use crate::util::log::{log_trace, log_warn};

/// 系统调用错误 (取负的 errno)
#[repr(isize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum SyscallError {
    /// 区间超出调用者可访问的内存 (EFAULT)
    AccessFault = -14,
    /// 未知调用号 (ENOSYS)
    InvalidSyscall = -88,
    /// 对应 cache 在构建中不存在 (ENOTSUP)
    NotSupported = -134,
}

impl SyscallError {
    #[inline]
    pub const fn as_isize(self) -> isize {
        self as isize
    }

    /// 日志用名称
    pub const fn name(self) -> &'static str {
        match self {
            Self::AccessFault => "AccessFault",
            Self::InvalidSyscall => "InvalidSyscall",
            Self::NotSupported => "NotSupported",
        }
    }
}

/// 系统调用结果
pub type SyscallResult = Result<usize, SyscallError>;

/// 转换成寄存器返回值
pub fn to_return_value(result: SyscallResult) -> isize {
    match result {
        Ok(v) => v as isize,
        Err(e) => e.as_isize(),
    }
}

/// 从寄存器取出的参数
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub arg0: usize,
    pub arg1: usize,
}

/// cache 系统调用号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum CacheSyscall {
    DataFlushRange = 0x60,
    DataInvdRange = 0x61,
    DataFlushAndInvdRange = 0x62,
}

impl CacheSyscall {
    pub const fn name(self) -> &'static str {
        match self {
            Self::DataFlushRange => "DataFlushRange",
            Self::DataInvdRange => "DataInvdRange",
            Self::DataFlushAndInvdRange => "DataFlushAndInvdRange",
        }
    }
}

impl TryFrom<usize> for CacheSyscall {
    type Error = SyscallError;

    fn try_from(num: usize) -> Result<Self, Self::Error> {
        match num {
            0x60 => Ok(Self::DataFlushRange),
            0x61 => Ok(Self::DataInvdRange),
            0x62 => Ok(Self::DataFlushAndInvdRange),
            _ => Err(SyscallError::InvalidSyscall),
        }
    }
}

/// 分发一个 cache 系统调用
pub fn dispatch<B: CacheBackend, P: AccessPolicy>(
    boundary: &Boundary<'_, B, P>,
    num: usize,
    args: &SyscallArgs,
) -> SyscallResult {
    let syscall = match CacheSyscall::try_from(num) {
        Ok(s) => s,
        Err(err) => {
            log_warn!("Invalid cache syscall number: {}", num);
            return Err(err);
        }
    };

    log_trace!("Syscall: {} (a0={:#x}, a1={:#x})", syscall.name(), args.arg0, args.arg1);

    let result = match syscall {
        CacheSyscall::DataFlushRange => cache_ops::handle_data_flush_range(boundary, args),
        CacheSyscall::DataInvdRange => cache_ops::handle_data_invd_range(boundary, args),
        CacheSyscall::DataFlushAndInvdRange => cache_ops::handle_data_flush_and_invd_range(boundary, args),
    };

    if let Err(err) = result {
        log_warn!("Syscall {} failed: {}", syscall.name(), err.name());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::{take_calls, Call, Mock};
    use crate::cache::{Cache, CacheDomain};

    #[test]
    fn test_syscall_numbers_round_trip() {
        for syscall in [
            CacheSyscall::DataFlushRange,
            CacheSyscall::DataInvdRange,
            CacheSyscall::DataFlushAndInvdRange,
        ] {
            assert_eq!(CacheSyscall::try_from(syscall as usize), Ok(syscall));
        }
        assert_eq!(CacheSyscall::try_from(0x5F), Err(SyscallError::InvalidSyscall));
    }

    #[test]
    fn test_dispatch_routes_and_reports() {
        let cache: Cache<Mock<true, false>> = Cache::new();
        let mut domain: MemoryDomain<1> = MemoryDomain::new();
        domain
            .add_partition(Partition::new(0x2000_0000, 0x1000, PartitionAccess::ReadWrite))
            .unwrap();
        let boundary = Boundary::new(&cache, &domain);

        let owned = SyscallArgs { arg0: 0x2000_0000, arg1: 0x100 };
        let foreign = SyscallArgs { arg0: 0x3000_0000, arg1: 0x100 };

        assert_eq!(dispatch(&boundary, 0x60, &owned), Ok(0));
        assert_eq!(
            dispatch(&boundary, 0x62, &foreign),
            Err(SyscallError::AccessFault)
        );
        assert_eq!(dispatch(&boundary, 0x99, &owned), Err(SyscallError::InvalidSyscall));

        assert_eq!(take_calls(), [Call::Flush(CacheDomain::Data, 0x2000_0000, 0x100)]);
    }

    #[test]
    fn test_return_values() {
        assert_eq!(to_return_value(Ok(0)), 0);
        assert_eq!(to_return_value(Err(SyscallError::AccessFault)), -14);
        assert_eq!(to_return_value(Err(SyscallError::NotSupported)), -134);
    }
}
