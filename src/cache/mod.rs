//! Cache 控制 API
//!
//! 数据 cache 与指令 cache 两个域，每个域提供:
//! enable / disable / is_enabled、整体 flush / invd / flush_and_invd、
//! 区间 flush / invd / flush_and_invd，以及 line 大小查询。
//!
//! # 语义
//!
//! - flush: 把脏行写回内存，不丢弃。多刷一条共享 line 是安全的
//! - invd: 丢弃 cache 内容，未写回的数据丢失。区间必须按 line 对齐，
//!   因此是 `unsafe fn`
//! - flush_and_invd: 先写回再丢弃，两步对当前核有序
//!
//! 所有操作要么返回 `Ok(())`，要么返回 [`CacheError::NotSupported`]
//! (后端未选择或对应域未启用)。
//!
//! # 使用
//!
//! ```rust,ignore
//! use rustrtos_cache::cache;
//!
//! // 外设读取缓冲区前
//! cache::data_flush_range(buf.as_ptr(), buf.len())?;
//!
//! // 外设写入缓冲区后
//! unsafe { cache::data_invd_range(buf.as_ptr(), buf.len())? };
//! ```

use core::marker::PhantomData;

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config;
use crate::util::log::{log_debug, log_trace, log_warn};

pub mod backend;
pub mod mirror;

pub use backend::{Active, CacheBackend};

/// Cache 域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CacheDomain {
    /// 数据 cache
    Data,
    /// 指令 cache
    Instruction,
}

impl CacheDomain {
    /// 全部域
    pub const ALL: [CacheDomain; 2] = [CacheDomain::Data, CacheDomain::Instruction];

    /// 编译期配置的 line 大小
    pub const fn configured_line_size(self) -> usize {
        match self {
            CacheDomain::Data => config::DCACHE_LINE_SIZE,
            CacheDomain::Instruction => config::ICACHE_LINE_SIZE,
        }
    }
}

/// Cache 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CacheError {
    /// 后端未选择，或该域在构建时被排除
    NotSupported,
}

/// Cache 操作结果
pub type CacheResult = Result<(), CacheError>;

/// 单个域的运行时状态
struct DomainState {
    enabled: AtomicBool,
    /// 运行时探测到的 line 大小，0 表示尚未探测
    detected_line: AtomicUsize,
}

impl DomainState {
    const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            detected_line: AtomicUsize::new(0),
        }
    }
}

/// Cache 控制器
///
/// 状态 (开关标志、探测到的 line 大小) 与后端 `B` 绑定在一起。
/// 内核使用全局实例 [`global()`]，其后端是构建时选定的 [`Active`]。
pub struct Cache<B: CacheBackend> {
    data: DomainState,
    instr: DomainState,
    _backend: PhantomData<fn() -> B>,
}

impl<B: CacheBackend> Cache<B> {
    /// 创建控制器，初始开关状态取自后端的 [`CacheBackend::ENABLED_AT_BOOT`]
    pub const fn new() -> Self {
        Self {
            data: DomainState::new(B::ENABLED_AT_BOOT && B::HAS_DCACHE),
            instr: DomainState::new(B::ENABLED_AT_BOOT && B::HAS_ICACHE),
            _backend: PhantomData,
        }
    }

    /// 该域是否编译进来
    #[inline(always)]
    pub const fn is_present(&self, domain: CacheDomain) -> bool {
        match domain {
            CacheDomain::Data => B::HAS_DCACHE,
            CacheDomain::Instruction => B::HAS_ICACHE,
        }
    }

    #[inline(always)]
    fn state(&self, domain: CacheDomain) -> &DomainState {
        match domain {
            CacheDomain::Data => &self.data,
            CacheDomain::Instruction => &self.instr,
        }
    }

    #[inline(always)]
    fn require(&self, domain: CacheDomain) -> CacheResult {
        if self.is_present(domain) {
            Ok(())
        } else {
            Err(CacheError::NotSupported)
        }
    }

    /// 打开 cache
    pub fn enable(&self, domain: CacheDomain) -> CacheResult {
        self.require(domain)?;
        critical_section::with(|_| {
            B::enable(domain);
            self.state(domain).enabled.store(true, Ordering::Release);
        });
        log_debug!("cache enabled: {:?}", domain);
        Ok(())
    }

    /// 关闭 cache
    pub fn disable(&self, domain: CacheDomain) -> CacheResult {
        self.require(domain)?;
        critical_section::with(|_| {
            B::disable(domain);
            self.state(domain).enabled.store(false, Ordering::Release);
        });
        log_debug!("cache disabled: {:?}", domain);
        Ok(())
    }

    /// 查询开关状态，域不存在时恒为 false
    ///
    /// 返回的是启动状态加上经由本 API 的开关结果，不读取硬件寄存器。
    /// 绕过本 API 直接改写 cache 控制寄存器的代码不会反映在这里。
    #[inline]
    pub fn is_enabled(&self, domain: CacheDomain) -> bool {
        self.is_present(domain) && self.state(domain).enabled.load(Ordering::Acquire)
    }

    /// 写回整个 cache
    #[inline]
    pub fn flush_all(&self, domain: CacheDomain) -> CacheResult {
        self.require(domain)?;
        B::flush_all(domain)
    }

    /// 丢弃整个 cache
    ///
    /// # Safety
    ///
    /// 所有尚未写回的修改都会丢失，包括栈和其他任务的数据。
    #[inline]
    pub unsafe fn invd_all(&self, domain: CacheDomain) -> CacheResult {
        self.require(domain)?;
        B::invd_all(domain)
    }

    /// 写回并丢弃整个 cache
    #[inline]
    pub fn flush_and_invd_all(&self, domain: CacheDomain) -> CacheResult {
        self.require(domain)?;
        B::flush_and_invd_all(domain)
    }

    /// 写回区间 `[addr, addr + size)` 覆盖的 cache line
    #[inline]
    pub fn flush_range(&self, domain: CacheDomain, addr: *const u8, size: usize) -> CacheResult {
        self.require(domain)?;
        if size == 0 {
            return Ok(());
        }
        log_trace!("flush {:?} {:#x}+{}", domain, addr as usize, size);
        B::flush_range(domain, addr as usize, size)
    }

    /// 丢弃区间 `[addr, addr + size)` 覆盖的 cache line
    ///
    /// # Safety
    ///
    /// `addr` 与 `size` 必须是 line 大小的整数倍。边界 line 上
    /// 不属于该区间的数据会一起被丢弃。
    #[inline]
    pub unsafe fn invd_range(&self, domain: CacheDomain, addr: *const u8, size: usize) -> CacheResult {
        self.require(domain)?;
        if size == 0 {
            return Ok(());
        }
        #[cfg(feature = "range-check")]
        self.check_alignment(domain, addr as usize, size);
        log_trace!("invd {:?} {:#x}+{}", domain, addr as usize, size);
        B::invd_range(domain, addr as usize, size)
    }

    /// 写回并丢弃区间 `[addr, addr + size)` 覆盖的 cache line
    #[inline]
    pub fn flush_and_invd_range(&self, domain: CacheDomain, addr: *const u8, size: usize) -> CacheResult {
        self.require(domain)?;
        if size == 0 {
            return Ok(());
        }
        log_trace!("flush+invd {:?} {:#x}+{}", domain, addr as usize, size);
        B::flush_and_invd_range(domain, addr as usize, size)
    }

    /// line 大小 (字节)
    ///
    /// 优先级: 运行时探测 > 编译期配置 > 0。
    /// 结果为 0 或 2 的幂，域不存在时为 0。
    pub fn line_size(&self, domain: CacheDomain) -> usize {
        if !self.is_present(domain) {
            return 0;
        }
        let state = self.state(domain);
        let cached = state.detected_line.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }

        match B::detect_line_size(domain) {
            Some(line) if line.is_power_of_two() => {
                let configured = domain.configured_line_size();
                if configured != 0 && line > configured {
                    // 静态放置按编译期 line 对齐，比探测值小时无法保证独占
                    log_warn!(
                        "{:?} line {} exceeds configured {}, static placement is not exclusive",
                        domain,
                        line,
                        configured
                    );
                }
                state.detected_line.store(line, Ordering::Relaxed);
                line
            }
            _ => domain.configured_line_size(),
        }
    }

    #[cfg(feature = "range-check")]
    fn check_alignment(&self, domain: CacheDomain, addr: usize, size: usize) {
        let line = self.line_size(domain);
        crate::util::log::debug_assert_msg!(
            line == 0 || (addr % line == 0 && size % line == 0),
            "misaligned cache invalidate: {:#x}+{} (line {})",
            addr,
            size,
            line
        );
    }
}

impl<B: CacheBackend> Default for Cache<B> {
    fn default() -> Self {
        Self::new()
    }
}

static CACHE: Cache<Active> = Cache::new();

/// 全局 cache 控制器 (构建时选定的后端)
#[inline(always)]
pub fn global() -> &'static Cache<Active> {
    &CACHE
}

// ===== 数据 cache =====

/// 打开数据 cache
#[inline]
pub fn data_enable() -> CacheResult {
    CACHE.enable(CacheDomain::Data)
}

/// 关闭数据 cache
#[inline]
pub fn data_disable() -> CacheResult {
    CACHE.disable(CacheDomain::Data)
}

#[inline]
pub fn data_is_enabled() -> bool {
    CACHE.is_enabled(CacheDomain::Data)
}

/// 写回整个数据 cache
#[inline]
pub fn data_flush_all() -> CacheResult {
    CACHE.flush_all(CacheDomain::Data)
}

/// 丢弃整个数据 cache
///
/// # Safety
///
/// 见 [`Cache::invd_all`]。
#[inline]
pub unsafe fn data_invd_all() -> CacheResult {
    CACHE.invd_all(CacheDomain::Data)
}

/// 写回并丢弃整个数据 cache
#[inline]
pub fn data_flush_and_invd_all() -> CacheResult {
    CACHE.flush_and_invd_all(CacheDomain::Data)
}

/// 写回数据 cache 区间
#[inline]
pub fn data_flush_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.flush_range(CacheDomain::Data, addr, size)
}

/// 丢弃数据 cache 区间
///
/// # Safety
///
/// 见 [`Cache::invd_range`]。
#[inline]
pub unsafe fn data_invd_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.invd_range(CacheDomain::Data, addr, size)
}

/// 写回并丢弃数据 cache 区间
#[inline]
pub fn data_flush_and_invd_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.flush_and_invd_range(CacheDomain::Data, addr, size)
}

/// 数据 cache line 大小
#[inline]
pub fn data_line_size() -> usize {
    CACHE.line_size(CacheDomain::Data)
}

// ===== 指令 cache =====

/// 打开指令 cache
#[inline]
pub fn instr_enable() -> CacheResult {
    CACHE.enable(CacheDomain::Instruction)
}

/// 关闭指令 cache
#[inline]
pub fn instr_disable() -> CacheResult {
    CACHE.disable(CacheDomain::Instruction)
}

#[inline]
pub fn instr_is_enabled() -> bool {
    CACHE.is_enabled(CacheDomain::Instruction)
}

#[inline]
pub fn instr_flush_all() -> CacheResult {
    CACHE.flush_all(CacheDomain::Instruction)
}

/// 丢弃整个指令 cache
///
/// # Safety
///
/// 见 [`Cache::invd_all`]。
#[inline]
pub unsafe fn instr_invd_all() -> CacheResult {
    CACHE.invd_all(CacheDomain::Instruction)
}

#[inline]
pub fn instr_flush_and_invd_all() -> CacheResult {
    CACHE.flush_and_invd_all(CacheDomain::Instruction)
}

#[inline]
pub fn instr_flush_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.flush_range(CacheDomain::Instruction, addr, size)
}

/// 丢弃指令 cache 区间 (写入新代码后使用)
///
/// # Safety
///
/// 见 [`Cache::invd_range`]。
#[inline]
pub unsafe fn instr_invd_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.invd_range(CacheDomain::Instruction, addr, size)
}

#[inline]
pub fn instr_flush_and_invd_range(addr: *const u8, size: usize) -> CacheResult {
    CACHE.flush_and_invd_range(CacheDomain::Instruction, addr, size)
}

/// 指令 cache line 大小
#[inline]
pub fn instr_line_size() -> usize {
    CACHE.line_size(CacheDomain::Instruction)
}

#[cfg(test)]
pub(crate) mod mock {
    //! 记录调用序列的后端，供各模块测试使用

    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    /// 一次后端调用
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Call {
        Enable(CacheDomain),
        Disable(CacheDomain),
        FlushAll(CacheDomain),
        InvdAll(CacheDomain),
        FlushAndInvdAll(CacheDomain),
        Flush(CacheDomain, usize, usize),
        Invd(CacheDomain, usize, usize),
        FlushAndInvd(CacheDomain, usize, usize),
    }

    std::thread_local! {
        static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
    }

    fn record(call: Call) {
        CALLS.with(|calls| calls.borrow_mut().push(call));
    }

    /// 取出并清空当前线程记录的调用
    pub fn take_calls() -> Vec<Call> {
        CALLS.with(|calls| core::mem::take(&mut *calls.borrow_mut()))
    }

    /// `D` / `I` 控制两个域是否存在，`LINE` 非 0 时模拟运行时探测，
    /// `BOOT` 模拟启动时已由 ROM 打开的 cache
    pub struct Mock<const D: bool, const I: bool, const LINE: usize = 0, const BOOT: bool = false>;

    impl<const D: bool, const I: bool, const LINE: usize, const BOOT: bool> CacheBackend
        for Mock<D, I, LINE, BOOT>
    {
        const HAS_DCACHE: bool = D;
        const HAS_ICACHE: bool = I;
        const ENABLED_AT_BOOT: bool = BOOT;

        fn enable(domain: CacheDomain) {
            record(Call::Enable(domain));
        }

        fn disable(domain: CacheDomain) {
            record(Call::Disable(domain));
        }

        fn flush_all(domain: CacheDomain) -> CacheResult {
            record(Call::FlushAll(domain));
            Ok(())
        }

        unsafe fn invd_all(domain: CacheDomain) -> CacheResult {
            record(Call::InvdAll(domain));
            Ok(())
        }

        fn flush_and_invd_all(domain: CacheDomain) -> CacheResult {
            record(Call::FlushAndInvdAll(domain));
            Ok(())
        }

        fn flush_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
            record(Call::Flush(domain, addr, size));
            Ok(())
        }

        unsafe fn invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
            record(Call::Invd(domain, addr, size));
            Ok(())
        }

        fn flush_and_invd_range(domain: CacheDomain, addr: usize, size: usize) -> CacheResult {
            record(Call::FlushAndInvd(domain, addr, size));
            Ok(())
        }

        fn detect_line_size(_domain: CacheDomain) -> Option<usize> {
            if LINE == 0 {
                None
            } else {
                Some(LINE)
            }
        }
    }
}
