//! RustRTOS Cache - 内核架构层的 cache 管理与原子 idle
//!
//! 本库提供以下核心功能:
//! - 编译期选定后端的 cache 控制 API (数据 / 指令两个域)
//! - cache line 独占的静态内存放置 (DMA / 多核共享数据)
//! - 镜像内存的 cached / uncached 地址转换
//! - 非特权上下文的区间操作校验入口
//! - 无竞态的原子 idle (恢复中断并挂起为单一硬件序列)
//!
//! # 后端选择
//!
//! 通过 cargo feature 三选一，不存在运行时分发:
//! - `backend-external`: 外部 cache 外设驱动 (见 [`set_cache_driver!`])
//! - `backend-arch`: CPU 架构原生 cache 指令
//! - `backend-soc`: SoC 专用 cache 控制器 (ESP32-S3)
//!
//! 未选择后端或未启用 `dcache` / `icache` 时，对应域的所有操作返回
//! [`CacheError::NotSupported`]。
//!
//! # 示例
//!
//! ```rust,ignore
//! use rustrtos_cache::{cache, dcacheline_exclusive_noinit};
//!
//! dcacheline_exclusive_noinit! {
//!     static RX_BUF: [u8; 512];
//! }
//!
//! // 外设写入前后
//! unsafe { cache::data_invd_range(RX_BUF.as_ptr() as *const u8, RX_BUF.reserved_len())? };
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "xtensa", feature(asm_experimental_arch))]

pub mod arch;
pub mod cache;
pub mod idle;
pub mod mem;
pub mod syscall;
pub mod util;

// ===== 重导出常用类型 =====
pub use cache::{Cache, CacheDomain, CacheError, CacheResult};
pub use idle::{atomic_idle, idle, irq_lock, irq_unlock, IrqKey};
pub use mem::placement::{CacheLineAligned, Exclusive, ExclusiveArena};
pub use syscall::{SyscallError, SyscallResult};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 编译期配置 (由 build.rs 从环境变量生成)
pub mod config {
    /// 数据 cache line 大小 (字节)，0 表示无 cache 或未知
    ///
    /// 环境变量 `RUSTRTOS_DCACHE_LINE_SIZE`，默认按目标架构推断
    pub const DCACHE_LINE_SIZE: usize = parse_usize(env!("RUSTRTOS_DCACHE_LINE_SIZE"));

    /// 指令 cache line 大小 (字节)，0 表示无 cache 或未知
    pub const ICACHE_LINE_SIZE: usize = parse_usize(env!("RUSTRTOS_ICACHE_LINE_SIZE"));

    /// 数据 cache 总容量 (字节)，0 表示未配置，按索引的整体操作不可用
    pub const DCACHE_SIZE: usize = parse_usize(env!("RUSTRTOS_DCACHE_SIZE"));

    /// 指令 cache 总容量 (字节)
    pub const ICACHE_SIZE: usize = parse_usize(env!("RUSTRTOS_ICACHE_SIZE"));

    /// 镜像内存中经过 cache 的 512MB 区域编号 (地址高 3 位)
    pub const CACHED_REGION: usize = parse_usize(env!("RUSTRTOS_CACHED_REGION"));

    /// 镜像内存中绕过 cache 的 512MB 区域编号
    pub const UNCACHED_REGION: usize = parse_usize(env!("RUSTRTOS_UNCACHED_REGION"));

    /// Xtensa 上 irq_lock 提升到的中断级别 (XCHAL_EXCM_LEVEL)
    pub const IRQ_LOCK_LEVEL: u32 = 3;

    const fn parse_usize(s: &str) -> usize {
        let bytes = s.as_bytes();
        let mut value = 0;
        let mut i = 0;
        while i < bytes.len() {
            let digit = bytes[i];
            assert!(digit.is_ascii_digit(), "configuration value is not a decimal number");
            value = value * 10 + (digit - b'0') as usize;
            i += 1;
        }
        value
    }

    const _: () = assert!(DCACHE_LINE_SIZE == 0 || DCACHE_LINE_SIZE.is_power_of_two());
    const _: () = assert!(ICACHE_LINE_SIZE == 0 || ICACHE_LINE_SIZE.is_power_of_two());
}
