//! 内存放置模块
//!
//! 提供以下功能:
//! - cache line 对齐 / 独占的静态变量与运行时分配 (`placement`)
//! - DMA 缓冲区管理 (对齐、cache 一致性)
//!
//! # 内存区域
//!
//! 链接脚本需要提供两个输出段及其边界符号:
//! - `.dcacheline_exclusive_noinit`: `__dcacheline_exclusive_noinit_{start,end}`，
//!   放在 NOLOAD 区域，启动代码不清零
//! - `.dcacheline_exclusive_data`: `__dcacheline_exclusive_data_{start,end}`，
//!   随 `.data` 一起从镜像拷贝
//!
//! 两个段的起止都要按数据 cache line 对齐。
//!
//! # 示例
//!
//! ```rust,ignore
//! use rustrtos_cache::mem::{dma::DmaBuffer, placement::{ExclusiveArena, RegionKind}};
//!
//! static TX: DmaBuffer<256> = DmaBuffer::new();
//! static ARENA: ExclusiveArena = ExclusiveArena::new(RegionKind::PersistentUninit);
//! ```

pub mod dma;
pub mod placement;

// 重导出常用类型
pub use dma::{DmaBuffer, DmaError, DmaState};
pub use placement::{
    ArenaStats, CacheLineAligned, Exclusive, ExclusiveArena, PlacementError, RegionBounds, RegionKind,
};
