//! DMA 缓冲区
//!
//! 在 cache 不一致的系统上，CPU 和外设交接缓冲区时需要做 cache 维护:
//! - 外设读取缓冲区前 (CPU -> 设备): 写回，保证内存里是 CPU 最新写入的数据
//! - 外设写入缓冲区时 (设备 -> CPU): 启动前写回并丢弃，避免脏行在传输期间
//!   被换出覆盖外设数据；完成后再丢弃一次，保证 CPU 读到新数据
//!
//! [`DmaBuffer`] 的数据区按 cache line 对齐并占满整数条 line，状态字段
//! 位于数据区之后的 line 上，丢弃操作不会波及任何其他变量。
//!
//! 没有数据 cache 的构建中维护操作返回 `NotSupported`，这里视为一致内存，
//! 直接跳过。
//!
//! # 示例
//!
//! ```rust,ignore
//! use rustrtos_cache::mem::dma::DmaBuffer;
//!
//! static RX: DmaBuffer<1024> = DmaBuffer::new();
//!
//! RX.prepare_for_dma_write()?;
//! // ... 启动外设，等待完成 ...
//! RX.complete_dma_write()?;
//! ```

use core::cell::UnsafeCell;

use portable_atomic::{AtomicU8, Ordering};

use crate::cache::{self, Cache, CacheBackend, CacheDomain, CacheError, CacheResult};
use crate::mem::placement::CacheLineAligned;
use crate::util::log::log_warn;

/// DMA 缓冲区状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DmaState {
    /// 空闲，可被 CPU 访问
    Idle = 0,
    /// 正在进行 DMA 读取 (外设读取缓冲区)
    DmaReading = 1,
    /// 正在进行 DMA 写入 (外设写入缓冲区)
    DmaWriting = 2,
}

impl DmaState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => DmaState::DmaReading,
            2 => DmaState::DmaWriting,
            _ => DmaState::Idle,
        }
    }
}

/// DMA 缓冲区错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum DmaError {
    /// 缓冲区已经交给外设
    Busy,
    /// 当前状态与完成的方向不符
    WrongDirection,
    /// cache 维护失败
    Cache(CacheError),
}

/// 计算对齐后的大小
pub const fn aligned_size(size: usize, alignment: usize) -> usize {
    (size + alignment - 1) & !(alignment - 1)
}

/// 没有数据 cache 时内存天然一致
#[inline(always)]
fn coherent(result: CacheResult) -> CacheResult {
    match result {
        Err(CacheError::NotSupported) => Ok(()),
        other => other,
    }
}

/// DMA 缓冲区
///
/// # 类型参数
///
/// - `SIZE`: 缓冲区大小 (字节)
#[repr(C)]
pub struct DmaBuffer<const SIZE: usize> {
    /// 实际数据存储，独占整数条 cache line
    data: UnsafeCell<CacheLineAligned<[u8; SIZE]>>,
    /// 当前状态 ([`DmaState`])
    state: AtomicU8,
}

impl<const SIZE: usize> DmaBuffer<SIZE> {
    /// 创建新的 DMA 缓冲区
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new(CacheLineAligned([0u8; SIZE])),
            state: AtomicU8::new(DmaState::Idle as u8),
        }
    }

    /// 获取缓冲区大小
    pub const fn size(&self) -> usize {
        SIZE
    }

    /// cache 维护覆盖的长度 (整数条 line)
    pub const fn maintained_len(&self) -> usize {
        core::mem::size_of::<CacheLineAligned<[u8; SIZE]>>()
    }

    pub fn state(&self) -> DmaState {
        DmaState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// 检查 DMA 是否活跃
    pub fn is_dma_active(&self) -> bool {
        self.state() != DmaState::Idle
    }

    /// 外设使用的地址
    pub fn dma_address(&self) -> *const u8 {
        self.data.get() as *const u8
    }

    /// 获取数据切片
    ///
    /// # Panics
    ///
    /// 如果 DMA 正在进行会 panic
    pub fn as_slice(&self) -> &[u8] {
        assert!(!self.is_dma_active(), "Cannot access buffer during DMA");
        unsafe { &(*self.data.get()).0 }
    }

    /// 获取可变数据切片
    ///
    /// # Panics
    ///
    /// 如果 DMA 正在进行会 panic
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(!self.is_dma_active(), "Cannot access buffer during DMA");
        &mut self.data.get_mut().0
    }

    /// 从切片复制数据，返回复制的字节数
    pub fn copy_from_slice(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(SIZE);
        self.as_mut_slice()[..len].copy_from_slice(&src[..len]);
        len
    }

    /// 复制数据到切片，返回复制的字节数
    pub fn copy_to_slice(&self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(SIZE);
        dst[..len].copy_from_slice(&self.as_slice()[..len]);
        len
    }

    fn begin(&self, state: DmaState) -> Result<(), DmaError> {
        self.state
            .compare_exchange(DmaState::Idle as u8, state as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                log_warn!("DMA buffer busy");
                DmaError::Busy
            })
    }

    fn finish(&self, state: DmaState) -> Result<(), DmaError> {
        self.state
            .compare_exchange(state as u8, DmaState::Idle as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DmaError::WrongDirection)
    }

    /// 进入 `state` 并执行 cache 维护，维护失败时回到空闲
    fn begin_with(&self, state: DmaState, maintain: impl FnOnce() -> CacheResult) -> Result<(), DmaError> {
        self.begin(state)?;
        coherent(maintain()).map_err(|err| {
            self.state.store(DmaState::Idle as u8, Ordering::Release);
            DmaError::Cache(err)
        })
    }

    /// 准备 DMA 读取 (外设将读取此缓冲区)，写回 cache
    pub fn prepare_for_dma_read_with<B: CacheBackend>(&self, cache: &Cache<B>) -> Result<(), DmaError> {
        self.begin_with(DmaState::DmaReading, || {
            cache.flush_range(CacheDomain::Data, self.dma_address(), self.maintained_len())
        })
    }

    /// 完成 DMA 读取
    pub fn complete_dma_read_with<B: CacheBackend>(&self, _cache: &Cache<B>) -> Result<(), DmaError> {
        self.finish(DmaState::DmaReading)
    }

    /// 准备 DMA 写入 (外设将写入此缓冲区)
    pub fn prepare_for_dma_write_with<B: CacheBackend>(&self, cache: &Cache<B>) -> Result<(), DmaError> {
        self.begin_with(DmaState::DmaWriting, || {
            cache.flush_and_invd_range(CacheDomain::Data, self.dma_address(), self.maintained_len())
        })
    }

    /// 完成 DMA 写入，丢弃 cache 确保读取新数据
    pub fn complete_dma_write_with<B: CacheBackend>(&self, cache: &Cache<B>) -> Result<(), DmaError> {
        if self.state() != DmaState::DmaWriting {
            return Err(DmaError::WrongDirection);
        }
        // Safety: 数据区按 line 对齐且独占整数条 line
        coherent(unsafe { cache.invd_range(CacheDomain::Data, self.dma_address(), self.maintained_len()) })
            .map_err(DmaError::Cache)?;
        self.finish(DmaState::DmaWriting)
    }

    /// 使用全局 cache 的 [`prepare_for_dma_read_with`](Self::prepare_for_dma_read_with)
    pub fn prepare_for_dma_read(&self) -> Result<(), DmaError> {
        self.prepare_for_dma_read_with(cache::global())
    }

    pub fn complete_dma_read(&self) -> Result<(), DmaError> {
        self.complete_dma_read_with(cache::global())
    }

    pub fn prepare_for_dma_write(&self) -> Result<(), DmaError> {
        self.prepare_for_dma_write_with(cache::global())
    }

    pub fn complete_dma_write(&self) -> Result<(), DmaError> {
        self.complete_dma_write_with(cache::global())
    }
}

impl<const SIZE: usize> Default for DmaBuffer<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: DmaBuffer 使用原子状态追踪和显式同步
unsafe impl<const SIZE: usize> Send for DmaBuffer<SIZE> {}
unsafe impl<const SIZE: usize> Sync for DmaBuffer<SIZE> {}

/// 便捷宏：创建静态 DMA 缓冲区
#[macro_export]
macro_rules! dma_buffer {
    ($name:ident, $size:expr) => {
        static $name: $crate::mem::dma::DmaBuffer<$size> = $crate::mem::dma::DmaBuffer::new();
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::{take_calls, Call, Mock};
    use crate::config;

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(100, 32), 128);
        assert_eq!(aligned_size(32, 32), 32);
        assert_eq!(aligned_size(1, 32), 32);
    }

    #[test]
    fn test_dma_buffer_layout() {
        let buf = DmaBuffer::<100>::new();
        let line = config::DCACHE_LINE_SIZE.max(1);
        assert_eq!(buf.size(), 100);
        assert_eq!(buf.dma_address() as usize % line, 0);
        assert_eq!(buf.maintained_len() % line, 0);
        assert!(buf.maintained_len() >= 100);

        // 状态字段不与数据共享 line
        let state = &buf.state as *const AtomicU8 as usize;
        assert!(state >= buf.dma_address() as usize + buf.maintained_len());
    }

    #[test]
    fn test_read_transfer_flushes() {
        let cache: Cache<Mock<true, false>> = Cache::new();
        let mut buf = DmaBuffer::<64>::new();
        assert_eq!(buf.copy_from_slice(&[1, 2, 3]), 3);

        buf.prepare_for_dma_read_with(&cache).unwrap();
        assert_eq!(buf.state(), DmaState::DmaReading);
        assert_eq!(buf.prepare_for_dma_write_with(&cache), Err(DmaError::Busy));
        buf.complete_dma_read_with(&cache).unwrap();
        assert!(!buf.is_dma_active());

        let addr = buf.dma_address() as usize;
        assert_eq!(
            take_calls(),
            [Call::Flush(CacheDomain::Data, addr, buf.maintained_len())]
        );
    }

    #[test]
    fn test_write_transfer_invalidates_on_both_ends() {
        let cache: Cache<Mock<true, false>> = Cache::new();
        let buf = DmaBuffer::<256>::new();

        buf.prepare_for_dma_write_with(&cache).unwrap();
        assert_eq!(buf.complete_dma_read_with(&cache), Err(DmaError::WrongDirection));
        buf.complete_dma_write_with(&cache).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(buf.copy_to_slice(&mut out), 4);

        let addr = buf.dma_address() as usize;
        let len = buf.maintained_len();
        assert_eq!(
            take_calls(),
            [
                Call::FlushAndInvd(CacheDomain::Data, addr, len),
                Call::Invd(CacheDomain::Data, addr, len),
            ]
        );
    }

    #[test]
    fn test_no_dcache_is_treated_as_coherent() {
        let cache: Cache<Mock<false, false>> = Cache::new();
        let buf = DmaBuffer::<32>::new();
        assert_eq!(buf.prepare_for_dma_write_with(&cache), Ok(()));
        assert_eq!(buf.complete_dma_write_with(&cache), Ok(()));
        assert!(take_calls().is_empty());
    }

    #[test]
    #[should_panic(expected = "Cannot access buffer during DMA")]
    fn test_access_during_dma_panics() {
        let cache: Cache<Mock<true, false>> = Cache::new();
        let buf = DmaBuffer::<32>::new();
        buf.prepare_for_dma_read_with(&cache).unwrap();
        let _ = buf.as_slice();
    }
}
