//! cache line 独占的内存放置
//!
//! 与 DMA 或其他核共享的数据必须独占自己的 cache line，否则对相邻变量的
//! flush / invalidate 会破坏它 (反之亦然)。
//!
//! # 静态放置
//!
//! - [`dcacheline_exclusive_noinit!`]: 放入 `.dcacheline_exclusive_noinit`，
//!   启动时不清零，热复位后内容保留
//! - [`dcacheline_exclusive_data!`]: 放入 `.dcacheline_exclusive_data`，
//!   初值随镜像一起烧录，启动时拷贝 (即使初值全为 0)
//!
//! 每个变量包在 [`Exclusive`] 中，起始地址按数据 cache line 对齐，
//! 占用大小向上取整到整数条 line，所以下一个对象一定从新的 line 开始。
//!
//! # 运行时放置
//!
//! [`ExclusiveArena`] 是一个按 line 量化的 bump 分配器 (无锁、不支持释放)，
//! 管理调用者交给它的一段内存。
//!
//! ```rust,ignore
//! use rustrtos_cache::dcacheline_exclusive_data;
//!
//! dcacheline_exclusive_data! {
//!     static MAILBOX: [u32; 4] = [0; 4];
//! }
//!
//! let mailbox = unsafe { MAILBOX.get_mut() };
//! ```

use core::cell::UnsafeCell;
use core::mem::{align_of, size_of, MaybeUninit};
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use portable_atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::cache::{self, Cache, CacheBackend, CacheDomain};
use crate::config;
use crate::util::log::{log_debug, log_warn};

/// 按数据 cache line 对齐的包装
///
/// 只保证起始地址对齐和大小为 line 的整数倍。
/// 需要在多个上下文之间共享时使用 [`Exclusive`]。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
#[cfg_attr(dcache_line_size = "16", repr(align(16)))]
#[cfg_attr(dcache_line_size = "32", repr(align(32)))]
#[cfg_attr(dcache_line_size = "64", repr(align(64)))]
#[cfg_attr(dcache_line_size = "128", repr(align(128)))]
#[cfg_attr(dcache_line_size = "256", repr(align(256)))]
pub struct CacheLineAligned<T>(pub T);

impl<T> CacheLineAligned<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for CacheLineAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheLineAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// 独占 cache line 的共享存储
///
/// 通常由 [`dcacheline_exclusive_noinit!`] / [`dcacheline_exclusive_data!`]
/// 声明为 static。访问不做同步，和外设 / 其他核的交接由调用者配合
/// cache API 完成。
#[repr(transparent)]
pub struct Exclusive<T> {
    cell: UnsafeCell<CacheLineAligned<T>>,
}

// Safety: 访问全部经过 unsafe 接口，同步由调用者负责
unsafe impl<T: Send> Sync for Exclusive<T> {}

impl<T> Exclusive<T> {
    pub const fn new(value: T) -> Self {
        Self {
            cell: UnsafeCell::new(CacheLineAligned(value)),
        }
    }

    /// 数据指针 (line 对齐)
    #[inline(always)]
    pub const fn as_ptr(&self) -> *mut T {
        self.cell.get() as *mut T
    }

    /// 实际占用的字节数，是 line 大小的整数倍
    ///
    /// cache 维护操作应使用这个长度而不是 `size_of::<T>()`，
    /// 这样丢弃操作总是覆盖完整的 line。
    #[inline(always)]
    pub const fn reserved_len(&self) -> usize {
        size_of::<CacheLineAligned<T>>()
    }

    /// # Safety
    ///
    /// 调用期间不能存在可变引用，也不能有 DMA 正在写入。
    #[inline(always)]
    pub unsafe fn get(&self) -> &T {
        &(*self.cell.get()).0
    }

    /// # Safety
    ///
    /// 调用者保证独占访问。
    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut (*self.cell.get()).0
    }
}

impl<T> Exclusive<MaybeUninit<T>> {
    /// 未初始化的存储
    pub const fn uninit() -> Self {
        Self::new(MaybeUninit::uninit())
    }
}

/// 声明启动时不清零的 cache line 独占变量
///
/// 变量类型是 `Exclusive<MaybeUninit<T>>`，首次使用前由调用者初始化。
#[macro_export]
macro_rules! dcacheline_exclusive_noinit {
    ($($(#[$attr:meta])* $vis:vis static $name:ident: $ty:ty;)+) => {
        $(
            $(#[$attr])*
            #[cfg_attr(target_os = "none", link_section = ".dcacheline_exclusive_noinit")]
            $vis static $name: $crate::mem::placement::Exclusive<::core::mem::MaybeUninit<$ty>> =
                $crate::mem::placement::Exclusive::uninit();
        )+
    };
}

/// 声明带初值的 cache line 独占变量
#[macro_export]
macro_rules! dcacheline_exclusive_data {
    ($($(#[$attr:meta])* $vis:vis static $name:ident: $ty:ty = $init:expr;)+) => {
        $(
            $(#[$attr])*
            #[cfg_attr(target_os = "none", link_section = ".dcacheline_exclusive_data")]
            $vis static $name: $crate::mem::placement::Exclusive<$ty> =
                $crate::mem::placement::Exclusive::new($init);
        )+
    };
}

/// 放置区域类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum RegionKind {
    /// 不清零，热复位后保留，需要时由使用者清零
    PersistentUninit,
    /// 随镜像初始化的区域，运行时分配的块交付前清零
    ImageInit,
}

/// 放置错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum PlacementError {
    /// 区域尚未交给分配器
    NotInitialized,
    /// 重复初始化
    AlreadyInitialized,
    /// 区域剩余空间不足
    OutOfMemory,
    /// 大小为零
    ZeroSize,
}

/// 链接脚本给出的区域边界 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBounds {
    pub start: usize,
    pub end: usize,
}

impl RegionBounds {
    /// `[addr, addr + len)` 是否完全在区域内
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }
}

/// 静态放置区域的链接边界 (只读)
#[cfg(target_os = "none")]
pub fn linker_region(kind: RegionKind) -> RegionBounds {
    extern "C" {
        static __dcacheline_exclusive_noinit_start: u8;
        static __dcacheline_exclusive_noinit_end: u8;
        static __dcacheline_exclusive_data_start: u8;
        static __dcacheline_exclusive_data_end: u8;
    }

    // Safety: 只取地址，不读取内容
    unsafe {
        let (start, end) = match kind {
            RegionKind::PersistentUninit => (
                core::ptr::addr_of!(__dcacheline_exclusive_noinit_start),
                core::ptr::addr_of!(__dcacheline_exclusive_noinit_end),
            ),
            RegionKind::ImageInit => (
                core::ptr::addr_of!(__dcacheline_exclusive_data_start),
                core::ptr::addr_of!(__dcacheline_exclusive_data_end),
            ),
        };
        RegionBounds {
            start: start as usize,
            end: end as usize,
        }
    }
}

/// 编译期分配粒度: 配置的数据 cache line，无 cache 时退化为字对齐
pub const fn placement_quantum() -> usize {
    if config::DCACHE_LINE_SIZE == 0 {
        align_of::<usize>()
    } else {
        config::DCACHE_LINE_SIZE
    }
}

#[inline(always)]
const fn round_up(value: usize, quantum: usize) -> Option<usize> {
    match value.checked_add(quantum - 1) {
        Some(v) => Some(v & !(quantum - 1)),
        None => None,
    }
}

const STATE_EMPTY: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

/// 按 cache line 量化的 bump 分配器
///
/// 每次分配的起始地址按 line 对齐，占用向上取整到整数条 line，
/// 因此任意两次分配不会共享 line。line 在 `init` 时确定，取编译期
/// 配置与运行时探测两者中较大的一个。分配通过 CAS 推进游标，
/// 可以在中断和多核间并发调用。不支持释放。
pub struct ExclusiveArena {
    kind: RegionKind,
    state: AtomicU8,
    /// 分配粒度，`init` 之后固定
    quantum: AtomicUsize,
    start: AtomicUsize,
    end: AtomicUsize,
    next: AtomicUsize,
}

impl ExclusiveArena {
    /// 创建空分配器，使用前需要 [`init`](Self::init)
    pub const fn new(kind: RegionKind) -> Self {
        Self {
            kind,
            state: AtomicU8::new(STATE_EMPTY),
            quantum: AtomicUsize::new(0),
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            next: AtomicUsize::new(0),
        }
    }

    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    /// 分配粒度 (字节)，`init` 之前为 0
    pub fn quantum(&self) -> usize {
        self.quantum.load(Ordering::Relaxed)
    }

    /// 交出 `[base, base + len)` 供分配，line 取自全局 cache
    ///
    /// 起点向上对齐到 line，终点向下对齐到 line。
    ///
    /// # Safety
    ///
    /// 该区域在分配器的整个生命周期内有效，且不被其他代码使用。
    pub unsafe fn init(&self, base: *mut u8, len: usize) -> Result<(), PlacementError> {
        self.init_with(cache::global(), base, len)
    }

    /// 同 [`init`](Self::init)，line 取自 `cache`
    ///
    /// # Safety
    ///
    /// 同 [`init`](Self::init)。
    pub unsafe fn init_with<B: CacheBackend>(
        &self,
        cache: &Cache<B>,
        base: *mut u8,
        len: usize,
    ) -> Result<(), PlacementError> {
        if self
            .state
            .compare_exchange(STATE_EMPTY, STATE_INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlacementError::AlreadyInitialized);
        }

        let quantum = placement_quantum().max(cache.line_size(CacheDomain::Data));
        let raw_start = base as usize;
        let raw_end = raw_start.saturating_add(len);
        let start = round_up(raw_start, quantum).unwrap_or(raw_end).min(raw_end);
        let end = (raw_end & !(quantum - 1)).max(start);

        self.quantum.store(quantum, Ordering::Relaxed);
        self.start.store(start, Ordering::Relaxed);
        self.end.store(end, Ordering::Relaxed);
        self.next.store(start, Ordering::Relaxed);
        self.state.store(STATE_READY, Ordering::Release);

        log_debug!("exclusive arena {:?}: {:#x}..{:#x} (line {})", self.kind, start, end, quantum);
        Ok(())
    }

    /// 分配 `size` 字节，起始地址按 line 对齐
    pub fn alloc_bytes(&self, size: usize) -> Result<NonNull<u8>, PlacementError> {
        self.alloc_raw(size, 1)
    }

    /// 分配并写入一个值
    pub fn alloc<T>(&'static self, value: T) -> Result<&'static mut T, PlacementError> {
        let ptr = self.alloc_raw(size_of::<T>().max(1), align_of::<T>())?.cast::<T>();
        // Safety: 新分配的块只属于这次调用，对齐满足 T
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// 分配一个未初始化的 `T`
    pub fn alloc_uninit<T>(&'static self) -> Result<&'static mut MaybeUninit<T>, PlacementError> {
        let ptr = self.alloc_raw(size_of::<T>().max(1), align_of::<T>())?;
        // Safety: 同上，MaybeUninit 不要求内容有效
        Ok(unsafe { &mut *ptr.cast::<MaybeUninit<T>>().as_ptr() })
    }

    fn alloc_raw(&self, size: usize, align: usize) -> Result<NonNull<u8>, PlacementError> {
        if size == 0 {
            return Err(PlacementError::ZeroSize);
        }
        if self.state.load(Ordering::Acquire) != STATE_READY {
            return Err(PlacementError::NotInitialized);
        }

        let line = self.quantum.load(Ordering::Relaxed);
        let quantum = line.max(align);
        let span = round_up(size, line).ok_or(PlacementError::OutOfMemory)?;
        let end = self.end.load(Ordering::Relaxed);

        loop {
            let current = self.next.load(Ordering::Relaxed);
            let start = round_up(current, quantum).ok_or(PlacementError::OutOfMemory)?;
            let new_next = match start.checked_add(span) {
                Some(next) if next <= end => next,
                _ => {
                    log_warn!("exclusive arena {:?} exhausted: {} bytes requested", self.kind, size);
                    return Err(PlacementError::OutOfMemory);
                }
            };

            if self
                .next
                .compare_exchange_weak(current, new_next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let ptr = start as *mut u8;
                if self.kind == RegionKind::ImageInit {
                    // Safety: [start, start + span) 刚刚被独占
                    unsafe { core::ptr::write_bytes(ptr, 0, span) };
                }
                return NonNull::new(ptr).ok_or(PlacementError::NotInitialized);
            }
        }
    }

    /// 使用统计
    pub fn stats(&self) -> ArenaStats {
        let start = self.start.load(Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        let next = self.next.load(Ordering::Relaxed);
        ArenaStats {
            total: end - start,
            used: next - start,
            free: end.saturating_sub(next),
        }
    }
}

/// 分配器使用统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// 总容量 (字节)
    pub total: usize,
    /// 已分配，含取整部分 (字节)
    pub used: usize,
    /// 剩余 (字节)
    pub free: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 全局 cache 下分配器使用的粒度
    fn line() -> usize {
        placement_quantum().max(cache::data_line_size())
    }

    /// 测试用的后备存储，堆上分配避免撑大测试线程的栈
    fn backing(len: usize) -> &'static mut [u8] {
        std::boxed::Box::leak(std::vec![0u8; len].into_boxed_slice())
    }

    fn arena(kind: RegionKind, len: usize) -> &'static ExclusiveArena {
        let arena: &'static ExclusiveArena =
            std::boxed::Box::leak(std::boxed::Box::new(ExclusiveArena::new(kind)));
        let mem = backing(len);
        unsafe { arena.init(mem.as_mut_ptr(), mem.len()) }.unwrap();
        arena
    }

    dcacheline_exclusive_noinit! {
        static NOINIT_BYTE: u8;
        static NOINIT_ARRAY: [u8; 5];
        static NOINIT_SHORT: [u8; 3];
    }

    dcacheline_exclusive_data! {
        static DATA_BYTE: u8 = 9;
        static DATA_ARRAY: [u8; 5] = [4, 0, 0, 0, 0];
        static DATA_SHORT: [u8; 3] = [7, 0, 0];
    }

    #[test]
    fn test_static_placement_is_line_aligned() {
        let addrs = [
            NOINIT_BYTE.as_ptr() as usize,
            NOINIT_ARRAY.as_ptr() as usize,
            NOINIT_SHORT.as_ptr() as usize,
            DATA_BYTE.as_ptr() as usize,
            DATA_ARRAY.as_ptr() as usize,
            DATA_SHORT.as_ptr() as usize,
        ];
        for addr in addrs {
            assert_eq!(addr % config::DCACHE_LINE_SIZE.max(1), 0);
        }
        let line = config::DCACHE_LINE_SIZE.max(1);
        assert_eq!(NOINIT_BYTE.reserved_len() % line, 0);
        assert_eq!(DATA_ARRAY.reserved_len() % line, 0);
    }

    #[test]
    fn test_static_placement_values() {
        unsafe {
            NOINIT_BYTE.get_mut().write(1);
            NOINIT_ARRAY.get_mut().write([2, 0, 0, 0, 0]);
            NOINIT_SHORT.get_mut().write([0, 0, 3]);

            assert_eq!(NOINIT_BYTE.get().assume_init(), 1);
            assert_eq!(NOINIT_ARRAY.get().assume_init()[0], 2);
            assert_eq!(NOINIT_SHORT.get().assume_init()[2], 3);

            assert_eq!(*DATA_BYTE.get(), 9);
            assert_eq!(DATA_ARRAY.get()[0], 4);
            assert_eq!(DATA_SHORT.get()[0], 7);
        }
    }

    #[test]
    fn test_cache_line_aligned_wrapper() {
        let a = CacheLineAligned::new(1u8);
        assert_eq!(*a, 1);
        let line = config::DCACHE_LINE_SIZE.max(1);
        assert_eq!(align_of::<CacheLineAligned<u8>>(), line);
        assert_eq!(size_of::<CacheLineAligned<[u8; 3]>>() % line, 0);
        assert_eq!(a.into_inner(), 1);
    }

    #[test]
    fn test_sequential_requests_never_share_a_line() {
        let arena = arena(RegionKind::PersistentUninit, 4096);
        let first = arena.alloc_bytes(1).unwrap().as_ptr() as usize;
        let second = arena.alloc_bytes(line() + 1).unwrap().as_ptr() as usize;
        let third = arena.alloc_bytes(3).unwrap().as_ptr() as usize;

        for addr in [first, second, third] {
            assert_eq!(addr % line(), 0);
        }
        assert!(second >= first + line());
        assert!(third >= second + 2 * line());
    }

    #[test]
    fn test_typed_allocation_respects_alignment() {
        #[repr(align(512))]
        struct Wide(u8);

        let arena = arena(RegionKind::PersistentUninit, 4096);
        let _pad = arena.alloc_bytes(1).unwrap();
        let wide = arena.alloc(Wide(5)).unwrap();
        assert_eq!(&*wide as *const Wide as usize % 512, 0);
        assert_eq!(wide.0, 5);

        let slot = arena.alloc_uninit::<u32>().unwrap();
        slot.write(0xDEAD_BEEF);
        assert_eq!(unsafe { slot.assume_init() }, 0xDEAD_BEEF);
    }

    #[test]
    fn test_image_init_blocks_are_zeroed() {
        let arena: &'static ExclusiveArena =
            std::boxed::Box::leak(std::boxed::Box::new(ExclusiveArena::new(RegionKind::ImageInit)));
        let mem = backing(1024);
        mem.fill(0xFF);
        unsafe { arena.init(mem.as_mut_ptr(), mem.len()) }.unwrap();

        let block = arena.alloc_bytes(40).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(block.as_ptr(), 40) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_exhaustion_and_errors() {
        let arena = arena(RegionKind::PersistentUninit, 4 * line() + line() - 1);
        assert_eq!(arena.alloc_bytes(0), Err(PlacementError::ZeroSize));

        let total = arena.stats().total;
        assert!(total >= 3 * line());
        assert!(arena.alloc_bytes(total).is_ok());
        assert_eq!(arena.alloc_bytes(1), Err(PlacementError::OutOfMemory));
        assert_eq!(arena.stats().free, 0);

        let empty = ExclusiveArena::new(RegionKind::PersistentUninit);
        assert_eq!(empty.alloc_bytes(8), Err(PlacementError::NotInitialized));

        let mem = backing(64);
        assert_eq!(
            unsafe { arena.init(mem.as_mut_ptr(), mem.len()) },
            Err(PlacementError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_quantum_follows_detected_line() {
        use crate::cache::mock::Mock;

        // 探测到的 line 比编译期配置大
        let cache: Cache<Mock<true, false, 256>> = Cache::new();
        let arena: &'static ExclusiveArena =
            std::boxed::Box::leak(std::boxed::Box::new(ExclusiveArena::new(RegionKind::PersistentUninit)));
        let mem = backing(4096);
        unsafe { arena.init_with(&cache, mem.as_mut_ptr(), mem.len()) }.unwrap();
        assert_eq!(arena.quantum(), 256);

        let first = arena.alloc_bytes(1).unwrap().as_ptr() as usize;
        let second = arena.alloc_bytes(1).unwrap().as_ptr() as usize;
        assert_eq!(first % 256, 0);
        assert_eq!(second % 256, 0);
        assert!(second >= first + 256);

        // 没有数据 cache 时退化为编译期粒度
        let absent: Cache<Mock<false, false, 256>> = Cache::new();
        let plain = ExclusiveArena::new(RegionKind::PersistentUninit);
        let mem = backing(512);
        unsafe { plain.init_with(&absent, mem.as_mut_ptr(), mem.len()) }.unwrap();
        assert_eq!(plain.quantum(), placement_quantum());
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        let arena = arena(RegionKind::PersistentUninit, 64 * 1024);
        let mut starts: std::vec::Vec<usize> = std::thread::scope(|scope| {
            let handles: std::vec::Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..16)
                            .map(|_| arena.alloc_bytes(10).unwrap().as_ptr() as usize)
                            .collect::<std::vec::Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        starts.sort_unstable();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= line());
        }
    }

    #[test]
    fn test_region_bounds_contains() {
        let bounds = RegionBounds { start: 0x1000, end: 0x2000 };
        assert!(bounds.contains(0x1000, 0x1000));
        assert!(!bounds.contains(0x1FFF, 2));
        assert!(!bounds.contains(usize::MAX, 2));
    }
}
