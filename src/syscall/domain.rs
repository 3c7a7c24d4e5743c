//! 内存域: 非特权线程可访问的分区表
//!
//! 内核的权限检查以 [`AccessPolicy`] 的形式交给 cache 系统调用使用。
//! [`MemoryDomain`] 是一个固定容量的实现: 区间必须完整落在某一个
//! 可写分区内，跨分区或地址溢出都视为拒绝。

use heapless::Vec;

/// 分区属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum PartitionAccess {
    ReadOnly,
    ReadWrite,
}

/// 一段连续内存 `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct Partition {
    pub start: usize,
    pub len: usize,
    pub access: PartitionAccess,
}

impl Partition {
    pub const fn new(start: usize, len: usize, access: PartitionAccess) -> Self {
        Self { start, len, access }
    }

    /// 由 slice 构造可写分区
    pub fn writable(region: &[u8]) -> Self {
        Self::new(region.as_ptr() as usize, region.len(), PartitionAccess::ReadWrite)
    }

    #[inline]
    fn end(&self) -> Option<usize> {
        self.start.checked_add(self.len)
    }

    #[inline]
    fn contains(&self, addr: usize, size: usize) -> bool {
        match (self.end(), addr.checked_add(size)) {
            (Some(end), Some(range_end)) => addr >= self.start && range_end <= end,
            _ => false,
        }
    }

    #[inline]
    fn overlaps(&self, other: &Partition) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.start < b_end && other.start < a_end,
            _ => true,
        }
    }
}

/// 内存域错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum DomainError {
    /// 分区表已满
    Full,
    /// 与已有分区重叠
    Overlap,
    /// 长度为零或结束地址溢出
    InvalidPartition,
    /// 没有以该地址开始的分区
    NotFound,
}

/// 调用者的内存访问权限
pub trait AccessPolicy {
    /// 调用者能否写 `[addr, addr + size)`
    fn can_write(&self, addr: usize, size: usize) -> bool;
}

/// 固定容量的内存域
#[derive(Debug, Clone, Default)]
pub struct MemoryDomain<const N: usize> {
    partitions: Vec<Partition, N>,
}

impl<const N: usize> MemoryDomain<N> {
    pub const fn new() -> Self {
        Self { partitions: Vec::new() }
    }

    /// 添加分区
    pub fn add_partition(&mut self, partition: Partition) -> Result<(), DomainError> {
        if partition.len == 0 || partition.end().is_none() {
            return Err(DomainError::InvalidPartition);
        }
        if self.partitions.iter().any(|p| p.overlaps(&partition)) {
            return Err(DomainError::Overlap);
        }
        self.partitions.push(partition).map_err(|_| DomainError::Full)
    }

    /// 移除以 `start` 开始的分区
    pub fn remove_partition(&mut self, start: usize) -> Result<Partition, DomainError> {
        let index = self
            .partitions
            .iter()
            .position(|p| p.start == start)
            .ok_or(DomainError::NotFound)?;
        Ok(self.partitions.swap_remove(index))
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }
}

impl<const N: usize> AccessPolicy for MemoryDomain<N> {
    fn can_write(&self, addr: usize, size: usize) -> bool {
        self.partitions
            .iter()
            .any(|p| p.access == PartitionAccess::ReadWrite && p.contains(addr, size))
    }
}

/// 特权上下文: 允许访问全部内存
pub struct Supervisor;

impl AccessPolicy for Supervisor {
    fn can_write(&self, addr: usize, size: usize) -> bool {
        addr.checked_add(size).is_some()
    }
}
