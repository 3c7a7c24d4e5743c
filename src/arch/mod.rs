//! 架构层: 中断屏蔽与 CPU 挂起
//!
//! 按目标架构选择实现:
//! - `xtensa`: PS.INTLEVEL + `waiti`
//! - `aarch64`: DAIF + `wfi`
//! - 其他 (主机): [`host::SimCpu`] 模拟的 CPU，用于测试
//!
//! 每个架构的原子 idle 序列集中在一个 asm 块里。

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::Arch;

#[cfg(target_arch = "xtensa")]
mod xtensa;
#[cfg(target_arch = "xtensa")]
pub use xtensa::Arch;

#[cfg(not(any(target_arch = "xtensa", target_arch = "aarch64")))]
pub mod host;
#[cfg(not(any(target_arch = "xtensa", target_arch = "aarch64")))]
pub use host::Arch;

/// `irq_lock` 返回的中断状态，交给 `irq_unlock` / `atomic_idle` 恢复
///
/// Xtensa 上是锁之前的 PS，AArch64 上是锁之前的 DAIF。
#[must_use = "the key restores the previous interrupt state"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct IrqKey(usize);

impl IrqKey {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

/// 架构需要提供的中断 / 挂起原语
pub trait ArchIdle {
    /// 屏蔽中断，返回之前的状态
    fn irq_lock() -> IrqKey;

    /// 恢复 `irq_lock` 之前的状态
    fn irq_unlock(key: IrqKey);

    /// 打开中断并等待，任意中断都会唤醒
    fn idle();

    /// 中断已由 `irq_lock` 屏蔽时调用: 恢复 `key` 与挂起是一个不可分割的
    /// 硬件序列，屏蔽期间到达的中断同样会唤醒 CPU
    fn atomic_idle(key: IrqKey);
}
