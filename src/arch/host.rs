//! 主机模拟 CPU
//!
//! 没有真实中断的目标 (主机测试) 上用 [`SimCpu`] 模拟中断屏蔽级别、
//! 挂起中断和 `waiti` 的唤醒语义:
//! - 屏蔽期间发出的中断保持挂起，解除屏蔽时交付
//! - `atomic_idle` 在同一步里检查挂起并打开中断，之后等待交付，
//!   再恢复调用者的屏蔽级别
//!
//! 中断可以从其他线程通过 [`SimCpu::raise_irq`] 发出。

use portable_atomic::{AtomicU32, Ordering};

use super::{ArchIdle, IrqKey};
use crate::config;

/// 模拟的单核 CPU
pub struct SimCpu {
    /// 当前中断屏蔽级别，0 表示全部打开
    level: AtomicU32,
    /// 已发出尚未交付的中断数
    pending: AtomicU32,
    /// 已交付 (中断服务已运行) 的中断数
    delivered: AtomicU32,
}

impl SimCpu {
    pub const fn new() -> Self {
        Self {
            level: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
        }
    }

    pub fn irq_lock(&self) -> IrqKey {
        let previous = self.level.swap(config::IRQ_LOCK_LEVEL, Ordering::SeqCst);
        IrqKey::from_raw(previous as usize)
    }

    pub fn irq_unlock(&self, key: IrqKey) {
        self.level.store(key.raw() as u32, Ordering::SeqCst);
        if key.raw() == 0 {
            self.deliver();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.level.load(Ordering::SeqCst) != 0
    }

    /// 发出一个中断，未屏蔽时立即交付
    pub fn raise_irq(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if !self.is_locked() {
            self.deliver();
        }
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// 交付全部挂起的中断
    fn deliver(&self) {
        let count = self.pending.swap(0, Ordering::SeqCst);
        if count != 0 {
            self.delivered.fetch_add(count, Ordering::SeqCst);
        }
    }

    /// 等待自 `since` 以来至少交付一个中断
    fn wait_for_delivery(&self, since: u32) {
        loop {
            self.deliver();
            if self.delivered() != since {
                return;
            }
            core::hint::spin_loop();
        }
    }

    pub fn idle(&self) {
        let since = self.delivered();
        self.level.store(0, Ordering::SeqCst);
        self.wait_for_delivery(since);
    }

    pub fn atomic_idle(&self, key: IrqKey) {
        let since = self.delivered();
        // 等价于 waiti 0: 打开中断，屏蔽期间挂起的中断立即交付
        self.level.store(0, Ordering::SeqCst);
        self.wait_for_delivery(since);
        self.level.store(key.raw() as u32, Ordering::SeqCst);
    }
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局模拟 CPU
pub static CPU: SimCpu = SimCpu::new();

pub struct Arch;

impl ArchIdle for Arch {
    fn irq_lock() -> IrqKey {
        CPU.irq_lock()
    }

    fn irq_unlock(key: IrqKey) {
        CPU.irq_unlock(key)
    }

    fn idle() {
        CPU.idle()
    }

    fn atomic_idle(key: IrqKey) {
        CPU.atomic_idle(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_nesting_restores_level() {
        let cpu = SimCpu::new();
        let outer = cpu.irq_lock();
        let inner = cpu.irq_lock();
        assert!(cpu.is_locked());
        cpu.irq_unlock(inner);
        assert!(cpu.is_locked());
        cpu.irq_unlock(outer);
        assert!(!cpu.is_locked());
    }

    #[test]
    fn test_masked_interrupt_stays_pending_until_unlock() {
        let cpu = SimCpu::new();
        let key = cpu.irq_lock();
        cpu.raise_irq();
        assert_eq!(cpu.pending(), 1);
        assert_eq!(cpu.delivered(), 0);
        cpu.irq_unlock(key);
        assert_eq!(cpu.pending(), 0);
        assert_eq!(cpu.delivered(), 1);
    }

    #[test]
    fn test_atomic_idle_wakes_on_interrupt_raised_before_suspend() {
        let cpu = SimCpu::new();
        let key = cpu.irq_lock();
        // 决定 idle 之后、挂起之前到达的中断
        cpu.raise_irq();
        cpu.atomic_idle(key);
        assert_eq!(cpu.delivered(), 1);
        assert!(!cpu.is_locked());
    }

    #[test]
    fn test_atomic_idle_restores_outer_lock() {
        let cpu = SimCpu::new();
        let outer = cpu.irq_lock();
        let key = cpu.irq_lock();
        cpu.raise_irq();
        cpu.atomic_idle(key);
        assert!(cpu.is_locked());
        cpu.irq_unlock(outer);
        assert!(!cpu.is_locked());
    }

    #[test]
    fn test_atomic_idle_wakes_on_interrupt_from_other_thread() {
        let cpu = Arc::new(SimCpu::new());
        let key = cpu.irq_lock();

        let device = {
            let cpu = Arc::clone(&cpu);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cpu.raise_irq();
            })
        };

        cpu.atomic_idle(key);
        device.join().unwrap();
        assert_eq!(cpu.delivered(), 1);
        assert_eq!(cpu.pending(), 0);
    }

    #[test]
    fn test_idle_enables_interrupts() {
        let cpu = Arc::new(SimCpu::new());
        let _key = cpu.irq_lock();

        let device = {
            let cpu = Arc::clone(&cpu);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                cpu.raise_irq();
            })
        };

        cpu.idle();
        device.join().unwrap();
        assert!(!cpu.is_locked());
        assert_eq!(cpu.delivered(), 1);
    }
}
