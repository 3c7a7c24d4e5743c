//! CPU idle 入口
//!
//! 内核的 idle 线程在没有就绪任务时挂起 CPU。典型用法:
//!
//! ```rust,ignore
//! use rustrtos_cache::{atomic_idle, irq_lock, irq_unlock};
//!
//! loop {
//!     let key = irq_lock();
//!     if scheduler_has_ready_task() {
//!         irq_unlock(key);
//!         continue;
//!     }
//!     // 检查与挂起之间到达的中断也会唤醒 CPU
//!     atomic_idle(key);
//! }
//! ```
//!
//! 先 `irq_unlock` 再 `idle` 会在两步之间留下窗口: 窗口内到达的中断
//! 被服务后，CPU 仍然进入挂起，直到下一个中断才醒来。

use portable_atomic::{AtomicU64, Ordering};

pub use crate::arch::IrqKey;
use crate::arch::{Arch, ArchIdle};
use crate::util::log::log_trace;

/// idle 进入次数
static IDLE_ENTRIES: AtomicU64 = AtomicU64::new(0);

/// 屏蔽中断，返回之前的状态
#[inline(always)]
pub fn irq_lock() -> IrqKey {
    Arch::irq_lock()
}

/// 恢复 `irq_lock` 之前的中断状态
#[inline(always)]
pub fn irq_unlock(key: IrqKey) {
    Arch::irq_unlock(key)
}

/// 打开中断并挂起，直到任意中断到来
#[inline]
pub fn idle() {
    IDLE_ENTRIES.fetch_add(1, Ordering::Relaxed);
    log_trace!("cpu idle");
    Arch::idle();
}

/// 恢复 `key` 并挂起，两步不可分割
///
/// 必须在 [`irq_lock`] 之后调用。返回时中断状态等于 `key` 对应的状态。
#[inline]
pub fn atomic_idle(key: IrqKey) {
    IDLE_ENTRIES.fetch_add(1, Ordering::Relaxed);
    log_trace!("cpu atomic idle");
    Arch::atomic_idle(key);
}

/// 自启动以来进入 idle 的次数
pub fn idle_entries() -> u64 {
    IDLE_ENTRIES.load(Ordering::Relaxed)
}

#[cfg(all(test, not(any(target_arch = "xtensa", target_arch = "aarch64"))))]
mod tests {
    use super::*;
    use crate::arch::host::CPU;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    /// 全局 CPU 只有一个，测试串行执行
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_idle_loop_does_not_lose_wakeup() {
        let _guard = SERIAL.lock().unwrap();
        let before = CPU.delivered();
        let entries = idle_entries();

        let key = irq_lock();
        CPU.raise_irq();
        atomic_idle(key);

        assert_eq!(CPU.delivered(), before + 1);
        assert!(idle_entries() >= entries + 1);
    }

    #[test]
    fn test_idle_wakes_from_device_thread() {
        let _guard = SERIAL.lock().unwrap();
        let before = CPU.delivered();

        let key = irq_lock();
        let device = thread::spawn(|| {
            thread::sleep(Duration::from_millis(10));
            CPU.raise_irq();
        });
        atomic_idle(key);
        device.join().unwrap();

        assert!(CPU.delivered() > before);
    }

    #[test]
    fn test_lock_unlock_round_trip() {
        let _guard = SERIAL.lock().unwrap();
        let key = irq_lock();
        assert!(CPU.is_locked());
        irq_unlock(key);
        assert!(!CPU.is_locked());
    }
}
