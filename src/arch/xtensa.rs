//! Xtensa LX: 通过 PS.INTLEVEL 屏蔽中断，`waiti` 挂起

use core::arch::asm;

use super::{ArchIdle, IrqKey};
use crate::config;

pub struct Arch;

impl ArchIdle for Arch {
    #[inline(always)]
    fn irq_lock() -> IrqKey {
        let ps: u32;
        // rsil 原子地读出 PS 并把 INTLEVEL 提升到内核锁级别
        unsafe {
            asm!(
                "rsil {ps}, {level}",
                ps = out(reg) ps,
                level = const config::IRQ_LOCK_LEVEL,
                options(nostack)
            );
        }
        IrqKey::from_raw(ps as usize)
    }

    #[inline(always)]
    fn irq_unlock(key: IrqKey) {
        unsafe {
            asm!(
                "wsr.ps {ps}",
                "rsync",
                ps = in(reg) key.raw() as u32,
                options(nostack)
            );
        }
    }

    #[inline(always)]
    fn idle() {
        unsafe { asm!("waiti 0", options(nostack)) };
    }

    /// `waiti 0` 把 INTLEVEL 置 0 并挂起，中断服务返回后再写回 PS。
    /// 屏蔽期间挂起的中断在 `waiti` 执行时立即被接收，不会丢失。
    #[inline(always)]
    fn atomic_idle(key: IrqKey) {
        unsafe {
            asm!(
                "waiti 0",
                "wsr.ps {ps}",
                "rsync",
                ps = in(reg) key.raw() as u32,
                options(nostack)
            );
        }
    }
}
