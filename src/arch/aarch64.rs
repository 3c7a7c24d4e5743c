//! AArch64: DAIF.I 屏蔽 IRQ，`wfi` 挂起
//!
//! `wfi` 在 IRQ 被屏蔽时仍会因挂起的中断而返回，所以先保持屏蔽执行
//! `wfi`，再恢复 DAIF，中断在恢复后立即被接收。

use core::arch::asm;

use super::{ArchIdle, IrqKey};

pub struct Arch;

impl ArchIdle for Arch {
    #[inline(always)]
    fn irq_lock() -> IrqKey {
        let daif: u64;
        unsafe {
            asm!(
                "mrs {daif}, daif",
                "msr daifset, #2",
                daif = out(reg) daif,
                options(nostack)
            );
        }
        IrqKey::from_raw(daif as usize)
    }

    #[inline(always)]
    fn irq_unlock(key: IrqKey) {
        unsafe {
            asm!(
                "msr daif, {daif}",
                "isb",
                daif = in(reg) key.raw() as u64,
                options(nostack)
            );
        }
    }

    #[inline(always)]
    fn idle() {
        unsafe {
            asm!(
                "msr daifclr, #2",
                "isb",
                "dsb sy",
                "wfi",
                options(nostack)
            );
        }
    }

    #[inline(always)]
    fn atomic_idle(key: IrqKey) {
        unsafe {
            asm!(
                "msr daifset, #2",
                "isb",
                "dsb sy",
                "wfi",
                "msr daif, {daif}",
                "isb",
                daif = in(reg) key.raw() as u64,
                options(nostack)
            );
        }
    }
}
