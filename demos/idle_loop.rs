//! 原子 idle 示例
//!
//! 演示 idle 线程的标准写法:
//! - `irq_lock` 后检查是否有工作
//! - 没有工作时 `atomic_idle`，检查与挂起之间到达的中断不会丢失
//!
//! # 运行
//! ```bash
//! cargo run --example idle_loop --features dev,esp32s3,backend-soc,dcache,icache --target xtensa-esp32s3-none-elf
//! ```

#![no_std]
#![no_main]

esp_bootloader_esp_idf::esp_app_desc!();

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::timer::timg::TimerGroup;
use rustrtos_cache::idle::{atomic_idle, idle_entries, irq_lock, irq_unlock};

// ===== 条件编译日志 =====
#[cfg(feature = "dev")]
use esp_println::println;

#[cfg(not(feature = "dev"))]
macro_rules! println {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

// ===== Panic Handler =====
#[cfg(feature = "dev")]
use esp_backtrace as _;

#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop { core::hint::spin_loop(); }
}

/// 生产者任务写入的待处理工作数
static WORK: AtomicU32 = AtomicU32::new(0);

/// 周期性产生工作
#[embassy_executor::task]
async fn producer_task() {
    loop {
        Timer::after(Duration::from_millis(500)).await;
        WORK.fetch_add(1, Ordering::Release);
    }
}

/// 处理工作，没有工作时在中断之间挂起 CPU
#[embassy_executor::task]
async fn idle_task() {
    let mut handled: u32 = 0;

    loop {
        let key = irq_lock();
        let work = WORK.swap(0, Ordering::Acquire);
        if work != 0 {
            irq_unlock(key);
            handled += work;
            println!("Handled {} work items, {} idle entries", handled, idle_entries());
            // 让出执行器，生产者才能继续运行
            Timer::after(Duration::from_millis(1)).await;
            continue;
        }

        // 任意中断 (定时器 tick) 都会唤醒
        atomic_idle(key);
        yield_now().await;
    }
}

/// 让出一次执行器
async fn yield_now() {
    Timer::after(Duration::from_ticks(0)).await;
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    println!("Atomic Idle Example");
    println!("===================");

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    spawner.spawn(producer_task()).ok();
    spawner.spawn(idle_task()).ok();

    loop {
        Timer::after(Duration::from_secs(10)).await;
        println!("Idle entries so far: {}", idle_entries());
    }
}
