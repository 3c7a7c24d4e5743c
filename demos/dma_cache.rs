//! DMA 与 cache 一致性示例
//!
//! 演示:
//! - cache line 独占的静态缓冲区
//! - DMA 读前 flush、DMA 写前后 invalidate
//! - 指令 cache 的整体失效
//!
//! # 运行
//! ```bash
//! cargo run --example dma_cache --features dev,esp32s3,backend-soc,dcache,icache --target xtensa-esp32s3-none-elf
//! ```

#![no_std]
#![no_main]

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::timer::timg::TimerGroup;
use rustrtos_cache::cache::{self, CacheDomain};
use rustrtos_cache::dcacheline_exclusive_data;
use rustrtos_cache::mem::dma::DmaBuffer;
use static_cell::StaticCell;

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

/// 接收缓冲区，放在静态存储里交给外设
static RX_BUFFER: StaticCell<DmaBuffer<256>> = StaticCell::new();

dcacheline_exclusive_data! {
    /// 另一个核读取的邮箱
    static MAILBOX: [u32; 4] = [0; 4];
}

/// DMA 演示任务
#[embassy_executor::task]
async fn dma_demo_task() {
    println!("\n=== Cache Info ===");
    println!("  D-cache line: {} bytes", cache::data_line_size());
    println!("  I-cache line: {} bytes", cache::instr_line_size());
    println!("  D-cache enabled: {}", cache::data_is_enabled());

    // 发送方向: CPU 写入后 flush，外设读到的是新数据
    println!("\n=== TX Buffer ===");
    let mut tx: DmaBuffer<256> = DmaBuffer::new();
    for (i, byte) in tx.as_mut_slice().iter_mut().enumerate() {
        *byte = i as u8;
    }
    match tx.prepare_for_dma_read() {
        Ok(()) => println!("TX flushed {} bytes at {:p}", tx.maintained_len(), tx.dma_address()),
        Err(e) => println!("TX prepare failed: {:?}", e),
    }
    // 外设读取完成
    tx.complete_dma_read().ok();

    // 接收方向: 开始前和结束后都丢弃 line
    println!("\n=== RX Buffer ===");
    let rx: &'static DmaBuffer<256> = RX_BUFFER.init(DmaBuffer::new());
    match rx.prepare_for_dma_write() {
        Ok(()) => println!("RX ready at {:p}", rx.dma_address()),
        Err(e) => println!("RX prepare failed: {:?}", e),
    }
    // 外设写入完成
    match rx.complete_dma_write() {
        Ok(()) => println!("RX first byte: {:#x}", rx.as_slice()[0]),
        Err(e) => println!("RX complete failed: {:?}", e),
    }

    // 独占 line 的共享数据: 写入后 flush，另一个核读之前 invalidate
    println!("\n=== Exclusive Mailbox ===");
    unsafe { MAILBOX.get_mut()[0] = 0xC0FF_EE00 };
    match cache::data_flush_range(MAILBOX.as_ptr() as *const u8, MAILBOX.reserved_len()) {
        Ok(()) => println!("Mailbox flushed ({} bytes reserved)", MAILBOX.reserved_len()),
        Err(e) => println!("Mailbox flush failed: {:?}", e),
    }

    // 代码更新后丢弃指令 cache
    println!("\n=== Instruction Cache ===");
    match unsafe { cache::instr_invd_all() } {
        Ok(()) => println!("I-cache invalidated"),
        Err(e) => println!("I-cache invalidate: {:?}", e),
    }
    println!("I-cache present: {}", cache::global().is_present(CacheDomain::Instruction));

    println!("\nDMA cache demo complete!");
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    println!("DMA Cache Example");
    println!("=================");

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    spawner.spawn(dma_demo_task()).ok();

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
