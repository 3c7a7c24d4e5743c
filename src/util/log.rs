//! 日志宏
//!
//! 后端由 feature 决定，调用方只使用这里的宏:
//!
//! | feature                | 输出                      |
//! |------------------------|---------------------------|
//! | `log-defmt`            | defmt 帧，经 RTT 输出     |
//! | `dev` / `log-println`  | esp-println 文本行        |
//! | (无)                   | 展开为空                  |
//!
//! 级别约定:
//! - `log_trace!`: 区间维护、系统调用、idle 入口等热路径，只在调试时打开
//! - `log_debug!`: cache 开关、分配器初始化这类一次性事件
//! - `log_warn!`: 被拒绝的请求 (越权区间、分配器耗尽、line 配置不一致)
//!
//! 中断关闭期间 (`irq_lock` 与 `atomic_idle` 之间) 不打日志。

// ===================================================================
// defmt 后端 (feature = "log-defmt")
// ===================================================================
#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// esp-println 后端 (feature = "dev" 或 "log-println")
// ===================================================================
#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { esp_println::println!("[INFO] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { esp_println::println!("[DEBUG] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { esp_println::println!("[WARN] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { esp_println::println!("[ERROR] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { esp_println::println!("[TRACE] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 未选择后端: 参数不求值
// ===================================================================
#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

#[cfg(not(any(feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

// 模块路径导入: `use crate::util::log::log_warn;`
pub use crate::log_debug;
pub use crate::log_error;
pub use crate::log_info;
pub use crate::log_trace;
pub use crate::log_warn;

/// 只在 debug 构建中检查的断言，失败时先经日志后端报告条件
///
/// 供 `range-check` 的对齐检查使用。
#[macro_export]
macro_rules! debug_assert_msg {
    ($cond:expr, $($arg:tt)*) => {
        #[cfg(debug_assertions)]
        {
            if !$cond {
                $crate::log_error!("Assertion failed: {}", stringify!($cond));
                panic!("Assertion failed: {}", format_args!($($arg)*));
            }
        }
    };
}

pub use crate::debug_assert_msg;
