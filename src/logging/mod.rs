//! # 日志记录模块 (Logging Module)
//!
//! ## 业务说明
//! 记录测试序列运行过程中的关键事件：步骤边界、测量失败、安全复位
//! 为故障排查和测试记录追溯提供日志支持
//!
//! ## 日志策略
//! - **步骤日志**: 每个步骤的开始与结束
//! - **失败日志**: 测量失败、无读数、控制台错误
//! - **安全日志**: safety 阶段的复位动作与其中的错误
//!
//! ## Rust知识点
//! - **日志宏**: 使用log crate的宏系统
//! - **环境配置**: 通过env_logger进行环境变量配置

pub mod logger_config;

pub use logger_config::*;

/// 记录测量失败日志
#[macro_export]
macro_rules! log_measurement_failure {
    ($msg:expr) => {
        log::warn!("[测量失败] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::warn!("[测量失败] {}", format!($msg, $($arg)*));
    };
}

/// 记录步骤事件日志
#[macro_export]
macro_rules! log_step_event {
    ($msg:expr) => {
        log::info!("[步骤] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::info!("[步骤] {}", format!($msg, $($arg)*));
    };
}

/// 记录安全复位日志
#[macro_export]
macro_rules! log_safety_event {
    ($msg:expr) => {
        log::info!("[安全复位] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::info!("[安全复位] {}", format!($msg, $($arg)*));
    };
}

/// 记录用户配置操作警告
#[macro_export]
macro_rules! log_config_warning {
    ($msg:expr) => {
        log::warn!("[配置警告] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        log::warn!("[配置警告] {}", format!($msg, $($arg)*));
    };
}

// 重新导出宏
pub use log_config_warning;
pub use log_measurement_failure;
pub use log_safety_event;
pub use log_step_event;
