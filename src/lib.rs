/// FAT 测试序列引擎 - 核心库
///
/// 为生产测试台提供限值、传感器、测量项与测试步骤生命周期管理
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

// 重新导出常用类型，方便使用
pub use models::*;
pub use services::*;
pub use utils::{AppConfig, AppError, AppResult, ConfigManager, SequenceSettings};
