/// 错误处理模块
///
/// 重新导出 utils::error 中的错误类型，提供更短的导入路径：
/// `use crate::error::{AppError, AppResult};`

pub use crate::utils::error::*;
