use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 测试序列引擎统一错误类型
/// 用于封装引擎、注册表、传感器与仪器交互中可能出现的各种错误
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AppError {
    /// 通用错误，包含错误消息
    #[error("通用错误: {message}")]
    Generic { message: String },

    /// 输入/输出错误
    #[error("IO错误: {message} (Kind: {kind})")]
    IoError { message: String, kind: String },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    ConfigurationError { message: String },

    /// 验证错误（数据验证失败）
    #[error("验证错误: {message}")]
    ValidationError { message: String },

    /// 资源未找到错误（注册表中不存在的键）
    #[error("资源未找到: {resource_type} - {message}")]
    NotFoundError {
        resource_type: String,
        message: String,
    },

    /// 注册表键重复
    ///
    /// **业务含义**: 设备、传感器、测量项或限值以相同名称重复登记
    /// **处理方式**: 属于致命的配置错误，`open()` 会因此中止
    #[error("名称重复: {registry} 中已存在 '{name}'")]
    DuplicateName { registry: String, name: String },

    /// 测量失败：读数未满足限值，且 position_fail 生效、不在抑制作用域内
    ///
    /// 引擎捕获后记录失败并继续执行下一个步骤
    #[error("测量失败: {measurement} - {message}")]
    MeasurementFailed { measurement: String, message: String },

    /// 传感器在超时时间内没有产生任何值
    #[error("无测量结果: {measurement} - {message}")]
    NoResult { measurement: String, message: String },

    /// 限值构造非法（例如上下限颠倒、正则无法编译）
    #[error("限值错误: {limit} - {message}")]
    LimitError { limit: String, message: String },

    /// 控制台驱动返回的错误，传感器按测量失败处理
    #[error("控制台错误: {message}")]
    ConsoleError { message: String },

    /// 仪器操作失败
    #[error("仪器错误: {instrument} - {message}")]
    InstrumentError { instrument: String, message: String },

    /// 测试运行被取消
    #[error("运行已取消: {message}")]
    Cancelled { message: String },

    /// 超时错误
    #[error("操作超时: {operation} - {message}")]
    TimeoutError {
        operation: String,
        message: String,
    },

    /// 状态转换错误
    #[error("状态转换错误: 从 {from_state} 到 {to_state} - {message}")]
    StateTransitionError {
        from_state: String,
        to_state: String,
        message: String,
    },

    /// JSON序列化/反序列化错误
    #[error("JSON序列化/反序列化错误: {message}")]
    JsonError { message: String },

    /// 未实现的功能错误
    #[error("未实现的功能: {feature_name}")]
    NotImplemented { feature_name: String },

    /// Mock错误（仅用于测试）
    #[error("Mock错误: {0}")]
    MockError(String),
}

impl AppError {
    /// 创建通用错误
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// 创建IO错误
    pub fn io_error(message: impl Into<String>, kind_str: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
            kind: kind_str.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found_error(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFoundError {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// 创建名称重复错误
    ///
    /// **参数**: `registry` - 注册表名称（Devices / Sensors / Measurements / TestLimits）
    /// **参数**: `name` - 冲突的键
    pub fn duplicate_name(registry: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            registry: registry.into(),
            name: name.into(),
        }
    }

    /// 创建测量失败错误
    pub fn measurement_failed(measurement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MeasurementFailed {
            measurement: measurement.into(),
            message: message.into(),
        }
    }

    /// 创建无结果错误
    pub fn no_result(measurement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NoResult {
            measurement: measurement.into(),
            message: message.into(),
        }
    }

    /// 创建限值错误
    pub fn limit_error(limit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LimitError {
            limit: limit.into(),
            message: message.into(),
        }
    }

    /// 创建控制台错误
    pub fn console_error(message: impl Into<String>) -> Self {
        Self::ConsoleError {
            message: message.into(),
        }
    }

    /// 创建仪器错误
    pub fn instrument_error(instrument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InstrumentError {
            instrument: instrument.into(),
            message: message.into(),
        }
    }

    /// 创建取消错误
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout_error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TimeoutError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 创建状态转换错误
    pub fn state_transition_error(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StateTransitionError {
            from_state: from_state.into(),
            to_state: to_state.into(),
            message: message.into(),
        }
    }

    /// 创建JSON序列化错误
    pub fn json_error(message: impl Into<String>) -> Self {
        Self::JsonError {
            message: message.into(),
        }
    }

    /// 创建未实现的功能错误
    pub fn not_implemented_error(feature_name: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature_name: feature_name.into(),
        }
    }

    /// 是否属于"测量类"失败
    ///
    /// 步骤调度器据此区分：测量类失败只记录并继续下一个步骤，
    /// 其他错误则标记运行出错并进入 safety()
    pub fn is_measurement_failure(&self) -> bool {
        matches!(
            self,
            AppError::MeasurementFailed { .. } | AppError::NoResult { .. } | AppError::ConsoleError { .. }
        )
    }

    /// 获取错误的简短描述
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Generic { .. } => "GENERIC",
            AppError::IoError { .. } => "IO_ERROR",
            AppError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::NotFoundError { .. } => "NOT_FOUND_ERROR",
            AppError::DuplicateName { .. } => "DUPLICATE_NAME_ERROR",
            AppError::MeasurementFailed { .. } => "MEASUREMENT_FAILED_ERROR",
            AppError::NoResult { .. } => "NO_RESULT_ERROR",
            AppError::LimitError { .. } => "LIMIT_ERROR",
            AppError::ConsoleError { .. } => "CONSOLE_ERROR",
            AppError::InstrumentError { .. } => "INSTRUMENT_ERROR",
            AppError::Cancelled { .. } => "CANCELLED",
            AppError::TimeoutError { .. } => "TIMEOUT_ERROR",
            AppError::StateTransitionError { .. } => "STATE_TRANSITION_ERROR",
            AppError::JsonError { .. } => "JSON_ERROR",
            AppError::NotImplemented { .. } => "NOT_IMPLEMENTED_ERROR",
            AppError::MockError(..) => "MOCK_ERROR",
        }
    }
}

/// 标准 I/O 错误到 AppError 的转换
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError { message: err.to_string(), kind: format!("{:?}", err.kind()) }
    }
}

/// serde_json 错误到 AppError 的转换
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonError { message: err.to_string() }
    }
}

/// 字符串错误到 AppError 的转换（通用错误）
impl From<String> for AppError {
    fn from(err_msg: String) -> Self {
        Self::Generic { message: err_msg }
    }
}

/// &str 错误到 AppError 的转换（通用错误）
impl From<&str> for AppError {
    fn from(err_msg: &str) -> Self {
        Self::Generic { message: err_msg.to_string() }
    }
}

/// 应用程序结果类型别名
/// 简化错误处理的类型定义
pub type AppResult<T> = Result<T, AppError>;
