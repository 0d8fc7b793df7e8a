//! # 模型枚举类型模块
//!
//! ## 业务作用
//! 本模块定义了测试序列引擎中使用的枚举类型，包括：
//! - **结果代码**: 读数与整次运行的 PASS / FAIL
//! - **步骤阶段**: SigStep 事件的开始 / 结束
//! - **序列状态**: TestSequence 生命周期状态机
//! - **测试台类型**: ATE 型号，决定串口路径重映射
//!
//! ## 设计原则
//! - **类型安全**: 使用强类型枚举避免魔法字符串
//! - **序列化支持**: 所有枚举都支持JSON序列化
//! - **字符串转换**: 提供与字符串的双向转换能力

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 结果代码
/// 读数、步骤与整次运行共用；尚未产生任何读数时以 `Option::None` 表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// 通过
    Pass,
    /// 失败
    Fail,
}

impl ResultCode {
    /// 由布尔判定结果构造
    pub fn from_pass(is_pass: bool) -> Self {
        if is_pass {
            ResultCode::Pass
        } else {
            ResultCode::Fail
        }
    }

    /// 合并两个结果代码：任一失败即失败
    pub fn combine(current: Option<ResultCode>, other: ResultCode) -> Option<ResultCode> {
        match (current, other) {
            (Some(ResultCode::Fail), _) | (_, ResultCode::Fail) => Some(ResultCode::Fail),
            _ => Some(ResultCode::Pass),
        }
    }
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultCode::Pass => "PASS",
            ResultCode::Fail => "FAIL",
        };
        write!(f, "{}", s)
    }
}

/// 步骤事件阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPhase {
    /// 步骤开始
    Start,
    /// 步骤结束
    End,
}

impl Display for StepPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepPhase::Start => "START",
            StepPhase::End => "END",
        };
        write!(f, "{}", s)
    }
}

/// 测试序列生命周期状态
///
/// ```text
/// Created --open--> Opened --run--> Running --(safety)--> Safe --close--> Closed
///                     ^                                      |
///                     +----------- 可重复运行 ----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    /// 已创建，注册表尚未打开
    Created,
    /// 注册表已打开
    Opened,
    /// 步骤执行中
    Running,
    /// safety() 已执行，可再次运行或关闭
    Safe,
    /// 已关闭
    Closed,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::Created
    }
}

impl Display for SequenceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SequenceState::Created => "Created",
            SequenceState::Opened => "Opened",
            SequenceState::Running => "Running",
            SequenceState::Safe => "Safe",
            SequenceState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// 测试台类型
/// 不同型号的测试台串口编号不同，端口解析时据此重映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TesterType {
    Ate2,
    Ate3,
    Ate4,
    Ate5,
}

impl Default for TesterType {
    fn default() -> Self {
        Self::Ate3
    }
}

impl Display for TesterType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TesterType::Ate2 => "ATE2",
            TesterType::Ate3 => "ATE3",
            TesterType::Ate4 => "ATE4",
            TesterType::Ate5 => "ATE5",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TesterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ATE2" => Ok(TesterType::Ate2),
            "ATE3" => Ok(TesterType::Ate3),
            "ATE4" => Ok(TesterType::Ate4),
            "ATE5" => Ok(TesterType::Ate5),
            _ => Err(format!("Invalid TesterType: {}", s)),
        }
    }
}

/// 继电器动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayAction {
    On,
    Off,
}

/// 目标操作系统，端口表按此选择设备路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOs {
    Linux,
    Windows,
}

impl HostOs {
    /// 当前编译目标的操作系统
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::Linux
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_combine() {
        assert_eq!(ResultCode::combine(None, ResultCode::Pass), Some(ResultCode::Pass));
        assert_eq!(ResultCode::combine(Some(ResultCode::Pass), ResultCode::Fail), Some(ResultCode::Fail));
        // 失败之后的通过不会把结果改回 PASS
        assert_eq!(ResultCode::combine(Some(ResultCode::Fail), ResultCode::Pass), Some(ResultCode::Fail));
    }

    #[test]
    fn test_tester_type_from_str() {
        assert_eq!("ate4".parse::<TesterType>().unwrap(), TesterType::Ate4);
        assert_eq!("ATE5".parse::<TesterType>().unwrap(), TesterType::Ate5);
        assert!("ATE9".parse::<TesterType>().is_err());
        assert_eq!(TesterType::Ate3.to_string(), "ATE3");
    }
}
