//! 核心数据结构：读数、测量结果、被测单元与夹具描述

use crate::models::enums::ResultCode;
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 默认序列号格式：前缀 A/S + 年周(4位) + 产品代码(2位) + 流水号(4位)，如 `A1626010123`
pub const DEFAULT_SERNUM_PATTERN: &str = r"^[AS][0-9]{4}[0-9A-Z]{2}[0-9]{4}$";

static DEFAULT_SERNUM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_SERNUM_PATTERN).expect("默认序列号正则必须合法"));

/// 读数值
/// 数值、布尔、整数或字符串，取决于限值类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ReadingValue {
    /// 以浮点数读取（整数会被提升）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Float(v) => Some(*v),
            ReadingValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// 以整数读取；浮点数仅在无小数部分时接受
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ReadingValue::Int(v) => Some(*v),
            ReadingValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            ReadingValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// 以布尔读取
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ReadingValue::Bool(b) => Some(*b),
            ReadingValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// 以字符串读取
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ReadingValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Bool(b) => write!(f, "{}", b),
            ReadingValue::Int(v) => write!(f, "{}", v),
            ReadingValue::Float(v) => write!(f, "{}", v),
            ReadingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(v: f64) -> Self {
        ReadingValue::Float(v)
    }
}

impl From<i64> for ReadingValue {
    fn from(v: i64) -> Self {
        ReadingValue::Int(v)
    }
}

impl From<bool> for ReadingValue {
    fn from(v: bool) -> Self {
        ReadingValue::Bool(v)
    }
}

impl From<&str> for ReadingValue {
    fn from(v: &str) -> Self {
        ReadingValue::Text(v.to_string())
    }
}

impl From<String> for ReadingValue {
    fn from(v: String) -> Self {
        ReadingValue::Text(v)
    }
}

/// 单个读数
/// 记录测量名、实际值、单位、所用限值及判定结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// 测量名称
    pub name: String,
    /// 实际值；传感器超时未给出值时为 None
    pub value: Option<ReadingValue>,
    /// 单位
    pub unit: Option<String>,
    /// 判定所用的限值名称
    pub limit_name: String,
    /// 是否通过
    pub is_pass: bool,
    /// 读数对应的夹具位置
    pub positions: Vec<usize>,
    /// 读数时间
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        name: impl Into<String>,
        value: Option<ReadingValue>,
        unit: Option<String>,
        limit_name: impl Into<String>,
        is_pass: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            limit_name: limit_name.into(),
            is_pass,
            positions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// 设置读数对应的夹具位置
    pub fn with_positions(mut self, positions: Vec<usize>) -> Self {
        self.positions = positions;
        self
    }

    pub fn code(&self) -> ResultCode {
        ResultCode::from_pass(self.is_pass)
    }
}

/// 测量结果累加器
///
/// 单次 measure() 的返回值与整次运行的汇总结果共用此结构；
/// 任一折入的读数失败则 `code` 变为 FAIL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    /// 总体结果；未折入任何读数时为 None
    pub code: Option<ResultCode>,
    /// 已记录的读数
    pub readings: Vec<Reading>,
    /// 运行出错时的错误描述
    pub error: Option<String>,
    /// 被标记为失败的夹具位置
    pub failed_positions: BTreeSet<usize>,
}

impl MeasurementResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// 折入一个读数
    pub fn append(&mut self, reading: Reading) {
        self.fold_code(reading.code());
        self.readings.push(reading);
    }

    /// 只折入结果代码，不保留读数（send_signal = false 的限值）
    pub fn fold_code(&mut self, code: ResultCode) {
        self.code = ResultCode::combine(self.code, code);
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: &MeasurementResult) {
        if let Some(code) = other.code {
            self.fold_code(code);
        }
        self.readings.extend(other.readings.iter().cloned());
        self.failed_positions.extend(other.failed_positions.iter().copied());
        if self.error.is_none() {
            self.error = other.error.clone();
        }
    }

    /// 标记位置失败
    pub fn mark_positions_failed(&mut self, positions: &[usize]) {
        self.failed_positions.extend(positions.iter().copied());
    }

    /// 是否全部通过（无读数视为未判定，不算通过）
    pub fn is_pass(&self) -> bool {
        self.code == Some(ResultCode::Pass) && self.error.is_none()
    }

    /// 失败读数数量
    pub fn failed_count(&self) -> usize {
        self.readings.iter().filter(|r| !r.is_pass).count()
    }

    /// 按名称查找最近一次读数
    pub fn reading(&self, name: &str) -> Option<&Reading> {
        self.readings.iter().rev().find(|r| r.name == name)
    }
}

/// 批次物料信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotItem {
    /// 物料号
    pub number: String,
    /// 描述
    pub description: String,
    /// 物料版本
    pub revision: String,
}

impl LotItem {
    pub fn new(
        number: impl Into<String>,
        description: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            number: number.into(),
            description: description.into(),
            revision: revision.into(),
        }
    }
}

/// 被测单元（UUT）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uut {
    /// 序列号
    pub sernum: String,
    /// 产品版本，产品程序据此选择配置
    pub revision: String,
    /// 批次物料
    pub lot: LotItem,
    /// 夹具位置（从1开始）
    pub position: usize,
}

impl Uut {
    /// 使用默认序列号格式创建被测单元
    pub fn new(
        sernum: impl Into<String>,
        revision: impl Into<String>,
        lot: LotItem,
        position: usize,
    ) -> AppResult<Self> {
        let sernum = sernum.into();
        Self::validate_sernum(&sernum, &DEFAULT_SERNUM_REGEX)?;
        Ok(Self {
            sernum,
            revision: revision.into(),
            lot,
            position,
        })
    }

    /// 使用自定义序列号格式创建被测单元
    pub fn with_pattern(
        sernum: impl Into<String>,
        revision: impl Into<String>,
        lot: LotItem,
        position: usize,
        pattern: &str,
    ) -> AppResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| AppError::validation_error(format!("序列号格式无效: {}", e)))?;
        let sernum = sernum.into();
        Self::validate_sernum(&sernum, &regex)?;
        Ok(Self {
            sernum,
            revision: revision.into(),
            lot,
            position,
        })
    }

    fn validate_sernum(sernum: &str, regex: &Regex) -> AppResult<()> {
        if regex.is_match(sernum) {
            Ok(())
        } else {
            Err(AppError::validation_error(format!("序列号格式不正确: {}", sernum)))
        }
    }
}

/// 测试夹具描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// 夹具物料号，用于查询端口映射
    pub item_number: String,
    /// 描述
    pub description: String,
}

impl Fixture {
    pub fn new(item_number: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            item_number: item_number.into(),
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot() -> LotItem {
        LotItem::new("027176", "BatteryCheck fixture", "2")
    }

    #[test]
    fn test_uut_sernum_validation() {
        let uut = Uut::new("A1626010123", "5", lot(), 1).unwrap();
        assert_eq!(uut.sernum, "A1626010123");

        let err = Uut::new("bogus", "5", lot(), 1).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let custom = Uut::with_pattern("X-001", "1", lot(), 2, r"^X-\d{3}$").unwrap();
        assert_eq!(custom.position, 2);
    }

    #[test]
    fn test_measurement_result_folding() {
        let mut result = MeasurementResult::new();
        assert_eq!(result.code, None);
        assert!(!result.is_pass());

        result.append(Reading::new("Vout", Some(12.0.into()), Some("V".into()), "Vout", true));
        assert_eq!(result.code, Some(ResultCode::Pass));

        result.append(Reading::new("Iout", Some(3.1.into()), None, "Iout", false));
        result.append(Reading::new("Vbat", Some(12.8.into()), None, "Vbat", true));
        assert_eq!(result.code, Some(ResultCode::Fail));
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.reading("Iout").map(|r| r.is_pass), Some(false));
    }

    #[test]
    fn test_reading_value_conversions() {
        assert_eq!(ReadingValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(ReadingValue::Float(4.0).as_i64(), Some(4));
        assert_eq!(ReadingValue::Float(4.5).as_i64(), None);
        assert_eq!(ReadingValue::Int(0).as_bool(), Some(false));
        assert_eq!(ReadingValue::from("1.2.3").as_str(), Some("1.2.3"));
    }

    #[test]
    fn test_measurement_result_json() {
        let mut result = MeasurementResult::new();
        result.append(Reading::new("SwVer", Some("1.2.3".into()), None, "SwVer", true));
        let json = serde_json::to_string(&result).unwrap();
        let back: MeasurementResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.readings[0].value, Some(ReadingValue::Text("1.2.3".into())));
    }
}
