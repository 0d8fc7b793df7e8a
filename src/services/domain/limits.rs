/// 测试限值
///
/// 每个限值是对单个读数的类型化约束，负责把读数判定为 PASS / FAIL。
/// 限值按名称登记在 `TestLimits` 中，测量项构造时复制一份持有；
/// 正则限值的调整经 `Measurements::adjust_limit` 同步到所有使用者。

use crate::models::ReadingValue;
use crate::services::domain::registry::NamedRegistry;
use crate::utils::error::{AppError, AppResult};
use log::debug;
use regex::Regex;
use std::fmt;

/// 内置限值：操作员确认
pub const LIMIT_NOTIFY: &str = "Notify";
/// 内置限值：编程结果码为 0
pub const LIMIT_PROGRAM_OK: &str = "ProgramOk";

/// 限值类型
#[derive(Debug, Clone)]
pub enum LimitKind {
    /// 值 ≤ max
    Low { max: f64 },
    /// 值 ≥ min
    High { min: f64 },
    /// lo ≤ 值 ≤ hi
    Between { lo: f64, hi: f64 },
    /// nominal − delta ≤ 值 ≤ nominal + delta
    ///
    /// 按区间端点判定而不是 |值 − nominal|，两者在末位舍入上可能相差，以端点为准
    Delta { nominal: f64, delta: f64 },
    /// 带宽 band = |nominal|·percent/100，nominal − band ≤ 值 ≤ nominal + band（端点判定）
    Percent { nominal: f64, percent: f64 },
    /// nominal·(1 − lo/100) ≤ 值 ≤ nominal·(1 + hi/100)
    PercentLoHi { nominal: f64, percent_lo: f64, percent_hi: f64 },
    /// 值 == expected
    Boolean { expected: bool },
    /// 有掩码时 (值 & mask) == expected，否则直接相等
    Integer { expected: i64, mask: Option<i64> },
    /// 字符串值匹配正则
    RegExp { pattern: String, regex: Regex },
}

impl LimitKind {
    /// 限值类型名称，用于日志
    pub fn kind_name(&self) -> &'static str {
        match self {
            LimitKind::Low { .. } => "LimitLow",
            LimitKind::High { .. } => "LimitHigh",
            LimitKind::Between { .. } => "LimitBetween",
            LimitKind::Delta { .. } => "LimitDelta",
            LimitKind::Percent { .. } => "LimitPercent",
            LimitKind::PercentLoHi { .. } => "LimitPercentLoHi",
            LimitKind::Boolean { .. } => "LimitBoolean",
            LimitKind::Integer { .. } => "LimitInteger",
            LimitKind::RegExp { .. } => "LimitRegExp",
        }
    }

    /// 数值型限值的判定区间（含端点），非数值限值返回 None
    ///
    /// `check` 对数值限值就是用这个区间判定的
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            LimitKind::Low { max } => Some((f64::NEG_INFINITY, *max)),
            LimitKind::High { min } => Some((*min, f64::INFINITY)),
            LimitKind::Between { lo, hi } => Some((*lo, *hi)),
            LimitKind::Delta { nominal, delta } => Some((nominal - delta, nominal + delta)),
            LimitKind::Percent { nominal, percent } => {
                let band = nominal.abs() * percent / 100.0;
                Some((nominal - band, nominal + band))
            }
            LimitKind::PercentLoHi { nominal, percent_lo, percent_hi } => {
                let lo = nominal - nominal.abs() * percent_lo / 100.0;
                let hi = nominal + nominal.abs() * percent_hi / 100.0;
                Some((lo, hi))
            }
            _ => None,
        }
    }
}

/// 测试限值
#[derive(Debug, Clone)]
pub struct Limit {
    /// 限值名称，在所属 TestLimits 中唯一
    pub name: String,
    /// 说明
    pub doc: String,
    /// 单位，写入读数
    pub unit: Option<String>,
    /// 失败时是否标记夹具位置失败
    pub position_fail: bool,
    /// 读数是否出现在 SigResult 中
    pub send_signal: bool,
    kind: LimitKind,
}

impl Limit {
    fn build(name: impl Into<String>, kind: LimitKind) -> AppResult<Self> {
        let name = name.into();
        Self::validate(&name, &kind)?;
        Ok(Self {
            name,
            doc: String::new(),
            unit: None,
            position_fail: true,
            send_signal: true,
            kind,
        })
    }

    /// 校验限值参数，非法组合返回 LimitError
    fn validate(name: &str, kind: &LimitKind) -> AppResult<()> {
        if name.is_empty() {
            return Err(AppError::limit_error(name, "限值名称不能为空"));
        }
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        match kind {
            LimitKind::Low { max } if !finite(&[*max]) => {
                Err(AppError::limit_error(name, "上限必须是有限数"))
            }
            LimitKind::High { min } if !finite(&[*min]) => {
                Err(AppError::limit_error(name, "下限必须是有限数"))
            }
            LimitKind::Between { lo, hi } => {
                if !finite(&[*lo, *hi]) {
                    Err(AppError::limit_error(name, "上下限必须是有限数"))
                } else if lo > hi {
                    Err(AppError::limit_error(name, format!("下限 {} 大于上限 {}", lo, hi)))
                } else {
                    Ok(())
                }
            }
            LimitKind::Delta { nominal, delta } => {
                if !finite(&[*nominal, *delta]) || *delta < 0.0 {
                    Err(AppError::limit_error(name, "delta 必须是非负有限数"))
                } else {
                    Ok(())
                }
            }
            LimitKind::Percent { nominal, percent } => {
                if !finite(&[*nominal, *percent]) || *percent < 0.0 {
                    Err(AppError::limit_error(name, "百分比必须是非负有限数"))
                } else {
                    Ok(())
                }
            }
            LimitKind::PercentLoHi { nominal, percent_lo, percent_hi } => {
                if !finite(&[*nominal, *percent_lo, *percent_hi])
                    || *percent_lo < 0.0
                    || *percent_hi < 0.0
                {
                    Err(AppError::limit_error(name, "百分比必须是非负有限数"))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// LimitLow：值 ≤ max
    pub fn low(name: impl Into<String>, max: f64) -> AppResult<Self> {
        Self::build(name, LimitKind::Low { max })
    }

    /// LimitHigh：值 ≥ min
    pub fn high(name: impl Into<String>, min: f64) -> AppResult<Self> {
        Self::build(name, LimitKind::High { min })
    }

    /// LimitBetween：lo ≤ 值 ≤ hi
    pub fn between(name: impl Into<String>, lo: f64, hi: f64) -> AppResult<Self> {
        Self::build(name, LimitKind::Between { lo, hi })
    }

    /// LimitDelta：|值 − nominal| ≤ delta
    pub fn delta(name: impl Into<String>, nominal: f64, delta: f64) -> AppResult<Self> {
        Self::build(name, LimitKind::Delta { nominal, delta })
    }

    /// LimitPercent：|值 − nominal| ≤ nominal·percent/100
    pub fn percent(name: impl Into<String>, nominal: f64, percent: f64) -> AppResult<Self> {
        Self::build(name, LimitKind::Percent { nominal, percent })
    }

    /// LimitPercentLoHi：非对称百分比带
    pub fn percent_lo_hi(
        name: impl Into<String>,
        nominal: f64,
        percent_lo: f64,
        percent_hi: f64,
    ) -> AppResult<Self> {
        Self::build(name, LimitKind::PercentLoHi { nominal, percent_lo, percent_hi })
    }

    /// LimitBoolean：值 == expected
    pub fn boolean(name: impl Into<String>, expected: bool) -> AppResult<Self> {
        Self::build(name, LimitKind::Boolean { expected })
    }

    /// LimitInteger：值 == expected，带掩码时先与掩码
    pub fn integer(name: impl Into<String>, expected: i64, mask: Option<i64>) -> AppResult<Self> {
        Self::build(name, LimitKind::Integer { expected, mask })
    }

    /// LimitRegExp：字符串值匹配正则
    pub fn regexp(name: impl Into<String>, pattern: impl Into<String>) -> AppResult<Self> {
        let name = name.into();
        let pattern = pattern.into();
        let regex = Regex::new(&pattern)
            .map_err(|e| AppError::limit_error(name.clone(), format!("正则无法编译: {}", e)))?;
        Self::build(name, LimitKind::RegExp { pattern, regex })
    }

    /// 设置说明
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// 设置单位
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// 设置失败时是否标记夹具位置
    pub fn with_position_fail(mut self, position_fail: bool) -> Self {
        self.position_fail = position_fail;
        self
    }

    /// 设置读数是否随 SigResult 上报
    pub fn with_send_signal(mut self, send_signal: bool) -> Self {
        self.send_signal = send_signal;
        self
    }

    pub fn kind(&self) -> &LimitKind {
        &self.kind
    }

    /// 修改正则限值的模式
    ///
    /// 之后的判定使用新模式；已记录的读数不受影响。
    /// 对非正则限值调用返回 LimitError。
    pub fn adjust(&mut self, new_pattern: &str) -> AppResult<()> {
        match &mut self.kind {
            LimitKind::RegExp { pattern, regex } => {
                let compiled = Regex::new(new_pattern).map_err(|e| {
                    AppError::limit_error(self.name.clone(), format!("正则无法编译: {}", e))
                })?;
                debug!("[Limit] {} 正则调整: '{}' -> '{}'", self.name, pattern, new_pattern);
                *pattern = new_pattern.to_string();
                *regex = compiled;
                Ok(())
            }
            other => Err(AppError::limit_error(
                self.name.clone(),
                format!("{} 不支持 adjust", other.kind_name()),
            )),
        }
    }

    /// 判定读数是否通过
    ///
    /// 值的类型与限值不匹配时判定为失败；NaN 对任何数值限值都失败
    pub fn check(&self, value: &ReadingValue) -> bool {
        match &self.kind {
            LimitKind::Boolean { expected } => value.as_bool() == Some(*expected),
            LimitKind::Integer { expected, mask } => match value.as_i64() {
                Some(v) => match mask {
                    Some(m) => (v & m) == *expected,
                    None => v == *expected,
                },
                None => false,
            },
            LimitKind::RegExp { regex, .. } => match value.as_str() {
                Some(s) => regex.is_match(s),
                None => false,
            },
            numeric => match (numeric.bounds(), value.as_f64()) {
                (Some((lo, hi)), Some(v)) => lo <= v && v <= hi,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LimitKind::Low { max } => write!(f, "{}: <= {}", self.name, max),
            LimitKind::High { min } => write!(f, "{}: >= {}", self.name, min),
            LimitKind::Between { lo, hi } => write!(f, "{}: {} ~ {}", self.name, lo, hi),
            LimitKind::Delta { nominal, delta } => write!(f, "{}: {} ± {}", self.name, nominal, delta),
            LimitKind::Percent { nominal, percent } => {
                write!(f, "{}: {} ± {}%", self.name, nominal, percent)
            }
            LimitKind::PercentLoHi { nominal, percent_lo, percent_hi } => {
                write!(f, "{}: {} -{}% +{}%", self.name, nominal, percent_lo, percent_hi)
            }
            LimitKind::Boolean { expected } => write!(f, "{}: == {}", self.name, expected),
            LimitKind::Integer { expected, mask: Some(m) } => {
                write!(f, "{}: & {:#x} == {}", self.name, m, expected)
            }
            LimitKind::Integer { expected, mask: None } => write!(f, "{}: == {}", self.name, expected),
            LimitKind::RegExp { pattern, .. } => write!(f, "{}: ~ /{}/", self.name, pattern),
        }
    }
}

/// 限值集合
/// 总是包含两个内置限值 `Notify` 与 `ProgramOk`
#[derive(Debug, Clone)]
pub struct TestLimits {
    registry: NamedRegistry<Limit>,
}

impl TestLimits {
    /// 由产品限值表创建，内置限值排在最前
    pub fn new(limits: Vec<Limit>) -> AppResult<Self> {
        let mut registry = NamedRegistry::new("TestLimits");
        registry.insert(
            LIMIT_NOTIFY,
            Limit::boolean(LIMIT_NOTIFY, true)?.with_doc("操作员确认"),
        )?;
        registry.insert(
            LIMIT_PROGRAM_OK,
            Limit::integer(LIMIT_PROGRAM_OK, 0, None)?.with_doc("编程成功"),
        )?;
        for limit in limits {
            registry.insert(limit.name.clone(), limit)?;
        }
        Ok(Self { registry })
    }

    /// 追加一个限值，名称重复返回 DuplicateName
    pub fn insert(&mut self, limit: Limit) -> AppResult<()> {
        self.registry.insert(limit.name.clone(), limit)
    }

    pub fn get(&self, name: &str) -> AppResult<&Limit> {
        self.registry.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> AppResult<&mut Limit> {
        self.registry.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.keys().map(|k| k.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Default for TestLimits {
    fn default() -> Self {
        // 内置限值参数固定合法
        Self::new(Vec::new()).unwrap_or(Self {
            registry: NamedRegistry::new("TestLimits"),
        })
    }
}
