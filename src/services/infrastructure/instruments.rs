/// 仪器能力接口
///
/// 物理仪器驱动不属于引擎，引擎只通过这些 trait 与其交互。
/// 所有接口都是 `Send + Sync`，实现方自行处理内部可变性。

use crate::models::{ReadingValue, RelayAction};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 仪器基础接口，所有仪器都应实现
#[async_trait]
pub trait IInstrument: Send + Sync {
    /// 仪器名称
    fn instrument_name(&self) -> &str;

    /// 恢复到安全的默认状态
    async fn reset(&self) -> AppResult<()>;
}

/// 万用表测量功能
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmmFunction {
    DcVolts,
    AcVolts,
    DcAmps,
    Ohms,
}

/// 万用表通道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmmChannel {
    /// 高端端子
    pub high: u16,
    /// 低端端子
    pub low: u16,
    /// 测量功能
    pub function: DmmFunction,
    /// 量程
    pub range: f64,
    /// 分辨率
    pub resolution: f64,
}

impl DmmChannel {
    pub fn dc_volts(high: u16, low: u16, range: f64, resolution: f64) -> Self {
        Self {
            high,
            low,
            function: DmmFunction::DcVolts,
            range,
            resolution,
        }
    }
}

/// 数字万用表
#[async_trait]
pub trait IDmm: IInstrument {
    /// 配置通道并返回一次测量值
    async fn measure(&self, channel: &DmmChannel) -> AppResult<f64>;
}

/// 交流电源
#[async_trait]
pub trait IAcSource: IInstrument {
    async fn output(&self, voltage: f64, frequency: f64, output_on: bool) -> AppResult<()>;
}

/// 直流电源
#[async_trait]
pub trait IDcSource: IInstrument {
    async fn output(&self, voltage: f64, current_limit: Option<f64>, output_on: bool) -> AppResult<()>;
}

/// 直流电子负载
#[async_trait]
pub trait IDcLoad: IInstrument {
    async fn output(&self, current: f64, output_on: bool) -> AppResult<()>;
}

/// 继电器
#[async_trait]
pub trait IRelay: IInstrument {
    async fn set_on(&self) -> AppResult<()>;
    async fn set_off(&self) -> AppResult<()>;

    /// 吸合一段时间后释放
    async fn pulse(&self, duration: Duration) -> AppResult<()> {
        self.set_on().await?;
        tokio::time::sleep(duration).await;
        self.set_off().await
    }

    async fn apply(&self, action: RelayAction) -> AppResult<()> {
        match action {
            RelayAction::On => self.set_on().await,
            RelayAction::Off => self.set_off().await,
        }
    }
}

/// 单片机控制台（行式 ASCII 协议）
///
/// 驱动本身不属于引擎，这里只定义键值传感器需要的能力
#[async_trait]
pub trait IConsole: IInstrument {
    async fn open_port(&self) -> AppResult<()>;
    async fn close_port(&self) -> AppResult<()>;
    /// 读取命名参数，驱动错误以 ConsoleError 返回
    async fn query(&self, key: &str) -> AppResult<ReadingValue>;
}

/// 操作员界面
#[async_trait]
pub trait IOperatorUi: IInstrument {
    /// 显示提示，等待确认
    async fn notify(&self, prompt: &str) -> AppResult<()>;
    /// 是/否提问
    async fn yes_no(&self, prompt: &str) -> AppResult<bool>;
    /// 数据录入
    async fn data_entry(&self, prompt: &str) -> AppResult<String>;
}

/// 蓝牙扫描器
#[async_trait]
pub trait IBleScanner: IInstrument {
    /// 扫描指定地址，返回 RSSI；超时未发现返回 None
    async fn scan_rssi(&self, mac: &str, timeout: Duration) -> AppResult<Option<i32>>;
}

/// 设备句柄：Devices 注册表中保存的类型化仪器引用
#[derive(Clone)]
pub enum DeviceHandle {
    Dmm(Arc<dyn IDmm>),
    AcSource(Arc<dyn IAcSource>),
    DcSource(Arc<dyn IDcSource>),
    DcLoad(Arc<dyn IDcLoad>),
    Relay(Arc<dyn IRelay>),
    Console(Arc<dyn IConsole>),
    OperatorUi(Arc<dyn IOperatorUi>),
    BleScanner(Arc<dyn IBleScanner>),
}

impl DeviceHandle {
    /// 类型名称，用于错误信息
    pub fn kind_name(&self) -> &'static str {
        match self {
            DeviceHandle::Dmm(_) => "Dmm",
            DeviceHandle::AcSource(_) => "AcSource",
            DeviceHandle::DcSource(_) => "DcSource",
            DeviceHandle::DcLoad(_) => "DcLoad",
            DeviceHandle::Relay(_) => "Relay",
            DeviceHandle::Console(_) => "Console",
            DeviceHandle::OperatorUi(_) => "OperatorUi",
            DeviceHandle::BleScanner(_) => "BleScanner",
        }
    }

    pub fn instrument_name(&self) -> &str {
        match self {
            DeviceHandle::Dmm(d) => d.instrument_name(),
            DeviceHandle::AcSource(d) => d.instrument_name(),
            DeviceHandle::DcSource(d) => d.instrument_name(),
            DeviceHandle::DcLoad(d) => d.instrument_name(),
            DeviceHandle::Relay(d) => d.instrument_name(),
            DeviceHandle::Console(d) => d.instrument_name(),
            DeviceHandle::OperatorUi(d) => d.instrument_name(),
            DeviceHandle::BleScanner(d) => d.instrument_name(),
        }
    }

    /// 恢复仪器安全状态；控制台同时关闭端口
    pub async fn reset(&self) -> AppResult<()> {
        match self {
            DeviceHandle::Dmm(d) => d.reset().await,
            DeviceHandle::AcSource(d) => d.reset().await,
            DeviceHandle::DcSource(d) => d.reset().await,
            DeviceHandle::DcLoad(d) => d.reset().await,
            DeviceHandle::Relay(d) => d.reset().await,
            DeviceHandle::Console(d) => {
                d.close_port().await?;
                d.reset().await
            }
            DeviceHandle::OperatorUi(d) => d.reset().await,
            DeviceHandle::BleScanner(d) => d.reset().await,
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind_name(), self.instrument_name())
    }
}

/// 斜坡激励源：直流电源调电压或电子负载调电流
#[derive(Clone)]
pub enum Stimulus {
    DcSource(Arc<dyn IDcSource>),
    DcLoad(Arc<dyn IDcLoad>),
}

impl Stimulus {
    /// 设置激励值并打开输出
    pub async fn apply(&self, value: f64) -> AppResult<()> {
        match self {
            Stimulus::DcSource(s) => s.output(value, None, true).await,
            Stimulus::DcLoad(l) => l.output(value, true).await,
        }
    }

    pub fn instrument_name(&self) -> &str {
        match self {
            Stimulus::DcSource(s) => s.instrument_name(),
            Stimulus::DcLoad(l) => l.instrument_name(),
        }
    }

    /// 从设备句柄取得激励源，其他类型返回验证错误
    pub fn from_handle(handle: &DeviceHandle) -> AppResult<Self> {
        match handle {
            DeviceHandle::DcSource(s) => Ok(Stimulus::DcSource(s.clone())),
            DeviceHandle::DcLoad(l) => Ok(Stimulus::DcLoad(l.clone())),
            other => Err(AppError::validation_error(format!(
                "{} 不能作为斜坡激励源: {}",
                other.kind_name(),
                other.instrument_name()
            ))),
        }
    }
}

impl std::fmt::Debug for Stimulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stimulus({})", self.instrument_name())
    }
}
