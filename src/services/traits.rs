/// 服务层基础trait定义
///
/// 产品测试程序通过这些接口接入序列引擎：三个注册表的配置钩子、
/// 步骤主体以及测试程序本身

use async_trait::async_trait;

use crate::services::domain::limits::TestLimits;
use crate::services::domain::measurements::Measurements;
use crate::services::domain::sensors::Sensors;
use crate::services::domain::test_sequence::{StepContext, TestSequence};
use crate::services::infrastructure::devices::Devices;
use crate::utils::error::AppResult;

/// 设备注册表的产品配置
#[async_trait]
pub trait IDevicesProfile: Send + Sync {
    /// 从物理仪器表填充注册表，可添加清理动作
    async fn open(&self, devices: &mut Devices) -> AppResult<()>;

    /// 每次运行开始前调用（如启动 CAN 读取、设置总线模式）
    async fn run(&self, _devices: &Devices) -> AppResult<()> {
        Ok(())
    }

    /// safety 阶段调用，让被测单元处于安全状态
    ///
    /// 默认按登记逆序复位所有仪器
    async fn reset(&self, devices: &Devices) -> AppResult<()> {
        devices.reset_all().await
    }
}

/// 传感器注册表的产品配置
#[async_trait]
pub trait ISensorsProfile: Send + Sync {
    async fn open(&self, sensors: &mut Sensors, devices: &Devices, limits: &TestLimits) -> AppResult<()>;

    /// 传感器值清空之后调用
    async fn reset(&self, _sensors: &Sensors) -> AppResult<()> {
        Ok(())
    }
}

/// 测量项注册表的产品配置
#[async_trait]
pub trait IMeasurementsProfile: Send + Sync {
    async fn open(
        &self,
        measurements: &mut Measurements,
        sensors: &Sensors,
        limits: &TestLimits,
    ) -> AppResult<()>;

    /// 测量项复位之后调用
    async fn reset(&self, _measurements: &Measurements) -> AppResult<()> {
        Ok(())
    }
}

/// 测试步骤主体
#[async_trait]
pub trait ITestStepBody: Send + Sync {
    /// 执行步骤；返回 MeasurementFailed / NoResult 时引擎记录失败并继续下一步
    async fn execute(&self, ctx: &mut StepContext<'_>) -> AppResult<()>;
}

/// 产品测试程序
///
/// `open` 中调用 `seq.configure(..)` 与 `seq.set_steps(..)`；需要在打开后追加
/// 配置（如 `ble_rssi_dev`）时可自行调用 `seq.open()`，否则由运行器打开
#[async_trait]
pub trait ITestProgram: Send + Sync {
    fn program_name(&self) -> &str;

    async fn open(&self, seq: &mut TestSequence) -> AppResult<()>;
}

/// 空的设备配置，注册表保持为空
pub struct NoopDevicesProfile;

#[async_trait]
impl IDevicesProfile for NoopDevicesProfile {
    async fn open(&self, _devices: &mut Devices) -> AppResult<()> {
        Ok(())
    }
}

/// 空的传感器配置
pub struct NoopSensorsProfile;

#[async_trait]
impl ISensorsProfile for NoopSensorsProfile {
    async fn open(&self, _sensors: &mut Sensors, _devices: &Devices, _limits: &TestLimits) -> AppResult<()> {
        Ok(())
    }
}

/// 空的测量项配置
pub struct NoopMeasurementsProfile;

#[async_trait]
impl IMeasurementsProfile for NoopMeasurementsProfile {
    async fn open(
        &self,
        _measurements: &mut Measurements,
        _sensors: &Sensors,
        _limits: &TestLimits,
    ) -> AppResult<()> {
        Ok(())
    }
}
