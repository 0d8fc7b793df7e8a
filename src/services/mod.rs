/// 服务层模块，包含测试序列引擎的各层服务
///
/// 按照清洁架构原则组织：
/// - Application Layer: 驱动一次完整的测试程序运行
/// - Domain Layer: 限值、传感器、测量项与测试序列
/// - Infrastructure Layer: 仪器接口、设备注册表、信号总线、夹具端口

/// 应用层服务模块
pub mod application;

/// 领域层服务模块
pub mod domain;

/// 基础设施层服务模块
pub mod infrastructure;

/// 产品测试程序接入序列引擎的接口
pub mod traits;

pub use traits::{
    IDevicesProfile, IMeasurementsProfile, ISensorsProfile, ITestProgram, ITestStepBody,
    NoopDevicesProfile, NoopMeasurementsProfile, NoopSensorsProfile,
};

pub use application::{RunReport, TestProgramRunner, UutOutcome};

pub use domain::{
    Limit, Measurement, Measurements, MultiMeasurementSummary, ResultRecorder, SensorHandle,
    SensorOptions, Sensors, StepContext, TestLimits, TestSequence, TestStep,
};

pub use infrastructure::{
    DeviceHandle, Devices, FixturePortTable, SequenceSignal, SignalBus, StationContext, Stimulus,
};
