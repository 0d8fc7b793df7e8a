/// 领域服务层模块
/// 包含测试序列的核心业务逻辑

/// 按名称登记对象的注册表
pub mod registry;

/// 限值与限值表
pub mod limits;

/// 传感器与传感器注册表
pub mod sensors;

/// 运行结果的累积与抑制作用域
pub mod result_recorder;

/// 测量项与测量项注册表
pub mod measurements;

/// 多测量汇总作用域
pub mod multi_measurement;

/// 测试序列引擎
pub mod test_sequence;

// 重新导出常用类型
pub use limits::{Limit, LimitKind, TestLimits, LIMIT_NOTIFY, LIMIT_PROGRAM_OK};
pub use measurements::{Measurement, MeasurementSpec, Measurements, DEFAULT_POLL_INTERVAL};
pub use multi_measurement::{MultiMeasurementSummary, ALL_OK};
pub use registry::NamedRegistry;
pub use result_recorder::{ResultRecorder, SuppressionGuard};
pub use sensors::{
    linear_points, ISensor, InstrumentSensor, KeyedSensor, MirrorSensor, OperatorSensor, PromptKind, RampSensor,
    RampSettings, SensorHandle, SensorOptions, SensorSlot, Sensors, MAX_RAMP_POINTS,
};
pub use test_sequence::{RampProfile, Registries, StepContext, TestSequence, TestStep, BLE_RSSI, BLE_SCAN};
