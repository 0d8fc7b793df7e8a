/// 基础设施层服务模块
/// 负责与测试台外部世界的交互：仪器、端口、后台定时器与信号发布

/// 仪器接口
pub mod instruments;

/// 内存中的仪器模拟实现
pub mod mock_instruments;

/// 设备注册表与测试台环境
pub mod devices;

/// 后台定时器
pub mod background_timer;

/// 夹具串口映射表
pub mod fixture_ports;

/// 测试信号发布
pub mod event_publisher;

// 重新导出常用接口和实现
pub use background_timer::BackgroundTimer;
pub use devices::{Closer, Devices, StationContext};
pub use event_publisher::{
    ChannelSignalSubscriber, ISignalSubscriber, LogSignalSubscriber, SequenceSignal, SigResult,
    SigStep, SignalBus, SubscriptionHandle,
};
pub use fixture_ports::{FixturePortEntry, FixturePortTable};
pub use instruments::{
    DeviceHandle, DmmChannel, IAcSource, IBleScanner, IConsole, IDcLoad, IDcSource, IDmm,
    IInstrument, IOperatorUi, IRelay, Stimulus,
};
