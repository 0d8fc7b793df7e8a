/// 设备注册表
///
/// 保存本次测试使用的仪器句柄，并负责：
/// - LIFO 的清理动作（夹具供电、控制台端口、后台定时器等），在 close 时执行
/// - 逻辑串口名到设备路径的解析
/// - 运行前的 run 钩子与 safety 阶段的 reset 钩子

use futures::future::BoxFuture;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Fixture, HostOs, TesterType};
use crate::services::domain::registry::NamedRegistry;
use crate::services::infrastructure::background_timer::BackgroundTimer;
use crate::services::infrastructure::fixture_ports::FixturePortTable;
use crate::services::infrastructure::instruments::{
    DeviceHandle, IAcSource, IBleScanner, IConsole, IDcLoad, IDcSource, IDmm, IOperatorUi, IRelay,
    Stimulus,
};
use crate::services::traits::IDevicesProfile;
use crate::utils::error::{AppError, AppResult};

/// 清理动作
pub type Closer = Box<dyn FnOnce() -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// 测试台环境：物理仪器、夹具与端口配置
#[derive(Clone)]
pub struct StationContext {
    /// 逻辑仪器名 -> 驱动
    pub physical_devices: HashMap<String, DeviceHandle>,
    pub fixture: Fixture,
    pub ports: Arc<FixturePortTable>,
    pub tester_type: TesterType,
    pub host_os: HostOs,
}

impl StationContext {
    pub fn new(fixture: Fixture, tester_type: TesterType) -> Self {
        Self {
            physical_devices: HashMap::new(),
            fixture,
            ports: Arc::new(FixturePortTable::builtin()),
            tester_type,
            host_os: HostOs::current(),
        }
    }

    /// 添加物理仪器
    pub fn with_device(mut self, name: impl Into<String>, handle: DeviceHandle) -> Self {
        self.physical_devices.insert(name.into(), handle);
        self
    }

    pub fn with_ports(mut self, ports: Arc<FixturePortTable>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_host_os(mut self, host_os: HostOs) -> Self {
        self.host_os = host_os;
        self
    }
}

pub struct Devices {
    registry: NamedRegistry<DeviceHandle>,
    station: StationContext,
    parameter: String,
    closers: Vec<(String, Closer)>,
    timers: Vec<BackgroundTimer>,
    profile: Arc<dyn IDevicesProfile>,
}

impl Devices {
    pub fn new(profile: Arc<dyn IDevicesProfile>, station: StationContext, parameter: impl Into<String>) -> Self {
        Self {
            registry: NamedRegistry::new("Devices"),
            station,
            parameter: parameter.into(),
            closers: Vec::new(),
            timers: Vec::new(),
            profile,
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.station.fixture
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn tester_type(&self) -> TesterType {
        self.station.tester_type
    }

    /// 登记仪器
    pub fn add(&mut self, name: impl Into<String>, handle: DeviceHandle) -> AppResult<()> {
        self.registry.insert(name, handle)
    }

    /// 按逻辑名从物理仪器表中取出并登记
    pub fn add_from_physical(&mut self, name: &str, physical_name: &str) -> AppResult<()> {
        let handle = self.physical(physical_name)?;
        self.registry.insert(name, handle)
    }

    /// 物理仪器表中的驱动
    pub fn physical(&self, physical_name: &str) -> AppResult<DeviceHandle> {
        self.station
            .physical_devices
            .get(physical_name)
            .cloned()
            .ok_or_else(|| {
                AppError::not_found_error("PhysicalDevice", format!("测试台没有仪器: {}", physical_name))
            })
    }

    pub fn get(&self, name: &str) -> AppResult<&DeviceHandle> {
        self.registry.get(name)
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

    fn kind_mismatch(name: &str, expected: &str, handle: &DeviceHandle) -> AppError {
        AppError::validation_error(format!(
            "设备 {} 是 {}，不是 {}",
            name,
            handle.kind_name(),
            expected
        ))
    }

    pub fn dmm(&self, name: &str) -> AppResult<Arc<dyn IDmm>> {
        match self.get(name)? {
            DeviceHandle::Dmm(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "Dmm", other)),
        }
    }

    pub fn ac_source(&self, name: &str) -> AppResult<Arc<dyn IAcSource>> {
        match self.get(name)? {
            DeviceHandle::AcSource(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "AcSource", other)),
        }
    }

    pub fn dc_source(&self, name: &str) -> AppResult<Arc<dyn IDcSource>> {
        match self.get(name)? {
            DeviceHandle::DcSource(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "DcSource", other)),
        }
    }

    pub fn dc_load(&self, name: &str) -> AppResult<Arc<dyn IDcLoad>> {
        match self.get(name)? {
            DeviceHandle::DcLoad(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "DcLoad", other)),
        }
    }

    pub fn relay(&self, name: &str) -> AppResult<Arc<dyn IRelay>> {
        match self.get(name)? {
            DeviceHandle::Relay(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "Relay", other)),
        }
    }

    pub fn console(&self, name: &str) -> AppResult<Arc<dyn IConsole>> {
        match self.get(name)? {
            DeviceHandle::Console(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "Console", other)),
        }
    }

    pub fn operator_ui(&self, name: &str) -> AppResult<Arc<dyn IOperatorUi>> {
        match self.get(name)? {
            DeviceHandle::OperatorUi(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "OperatorUi", other)),
        }
    }

    pub fn ble_scanner(&self, name: &str) -> AppResult<Arc<dyn IBleScanner>> {
        match self.get(name)? {
            DeviceHandle::BleScanner(d) => Ok(d.clone()),
            other => Err(Self::kind_mismatch(name, "BleScanner", other)),
        }
    }

    /// 斜坡激励源（直流电源或电子负载）
    pub fn stimulus(&self, name: &str) -> AppResult<Stimulus> {
        Stimulus::from_handle(self.get(name)?)
    }

    /// 添加清理动作，close 时按后进先出顺序执行
    pub fn add_closer<F>(&mut self, name: impl Into<String>, closer: F)
    where
        F: FnOnce() -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    {
        self.closers.push((name.into(), Box::new(closer)));
    }

    /// 登记后台定时器，close 时取消
    pub fn start_timer(&mut self, timer: BackgroundTimer) -> BackgroundTimer {
        self.timers.push(timer.clone());
        timer
    }

    /// 解析逻辑串口名
    pub fn port(&self, name: &str) -> AppResult<String> {
        self.station.ports.resolve(
            &self.station.fixture.item_number,
            name,
            self.station.tester_type,
            self.station.host_os,
        )
    }

    /// 由产品配置填充注册表
    pub async fn open(&mut self) -> AppResult<()> {
        let profile = self.profile.clone();
        profile.open(self).await?;
        info!("[Devices] 已登记 {} 台仪器", self.registry.len());
        Ok(())
    }

    /// 运行前钩子
    pub async fn run(&self) -> AppResult<()> {
        self.profile.run(self).await
    }

    /// safety 阶段钩子，让被测单元处于安全状态
    pub async fn reset(&self) -> AppResult<()> {
        self.profile.reset(self).await
    }

    /// 按登记的逆序复位所有仪器；单台失败不影响其余仪器，返回第一个错误
    pub async fn reset_all(&self) -> AppResult<()> {
        let mut first_error = None;
        let handles: Vec<(&str, &DeviceHandle)> = self.registry.iter().collect();
        for (name, handle) in handles.into_iter().rev() {
            if let Err(e) = handle.reset().await {
                error!("[Devices] 复位 {} 失败: {}", name, e);
                first_error.get_or_insert(e);
            } else {
                debug!("[Devices] {} 已复位", name);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 取消定时器，按后进先出执行清理动作并清空注册表
    pub async fn close(&mut self) -> AppResult<()> {
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
        let mut first_error = None;
        while let Some((name, closer)) = self.closers.pop() {
            if let Err(e) = closer().await {
                error!("[Devices] 清理动作 {} 失败: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
        self.registry.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::infrastructure::mock_instruments::{MockDcSource, MockDmm, MockRelay};
    use crate::services::traits::NoopDevicesProfile;
    use futures::FutureExt;
    use std::sync::Mutex;
    use std::time::Duration;

    fn station() -> StationContext {
        StationContext::new(Fixture::new("027176", "BatteryCheck"), TesterType::Ate4)
            .with_host_os(HostOs::Linux)
            .with_device("dmm", DeviceHandle::Dmm(Arc::new(MockDmm::new("dmm"))))
            .with_device("dcs1", DeviceHandle::DcSource(Arc::new(MockDcSource::new("dcs1"))))
    }

    #[tokio::test]
    async fn test_typed_accessors() {
        let mut devices = Devices::new(Arc::new(NoopDevicesProfile), station(), "");
        devices.add_from_physical("dmm", "dmm").unwrap();
        devices.add_from_physical("dcs_vin", "dcs1").unwrap();

        assert!(devices.dmm("dmm").is_ok());
        assert!(devices.stimulus("dcs_vin").is_ok());
        assert_eq!(devices.dc_source("dmm").err().unwrap().error_code(), "VALIDATION_ERROR");
        assert_eq!(devices.relay("nope").err().unwrap().error_code(), "NOT_FOUND_ERROR");
        assert!(devices.add_from_physical("x", "missing").is_err());

        let dup = devices.add_from_physical("dmm", "dmm").unwrap_err();
        assert_eq!(dup.error_code(), "DUPLICATE_NAME_ERROR");
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_port_uses_fixture_and_tester() {
        let devices = Devices::new(Arc::new(NoopDevicesProfile), station(), "");
        assert_eq!(devices.port("CAN").unwrap(), "/dev/ttyACM2");
        assert_eq!(devices.port("ARM").unwrap(), "/dev/ttyUSB0");
    }

    #[tokio::test]
    async fn test_closers_run_lifo_and_timers_cancelled() {
        let mut devices = Devices::new(Arc::new(NoopDevicesProfile), station(), "");
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            devices.add_closer(name, move || {
                async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                }
                .boxed()
            });
        }
        let timer = devices.start_timer(BackgroundTimer::delay("settle", Duration::from_secs(30)));

        devices.close().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert!(timer.wait(Duration::from_secs(1)).await);
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn test_default_reset_covers_every_instrument() {
        let relay = MockRelay::new("rla");
        let source = MockDcSource::new("dcs");
        let dmm = MockDmm::new("dmm");
        let mut devices = Devices::new(Arc::new(NoopDevicesProfile), station(), "");
        devices.add("rla", DeviceHandle::Relay(Arc::new(relay.clone()))).unwrap();
        devices.add("dcs", DeviceHandle::DcSource(Arc::new(source.clone()))).unwrap();
        devices.add("dmm", DeviceHandle::Dmm(Arc::new(dmm.clone()))).unwrap();

        devices.reset().await.unwrap();
        assert_eq!(relay.reset_count(), 1);
        assert_eq!(source.reset_count(), 1);
        assert_eq!(dmm.reset_count(), 1);
    }
}
