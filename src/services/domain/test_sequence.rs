/// 测试序列引擎
///
/// 负责按生命周期驱动产品测试程序：
/// ```text
/// Created --open--> Opened --run--> Running --safety--> Safe --close--> Closed
///                                      ^                  |
///                                      +------ run -------+
/// ```
/// 从 Running 退出的每条路径（正常结束、步骤失败、错误、取消）都会执行 safety。

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::{MeasurementResult, RelayAction, ResultCode, SequenceState, Uut};
use crate::services::domain::limits::{Limit, TestLimits};
use crate::services::domain::measurements::Measurements;
use crate::services::domain::multi_measurement::MultiMeasurementSummary;
use crate::services::domain::result_recorder::ResultRecorder;
use crate::services::domain::sensors::{linear_points, MirrorSensor, SensorOptions, Sensors};
use crate::services::infrastructure::devices::{Devices, StationContext};
use crate::services::infrastructure::event_publisher::{
    ISignalSubscriber, SequenceSignal, SigResult, SigStep, SignalBus, SubscriptionHandle,
};
use crate::services::traits::{IDevicesProfile, IMeasurementsProfile, ISensorsProfile, ITestStepBody};
use crate::utils::config::SequenceSettings;
use crate::utils::error::{AppError, AppResult};

/// 蓝牙扫描结果的传感器、限值与测量项名称
pub const BLE_SCAN: &str = "BleScan";
/// 蓝牙信号强度的传感器、限值与测量项名称
pub const BLE_RSSI: &str = "BleRssi";
/// 蓝牙信号强度下限（dBm）
pub const BLE_RSSI_MIN: f64 = -90.0;

/// 测试步骤
#[derive(Clone)]
pub struct TestStep {
    pub name: String,
    pub body: Arc<dyn ITestStepBody>,
    pub enabled: bool,
}

impl TestStep {
    pub fn new(name: impl Into<String>, body: Arc<dyn ITestStepBody>) -> Self {
        Self {
            name: name.into(),
            body,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for TestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestStep")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// 序列拥有的四个注册表
pub struct Registries {
    pub limits: TestLimits,
    pub devices: Devices,
    pub sensors: Sensors,
    pub measurements: Measurements,
}

impl Registries {
    /// 关闭注册表（逆序），错误只记录
    async fn close(&mut self) {
        self.measurements.close();
        self.sensors.close();
        if let Err(e) = self.devices.close().await {
            error!("[TestSequence] 关闭设备注册表出错: {}", e);
        }
    }
}

/// 斜坡设定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampProfile {
    pub start: f64,
    pub stop: f64,
    /// 线性斜坡的步长；二分斜坡的最小步长
    pub step: f64,
    /// 每步之后的等待
    pub delay: Duration,
}

/// 步骤主体的执行上下文
pub struct StepContext<'a> {
    pub devices: &'a mut Devices,
    pub sensors: &'a mut Sensors,
    pub measurements: &'a mut Measurements,
    pub limits: &'a TestLimits,
    pub uuts: &'a [Uut],
    pub parameter: &'a str,
    pub settings: &'a SequenceSettings,
    step_name: &'a str,
    step_index: usize,
}

impl<'a> StepContext<'a> {
    pub fn step_name(&self) -> &str {
        self.step_name
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// 在汇总作用域内依次执行多个测量
    ///
    /// 单个测量失败不会中断其余测量；结束时若有失败返回 MeasurementFailed。
    /// `timeout` 为 None 时使用默认超时
    pub async fn measure(
        &self,
        names: &[&str],
        timeout: Option<Duration>,
        delay: Duration,
    ) -> AppResult<MeasurementResult> {
        let mut summary =
            MultiMeasurementSummary::begin(self.measurements.recorder(), self.settings.default_timeout);
        for name in names {
            let measurement = self.measurements.get(name)?;
            summary.measure(measurement, timeout).await?;
        }
        let result = summary.finish()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }

    /// 执行单个测量
    pub async fn measure_one(&self, name: &str, timeout: Option<Duration>) -> AppResult<MeasurementResult> {
        self.measurements
            .get(name)?
            .measure(timeout.unwrap_or(self.settings.default_timeout), Duration::ZERO)
            .await
    }

    /// 批量设置电子负载电流
    pub async fn dcload(&self, pairs: &[(&str, f64)], delay: Duration) -> AppResult<()> {
        for (name, current) in pairs {
            self.devices.dc_load(name)?.output(*current, true).await?;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// 批量设置直流电源电压
    pub async fn dcsource(&self, pairs: &[(&str, f64)], delay: Duration) -> AppResult<()> {
        for (name, voltage) in pairs {
            self.devices.dc_source(name)?.output(*voltage, None, true).await?;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// 批量切换继电器
    pub async fn relay(&self, pairs: &[(&str, RelayAction)], delay: Duration) -> AppResult<()> {
        for (name, action) in pairs {
            self.devices.relay(name)?.apply(*action).await?;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// 线性斜坡：从 start 以 step 步进到 stop，返回依次设定的值
    pub async fn ramp_linear(&self, name: &str, profile: RampProfile) -> AppResult<Vec<f64>> {
        let applied = linear_points(name, profile.start, profile.stop, profile.step)?;
        let stimulus = self.devices.stimulus(name)?;
        for value in &applied {
            stimulus.apply(*value).await?;
            tokio::time::sleep(profile.delay).await;
        }
        Ok(applied)
    }

    /// 二分斜坡：每步走完剩余距离的一半，剩余距离不大于 step 时直接设为 stop
    pub async fn ramp_binary(&self, name: &str, profile: RampProfile) -> AppResult<Vec<f64>> {
        if !profile.start.is_finite() || !profile.stop.is_finite() {
            return Err(AppError::validation_error(format!("{} 斜坡起止点必须是有限数", name)));
        }
        if profile.step <= 0.0 || !profile.step.is_finite() {
            return Err(AppError::validation_error(format!("{} 二分斜坡最小步长必须为正", name)));
        }
        let stimulus = self.devices.stimulus(name)?;
        let mut applied = vec![profile.start];
        let mut value = profile.start;
        while (profile.stop - value).abs() > profile.step {
            value += (profile.stop - value) / 2.0;
            applied.push(value);
        }
        if value != profile.stop {
            applied.push(profile.stop);
        }
        for value in &applied {
            stimulus.apply(*value).await?;
            tokio::time::sleep(profile.delay).await;
        }
        Ok(applied)
    }

    /// 在步骤中调整正则限值，之后的测量按新模式判定
    pub fn adjust_limit(&mut self, limit_name: &str, new_pattern: &str) -> AppResult<usize> {
        self.measurements.adjust_limit(limit_name, new_pattern)
    }

    /// 解析逻辑串口名
    pub fn port(&self, name: &str) -> AppResult<String> {
        self.devices.port(name)
    }

    /// 用蓝牙扫描器查找设备，把结果推入 `ble_rssi_dev` 预设的镜像传感器
    pub async fn ble_scan(&self, scanner: &str, mac: &str, timeout: Duration) -> AppResult<Option<i32>> {
        let rssi = self.devices.ble_scanner(scanner)?.scan_rssi(mac, timeout).await?;
        self.sensors.get(BLE_SCAN)?.store(rssi.is_some().into()).await?;
        if let Some(rssi) = rssi {
            self.sensors.get(BLE_RSSI)?.store((rssi as i64).into()).await?;
        }
        Ok(rssi)
    }
}

/// 测试序列
pub struct TestSequence {
    state: SequenceState,
    station: StationContext,
    parameter: String,
    settings: SequenceSettings,
    registries: Option<Registries>,
    steps: Vec<TestStep>,
    uuts: Vec<Uut>,
    signals: Arc<SignalBus>,
    subscriptions: Vec<SubscriptionHandle>,
    cancel_token: CancellationToken,
    recorder: ResultRecorder,
    last_result: Option<MeasurementResult>,
}

impl TestSequence {
    pub fn new(station: StationContext, parameter: impl Into<String>, settings: SequenceSettings) -> Self {
        Self {
            state: SequenceState::Created,
            station,
            parameter: parameter.into(),
            settings,
            registries: None,
            steps: Vec::new(),
            uuts: Vec::new(),
            signals: Arc::new(SignalBus::new()),
            subscriptions: Vec::new(),
            cancel_token: CancellationToken::new(),
            recorder: ResultRecorder::new(),
            last_result: None,
        }
    }

    /// 使用共享的信号总线
    pub fn with_signals(mut self, signals: Arc<SignalBus>) -> Self {
        self.signals = signals;
        self
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn settings(&self) -> &SequenceSettings {
        &self.settings
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    /// 当前及之后运行的取消令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 最近一次运行的结果
    pub fn last_result(&self) -> Option<&MeasurementResult> {
        self.last_result.as_ref()
    }

    pub fn uuts(&self) -> &[Uut] {
        &self.uuts
    }

    fn registries(&self) -> AppResult<&Registries> {
        self.registries
            .as_ref()
            .ok_or_else(|| AppError::configuration_error("测试序列尚未 configure"))
    }

    fn registries_mut(&mut self) -> AppResult<&mut Registries> {
        self.registries
            .as_mut()
            .ok_or_else(|| AppError::configuration_error("测试序列尚未 configure"))
    }

    pub fn limits(&self) -> AppResult<&TestLimits> {
        Ok(&self.registries()?.limits)
    }

    pub fn devices(&self) -> AppResult<&Devices> {
        Ok(&self.registries()?.devices)
    }

    pub fn sensors(&self) -> AppResult<&Sensors> {
        Ok(&self.registries()?.sensors)
    }

    pub fn measurements(&self) -> AppResult<&Measurements> {
        Ok(&self.registries()?.measurements)
    }

    pub fn measurements_mut(&mut self) -> AppResult<&mut Measurements> {
        Ok(&mut self.registries_mut()?.measurements)
    }

    /// 调整正则限值：限值表与所有使用它的测量项同时更新
    pub fn adjust_limit(&mut self, limit_name: &str, new_pattern: &str) -> AppResult<usize> {
        let regs = self.registries_mut()?;
        regs.limits.get_mut(limit_name)?.adjust(new_pattern)?;
        // 尚未 open 时还没有测量项，只更新限值表
        let adjusted = match regs.measurements.adjust_limit(limit_name, new_pattern) {
            Ok(adjusted) => adjusted,
            Err(AppError::NotFoundError { .. }) => 0,
            Err(e) => return Err(e),
        };
        info!("[TestSequence] 限值 {} 调整为 '{}'，影响 {} 个测量项", limit_name, new_pattern, adjusted);
        Ok(adjusted)
    }

    fn transition_error(&self, to: SequenceState) -> AppError {
        AppError::state_transition_error(
            self.state.to_string(),
            to.to_string(),
            "生命周期状态不允许该操作",
        )
    }

    /// 载入限值（内置限值在前）并创建三个注册表
    pub fn configure(
        &mut self,
        limits: Vec<Limit>,
        devices_profile: Arc<dyn IDevicesProfile>,
        sensors_profile: Arc<dyn ISensorsProfile>,
        measurements_profile: Arc<dyn IMeasurementsProfile>,
    ) -> AppResult<()> {
        if self.state != SequenceState::Created {
            return Err(self.transition_error(SequenceState::Created));
        }
        let limits = TestLimits::new(limits)?;
        let devices = Devices::new(devices_profile, self.station.clone(), self.parameter.clone());
        let sensors = Sensors::new(sensors_profile, self.parameter.clone());
        let measurements = Measurements::new(
            measurements_profile,
            self.parameter.clone(),
            self.recorder.clone(),
            self.settings.poll_interval,
        );
        self.registries = Some(Registries {
            limits,
            devices,
            sensors,
            measurements,
        });
        Ok(())
    }

    /// Created -> Opened：依次打开 Devices、Sensors、Measurements
    ///
    /// 任一失败时已打开的注册表按逆序关闭，状态保持 Created
    pub async fn open(&mut self) -> AppResult<()> {
        if self.state != SequenceState::Created {
            return Err(self.transition_error(SequenceState::Opened));
        }
        let regs = self.registries_mut()?;

        if let Err(e) = regs.devices.open().await {
            error!("[TestSequence] 打开设备注册表失败: {}", e);
            if let Err(close_err) = regs.devices.close().await {
                error!("[TestSequence] 关闭设备注册表出错: {}", close_err);
            }
            return Err(e);
        }
        if let Err(e) = regs.sensors.open(&regs.devices, &regs.limits).await {
            error!("[TestSequence] 打开传感器注册表失败: {}", e);
            regs.sensors.close();
            if let Err(close_err) = regs.devices.close().await {
                error!("[TestSequence] 关闭设备注册表出错: {}", close_err);
            }
            return Err(e);
        }
        if let Err(e) = regs.measurements.open(&regs.sensors, &regs.limits).await {
            error!("[TestSequence] 打开测量项注册表失败: {}", e);
            regs.close().await;
            return Err(e);
        }

        self.state = SequenceState::Opened;
        info!("[TestSequence] 已打开");
        Ok(())
    }

    /// 设置步骤列表；步骤名可以重复，按位置区分
    pub fn set_steps(&mut self, steps: Vec<TestStep>) {
        self.steps = steps;
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    /// 预设蓝牙扫描与信号强度的传感器、限值和测量项
    ///
    /// 步骤中用 `StepContext::ble_scan` 填值，再测量 `BleScan` / `BleRssi`
    pub fn ble_rssi_dev(&mut self) -> AppResult<()> {
        if self.state != SequenceState::Opened && self.state != SequenceState::Safe {
            return Err(self.transition_error(self.state));
        }
        let regs = self.registries_mut()?;
        regs.limits
            .insert(Limit::boolean(BLE_SCAN, true)?.with_doc("扫描到蓝牙设备"))?;
        regs.limits.insert(
            Limit::high(BLE_RSSI, BLE_RSSI_MIN)?
                .with_unit("dBm")
                .with_doc("蓝牙信号强度"),
        )?;
        regs.sensors.add(
            BLE_SCAN,
            MirrorSensor::new(SensorOptions::new(BLE_SCAN).with_rereadable(false)),
        )?;
        regs.sensors.add(
            BLE_RSSI,
            MirrorSensor::new(SensorOptions::new(BLE_RSSI).with_rereadable(false)),
        )?;
        regs.measurements.create_from_names(
            &regs.sensors,
            &regs.limits,
            &[
                (BLE_SCAN, BLE_SCAN, BLE_SCAN, "扫描到蓝牙设备"),
                (BLE_RSSI, BLE_RSSI, BLE_RSSI, "蓝牙信号强度"),
            ],
        )
    }

    /// 订阅信号，close 时自动退订
    pub async fn subscribe(&mut self, subscriber: Arc<dyn ISignalSubscriber>) -> SubscriptionHandle {
        let handle = self.signals.subscribe(subscriber).await;
        self.subscriptions.push(handle);
        handle
    }

    /// 执行一次测试
    ///
    /// 正常结束或只有测量失败时返回整体结果；其他错误或取消在 safety 之后返回错误。
    /// 无论哪种情况都会发布 SigResult
    pub async fn run(&mut self, uuts: Vec<Uut>) -> AppResult<MeasurementResult> {
        if self.state != SequenceState::Opened && self.state != SequenceState::Safe {
            return Err(self.transition_error(SequenceState::Running));
        }
        if self.registries.is_none() {
            return Err(AppError::configuration_error("测试序列尚未 configure"));
        }

        self.uuts = uuts;
        self.state = SequenceState::Running;
        self.recorder.begin_run();
        info!("[TestSequence] 开始运行，{} 个步骤", self.steps.len());

        let token = self.cancel_token.clone();
        let outcome = match self.registries.as_mut() {
            Some(regs) => {
                let execution = execute_steps(
                    regs,
                    &self.steps,
                    &self.uuts,
                    &self.parameter,
                    &self.settings,
                    &self.recorder,
                    &self.signals,
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        warn!("[TestSequence] 运行被取消");
                        Err(AppError::cancelled("运行被取消"))
                    }
                    result = execution => result,
                }
            }
            None => Err(AppError::configuration_error("测试序列尚未 configure")),
        };

        if let Err(e) = &outcome {
            error!("[TestSequence] 运行出错: {}", e);
            self.recorder.set_error(e.to_string());
        }

        let safety_result = self.safety().await;
        if let Err(e) = &safety_result {
            self.recorder.set_error(format!("safety 失败: {}", e));
        }

        let result = self.recorder.snapshot();
        self.signals
            .publish(SequenceSignal::Result(SigResult::new(result.clone())))
            .await;
        self.last_result = Some(result.clone());

        if token.is_cancelled() {
            // 下一次运行使用新的令牌
            self.cancel_token = CancellationToken::new();
        }

        outcome?;
        safety_result?;
        info!(
            "[TestSequence] 运行结束: {}",
            result.code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
        );
        Ok(result)
    }

    /// 让被测单元处于安全状态
    ///
    /// 依次调用 devices.reset、sensors.reset、measurements.reset；
    /// 某一步出错不影响后续步骤，返回第一个错误。可以重复调用
    pub async fn safety(&mut self) -> AppResult<()> {
        let Some(regs) = self.registries.as_ref() else {
            return Ok(());
        };
        if self.state == SequenceState::Closed {
            return Ok(());
        }

        crate::log_safety_event!("开始");
        let mut first_error: Option<AppError> = None;

        if let Err(e) = regs.devices.reset().await {
            error!("[TestSequence] devices.reset 失败: {}", e);
            first_error.get_or_insert(e);
        }

        if let Err(e) = regs.sensors.reset().await {
            error!("[TestSequence] sensors.reset 失败: {}", e);
            first_error.get_or_insert(e);
        }

        if let Err(e) = regs.measurements.reset().await {
            error!("[TestSequence] measurements.reset 失败: {}", e);
            first_error.get_or_insert(e);
        }

        if self.state == SequenceState::Running {
            self.state = SequenceState::Safe;
        }
        crate::log_safety_event!("完成");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 关闭序列：逆序关闭注册表、释放仪器并退订信号
    pub async fn close(&mut self) -> AppResult<()> {
        if self.state == SequenceState::Closed {
            return Ok(());
        }
        let mut first_error = None;
        if let Some(regs) = self.registries.as_mut() {
            regs.measurements.close();
            regs.sensors.close();
            if let Err(e) = regs.devices.close().await {
                error!("[TestSequence] 关闭设备注册表出错: {}", e);
                first_error = Some(e);
            }
        }
        for handle in self.subscriptions.drain(..) {
            if let Err(e) = self.signals.unsubscribe(handle).await {
                debug!("[TestSequence] 退订失败: {}", e);
            }
        }
        self.state = SequenceState::Closed;
        info!("[TestSequence] 已关闭");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// 依次执行步骤
///
/// 测量失败记录后继续下一步（除非配置了 stop_on_failure）；其他错误立即返回
async fn execute_steps(
    regs: &mut Registries,
    steps: &[TestStep],
    uuts: &[Uut],
    parameter: &str,
    settings: &SequenceSettings,
    recorder: &ResultRecorder,
    signals: &SignalBus,
) -> AppResult<()> {
    regs.devices.run().await?;

    for (index, step) in steps.iter().enumerate() {
        signals
            .publish(SequenceSignal::Step(SigStep::start(&step.name, index)))
            .await;
        recorder.begin_step();

        let outcome = if step.enabled {
            crate::log_step_event!("#{} {} 开始", index, step.name);
            let mut ctx = StepContext {
                devices: &mut regs.devices,
                sensors: &mut regs.sensors,
                measurements: &mut regs.measurements,
                limits: &regs.limits,
                uuts,
                parameter,
                settings,
                step_name: &step.name,
                step_index: index,
            };
            step.body.execute(&mut ctx).await
        } else {
            debug!("[TestSequence] 步骤 #{} {} 已禁用，跳过", index, step.name);
            Ok(())
        };

        match outcome {
            Ok(()) => {
                signals
                    .publish(SequenceSignal::Step(SigStep::end(&step.name, index, recorder.step_code())))
                    .await;
            }
            Err(e) if e.is_measurement_failure() => {
                crate::log_measurement_failure!("步骤 {} 失败: {}", step.name, e);
                let positions: Vec<usize> = uuts.iter().map(|u| u.position).collect();
                recorder.fail_step(&positions);
                signals
                    .publish(SequenceSignal::Step(SigStep::end(&step.name, index, Some(ResultCode::Fail))))
                    .await;
                if settings.stop_on_failure {
                    info!("[TestSequence] stop_on_failure 已启用，停止后续步骤");
                    break;
                }
            }
            Err(e) => {
                signals
                    .publish(SequenceSignal::Step(SigStep::end(&step.name, index, Some(ResultCode::Fail))))
                    .await;
                return Err(e);
            }
        }
    }
    Ok(())
}
