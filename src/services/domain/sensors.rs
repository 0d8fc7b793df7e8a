/// 传感器
///
/// 传感器按需从后端来源（仪器、控制台、镜像值、操作员）产生读数。
/// 测量项只通过 `ISensor` 与传感器交互；共享的传感器用 `SensorHandle` 包装。

use async_trait::async_trait;
use log::{debug, trace};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::models::ReadingValue;
use crate::services::domain::limits::{Limit, TestLimits};
use crate::services::domain::registry::NamedRegistry;
use crate::services::infrastructure::devices::Devices;
use crate::services::infrastructure::instruments::{
    DmmChannel, IConsole, IDmm, IOperatorUi, Stimulus,
};
use crate::services::traits::ISensorsProfile;
use crate::utils::error::{AppError, AppResult};

/// 读数后处理函数
pub type ReadTransform = Arc<dyn Fn(ReadingValue) -> ReadingValue + Send + Sync>;

/// 所有传感器共有的选项
#[derive(Clone)]
pub struct SensorOptions {
    /// 传感器名称
    pub name: String,
    /// 读数对应的夹具位置
    pub position: Vec<usize>,
    /// 为 false 时每个值只能被读取一次
    pub rereadable: bool,
    /// 读数后处理
    pub on_read: Option<ReadTransform>,
    /// 说明
    pub doc: String,
}

impl SensorOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: vec![1],
            rereadable: true,
            on_read: None,
            doc: String::new(),
        }
    }

    pub fn with_position(mut self, position: Vec<usize>) -> Self {
        self.position = position;
        self
    }

    pub fn with_rereadable(mut self, rereadable: bool) -> Self {
        self.rereadable = rereadable;
        self
    }

    pub fn with_on_read<F>(mut self, transform: F) -> Self
    where
        F: Fn(ReadingValue) -> ReadingValue + Send + Sync + 'static,
    {
        self.on_read = Some(Arc::new(transform));
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// 应用后处理
    pub fn transform(&self, value: ReadingValue) -> ReadingValue {
        match &self.on_read {
            Some(f) => f(value),
            None => value,
        }
    }
}

impl fmt::Debug for SensorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorOptions")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("rereadable", &self.rereadable)
            .field("on_read", &self.on_read.is_some())
            .finish()
    }
}

/// 传感器接口
#[async_trait]
pub trait ISensor: Send + Sync {
    fn options(&self) -> &SensorOptions;

    /// 读取前的准备，可重读传感器可在此重新布防
    async fn configure(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// 读取一组值（每个并行限值一个）
    ///
    /// 尚无可用值时返回空 Vec，由测量项继续轮询
    async fn read(&mut self) -> AppResult<Vec<ReadingValue>>;

    /// 推入一个值（仅镜像传感器支持）
    fn store(&mut self, _value: ReadingValue) -> AppResult<()> {
        Err(AppError::not_implemented_error(format!("{}.store", self.options().name)))
    }

    /// 推入一组并行值（仅镜像传感器支持）
    fn store_frame(&mut self, _frame: Vec<ReadingValue>) -> AppResult<()> {
        Err(AppError::not_implemented_error(format!("{}.store_frame", self.options().name)))
    }

    /// 丢弃所有缓存的值
    fn clear(&mut self) {}
}

/// 共享的传感器句柄
///
/// 传感器登记在 Sensors 中，测量项持有同一个句柄
#[derive(Clone)]
pub struct SensorHandle {
    name: String,
    inner: Arc<Mutex<Box<dyn ISensor>>>,
}

impl SensorHandle {
    pub fn new<S: ISensor + 'static>(sensor: S) -> Self {
        Self::from_box(Box::new(sensor))
    }

    pub fn from_box(sensor: Box<dyn ISensor>) -> Self {
        Self {
            name: sensor.options().name.clone(),
            inner: Arc::new(Mutex::new(sensor)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 独占访问传感器
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn ISensor>> {
        self.inner.lock().await
    }

    /// 推入一个值
    pub async fn store(&self, value: ReadingValue) -> AppResult<()> {
        self.inner.lock().await.store(value)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear()
    }

    pub async fn positions(&self) -> Vec<usize> {
        self.inner.lock().await.options().position.clone()
    }
}

impl fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensorHandle({})", self.name)
    }
}

// ==================== 仪器传感器 ====================

/// 万用表通道传感器
pub struct InstrumentSensor {
    options: SensorOptions,
    dmm: Arc<dyn IDmm>,
    channel: DmmChannel,
}

impl InstrumentSensor {
    pub fn new(options: SensorOptions, dmm: Arc<dyn IDmm>, channel: DmmChannel) -> Self {
        Self { options, dmm, channel }
    }
}

#[async_trait]
impl ISensor for InstrumentSensor {
    fn options(&self) -> &SensorOptions {
        &self.options
    }

    async fn read(&mut self) -> AppResult<Vec<ReadingValue>> {
        let value = self.dmm.measure(&self.channel).await?;
        trace!("[InstrumentSensor] {} = {}", self.options.name, value);
        Ok(vec![ReadingValue::Float(value)])
    }
}

// ==================== 键值传感器 ====================

/// 从控制台响应中取指定字段
pub struct KeyedSensor {
    options: SensorOptions,
    console: Arc<dyn IConsole>,
    key: String,
}

impl KeyedSensor {
    pub fn new(options: SensorOptions, console: Arc<dyn IConsole>, key: impl Into<String>) -> Self {
        Self {
            options,
            console,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl ISensor for KeyedSensor {
    fn options(&self) -> &SensorOptions {
        &self.options
    }

    async fn read(&mut self) -> AppResult<Vec<ReadingValue>> {
        let value = self.console.query(&self.key).await?;
        Ok(vec![value])
    }
}

// ==================== 斜坡传感器 ====================

/// 斜坡参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSettings {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// 每步设定后的稳定时间
    pub delay: Duration,
    /// 斜坡结束后激励回到的值
    pub reset_value: Option<f64>,
}

/// 线性驱动激励直到检测限值触发，返回触发时的激励值
///
/// 走完整个区间仍未触发时返回 NaN（对任何数值限值都判定失败）
pub struct RampSensor {
    options: SensorOptions,
    stimulus: Stimulus,
    detector: Box<dyn ISensor>,
    detect_limit: Limit,
    settings: RampSettings,
    points: Vec<f64>,
}

impl RampSensor {
    pub fn new(
        options: SensorOptions,
        stimulus: Stimulus,
        detector: Box<dyn ISensor>,
        detect_limit: Limit,
        settings: RampSettings,
    ) -> AppResult<Self> {
        let points = linear_points(&options.name, settings.start, settings.stop, settings.step)?;
        Ok(Self {
            options,
            stimulus,
            detector,
            detect_limit,
            settings,
            points,
        })
    }

    /// 斜坡上的各个激励点（含起止点）
    pub fn points(&self) -> Vec<f64> {
        self.points.clone()
    }
}

/// 单条斜坡允许的最大点数
pub const MAX_RAMP_POINTS: usize = 100_000;

/// 从 start 以 step 步进到 stop 的激励点（含起止点）
///
/// 步长的符号按方向修正；末点在步长的极小比例容差内对齐到 stop。
/// 起止点或步长不是有限数、步长为零、点数超过 [`MAX_RAMP_POINTS`] 时返回 ValidationError
pub fn linear_points(name: &str, start: f64, stop: f64, step: f64) -> AppResult<Vec<f64>> {
    if !start.is_finite() || !stop.is_finite() {
        return Err(AppError::validation_error(format!("{} 斜坡起止点必须是有限数", name)));
    }
    if step == 0.0 || !step.is_finite() {
        return Err(AppError::validation_error(format!("{} 斜坡步长必须是非零有限数", name)));
    }
    let step = if stop >= start { step.abs() } else { -step.abs() };
    let span = ((stop - start) / step).floor();
    if !span.is_finite() || span >= MAX_RAMP_POINTS as f64 {
        return Err(AppError::validation_error(format!(
            "{} 斜坡点数超过上限 {}（{} → {}，步长 {}）",
            name, MAX_RAMP_POINTS, start, stop, step
        )));
    }
    let count = span.max(0.0) as usize;

    let mut points: Vec<f64> = (0..=count).map(|i| start + step * i as f64).collect();
    let tolerance = step.abs() * 1e-9;
    match points.last_mut() {
        Some(last) if (*last - stop).abs() <= tolerance => *last = stop,
        _ => points.push(stop),
    }
    Ok(points)
}

#[async_trait]
impl ISensor for RampSensor {
    fn options(&self) -> &SensorOptions {
        &self.options
    }

    async fn configure(&mut self) -> AppResult<()> {
        self.detector.configure().await
    }

    async fn read(&mut self) -> AppResult<Vec<ReadingValue>> {
        let mut trip = f64::NAN;
        for value in self.points() {
            self.stimulus.apply(value).await?;
            tokio::time::sleep(self.settings.delay).await;
            let detected = self.detector.read().await?;
            let triggered = detected
                .first()
                .map(|v| self.detect_limit.check(&self.detector.options().transform(v.clone())))
                .unwrap_or(false);
            if triggered {
                debug!("[RampSensor] {} 在 {} 处触发", self.options.name, value);
                trip = value;
                break;
            }
        }
        if let Some(reset_value) = self.settings.reset_value {
            self.stimulus.apply(reset_value).await?;
        }
        Ok(vec![ReadingValue::Float(trip)])
    }

    fn clear(&mut self) {
        self.detector.clear();
    }
}

// ==================== 镜像传感器 ====================

/// 镜像传感器：值由测试逻辑推入的先进先出队列
///
/// 不可重读时每次读取弹出队首；可重读时只查看队首
pub struct MirrorSensor {
    options: SensorOptions,
    frames: VecDeque<Vec<ReadingValue>>,
}

impl MirrorSensor {
    pub fn new(options: SensorOptions) -> Self {
        Self {
            options,
            frames: VecDeque::new(),
        }
    }

    /// 默认不可重读的镜像传感器
    pub fn consumable(name: impl Into<String>) -> Self {
        Self::new(SensorOptions::new(name).with_rereadable(false))
    }

    pub fn pending(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl ISensor for MirrorSensor {
    fn options(&self) -> &SensorOptions {
        &self.options
    }

    async fn read(&mut self) -> AppResult<Vec<ReadingValue>> {
        let frame = if self.options.rereadable {
            self.frames.front().cloned()
        } else {
            self.frames.pop_front()
        };
        Ok(frame.unwrap_or_default())
    }

    fn store(&mut self, value: ReadingValue) -> AppResult<()> {
        self.frames.push_back(vec![value]);
        Ok(())
    }

    fn store_frame(&mut self, frame: Vec<ReadingValue>) -> AppResult<()> {
        if frame.is_empty() {
            return Err(AppError::validation_error(format!("{} 不能推入空值组", self.options.name)));
        }
        self.frames.push_back(frame);
        Ok(())
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

// ==================== 操作员传感器 ====================

/// 操作员提问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// 显示提示，确认后返回 true
    Notify,
    /// 是/否
    YesNo,
    /// 录入字符串
    DataEntry,
}

/// 操作员传感器（Notify / YesNo / DataEntry）
pub struct OperatorSensor {
    options: SensorOptions,
    ui: Arc<dyn IOperatorUi>,
    prompt: String,
    kind: PromptKind,
}

impl OperatorSensor {
    fn build(name: String, ui: Arc<dyn IOperatorUi>, prompt: String, kind: PromptKind) -> Self {
        Self {
            options: SensorOptions::new(name).with_rereadable(false),
            ui,
            prompt,
            kind,
        }
    }

    pub fn notify(name: impl Into<String>, ui: Arc<dyn IOperatorUi>, prompt: impl Into<String>) -> Self {
        Self::build(name.into(), ui, prompt.into(), PromptKind::Notify)
    }

    pub fn yes_no(name: impl Into<String>, ui: Arc<dyn IOperatorUi>, prompt: impl Into<String>) -> Self {
        Self::build(name.into(), ui, prompt.into(), PromptKind::YesNo)
    }

    pub fn data_entry(name: impl Into<String>, ui: Arc<dyn IOperatorUi>, prompt: impl Into<String>) -> Self {
        Self::build(name.into(), ui, prompt.into(), PromptKind::DataEntry)
    }

    pub fn with_options(mut self, options: SensorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }
}

#[async_trait]
impl ISensor for OperatorSensor {
    fn options(&self) -> &SensorOptions {
        &self.options
    }

    async fn read(&mut self) -> AppResult<Vec<ReadingValue>> {
        let value = match self.kind {
            PromptKind::Notify => {
                self.ui.notify(&self.prompt).await?;
                ReadingValue::Bool(true)
            }
            PromptKind::YesNo => ReadingValue::Bool(self.ui.yes_no(&self.prompt).await?),
            PromptKind::DataEntry => ReadingValue::Text(self.ui.data_entry(&self.prompt).await?),
        };
        Ok(vec![value])
    }
}

// ==================== 传感器注册表 ====================

/// 注册表中的条目：单个传感器或嵌套的一组
#[derive(Debug, Clone)]
pub enum SensorSlot {
    Single(SensorHandle),
    Group(Vec<SensorSlot>),
}

impl SensorSlot {
    /// 展开为扁平的句柄列表
    pub fn flatten(&self) -> Vec<SensorHandle> {
        match self {
            SensorSlot::Single(handle) => vec![handle.clone()],
            SensorSlot::Group(slots) => slots.iter().flat_map(|s| s.flatten()).collect(),
        }
    }
}

/// 传感器注册表
pub struct Sensors {
    registry: NamedRegistry<SensorSlot>,
    profile: Arc<dyn ISensorsProfile>,
    parameter: String,
}

impl Sensors {
    pub fn new(profile: Arc<dyn ISensorsProfile>, parameter: impl Into<String>) -> Self {
        Self {
            registry: NamedRegistry::new("Sensors"),
            profile,
            parameter: parameter.into(),
        }
    }

    /// 产品子型号
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// 登记传感器并返回其句柄
    pub fn add<S: ISensor + 'static>(&mut self, name: impl Into<String>, sensor: S) -> AppResult<SensorHandle> {
        let handle = SensorHandle::new(sensor);
        self.add_handle(name, handle.clone())?;
        Ok(handle)
    }

    pub fn add_handle(&mut self, name: impl Into<String>, handle: SensorHandle) -> AppResult<()> {
        self.registry.insert(name, SensorSlot::Single(handle))
    }

    /// 登记一组传感器（如多通道扫描）
    pub fn add_group(&mut self, name: impl Into<String>, handles: Vec<SensorHandle>) -> AppResult<()> {
        let slots = handles.into_iter().map(SensorSlot::Single).collect();
        self.registry.insert(name, SensorSlot::Group(slots))
    }

    /// 取单个传感器；组条目返回验证错误
    pub fn get(&self, name: &str) -> AppResult<SensorHandle> {
        match self.registry.get(name)? {
            SensorSlot::Single(handle) => Ok(handle.clone()),
            SensorSlot::Group(_) => Err(AppError::validation_error(format!(
                "{} 是传感器组，不能作为单个传感器使用",
                name
            ))),
        }
    }

    /// 取一组传感器（单个条目返回长度为 1 的列表）
    pub fn group(&self, name: &str) -> AppResult<Vec<SensorHandle>> {
        Ok(self.registry.get(name)?.flatten())
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

    /// 由产品配置填充注册表
    pub async fn open(&mut self, devices: &Devices, limits: &TestLimits) -> AppResult<()> {
        let profile = self.profile.clone();
        profile.open(self, devices, limits).await?;
        debug!("[Sensors] 已登记 {} 个传感器", self.registry.len());
        Ok(())
    }

    /// 清空所有传感器（含嵌套组）缓存的值，再调用产品配置的复位钩子
    pub async fn reset(&self) -> AppResult<()> {
        for slot in self.registry.values() {
            for handle in slot.flatten() {
                handle.clear().await;
            }
        }
        self.profile.reset(self).await
    }

    pub fn close(&mut self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::infrastructure::mock_instruments::{MockDcSource, MockDmm, MockOperatorUi};
    use crate::services::traits::NoopSensorsProfile;

    #[tokio::test]
    async fn test_mirror_consumable_pops() {
        let mut mirror = MirrorSensor::consumable("mir");
        mirror.store(1.0.into()).unwrap();
        mirror.store(2.0.into()).unwrap();
        assert_eq!(mirror.read().await.unwrap(), vec![ReadingValue::Float(1.0)]);
        assert_eq!(mirror.read().await.unwrap(), vec![ReadingValue::Float(2.0)]);
        assert!(mirror.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_rereadable_peeks() {
        let mut mirror = MirrorSensor::new(SensorOptions::new("mir"));
        mirror.store(5.0.into()).unwrap();
        for _ in 0..3 {
            assert_eq!(mirror.read().await.unwrap(), vec![ReadingValue::Float(5.0)]);
        }
        mirror.clear();
        assert!(mirror.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ramp_returns_trip_point() {
        let source = MockDcSource::new("dcs");
        let dmm = MockDmm::new("dmm");
        // 检测端直接回读源电压
        dmm.link_dc_source(4, source.clone());
        let detector = InstrumentSensor::new(
            SensorOptions::new("det"),
            Arc::new(dmm),
            DmmChannel::dc_volts(4, 0, 10.0, 0.01),
        );
        let mut ramp = RampSensor::new(
            SensorOptions::new("ramp"),
            Stimulus::DcSource(Arc::new(source.clone())),
            Box::new(detector),
            Limit::high("Trip", 3.2).unwrap(),
            RampSettings {
                start: 0.0,
                stop: 5.0,
                step: 0.5,
                delay: Duration::from_millis(0),
                reset_value: Some(0.0),
            },
        )
        .unwrap();

        assert_eq!(ramp.read().await.unwrap(), vec![ReadingValue::Float(3.5)]);
        assert_eq!(source.output_log().last().map(|op| op.value), Some(0.0));
    }

    #[tokio::test]
    async fn test_ramp_without_trip_is_nan() {
        let source = MockDcSource::new("dcs");
        let dmm = MockDmm::new("dmm");
        dmm.preset(4, 0.0);
        let detector = InstrumentSensor::new(
            SensorOptions::new("det"),
            Arc::new(dmm),
            DmmChannel::dc_volts(4, 0, 10.0, 0.01),
        );
        let mut ramp = RampSensor::new(
            SensorOptions::new("ramp"),
            Stimulus::DcSource(Arc::new(source)),
            Box::new(detector),
            Limit::high("Trip", 1.0).unwrap(),
            RampSettings {
                start: 0.0,
                stop: 1.0,
                step: 0.25,
                delay: Duration::from_millis(0),
                reset_value: None,
            },
        )
        .unwrap();
        assert_eq!(ramp.points(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        let values = ramp.read().await.unwrap();
        assert!(values[0].as_f64().unwrap().is_nan());
    }

    #[test]
    fn test_linear_points_reject_unbounded_ramps() {
        let err = linear_points("vin", 0.0, 1e20, 1e-300).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        let err = linear_points("vin", 0.0, 1.0, 1e-6).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        let err = linear_points("vin", 0.0, f64::NAN, 0.5).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        let err = linear_points("vin", f64::NEG_INFINITY, 1.0, 0.5).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        assert_eq!(linear_points("vin", 0.0, 1024.0, 0.015625).unwrap().len(), 65_537);
        assert_eq!(linear_points("vin", 2.0, 1.0, 0.5).unwrap(), vec![2.0, 1.5, 1.0]);
    }

    #[tokio::test]
    async fn test_operator_sensors() {
        let ui = MockOperatorUi::new("ui");
        ui.script_yes_no(vec![false]);
        ui.script_entries(vec!["A1626010123".into()]);
        let shared: Arc<dyn IOperatorUi> = Arc::new(ui.clone());

        let mut notify = OperatorSensor::notify("n", shared.clone(), "连接被测单元");
        let mut yes_no = OperatorSensor::yes_no("yn", shared.clone(), "LED 亮了吗?");
        let mut entry = OperatorSensor::data_entry("de", shared, "输入序列号");

        assert_eq!(notify.read().await.unwrap(), vec![ReadingValue::Bool(true)]);
        assert_eq!(yes_no.read().await.unwrap(), vec![ReadingValue::Bool(false)]);
        assert_eq!(entry.read().await.unwrap(), vec![ReadingValue::from("A1626010123")]);
        assert_eq!(ui.prompts().len(), 3);
        assert!(!notify.options().rereadable);
    }

    #[tokio::test]
    async fn test_registry_reset_clears_nested_groups() {
        let mut sensors = Sensors::new(Arc::new(NoopSensorsProfile), "");
        let a = sensors.add("a", MirrorSensor::consumable("a")).unwrap();
        let b = SensorHandle::new(MirrorSensor::consumable("b"));
        let c = SensorHandle::new(MirrorSensor::consumable("c"));
        sensors.add_group("bc", vec![b.clone(), c.clone()]).unwrap();

        a.store(1.0.into()).await.unwrap();
        b.store(2.0.into()).await.unwrap();
        c.store(3.0.into()).await.unwrap();
        sensors.reset().await.unwrap();

        for handle in [&a, &b, &c] {
            assert!(handle.lock().await.read().await.unwrap().is_empty());
        }
        assert_eq!(sensors.group("bc").unwrap().len(), 2);
        assert_eq!(sensors.get("bc").unwrap_err().error_code(), "VALIDATION_ERROR");

        let dup = sensors.add("a", MirrorSensor::consumable("a"));
        assert!(matches!(dup, Err(AppError::DuplicateName { .. })));
    }
}
