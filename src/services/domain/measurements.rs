/// 测量项
///
/// 测量项把一个传感器绑定到一个或多个限值：轮询传感器直到读数满足限值或超时，
/// 判定每个读数并记入本次运行的结果。失败时按限值的 `position_fail`
/// 与抑制作用域决定是否返回 `MeasurementFailed` 中断当前步骤。

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{MeasurementResult, Reading, ReadingValue};
use crate::services::domain::limits::{Limit, TestLimits};
use crate::services::domain::registry::NamedRegistry;
use crate::services::domain::result_recorder::{ResultRecorder, SuppressionCounter, SuppressionGuard};
use crate::services::domain::sensors::{SensorHandle, Sensors};
use crate::services::traits::IMeasurementsProfile;
use crate::utils::error::{AppError, AppResult};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 一次轮询的结果
enum Acquired {
    /// 取得的值（已经过后处理）
    Values(Vec<ReadingValue>),
    /// 超时仍无值
    Nothing,
    /// 控制台错误，按失败读数处理
    ConsoleFault(String),
}

pub struct Measurement {
    /// 测量名称
    pub name: String,
    /// 说明
    pub doc: String,
    /// 为 false 时不输出逐个读数的调试日志
    pub log_data: bool,
    sensor: SensorHandle,
    limits: Vec<Limit>,
    recorder: ResultRecorder,
    suppression: SuppressionCounter,
    poll_interval: Duration,
}

impl Measurement {
    /// 创建测量项
    ///
    /// `limits` 为一个限值，或每个传感器值对应一个的并行限值组
    pub fn new(
        name: impl Into<String>,
        sensor: SensorHandle,
        limits: Vec<Limit>,
        recorder: ResultRecorder,
    ) -> AppResult<Self> {
        let name = name.into();
        if limits.is_empty() {
            return Err(AppError::validation_error(format!("测量项 {} 至少需要一个限值", name)));
        }
        Ok(Self {
            name,
            doc: String::new(),
            log_data: true,
            sensor,
            limits,
            recorder,
            suppression: SuppressionCounter::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn with_log_data(mut self, log_data: bool) -> Self {
        self.log_data = log_data;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn sensor(&self) -> &SensorHandle {
        &self.sensor
    }

    pub fn limits(&self) -> &[Limit] {
        &self.limits
    }

    /// 第一个（通常是唯一的）限值
    pub fn limit(&self) -> &Limit {
        &self.limits[0]
    }

    /// 改变测量项的判定限值
    pub fn set_limits(&mut self, limits: Vec<Limit>) -> AppResult<()> {
        if limits.is_empty() {
            return Err(AppError::validation_error(format!("测量项 {} 至少需要一个限值", self.name)));
        }
        self.limits = limits;
        Ok(())
    }

    pub fn limits_mut(&mut self) -> &mut [Limit] {
        &mut self.limits
    }

    /// 进入位置失败抑制作用域
    ///
    /// 作用域内失败仍然记录，但 `measure` 不再返回 MeasurementFailed
    pub fn position_fail_disabled(&self) -> SuppressionGuard {
        self.suppression.acquire()
    }

    fn is_suppressed(&self) -> bool {
        self.suppression.is_active() || self.recorder.is_suppressed()
    }

    /// 清零本测量项的抑制计数
    pub fn reset(&self) {
        self.suppression.reset();
    }

    /// 每个值与限值的配对
    fn pairs<'a>(&'a self, values: &'a [ReadingValue]) -> AppResult<Vec<(&'a ReadingValue, &'a Limit)>> {
        if values.len() == self.limits.len() {
            Ok(values.iter().zip(self.limits.iter()).collect())
        } else if values.len() == 1 {
            Ok(self.limits.iter().map(|l| (&values[0], l)).collect())
        } else if self.limits.len() == 1 {
            Ok(values.iter().map(|v| (v, &self.limits[0])).collect())
        } else {
            Err(AppError::validation_error(format!(
                "测量项 {} 得到 {} 个值，但有 {} 个限值",
                self.name,
                values.len(),
                self.limits.len()
            )))
        }
    }

    fn all_pass(&self, values: &[ReadingValue]) -> bool {
        match self.pairs(values) {
            Ok(pairs) => pairs.iter().all(|(v, l)| l.check(v)),
            Err(_) => false,
        }
    }

    /// 轮询传感器直到值满足限值、不可重读的传感器给出一个值，或超时
    async fn acquire(&self, timeout: Duration) -> AppResult<(Acquired, Vec<usize>)> {
        let mut sensor = self.sensor.lock().await;
        sensor.configure().await?;
        let positions = sensor.options().position.clone();
        let rereadable = sensor.options().rereadable;

        let deadline = Instant::now() + timeout;
        let mut last: Option<Vec<ReadingValue>> = None;
        loop {
            match sensor.read().await {
                Ok(values) if !values.is_empty() => {
                    let values: Vec<ReadingValue> =
                        values.into_iter().map(|v| sensor.options().transform(v)).collect();
                    let satisfied = self.all_pass(&values);
                    last = Some(values);
                    if satisfied || !rereadable {
                        break;
                    }
                }
                Ok(_) => {}
                Err(AppError::ConsoleError { message }) => {
                    return Ok((Acquired::ConsoleFault(message), positions));
                }
                Err(e) => return Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        let acquired = match last {
            Some(values) => Acquired::Values(values),
            None => Acquired::Nothing,
        };
        Ok((acquired, positions))
    }

    fn record(&self, reading: Reading, limit: &Limit) {
        if self.log_data {
            debug!(
                "[Measurement] {} = {} ({}) {}",
                reading.name,
                reading
                    .value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                limit,
                reading.code()
            );
        }
        self.recorder.record(reading, limit.send_signal);
    }

    /// 记录一个失败读数（无值），返回是否需要标记位置
    fn record_missing(&self, positions: &[usize]) -> bool {
        let mut position_fail = false;
        for limit in &self.limits {
            let reading = Reading::new(&self.name, None, limit.unit.clone(), &limit.name, false)
                .with_positions(positions.to_vec());
            self.record(reading, limit);
            position_fail |= limit.position_fail;
        }
        if position_fail {
            self.recorder.mark_positions_failed(positions);
        }
        position_fail
    }

    /// 执行测量
    ///
    /// 1. 调用传感器 configure
    /// 2. 在 `timeout` 内轮询，读数满足限值时提前结束
    /// 3. 逐个判定并记录读数
    /// 4. 失败且 `position_fail` 时标记位置；不在抑制作用域内则返回 MeasurementFailed
    /// 5. 等待 `delay` 后返回
    ///
    /// 超时仍无值时记录失败读数并返回 NoResult
    pub async fn measure(&self, timeout: Duration, delay: Duration) -> AppResult<MeasurementResult> {
        let (acquired, positions) = self.acquire(timeout).await?;

        let values = match acquired {
            Acquired::Values(values) => values,
            Acquired::Nothing => {
                self.record_missing(&positions);
                crate::log_measurement_failure!("{} 在 {:?} 内没有读数", self.name, timeout);
                return Err(AppError::no_result(
                    self.name.clone(),
                    format!("{:?} 内传感器没有给出值", timeout),
                ));
            }
            Acquired::ConsoleFault(message) => {
                let position_fail = self.record_missing(&positions);
                let mut result = MeasurementResult::new();
                for limit in &self.limits {
                    result.append(
                        Reading::new(&self.name, None, limit.unit.clone(), &limit.name, false)
                            .with_positions(positions.clone()),
                    );
                }
                if position_fail && !self.is_suppressed() {
                    crate::log_measurement_failure!("{} 控制台错误: {}", self.name, message);
                    return Err(AppError::measurement_failed(self.name.clone(), message));
                }
                warn!("[Measurement] {} 控制台错误（已抑制）: {}", self.name, message);
                return Ok(result);
            }
        };

        let mut result = MeasurementResult::new();
        let mut position_fail = false;
        for (value, limit) in self.pairs(&values)? {
            let is_pass = limit.check(value);
            let reading = Reading::new(&self.name, Some(value.clone()), limit.unit.clone(), &limit.name, is_pass)
                .with_positions(positions.clone());
            if !is_pass && limit.position_fail {
                position_fail = true;
            }
            result.append(reading.clone());
            self.record(reading, limit);
        }

        if position_fail {
            self.recorder.mark_positions_failed(&positions);
            result.mark_positions_failed(&positions);
            if !self.is_suppressed() {
                let detail = result
                    .readings
                    .iter()
                    .filter(|r| !r.is_pass)
                    .map(|r| {
                        format!(
                            "{}={}",
                            r.limit_name,
                            r.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                crate::log_measurement_failure!("{} 失败: {}", self.name, detail);
                return Err(AppError::measurement_failed(self.name.clone(), detail));
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }

    /// 反复读数直到最近 `samples` 个读数都落在最后一个读数 ±delta 之内
    ///
    /// 只支持数值读数。稳定后的读数按第一个限值判定并记录，不会中断步骤；
    /// 超时返回 NoResult
    pub async fn stable(&self, delta: f64, samples: usize, timeout: Duration) -> AppResult<Reading> {
        if samples == 0 || delta.is_nan() || delta < 0.0 {
            return Err(AppError::validation_error(format!(
                "{} stable 参数无效: delta={}, samples={}",
                self.name, delta, samples
            )));
        }
        let mut sensor = self.sensor.lock().await;
        sensor.configure().await?;
        let positions = sensor.options().position.clone();

        let deadline = Instant::now() + timeout;
        let mut window: Vec<f64> = Vec::with_capacity(samples);
        loop {
            let values = sensor.read().await?;
            if let Some(value) = values.into_iter().next() {
                let value = sensor.options().transform(value);
                let numeric = value.as_f64().ok_or_else(|| {
                    AppError::validation_error(format!("{} stable 需要数值读数，得到 {}", self.name, value))
                })?;
                window.push(numeric);
                if window.len() > samples {
                    window.remove(0);
                }
                if window.len() == samples {
                    let last = numeric;
                    if window.iter().all(|v| (v - last).abs() <= delta) {
                        let limit = self.limit();
                        let reading = Reading::new(
                            &self.name,
                            Some(ReadingValue::Float(last)),
                            limit.unit.clone(),
                            &limit.name,
                            limit.check(&ReadingValue::Float(last)),
                        )
                        .with_positions(positions);
                        self.record(reading.clone(), limit);
                        return Ok(reading);
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
        drop(sensor);
        self.record_missing(&positions);
        Err(AppError::no_result(
            self.name.clone(),
            format!("{:?} 内 {} 个读数未能稳定在 ±{}", timeout, samples, delta),
        ))
    }
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measurement")
            .field("name", &self.name)
            .field("sensor", &self.sensor)
            .field("limits", &self.limits.iter().map(|l| l.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

/// 按名称创建测量项的描述：(测量名, 限值名, 传感器名, 说明)
pub type MeasurementSpec<'a> = (&'a str, &'a str, &'a str, &'a str);

/// 测量项注册表
pub struct Measurements {
    registry: NamedRegistry<Measurement>,
    profile: Arc<dyn IMeasurementsProfile>,
    parameter: String,
    recorder: ResultRecorder,
    poll_interval: Duration,
}

impl Measurements {
    pub fn new(
        profile: Arc<dyn IMeasurementsProfile>,
        parameter: impl Into<String>,
        recorder: ResultRecorder,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry: NamedRegistry::new("Measurements"),
            profile,
            parameter: parameter.into(),
            recorder,
            poll_interval,
        }
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn recorder(&self) -> &ResultRecorder {
        &self.recorder
    }

    /// 登记一个测量项
    pub fn create(
        &mut self,
        name: &str,
        sensor: SensorHandle,
        limits: Vec<Limit>,
        doc: &str,
    ) -> AppResult<()> {
        let measurement = Measurement::new(name, sensor, limits, self.recorder.clone())?
            .with_doc(doc)
            .with_poll_interval(self.poll_interval);
        self.registry.insert(name, measurement)
    }

    /// 按名称批量创建：每项查找限值与传感器后构造测量项
    pub fn create_from_names(
        &mut self,
        sensors: &Sensors,
        limits: &TestLimits,
        specs: &[MeasurementSpec<'_>],
    ) -> AppResult<()> {
        for (name, limit_name, sensor_name, doc) in specs {
            let limit = limits.get(limit_name)?.clone();
            let sensor = sensors.get(sensor_name)?;
            self.create(name, sensor, vec![limit], doc)?;
        }
        Ok(())
    }

    /// 创建并行限值测量项：传感器每个值对应一个限值
    pub fn create_parallel(
        &mut self,
        sensors: &Sensors,
        limits: &TestLimits,
        name: &str,
        limit_names: &[&str],
        sensor_name: &str,
        doc: &str,
    ) -> AppResult<()> {
        let limits = limit_names
            .iter()
            .map(|l| limits.get(l).map(|limit| limit.clone()))
            .collect::<AppResult<Vec<_>>>()?;
        let sensor = sensors.get(sensor_name)?;
        self.create(name, sensor, limits, doc)
    }

    pub fn get(&self, name: &str) -> AppResult<&Measurement> {
        self.registry.get(name)
    }

    /// 修改所有使用 `limit_name` 的测量项中的正则限值，返回受影响的测量项数
    ///
    /// 之后的判定使用新模式，已记录的读数不变。没有测量项使用该限值时返回 NotFoundError
    pub fn adjust_limit(&mut self, limit_name: &str, new_pattern: &str) -> AppResult<usize> {
        let mut adjusted = 0;
        for measurement in self.registry.values_mut() {
            let mut touched = false;
            for limit in measurement.limits.iter_mut().filter(|l| l.name == limit_name) {
                limit.adjust(new_pattern)?;
                touched = true;
            }
            if touched {
                adjusted += 1;
            }
        }
        if adjusted == 0 {
            return Err(AppError::not_found_error(
                "Limit",
                format!("没有测量项使用限值 {}", limit_name),
            ));
        }
        Ok(adjusted)
    }


    pub fn get_mut(&mut self, name: &str) -> AppResult<&mut Measurement> {
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

    /// 由产品配置填充注册表
    pub async fn open(&mut self, sensors: &Sensors, limits: &TestLimits) -> AppResult<()> {
        let profile = self.profile.clone();
        profile.open(self, sensors, limits).await?;
        debug!("[Measurements] 已登记 {} 个测量项", self.registry.len());
        Ok(())
    }

    /// 清零所有抑制作用域，再调用产品配置的复位钩子
    pub async fn reset(&self) -> AppResult<()> {
        for measurement in self.registry.values() {
            measurement.reset();
        }
        self.recorder.reset_suppression();
        self.profile.reset(self).await
    }

    pub fn close(&mut self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultCode;
    use crate::services::domain::sensors::{MirrorSensor, SensorOptions};
    use crate::services::infrastructure::mock_instruments::MockConsole;
    use crate::services::infrastructure::instruments::IConsole;
    use crate::services::domain::sensors::KeyedSensor;

    fn mirror(rereadable: bool) -> SensorHandle {
        SensorHandle::new(MirrorSensor::new(SensorOptions::new("mir").with_rereadable(rereadable)))
    }

    fn measurement(sensor: SensorHandle, limit: Limit, recorder: &ResultRecorder) -> Measurement {
        Measurement::new("V", sensor, vec![limit], recorder.clone())
            .unwrap()
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_measure_pass() {
        let recorder = ResultRecorder::new();
        let sensor = mirror(false);
        sensor.store(12.1.into()).await.unwrap();
        let m = measurement(sensor, Limit::delta("V", 12.0, 0.5).unwrap(), &recorder);

        let result = m.measure(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(result.code, Some(ResultCode::Pass));
        assert_eq!(recorder.snapshot().readings.len(), 1);
    }

    #[tokio::test]
    async fn test_measure_fail_raises_and_marks_position() {
        let recorder = ResultRecorder::new();
        let sensor = mirror(false);
        sensor.store(10.0.into()).await.unwrap();
        let m = measurement(sensor, Limit::delta("V", 12.0, 0.5).unwrap(), &recorder);

        let err = m.measure(Duration::ZERO, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "MEASUREMENT_FAILED_ERROR");
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.code, Some(ResultCode::Fail));
        assert!(snapshot.failed_positions.contains(&1));
    }

    #[tokio::test]
    async fn test_position_fail_disabled_scope() {
        let recorder = ResultRecorder::new();
        let sensor = mirror(true);
        sensor.store(10.0.into()).await.unwrap();
        let m = measurement(sensor, Limit::delta("V", 12.0, 0.5).unwrap(), &recorder);
        {
            let _scope = m.position_fail_disabled();
            let result = m.measure(Duration::ZERO, Duration::ZERO).await.unwrap();
            assert_eq!(result.code, Some(ResultCode::Fail));
        }
        assert!(m.measure(Duration::ZERO, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn test_limit_without_position_fail_does_not_raise() {
        let recorder = ResultRecorder::new();
        let sensor = mirror(true);
        sensor.store(10.0.into()).await.unwrap();
        let limit = Limit::delta("V", 12.0, 0.5).unwrap().with_position_fail(false);
        let m = measurement(sensor, limit, &recorder);
        let result = m.measure(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(result.code, Some(ResultCode::Fail));
        assert!(recorder.snapshot().failed_positions.is_empty());
    }

    #[tokio::test]
    async fn test_no_value_is_no_result() {
        let recorder = ResultRecorder::new();
        let m = measurement(mirror(false), Limit::high("V", 1.0).unwrap(), &recorder);
        let err = m.measure(Duration::from_millis(50), Duration::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "NO_RESULT_ERROR");
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.readings.len(), 1);
        assert_eq!(snapshot.readings[0].value, None);
    }

    #[tokio::test]
    async fn test_timeout_bounded() {
        let recorder = ResultRecorder::new();
        let sensor = mirror(true);
        sensor.store(5.0.into()).await.unwrap();
        let m = measurement(sensor, Limit::high("V", 10.0).unwrap(), &recorder);

        let started = std::time::Instant::now();
        let err = m.measure(Duration::from_millis(200), Duration::ZERO).await.unwrap_err();
        assert!(err.is_measurement_failure());
        assert!(started.elapsed() < Duration::from_millis(200 + 20 + 30));
    }

    #[tokio::test]
    async fn test_parallel_limits() {
        let recorder = ResultRecorder::new();
        let handle = SensorHandle::new(MirrorSensor::consumable("pair"));
        handle
            .lock()
            .await
            .store_frame(vec![12.0.into(), 0.2.into()])
            .unwrap();
        let m = Measurement::new(
            "Out",
            handle,
            vec![Limit::delta("Vout", 12.0, 0.5).unwrap(), Limit::low("Ripple", 0.1).unwrap()],
            recorder.clone(),
        )
        .unwrap();
        assert!(m.measure(Duration::ZERO, Duration::ZERO).await.is_err());
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.readings.len(), 2);
        assert!(snapshot.readings[0].is_pass);
        assert!(!snapshot.readings[1].is_pass);
    }

    #[tokio::test]
    async fn test_console_error_is_measurement_failure() {
        let recorder = ResultRecorder::new();
        let console = MockConsole::new("arm");
        console.open_port().await.unwrap();
        console.preset_fault("VBAT", "校验和错误");
        let sensor = SensorHandle::new(KeyedSensor::new(SensorOptions::new("vbat"), Arc::new(console), "VBAT"));
        let m = measurement(sensor, Limit::high("Vbat", 10.0).unwrap(), &recorder);
        let err = m.measure(Duration::ZERO, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "MEASUREMENT_FAILED_ERROR");
        assert_eq!(recorder.snapshot().code, Some(ResultCode::Fail));
    }

    #[tokio::test]
    async fn test_stable_waits_for_window() {
        let recorder = ResultRecorder::new();
        let sensor = SensorHandle::new(MirrorSensor::consumable("pfc"));
        for v in [380.0, 395.0, 399.0, 400.2, 399.8, 400.1] {
            sensor.store(ReadingValue::Float(v)).await.unwrap();
        }
        let m = measurement(sensor, Limit::delta("Vpfc", 400.0, 5.0).unwrap(), &recorder);
        let reading = m.stable(0.5, 3, Duration::from_secs(1)).await.unwrap();
        // 窗口 [400.2, 399.8, 400.1] 都在 400.1 ± 0.5 内
        assert_eq!(reading.value, Some(ReadingValue::Float(400.1)));
        assert!(reading.is_pass);
    }

    #[tokio::test]
    async fn test_adjust_limit_retargets_every_user() {
        let recorder = ResultRecorder::new();
        let mut measurements = Measurements::new(
            Arc::new(crate::services::traits::NoopMeasurementsProfile),
            "",
            recorder.clone(),
            Duration::from_millis(20),
        );
        let limit = Limit::regexp("SwVer", r"^1\.").unwrap();
        let sensor = mirror(true);
        sensor.store("1.4.2".into()).await.unwrap();
        measurements.create("Ver", sensor.clone(), vec![limit.clone()], "").unwrap();
        measurements.create("VerAgain", sensor, vec![limit], "").unwrap();

        let first = measurements.get("Ver").unwrap().measure(Duration::ZERO, Duration::ZERO).await.unwrap();
        assert_eq!(first.code, Some(ResultCode::Pass));

        assert_eq!(measurements.adjust_limit("SwVer", r"^2\.").unwrap(), 2);
        for name in ["Ver", "VerAgain"] {
            let err = measurements.get(name).unwrap().measure(Duration::ZERO, Duration::ZERO).await.unwrap_err();
            assert_eq!(err.error_code(), "MEASUREMENT_FAILED_ERROR");
        }

        // 调整前记录的读数不受影响
        let readings = recorder.snapshot().readings;
        assert_eq!(readings.len(), 3);
        assert!(readings[0].is_pass);
        assert!(!readings[1].is_pass && !readings[2].is_pass);

        let err = measurements.adjust_limit("SwVer", "(").unwrap_err();
        assert_eq!(err.error_code(), "LIMIT_ERROR");
        let err = measurements.adjust_limit("Vout", ".*").unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND_ERROR");
    }

    #[tokio::test]
    async fn test_stable_rejects_text() {
        let recorder = ResultRecorder::new();
        let sensor = SensorHandle::new(MirrorSensor::consumable("ver"));
        sensor.store("1.0".into()).await.unwrap();
        let m = measurement(sensor, Limit::regexp("Ver", ".*").unwrap(), &recorder);
        let err = m.stable(0.1, 2, Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
