/// 多测量汇总作用域
///
/// 作用域内抑制逐个测量的失败中断，累计所有结果；结束时补充一个合成的
/// `AllOk` 布尔读数，覆盖作用域内涉及的全部夹具位置。

use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::{MeasurementResult, Reading, ReadingValue, ResultCode};
use crate::services::domain::measurements::Measurement;
use crate::services::domain::result_recorder::{ResultRecorder, SuppressionGuard};
use crate::utils::error::{AppError, AppResult};

/// 合成读数名称
pub const ALL_OK: &str = "AllOk";

pub struct MultiMeasurementSummary {
    recorder: ResultRecorder,
    default_timeout: Duration,
    result: MeasurementResult,
    sensor_positions: BTreeSet<usize>,
    failures: usize,
    guard: Option<SuppressionGuard>,
}

impl MultiMeasurementSummary {
    /// 进入作用域
    pub fn begin(recorder: &ResultRecorder, default_timeout: Duration) -> Self {
        Self {
            guard: Some(recorder.suppress()),
            recorder: recorder.clone(),
            default_timeout,
            result: MeasurementResult::new(),
            sensor_positions: BTreeSet::new(),
            failures: 0,
        }
    }

    /// 在作用域内执行一个测量，失败只计数不中断
    pub async fn measure(&mut self, measurement: &Measurement, timeout: Option<Duration>) -> AppResult<()> {
        let positions = measurement.sensor().positions().await;
        self.sensor_positions.extend(positions.iter().copied());

        match measurement
            .measure(timeout.unwrap_or(self.default_timeout), Duration::ZERO)
            .await
        {
            Ok(result) => {
                if result.code == Some(ResultCode::Fail) {
                    self.failures += 1;
                }
                self.result.merge(&result);
                Ok(())
            }
            Err(e) if e.is_measurement_failure() => {
                self.failures += 1;
                for limit in measurement.limits() {
                    self.result.append(
                        Reading::new(&measurement.name, None, limit.unit.clone(), &limit.name, false)
                            .with_positions(positions.clone()),
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 失败的测量数
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// 作用域内累计的结果
    pub fn result(&self) -> &MeasurementResult {
        &self.result
    }

    fn emit_all_ok(&mut self) -> Reading {
        let all_ok = self.failures == 0;
        let positions: Vec<usize> = self.sensor_positions.iter().copied().collect();
        let reading = Reading::new(ALL_OK, Some(ReadingValue::Bool(all_ok)), None, ALL_OK, all_ok)
            .with_positions(positions.clone());
        self.recorder.record(reading.clone(), true);
        if !all_ok {
            self.recorder.mark_positions_failed(&positions);
            self.result.mark_positions_failed(&positions);
        }
        self.result.append(reading.clone());
        self.guard = None;
        reading
    }

    /// 结束作用域
    ///
    /// 有任何失败时返回 MeasurementFailed，中断当前步骤
    pub fn finish(mut self) -> AppResult<MeasurementResult> {
        self.emit_all_ok();
        let result = std::mem::take(&mut self.result);
        if self.failures > 0 {
            return Err(AppError::measurement_failed(
                ALL_OK,
                format!("{} 个测量失败", self.failures),
            ));
        }
        Ok(result)
    }
}

impl Drop for MultiMeasurementSummary {
    fn drop(&mut self) {
        // 未调用 finish（如提前返回）时仍补充 AllOk
        if self.guard.is_some() {
            self.emit_all_ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::domain::limits::Limit;
    use crate::services::domain::sensors::{MirrorSensor, SensorHandle, SensorOptions};

    async fn channel(index: usize, value: f64, recorder: &ResultRecorder) -> Measurement {
        let sensor = SensorHandle::new(MirrorSensor::new(
            SensorOptions::new(format!("ch{}", index)).with_position(vec![index]),
        ));
        sensor.store(value.into()).await.unwrap();
        Measurement::new(
            format!("Ch{}", index),
            sensor,
            vec![Limit::delta(format!("Ch{}", index), 12.0, 0.5).unwrap()],
            recorder.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_all_ok_true_when_no_failures() {
        let recorder = ResultRecorder::new();
        let a = channel(1, 12.0, &recorder).await;
        let b = channel(2, 12.1, &recorder).await;
        let mut summary = MultiMeasurementSummary::begin(&recorder, Duration::ZERO);
        summary.measure(&a, None).await.unwrap();
        summary.measure(&b, None).await.unwrap();
        let result = summary.finish().unwrap();
        assert_eq!(result.readings.len(), 3);
        assert_eq!(result.reading(ALL_OK).unwrap().value, Some(ReadingValue::Bool(true)));
        assert!(!recorder.is_suppressed());
    }

    #[tokio::test]
    async fn test_failures_accumulate_without_abort() {
        let recorder = ResultRecorder::new();
        let a = channel(1, 9.0, &recorder).await;
        let b = channel(2, 12.0, &recorder).await;
        let mut summary = MultiMeasurementSummary::begin(&recorder, Duration::ZERO);
        summary.measure(&a, None).await.unwrap();
        summary.measure(&b, None).await.unwrap();
        assert_eq!(summary.failures(), 1);
        let err = summary.finish().unwrap_err();
        assert_eq!(err.error_code(), "MEASUREMENT_FAILED_ERROR");

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.readings.len(), 3);
        assert_eq!(snapshot.reading(ALL_OK).unwrap().value, Some(ReadingValue::Bool(false)));
        assert_eq!(snapshot.code, Some(ResultCode::Fail));
    }

    #[tokio::test]
    async fn test_drop_emits_all_ok_and_releases() {
        let recorder = ResultRecorder::new();
        let a = channel(3, 12.0, &recorder).await;
        {
            let mut summary = MultiMeasurementSummary::begin(&recorder, Duration::ZERO);
            summary.measure(&a, None).await.unwrap();
            assert!(recorder.is_suppressed());
        }
        assert!(!recorder.is_suppressed());
        let all_ok = recorder.snapshot().reading(ALL_OK).cloned().unwrap();
        assert_eq!(all_ok.positions, vec![3]);
    }
}
