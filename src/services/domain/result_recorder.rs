/// 运行结果记录器
///
/// 一次运行中所有测量项共享同一个记录器：读数折入整体结果，
/// 同时维护当前步骤的结果代码与失败抑制计数。

use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{MeasurementResult, Reading, ResultCode};

#[derive(Debug, Default)]
struct RecorderState {
    result: MeasurementResult,
    step_code: Option<ResultCode>,
}

#[derive(Debug, Default)]
struct SuppressionState {
    epoch: u64,
    depth: usize,
}

/// 失败抑制计数
///
/// reset 时代次加一，之前发出的作用域释放时不再影响计数
#[derive(Debug, Clone, Default)]
pub(crate) struct SuppressionCounter {
    state: Arc<Mutex<SuppressionState>>,
}

impl SuppressionCounter {
    fn lock(&self) -> MutexGuard<'_, SuppressionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn acquire(&self) -> SuppressionGuard {
        let mut state = self.lock();
        state.depth += 1;
        SuppressionGuard {
            counter: self.clone(),
            epoch: state.epoch,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lock().depth > 0
    }

    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.depth = 0;
    }
}

/// 失败抑制作用域
///
/// 存在期间计数加一，离开作用域（包括提前返回或 panic 展开）时减一
#[derive(Debug)]
pub struct SuppressionGuard {
    counter: SuppressionCounter,
    epoch: u64,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        let mut state = self.counter.lock();
        if state.epoch == self.epoch {
            state.depth = state.depth.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultRecorder {
    state: Arc<Mutex<RecorderState>>,
    suppression: SuppressionCounter,
}

impl ResultRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 开始新的一次运行，丢弃上次的结果
    pub fn begin_run(&self) {
        let mut state = self.lock();
        state.result = MeasurementResult::new();
        state.step_code = None;
    }

    /// 开始新的步骤
    pub fn begin_step(&self) {
        self.lock().step_code = None;
    }

    /// 当前步骤的结果代码；尚无读数时为 None
    pub fn step_code(&self) -> Option<ResultCode> {
        self.lock().step_code
    }

    /// 记录一个读数；`send_signal` 为 false 时只折入结果代码
    pub fn record(&self, reading: Reading, send_signal: bool) {
        let mut state = self.lock();
        let code = reading.code();
        state.step_code = ResultCode::combine(state.step_code, code);
        if send_signal {
            state.result.append(reading);
        } else {
            state.result.fold_code(code);
        }
    }

    /// 步骤以测量类错误结束时把失败折入结果
    ///
    /// 错误没有留下失败读数（例如步骤直接调用控制台驱动）时，
    /// 结果代码置为 FAIL 并把 `positions` 全部标记为失败；已有失败读数时只确认步骤代码
    pub fn fail_step(&self, positions: &[usize]) {
        let mut state = self.lock();
        if state.step_code == Some(ResultCode::Fail) {
            return;
        }
        state.step_code = Some(ResultCode::Fail);
        state.result.fold_code(ResultCode::Fail);
        state.result.mark_positions_failed(positions);
    }

    /// 标记位置失败
    pub fn mark_positions_failed(&self, positions: &[usize]) {
        self.lock().result.mark_positions_failed(positions);
    }

    /// 记录运行错误（只保留第一个）
    pub fn set_error(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.result.error.is_none() {
            state.result.error = Some(message.into());
        }
    }

    /// 当前结果的拷贝
    pub fn snapshot(&self) -> MeasurementResult {
        self.lock().result.clone()
    }

    /// 进入整体失败抑制作用域
    pub fn suppress(&self) -> SuppressionGuard {
        self.suppression.acquire()
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppression.is_active()
    }

    /// 清零抑制计数（safety 阶段调用），之前发出的作用域随之失效
    pub fn reset_suppression(&self) {
        self.suppression.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(name: &str, pass: bool) -> Reading {
        Reading::new(name, Some(1.0.into()), None, name, pass)
    }

    #[test]
    fn test_step_code_and_run_code() {
        let recorder = ResultRecorder::new();
        recorder.begin_run();
        recorder.begin_step();
        assert_eq!(recorder.step_code(), None);
        recorder.record(reading("a", true), true);
        assert_eq!(recorder.step_code(), Some(ResultCode::Pass));

        recorder.begin_step();
        recorder.record(reading("b", false), false);
        assert_eq!(recorder.step_code(), Some(ResultCode::Fail));

        let result = recorder.snapshot();
        // send_signal = false 的读数不出现但影响结果
        assert_eq!(result.readings.len(), 1);
        assert_eq!(result.code, Some(ResultCode::Fail));
    }

    #[test]
    fn test_suppression_guard_released() {
        let recorder = ResultRecorder::new();
        {
            let _outer = recorder.suppress();
            let _inner = recorder.suppress();
            assert!(recorder.is_suppressed());
        }
        assert!(!recorder.is_suppressed());

        let guard = recorder.suppress();
        recorder.reset_suppression();
        drop(guard);
        assert!(!recorder.is_suppressed());
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_scope() {
        let recorder = ResultRecorder::new();
        let stale = recorder.suppress();
        recorder.reset_suppression();

        let fresh = recorder.suppress();
        drop(stale);
        assert!(recorder.is_suppressed());
        drop(fresh);
        assert!(!recorder.is_suppressed());
    }

    #[test]
    fn test_fail_step_without_failing_reading() {
        let recorder = ResultRecorder::new();
        recorder.begin_run();
        recorder.begin_step();
        recorder.record(reading("a", true), true);
        recorder.fail_step(&[1, 2]);
        assert_eq!(recorder.step_code(), Some(ResultCode::Fail));

        let result = recorder.snapshot();
        assert_eq!(result.code, Some(ResultCode::Fail));
        assert!(result.failed_positions.contains(&1));
        assert!(result.failed_positions.contains(&2));

        // 已有失败读数的步骤不再追加位置
        recorder.begin_step();
        recorder.record(reading("b", false), true);
        recorder.fail_step(&[3]);
        assert!(!recorder.snapshot().failed_positions.contains(&3));
    }

    #[test]
    fn test_first_error_kept() {
        let recorder = ResultRecorder::new();
        recorder.set_error("first");
        recorder.set_error("second");
        assert_eq!(recorder.snapshot().error.as_deref(), Some("first"));
        recorder.begin_run();
        assert_eq!(recorder.snapshot().error, None);
    }
}
