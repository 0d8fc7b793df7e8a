/// Mock 仪器实现
/// 用于开发和测试阶段，模拟真实仪器的行为并记录调用，便于验证

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::instruments::{
    DmmChannel, IAcSource, IBleScanner, IConsole, IDcLoad, IDcSource, IDmm, IInstrument,
    IOperatorUi, IRelay,
};
use crate::models::ReadingValue;
use crate::utils::error::{AppError, AppResult};

/// 输出操作记录
/// 用于测试验证仪器输出是否按预期执行
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOperation {
    /// 操作时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 设定值
    pub value: f64,
    /// 输出是否打开
    pub output_on: bool,
}

impl OutputOperation {
    fn new(value: f64, output_on: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            value,
            output_on,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==================== 直流电源 ====================

#[derive(Debug, Default)]
struct DcSourceState {
    voltage: f64,
    current_limit: Option<f64>,
    output_on: bool,
    output_log: Vec<OutputOperation>,
    reset_count: usize,
}

/// Mock 直流电源
#[derive(Debug, Clone)]
pub struct MockDcSource {
    name: String,
    state: Arc<Mutex<DcSourceState>>,
}

impl MockDcSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(DcSourceState::default())),
        }
    }

    /// 当前端电压（输出关闭时为 0）
    pub fn voltage(&self) -> f64 {
        let state = lock(&self.state);
        if state.output_on {
            state.voltage
        } else {
            0.0
        }
    }

    pub fn is_on(&self) -> bool {
        lock(&self.state).output_on
    }

    pub fn current_limit(&self) -> Option<f64> {
        lock(&self.state).current_limit
    }

    pub fn output_log(&self) -> Vec<OutputOperation> {
        lock(&self.state).output_log.clone()
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }
}

#[async_trait]
impl IInstrument for MockDcSource {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.voltage = 0.0;
        state.output_on = false;
        state.reset_count += 1;
        Ok(())
    }
}

#[async_trait]
impl IDcSource for MockDcSource {
    async fn output(&self, voltage: f64, current_limit: Option<f64>, output_on: bool) -> AppResult<()> {
        debug!("[MockDcSource] {} -> {}V on={}", self.name, voltage, output_on);
        let mut state = lock(&self.state);
        state.voltage = voltage;
        if current_limit.is_some() {
            state.current_limit = current_limit;
        }
        state.output_on = output_on;
        state.output_log.push(OutputOperation::new(voltage, output_on));
        Ok(())
    }
}

// ==================== 直流负载 ====================

#[derive(Debug, Default)]
struct DcLoadState {
    current: f64,
    output_on: bool,
    output_log: Vec<OutputOperation>,
    reset_count: usize,
}

/// Mock 直流电子负载
#[derive(Debug, Clone)]
pub struct MockDcLoad {
    name: String,
    state: Arc<Mutex<DcLoadState>>,
}

impl MockDcLoad {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(DcLoadState::default())),
        }
    }

    /// 当前负载电流（输出关闭时为 0）
    pub fn current(&self) -> f64 {
        let state = lock(&self.state);
        if state.output_on {
            state.current
        } else {
            0.0
        }
    }

    pub fn output_log(&self) -> Vec<OutputOperation> {
        lock(&self.state).output_log.clone()
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }
}

#[async_trait]
impl IInstrument for MockDcLoad {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.current = 0.0;
        state.output_on = false;
        state.reset_count += 1;
        Ok(())
    }
}

#[async_trait]
impl IDcLoad for MockDcLoad {
    async fn output(&self, current: f64, output_on: bool) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.current = current;
        state.output_on = output_on;
        state.output_log.push(OutputOperation::new(current, output_on));
        Ok(())
    }
}

// ==================== 交流电源 ====================

#[derive(Debug, Default)]
struct AcSourceState {
    voltage: f64,
    frequency: f64,
    output_on: bool,
    reset_count: usize,
}

/// Mock 交流电源
#[derive(Debug, Clone)]
pub struct MockAcSource {
    name: String,
    state: Arc<Mutex<AcSourceState>>,
}

impl MockAcSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(AcSourceState::default())),
        }
    }

    pub fn is_on(&self) -> bool {
        lock(&self.state).output_on
    }

    /// (电压, 频率)
    pub fn setting(&self) -> (f64, f64) {
        let state = lock(&self.state);
        (state.voltage, state.frequency)
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }
}

#[async_trait]
impl IInstrument for MockAcSource {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.voltage = 0.0;
        state.output_on = false;
        state.reset_count += 1;
        Ok(())
    }
}

#[async_trait]
impl IAcSource for MockAcSource {
    async fn output(&self, voltage: f64, frequency: f64, output_on: bool) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.voltage = voltage;
        state.frequency = frequency;
        state.output_on = output_on;
        Ok(())
    }
}

// ==================== 继电器 ====================

#[derive(Debug, Default)]
struct RelayState {
    energised: bool,
    action_log: Vec<bool>,
    reset_count: usize,
}

/// Mock 继电器
#[derive(Debug, Clone)]
pub struct MockRelay {
    name: String,
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(RelayState::default())),
        }
    }

    pub fn is_on(&self) -> bool {
        lock(&self.state).energised
    }

    /// 历次动作（true = 吸合）
    pub fn action_log(&self) -> Vec<bool> {
        lock(&self.state).action_log.clone()
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }

    fn set(&self, energised: bool) {
        let mut state = lock(&self.state);
        state.energised = energised;
        state.action_log.push(energised);
    }
}

#[async_trait]
impl IInstrument for MockRelay {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.energised = false;
        state.reset_count += 1;
        Ok(())
    }
}

#[async_trait]
impl IRelay for MockRelay {
    async fn set_on(&self) -> AppResult<()> {
        self.set(true);
        Ok(())
    }

    async fn set_off(&self) -> AppResult<()> {
        self.set(false);
        Ok(())
    }
}

// ==================== 万用表 ====================

#[derive(Default)]
struct DmmState {
    /// 高端端子 -> 依次返回的读数
    scripts: HashMap<u16, VecDeque<f64>>,
    /// 高端端子 -> 固定读数
    sticky: HashMap<u16, f64>,
    /// 高端端子 -> 回读的直流电源
    links: HashMap<u16, MockDcSource>,
    /// 高端端子 -> 测量次数
    measure_calls: HashMap<u16, usize>,
    noise: f64,
    fault: Option<String>,
    reset_count: usize,
}

/// Mock 数字万用表
///
/// 每个通道（按高端端子区分）可以预设固定值、预设读数序列，
/// 或者链接到一个 MockDcSource 回读其输出电压
#[derive(Clone)]
pub struct MockDmm {
    name: String,
    state: Arc<Mutex<DmmState>>,
}

impl MockDmm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(DmmState::default())),
        }
    }

    /// 预设固定读数
    pub fn preset(&self, high: u16, value: f64) {
        let mut state = lock(&self.state);
        state.scripts.remove(&high);
        state.sticky.insert(high, value);
    }

    /// 预设读数序列；序列耗尽后保持最后一个值
    pub fn preset_sequence(&self, high: u16, values: Vec<f64>) {
        lock(&self.state).scripts.insert(high, values.into());
    }

    /// 通道回读直流电源的输出
    pub fn link_dc_source(&self, high: u16, source: MockDcSource) {
        lock(&self.state).links.insert(high, source);
    }

    /// 在读数上叠加 ±amplitude 的均匀噪声
    pub fn set_noise(&self, amplitude: f64) {
        lock(&self.state).noise = amplitude.abs();
    }

    /// 注入故障，之后的测量都返回仪器错误
    pub fn inject_fault(&self, message: Option<String>) {
        lock(&self.state).fault = message;
    }

    pub fn measure_count(&self, high: u16) -> usize {
        lock(&self.state).measure_calls.get(&high).copied().unwrap_or(0)
    }

    pub fn total_measure_count(&self) -> usize {
        lock(&self.state).measure_calls.values().sum()
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }
}

#[async_trait]
impl IInstrument for MockDmm {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        lock(&self.state).reset_count += 1;
        Ok(())
    }
}

#[async_trait]
impl IDmm for MockDmm {
    async fn measure(&self, channel: &DmmChannel) -> AppResult<f64> {
        let mut state = lock(&self.state);
        if let Some(fault) = &state.fault {
            return Err(AppError::instrument_error(self.name.clone(), fault.clone()));
        }
        *state.measure_calls.entry(channel.high).or_insert(0) += 1;

        let scripted = match state.scripts.get_mut(&channel.high) {
            Some(script) => {
                let value = script.pop_front();
                if script.is_empty() {
                    state.scripts.remove(&channel.high);
                }
                value
            }
            None => None,
        };
        let base = if let Some(value) = scripted {
            state.sticky.insert(channel.high, value);
            value
        } else if let Some(source) = state.links.get(&channel.high) {
            source.voltage()
        } else if let Some(value) = state.sticky.get(&channel.high) {
            *value
        } else {
            return Err(AppError::instrument_error(
                self.name.clone(),
                format!("通道 {} 未预设读数", channel.high),
            ));
        };

        if state.noise > 0.0 {
            let noise = state.noise;
            Ok(base + rand::thread_rng().gen_range(-noise..=noise))
        } else {
            Ok(base)
        }
    }
}

// ==================== 控制台 ====================

#[derive(Debug, Default)]
struct ConsoleState {
    port_open: bool,
    values: HashMap<String, ReadingValue>,
    faults: HashMap<String, String>,
    query_count: usize,
    open_count: usize,
    close_count: usize,
}

/// Mock 单片机控制台
#[derive(Debug, Clone)]
pub struct MockConsole {
    name: String,
    state: Arc<Mutex<ConsoleState>>,
}

impl MockConsole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ConsoleState::default())),
        }
    }

    /// 预设参数值
    pub fn preset(&self, key: impl Into<String>, value: ReadingValue) {
        lock(&self.state).values.insert(key.into(), value);
    }

    /// 预设参数读取故障
    pub fn preset_fault(&self, key: impl Into<String>, message: impl Into<String>) {
        lock(&self.state).faults.insert(key.into(), message.into());
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).port_open
    }

    pub fn query_count(&self) -> usize {
        lock(&self.state).query_count
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }
}

#[async_trait]
impl IInstrument for MockConsole {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IConsole for MockConsole {
    async fn open_port(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.port_open = true;
        state.open_count += 1;
        Ok(())
    }

    async fn close_port(&self) -> AppResult<()> {
        let mut state = lock(&self.state);
        state.port_open = false;
        state.close_count += 1;
        Ok(())
    }

    async fn query(&self, key: &str) -> AppResult<ReadingValue> {
        let mut state = lock(&self.state);
        state.query_count += 1;
        if !state.port_open {
            return Err(AppError::console_error(format!("{} 端口未打开", self.name)));
        }
        if let Some(fault) = state.faults.get(key) {
            return Err(AppError::console_error(fault.clone()));
        }
        state
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::console_error(format!("未知参数: {}", key)))
    }
}

// ==================== 操作员界面 ====================

#[derive(Debug, Default)]
struct OperatorUiState {
    yes_no_answers: VecDeque<bool>,
    entries: VecDeque<String>,
    prompts: Vec<String>,
}

/// Mock 操作员界面：按脚本自动应答
#[derive(Debug, Clone)]
pub struct MockOperatorUi {
    name: String,
    state: Arc<Mutex<OperatorUiState>>,
}

impl MockOperatorUi {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(OperatorUiState::default())),
        }
    }

    /// 预设是/否应答；脚本耗尽后回答"是"
    pub fn script_yes_no(&self, answers: Vec<bool>) {
        lock(&self.state).yes_no_answers.extend(answers);
    }

    /// 预设录入内容
    pub fn script_entries(&self, entries: Vec<String>) {
        lock(&self.state).entries.extend(entries);
    }

    /// 已显示过的提示
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.state).prompts.clone()
    }
}

#[async_trait]
impl IInstrument for MockOperatorUi {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IOperatorUi for MockOperatorUi {
    async fn notify(&self, prompt: &str) -> AppResult<()> {
        lock(&self.state).prompts.push(prompt.to_string());
        Ok(())
    }

    async fn yes_no(&self, prompt: &str) -> AppResult<bool> {
        let mut state = lock(&self.state);
        state.prompts.push(prompt.to_string());
        Ok(state.yes_no_answers.pop_front().unwrap_or(true))
    }

    async fn data_entry(&self, prompt: &str) -> AppResult<String> {
        let mut state = lock(&self.state);
        state.prompts.push(prompt.to_string());
        state
            .entries
            .pop_front()
            .ok_or_else(|| AppError::MockError(format!("没有预设的录入内容: {}", prompt)))
    }
}

// ==================== 蓝牙扫描器 ====================

/// Mock 蓝牙扫描器
#[derive(Debug, Clone)]
pub struct MockBleScanner {
    name: String,
    devices: Arc<Mutex<HashMap<String, i32>>>,
}

impl MockBleScanner {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 预设可被扫描到的设备
    pub fn advertise(&self, mac: impl Into<String>, rssi: i32) {
        lock(&self.devices).insert(mac.into().to_ascii_lowercase(), rssi);
    }
}

#[async_trait]
impl IInstrument for MockBleScanner {
    fn instrument_name(&self) -> &str {
        &self.name
    }

    async fn reset(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IBleScanner for MockBleScanner {
    async fn scan_rssi(&self, mac: &str, _timeout: Duration) -> AppResult<Option<i32>> {
        Ok(lock(&self.devices).get(&mac.to_ascii_lowercase()).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dmm_reads_linked_source() {
        let source = MockDcSource::new("dcs_vin");
        let dmm = MockDmm::new("dmm");
        dmm.link_dc_source(1, source.clone());
        let channel = DmmChannel::dc_volts(1, 0, 100.0, 0.001);

        assert_eq!(dmm.measure(&channel).await.unwrap(), 0.0);
        source.output(12.0, Some(1.0), true).await.unwrap();
        assert_eq!(dmm.measure(&channel).await.unwrap(), 12.0);
        assert_eq!(dmm.measure_count(1), 2);
    }

    #[tokio::test]
    async fn test_dmm_sequence_then_sticky() {
        let dmm = MockDmm::new("dmm");
        dmm.preset_sequence(3, vec![1.0, 2.0]);
        let channel = DmmChannel::dc_volts(3, 0, 10.0, 0.01);
        assert_eq!(dmm.measure(&channel).await.unwrap(), 1.0);
        assert_eq!(dmm.measure(&channel).await.unwrap(), 2.0);
        assert_eq!(dmm.measure(&channel).await.unwrap(), 2.0);

        let unset = DmmChannel::dc_volts(9, 0, 10.0, 0.01);
        assert_eq!(dmm.measure(&unset).await.unwrap_err().error_code(), "INSTRUMENT_ERROR");
    }

    #[tokio::test]
    async fn test_console_requires_open_port() {
        let console = MockConsole::new("arm");
        console.preset("SW_VERSION", "1.2.3".into());
        assert_eq!(console.query("SW_VERSION").await.unwrap_err().error_code(), "CONSOLE_ERROR");
        console.open_port().await.unwrap();
        assert_eq!(console.query("SW_VERSION").await.unwrap(), ReadingValue::from("1.2.3"));
    }

    #[tokio::test]
    async fn test_relay_pulse_records_both_edges() {
        let relay = MockRelay::new("rla_boot");
        relay.pulse(Duration::from_millis(5)).await.unwrap();
        assert_eq!(relay.action_log(), vec![true, false]);
        assert!(!relay.is_on());
    }
}
