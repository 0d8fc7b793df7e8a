//! 测试台演示程序
//!
//! 用内存仪器搭建一个测试台，运行一个两步的充电器测试程序，
//! 按结果设置进程退出码（0 = PASS）。
//!
//! 配置文件路径可由第一个命令行参数指定，默认 `fat-sequencer.json`

use anyhow::Context;
use async_trait::async_trait;
use futures::FutureExt;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fat_sequencer::logging::init_logging;
use fat_sequencer::services::domain::sensors::{InstrumentSensor, KeyedSensor, SensorOptions};
use fat_sequencer::services::infrastructure::instruments::DmmChannel;
use fat_sequencer::services::infrastructure::mock_instruments::{MockConsole, MockDcSource, MockDmm};
use fat_sequencer::services::infrastructure::LogSignalSubscriber;
use fat_sequencer::{
    AppResult, ConfigManager, DeviceHandle, Devices, Fixture, IDevicesProfile, IMeasurementsProfile,
    ISensorsProfile, ITestProgram, ITestStepBody, Limit, LotItem, Measurements, Sensors,
    StepContext, TestLimits, TestProgramRunner, TestSequence, TestStep, Uut,
};

struct ChargerDevices;

#[async_trait]
impl IDevicesProfile for ChargerDevices {
    async fn open(&self, devices: &mut Devices) -> AppResult<()> {
        devices.add_from_physical("dmm", "DMM")?;
        devices.add_from_physical("dcs_Vin", "DCS1")?;
        devices.add_from_physical("arm", "ARM")?;
        let console = devices.console("arm")?;
        devices.add_closer("arm_port", move || async move { console.close_port().await }.boxed());
        Ok(())
    }

    async fn run(&self, devices: &Devices) -> AppResult<()> {
        devices.console("arm")?.open_port().await
    }
}

struct ChargerSensors;

#[async_trait]
impl ISensorsProfile for ChargerSensors {
    async fn open(&self, sensors: &mut Sensors, devices: &Devices, _limits: &TestLimits) -> AppResult<()> {
        let dmm = devices.dmm("dmm")?;
        sensors.add(
            "Vin",
            InstrumentSensor::new(SensorOptions::new("Vin"), dmm.clone(), DmmChannel::dc_volts(1, 0, 100.0, 0.001)),
        )?;
        sensors.add(
            "Vout",
            InstrumentSensor::new(SensorOptions::new("Vout"), dmm, DmmChannel::dc_volts(2, 0, 10.0, 0.001)),
        )?;
        sensors.add(
            "SwVer",
            KeyedSensor::new(SensorOptions::new("SwVer"), devices.console("arm")?, "SW_VERSION"),
        )?;
        Ok(())
    }
}

struct ChargerMeasurements;

#[async_trait]
impl IMeasurementsProfile for ChargerMeasurements {
    async fn open(&self, measurements: &mut Measurements, sensors: &Sensors, limits: &TestLimits) -> AppResult<()> {
        measurements.create_from_names(
            sensors,
            limits,
            &[
                ("Vin", "Vin", "Vin", "输入电压"),
                ("Vout", "Vout", "Vout", "输出电压"),
                ("SwVer", "SwVer", "SwVer", "固件版本"),
            ],
        )
    }
}

struct PowerUp;

#[async_trait]
impl ITestStepBody for PowerUp {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> AppResult<()> {
        ctx.dcsource(&[("dcs_Vin", 12.0)], Duration::from_millis(50)).await?;
        ctx.measure(&["Vin"], None, Duration::ZERO).await?;
        Ok(())
    }
}

struct CheckOutput;

#[async_trait]
impl ITestStepBody for CheckOutput {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> AppResult<()> {
        ctx.measure(&["Vout", "SwVer"], None, Duration::ZERO).await?;
        Ok(())
    }
}

struct ChargerProgram;

#[async_trait]
impl ITestProgram for ChargerProgram {
    fn program_name(&self) -> &str {
        "Charger"
    }

    async fn open(&self, seq: &mut TestSequence) -> AppResult<()> {
        seq.configure(
            vec![
                Limit::between("Vin", 11.5, 12.5)?.with_unit("V"),
                Limit::delta("Vout", 5.0, 0.25)?.with_unit("V"),
                Limit::regexp("SwVer", r"^1\.\d+\.\d+$")?,
            ],
            Arc::new(ChargerDevices),
            Arc::new(ChargerSensors),
            Arc::new(ChargerMeasurements),
        )?;
        seq.set_steps(vec![
            TestStep::new("PowerUp", Arc::new(PowerUp)),
            TestStep::new("CheckOutput", Arc::new(CheckOutput)),
        ]);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("fat-sequencer.json"));

    let mut config_manager = ConfigManager::new(config_path);
    config_manager.load_from_file().await.context("加载配置失败")?;
    config_manager.override_from_env();
    config_manager.validate_config().context("配置无效")?;
    let config = config_manager.get_config().clone();

    init_logging(&config.logging_config).context("初始化日志失败")?;

    // 内存仪器：万用表通道 1 回读直流电源，通道 2 固定 5.02V
    let dcs = MockDcSource::new("DCS1");
    let dmm = MockDmm::new("DMM");
    dmm.link_dc_source(1, dcs.clone());
    dmm.preset(2, 5.02);
    dmm.set_noise(0.005);
    let console = MockConsole::new("ARM");
    console.preset("SW_VERSION", "1.4.2".into());

    let station = config
        .station_context(Fixture::new("027176", "Charger fixture"))
        .with_device("DMM", DeviceHandle::Dmm(Arc::new(dmm)))
        .with_device("DCS1", DeviceHandle::DcSource(Arc::new(dcs)))
        .with_device("ARM", DeviceHandle::Console(Arc::new(console)));

    let mut seq = TestSequence::new(station, "", config.sequence_settings());
    seq.subscribe(Arc::new(LogSignalSubscriber)).await;

    let lot = LotItem::new("A12345", "Charger", "3");
    let uut = Uut::with_pattern("A1234AB5678", "3", lot, 1, &config.station.sernum_pattern)
        .context("序列号无效")?;

    let report = TestProgramRunner::execute(&ChargerProgram, &mut seq, vec![uut]).await;
    info!("运行报告: {}", serde_json::to_string_pretty(&report)?);
    std::process::exit(report.exit_code());
}
