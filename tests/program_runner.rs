//! 测试程序运行器集成测试
//!
//! 验证 open → run → close 的完整流程、运行报告与退出码

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use fat_sequencer::services::domain::sensors::{InstrumentSensor, SensorOptions};
use fat_sequencer::services::infrastructure::instruments::DmmChannel;
use fat_sequencer::services::infrastructure::mock_instruments::{MockDcSource, MockDmm};
use fat_sequencer::*;

struct Devs;

#[async_trait]
impl IDevicesProfile for Devs {
    async fn open(&self, devices: &mut Devices) -> AppResult<()> {
        devices.add_from_physical("dmm", "DMM")?;
        devices.add_from_physical("dcs", "DCS1")
    }
}

struct Sens;

#[async_trait]
impl ISensorsProfile for Sens {
    async fn open(&self, sensors: &mut Sensors, devices: &Devices, _limits: &TestLimits) -> AppResult<()> {
        let dmm = devices.dmm("dmm")?;
        sensors.add(
            "Vout",
            InstrumentSensor::new(
                SensorOptions::new("Vout").with_position(vec![1, 2]),
                dmm,
                DmmChannel::dc_volts(1, 0, 100.0, 0.001),
            ),
        )?;
        Ok(())
    }
}

struct Meas;

#[async_trait]
impl IMeasurementsProfile for Meas {
    async fn open(&self, measurements: &mut Measurements, sensors: &Sensors, limits: &TestLimits) -> AppResult<()> {
        measurements.create_from_names(sensors, limits, &[("Vout", "Vout", "Vout", "输出电压")])
    }
}

struct Check;

#[async_trait]
impl ITestStepBody for Check {
    async fn execute(&self, ctx: &mut StepContext<'_>) -> AppResult<()> {
        ctx.dcsource(&[("dcs", 12.0)], Duration::ZERO).await?;
        ctx.measure(&["Vout"], None, Duration::ZERO).await?;
        Ok(())
    }
}

/// 直接返回控制台错误，不产生读数
struct ConsoleFault;

#[async_trait]
impl ITestStepBody for ConsoleFault {
    async fn execute(&self, _ctx: &mut StepContext<'_>) -> AppResult<()> {
        Err(AppError::console_error("ARM 无响应"))
    }
}

struct Program {
    fail_open: bool,
    console_fault: bool,
}

#[async_trait]
impl ITestProgram for Program {
    fn program_name(&self) -> &str {
        "Bench"
    }

    async fn open(&self, seq: &mut TestSequence) -> AppResult<()> {
        if self.fail_open {
            return Err(AppError::configuration_error("产品版本不受支持"));
        }
        seq.configure(
            vec![Limit::delta("Vout", 12.0, 0.5)?],
            Arc::new(Devs),
            Arc::new(Sens),
            Arc::new(Meas),
        )?;
        let mut steps = vec![TestStep::new("Check", Arc::new(Check))];
        if self.console_fault {
            steps.push(TestStep::new("Console", Arc::new(ConsoleFault)));
        }
        seq.set_steps(steps);
        Ok(())
    }
}

fn uuts() -> Vec<Uut> {
    let lot = LotItem::new("A12345", "Charger", "3");
    vec![
        Uut::new("A1234AB0001", "3", lot.clone(), 1).unwrap(),
        Uut::new("A1234AB0002", "3", lot, 2).unwrap(),
    ]
}

fn sequence(dmm: &MockDmm, dcs: &MockDcSource) -> TestSequence {
    let station = StationContext::new(Fixture::new("027176", "Bench"), TesterType::Ate3)
        .with_device("DMM", DeviceHandle::Dmm(Arc::new(dmm.clone())))
        .with_device("DCS1", DeviceHandle::DcSource(Arc::new(dcs.clone())));
    let settings = SequenceSettings {
        default_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(50),
        stop_on_failure: false,
    };
    TestSequence::new(station, "", settings)
}

#[tokio::test]
async fn test_passing_program_exits_zero() {
    let dmm = MockDmm::new("DMM");
    let dcs = MockDcSource::new("DCS1");
    dmm.link_dc_source(1, dcs.clone());
    let mut seq = sequence(&dmm, &dcs);

    let report = TestProgramRunner::execute(&Program { fail_open: false, console_fault: false }, &mut seq, uuts()).await;
    assert!(report.passed());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.uut_outcomes.len(), 2);
    assert!(report.uut_outcomes.iter().all(|o| o.passed));
    assert_eq!(seq.state(), SequenceState::Closed);
    // safety 已关闭电源
    assert!(!dcs.is_on());

    let json = assert_ok!(serde_json::to_string(&report));
    assert!(json.contains("\"program\":\"Bench\""));
}

#[tokio::test(start_paused = true)]
async fn test_failing_measurement_fails_every_position() {
    let dmm = MockDmm::new("DMM");
    let dcs = MockDcSource::new("DCS1");
    dmm.preset(1, 9.0);
    let mut seq = sequence(&dmm, &dcs);

    let report = TestProgramRunner::execute(&Program { fail_open: false, console_fault: false }, &mut seq, uuts()).await;
    assert!(report.error.is_none());
    assert_eq!(report.exit_code(), 1);
    let result = report.result.as_ref().unwrap();
    assert_eq!(result.code, Some(ResultCode::Fail));
    assert!(report.uut_outcomes.iter().all(|o| !o.passed));
    assert_eq!(seq.state(), SequenceState::Closed);
}

#[tokio::test]
async fn test_console_fault_after_passing_step_exits_one() {
    let dmm = MockDmm::new("DMM");
    let dcs = MockDcSource::new("DCS1");
    dmm.link_dc_source(1, dcs.clone());
    let mut seq = sequence(&dmm, &dcs);

    let report = TestProgramRunner::execute(&Program { fail_open: false, console_fault: true }, &mut seq, uuts()).await;
    assert!(report.error.is_none());
    let result = report.result.as_ref().unwrap();
    assert_eq!(result.readings.len(), 1);
    assert!(result.readings[0].is_pass);
    assert_eq!(result.code, Some(ResultCode::Fail));
    assert!(report.uut_outcomes.iter().all(|o| !o.passed));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_open_failure_is_reported_and_sequence_closed() {
    let dmm = MockDmm::new("DMM");
    let dcs = MockDcSource::new("DCS1");
    let mut seq = sequence(&dmm, &dcs);

    let report = TestProgramRunner::execute(&Program { fail_open: true, console_fault: false }, &mut seq, uuts()).await;
    assert!(report.result.is_none());
    assert!(report.error.as_deref().unwrap_or_default().contains("产品版本不受支持"));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(seq.state(), SequenceState::Closed);

    // 关闭后的序列不能再运行
    assert_err!(seq.run(Vec::new()).await);
}
