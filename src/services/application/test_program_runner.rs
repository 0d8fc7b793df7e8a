/// 测试程序运行服务
///
/// 驱动一次完整的产品测试：
/// 1. 由产品程序配置并打开测试序列
/// 2. 对一组被测单元执行序列
/// 3. 无论成功与否都关闭序列，释放仪器
/// 4. 汇总为运行报告（含各夹具位置的判定与进程退出码）

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::models::{MeasurementResult, SequenceState, Uut};
use crate::services::domain::test_sequence::TestSequence;
use crate::services::traits::ITestProgram;
use crate::utils::error::AppResult;

/// 单个被测单元的判定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UutOutcome {
    pub sernum: String,
    pub position: usize,
    pub passed: bool,
}

/// 一次运行的报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// 程序名称
    pub program: String,
    /// 整体结果；open 失败时为 None
    pub result: Option<MeasurementResult>,
    /// 各被测单元的判定
    pub uut_outcomes: Vec<UutOutcome>,
    /// 运行中的错误
    pub error: Option<String>,
    /// 报告生成时间
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    /// 整体是否通过：无错误、结果为 PASS、所有位置均通过
    pub fn passed(&self) -> bool {
        self.error.is_none()
            && self.result.as_ref().map_or(false, |r| r.is_pass())
            && self.uut_outcomes.iter().all(|o| o.passed)
    }

    /// 进程退出码：通过为 0，否则为 1
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

/// 测试程序运行器
pub struct TestProgramRunner;

impl TestProgramRunner {
    /// 执行测试程序并保证序列被关闭
    pub async fn execute(program: &dyn ITestProgram, seq: &mut TestSequence, uuts: Vec<Uut>) -> RunReport {
        info!("[TestProgramRunner] 开始执行程序 {}，被测单元 {} 个", program.program_name(), uuts.len());

        let outcome = Self::open_and_run(program, seq, uuts.clone()).await;

        if let Err(e) = seq.close().await {
            error!("[TestProgramRunner] 关闭测试序列失败: {}", e);
        }

        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(e) => {
                error!("[TestProgramRunner] 程序 {} 执行失败: {}", program.program_name(), e);
                (seq.last_result().cloned(), Some(e.to_string()))
            }
        };

        let uut_outcomes = uuts
            .iter()
            .map(|uut| UutOutcome {
                sernum: uut.sernum.clone(),
                position: uut.position,
                passed: error.is_none()
                    && result
                        .as_ref()
                        .map_or(false, |r| !r.failed_positions.contains(&uut.position)),
            })
            .collect();

        let report = RunReport {
            program: program.program_name().to_string(),
            result,
            uut_outcomes,
            error,
            finished_at: chrono::Utc::now(),
        };
        info!(
            "[TestProgramRunner] 程序 {} 结束: {}",
            report.program,
            if report.passed() { "PASS" } else { "FAIL" }
        );
        report
    }

    async fn open_and_run(program: &dyn ITestProgram, seq: &mut TestSequence, uuts: Vec<Uut>) -> AppResult<MeasurementResult> {
        program.open(seq).await?;
        if seq.state() == SequenceState::Created {
            seq.open().await?;
        }
        seq.run(uuts).await
    }
}
