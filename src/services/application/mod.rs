/// 应用层服务模块
///
/// 应用层负责把产品测试程序、测试序列与被测单元串成一次完整的运行

/// 测试程序运行服务
pub mod test_program_runner;

pub use test_program_runner::{RunReport, TestProgramRunner, UutOutcome};
