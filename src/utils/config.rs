use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Fixture, TesterType, DEFAULT_SERNUM_PATTERN};
use crate::services::infrastructure::devices::StationContext;
use crate::services::infrastructure::fixture_ports::{FixturePortEntry, FixturePortTable};
use crate::utils::error::{AppError, AppResult};

/// 应用程序主配置结构
/// 包含测试台运行所需的所有配置信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 测试台设置
    pub station: StationConfig,
    /// 日志配置
    pub logging_config: LoggingConfig,
    /// 额外的夹具端口映射（覆盖内置表中的同名条目）
    #[serde(default)]
    pub fixtures: Vec<FixturePortEntry>,
}

/// 测试台设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// 测试台型号
    pub tester_type: TesterType,
    /// 测量默认超时（毫秒）
    pub default_timeout_ms: u64,
    /// 传感器轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 出现测量失败时是否停止后续步骤
    pub stop_on_failure: bool,
    /// 序列号格式
    pub sernum_pattern: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 日志文件路径
    pub log_file_path: Option<PathBuf>,
    /// 是否启用控制台输出
    pub console_output: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            tester_type: TesterType::default(),
            default_timeout_ms: 2000,
            poll_interval_ms: 100,
            stop_on_failure: false,
            sernum_pattern: DEFAULT_SERNUM_PATTERN.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file_path: None,
            console_output: true,
        }
    }
}

/// 序列运行设置
///
/// 由 `StationConfig` 派生，显式传入 `TestSequence::new`
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSettings {
    /// 测量默认超时
    pub default_timeout: Duration,
    /// 传感器轮询间隔
    pub poll_interval: Duration,
    /// 出现测量失败时是否停止后续步骤
    pub stop_on_failure: bool,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self::from(&StationConfig::default())
    }
}

impl From<&StationConfig> for SequenceSettings {
    fn from(station: &StationConfig) -> Self {
        Self {
            default_timeout: Duration::from_millis(station.default_timeout_ms),
            poll_interval: Duration::from_millis(station.poll_interval_ms),
            stop_on_failure: station.stop_on_failure,
        }
    }
}

impl AppConfig {
    /// 序列运行设置
    pub fn sequence_settings(&self) -> SequenceSettings {
        SequenceSettings::from(&self.station)
    }

    /// 合并内置表与配置条目后的端口表
    pub fn port_table(&self) -> FixturePortTable {
        FixturePortTable::with_entries(&self.fixtures)
    }

    /// 为指定夹具构造测试台环境（尚未添加物理仪器）
    pub fn station_context(&self, fixture: Fixture) -> StationContext {
        StationContext::new(fixture, self.station.tester_type).with_ports(Arc::new(self.port_table()))
    }
}

/// 配置管理器
/// 负责加载、保存和管理应用程序配置
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: PathBuf) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 从文件加载配置
    pub async fn load_from_file(&mut self) -> AppResult<()> {
        if !self.config_file_path.exists() {
            // 如果配置文件不存在，创建默认配置文件
            self.save_to_file().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_file_path)
            .await
            .map_err(|e| AppError::io_error(format!("读取配置文件失败: {}", e), e.kind().to_string()))?;

        self.config = serde_json::from_str(&content)
            .map_err(|e| AppError::configuration_error(format!("解析配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 将配置保存到文件
    pub async fn save_to_file(&self) -> AppResult<()> {
        // 确保目录存在
        if let Some(parent) = self.config_file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string()))?;
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::json_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(&self.config_file_path, content)
            .await
            .map_err(|e| AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string()))?;

        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn override_from_env(&mut self) {
        if let Ok(tester) = std::env::var("FAT_TESTER_TYPE") {
            match tester.parse::<TesterType>() {
                Ok(tester_type) => self.config.station.tester_type = tester_type,
                Err(e) => {
                    crate::log_config_warning!("忽略 FAT_TESTER_TYPE: {}", e);
                }
            }
        }
        if let Ok(log_level) = std::env::var("FAT_LOG_LEVEL") {
            self.config.logging_config.log_level = log_level.to_lowercase();
        }
        if let Ok(stop) = std::env::var("FAT_STOP_ON_FAILURE") {
            self.config.station.stop_on_failure = stop.to_lowercase() == "true";
        }
        if let Ok(poll) = std::env::var("FAT_POLL_INTERVAL_MS") {
            if let Ok(poll) = poll.parse::<u64>() {
                self.config.station.poll_interval_ms = poll;
            }
        }
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 验证配置的有效性
    pub fn validate_config(&self) -> AppResult<()> {
        let station = &self.config.station;
        if station.poll_interval_ms == 0 {
            return Err(AppError::configuration_error("轮询间隔不能为0"));
        }

        if station.default_timeout_ms < station.poll_interval_ms {
            return Err(AppError::configuration_error(format!(
                "默认超时 {}ms 小于轮询间隔 {}ms",
                station.default_timeout_ms, station.poll_interval_ms
            )));
        }

        if let Err(e) = regex::Regex::new(&station.sernum_pattern) {
            return Err(AppError::configuration_error(format!("序列号格式无效: {}", e)));
        }

        // 验证日志级别
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging_config.log_level.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的日志级别: {}，有效值: {:?}",
                self.config.logging_config.log_level, valid_log_levels
            )));
        }

        for entry in &self.config.fixtures {
            if entry.fixture.is_empty() || entry.port.is_empty() {
                return Err(AppError::configuration_error("夹具端口条目缺少夹具号或端口名"));
            }
        }

        Ok(())
    }

    /// 重置为默认配置
    pub fn reset_to_default(&mut self) {
        self.config = AppConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let manager = ConfigManager::new(PathBuf::from("unused.json"));
        assert!(manager.validate_config().is_ok());
        let settings = manager.get_config().sequence_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert!(!settings.stop_on_failure);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut manager = ConfigManager::new(PathBuf::from("unused.json"));
        manager.get_config_mut().station.poll_interval_ms = 0;
        assert_eq!(manager.validate_config().unwrap_err().error_code(), "CONFIGURATION_ERROR");

        manager.reset_to_default();
        manager.get_config_mut().logging_config.log_level = "verbose".into();
        assert!(manager.validate_config().is_err());

        manager.reset_to_default();
        manager.get_config_mut().station.sernum_pattern = "(".into();
        assert!(manager.validate_config().is_err());
    }

    #[test]
    fn test_station_context_uses_config_ports() {
        let mut config = AppConfig::default();
        config.station.tester_type = TesterType::Ate4;
        config.fixtures.push(FixturePortEntry::new("031000", "ARM", "/dev/ttyACM1", "COM3"));
        let station = config.station_context(Fixture::new("031000", "Charger"));
        assert_eq!(station.tester_type, TesterType::Ate4);
        assert!(station.ports.resolve("031000", "ARM", TesterType::Ate3, crate::models::HostOs::Linux).is_ok());
    }
}
