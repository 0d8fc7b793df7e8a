/// 夹具端口表
///
/// 把 (夹具物料号, 逻辑端口名) 映射到操作系统设备路径，区分 Linux / Windows。
/// 内置表可由配置文件中的条目扩展或覆盖；测试台型号可能再做一次路径重映射。

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{HostOs, TesterType};
use crate::utils::error::{AppError, AppResult};

/// 一个端口映射条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixturePortEntry {
    /// 夹具物料号
    pub fixture: String,
    /// 逻辑端口名，如 "ARM"、"CAN"
    pub port: String,
    /// Linux 设备路径
    pub linux: String,
    /// Windows 设备路径
    pub windows: String,
}

impl FixturePortEntry {
    pub fn new(fixture: &str, port: &str, linux: &str, windows: &str) -> Self {
        Self {
            fixture: fixture.to_string(),
            port: port.to_string(),
            linux: linux.to_string(),
            windows: windows.to_string(),
        }
    }

    pub fn path_for(&self, os: HostOs) -> &str {
        match os {
            HostOs::Linux => &self.linux,
            HostOs::Windows => &self.windows,
        }
    }
}

/// 内置夹具端口
static BUILTIN_PORTS: Lazy<Vec<FixturePortEntry>> = Lazy::new(|| {
    vec![
        FixturePortEntry::new("017056", "ARM", "/dev/ttyUSB0", "COM16"),
        FixturePortEntry::new("017789", "ARM", "/dev/ttyUSB0", "COM5"),
        FixturePortEntry::new("018699", "ARM", "/dev/ttyUSB0", "COM4"),
        FixturePortEntry::new("020827", "ARM", "/dev/ttyUSB0", "COM4"),
        FixturePortEntry::new("022837", "ARM", "/dev/ttyUSB0", "COM4"),
        FixturePortEntry::new("025197", "ARM", "/dev/ttyUSB0", "COM6"),
        FixturePortEntry::new("025197", "CAN", "/dev/ttyACM1", "COM7"),
        FixturePortEntry::new("027176", "ARM", "/dev/ttyUSB0", "COM2"),
        FixturePortEntry::new("027176", "CAN", "/dev/ttyACM1", "COM3"),
        FixturePortEntry::new("028468", "BLE", "/dev/ttyACM0", "COM11"),
        FixturePortEntry::new("028468", "PIC", "/dev/ttyUSB1", "COM9"),
        FixturePortEntry::new("029242", "ARM", "/dev/ttyUSB0", "COM2"),
        FixturePortEntry::new("029242", "CAN", "/dev/ttyACM1", "COM10"),
    ]
});

/// 测试台型号对设备路径的重映射
static TESTER_REMAP: Lazy<HashMap<TesterType, Vec<(&'static str, &'static str)>>> = Lazy::new(|| {
    let mut remap = HashMap::new();
    remap.insert(TesterType::Ate4, vec![("/dev/ttyACM1", "/dev/ttyACM2")]);
    remap
});

/// 夹具端口表
#[derive(Debug, Clone)]
pub struct FixturePortTable {
    entries: HashMap<(String, String), FixturePortEntry>,
}

impl FixturePortTable {
    /// 只含内置条目的端口表
    pub fn builtin() -> Self {
        Self::with_entries(&[])
    }

    /// 内置条目加上额外条目（同键的额外条目覆盖内置）
    pub fn with_entries(extra: &[FixturePortEntry]) -> Self {
        let mut entries = HashMap::new();
        for entry in BUILTIN_PORTS.iter().chain(extra.iter()) {
            entries.insert((entry.fixture.clone(), entry.port.clone()), entry.clone());
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 解析逻辑端口
    pub fn resolve(
        &self,
        fixture: &str,
        port: &str,
        tester_type: TesterType,
        os: HostOs,
    ) -> AppResult<String> {
        let entry = self
            .entries
            .get(&(fixture.to_string(), port.to_string()))
            .ok_or_else(|| {
                AppError::not_found_error("FixturePort", format!("夹具 {} 没有端口 {}", fixture, port))
            })?;
        let path = entry.path_for(os);
        let remapped = TESTER_REMAP
            .get(&tester_type)
            .and_then(|pairs| pairs.iter().find(|(from, _)| *from == path))
            .map(|(_, to)| to.to_string());
        Ok(remapped.unwrap_or_else(|| path.to_string()))
    }
}

impl Default for FixturePortTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_specific_paths() {
        let table = FixturePortTable::builtin();
        assert_eq!(
            table.resolve("027176", "ARM", TesterType::Ate3, HostOs::Linux).unwrap(),
            "/dev/ttyUSB0"
        );
        assert_eq!(
            table.resolve("027176", "ARM", TesterType::Ate3, HostOs::Windows).unwrap(),
            "COM2"
        );
    }

    #[test]
    fn test_ate4_remap() {
        let table = FixturePortTable::builtin();
        assert_eq!(
            table.resolve("027176", "CAN", TesterType::Ate3, HostOs::Linux).unwrap(),
            "/dev/ttyACM1"
        );
        assert_eq!(
            table.resolve("027176", "CAN", TesterType::Ate4, HostOs::Linux).unwrap(),
            "/dev/ttyACM2"
        );
        // 未列入重映射的路径保持不变
        assert_eq!(
            table.resolve("027176", "ARM", TesterType::Ate4, HostOs::Linux).unwrap(),
            "/dev/ttyUSB0"
        );
    }

    #[test]
    fn test_extra_entries_override() {
        let table = FixturePortTable::with_entries(&[
            FixturePortEntry::new("027176", "ARM", "/dev/ttyUSB3", "COM9"),
            FixturePortEntry::new("999999", "ARM", "/dev/ttyS0", "COM1"),
        ]);
        assert_eq!(
            table.resolve("027176", "ARM", TesterType::Ate3, HostOs::Linux).unwrap(),
            "/dev/ttyUSB3"
        );
        assert!(table.resolve("999999", "ARM", TesterType::Ate5, HostOs::Windows).is_ok());
        let err = table.resolve("999999", "CAN", TesterType::Ate3, HostOs::Linux).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND_ERROR");
    }
}
