/// 命名注册表
///
/// Devices / Sensors / Measurements / TestLimits 共用的有序存储：
/// 按插入顺序保存，重复键拒绝，未知键返回 NotFoundError。

use crate::utils::error::{AppError, AppResult};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NamedRegistry<T> {
    /// 注册表名称，用于错误信息
    registry_name: &'static str,
    /// 按插入顺序保存的条目
    entries: Vec<(String, T)>,
    /// 键 -> entries 下标
    index: HashMap<String, usize>,
}

impl<T> NamedRegistry<T> {
    pub fn new(registry_name: &'static str) -> Self {
        Self {
            registry_name,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn registry_name(&self) -> &'static str {
        self.registry_name
    }

    /// 插入条目，键已存在时返回 DuplicateName 且不修改注册表
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> AppResult<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(AppError::duplicate_name(self.registry_name, key));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> AppResult<&T> {
        match self.index.get(key) {
            Some(&i) => Ok(&self.entries[i].1),
            None => Err(self.unknown_key(key)),
        }
    }

    pub fn get_mut(&mut self, key: &str) -> AppResult<&mut T> {
        match self.index.get(key) {
            Some(&i) => Ok(&mut self.entries[i].1),
            None => Err(self.unknown_key(key)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空（close 阶段调用）
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn unknown_key(&self, key: &str) -> AppError {
        AppError::not_found_error(self.registry_name, format!("未登记的名称: {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order() {
        let mut registry = NamedRegistry::new("Devices");
        registry.insert("dmm", 1).unwrap();
        registry.insert("acsource", 2).unwrap();
        registry.insert("dcl", 3).unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["dmm", "acsource", "dcl"]);
        assert_eq!(*registry.get("acsource").unwrap(), 2);
    }

    #[test]
    fn test_duplicate_rejected_without_mutation() {
        let mut registry = NamedRegistry::new("Sensors");
        registry.insert("vout", 1).unwrap();
        let err = registry.insert("vout", 2).unwrap_err();
        assert_eq!(
            err,
            AppError::DuplicateName { registry: "Sensors".into(), name: "vout".into() }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.get("vout").unwrap(), 1);
    }

    #[test]
    fn test_unknown_key_is_distinct_error() {
        let mut registry: NamedRegistry<u8> = NamedRegistry::new("Measurements");
        let err = registry.get("nope").unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND_ERROR");
        assert_ne!(err.error_code(), "DUPLICATE_NAME_ERROR");
        assert!(registry.get_mut("nope").is_err());
    }

    #[test]
    fn test_clear() {
        let mut registry = NamedRegistry::new("Devices");
        registry.insert("a", ()).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        // 清空后同名可重新登记
        registry.insert("a", ()).unwrap();
    }
}
