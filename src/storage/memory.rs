// 内存存储后端
//
// DashMap 扁平键空间模拟目录树，用于测试和无持久化磁盘的部署场景。
// 目录概念是隐式的：以 "prefix/" 开头的键即视为该目录下的条目

use crate::storage::Storage;
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// 内存易失存储
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前条目总数
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        match self.data.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => bail!("条目不存在: {key}"),
        }
    }

    async fn write(&self, key: &str, content: &[u8]) -> Result<()> {
        self.data.insert(key.to_string(), content.to_vec());
        Ok(())
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let prefix = format!("{key}/");
        // 只取第一级条目名，模拟浅层目录遍历
        let entries: BTreeSet<String> = self
            .data
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&prefix)?;
                Some(rest.split('/').next().unwrap_or(rest).to_string())
            })
            .collect();
        Ok(entries.into_iter().collect())
    }

    async fn remove_dir(&self, key: &str) -> Result<()> {
        let prefix = format!("{key}/");
        self.data.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn combine(&self, sources: &[String], dest: &str) -> Result<()> {
        let mut combined = Vec::new();
        for source in sources {
            match self.data.get(source) {
                Some(entry) => combined.extend_from_slice(&entry),
                None => bail!("源条目不存在: {source}"),
            }
        }
        self.data.insert(dest.to_string(), combined);
        Ok(())
    }
}
