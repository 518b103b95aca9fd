// 配置管理模块

use crate::uploader::UploadError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 默认分片大小：5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 默认上传并发数
pub const DEFAULT_CONCURRENCY: usize = 3;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 同时在途的分片上传数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl UploadConfig {
    /// 校验配置合法性
    ///
    /// 分片大小与并发数都必须为正整数
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConcurrency);
        }
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_upload_config() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.concurrency, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = UploadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConcurrency)
        ));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = UploadConfig {
            chunk_size: 0,
            concurrency: 3,
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidChunkSize)
        ));
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: UploadConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);

        let config: UploadConfig = serde_json::from_str(r#"{"concurrency": 8}"#).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_app_config_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.upload.chunk_size, config.upload.chunk_size);
        assert_eq!(decoded.log.level, "info");
    }
}
