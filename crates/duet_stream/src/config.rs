//! 流配置

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// 流缓冲与请求节奏配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 单个请求的超时（毫秒）
    pub request_timeout_ms: u64,
    /// 单次 READ 的目标字节数
    pub read_size: u32,
    /// 低水位：缓冲低于此值时发出 READ
    pub low_water: u32,
    /// 高水位：缓冲永不超过此值
    pub high_water: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            read_size: 32 * 1024,   // 32KB
            low_water: 64 * 1024,   // 64KB
            high_water: 256 * 1024, // 256KB
        }
    }
}

impl StreamConfig {
    /// 从 JSON 文件加载（缺失字段取默认值）
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive"));
        }
        if self.read_size == 0 {
            return Err(ConfigError::Invalid("read_size must be positive"));
        }
        if self.low_water == 0 {
            return Err(ConfigError::Invalid("low_water must be positive"));
        }
        if self.low_water > self.high_water {
            return Err(ConfigError::Invalid("low_water exceeds high_water"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        StreamConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_inverted_watermarks() {
        let config = StreamConfig {
            low_water: 10,
            high_water: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "read_size": 1024, "request_timeout_ms": 250 }}"#).unwrap();

        let config = StreamConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.read_size, 1024);
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.high_water, StreamConfig::default().high_water);
    }
}
