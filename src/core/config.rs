//! 配置管理模块
//!
//! 提供渲染层配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持代码内构建。
//!
//! # 配置文件格式 (polyrender.toml)
//!
//! ```toml
//! [graphics]
//! backend = "vulkan"            # 或 "dx12"
//! frames_in_flight = 3
//! descriptor_sets_per_block = 1024
//! virtual_texture_page_size = 65536
//!
//! [logging]
//! level = "info"                # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 渲染层配置
///
/// 包含了渲染抽象层运行所需的所有配置项。
/// 可以从配置文件加载，也可以通过代码构建。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 图形配置
    pub graphics: GraphicsConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// 允许同时在飞行中的帧数
    ///
    /// 决定延迟释放环的长度：帧槽被复用之前，该槽记录的延迟释放列表才会真正执行。
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: u32,

    /// 每个描述符存储块可容纳的描述符集数量
    ///
    /// 池耗尽时按同样的尺寸再分配一个块。
    #[serde(default = "default_sets_per_block")]
    pub descriptor_sets_per_block: u32,

    /// 虚拟纹理单页字节数
    #[serde(default = "default_page_size")]
    pub virtual_texture_page_size: u64,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vulkan 后端
    Vulkan,
    /// DirectX 12 后端
    Dx12,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> BackendKind { BackendKind::Vulkan }
fn default_frames_in_flight() -> u32 { 3 }
fn default_sets_per_block() -> u32 { 1024 }
fn default_page_size() -> u64 { 64 * 1024 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "polyrender.log".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            graphics: GraphicsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            frames_in_flight: default_frames_in_flight(),
            descriptor_sets_per_block: default_sets_per_block(),
            virtual_texture_page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从 TOML 文件加载配置
    ///
    /// 文件不存在时返回 `ConfigError::FileNotFound`，
    /// 解析失败时返回 `ConfigError::ParseError`。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// 从 TOML 字符串解析配置
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置项取值
    pub fn validate(&self) -> Result<()> {
        if self.graphics.frames_in_flight < 2 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.frames_in_flight".to_string(),
                reason: "must be at least 2".to_string(),
            }
            .into());
        }
        if self.graphics.descriptor_sets_per_block == 0 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.descriptor_sets_per_block".to_string(),
                reason: "must be non-zero".to_string(),
            }
            .into());
        }
        if !self.graphics.virtual_texture_page_size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "graphics.virtual_texture_page_size".to_string(),
                reason: "must be a power of two".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graphics.backend, BackendKind::Vulkan);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [graphics]
            backend = "dx12"
            frames_in_flight = 2

            [logging]
            level = "debug"
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.graphics.backend, BackendKind::Dx12);
        assert_eq!(config.graphics.frames_in_flight, 2);
        // 未给出的字段取默认值
        assert_eq!(config.graphics.descriptor_sets_per_block, 1024);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_invalid_frames_in_flight() {
        let toml = r#"
            [graphics]
            frames_in_flight = 1

            [logging]
        "#;
        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_invalid_page_size() {
        let toml = r#"
            [graphics]
            virtual_texture_page_size = 60000

            [logging]
        "#;
        assert!(Config::parse(toml).is_err());
    }
}
