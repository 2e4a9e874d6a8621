//! 核心功能模块
//!
//! 提供配置、日志、错误处理等基础设施。

pub mod config;
pub mod error;
pub mod log;

pub use config::{BackendKind, Config, GraphicsConfig, LogLevel, LoggingConfig};
pub use error::{
    ConfigError, DescriptorError, GraphicsError, PolyRenderError, Result, SignatureError,
};
