//! 错误处理模块
//!
//! 定义了渲染层使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 按子系统划分错误枚举（配置 / 图形 / 签名 / 描述符）
//! - 为每种错误提供清晰的上下文信息
//! - 构建期错误（签名冲突、描述符内存耗尽）是致命的，直接返回给调用者
//! - 逐项错误（绑定类型不匹配）只隔离到出错的那一项，批次继续执行
//! - 易于模式匹配和错误处理

use std::fmt;

/// 渲染层统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, PolyRenderError>;

/// PolyRender 的错误类型
///
/// 包含了渲染抽象层运行过程中可能遇到的各种错误情况。
#[derive(Debug)]
pub enum PolyRenderError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 根签名构建错误
    Signature(SignatureError),

    /// 描述符分配 / 更新错误
    Descriptor(DescriptorError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 没有可用的物理设备
    NoSuitableDevice,

    /// 像素格式不支持所请求的用途
    ///
    /// 深度格式可以降级重试，见 `renderer::device::pick_depth_format`。
    UnsupportedFormat(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 稀疏绑定提交失败
    SparseBinding(String),

    /// GPU 内存耗尽
    OutOfMemory(String),

    /// 渲染命令执行失败
    CommandExecution(String),
}

/// 根签名构建相关的错误
///
/// 签名错误发生在管线装配期，一旦出错整个根签名不会被部分构建。
#[derive(Debug)]
pub enum SignatureError {
    /// 同名资源在不同着色器阶段的声明不一致
    Conflict {
        /// 资源名
        name: String,
        /// 冲突的字段（binding / frequency / kind）
        field: &'static str,
    },

    /// 反射数据中没有任何资源
    Empty,
}

/// 描述符相关的错误
#[derive(Debug)]
pub enum DescriptorError {
    /// 绑定的资源种类与根签名声明不匹配
    ///
    /// 该错误只会跳过出错的那一条绑定，同批次的其余绑定照常写入。
    TypeMismatch {
        /// 描述符名
        name: String,
        /// 根签名声明的种类
        expected: &'static str,
        /// 实际提供的种类
        actual: &'static str,
    },

    /// 描述符池在扩容重试一次之后仍然无法满足分配
    OutOfDescriptorMemory {
        /// 请求的槽位数量
        requested: u32,
    },

    /// 根签名中不存在该名字的描述符
    UnknownResource(String),

    /// 槽位索引超出描述符集的环形范围
    InvalidSlot { index: u32, count: u32 },
}

impl fmt::Display for PolyRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolyRenderError::Config(e) => write!(f, "Configuration error: {}", e),
            PolyRenderError::Graphics(e) => write!(f, "Graphics error: {}", e),
            PolyRenderError::Signature(e) => write!(f, "Root signature error: {}", e),
            PolyRenderError::Descriptor(e) => write!(f, "Descriptor error: {}", e),
            PolyRenderError::Io(e) => write!(f, "IO error: {}", e),
            PolyRenderError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            PolyRenderError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::NoSuitableDevice => write!(f, "No suitable GPU found"),
            GraphicsError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::SparseBinding(msg) => write!(f, "Sparse binding failed: {}", msg),
            GraphicsError::OutOfMemory(msg) => write!(f, "Out of GPU memory: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::Conflict { name, field } => {
                write!(f, "Shader resource '{}' declared with mismatching {}", name, field)
            }
            SignatureError::Empty => write!(f, "No shader resources in reflection data"),
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::TypeMismatch { name, expected, actual } => {
                write!(
                    f,
                    "Descriptor '{}' expects {} but a {} was bound",
                    name, expected, actual
                )
            }
            DescriptorError::OutOfDescriptorMemory { requested } => {
                write!(
                    f,
                    "Descriptor pool exhausted after growth retry (requested {} slots)",
                    requested
                )
            }
            DescriptorError::UnknownResource(name) => {
                write!(f, "Unknown descriptor name '{}'", name)
            }
            DescriptorError::InvalidSlot { index, count } => {
                write!(f, "Descriptor slot index {} out of range ({} slots)", index, count)
            }
        }
    }
}

impl std::error::Error for PolyRenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PolyRenderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for SignatureError {}
impl std::error::Error for DescriptorError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for PolyRenderError {
    fn from(err: std::io::Error) -> Self {
        PolyRenderError::Io(err)
    }
}

impl From<ConfigError> for PolyRenderError {
    fn from(err: ConfigError) -> Self {
        PolyRenderError::Config(err)
    }
}

impl From<GraphicsError> for PolyRenderError {
    fn from(err: GraphicsError) -> Self {
        PolyRenderError::Graphics(err)
    }
}

impl From<SignatureError> for PolyRenderError {
    fn from(err: SignatureError) -> Self {
        PolyRenderError::Signature(err)
    }
}

impl From<DescriptorError> for PolyRenderError {
    fn from(err: DescriptorError) -> Self {
        PolyRenderError::Descriptor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PolyRenderError::Signature(SignatureError::Conflict {
            name: "albedo".to_string(),
            field: "binding",
        });
        assert!(err.to_string().contains("albedo"));
        assert!(err.to_string().contains("binding"));

        let err = PolyRenderError::Descriptor(DescriptorError::OutOfDescriptorMemory {
            requested: 16,
        });
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_error_conversion() {
        fn fails() -> Result<()> {
            Err(SignatureError::Empty)?;
            Ok(())
        }
        match fails() {
            Err(PolyRenderError::Signature(SignatureError::Empty)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
