//! PolyRender - 多后端 GPU 渲染抽象层
//!
//! 一套逻辑 API（设备、缓冲、纹理、管线、命令录制）在两套
//! GPU 驱动协议（Vulkan / DirectX 12）上的实现。核心是两个后端
//! 共同依赖的状态化同步层：
//!
//! - 描述符绑定模型：根签名合并、池化分配、脏检查更新
//! - 渲染通道 / 帧缓冲缓存：按附件形状 / 身份两级记忆化，逐录制上下文无锁
//! - 资源状态追踪：声明式状态迁移到本机屏障的批量翻译
//! - 虚拟纹理驻留管理：可见性驱动的逐页换入换出与延迟释放
//! - 设备能力探测：确定性设备排序与逐格式能力位
//!
//! # 模块结构
//!
//! - `core`: 基础设施（配置、日志、错误处理）
//! - `renderer`: 后端无关的核心层
//! - `gfx`: 具体图形后端（Vulkan / DX12）

pub mod core;
pub mod gfx;
pub mod renderer;
