//! 图形后端模块
//!
//! 本模块封装了两套 GPU 驱动协议的底层实现：
//! - Vulkan：线性显式的低层图形 API
//! - DirectX 12：带隐式根签名绑定堆的图形 API（仅 Windows）
//!
//! 两个后端都实现了统一的 `renderer::GpuBackend` trait，
//! 在设备创建时选定一个并显式传入各核心组件。

pub mod vulkan;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use vulkan::VulkanBackend;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Backend;
