//! Vulkan 后端实现
//!
//! 线性显式的低层协议：描述符池 / 更新模板、渲染通道对象、
//! 显式访问掩码与管线阶段、`vkQueueBindSparse` 稀疏绑定。

pub mod backend;
pub mod barrier;
pub mod convert;
pub mod descriptor;
pub mod device;
pub mod pass;
pub mod virtual_texture;

pub use backend::{ResourceTable, VulkanBackend, VulkanBuffer, VulkanTexture};
pub use descriptor::{VulkanDescriptorBlock, VulkanSignature};
pub use device::VulkanDevice;
pub use pass::{VulkanFrameBuffer, VulkanRenderPass};
pub use virtual_texture::{VulkanPageAllocator, VulkanPageMemory, VulkanStagingBuffer};
