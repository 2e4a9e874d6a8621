//! DirectX 12 后端实现
//!
//! 隐式根签名绑定堆的协议：着色器可见描述符堆、
//! 资源状态枚举、`UpdateTileMappings` 稀疏绑定。
//! 仅在 Windows 目标上编译（见 `gfx::mod`）。

pub mod backend;
pub mod barrier;
pub mod convert;
pub mod descriptor;
pub mod device;
pub mod pass;
pub mod virtual_texture;

pub use backend::{Dx12Backend, Dx12Buffer, Dx12Texture, ResourceTable};
pub use descriptor::{Dx12DescriptorBlock, Dx12DescriptorSlot, Dx12Signature};
pub use device::Dx12Device;
pub use pass::{Dx12FrameBuffer, Dx12RenderPass};
pub use virtual_texture::{Dx12PageAllocator, Dx12PageMemory, Dx12StagingBuffer};
