//! 渲染核心模块
//!
//! 后端无关的状态化层：描述符绑定模型、渲染通道 / 帧缓冲缓存、
//! 资源状态追踪、虚拟纹理驻留管理、设备能力探测。
//! 所有组件以 `backend_trait::GpuBackend` 为缝，
//! 在设备创建时选定具体后端并显式向下传递。
//!
//! 本层没有内部线程：所有方法都在调用者线程上执行，
//! 通道 / 帧缓冲查找按录制上下文隔离做到稳态无锁，
//! 描述符分配由池内的互斥锁串行化。

pub mod backend_trait;
pub mod barrier;
pub mod descriptor;
pub mod device;
pub mod pass_cache;
pub mod resource;
pub mod root_signature;
pub mod shader;
pub mod sync;
pub mod virtual_texture;

#[cfg(test)]
pub(crate) mod testing;

pub use backend_trait::{GpuBackend, MemoryUsage, PageAllocator, PageBinding};
pub use barrier::{BarrierResource, OwnershipTransfer, ResourceBarrier, ResourceStateTracker};
pub use descriptor::{
    BoundResource, DescriptorBinding, DescriptorPool, DescriptorSet, DescriptorWrite,
    RootSignature, UpdateOutcome,
};
pub use device::{
    pick_depth_format, select_best_gpu, select_queue_family, FormatCapabilities, GpuDescriptor,
    GpuPresetLevel, QueueFamilyInfo,
};
pub use pass_cache::{
    AttachmentView, ColorAttachmentKey, ColorLoad, ContextRegistry, DepthAttachmentKey,
    FrameBufferDesc, FrameBufferKey, LoadActions, RenderContext, RenderPassKey,
};
pub use resource::{
    BufferId, Extent3, LoadAction, Offset3, PixelFormat, QueueKind, ResourceState, SampleCount,
    SamplerId, SubresourceRange, TextureId,
};
pub use root_signature::{
    DescriptorInfo, PipelineKind, RootConstantRange, RootLayout, SetLayout,
};
pub use shader::{
    DescriptorKind, ShaderResource, ShaderStageFlags, StageReflection, UpdateFrequency,
};
pub use sync::{FenceTimeline, FenceValue, FrameRing};
pub use virtual_texture::{
    PageResidency, TickStats, VirtualTexture, VirtualTextureDesc, VirtualTexturePage,
    VisibilityList,
};
