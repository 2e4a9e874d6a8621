//! 统一的图形后端接口
//!
//! 本模块定义了所有图形后端（Vulkan、DirectX 12）必须实现的统一方法面。
//! 上层的状态化组件（描述符池、通道缓存、状态追踪器、虚拟纹理驻留管理）
//! 都以该 trait 为缝，在设备创建时选定一个具体后端并显式向下传递。
//!
//! # 设计理念
//!
//! - **抽象化**：隐藏两套驱动协议的实现细节
//! - **关联类型**：本机对象（通道、描述符块、页内存等）以关联类型出现，
//!   上层代码对具体句柄类型保持泛型
//! - **薄翻译**：trait 方法只做"本机调用"这一层；合并、缓存、
//!   脏检查、延迟释放等状态逻辑全部在上层共享实现里

use crate::core::error::Result;
use crate::renderer::barrier::ResourceBarrier;
use crate::renderer::descriptor::{BoundResource, DescriptorWrite};
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::{QueueKind, TextureId};
use crate::renderer::root_signature::{PipelineKind, RootConstantRange, RootLayout};
use crate::renderer::shader::UpdateFrequency;
use crate::renderer::virtual_texture::VirtualTexturePage;

/// 内存用途提示
///
/// 传给分配器协作方，决定内存放在哪个堆上。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// 仅 GPU 访问
    GpuOnly,
    /// CPU 写、GPU 读（上传）
    CpuToGpu,
    /// GPU 写、CPU 读（回读）
    GpuToCpu,
}

/// 统一的图形后端接口
///
/// 所有具体的图形后端（如 Vulkan、DirectX 12）都必须实现此 trait。
pub trait GpuBackend: Sized {
    /// 本机根签名对象（Vulkan：集布局 + 管线布局 + 更新模板；
    /// DX12：`ID3D12RootSignature`）
    type Signature;
    /// 本机渲染通道对象
    type RenderPass;
    /// 本机帧缓冲对象
    type FrameBuffer;
    /// 本机描述符存储块（Vulkan：描述符池；DX12：堆内区段）
    type DescriptorBlock;
    /// 本机描述符集句柄
    type DescriptorSlot: Copy + PartialEq + std::fmt::Debug;
    /// 本机命令流
    type CommandList;
    /// 一页稀疏纹理的本机内存
    type PageMemory;
    /// 瞬态上传缓冲
    type StagingBuffer;

    /// 后端名称，用于日志输出和调试
    fn name(&self) -> &'static str;

    /// 由合并好的布局创建本机根签名对象
    fn prepare_signature(&self, layout: &RootLayout) -> Result<Self::Signature>;

    /// 按附件形状创建渲染通道
    fn create_render_pass(&self, key: &RenderPassKey) -> Result<Self::RenderPass>;

    /// 按具体附件身份创建帧缓冲
    fn create_frame_buffer(
        &self,
        pass: &Self::RenderPass,
        desc: &FrameBufferDesc,
    ) -> Result<Self::FrameBuffer>;

    /// 分配一个描述符存储块
    ///
    /// `capacity_sets` 是该块可容纳的描述符集数量，内部按固定
    /// 比例换算成各类描述符的存储量；池耗尽时上层会以同样的
    /// 尺寸再要一个块。
    fn create_descriptor_block(&self, capacity_sets: u32) -> Result<Self::DescriptorBlock>;

    /// 从块中取出 `count` 个本机描述符集
    ///
    /// 块容量不足时返回错误，由上层决定是否扩容重试。
    fn allocate_descriptor_slots(
        &self,
        block: &mut Self::DescriptorBlock,
        signature: &Self::Signature,
        frequency: UpdateFrequency,
        count: u32,
    ) -> Result<Vec<Self::DescriptorSlot>>;

    /// 把一个槽位的绑定内容写入本机描述符
    ///
    /// `bindings` 是槽位的完整影子数组（按布局扁平下标排列），
    /// `changed` 是本次实际变化的条目。Vulkan 用预建的更新模板
    /// 一次写整个集；DX12 只拷贝变化的句柄。
    fn write_descriptor_slot(
        &self,
        signature: &Self::Signature,
        layout: &RootLayout,
        frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
        bindings: &[Option<BoundResource>],
        changed: &[DescriptorWrite],
    ) -> Result<()>;

    /// 把槽位绑定到命令流
    fn bind_descriptor_slot(
        &self,
        cmd: &mut Self::CommandList,
        signature: &Self::Signature,
        pipeline_kind: PipelineKind,
        frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
    );

    /// 写入内联根常量
    fn push_root_constants(
        &self,
        cmd: &mut Self::CommandList,
        signature: &Self::Signature,
        range: &RootConstantRange,
        data: &[u8],
    );

    /// 开启渲染通道
    fn cmd_begin_pass(
        &self,
        cmd: &mut Self::CommandList,
        pass: &Self::RenderPass,
        frame_buffer: &Self::FrameBuffer,
        load_actions: &LoadActions,
    );

    /// 结束当前渲染通道
    fn cmd_end_pass(&self, cmd: &mut Self::CommandList);

    /// 把一批资源屏障翻译并录制为一次本机调用
    ///
    /// 管线阶段取整批访问掩码的并集，而不是逐资源各发一次。
    fn cmd_resource_barriers(
        &self,
        cmd: &mut Self::CommandList,
        queue: QueueKind,
        barriers: &[ResourceBarrier],
    );

    /// 创建一块填好数据的瞬态上传缓冲
    fn create_staging_buffer(&self, data: &[u8]) -> Result<Self::StagingBuffer>;

    /// 销毁瞬态上传缓冲
    fn destroy_staging_buffer(&self, staging: Self::StagingBuffer);

    /// 录制"上传缓冲 -> 稀疏纹理页"的拷贝命令
    fn cmd_copy_to_page(
        &self,
        cmd: &mut Self::CommandList,
        staging: &Self::StagingBuffer,
        texture: TextureId,
        page: &VirtualTexturePage,
    );

    /// 一次性提交本帧触碰到的所有页绑定变更
    fn update_page_bindings(
        &self,
        texture: TextureId,
        bindings: &[PageBinding<'_, Self>],
    ) -> Result<()>;
}

/// 单页绑定变更
///
/// `memory` 为 `None` 表示解除绑定。
pub struct PageBinding<'a, B: GpuBackend> {
    /// 页表下标
    pub page_index: u32,
    /// 页描述
    pub page: &'a VirtualTexturePage,
    /// 要绑定的内存；None 表示解绑
    pub memory: Option<&'a B::PageMemory>,
}

/// 分配器协作方
///
/// 驻留管理按页大小逐页分配；描述符块的底层存储也经由它。
/// 具体的子分配策略不在本层范围内。
pub trait PageAllocator<B: GpuBackend> {
    /// 分配 `size` 字节、按 `alignment` 对齐的一块内存
    fn allocate(&mut self, size: u64, alignment: u64, usage: MemoryUsage) -> Result<B::PageMemory>;

    /// 释放先前分配的内存
    fn free(&mut self, memory: B::PageMemory);
}
