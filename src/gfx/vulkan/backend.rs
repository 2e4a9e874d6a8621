//! Vulkan 后端
//!
//! 把统一后端接口落到 ash 上。资源表维护 ID 到本机句柄的映射，
//! 由外部的资源创建层在注册 / 注销时填写；核心层只携带 ID。

use ash::vk;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::error;

use crate::core::error::{PolyRenderError, Result};
use crate::renderer::backend_trait::{GpuBackend, PageBinding};
use crate::renderer::barrier::ResourceBarrier;
use crate::renderer::descriptor::{BoundResource, DescriptorWrite};
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::{BufferId, QueueKind, SamplerId, TextureId};
use crate::renderer::root_signature::{PipelineKind, RootConstantRange, RootLayout};
use crate::renderer::shader::UpdateFrequency;
use crate::renderer::virtual_texture::VirtualTexturePage;

use super::convert;
use super::descriptor::{self, VulkanDescriptorBlock, VulkanSignature};
use super::device::VulkanDevice;
use super::pass::{self, VulkanFrameBuffer, VulkanRenderPass};
use super::virtual_texture::{self, VulkanPageMemory, VulkanStagingBuffer};
use super::barrier;

/// 已注册的纹理
pub struct VulkanTexture {
    pub image: vk::Image,
    /// 完整 mip 链视图
    pub view: vk::ImageView,
    /// 逐 mip 视图（mip 链绑定与逐 mip 渲染用）
    pub mip_views: Vec<vk::ImageView>,
    pub aspect: vk::ImageAspectFlags,
    pub mip_count: u32,
    pub layer_count: u32,
}

/// 已注册的缓冲
pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,
}

/// ID -> 本机句柄的资源表
#[derive(Default)]
pub struct ResourceTable {
    textures: HashMap<TextureId, VulkanTexture>,
    buffers: HashMap<BufferId, VulkanBuffer>,
    samplers: HashMap<SamplerId, vk::Sampler>,
}

impl ResourceTable {
    pub fn texture(&self, id: TextureId) -> Result<&VulkanTexture> {
        self.textures.get(&id).ok_or_else(|| {
            PolyRenderError::Runtime(format!("texture {:?} not registered", id))
        })
    }

    pub fn buffer(&self, id: BufferId) -> Result<&VulkanBuffer> {
        self.buffers.get(&id).ok_or_else(|| {
            PolyRenderError::Runtime(format!("buffer {:?} not registered", id))
        })
    }

    pub fn sampler(&self, id: SamplerId) -> Result<vk::Sampler> {
        self.samplers.get(&id).copied().ok_or_else(|| {
            PolyRenderError::Runtime(format!("sampler {:?} not registered", id))
        })
    }
}

/// Vulkan 图形后端
pub struct VulkanBackend {
    device: VulkanDevice,
    resources: RwLock<ResourceTable>,
}

impl VulkanBackend {
    /// 初始化设备并建立空资源表
    pub fn new(app_name: &str) -> Result<Self> {
        Ok(Self {
            device: VulkanDevice::new(app_name)?,
            resources: RwLock::new(ResourceTable::default()),
        })
    }

    /// 设备访问
    pub fn device(&self) -> &VulkanDevice {
        &self.device
    }

    /// 登记一张纹理
    pub fn register_texture(&self, id: TextureId, texture: VulkanTexture) {
        if let Ok(mut table) = self.resources.write() {
            table.textures.insert(id, texture);
        }
    }

    /// 登记一个缓冲
    pub fn register_buffer(&self, id: BufferId, buffer: VulkanBuffer) {
        if let Ok(mut table) = self.resources.write() {
            table.buffers.insert(id, buffer);
        }
    }

    /// 登记一个采样器
    pub fn register_sampler(&self, id: SamplerId, sampler: vk::Sampler) {
        if let Ok(mut table) = self.resources.write() {
            table.samplers.insert(id, sampler);
        }
    }

    /// 注销一张纹理（句柄本身由资源层销毁）
    pub fn unregister_texture(&self, id: TextureId) {
        if let Ok(mut table) = self.resources.write() {
            table.textures.remove(&id);
        }
    }

    /// 注销一个缓冲
    pub fn unregister_buffer(&self, id: BufferId) {
        if let Ok(mut table) = self.resources.write() {
            table.buffers.remove(&id);
        }
    }

    /// 销毁本机根签名对象
    pub fn destroy_signature(&self, signature: &VulkanSignature) {
        descriptor::destroy_signature(&self.device, signature);
    }

    /// 销毁缓存中的通道对象（设备销毁前调用）
    pub fn destroy_render_pass(&self, pass: &VulkanRenderPass) {
        unsafe {
            self.device.handle().destroy_render_pass(pass.raw, None);
        }
    }

    /// 销毁帧缓冲对象
    pub fn destroy_frame_buffer(&self, frame_buffer: &VulkanFrameBuffer) {
        unsafe {
            self.device.handle().destroy_framebuffer(frame_buffer.raw, None);
        }
    }

    fn read_resources(&self) -> Result<std::sync::RwLockReadGuard<'_, ResourceTable>> {
        self.resources
            .read()
            .map_err(|_| PolyRenderError::Runtime("resource table lock poisoned".into()))
    }
}

impl GpuBackend for VulkanBackend {
    type Signature = VulkanSignature;
    type RenderPass = VulkanRenderPass;
    type FrameBuffer = VulkanFrameBuffer;
    type DescriptorBlock = VulkanDescriptorBlock;
    type DescriptorSlot = vk::DescriptorSet;
    type CommandList = vk::CommandBuffer;
    type PageMemory = VulkanPageMemory;
    type StagingBuffer = VulkanStagingBuffer;

    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn prepare_signature(&self, layout: &RootLayout) -> Result<Self::Signature> {
        descriptor::create_signature(&self.device, layout)
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<Self::RenderPass> {
        pass::create_render_pass(&self.device, key)
    }

    fn create_frame_buffer(
        &self,
        pass: &Self::RenderPass,
        desc: &FrameBufferDesc,
    ) -> Result<Self::FrameBuffer> {
        let resources = self.read_resources()?;
        pass::create_frame_buffer(&self.device, &resources, pass, desc)
    }

    fn create_descriptor_block(&self, capacity_sets: u32) -> Result<Self::DescriptorBlock> {
        descriptor::create_block(&self.device, capacity_sets)
    }

    fn allocate_descriptor_slots(
        &self,
        block: &mut Self::DescriptorBlock,
        signature: &Self::Signature,
        frequency: UpdateFrequency,
        count: u32,
    ) -> Result<Vec<Self::DescriptorSlot>> {
        descriptor::allocate_slots(&self.device, block, signature, frequency, count)
    }

    fn write_descriptor_slot(
        &self,
        signature: &Self::Signature,
        layout: &RootLayout,
        frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
        bindings: &[Option<BoundResource>],
        changed: &[DescriptorWrite],
    ) -> Result<()> {
        let resources = self.read_resources()?;
        descriptor::write_slot(
            &self.device,
            &resources,
            signature,
            layout,
            frequency,
            slot,
            bindings,
            changed,
        )
    }

    fn bind_descriptor_slot(
        &self,
        cmd: &mut Self::CommandList,
        signature: &Self::Signature,
        pipeline_kind: PipelineKind,
        frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
    ) {
        let bind_point = match pipeline_kind {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                *cmd,
                bind_point,
                signature.pipeline_layout,
                frequency.set_index() as u32,
                &[slot],
                &[],
            );
        }
    }

    fn push_root_constants(
        &self,
        cmd: &mut Self::CommandList,
        signature: &Self::Signature,
        range: &RootConstantRange,
        data: &[u8],
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                *cmd,
                signature.pipeline_layout,
                convert::shader_stages(range.stages),
                range.offset_bytes,
                data,
            );
        }
    }

    fn cmd_begin_pass(
        &self,
        cmd: &mut Self::CommandList,
        pass: &Self::RenderPass,
        frame_buffer: &Self::FrameBuffer,
        load_actions: &LoadActions,
    ) {
        pass::begin_pass(&self.device, *cmd, pass, frame_buffer, load_actions);
    }

    fn cmd_end_pass(&self, cmd: &mut Self::CommandList) {
        pass::end_pass(&self.device, *cmd);
    }

    fn cmd_resource_barriers(
        &self,
        cmd: &mut Self::CommandList,
        queue: QueueKind,
        barriers: &[ResourceBarrier],
    ) {
        match self.read_resources() {
            Ok(resources) => barrier::record(&self.device, &resources, *cmd, queue, barriers),
            Err(e) => error!(target: "polyrender::vulkan", "{}", e),
        }
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<Self::StagingBuffer> {
        virtual_texture::create_staging(&self.device, data)
    }

    fn destroy_staging_buffer(&self, staging: Self::StagingBuffer) {
        virtual_texture::destroy_staging(&self.device, staging);
    }

    fn cmd_copy_to_page(
        &self,
        cmd: &mut Self::CommandList,
        staging: &Self::StagingBuffer,
        texture: TextureId,
        page: &VirtualTexturePage,
    ) {
        let result = self.read_resources().and_then(|resources| {
            virtual_texture::copy_to_page(&self.device, &resources, *cmd, staging, texture, page)
        });
        if let Err(e) = result {
            error!(target: "polyrender::vulkan", "page copy failed: {}", e);
        }
    }

    fn update_page_bindings(
        &self,
        texture: TextureId,
        bindings: &[PageBinding<'_, Self>],
    ) -> Result<()> {
        let resources = self.read_resources()?;
        virtual_texture::bind_pages(&self.device, &resources, texture, bindings)
    }
}
