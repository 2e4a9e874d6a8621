//! DirectX 12 后端
//!
//! 把统一后端接口落到 windows-rs 上。资源表除了本机资源外还
//! 暂存每个视图的 CPU 描述符句柄（由资源创建层在非着色器可见堆上
//! 建好），描述符写入就是把它们拷进着色器可见堆。

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::error;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;

use crate::core::error::{PolyRenderError, Result};
use crate::renderer::backend_trait::{GpuBackend, PageBinding};
use crate::renderer::barrier::ResourceBarrier;
use crate::renderer::descriptor::{BoundResource, DescriptorWrite};
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::{BufferId, QueueKind, SamplerId, TextureId};
use crate::renderer::root_signature::{PipelineKind, RootConstantRange, RootLayout};
use crate::renderer::shader::{DescriptorKind, UpdateFrequency};
use crate::renderer::virtual_texture::VirtualTexturePage;

use super::barrier;
use super::descriptor::{self, Dx12DescriptorBlock, Dx12DescriptorSlot, Dx12Signature};
use super::device::Dx12Device;
use super::pass::{self, Dx12FrameBuffer, Dx12RenderPass};
use super::virtual_texture::{self, Dx12PageMemory, Dx12StagingBuffer};

/// 已注册的纹理（含暂存的视图句柄）
pub struct Dx12Texture {
    pub resource: ID3D12Resource,
    pub dxgi_format: DXGI_FORMAT,
    pub bytes_per_pixel: u32,
    /// tiled 纹理的 tile 形状（`GetResourceTiling` 的结果；普通纹理填 1）
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_depth: u32,
    /// 完整 mip 链 SRV 的 CPU 句柄
    pub srv: usize,
    /// 逐 mip SRV
    pub mip_srvs: Vec<usize>,
    pub uav: Option<usize>,
    pub rtv: Option<usize>,
    /// 逐 mip RTV（渲染到指定 mip 用）
    pub mip_rtvs: Vec<usize>,
    pub dsv: Option<usize>,
}

/// 已注册的缓冲
pub struct Dx12Buffer {
    pub resource: ID3D12Resource,
    pub cbv: Option<usize>,
    pub uav: Option<usize>,
}

/// ID -> 本机资源与暂存句柄的资源表
#[derive(Default)]
pub struct ResourceTable {
    textures: HashMap<TextureId, Dx12Texture>,
    buffers: HashMap<BufferId, Dx12Buffer>,
    samplers: HashMap<SamplerId, usize>,
}

impl ResourceTable {
    pub fn texture(&self, id: TextureId) -> Result<&Dx12Texture> {
        self.textures.get(&id).ok_or_else(|| {
            PolyRenderError::Runtime(format!("texture {:?} not registered", id))
        })
    }

    pub fn texture_resource(&self, id: TextureId) -> Result<&ID3D12Resource> {
        self.texture(id).map(|t| &t.resource)
    }

    pub fn buffer_resource(&self, id: BufferId) -> Result<&ID3D12Resource> {
        self.buffers
            .get(&id)
            .map(|b| &b.resource)
            .ok_or_else(|| PolyRenderError::Runtime(format!("buffer {:?} not registered", id)))
    }

    /// 绑定资源对应的暂存 CPU 句柄
    pub fn staged_handle(&self, resource: BoundResource, kind: DescriptorKind) -> Result<usize> {
        match resource {
            BoundResource::Texture { id, mip } => {
                let texture = self.texture(id)?;
                match kind {
                    DescriptorKind::StorageImage => texture.uav.ok_or_else(|| {
                        PolyRenderError::Runtime(format!("texture {:?} has no UAV", id))
                    }),
                    _ => match mip {
                        None => Ok(texture.srv),
                        Some(mip) => {
                            texture.mip_srvs.get(mip as usize).copied().ok_or_else(|| {
                                PolyRenderError::Runtime(format!(
                                    "texture {:?} has no SRV for mip {}",
                                    id, mip
                                ))
                            })
                        }
                    },
                }
            }
            BoundResource::Buffer { id, .. } => {
                let buffer = self.buffers.get(&id).ok_or_else(|| {
                    PolyRenderError::Runtime(format!("buffer {:?} not registered", id))
                })?;
                let handle = match kind {
                    DescriptorKind::StorageBuffer => buffer.uav,
                    _ => buffer.cbv,
                };
                handle.ok_or_else(|| {
                    PolyRenderError::Runtime(format!(
                        "buffer {:?} has no staged view for {}",
                        id,
                        kind.name()
                    ))
                })
            }
            BoundResource::Sampler { id } => {
                self.samplers.get(&id).copied().ok_or_else(|| {
                    PolyRenderError::Runtime(format!("sampler {:?} not registered", id))
                })
            }
        }
    }

    /// 渲染到指定 mip 的 RTV 句柄
    pub fn render_target_handle(
        &self,
        id: TextureId,
        mip: u32,
    ) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        let texture = self.texture(id)?;
        let ptr = if mip == 0 {
            texture.rtv
        } else {
            texture.mip_rtvs.get(mip as usize).copied()
        };
        ptr.map(|ptr| D3D12_CPU_DESCRIPTOR_HANDLE { ptr }).ok_or_else(|| {
            PolyRenderError::Runtime(format!("texture {:?} has no RTV for mip {}", id, mip))
        })
    }

    /// DSV 句柄
    pub fn depth_stencil_handle(&self, id: TextureId) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        let texture = self.texture(id)?;
        texture
            .dsv
            .map(|ptr| D3D12_CPU_DESCRIPTOR_HANDLE { ptr })
            .ok_or_else(|| PolyRenderError::Runtime(format!("texture {:?} has no DSV", id)))
    }
}

/// DirectX 12 图形后端
pub struct Dx12Backend {
    device: Dx12Device,
    resources: RwLock<ResourceTable>,
}

impl Dx12Backend {
    /// 初始化设备并建立空资源表
    pub fn new() -> Result<Self> {
        Ok(Self {
            device: Dx12Device::new()?,
            resources: RwLock::new(ResourceTable::default()),
        })
    }

    /// 设备访问
    pub fn device(&self) -> &Dx12Device {
        &self.device
    }

    /// 登记一张纹理
    pub fn register_texture(&self, id: TextureId, texture: Dx12Texture) {
        if let Ok(mut table) = self.resources.write() {
            table.textures.insert(id, texture);
        }
    }

    /// 登记一个缓冲
    pub fn register_buffer(&self, id: BufferId, buffer: Dx12Buffer) {
        if let Ok(mut table) = self.resources.write() {
            table.buffers.insert(id, buffer);
        }
    }

    /// 登记一个采样器的暂存句柄
    pub fn register_sampler(&self, id: SamplerId, staged_cpu: usize) {
        if let Ok(mut table) = self.resources.write() {
            table.samplers.insert(id, staged_cpu);
        }
    }

    /// 注销一张纹理
    pub fn unregister_texture(&self, id: TextureId) {
        if let Ok(mut table) = self.resources.write() {
            table.textures.remove(&id);
        }
    }

    fn read_resources(&self) -> Result<std::sync::RwLockReadGuard<'_, ResourceTable>> {
        self.resources
            .read()
            .map_err(|_| PolyRenderError::Runtime("resource table lock poisoned".into()))
    }
}

impl GpuBackend for Dx12Backend {
    type Signature = Dx12Signature;
    type RenderPass = Dx12RenderPass;
    type FrameBuffer = Dx12FrameBuffer;
    type DescriptorBlock = Dx12DescriptorBlock;
    type DescriptorSlot = Dx12DescriptorSlot;
    type CommandList = ID3D12GraphicsCommandList;
    type PageMemory = Dx12PageMemory;
    type StagingBuffer = Dx12StagingBuffer;

    fn name(&self) -> &'static str {
        "DirectX 12"
    }

    fn prepare_signature(&self, layout: &RootLayout) -> Result<Self::Signature> {
        descriptor::create_signature(&self.device, layout)
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<Self::RenderPass> {
        Ok(pass::create_render_pass(key))
    }

    fn create_frame_buffer(
        &self,
        _pass: &Self::RenderPass,
        desc: &FrameBufferDesc,
    ) -> Result<Self::FrameBuffer> {
        let resources = self.read_resources()?;
        pass::create_frame_buffer(&resources, desc)
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
        descriptor::allocate_slots(block, signature, frequency, count)
    }

    fn write_descriptor_slot(
        &self,
        signature: &Self::Signature,
        layout: &RootLayout,
        frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
        _bindings: &[Option<BoundResource>],
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
        let set_index = frequency.set_index();
        unsafe {
            if let Some(param) = signature.table_params[set_index] {
                let handle = D3D12_GPU_DESCRIPTOR_HANDLE { ptr: slot.view_gpu };
                match pipeline_kind {
                    PipelineKind::Graphics => cmd.SetGraphicsRootDescriptorTable(param, handle),
                    PipelineKind::Compute => cmd.SetComputeRootDescriptorTable(param, handle),
                }
            }
            if let Some(param) = signature.sampler_params[set_index] {
                let handle = D3D12_GPU_DESCRIPTOR_HANDLE {
                    ptr: slot.sampler_gpu,
                };
                match pipeline_kind {
                    PipelineKind::Graphics => cmd.SetGraphicsRootDescriptorTable(param, handle),
                    PipelineKind::Compute => cmd.SetComputeRootDescriptorTable(param, handle),
                }
            }
        }
    }

    fn push_root_constants(
        &self,
        cmd: &mut Self::CommandList,
        signature: &Self::Signature,
        range: &RootConstantRange,
        data: &[u8],
    ) {
        // 字节偏移只在 Vulkan 的 push constant 区里有意义，
        // D3D12 侧每条根常量独占一个根参数
        let param = match signature.constant_params.get(&range.descriptor_index) {
            Some(&param) => param,
            None => return,
        };
        unsafe {
            cmd.SetGraphicsRoot32BitConstants(
                param,
                data.len() as u32 / 4,
                data.as_ptr() as *const _,
                0,
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
        pass::begin_pass(cmd, pass, frame_buffer, load_actions);
    }

    fn cmd_end_pass(&self, _cmd: &mut Self::CommandList) {
        // OMSetRenderTargets 没有对应的 "结束" 调用
    }

    fn cmd_resource_barriers(
        &self,
        cmd: &mut Self::CommandList,
        _queue: QueueKind,
        barriers: &[ResourceBarrier],
    ) {
        match self.read_resources() {
            Ok(resources) => barrier::record(&resources, cmd, barriers),
            Err(e) => error!(target: "polyrender::dx12", "{}", e),
        }
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<Self::StagingBuffer> {
        virtual_texture::create_staging(&self.device, data)
    }

    fn destroy_staging_buffer(&self, staging: Self::StagingBuffer) {
        // COM 引用计数负责实际释放
        drop(staging);
    }

    fn cmd_copy_to_page(
        &self,
        cmd: &mut Self::CommandList,
        staging: &Self::StagingBuffer,
        texture: TextureId,
        page: &VirtualTexturePage,
    ) {
        let result = self.read_resources().and_then(|resources| {
            virtual_texture::copy_to_page(&resources, cmd, staging, texture, page)
        });
        if let Err(e) = result {
            error!(target: "polyrender::dx12", "page copy failed: {}", e);
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
