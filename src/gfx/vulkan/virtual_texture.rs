//! Vulkan 稀疏纹理支撑
//!
//! 页内存分配、瞬态上传缓冲、页拷贝命令，
//! 以及把一批页绑定变更合成一次 `vkQueueBindSparse`。

use ash::vk;

use crate::core::error::{GraphicsError, PolyRenderError, Result};
use crate::renderer::backend_trait::{MemoryUsage, PageAllocator, PageBinding};
use crate::renderer::resource::{QueueKind, TextureId};
use crate::renderer::virtual_texture::VirtualTexturePage;

use super::backend::{ResourceTable, VulkanBackend};
use super::device::VulkanDevice;

/// 一页稀疏纹理的设备内存
#[derive(Debug)]
pub struct VulkanPageMemory {
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

/// 瞬态上传缓冲（host 可见，填好即用）
#[derive(Debug)]
pub struct VulkanStagingBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

/// 创建并填充上传缓冲
pub fn create_staging(device: &VulkanDevice, data: &[u8]) -> Result<VulkanStagingBuffer> {
    let raw = device.handle();
    unsafe {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = raw.create_buffer(&buffer_info, None).map_err(|e| {
            GraphicsError::ResourceCreation(format!("staging buffer creation failed: {:?}", e))
        })?;

        let requirements = raw.get_buffer_memory_requirements(buffer);
        let memory_type = device
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or_else(|| {
                GraphicsError::OutOfMemory("no host-visible memory type".to_string())
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = raw.allocate_memory(&alloc_info, None).map_err(|e| {
            GraphicsError::OutOfMemory(format!("staging memory allocation failed: {:?}", e))
        })?;
        raw.bind_buffer_memory(buffer, memory, 0).map_err(|e| {
            GraphicsError::ResourceCreation(format!("vkBindBufferMemory failed: {:?}", e))
        })?;

        let mapped = raw
            .map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("vkMapMemory failed: {:?}", e))
            })?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped as *mut u8, data.len());
        raw.unmap_memory(memory);

        Ok(VulkanStagingBuffer {
            buffer,
            memory,
            size: data.len() as u64,
        })
    }
}

/// 销毁上传缓冲
pub fn destroy_staging(device: &VulkanDevice, staging: VulkanStagingBuffer) {
    let raw = device.handle();
    unsafe {
        raw.destroy_buffer(staging.buffer, None);
        raw.free_memory(staging.memory, None);
    }
}

/// 录制 "上传缓冲 -> 稀疏纹理页" 的拷贝
pub fn copy_to_page(
    device: &VulkanDevice,
    resources: &ResourceTable,
    cmd: vk::CommandBuffer,
    staging: &VulkanStagingBuffer,
    texture_id: TextureId,
    page: &VirtualTexturePage,
) -> Result<()> {
    let texture = resources.texture(texture_id)?;

    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: page.mip_level,
            base_array_layer: page.array_layer,
            layer_count: 1,
        },
        image_offset: vk::Offset3D {
            x: page.offset.x as i32,
            y: page.offset.y as i32,
            z: page.offset.z as i32,
        },
        image_extent: vk::Extent3D {
            width: page.extent.width,
            height: page.extent.height,
            depth: page.extent.depth,
        },
    };

    unsafe {
        device.handle().cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
    Ok(())
}

/// 一次性提交整批页绑定变更
///
/// `memory` 为 None 的条目解除绑定（内存句柄填 NULL）。
pub fn bind_pages(
    device: &VulkanDevice,
    resources: &ResourceTable,
    texture_id: TextureId,
    bindings: &[PageBinding<'_, VulkanBackend>],
) -> Result<()> {
    if bindings.is_empty() {
        return Ok(());
    }
    let texture = resources.texture(texture_id)?;

    let binds: Vec<vk::SparseImageMemoryBind> = bindings
        .iter()
        .map(|binding| vk::SparseImageMemoryBind {
            subresource: vk::ImageSubresource {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: binding.page.mip_level,
                array_layer: binding.page.array_layer,
            },
            offset: vk::Offset3D {
                x: binding.page.offset.x as i32,
                y: binding.page.offset.y as i32,
                z: binding.page.offset.z as i32,
            },
            extent: vk::Extent3D {
                width: binding.page.extent.width,
                height: binding.page.extent.height,
                depth: binding.page.extent.depth,
            },
            memory: binding
                .memory
                .map(|m| m.memory)
                .unwrap_or(vk::DeviceMemory::null()),
            memory_offset: 0,
            flags: vk::SparseMemoryBindFlags::empty(),
        })
        .collect();

    let image_bind = vk::SparseImageMemoryBindInfo::builder()
        .image(texture.image)
        .binds(&binds)
        .build();
    let bind_info = vk::BindSparseInfo::builder()
        .image_binds(std::slice::from_ref(&image_bind))
        .build();

    unsafe {
        device
            .handle()
            .queue_bind_sparse(
                device.queue(QueueKind::Graphics),
                std::slice::from_ref(&bind_info),
                vk::Fence::null(),
            )
            .map_err(|e| GraphicsError::SparseBinding(format!("vkQueueBindSparse failed: {:?}", e)))?;
    }
    Ok(())
}

/// 按页分配设备内存的分配器
///
/// `memory_type_bits` 来自稀疏纹理的内存需求，
/// 在纹理创建后由调用方查询并传入。
pub struct VulkanPageAllocator<'a> {
    device: &'a VulkanDevice,
    memory_type_bits: u32,
}

impl<'a> VulkanPageAllocator<'a> {
    pub fn new(device: &'a VulkanDevice, memory_type_bits: u32) -> Self {
        Self {
            device,
            memory_type_bits,
        }
    }
}

impl<'a> PageAllocator<VulkanBackend> for VulkanPageAllocator<'a> {
    fn allocate(
        &mut self,
        size: u64,
        _alignment: u64,
        usage: MemoryUsage,
    ) -> Result<VulkanPageMemory> {
        let flags = match usage {
            MemoryUsage::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryUsage::GpuToCpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED
            }
        };
        let memory_type = self
            .device
            .find_memory_type(self.memory_type_bits, flags)
            .ok_or_else(|| {
                PolyRenderError::from(GraphicsError::OutOfMemory(
                    "no compatible memory type for page".to_string(),
                ))
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);
        let memory = unsafe {
            self.device
                .handle()
                .allocate_memory(&alloc_info, None)
                .map_err(|e| {
                    GraphicsError::OutOfMemory(format!("page allocation failed: {:?}", e))
                })?
        };
        Ok(VulkanPageMemory { memory, size })
    }

    fn free(&mut self, memory: VulkanPageMemory) {
        unsafe {
            self.device.handle().free_memory(memory.memory, None);
        }
    }
}
