//! DirectX 12 稀疏（tiled）纹理支撑
//!
//! 页内存来自逐页的小堆，上传走 committed 上传缓冲 +
//! `CopyTextureRegion`，绑定变更经 `UpdateTileMappings` 提交：
//! 解绑可以全部合成一次 NULL 映射调用，绑定按 API 要求逐堆一次。

use std::mem::ManuallyDrop;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::backend_trait::{MemoryUsage, PageAllocator, PageBinding};
use crate::renderer::resource::{QueueKind, TextureId};
use crate::renderer::virtual_texture::VirtualTexturePage;

use super::backend::{Dx12Backend, ResourceTable};
use super::device::Dx12Device;

/// 一页 tiled 纹理的堆内存
#[derive(Debug)]
pub struct Dx12PageMemory {
    pub heap: ID3D12Heap,
    pub size: u64,
}

/// 瞬态上传缓冲
#[derive(Debug)]
pub struct Dx12StagingBuffer {
    pub resource: ID3D12Resource,
    pub size: u64,
}

/// 创建并填充上传缓冲
pub fn create_staging(device: &Dx12Device, data: &[u8]) -> Result<Dx12StagingBuffer> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_UPLOAD,
        ..Default::default()
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Width: data.len() as u64,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        ..Default::default()
    };

    unsafe {
        let mut resource: Option<ID3D12Resource> = None;
        device
            .handle()
            .CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("staging buffer creation failed: {:?}", e))
            })?;
        let resource = resource.ok_or_else(|| {
            GraphicsError::ResourceCreation("CreateCommittedResource returned nothing".into())
        })?;

        let mut mapped = std::ptr::null_mut();
        resource.Map(0, None, Some(&mut mapped)).map_err(|e| {
            GraphicsError::ResourceCreation(format!("staging buffer map failed: {:?}", e))
        })?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped as *mut u8, data.len());
        resource.Unmap(0, None);

        Ok(Dx12StagingBuffer {
            resource,
            size: data.len() as u64,
        })
    }
}

/// 录制 "上传缓冲 -> tiled 纹理页" 的拷贝
pub fn copy_to_page(
    resources: &ResourceTable,
    cmd: &ID3D12GraphicsCommandList,
    staging: &Dx12StagingBuffer,
    texture_id: TextureId,
    page: &VirtualTexturePage,
) -> Result<()> {
    let texture = resources.texture(texture_id)?;

    let dst = D3D12_TEXTURE_COPY_LOCATION {
        pResource: ManuallyDrop::new(Some(texture.resource.clone())),
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: page.mip_level,
        },
    };
    let src = D3D12_TEXTURE_COPY_LOCATION {
        pResource: ManuallyDrop::new(Some(staging.resource.clone())),
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: 0,
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    Format: texture.dxgi_format,
                    Width: page.extent.width,
                    Height: page.extent.height,
                    Depth: page.extent.depth,
                    RowPitch: page.extent.width * texture.bytes_per_pixel,
                },
            },
        },
    };

    unsafe {
        cmd.CopyTextureRegion(
            &dst,
            page.offset.x,
            page.offset.y,
            page.offset.z,
            &src,
            None,
        );
    }
    Ok(())
}

/// 提交整批页绑定变更
pub fn bind_pages(
    device: &Dx12Device,
    resources: &ResourceTable,
    texture_id: TextureId,
    bindings: &[PageBinding<'_, Dx12Backend>],
) -> Result<()> {
    if bindings.is_empty() {
        return Ok(());
    }
    let texture = resources.texture(texture_id)?;
    let queue = device.queue(QueueKind::Graphics);

    // 边缘页的 extent 被裁剪过，tile 坐标一律按纹理的 tile 形状换算
    let tile_coord = |page: &VirtualTexturePage| D3D12_TILED_RESOURCE_COORDINATE {
        X: page.offset.x / texture.tile_width.max(1),
        Y: page.offset.y / texture.tile_height.max(1),
        Z: page.offset.z / texture.tile_depth.max(1),
        Subresource: page.mip_level,
    };

    // 解绑合成一次 NULL 映射调用
    let unbind_coords: Vec<D3D12_TILED_RESOURCE_COORDINATE> = bindings
        .iter()
        .filter(|b| b.memory.is_none())
        .map(|b| tile_coord(b.page))
        .collect();
    if !unbind_coords.is_empty() {
        let flags = vec![D3D12_TILE_RANGE_FLAG_NULL; unbind_coords.len()];
        let counts = vec![1u32; unbind_coords.len()];
        unsafe {
            queue.UpdateTileMappings(
                &texture.resource,
                unbind_coords.len() as u32,
                Some(unbind_coords.as_ptr()),
                None,
                None::<&ID3D12Heap>,
                flags.len() as u32,
                Some(flags.as_ptr()),
                None,
                Some(counts.as_ptr()),
                D3D12_TILE_MAPPING_FLAG_NONE,
            );
        }
    }

    // 绑定按堆提交（每页一个堆）
    for binding in bindings.iter().filter(|b| b.memory.is_some()) {
        let memory = binding.memory.unwrap();
        let coord = tile_coord(binding.page);
        let flags = [D3D12_TILE_RANGE_FLAG_NONE];
        let offsets = [0u32];
        let counts = [1u32];
        unsafe {
            queue.UpdateTileMappings(
                &texture.resource,
                1,
                Some(&coord),
                None,
                &memory.heap,
                1,
                Some(flags.as_ptr()),
                Some(offsets.as_ptr()),
                Some(counts.as_ptr()),
                D3D12_TILE_MAPPING_FLAG_NONE,
            );
        }
    }
    Ok(())
}

/// 逐页建堆的分配器
pub struct Dx12PageAllocator<'a> {
    device: &'a Dx12Device,
}

impl<'a> Dx12PageAllocator<'a> {
    pub fn new(device: &'a Dx12Device) -> Self {
        Self { device }
    }
}

impl<'a> PageAllocator<Dx12Backend> for Dx12PageAllocator<'a> {
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        _usage: MemoryUsage,
    ) -> Result<Dx12PageMemory> {
        let desc = D3D12_HEAP_DESC {
            SizeInBytes: size.max(D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64),
            Properties: D3D12_HEAP_PROPERTIES {
                Type: D3D12_HEAP_TYPE_DEFAULT,
                ..Default::default()
            },
            Alignment: alignment.max(D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64),
            Flags: D3D12_HEAP_FLAG_ALLOW_ONLY_NON_RT_DS_TEXTURES,
        };

        unsafe {
            let mut heap: Option<ID3D12Heap> = None;
            self.device
                .handle()
                .CreateHeap(&desc, &mut heap)
                .map_err(|e| {
                    GraphicsError::OutOfMemory(format!("page heap creation failed: {:?}", e))
                })?;
            let heap = heap.ok_or_else(|| {
                GraphicsError::OutOfMemory("CreateHeap returned nothing".to_string())
            })?;
            Ok(Dx12PageMemory { heap, size })
        }
    }

    fn free(&mut self, memory: Dx12PageMemory) {
        // COM 引用计数负责实际释放
        drop(memory);
    }
}
