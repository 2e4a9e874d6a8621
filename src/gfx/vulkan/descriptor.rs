//! Vulkan 描述符实现
//!
//! 根签名 -> 描述符集布局 / 管线布局 / 更新模板；
//! 描述符存储块 -> `VkDescriptorPool`（固定比例尺寸，耗尽由上层补块）；
//! 槽位写入 -> 影子数组齐全时走预建模板一次写整集，
//! 否则退化为逐条 `vkUpdateDescriptorSets`。

use ash::vk;
use std::mem::size_of;

use crate::core::error::{GraphicsError, PolyRenderError, Result};
use crate::renderer::descriptor::{BoundResource, DescriptorWrite};
use crate::renderer::root_signature::RootLayout;
use crate::renderer::shader::{DescriptorKind, UpdateFrequency, UPDATE_FREQUENCY_COUNT};

use super::backend::ResourceTable;
use super::convert;
use super::device::VulkanDevice;

/// 本机根签名对象
pub struct VulkanSignature {
    pub set_layouts: [vk::DescriptorSetLayout; UPDATE_FREQUENCY_COUNT],
    pub pipeline_layout: vk::PipelineLayout,
    pub templates: [Option<vk::DescriptorUpdateTemplate>; UPDATE_FREQUENCY_COUNT],
}

/// 描述符存储块：一个固定比例的 `VkDescriptorPool`
pub struct VulkanDescriptorBlock {
    pub pool: vk::DescriptorPool,
    pub remaining_sets: u32,
}

/// 每个描述符集摊到的各类描述符配额
///
/// 块按 `capacity_sets * 配额` 预留存储。
const POOL_RATIOS: [(vk::DescriptorType, u32); 5] = [
    (vk::DescriptorType::UNIFORM_BUFFER, 2),
    (vk::DescriptorType::STORAGE_BUFFER, 2),
    (vk::DescriptorType::SAMPLED_IMAGE, 4),
    (vk::DescriptorType::STORAGE_IMAGE, 1),
    (vk::DescriptorType::SAMPLER, 2),
];

/// 由合并布局创建本机根签名
pub fn create_signature(device: &VulkanDevice, layout: &RootLayout) -> Result<VulkanSignature> {
    let raw = device.handle();
    let mut set_layouts = [vk::DescriptorSetLayout::null(); UPDATE_FREQUENCY_COUNT];
    let mut templates: [Option<vk::DescriptorUpdateTemplate>; UPDATE_FREQUENCY_COUNT] =
        [None, None, None, None];

    unsafe {
        for set_index in 0..UPDATE_FREQUENCY_COUNT {
            let frequency = UpdateFrequency::from_set_index(set_index).unwrap();
            let set_layout = layout.set_layout(frequency);

            let bindings: Vec<vk::DescriptorSetLayoutBinding> = set_layout
                .descriptor_indices
                .iter()
                .map(|&i| {
                    let info = layout.descriptor_by_index(i);
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(info.resource.binding)
                        .descriptor_type(convert::descriptor_type(info.resource.kind))
                        .descriptor_count(info.resource.array_size)
                        .stage_flags(convert::shader_stages(info.resource.stages))
                        .build()
                })
                .collect();

            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            set_layouts[set_index] =
                raw.create_descriptor_set_layout(&layout_info, None).map_err(|e| {
                    GraphicsError::ResourceCreation(format!(
                        "vkCreateDescriptorSetLayout failed: {:?}",
                        e
                    ))
                })?;

            // 非空桶预建更新模板：条目偏移指向影子数组序里的
            // [图像句柄区][缓冲句柄区] 打包布局
            if !set_layout.is_empty() {
                let entries: Vec<vk::DescriptorUpdateTemplateEntry> = set_layout
                    .descriptor_indices
                    .iter()
                    .map(|&i| {
                        let info = layout.descriptor_by_index(i);
                        let (offset, stride) = template_entry_offset(
                            info.resource.kind,
                            info.flat_base,
                            set_layout.image_handles,
                        );
                        vk::DescriptorUpdateTemplateEntry::builder()
                            .dst_binding(info.resource.binding)
                            .dst_array_element(0)
                            .descriptor_count(info.resource.array_size)
                            .descriptor_type(convert::descriptor_type(info.resource.kind))
                            .offset(offset)
                            .stride(stride)
                            .build()
                    })
                    .collect();

                let template_info = vk::DescriptorUpdateTemplateCreateInfo::builder()
                    .descriptor_update_entries(&entries)
                    .template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET)
                    .descriptor_set_layout(set_layouts[set_index]);
                let template = raw
                    .create_descriptor_update_template(&template_info, None)
                    .map_err(|e| {
                        GraphicsError::ResourceCreation(format!(
                            "vkCreateDescriptorUpdateTemplate failed: {:?}",
                            e
                        ))
                    })?;
                templates[set_index] = Some(template);
            }
        }

        let push_constant_ranges: Vec<vk::PushConstantRange> = layout
            .root_constants()
            .iter()
            .map(|rc| {
                vk::PushConstantRange::builder()
                    .stage_flags(convert::shader_stages(rc.stages))
                    .offset(rc.offset_bytes)
                    .size(rc.size_bytes)
                    .build()
            })
            .collect();

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = raw
            .create_pipeline_layout(&pipeline_layout_info, None)
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("vkCreatePipelineLayout failed: {:?}", e))
            })?;

        Ok(VulkanSignature {
            set_layouts,
            pipeline_layout,
            templates,
        })
    }
}

/// 模板条目在打包数据里的偏移与步长
fn template_entry_offset(kind: DescriptorKind, flat_base: u32, image_handles: u32) -> (usize, usize) {
    let image_stride = size_of::<vk::DescriptorImageInfo>();
    let buffer_stride = size_of::<vk::DescriptorBufferInfo>();
    if kind.is_buffer_like() {
        let local = flat_base - image_handles;
        (
            image_handles as usize * image_stride + local as usize * buffer_stride,
            buffer_stride,
        )
    } else {
        (flat_base as usize * image_stride, image_stride)
    }
}

/// 分配一个描述符存储块
pub fn create_block(device: &VulkanDevice, capacity_sets: u32) -> Result<VulkanDescriptorBlock> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = POOL_RATIOS
        .iter()
        .map(|&(ty, per_set)| vk::DescriptorPoolSize {
            ty,
            descriptor_count: per_set * capacity_sets,
        })
        .collect();

    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(capacity_sets)
        .pool_sizes(&pool_sizes);

    let pool = unsafe {
        device
            .handle()
            .create_descriptor_pool(&pool_info, None)
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("vkCreateDescriptorPool failed: {:?}", e))
            })?
    };

    Ok(VulkanDescriptorBlock {
        pool,
        remaining_sets: capacity_sets,
    })
}

/// 从块中取出描述符集
pub fn allocate_slots(
    device: &VulkanDevice,
    block: &mut VulkanDescriptorBlock,
    signature: &VulkanSignature,
    frequency: UpdateFrequency,
    count: u32,
) -> Result<Vec<vk::DescriptorSet>> {
    if block.remaining_sets < count {
        return Err(PolyRenderError::Runtime(format!(
            "descriptor block exhausted ({} left, {} requested)",
            block.remaining_sets, count
        )));
    }

    let layouts = vec![signature.set_layouts[frequency.set_index()]; count as usize];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(block.pool)
        .set_layouts(&layouts);

    let sets = unsafe {
        device.handle().allocate_descriptor_sets(&alloc_info).map_err(|e| {
            PolyRenderError::Runtime(format!("vkAllocateDescriptorSets failed: {:?}", e))
        })?
    };
    block.remaining_sets -= count;
    Ok(sets)
}

/// 把槽位内容写入本机描述符
///
/// 影子数组所有条目都有值时走模板路径一次写整集；
/// 还有空洞时只写本次变化的条目。
pub fn write_slot(
    device: &VulkanDevice,
    resources: &ResourceTable,
    signature: &VulkanSignature,
    layout: &RootLayout,
    frequency: UpdateFrequency,
    slot: vk::DescriptorSet,
    bindings: &[Option<BoundResource>],
    changed: &[DescriptorWrite],
) -> Result<()> {
    let template = signature.templates[frequency.set_index()];

    let fully_populated = bindings.iter().all(|b| b.is_some());
    if fully_populated {
        if let Some(template) = template {
            let data = pack_template_data(resources, layout, frequency, bindings)?;
            unsafe {
                device.handle().update_descriptor_set_with_template(
                    slot,
                    template,
                    data.as_ptr() as *const std::ffi::c_void,
                );
            }
            return Ok(());
        }
    }

    // 部分更新：先解析所有句柄信息，再构造写入描述，
    // 保证写入描述引用的指针不因 Vec 扩容而失效
    enum Resolved {
        Image(usize),
        Buffer(usize),
    }
    let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::with_capacity(changed.len());
    let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::with_capacity(changed.len());
    let mut resolved: Vec<Resolved> = Vec::with_capacity(changed.len());

    for write in changed {
        let info = layout.descriptor_by_index(write.descriptor_index);
        match write.resource {
            BoundResource::Buffer { .. } => {
                buffer_infos.push(resolve_buffer(resources, write.resource)?);
                resolved.push(Resolved::Buffer(buffer_infos.len() - 1));
            }
            BoundResource::Texture { .. } | BoundResource::Sampler { .. } => {
                image_infos.push(resolve_image(resources, write.resource, info.resource.kind)?);
                resolved.push(Resolved::Image(image_infos.len() - 1));
            }
        }
    }

    let writes: Vec<vk::WriteDescriptorSet> = changed
        .iter()
        .zip(resolved.iter())
        .map(|(write, r)| {
            let info = layout.descriptor_by_index(write.descriptor_index);
            let builder = vk::WriteDescriptorSet::builder()
                .dst_set(slot)
                .dst_binding(info.resource.binding)
                .dst_array_element(write.flat_index - info.flat_base)
                .descriptor_type(convert::descriptor_type(info.resource.kind));
            match *r {
                Resolved::Buffer(i) => builder
                    .buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    .build(),
                Resolved::Image(i) => builder
                    .image_info(std::slice::from_ref(&image_infos[i]))
                    .build(),
            }
        })
        .collect();

    unsafe {
        device.handle().update_descriptor_sets(&writes, &[]);
    }
    Ok(())
}

/// 把整个影子数组打包成模板数据
fn pack_template_data(
    resources: &ResourceTable,
    layout: &RootLayout,
    frequency: UpdateFrequency,
    bindings: &[Option<BoundResource>],
) -> Result<Vec<u8>> {
    let set_layout = layout.set_layout(frequency);
    let image_stride = size_of::<vk::DescriptorImageInfo>();
    let buffer_stride = size_of::<vk::DescriptorBufferInfo>();
    let total = set_layout.image_handles as usize * image_stride
        + set_layout.buffer_handles as usize * buffer_stride;
    let mut data = vec![0u8; total];

    for &desc_index in &set_layout.descriptor_indices {
        let info = layout.descriptor_by_index(desc_index);
        for element in 0..info.resource.array_size {
            let flat = (info.flat_base + element) as usize;
            let resource = bindings[flat].ok_or_else(|| {
                PolyRenderError::Runtime("template pack on incomplete shadow array".into())
            })?;
            let (offset, _) = template_entry_offset(
                info.resource.kind,
                info.flat_base + element,
                set_layout.image_handles,
            );
            unsafe {
                let dst = data.as_mut_ptr().add(offset);
                if info.resource.kind.is_buffer_like() {
                    let value = resolve_buffer(resources, resource)?;
                    std::ptr::write_unaligned(dst as *mut vk::DescriptorBufferInfo, value);
                } else {
                    let value = resolve_image(resources, resource, info.resource.kind)?;
                    std::ptr::write_unaligned(dst as *mut vk::DescriptorImageInfo, value);
                }
            }
        }
    }
    Ok(data)
}

fn resolve_buffer(
    resources: &ResourceTable,
    resource: BoundResource,
) -> Result<vk::DescriptorBufferInfo> {
    match resource {
        BoundResource::Buffer { id, offset, range } => {
            let buffer = resources.buffer(id)?;
            let range = if range == u64::MAX {
                vk::WHOLE_SIZE
            } else {
                range
            };
            Ok(vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset,
                range,
            })
        }
        other => Err(PolyRenderError::Runtime(format!(
            "expected buffer resource, got {}",
            other.kind_name()
        ))),
    }
}

fn resolve_image(
    resources: &ResourceTable,
    resource: BoundResource,
    kind: DescriptorKind,
) -> Result<vk::DescriptorImageInfo> {
    match resource {
        BoundResource::Texture { id, mip } => {
            let texture = resources.texture(id)?;
            let view = match mip {
                None => texture.view,
                Some(mip) => *texture.mip_views.get(mip as usize).ok_or_else(|| {
                    PolyRenderError::Runtime(format!(
                        "texture {:?} has no per-mip view for mip {}",
                        id, mip
                    ))
                })?,
            };
            let image_layout = if kind == DescriptorKind::StorageImage {
                vk::ImageLayout::GENERAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            Ok(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout,
            })
        }
        BoundResource::Sampler { id } => Ok(vk::DescriptorImageInfo {
            sampler: resources.sampler(id)?,
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
        }),
        other => Err(PolyRenderError::Runtime(format!(
            "expected image resource, got {}",
            other.kind_name()
        ))),
    }
}

/// 销毁本机根签名对象
pub fn destroy_signature(device: &VulkanDevice, signature: &VulkanSignature) {
    let raw = device.handle();
    unsafe {
        for template in signature.templates.iter().flatten() {
            raw.destroy_descriptor_update_template(*template, None);
        }
        for set_layout in signature.set_layouts {
            raw.destroy_descriptor_set_layout(set_layout, None);
        }
        raw.destroy_pipeline_layout(signature.pipeline_layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_offsets_pack_images_then_buffers() {
        let image_stride = size_of::<vk::DescriptorImageInfo>();
        let buffer_stride = size_of::<vk::DescriptorBufferInfo>();

        // 两个图像句柄之后的第一个缓冲句柄
        let (offset, stride) = template_entry_offset(DescriptorKind::UniformBuffer, 2, 2);
        assert_eq!(offset, 2 * image_stride);
        assert_eq!(stride, buffer_stride);

        let (offset, stride) = template_entry_offset(DescriptorKind::SampledImage, 1, 2);
        assert_eq!(offset, image_stride);
        assert_eq!(stride, image_stride);
    }
}
