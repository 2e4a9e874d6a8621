//! Vulkan 屏障翻译
//!
//! 把一批后端无关的屏障请求翻译成一次 `vkCmdPipelineBarrier`：
//! 逐条生成缓冲 / 图像内存屏障，管线阶段取整批访问掩码的并集。

use ash::vk;
use tracing::warn;

use crate::renderer::barrier::{BarrierResource, OwnershipTransfer, ResourceBarrier};
use crate::renderer::resource::QueueKind;

use super::backend::ResourceTable;
use super::convert;
use super::device::VulkanDevice;

/// 录制一批屏障
///
/// 所有权转移（acquire / release）把 src / dst 队列族填成
/// 具体序号而不是 IGNORED；未登记的资源跳过并告警，
/// 不影响批次里的其他屏障。
pub fn record(
    device: &VulkanDevice,
    resources: &ResourceTable,
    cmd: vk::CommandBuffer,
    queue: QueueKind,
    barriers: &[ResourceBarrier],
) {
    let mut buffer_barriers: Vec<vk::BufferMemoryBarrier> = Vec::new();
    let mut image_barriers: Vec<vk::ImageMemoryBarrier> = Vec::new();
    let mut src_stages = vk::PipelineStageFlags::empty();
    let mut dst_stages = vk::PipelineStageFlags::empty();

    for barrier in barriers {
        let src_access = convert::access_flags(barrier.src_state);
        let dst_access = convert::access_flags(barrier.dst_state);

        let (src_family, dst_family) = match barrier.transfer {
            OwnershipTransfer::None => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            OwnershipTransfer::Acquire { from } => (
                device.queue_family_index(from),
                device.queue_family_index(queue),
            ),
            OwnershipTransfer::Release { to } => (
                device.queue_family_index(queue),
                device.queue_family_index(to),
            ),
        };

        match barrier.resource {
            BarrierResource::Buffer(id) => {
                let buffer = match resources.buffer(id) {
                    Ok(buffer) => buffer,
                    Err(_) => {
                        warn!(
                            target: "polyrender::vulkan",
                            buffer = ?id,
                            "Barrier on unregistered buffer skipped"
                        );
                        continue;
                    }
                };
                buffer_barriers.push(
                    vk::BufferMemoryBarrier::builder()
                        .buffer(buffer.buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .build(),
                );
            }
            BarrierResource::Texture(id) => {
                let texture = match resources.texture(id) {
                    Ok(texture) => texture,
                    Err(_) => {
                        warn!(
                            target: "polyrender::vulkan",
                            texture = ?id,
                            "Barrier on unregistered texture skipped"
                        );
                        continue;
                    }
                };
                let range = match barrier.subresource {
                    Some(range) => vk::ImageSubresourceRange {
                        aspect_mask: texture.aspect,
                        base_mip_level: range.base_mip,
                        level_count: range.mip_count,
                        base_array_layer: range.base_layer,
                        layer_count: range.layer_count,
                    },
                    None => vk::ImageSubresourceRange {
                        aspect_mask: texture.aspect,
                        base_mip_level: 0,
                        level_count: texture.mip_count,
                        base_array_layer: 0,
                        layer_count: texture.layer_count,
                    },
                };
                image_barriers.push(
                    vk::ImageMemoryBarrier::builder()
                        .image(texture.image)
                        .subresource_range(range)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .old_layout(convert::image_layout(barrier.src_state))
                        .new_layout(convert::image_layout(barrier.dst_state))
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .build(),
                );
            }
        }

        src_stages |= convert::pipeline_stages(src_access, queue);
        dst_stages |= convert::pipeline_stages(dst_access, queue);
    }

    if buffer_barriers.is_empty() && image_barriers.is_empty() {
        return;
    }

    unsafe {
        device.handle().cmd_pipeline_barrier(
            cmd,
            src_stages,
            dst_stages,
            vk::DependencyFlags::empty(),
            &[],
            &buffer_barriers,
            &image_barriers,
        );
    }
}
