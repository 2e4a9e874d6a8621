//! Vulkan 渲染通道与帧缓冲创建
//!
//! 通道只关心附件的格式 / 采样数 / 装载行为；
//! 帧缓冲才绑定具体的图像视图。

use ash::vk;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::LoadAction;

use super::backend::ResourceTable;
use super::convert;
use super::device::VulkanDevice;

/// 本机渲染通道
pub struct VulkanRenderPass {
    pub raw: vk::RenderPass,
    pub color_count: u32,
    pub has_depth: bool,
}

/// 本机帧缓冲
pub struct VulkanFrameBuffer {
    pub raw: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

fn initial_layout(load: LoadAction, attachment_layout: vk::ImageLayout) -> vk::ImageLayout {
    // 只有 Load 需要保留旧内容，其余情况允许驱动丢弃
    if load == LoadAction::Load {
        attachment_layout
    } else {
        vk::ImageLayout::UNDEFINED
    }
}

/// 按附件形状创建渲染通道
pub fn create_render_pass(device: &VulkanDevice, key: &RenderPassKey) -> Result<VulkanRenderPass> {
    let mut attachments: Vec<vk::AttachmentDescription> = Vec::new();
    let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();

    for color in &key.color {
        color_refs.push(vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(convert::pixel_format(color.format))
                .samples(convert::sample_count(color.sample_count))
                .load_op(convert::load_op(color.load_action))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout(
                    color.load_action,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ))
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }

    let depth_ref = key.depth.map(|depth| {
        let reference = vk::AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(convert::pixel_format(depth.format))
                .samples(convert::sample_count(depth.sample_count))
                .load_op(convert::load_op(depth.depth_load))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(convert::load_op(depth.stencil_load))
                .stencil_store_op(vk::AttachmentStoreOp::STORE)
                .initial_layout(initial_layout(
                    depth.depth_load,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ))
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
        reference
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(ref depth_ref) = depth_ref {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass.build()];

    let pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);

    let raw = unsafe {
        device.handle().create_render_pass(&pass_info, None).map_err(|e| {
            GraphicsError::ResourceCreation(format!("vkCreateRenderPass failed: {:?}", e))
        })?
    };

    Ok(VulkanRenderPass {
        raw,
        color_count: key.color.len() as u32,
        has_depth: key.depth.is_some(),
    })
}

/// 按具体附件创建帧缓冲
pub fn create_frame_buffer(
    device: &VulkanDevice,
    resources: &ResourceTable,
    pass: &VulkanRenderPass,
    desc: &FrameBufferDesc,
) -> Result<VulkanFrameBuffer> {
    let mut views: Vec<vk::ImageView> = Vec::with_capacity(desc.color.len() + 1);
    for view in desc.color.iter().chain(desc.depth.iter()) {
        let texture = resources.texture(view.texture)?;
        let image_view = if view.mip == 0 {
            texture.view
        } else {
            *texture.mip_views.get(view.mip as usize).ok_or_else(|| {
                GraphicsError::ResourceCreation(format!(
                    "texture {:?} has no render view for mip {}",
                    view.texture, view.mip
                ))
            })?
        };
        views.push(image_view);
    }

    let fb_info = vk::FramebufferCreateInfo::builder()
        .render_pass(pass.raw)
        .attachments(&views)
        .width(desc.extent.width)
        .height(desc.extent.height)
        .layers(1);

    let raw = unsafe {
        device.handle().create_framebuffer(&fb_info, None).map_err(|e| {
            GraphicsError::ResourceCreation(format!("vkCreateFramebuffer failed: {:?}", e))
        })?
    };

    Ok(VulkanFrameBuffer {
        raw,
        extent: vk::Extent2D {
            width: desc.extent.width,
            height: desc.extent.height,
        },
    })
}

/// 开启通道（清空值按 颜色附件在前、深度在后 排列）
pub fn begin_pass(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    pass: &VulkanRenderPass,
    frame_buffer: &VulkanFrameBuffer,
    load: &LoadActions,
) {
    let mut clear_values: Vec<vk::ClearValue> = Vec::new();
    for i in 0..pass.color_count as usize {
        let clear = load.color.get(i).map(|c| c.clear).unwrap_or([0.0; 4]);
        clear_values.push(vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        });
    }
    if pass.has_depth {
        clear_values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: load.clear_depth,
                stencil: load.clear_stencil,
            },
        });
    }

    let begin_info = vk::RenderPassBeginInfo::builder()
        .render_pass(pass.raw)
        .framebuffer(frame_buffer.raw)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: frame_buffer.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device
            .handle()
            .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
    }
}

/// 结束通道
pub fn end_pass(device: &VulkanDevice, cmd: vk::CommandBuffer) {
    unsafe {
        device.handle().cmd_end_render_pass(cmd);
    }
}
