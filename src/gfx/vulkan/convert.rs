//! Vulkan 枚举翻译表
//!
//! 后端无关的状态 / 格式 / 枚举到 Vulkan 原生值的纯映射，
//! 不涉及任何设备调用。

use ash::vk;

use crate::renderer::resource::{
    LoadAction, PixelFormat, QueueKind, ResourceState, SampleCount,
};
use crate::renderer::shader::{DescriptorKind, ShaderStageFlags};

/// 资源状态 -> 访问掩码
pub fn access_flags(state: ResourceState) -> vk::AccessFlags {
    let mut ret = vk::AccessFlags::empty();
    if state.contains(ResourceState::COPY_SOURCE) {
        ret |= vk::AccessFlags::TRANSFER_READ;
    }
    if state.contains(ResourceState::COPY_DEST) {
        ret |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if state.contains(ResourceState::VERTEX_AND_CONSTANT_BUFFER) {
        ret |= vk::AccessFlags::UNIFORM_READ | vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        ret |= vk::AccessFlags::INDEX_READ;
    }
    if state.contains(ResourceState::UNORDERED_ACCESS) {
        ret |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        ret |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if state.contains(ResourceState::RENDER_TARGET) {
        ret |= vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        ret |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceState::DEPTH_READ) {
        ret |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if state.intersects(ResourceState::SHADER_RESOURCE) {
        ret |= vk::AccessFlags::SHADER_READ;
    }
    if state.contains(ResourceState::PRESENT) {
        ret |= vk::AccessFlags::MEMORY_READ;
    }
    ret
}

/// 资源状态 -> 图像布局
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    if state.contains(ResourceState::COPY_SOURCE) {
        return vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    }
    if state.contains(ResourceState::COPY_DEST) {
        return vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    }
    if state.contains(ResourceState::RENDER_TARGET) {
        return vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        return vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
    }
    if state.contains(ResourceState::DEPTH_READ) {
        return vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
    }
    if state.contains(ResourceState::UNORDERED_ACCESS) {
        return vk::ImageLayout::GENERAL;
    }
    if state.intersects(ResourceState::SHADER_RESOURCE) {
        return vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    }
    if state.contains(ResourceState::PRESENT) {
        return vk::ImageLayout::PRESENT_SRC_KHR;
    }
    if state == ResourceState::COMMON {
        return vk::ImageLayout::GENERAL;
    }
    vk::ImageLayout::UNDEFINED
}

/// 访问掩码 + 发出队列的能力 -> 管线阶段
///
/// 同步范围不能只看访问掩码：同一个 SHADER_READ 在图形队列上
/// 要覆盖顶点 / 片段 / 计算着色器，在计算队列上只覆盖计算着色器，
/// 在传输队列上整条管线只有一个阶段。
pub fn pipeline_stages(access: vk::AccessFlags, queue: QueueKind) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();

    match queue {
        QueueKind::Graphics => {
            if access
                .intersects(vk::AccessFlags::INDEX_READ | vk::AccessFlags::VERTEX_ATTRIBUTE_READ)
            {
                flags |= vk::PipelineStageFlags::VERTEX_INPUT;
            }
            if access.intersects(
                vk::AccessFlags::UNIFORM_READ
                    | vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE,
            ) {
                flags |= vk::PipelineStageFlags::VERTEX_SHADER
                    | vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COMPUTE_SHADER;
            }
            if access.intersects(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ) {
                flags |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
            }
            if access.intersects(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ) {
                flags |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            }
        }
        QueueKind::Compute => {
            // 计算队列遇到图形专属的访问掩码时退回全阶段
            if access.intersects(
                vk::AccessFlags::INDEX_READ
                    | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ) {
                return vk::PipelineStageFlags::ALL_COMMANDS;
            }
            if access.intersects(
                vk::AccessFlags::UNIFORM_READ
                    | vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE,
            ) {
                flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
            }
        }
        QueueKind::Transfer => {
            return vk::PipelineStageFlags::ALL_COMMANDS;
        }
    }

    if access.contains(vk::AccessFlags::INDIRECT_COMMAND_READ) {
        flags |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if access.intersects(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if access.intersects(vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE) {
        flags |= vk::PipelineStageFlags::HOST;
    }
    if flags.is_empty() {
        flags = vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    flags
}

/// 像素格式 -> Vulkan 格式
pub fn pixel_format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        PixelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        PixelFormat::R32Float => vk::Format::R32_SFLOAT,
        PixelFormat::R32Uint => vk::Format::R32_UINT,
        PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        PixelFormat::D16Unorm => vk::Format::D16_UNORM,
        PixelFormat::D24UnormS8 => vk::Format::D24_UNORM_S8_UINT,
        PixelFormat::D32Float => vk::Format::D32_SFLOAT,
        PixelFormat::D32FloatS8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// 格式的图像切面掩码
pub fn aspect_mask(format: PixelFormat) -> vk::ImageAspectFlags {
    if !format.is_depth() {
        return vk::ImageAspectFlags::COLOR;
    }
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// 描述符种类 -> Vulkan 描述符类型
///
/// 根常量不经过描述符，调用方不应传入。
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::RootConstant => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

/// 装载行为 -> 附件装载操作
pub fn load_op(action: LoadAction) -> vk::AttachmentLoadOp {
    match action {
        LoadAction::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        LoadAction::Load => vk::AttachmentLoadOp::LOAD,
        LoadAction::Clear => vk::AttachmentLoadOp::CLEAR,
    }
}

/// 采样数 -> Vulkan 采样标志
pub fn sample_count(count: SampleCount) -> vk::SampleCountFlags {
    match count {
        SampleCount::X1 => vk::SampleCountFlags::TYPE_1,
        SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
        SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
        SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
        SampleCount::X16 => vk::SampleCountFlags::TYPE_16,
    }
}

/// 着色器阶段掩码 -> Vulkan 阶段标志
pub fn shader_stages(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut ret = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        ret |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::TESSELLATION_CONTROL) {
        ret |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stages.contains(ShaderStageFlags::TESSELLATION_EVALUATION) {
        ret |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if stages.contains(ShaderStageFlags::GEOMETRY) {
        ret |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        ret |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        ret |= vk::ShaderStageFlags::COMPUTE;
    }
    ret
}

/// 格式特性 -> 能力位三元组（采样 / 存储写 / 渲染目标）
pub fn format_capability_bits(
    features: vk::FormatFeatureFlags,
    is_depth: bool,
) -> (bool, bool, bool) {
    let read = features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE);
    let write = features.contains(vk::FormatFeatureFlags::STORAGE_IMAGE);
    let render = if is_depth {
        features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    } else {
        features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT)
    };
    (read, write, render)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_flags_translation() {
        let access = access_flags(ResourceState::SHADER_RESOURCE);
        assert_eq!(access, vk::AccessFlags::SHADER_READ);

        let access = access_flags(ResourceState::RENDER_TARGET);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));

        // UAV 的访问掩码同时含读写——写后写屏障依赖这一点
        let access = access_flags(ResourceState::UNORDERED_ACCESS);
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
        assert!(access.contains(vk::AccessFlags::SHADER_READ));

        assert_eq!(access_flags(ResourceState::UNDEFINED), vk::AccessFlags::empty());
    }

    #[test]
    fn test_image_layout_translation() {
        assert_eq!(
            image_layout(ResourceState::SHADER_RESOURCE),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            image_layout(ResourceState::UNORDERED_ACCESS),
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            image_layout(ResourceState::COPY_DEST),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(image_layout(ResourceState::UNDEFINED), vk::ImageLayout::UNDEFINED);
        // 拷贝优先于着色器读（复合状态）
        assert_eq!(
            image_layout(ResourceState::COPY_SOURCE | ResourceState::SHADER_RESOURCE),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }

    #[test]
    fn test_pipeline_stages_depend_on_queue() {
        let access = vk::AccessFlags::SHADER_READ;

        let graphics = pipeline_stages(access, QueueKind::Graphics);
        assert!(graphics.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(graphics.contains(vk::PipelineStageFlags::VERTEX_SHADER));

        let compute = pipeline_stages(access, QueueKind::Compute);
        assert_eq!(compute, vk::PipelineStageFlags::COMPUTE_SHADER);

        let transfer = pipeline_stages(access, QueueKind::Transfer);
        assert_eq!(transfer, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_pipeline_stages_compute_falls_back_on_graphics_access() {
        let stages = pipeline_stages(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            QueueKind::Compute,
        );
        assert_eq!(stages, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_empty_access_maps_to_top_of_pipe() {
        let stages = pipeline_stages(vk::AccessFlags::empty(), QueueKind::Graphics);
        assert_eq!(stages, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn test_aspect_mask() {
        assert_eq!(aspect_mask(PixelFormat::Rgba8Unorm), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_mask(PixelFormat::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(PixelFormat::D24UnormS8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_format_capability_bits() {
        let features = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        assert_eq!(format_capability_bits(features, false), (true, false, true));

        let depth_features = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(format_capability_bits(depth_features, true), (true, false, true));
        // 深度格式不把颜色附件位当作可渲染
        assert_eq!(format_capability_bits(features, true), (true, false, false));
    }
}
