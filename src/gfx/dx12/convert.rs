//! DirectX 12 枚举翻译表

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::renderer::resource::{PixelFormat, ResourceState};
use crate::renderer::shader::{DescriptorKind, ShaderStageFlags};

/// 资源状态 -> D3D12 资源状态
pub fn resource_states(state: ResourceState) -> D3D12_RESOURCE_STATES {
    if state == ResourceState::COMMON || state == ResourceState::UNDEFINED {
        return D3D12_RESOURCE_STATE_COMMON;
    }
    if state == ResourceState::GENERIC_READ {
        return D3D12_RESOURCE_STATE_GENERIC_READ;
    }
    if state == ResourceState::PRESENT {
        return D3D12_RESOURCE_STATE_PRESENT;
    }

    let mut ret = D3D12_RESOURCE_STATE_COMMON;
    if state.contains(ResourceState::VERTEX_AND_CONSTANT_BUFFER) {
        ret |= D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        ret |= D3D12_RESOURCE_STATE_INDEX_BUFFER;
    }
    if state.contains(ResourceState::RENDER_TARGET) {
        ret |= D3D12_RESOURCE_STATE_RENDER_TARGET;
    }
    if state.contains(ResourceState::UNORDERED_ACCESS) {
        ret |= D3D12_RESOURCE_STATE_UNORDERED_ACCESS;
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        ret |= D3D12_RESOURCE_STATE_DEPTH_WRITE;
    }
    if state.contains(ResourceState::DEPTH_READ) {
        ret |= D3D12_RESOURCE_STATE_DEPTH_READ;
    }
    if state.contains(ResourceState::NON_PIXEL_SHADER_RESOURCE) {
        ret |= D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE;
    }
    if state.contains(ResourceState::PIXEL_SHADER_RESOURCE) {
        ret |= D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE;
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        ret |= D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT;
    }
    if state.contains(ResourceState::COPY_DEST) {
        ret |= D3D12_RESOURCE_STATE_COPY_DEST;
    }
    if state.contains(ResourceState::COPY_SOURCE) {
        ret |= D3D12_RESOURCE_STATE_COPY_SOURCE;
    }
    ret
}

/// 像素格式 -> DXGI 格式
pub fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        PixelFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        PixelFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        PixelFormat::D16Unorm => DXGI_FORMAT_D16_UNORM,
        PixelFormat::D24UnormS8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
        PixelFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
        PixelFormat::D32FloatS8 => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
    }
}

/// 描述符种类 -> 描述符范围类型
///
/// 根常量走根参数，不经过范围。
pub fn range_type(kind: DescriptorKind) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match kind {
        DescriptorKind::UniformBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        DescriptorKind::StorageBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorKind::SampledImage => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorKind::StorageImage => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorKind::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
        DescriptorKind::RootConstant => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
    }
}

/// 阶段掩码 -> 着色器可见性
///
/// 多阶段可见时退回 ALL（D3D12 的可见性是单选）。
pub fn shader_visibility(stages: ShaderStageFlags) -> D3D12_SHADER_VISIBILITY {
    if stages == ShaderStageFlags::VERTEX {
        D3D12_SHADER_VISIBILITY_VERTEX
    } else if stages == ShaderStageFlags::FRAGMENT {
        D3D12_SHADER_VISIBILITY_PIXEL
    } else if stages == ShaderStageFlags::GEOMETRY {
        D3D12_SHADER_VISIBILITY_GEOMETRY
    } else if stages == ShaderStageFlags::TESSELLATION_CONTROL {
        D3D12_SHADER_VISIBILITY_HULL
    } else if stages == ShaderStageFlags::TESSELLATION_EVALUATION {
        D3D12_SHADER_VISIBILITY_DOMAIN
    } else {
        D3D12_SHADER_VISIBILITY_ALL
    }
}
