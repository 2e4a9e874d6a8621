//! DirectX 12 渲染目标绑定
//!
//! D3D12 没有通道对象——附件形状在 `OMSetRenderTargets` 时隐式生效。
//! 通道在这里退化为记录形状的值对象，帧缓冲是 RTV / DSV 句柄数组；
//! 两级缓存的键语义与 Vulkan 后端完全一致。

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::Result;
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::LoadAction;

use super::backend::ResourceTable;

/// "通道"：附件形状的不可变记录
pub struct Dx12RenderPass {
    pub key: RenderPassKey,
}

/// 帧缓冲：具体附件的 RTV / DSV 句柄
pub struct Dx12FrameBuffer {
    pub rtvs: Vec<D3D12_CPU_DESCRIPTOR_HANDLE>,
    pub dsv: Option<D3D12_CPU_DESCRIPTOR_HANDLE>,
}

/// 创建通道值对象
pub fn create_render_pass(key: &RenderPassKey) -> Dx12RenderPass {
    Dx12RenderPass { key: key.clone() }
}

/// 解析附件身份为 RTV / DSV 句柄
pub fn create_frame_buffer(
    resources: &ResourceTable,
    desc: &FrameBufferDesc,
) -> Result<Dx12FrameBuffer> {
    let mut rtvs = Vec::with_capacity(desc.color.len());
    for view in &desc.color {
        rtvs.push(resources.render_target_handle(view.texture, view.mip)?);
    }
    let dsv = match &desc.depth {
        Some(view) => Some(resources.depth_stencil_handle(view.texture)?),
        None => None,
    };
    Ok(Dx12FrameBuffer { rtvs, dsv })
}

/// 绑定渲染目标并按装载行为执行清空
pub fn begin_pass(
    cmd: &ID3D12GraphicsCommandList,
    pass: &Dx12RenderPass,
    frame_buffer: &Dx12FrameBuffer,
    load: &LoadActions,
) {
    unsafe {
        cmd.OMSetRenderTargets(
            frame_buffer.rtvs.len() as u32,
            if frame_buffer.rtvs.is_empty() {
                None
            } else {
                Some(frame_buffer.rtvs.as_ptr())
            },
            false,
            frame_buffer.dsv.as_ref().map(|d| d as *const _),
        );

        for (i, rtv) in frame_buffer.rtvs.iter().enumerate() {
            if pass
                .key
                .color
                .get(i)
                .map(|c| c.load_action == LoadAction::Clear)
                .unwrap_or(false)
            {
                let clear = load.color.get(i).map(|c| c.clear).unwrap_or([0.0; 4]);
                cmd.ClearRenderTargetView(*rtv, &clear, None);
            }
        }

        if let (Some(dsv), Some(depth_key)) = (frame_buffer.dsv, pass.key.depth) {
            let mut flags = D3D12_CLEAR_FLAGS(0);
            if depth_key.depth_load == LoadAction::Clear {
                flags |= D3D12_CLEAR_FLAG_DEPTH;
            }
            if depth_key.stencil_load == LoadAction::Clear {
                flags |= D3D12_CLEAR_FLAG_STENCIL;
            }
            if flags != D3D12_CLEAR_FLAGS(0) {
                cmd.ClearDepthStencilView(
                    dsv,
                    flags,
                    load.clear_depth,
                    load.clear_stencil as u8,
                    None,
                );
            }
        }
    }
}
