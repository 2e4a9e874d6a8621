//! DirectX 12 屏障翻译
//!
//! 整批请求合成一次 `ResourceBarrier` 调用。
//! UNORDERED_ACCESS -> UNORDERED_ACCESS 翻译成 UAV 屏障
//! （写后写冒险），而不是被判成无效迁移丢掉。
//! D3D12 没有队列族所有权的概念，acquire / release 退化为普通迁移。

use std::mem::ManuallyDrop;
use tracing::warn;
use windows::Win32::Graphics::Direct3D12::*;

use crate::renderer::barrier::{BarrierResource, ResourceBarrier};

use super::backend::ResourceTable;
use super::convert;

/// 录制一批屏障
pub fn record(
    resources: &ResourceTable,
    cmd: &ID3D12GraphicsCommandList,
    barriers: &[ResourceBarrier],
) {
    let mut native: Vec<D3D12_RESOURCE_BARRIER> = Vec::with_capacity(barriers.len());

    for barrier in barriers {
        let resource = match barrier.resource {
            BarrierResource::Buffer(id) => resources.buffer_resource(id),
            BarrierResource::Texture(id) => resources.texture_resource(id),
        };
        let resource = match resource {
            Ok(resource) => resource,
            Err(_) => {
                warn!(
                    target: "polyrender::dx12",
                    "Barrier on unregistered resource skipped"
                );
                continue;
            }
        };

        if barrier.is_waw_hazard() {
            native.push(D3D12_RESOURCE_BARRIER {
                Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                Anonymous: D3D12_RESOURCE_BARRIER_0 {
                    UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                        pResource: ManuallyDrop::new(Some(resource.clone())),
                    }),
                },
            });
            continue;
        }

        let state_before = convert::resource_states(barrier.src_state);
        let state_after = convert::resource_states(barrier.dst_state);
        if state_before == state_after {
            continue;
        }

        let subresource = match barrier.subresource {
            // 单 mip 单层选择器映射到对应的子资源序号
            Some(range) if range.mip_count == 1 && range.layer_count == 1 => range.base_mip,
            _ => D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
        };

        native.push(D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: ManuallyDrop::new(Some(resource.clone())),
                    Subresource: subresource,
                    StateBefore: state_before,
                    StateAfter: state_after,
                }),
            },
        });
    }

    if !native.is_empty() {
        unsafe {
            cmd.ResourceBarrier(&native);
        }
    }
}
