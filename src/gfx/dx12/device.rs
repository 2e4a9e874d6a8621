//! DirectX 12 设备初始化与能力探测
//!
//! 通过 DXGI 枚举适配器、按统一的确定性排序挑选设备，
//! 然后创建 D3D12 设备与三类命令队列。

use tracing::info;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::{Common::*, *};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{
    select_best_gpu, FormatCapabilities, GpuDescriptor, GpuPresetLevel, QueueFamilyInfo,
};
use crate::renderer::resource::{PixelFormat, QueueKind, PIXEL_FORMAT_COUNT};

use super::convert;

/// 按顺序尝试的特性级别（序数越大越新）
const FEATURE_LEVELS: [(D3D_FEATURE_LEVEL, u32); 3] = [
    (D3D_FEATURE_LEVEL_12_1, 3),
    (D3D_FEATURE_LEVEL_12_0, 2),
    (D3D_FEATURE_LEVEL_11_0, 1),
];

/// DirectX 12 设备
pub struct Dx12Device {
    _factory: IDXGIFactory4,
    device: ID3D12Device,
    /// 选定设备的探测结果
    pub gpu: GpuDescriptor,
    queues: [ID3D12CommandQueue; 3],
}

impl Dx12Device {
    /// 枚举适配器、挑选设备并创建命令队列
    pub fn new() -> Result<Self> {
        unsafe {
            let factory: IDXGIFactory4 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))
                .map_err(|e| {
                    GraphicsError::DeviceCreation(format!("CreateDXGIFactory2 failed: {:?}", e))
                })?;

            // 枚举全部适配器并探测
            let mut adapters: Vec<IDXGIAdapter1> = Vec::new();
            let mut gpus: Vec<GpuDescriptor> = Vec::new();
            let mut index = 0u32;
            while let Ok(adapter) = factory.EnumAdapters1(index) {
                index += 1;
                gpus.push(probe_adapter(&adapter));
                adapters.push(adapter);
            }

            let best = select_best_gpu(&gpus, false)?;
            let adapter = &adapters[best];
            let gpu = gpus[best].clone();

            let feature_level = FEATURE_LEVELS
                .iter()
                .find(|&&(_, tier)| tier == gpu.feature_tier)
                .map(|&(level, _)| level)
                .unwrap_or(D3D_FEATURE_LEVEL_11_0);

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(adapter, feature_level, &mut device).map_err(|e| {
                GraphicsError::DeviceCreation(format!("D3D12CreateDevice failed: {:?}", e))
            })?;
            let device = device.ok_or_else(|| {
                GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string())
            })?;

            // 三类命令队列：DIRECT / COMPUTE / COPY
            let queue_types = [
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                D3D12_COMMAND_LIST_TYPE_COMPUTE,
                D3D12_COMMAND_LIST_TYPE_COPY,
            ];
            let mut queues: Vec<ID3D12CommandQueue> = Vec::with_capacity(3);
            for queue_type in queue_types {
                let desc = D3D12_COMMAND_QUEUE_DESC {
                    Type: queue_type,
                    Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
                    Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                    NodeMask: 0,
                };
                let queue: ID3D12CommandQueue = device.CreateCommandQueue(&desc).map_err(|e| {
                    GraphicsError::DeviceCreation(format!("CreateCommandQueue failed: {:?}", e))
                })?;
                queues.push(queue);
            }

            let mut dx12 = Self {
                _factory: factory,
                device,
                gpu,
                queues: [
                    queues[0].clone(),
                    queues[1].clone(),
                    queues[2].clone(),
                ],
            };
            dx12.probe_format_capabilities();

            info!(
                target: "polyrender::dx12",
                name = dx12.gpu.name.as_str(),
                tier = dx12.gpu.feature_tier,
                "D3D12 device created"
            );
            Ok(dx12)
        }
    }

    /// 设备句柄
    pub fn handle(&self) -> &ID3D12Device {
        &self.device
    }

    /// 指定能力的命令队列
    pub fn queue(&self, kind: QueueKind) -> &ID3D12CommandQueue {
        match kind {
            QueueKind::Graphics => &self.queues[0],
            QueueKind::Compute => &self.queues[1],
            QueueKind::Transfer => &self.queues[2],
        }
    }

    /// 描述符句柄步长
    pub fn descriptor_increment(&self, heap_type: D3D12_DESCRIPTOR_HEAP_TYPE) -> u32 {
        unsafe { self.device.GetDescriptorHandleIncrementSize(heap_type) }
    }

    /// 设备创建后补一遍逐格式能力位
    fn probe_format_capabilities(&mut self) {
        let mut capabilities = FormatCapabilities::none();
        for i in 0..PIXEL_FORMAT_COUNT {
            let format = PixelFormat::from_index(i).unwrap();
            let mut support = D3D12_FEATURE_DATA_FORMAT_SUPPORT {
                Format: convert::dxgi_format(format),
                ..Default::default()
            };
            let ok = unsafe {
                self.device
                    .CheckFeatureSupport(
                        D3D12_FEATURE_FORMAT_SUPPORT,
                        &mut support as *mut _ as *mut _,
                        std::mem::size_of::<D3D12_FEATURE_DATA_FORMAT_SUPPORT>() as u32,
                    )
                    .is_ok()
            };
            if !ok {
                continue;
            }
            let read = (support.Support1 & D3D12_FORMAT_SUPPORT1_SHADER_SAMPLE)
                != D3D12_FORMAT_SUPPORT1(0);
            let write = (support.Support2 & D3D12_FORMAT_SUPPORT2_UAV_TYPED_STORE)
                != D3D12_FORMAT_SUPPORT2(0);
            let render_bit = if format.is_depth() {
                D3D12_FORMAT_SUPPORT1_DEPTH_STENCIL
            } else {
                D3D12_FORMAT_SUPPORT1_RENDER_TARGET
            };
            let render = (support.Support1 & render_bit) != D3D12_FORMAT_SUPPORT1(0);
            capabilities.set(format, read, write, render);
        }
        self.gpu.capabilities = capabilities;
    }
}

/// 探测单个适配器
unsafe fn probe_adapter(adapter: &IDXGIAdapter1) -> GpuDescriptor {
    let desc = adapter.GetDesc1().unwrap_or_default();
    let name = String::from_utf16_lossy(
        &desc.Description[..desc
            .Description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.Description.len())],
    );
    let software = (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0;

    // 不创建真设备，只探测可用的最高特性级别
    let mut feature_tier = 0u32;
    for (level, tier) in FEATURE_LEVELS {
        let mut probe: Option<ID3D12Device> = None;
        if D3D12CreateDevice(adapter, level, &mut probe).is_ok() {
            feature_tier = tier;
            break;
        }
    }

    let preset = if software {
        GpuPresetLevel::Office
    } else if desc.DedicatedVideoMemory >= 2 << 30 {
        GpuPresetLevel::High
    } else if desc.DedicatedVideoMemory > 0 {
        GpuPresetLevel::Medium
    } else {
        GpuPresetLevel::Low
    };

    GpuDescriptor {
        name,
        vendor_id: desc.VendorId,
        device_id: desc.DeviceId,
        revision_id: desc.Revision,
        preset,
        feature_tier,
        dedicated_vram: desc.DedicatedVideoMemory as u64,
        wave_ops: feature_tier >= 2,
        software,
        // D3D12 的三类引擎对应三个 "队列族"
        queue_families: vec![
            QueueFamilyInfo {
                supports_graphics: true,
                supports_compute: true,
                supports_transfer: true,
                count: 1,
            },
            QueueFamilyInfo {
                supports_graphics: false,
                supports_compute: true,
                supports_transfer: true,
                count: 1,
            },
            QueueFamilyInfo {
                supports_graphics: false,
                supports_compute: false,
                supports_transfer: true,
                count: 1,
            },
        ],
        capabilities: FormatCapabilities::none(),
    }
}
