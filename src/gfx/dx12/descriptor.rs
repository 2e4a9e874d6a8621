//! DirectX 12 描述符实现
//!
//! 根签名 -> `ID3D12RootSignature`（每个频率桶一张描述符表，
//! 采样器按 API 要求单独成表）；描述符存储块 -> 着色器可见堆的
//! 连续区段；槽位写入 -> 从资源表暂存的 CPU 句柄
//! `CopyDescriptorsSimple` 到着色器可见堆。

use windows::core::PCWSTR;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, PolyRenderError, Result};
use crate::renderer::descriptor::DescriptorWrite;
use crate::renderer::root_signature::RootLayout;
use crate::renderer::shader::{DescriptorKind, UpdateFrequency, UPDATE_FREQUENCY_COUNT};

use super::backend::ResourceTable;
use super::convert;
use super::device::Dx12Device;

/// 每个描述符集摊到的堆句柄配额
const VIEW_HANDLES_PER_SET: u32 = 16;
const SAMPLER_HANDLES_PER_SET: u32 = 4;

/// 影子数组扁平下标 -> (是否采样器, 类内局部序号)
type FlatMap = Vec<(bool, u32)>;

/// 本机根签名对象
pub struct Dx12Signature {
    pub root_signature: ID3D12RootSignature,
    /// 每个频率桶的视图表根参数序号
    pub table_params: [Option<u32>; UPDATE_FREQUENCY_COUNT],
    /// 每个频率桶的采样器表根参数序号
    pub sampler_params: [Option<u32>; UPDATE_FREQUENCY_COUNT],
    /// 每个频率桶一个槽位占用的视图 / 采样器句柄数
    pub view_strides: [u32; UPDATE_FREQUENCY_COUNT],
    pub sampler_strides: [u32; UPDATE_FREQUENCY_COUNT],
    /// 描述符下标 -> 根常量根参数序号
    pub constant_params: std::collections::HashMap<u32, u32>,
    flat_maps: [FlatMap; UPDATE_FREQUENCY_COUNT],
}

impl Dx12Signature {
    /// 扁平下标在堆里的归属与局部序号
    pub fn flat_entry(&self, frequency: UpdateFrequency, flat_index: u32) -> (bool, u32) {
        self.flat_maps[frequency.set_index()][flat_index as usize]
    }
}

/// 由合并布局创建本机根签名
pub fn create_signature(device: &Dx12Device, layout: &RootLayout) -> Result<Dx12Signature> {
    // 根参数持有指向 ranges 的裸指针，预留容量避免扩容搬移
    let mut ranges_storage: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> =
        Vec::with_capacity(UPDATE_FREQUENCY_COUNT * 2);
    let mut params: Vec<D3D12_ROOT_PARAMETER> = Vec::new();
    let mut table_params = [None; UPDATE_FREQUENCY_COUNT];
    let mut sampler_params = [None; UPDATE_FREQUENCY_COUNT];
    let mut view_strides = [0u32; UPDATE_FREQUENCY_COUNT];
    let mut sampler_strides = [0u32; UPDATE_FREQUENCY_COUNT];
    let mut flat_maps: [FlatMap; UPDATE_FREQUENCY_COUNT] = Default::default();

    for set_index in 0..UPDATE_FREQUENCY_COUNT {
        let frequency = UpdateFrequency::from_set_index(set_index).unwrap();
        let set_layout = layout.set_layout(frequency);
        if set_layout.is_empty() {
            continue;
        }

        let mut view_ranges: Vec<D3D12_DESCRIPTOR_RANGE> = Vec::new();
        let mut sampler_ranges: Vec<D3D12_DESCRIPTOR_RANGE> = Vec::new();
        let mut flat_map: FlatMap = vec![(false, 0); set_layout.total_handles as usize];
        let mut view_cursor = 0u32;
        let mut sampler_cursor = 0u32;

        for &desc_index in &set_layout.descriptor_indices {
            let info = layout.descriptor_by_index(desc_index);
            let is_sampler = info.resource.kind == DescriptorKind::Sampler;
            let (ranges, cursor) = if is_sampler {
                (&mut sampler_ranges, &mut sampler_cursor)
            } else {
                (&mut view_ranges, &mut view_cursor)
            };
            ranges.push(D3D12_DESCRIPTOR_RANGE {
                RangeType: convert::range_type(info.resource.kind),
                NumDescriptors: info.resource.array_size,
                BaseShaderRegister: info.resource.binding,
                RegisterSpace: set_index as u32,
                OffsetInDescriptorsFromTableStart: *cursor,
            });
            for element in 0..info.resource.array_size {
                flat_map[(info.flat_base + element) as usize] = (is_sampler, *cursor + element);
            }
            *cursor += info.resource.array_size;
        }

        view_strides[set_index] = view_cursor;
        sampler_strides[set_index] = sampler_cursor;
        flat_maps[set_index] = flat_map;

        if !view_ranges.is_empty() {
            table_params[set_index] = Some(params.len() as u32);
            ranges_storage.push(view_ranges);
            let stored = ranges_storage.last().unwrap();
            params.push(D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: stored.len() as u32,
                        pDescriptorRanges: stored.as_ptr(),
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            });
        }
        if !sampler_ranges.is_empty() {
            sampler_params[set_index] = Some(params.len() as u32);
            ranges_storage.push(sampler_ranges);
            let stored = ranges_storage.last().unwrap();
            params.push(D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: stored.len() as u32,
                        pDescriptorRanges: stored.as_ptr(),
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            });
        }
    }

    // 根常量各占一个根参数
    let mut constant_params = std::collections::HashMap::new();
    for rc in layout.root_constants() {
        constant_params.insert(rc.descriptor_index, params.len() as u32);
        params.push(D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: layout
                        .descriptor_by_index(rc.descriptor_index)
                        .resource
                        .binding,
                    RegisterSpace: 0,
                    Num32BitValues: rc.size_bytes / 4,
                },
            },
            ShaderVisibility: convert::shader_visibility(rc.stages),
        });
    }

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: params.len() as u32,
        pParameters: params.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    unsafe {
        let mut blob = None;
        let mut error_blob = None;
        D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut error_blob))
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "D3D12SerializeRootSignature failed: {:?}",
                    e
                ))
            })?;
        let blob = blob.ok_or_else(|| {
            GraphicsError::ResourceCreation("root signature serialization produced no blob".into())
        })?;

        let root_signature: ID3D12RootSignature = device
            .handle()
            .CreateRootSignature(
                0,
                std::slice::from_raw_parts(
                    blob.GetBufferPointer() as *const u8,
                    blob.GetBufferSize(),
                ),
            )
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("CreateRootSignature failed: {:?}", e))
            })?;

        Ok(Dx12Signature {
            root_signature,
            table_params,
            sampler_params,
            view_strides,
            sampler_strides,
            constant_params,
            flat_maps,
        })
    }
}

/// 描述符槽位：着色器可见堆里的一段连续句柄
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dx12DescriptorSlot {
    pub view_cpu: usize,
    pub view_gpu: u64,
    pub sampler_cpu: usize,
    pub sampler_gpu: u64,
}

/// 描述符存储块：一个视图堆加一个采样器堆的区段
pub struct Dx12DescriptorBlock {
    pub view_heap: ID3D12DescriptorHeap,
    pub sampler_heap: ID3D12DescriptorHeap,
    view_capacity: u32,
    view_cursor: u32,
    sampler_capacity: u32,
    sampler_cursor: u32,
    view_cpu_start: usize,
    view_gpu_start: u64,
    sampler_cpu_start: usize,
    sampler_gpu_start: u64,
    view_increment: u32,
    sampler_increment: u32,
}

fn create_heap(
    device: &Dx12Device,
    heap_type: D3D12_DESCRIPTOR_HEAP_TYPE,
    capacity: u32,
    name: &str,
) -> Result<ID3D12DescriptorHeap> {
    let desc = D3D12_DESCRIPTOR_HEAP_DESC {
        Type: heap_type,
        NumDescriptors: capacity,
        Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
        NodeMask: 0,
    };
    unsafe {
        let heap: ID3D12DescriptorHeap = device.handle().CreateDescriptorHeap(&desc).map_err(|e| {
            GraphicsError::ResourceCreation(format!("CreateDescriptorHeap failed: {:?}", e))
        })?;
        let wide_name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        let _ = heap.SetName(PCWSTR(wide_name.as_ptr()));
        Ok(heap)
    }
}

/// 分配一个描述符存储块
pub fn create_block(device: &Dx12Device, capacity_sets: u32) -> Result<Dx12DescriptorBlock> {
    let view_capacity = capacity_sets * VIEW_HANDLES_PER_SET;
    let sampler_capacity = capacity_sets * SAMPLER_HANDLES_PER_SET;

    let view_heap = create_heap(
        device,
        D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        view_capacity,
        "PolyRender View Block",
    )?;
    let sampler_heap = create_heap(
        device,
        D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        sampler_capacity,
        "PolyRender Sampler Block",
    )?;

    unsafe {
        Ok(Dx12DescriptorBlock {
            view_cpu_start: view_heap.GetCPUDescriptorHandleForHeapStart().ptr,
            view_gpu_start: view_heap.GetGPUDescriptorHandleForHeapStart().ptr,
            sampler_cpu_start: sampler_heap.GetCPUDescriptorHandleForHeapStart().ptr,
            sampler_gpu_start: sampler_heap.GetGPUDescriptorHandleForHeapStart().ptr,
            view_increment: device.descriptor_increment(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV),
            sampler_increment: device.descriptor_increment(D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER),
            view_heap,
            sampler_heap,
            view_capacity,
            view_cursor: 0,
            sampler_capacity,
            sampler_cursor: 0,
        })
    }
}

/// 从块中划出槽位
pub fn allocate_slots(
    block: &mut Dx12DescriptorBlock,
    signature: &Dx12Signature,
    frequency: UpdateFrequency,
    count: u32,
) -> Result<Vec<Dx12DescriptorSlot>> {
    let view_stride = signature.view_strides[frequency.set_index()];
    let sampler_stride = signature.sampler_strides[frequency.set_index()];

    if block.view_cursor + count * view_stride > block.view_capacity
        || block.sampler_cursor + count * sampler_stride > block.sampler_capacity
    {
        return Err(PolyRenderError::Runtime(format!(
            "descriptor block exhausted ({} view handles left, {} requested)",
            block.view_capacity - block.view_cursor,
            count * view_stride
        )));
    }

    let mut slots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        slots.push(Dx12DescriptorSlot {
            view_cpu: block.view_cpu_start
                + (block.view_cursor * block.view_increment) as usize,
            view_gpu: block.view_gpu_start
                + (block.view_cursor * block.view_increment) as u64,
            sampler_cpu: block.sampler_cpu_start
                + (block.sampler_cursor * block.sampler_increment) as usize,
            sampler_gpu: block.sampler_gpu_start
                + (block.sampler_cursor * block.sampler_increment) as u64,
        });
        block.view_cursor += view_stride;
        block.sampler_cursor += sampler_stride;
    }
    Ok(slots)
}

/// 把变化的条目拷贝进着色器可见堆
///
/// D3D12 的写入就是句柄拷贝，本来就是逐条的——
/// 不需要 Vulkan 那样的整集模板路径。
pub fn write_slot(
    device: &Dx12Device,
    resources: &ResourceTable,
    signature: &Dx12Signature,
    layout: &RootLayout,
    frequency: UpdateFrequency,
    slot: Dx12DescriptorSlot,
    changed: &[DescriptorWrite],
) -> Result<()> {
    let view_increment = device.descriptor_increment(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV);
    let sampler_increment = device.descriptor_increment(D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER);

    for write in changed {
        let info = layout.descriptor_by_index(write.descriptor_index);
        let (is_sampler, local) = signature.flat_entry(frequency, write.flat_index);

        let src = resources.staged_handle(write.resource, info.resource.kind)?;
        let (dst_ptr, heap_type) = if is_sampler {
            (
                slot.sampler_cpu + (local * sampler_increment) as usize,
                D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
            )
        } else {
            (
                slot.view_cpu + (local * view_increment) as usize,
                D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            )
        };

        unsafe {
            device.handle().CopyDescriptorsSimple(
                1,
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst_ptr },
                D3D12_CPU_DESCRIPTOR_HANDLE { ptr: src },
                heap_type,
            );
        }
    }
    Ok(())
}
