//! Vulkan 设备初始化与能力探测
//!
//! 枚举物理设备、填写统一的 `GpuDescriptor`、按确定性排序挑选
//! 最佳设备，然后创建逻辑设备与三类队列（图形 / 计算 / 传输）。
//! 计算与传输优先使用专用队列族。

use ash::vk;
use std::ffi::CStr;
use tracing::info;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{
    select_best_gpu, select_queue_family, FormatCapabilities, GpuDescriptor, GpuPresetLevel,
    QueueFamilyInfo,
};
use crate::renderer::resource::{PixelFormat, QueueKind, PIXEL_FORMAT_COUNT};

use super::convert;

/// 设备类型 -> 性能档位（附带是否为软件实现）
pub fn preset_from_device_type(device_type: vk::PhysicalDeviceType) -> (GpuPresetLevel, bool) {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => (GpuPresetLevel::High, false),
        vk::PhysicalDeviceType::INTEGRATED_GPU => (GpuPresetLevel::Low, false),
        vk::PhysicalDeviceType::VIRTUAL_GPU => (GpuPresetLevel::Medium, false),
        vk::PhysicalDeviceType::CPU => (GpuPresetLevel::Office, true),
        _ => (GpuPresetLevel::Office, false),
    }
}

/// Vulkan 设备
///
/// 持有实例、选定的物理设备、逻辑设备与队列。
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical: vk::PhysicalDevice,
    device: ash::Device,
    /// 选定设备的探测结果
    pub gpu: GpuDescriptor,
    queue_family_indices: [u32; 3],
    queues: [vk::Queue; 3],
    memory_props: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// 初始化实例、挑选设备并创建逻辑设备
    pub fn new(app_name: &str) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                GraphicsError::DeviceCreation(format!("failed to load Vulkan loader: {}", e))
            })?;

            let app_name_c = std::ffi::CString::new(app_name).unwrap_or_default();
            let app_info = vk::ApplicationInfo::builder()
                .application_name(&app_name_c)
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(CStr::from_bytes_with_nul_unchecked(b"polyrender\0"))
                .api_version(vk::API_VERSION_1_1);
            let instance_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
            let instance = entry.create_instance(&instance_info, None).map_err(|e| {
                GraphicsError::DeviceCreation(format!("vkCreateInstance failed: {:?}", e))
            })?;

            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                GraphicsError::DeviceCreation(format!("device enumeration failed: {:?}", e))
            })?;

            let gpus: Vec<GpuDescriptor> = physical_devices
                .iter()
                .map(|&pd| probe_adapter(&instance, pd))
                .collect();

            let best = select_best_gpu(&gpus, false)?;
            let physical = physical_devices[best];
            let gpu = gpus[best].clone();

            // 三类队列族：计算 / 传输优先专用族
            let graphics_family = select_queue_family(&gpu.queue_families, QueueKind::Graphics)
                .ok_or(GraphicsError::NoSuitableDevice)? as u32;
            let compute_family = select_queue_family(&gpu.queue_families, QueueKind::Compute)
                .unwrap_or(graphics_family as usize) as u32;
            let transfer_family = select_queue_family(&gpu.queue_families, QueueKind::Transfer)
                .unwrap_or(graphics_family as usize) as u32;

            let mut unique_families = vec![graphics_family];
            for family in [compute_family, transfer_family] {
                if !unique_families.contains(&family) {
                    unique_families.push(family);
                }
            }

            let priorities = [1.0f32];
            let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
                .iter()
                .map(|&family| {
                    vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(family)
                        .queue_priorities(&priorities)
                        .build()
                })
                .collect();

            let supported = instance.get_physical_device_features(physical);
            let features = vk::PhysicalDeviceFeatures::builder()
                .sparse_binding(supported.sparse_binding == vk::TRUE)
                .sparse_residency_image2_d(supported.sparse_residency_image2_d == vk::TRUE)
                .build();

            let device_info = vk::DeviceCreateInfo::builder()
                .queue_create_infos(&queue_infos)
                .enabled_features(&features);
            let device = instance
                .create_device(physical, &device_info, None)
                .map_err(|e| {
                    GraphicsError::DeviceCreation(format!("vkCreateDevice failed: {:?}", e))
                })?;

            let queues = [
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(compute_family, 0),
                device.get_device_queue(transfer_family, 0),
            ];
            let memory_props = instance.get_physical_device_memory_properties(physical);

            info!(
                target: "polyrender::vulkan",
                name = gpu.name.as_str(),
                graphics_family,
                compute_family,
                transfer_family,
                "Vulkan device created"
            );

            Ok(Self {
                _entry: entry,
                instance,
                physical,
                device,
                gpu,
                queue_family_indices: [graphics_family, compute_family, transfer_family],
                queues,
                memory_props,
            })
        }
    }

    /// 逻辑设备句柄
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// 物理设备句柄
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    /// 指定能力的队列
    pub fn queue(&self, kind: QueueKind) -> vk::Queue {
        self.queues[queue_slot(kind)]
    }

    /// 指定能力的队列族序号
    ///
    /// 屏障的所有权转移用它填 src / dst 队列族。
    pub fn queue_family_index(&self, kind: QueueKind) -> u32 {
        self.queue_family_indices[queue_slot(kind)]
    }

    /// 满足类型位与属性要求的内存类型序号
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        (0..self.memory_props.memory_type_count).find(|&i| {
            (type_bits & (1 << i)) != 0
                && self.memory_props.memory_types[i as usize]
                    .property_flags
                    .contains(flags)
        })
    }
}

fn queue_slot(kind: QueueKind) -> usize {
    match kind {
        QueueKind::Graphics => 0,
        QueueKind::Compute => 1,
        QueueKind::Transfer => 2,
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// 探测单个物理设备
///
/// # Safety
///
/// `physical` 必须来自 `instance` 的枚举结果。
unsafe fn probe_adapter(instance: &ash::Instance, physical: vk::PhysicalDevice) -> GpuDescriptor {
    let props = instance.get_physical_device_properties(physical);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();
    let (preset, software) = preset_from_device_type(props.device_type);

    // 专用显存：所有 DEVICE_LOCAL 堆之和
    let memory = instance.get_physical_device_memory_properties(physical);
    let dedicated_vram: u64 = (0..memory.memory_heap_count as usize)
        .filter(|&i| {
            memory.memory_heaps[i]
                .flags
                .contains(vk::MemoryHeapFlags::DEVICE_LOCAL)
        })
        .map(|i| memory.memory_heaps[i].size)
        .sum();

    // subgroup（wave）操作需要 1.1 实例接口
    let wave_ops = if props.api_version >= vk::API_VERSION_1_1 {
        let mut subgroup = vk::PhysicalDeviceSubgroupProperties::default();
        let mut props2 = vk::PhysicalDeviceProperties2::builder().push_next(&mut subgroup);
        instance.get_physical_device_properties2(physical, &mut props2);
        subgroup
            .supported_operations
            .contains(vk::SubgroupFeatureFlags::BASIC)
    } else {
        false
    };

    let queue_families = instance
        .get_physical_device_queue_family_properties(physical)
        .iter()
        .map(|family| QueueFamilyInfo {
            supports_graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            supports_compute: family.queue_flags.contains(vk::QueueFlags::COMPUTE),
            supports_transfer: family.queue_flags.contains(vk::QueueFlags::TRANSFER),
            count: family.queue_count,
        })
        .collect();

    // 逐格式能力位
    let mut capabilities = FormatCapabilities::none();
    for i in 0..PIXEL_FORMAT_COUNT {
        let format = PixelFormat::from_index(i).unwrap();
        let format_props =
            instance.get_physical_device_format_properties(physical, convert::pixel_format(format));
        let (read, write, render) = convert::format_capability_bits(
            format_props.optimal_tiling_features,
            format.is_depth(),
        );
        capabilities.set(format, read, write, render);
    }

    GpuDescriptor {
        name,
        vendor_id: props.vendor_id,
        device_id: props.device_id,
        revision_id: 0,
        preset,
        feature_tier: vk::api_version_minor(props.api_version),
        dedicated_vram,
        wave_ops,
        software,
        queue_families,
        capabilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_from_device_type() {
        assert_eq!(
            preset_from_device_type(vk::PhysicalDeviceType::DISCRETE_GPU),
            (GpuPresetLevel::High, false)
        );
        assert_eq!(
            preset_from_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU),
            (GpuPresetLevel::Low, false)
        );
        // CPU 实现视为软件适配器
        assert_eq!(
            preset_from_device_type(vk::PhysicalDeviceType::CPU),
            (GpuPresetLevel::Office, true)
        );
    }
}
