//! 设备能力探测
//!
//! 各后端枚举物理设备并填出统一的 `GpuDescriptor`；
//! 本模块负责后端无关的部分：确定性的设备排序、
//! 逐格式能力位的查询接口、深度格式降级，以及队列族挑选。

use tracing::{info, warn};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::resource::{PixelFormat, QueueKind, PIXEL_FORMAT_COUNT};

/// GPU 性能档位
///
/// 从设备类型推导的粗粒度分档，参与设备排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GpuPresetLevel {
    /// 软件 / 未知
    Office,
    /// 核显
    Low,
    /// 入门独显
    Medium,
    /// 独显
    High,
    /// 旗舰独显
    Ultra,
}

/// 一个队列族的能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub supports_graphics: bool,
    pub supports_compute: bool,
    pub supports_transfer: bool,
    pub count: u32,
}

/// 逐像素格式的能力位
///
/// 设备选定后探测一次，记录每种格式能否被着色器采样 /
/// 存储写入 / 作为渲染目标。
#[derive(Debug, Clone)]
pub struct FormatCapabilities {
    can_shader_read: [bool; PIXEL_FORMAT_COUNT],
    can_shader_write: [bool; PIXEL_FORMAT_COUNT],
    can_render_target: [bool; PIXEL_FORMAT_COUNT],
}

impl FormatCapabilities {
    /// 全部置否的空能力表
    pub fn none() -> Self {
        Self {
            can_shader_read: [false; PIXEL_FORMAT_COUNT],
            can_shader_write: [false; PIXEL_FORMAT_COUNT],
            can_render_target: [false; PIXEL_FORMAT_COUNT],
        }
    }

    /// 记录一种格式的能力位
    pub fn set(&mut self, format: PixelFormat, read: bool, write: bool, render: bool) {
        let i = format.index();
        self.can_shader_read[i] = read;
        self.can_shader_write[i] = write;
        self.can_render_target[i] = render;
    }

    /// 格式能否被着色器采样
    pub fn can_shader_read(&self, format: PixelFormat) -> bool {
        self.can_shader_read[format.index()]
    }

    /// 格式能否被着色器存储写入
    pub fn can_shader_write(&self, format: PixelFormat) -> bool {
        self.can_shader_write[format.index()]
    }

    /// 格式能否作为渲染目标 / 深度附件
    pub fn can_render_target(&self, format: PixelFormat) -> bool {
        self.can_render_target[format.index()]
    }
}

/// 物理设备描述
///
/// 由后端探测填写，供排序与能力查询。
#[derive(Debug, Clone)]
pub struct GpuDescriptor {
    /// 设备名
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub revision_id: u32,
    /// 性能档位
    pub preset: GpuPresetLevel,
    /// 后端特性层级（Vulkan API 版本 / D3D 特性级别的序数）
    pub feature_tier: u32,
    /// 专用显存字节数
    pub dedicated_vram: u64,
    /// 是否支持 wave / subgroup 操作
    pub wave_ops: bool,
    /// 软件实现（被排除在选择之外）
    pub software: bool,
    /// 队列族能力
    pub queue_families: Vec<QueueFamilyInfo>,
    /// 逐格式能力位
    pub capabilities: FormatCapabilities,
}

/// `a` 是否比 `b` 更好
///
/// 排序依据（依次比较）：wave 操作支持（被请求时）、
/// 性能档位、特性层级、专用显存。
fn is_better(a: &GpuDescriptor, b: &GpuDescriptor, prefer_wave_ops: bool) -> bool {
    if prefer_wave_ops && a.wave_ops != b.wave_ops {
        return a.wave_ops;
    }
    if a.preset != b.preset {
        return a.preset > b.preset;
    }
    if a.feature_tier != b.feature_tier {
        return a.feature_tier > b.feature_tier;
    }
    a.dedicated_vram > b.dedicated_vram
}

/// 从探测结果中挑选最佳设备
///
/// 结果是确定性的：同样的输入永远选出同一台设备（并列时取先枚举到的）。
/// 软件实现不参与选择；一台可用设备都没有时返回 `NoSuitableDevice`。
pub fn select_best_gpu(gpus: &[GpuDescriptor], prefer_wave_ops: bool) -> Result<usize> {
    let mut best: Option<usize> = None;

    for (i, gpu) in gpus.iter().enumerate() {
        info!(
            target: "polyrender::device",
            index = i,
            name = gpu.name.as_str(),
            vendor_id = gpu.vendor_id,
            device_id = gpu.device_id,
            preset = ?gpu.preset,
            vram_mb = gpu.dedicated_vram / (1024 * 1024),
            "GPU detected"
        );
        if gpu.software {
            continue;
        }
        match best {
            None => best = Some(i),
            Some(current) => {
                if is_better(gpu, &gpus[current], prefer_wave_ops) {
                    best = Some(i);
                }
            }
        }
    }

    match best {
        Some(index) => {
            info!(
                target: "polyrender::device",
                index,
                name = gpus[index].name.as_str(),
                "GPU selected"
            );
            Ok(index)
        }
        None => {
            if !gpus.is_empty() {
                warn!(
                    target: "polyrender::device",
                    "Only software adapters available"
                );
            }
            Err(GraphicsError::NoSuitableDevice.into())
        }
    }
}

/// 深度格式降级链
const DEPTH_FALLBACKS: [PixelFormat; 4] = [
    PixelFormat::D32FloatS8,
    PixelFormat::D24UnormS8,
    PixelFormat::D32Float,
    PixelFormat::D16Unorm,
];

/// 选择一个设备支持的深度格式
///
/// 请求的格式可用时直接返回；否则沿更窄的深度 / 模板格式
/// 降级并记一条警告。连 D16 都不可用时返回错误。
pub fn pick_depth_format(
    requested: PixelFormat,
    capabilities: &FormatCapabilities,
) -> Result<PixelFormat> {
    if !requested.is_depth() {
        return Err(GraphicsError::UnsupportedFormat(format!(
            "{:?} is not a depth format",
            requested
        ))
        .into());
    }
    if capabilities.can_render_target(requested) {
        return Ok(requested);
    }

    let start = DEPTH_FALLBACKS
        .iter()
        .position(|&f| f == requested)
        .unwrap_or(0);
    for &fallback in &DEPTH_FALLBACKS[start..] {
        if capabilities.can_render_target(fallback) {
            warn!(
                target: "polyrender::device",
                requested = ?requested,
                fallback = ?fallback,
                "Depth format unsupported, falling back"
            );
            return Ok(fallback);
        }
    }

    Err(GraphicsError::UnsupportedFormat(format!(
        "no usable depth format (requested {:?})",
        requested
    ))
    .into())
}

/// 为给定用途挑选队列族
///
/// 计算与传输优先挑选专用队列族（不带多余能力的），
/// 没有专用族时退回图形族。
pub fn select_queue_family(families: &[QueueFamilyInfo], kind: QueueKind) -> Option<usize> {
    let dedicated = |f: &QueueFamilyInfo| match kind {
        QueueKind::Graphics => f.supports_graphics,
        QueueKind::Compute => f.supports_compute && !f.supports_graphics,
        QueueKind::Transfer => {
            f.supports_transfer && !f.supports_graphics && !f.supports_compute
        }
    };
    let capable = |f: &QueueFamilyInfo| match kind {
        QueueKind::Graphics => f.supports_graphics,
        QueueKind::Compute => f.supports_compute,
        QueueKind::Transfer => f.supports_transfer,
    };

    families
        .iter()
        .position(dedicated)
        .or_else(|| families.iter().position(capable))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(name: &str, preset: GpuPresetLevel, tier: u32, vram: u64) -> GpuDescriptor {
        GpuDescriptor {
            name: name.to_string(),
            vendor_id: 0x10de,
            device_id: 0x1234,
            revision_id: 0,
            preset,
            feature_tier: tier,
            dedicated_vram: vram,
            wave_ops: false,
            software: false,
            queue_families: Vec::new(),
            capabilities: FormatCapabilities::none(),
        }
    }

    #[test]
    fn test_select_prefers_higher_preset() {
        let gpus = vec![
            gpu("integrated", GpuPresetLevel::Low, 2, 512 << 20),
            gpu("discrete", GpuPresetLevel::High, 1, 4 << 30),
        ];
        assert_eq!(select_best_gpu(&gpus, false).unwrap(), 1);
    }

    #[test]
    fn test_select_breaks_ties_on_tier_then_vram() {
        let gpus = vec![
            gpu("a", GpuPresetLevel::High, 1, 4 << 30),
            gpu("b", GpuPresetLevel::High, 2, 2 << 30),
            gpu("c", GpuPresetLevel::High, 2, 8 << 30),
        ];
        assert_eq!(select_best_gpu(&gpus, false).unwrap(), 2);
    }

    #[test]
    fn test_select_wave_ops_dominates_when_requested() {
        let mut weak = gpu("weak", GpuPresetLevel::Medium, 1, 1 << 30);
        weak.wave_ops = true;
        let strong = gpu("strong", GpuPresetLevel::Ultra, 3, 16 << 30);

        let gpus = vec![strong.clone(), weak.clone()];
        assert_eq!(select_best_gpu(&gpus, true).unwrap(), 1);
        assert_eq!(select_best_gpu(&gpus, false).unwrap(), 0);
    }

    #[test]
    fn test_select_is_deterministic_on_full_tie() {
        let gpus = vec![
            gpu("first", GpuPresetLevel::High, 2, 4 << 30),
            gpu("second", GpuPresetLevel::High, 2, 4 << 30),
        ];
        // 完全并列时取先枚举到的
        assert_eq!(select_best_gpu(&gpus, false).unwrap(), 0);
    }

    #[test]
    fn test_software_only_is_an_error() {
        let mut soft = gpu("llvmpipe", GpuPresetLevel::Office, 1, 0);
        soft.software = true;
        assert!(select_best_gpu(&[soft], false).is_err());
        assert!(select_best_gpu(&[], false).is_err());
    }

    #[test]
    fn test_depth_format_fallback() {
        let mut caps = FormatCapabilities::none();
        caps.set(PixelFormat::D16Unorm, false, false, true);

        // D24S8 不可用 -> 一路降到 D16
        let picked = pick_depth_format(PixelFormat::D24UnormS8, &caps).unwrap();
        assert_eq!(picked, PixelFormat::D16Unorm);

        // 请求的格式可用时原样返回
        caps.set(PixelFormat::D32Float, false, false, true);
        let picked = pick_depth_format(PixelFormat::D32Float, &caps).unwrap();
        assert_eq!(picked, PixelFormat::D32Float);

        // 非深度格式直接报错
        assert!(pick_depth_format(PixelFormat::Rgba8Unorm, &caps).is_err());

        // 什么深度格式都不可用：报错
        let empty = FormatCapabilities::none();
        assert!(pick_depth_format(PixelFormat::D32Float, &empty).is_err());
    }

    #[test]
    fn test_queue_family_selection_prefers_dedicated() {
        let families = vec![
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
                count: 2,
            },
            QueueFamilyInfo {
                supports_graphics: false,
                supports_compute: false,
                supports_transfer: true,
                count: 1,
            },
        ];

        assert_eq!(select_queue_family(&families, QueueKind::Graphics), Some(0));
        assert_eq!(select_queue_family(&families, QueueKind::Compute), Some(1));
        assert_eq!(select_queue_family(&families, QueueKind::Transfer), Some(2));

        // 只有全能族时退回它
        let unified = vec![QueueFamilyInfo {
            supports_graphics: true,
            supports_compute: true,
            supports_transfer: true,
            count: 1,
        }];
        assert_eq!(select_queue_family(&unified, QueueKind::Transfer), Some(0));
    }
}
