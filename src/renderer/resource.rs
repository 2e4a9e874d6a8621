//! 资源模型模块
//!
//! 定义后端无关的资源描述：资源状态位、像素格式、采样数、
//! 资源身份 ID 以及寻址用的范围 / 偏移类型。
//!
//! # 设计原则
//!
//! - **状态即位掩码**：一个资源可以同时处于多个只读状态
//!   （例如 `GENERIC_READ`），位运算语义与底层 API 对齐
//! - **身份与句柄分离**：核心层只持有资源 ID，
//!   ID 到本机句柄的映射由各后端的资源表维护
//! - **纯数据**：本模块不含任何本机 API 调用

use bitflags::bitflags;
use std::sync::atomic::{AtomicU64, Ordering};

bitflags! {
    /// 资源使用状态
    ///
    /// 状态迁移请求以 "旧状态 -> 新状态" 的形式声明，
    /// 由状态追踪器翻译成各后端的屏障描述。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// 未定义（初始状态）
        const UNDEFINED = 0;
        /// 顶点 / 常量缓冲
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        /// 索引缓冲
        const INDEX_BUFFER = 0x2;
        /// 渲染目标
        const RENDER_TARGET = 0x4;
        /// 无序访问（着色器可读写）
        const UNORDERED_ACCESS = 0x8;
        /// 深度写入
        const DEPTH_WRITE = 0x10;
        /// 深度只读
        const DEPTH_READ = 0x20;
        /// 非像素着色器可读
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        /// 像素着色器可读
        const PIXEL_SHADER_RESOURCE = 0x80;
        /// 所有着色器阶段可读
        const SHADER_RESOURCE = 0x40 | 0x80;
        /// 间接绘制参数
        const INDIRECT_ARGUMENT = 0x200;
        /// 拷贝目标
        const COPY_DEST = 0x400;
        /// 拷贝源
        const COPY_SOURCE = 0x800;
        /// 呈现
        const PRESENT = 0x4000;
        /// 通用状态
        const COMMON = 0x8000;
        /// 通用只读组合
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
    }
}

impl ResourceState {
    /// 该状态是否包含写访问
    pub fn is_write(&self) -> bool {
        self.intersects(
            ResourceState::RENDER_TARGET
                | ResourceState::UNORDERED_ACCESS
                | ResourceState::DEPTH_WRITE
                | ResourceState::COPY_DEST,
        )
    }
}

/// 像素格式
///
/// 覆盖核心层需要区分的颜色 / 深度格式子集。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA 8 位无符号归一化
    Rgba8Unorm,
    /// RGBA 8 位 sRGB
    Rgba8Srgb,
    /// BGRA 8 位无符号归一化
    Bgra8Unorm,
    /// RG 16 位浮点
    Rg16Float,
    /// RGBA 16 位浮点
    Rgba16Float,
    /// R 32 位浮点
    R32Float,
    /// R 32 位无符号整数
    R32Uint,
    /// RGBA 32 位浮点
    Rgba32Float,
    /// 深度 16 位
    D16Unorm,
    /// 深度 24 位 + 模板 8 位
    D24UnormS8,
    /// 深度 32 位浮点
    D32Float,
    /// 深度 32 位浮点 + 模板 8 位
    D32FloatS8,
}

/// 全部格式的固定枚举表，容量用于能力位数组
pub const PIXEL_FORMAT_COUNT: usize = 12;

impl PixelFormat {
    /// 格式在能力位数组中的序号
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// 按序号反查格式
    pub fn from_index(index: usize) -> Option<Self> {
        const ALL: [PixelFormat; PIXEL_FORMAT_COUNT] = [
            PixelFormat::Rgba8Unorm,
            PixelFormat::Rgba8Srgb,
            PixelFormat::Bgra8Unorm,
            PixelFormat::Rg16Float,
            PixelFormat::Rgba16Float,
            PixelFormat::R32Float,
            PixelFormat::R32Uint,
            PixelFormat::Rgba32Float,
            PixelFormat::D16Unorm,
            PixelFormat::D24UnormS8,
            PixelFormat::D32Float,
            PixelFormat::D32FloatS8,
        ];
        ALL.get(index).copied()
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::D16Unorm
                | PixelFormat::D24UnormS8
                | PixelFormat::D32Float
                | PixelFormat::D32FloatS8
        )
    }

    /// 是否带模板面
    pub fn has_stencil(&self) -> bool {
        matches!(self, PixelFormat::D24UnormS8 | PixelFormat::D32FloatS8)
    }

    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8Srgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Rg16Float
            | PixelFormat::R32Float
            | PixelFormat::R32Uint
            | PixelFormat::D24UnormS8
            | PixelFormat::D32Float => 4,
            PixelFormat::Rgba16Float | PixelFormat::D32FloatS8 => 8,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::D16Unorm => 2,
        }
    }
}

/// 多重采样数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleCount {
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl SampleCount {
    /// 采样数数值
    pub fn count(&self) -> u32 {
        match self {
            SampleCount::X1 => 1,
            SampleCount::X2 => 2,
            SampleCount::X4 => 4,
            SampleCount::X8 => 8,
            SampleCount::X16 => 16,
        }
    }
}

/// 附件装载行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadAction {
    /// 不关心旧内容
    DontCare,
    /// 保留旧内容
    Load,
    /// 清空为给定值
    Clear,
}

/// 队列能力种类
///
/// 屏障的同步范围由访问掩码与发出命令的队列能力共同决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// 图形队列（含计算 / 传输能力）
    Graphics,
    /// 计算队列
    Compute,
    /// 传输队列
    Transfer,
}

/// 三维范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3 {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3 {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }
}

/// 三维偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Offset3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// 子资源选择器
///
/// 屏障可以只作用于纹理的一部分 mip / 数组层。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// 覆盖给定 mip / 层数的完整范围
    pub fn whole(mip_count: u32, layer_count: u32) -> Self {
        Self {
            base_mip: 0,
            mip_count,
            base_layer: 0,
            layer_count,
        }
    }
}

/// 纹理身份 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// 缓冲身份 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// 采样器身份 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// 分配一个进程内唯一的资源 ID
///
/// 帧缓冲键和描述符脏检查都以 ID 作为资源身份，
/// 因此 ID 在资源销毁后不会复用。
pub fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

impl TextureId {
    pub fn generate() -> Self {
        Self(next_resource_id())
    }
}

impl BufferId {
    pub fn generate() -> Self {
        Self(next_resource_id())
    }
}

impl SamplerId {
    pub fn generate() -> Self {
        Self(next_resource_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_state_bits() {
        let shader = ResourceState::SHADER_RESOURCE;
        assert!(shader.contains(ResourceState::PIXEL_SHADER_RESOURCE));
        assert!(shader.contains(ResourceState::NON_PIXEL_SHADER_RESOURCE));

        let generic = ResourceState::GENERIC_READ;
        assert!(generic.contains(ResourceState::SHADER_RESOURCE));
        assert!(generic.contains(ResourceState::COPY_SOURCE));
        assert!(!generic.contains(ResourceState::RENDER_TARGET));
    }

    #[test]
    fn test_state_write_detection() {
        assert!(ResourceState::RENDER_TARGET.is_write());
        assert!(ResourceState::UNORDERED_ACCESS.is_write());
        assert!(!ResourceState::SHADER_RESOURCE.is_write());
        assert!(!ResourceState::GENERIC_READ.is_write());
    }

    #[test]
    fn test_pixel_format_properties() {
        assert!(PixelFormat::D24UnormS8.is_depth());
        assert!(PixelFormat::D24UnormS8.has_stencil());
        assert!(PixelFormat::D32Float.is_depth());
        assert!(!PixelFormat::D32Float.has_stencil());
        assert!(!PixelFormat::Rgba8Unorm.is_depth());

        assert_eq!(PixelFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::D16Unorm.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_format_index_roundtrip() {
        for i in 0..PIXEL_FORMAT_COUNT {
            let format = PixelFormat::from_index(i).unwrap();
            assert_eq!(format.index(), i);
        }
        assert!(PixelFormat::from_index(PIXEL_FORMAT_COUNT).is_none());
    }

    #[test]
    fn test_resource_ids_unique() {
        let a = TextureId::generate();
        let b = TextureId::generate();
        let c = BufferId::generate();
        assert_ne!(a, b);
        assert_ne!(a.0, c.0);
    }
}
