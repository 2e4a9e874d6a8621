//! 着色器反射数据模块
//!
//! 定义根签名构建所消费的输入：每个着色器阶段反射出的资源列表。
//! 反射本身（字节码解析）由外部工具完成，不在本层范围内。

use bitflags::bitflags;

bitflags! {
    /// 着色器阶段掩码
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x1;
        const TESSELLATION_CONTROL = 0x2;
        const TESSELLATION_EVALUATION = 0x4;
        const GEOMETRY = 0x8;
        const FRAGMENT = 0x10;
        const COMPUTE = 0x20;
    }
}

/// 描述符种类
///
/// 决定资源在绑定表中的归类（图像类在前、缓冲类在后）
/// 以及更新时的类型校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// 常量（uniform）缓冲
    UniformBuffer,
    /// 可读写存储缓冲
    StorageBuffer,
    /// 采样纹理
    SampledImage,
    /// 可读写存储纹理
    StorageImage,
    /// 采样器
    Sampler,
    /// 内联根常量（不占描述符）
    RootConstant,
}

impl DescriptorKind {
    /// 种类名称，用于日志和错误信息
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorKind::UniformBuffer => "uniform buffer",
            DescriptorKind::StorageBuffer => "storage buffer",
            DescriptorKind::SampledImage => "sampled image",
            DescriptorKind::StorageImage => "storage image",
            DescriptorKind::Sampler => "sampler",
            DescriptorKind::RootConstant => "root constant",
        }
    }

    /// 是否属于缓冲类描述符
    pub fn is_buffer_like(&self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer
        )
    }

    /// 是否属于图像类描述符（采样器与图像共用句柄数组）
    pub fn is_image_like(&self) -> bool {
        matches!(
            self,
            DescriptorKind::SampledImage | DescriptorKind::StorageImage | DescriptorKind::Sampler
        )
    }
}

/// 描述符更新频率
///
/// 频率序号即绑定表（set）序号。按更新频率分桶可以让
/// 逐绘制更新只触碰最小的绑定表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateFrequency {
    /// 设备生命周期内不变
    None = 0,
    /// 每帧更新
    PerFrame = 1,
    /// 每批次更新
    PerBatch = 2,
    /// 每次绘制更新
    PerDraw = 3,
}

/// 更新频率桶的数量
pub const UPDATE_FREQUENCY_COUNT: usize = 4;

impl UpdateFrequency {
    /// 频率对应的绑定表序号
    pub fn set_index(&self) -> usize {
        *self as usize
    }

    /// 按序号反查频率
    pub fn from_set_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(UpdateFrequency::None),
            1 => Some(UpdateFrequency::PerFrame),
            2 => Some(UpdateFrequency::PerBatch),
            3 => Some(UpdateFrequency::PerDraw),
            _ => None,
        }
    }
}

/// 单个着色器资源声明
///
/// 由反射工具从字节码中提取。跨阶段同名的资源会在
/// 根签名构建时合并为一条记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderResource {
    /// 资源名（跨阶段合并的键）
    pub name: String,
    /// 绑定槽位
    pub binding: u32,
    /// 更新频率（绑定表序号）
    pub frequency: UpdateFrequency,
    /// 数组长度（非数组为 1）
    pub array_size: u32,
    /// 描述符种类
    pub kind: DescriptorKind,
    /// 声明该资源的阶段
    pub stages: ShaderStageFlags,
    /// 字节大小（仅根常量使用）
    pub size_bytes: u32,
}

impl ShaderResource {
    /// 便捷构造：普通描述符资源
    pub fn new(
        name: impl Into<String>,
        binding: u32,
        frequency: UpdateFrequency,
        kind: DescriptorKind,
        stages: ShaderStageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            binding,
            frequency,
            array_size: 1,
            kind,
            stages,
            size_bytes: 0,
        }
    }

    /// 便捷构造：根常量
    pub fn root_constant(
        name: impl Into<String>,
        size_bytes: u32,
        stages: ShaderStageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            binding: 0,
            frequency: UpdateFrequency::None,
            array_size: 1,
            kind: DescriptorKind::RootConstant,
            stages,
            size_bytes,
        }
    }

    /// 设置数组长度
    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }
}

/// 单个着色器阶段的反射结果
#[derive(Debug, Clone)]
pub struct StageReflection {
    /// 阶段掩码（单一阶段）
    pub stage: ShaderStageFlags,
    /// 该阶段声明的资源
    pub resources: Vec<ShaderResource>,
}

impl StageReflection {
    pub fn new(stage: ShaderStageFlags, resources: Vec<ShaderResource>) -> Self {
        Self { stage, resources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_kind_classification() {
        assert!(DescriptorKind::UniformBuffer.is_buffer_like());
        assert!(DescriptorKind::StorageBuffer.is_buffer_like());
        assert!(DescriptorKind::SampledImage.is_image_like());
        assert!(DescriptorKind::Sampler.is_image_like());
        assert!(!DescriptorKind::RootConstant.is_buffer_like());
        assert!(!DescriptorKind::RootConstant.is_image_like());
    }

    #[test]
    fn test_update_frequency_roundtrip() {
        for i in 0..UPDATE_FREQUENCY_COUNT {
            let freq = UpdateFrequency::from_set_index(i).unwrap();
            assert_eq!(freq.set_index(), i);
        }
        assert!(UpdateFrequency::from_set_index(4).is_none());
    }

    #[test]
    fn test_shader_resource_builder() {
        let res = ShaderResource::new(
            "albedo",
            2,
            UpdateFrequency::PerFrame,
            DescriptorKind::SampledImage,
            ShaderStageFlags::FRAGMENT,
        )
        .with_array_size(4);
        assert_eq!(res.array_size, 4);
        assert_eq!(res.size_bytes, 0);

        let pc = ShaderResource::root_constant("push", 16, ShaderStageFlags::VERTEX);
        assert_eq!(pc.kind, DescriptorKind::RootConstant);
        assert_eq!(pc.size_bytes, 16);
    }
}
