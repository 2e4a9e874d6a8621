//! 根签名布局模块
//!
//! 把多个着色器阶段的反射结果合并为一份去重的描述符布局。
//! 合并规则：
//!
//! - 同名资源视为同一资源，阶段掩码取并集
//! - 同名资源在绑定槽位、更新频率或种类上不一致是硬错误，
//!   不会构建出任何部分结果
//! - 资源按更新频率分桶，每个非空桶对应一张本机绑定表；
//!   桶内图像类资源排在缓冲类之前，同类按槽位从大到小排列，
//!   这样逐绘制更新时尽量少切换本机绑定表
//! - 根常量不占描述符，单独记录字节偏移 / 大小 / 阶段掩码
//!
//! 布局本身是纯数据，构建一次之后不可变；本机对象
//! （描述符集布局、管线布局等）由各后端依据布局另行创建。

use std::collections::HashMap;

use crate::core::error::{Result, SignatureError};
use crate::renderer::shader::{
    DescriptorKind, ShaderResource, ShaderStageFlags, StageReflection, UpdateFrequency,
    UPDATE_FREQUENCY_COUNT,
};

/// 管线种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// 合并后的描述符记录
#[derive(Debug, Clone)]
pub struct DescriptorInfo {
    /// 合并后的资源声明（阶段掩码已取并集）
    pub resource: ShaderResource,
    /// 在所属绑定表的影子数组中的扁平起始下标
    ///
    /// 图像类句柄排在缓冲类之前；数组资源占用连续的
    /// `array_size` 个下标。根常量不占下标，恒为 0。
    pub flat_base: u32,
    /// 在所属绑定表中的位置（根常量为 None）
    pub index_in_table: Option<u32>,
}

/// 单个更新频率桶的绑定表布局
#[derive(Debug, Clone, Default)]
pub struct SetLayout {
    /// 表内描述符（指向 `RootLayout::descriptors` 的下标），已按表序排列
    pub descriptor_indices: Vec<u32>,
    /// 句柄总数（各描述符 array_size 之和）
    pub total_handles: u32,
    /// 图像类句柄数
    pub image_handles: u32,
    /// 缓冲类句柄数
    pub buffer_handles: u32,
}

impl SetLayout {
    /// 该桶是否没有任何描述符
    pub fn is_empty(&self) -> bool {
        self.descriptor_indices.is_empty()
    }
}

/// 根常量范围
#[derive(Debug, Clone)]
pub struct RootConstantRange {
    /// 指向 `RootLayout::descriptors` 的下标
    pub descriptor_index: u32,
    /// 在根常量区中的字节偏移
    pub offset_bytes: u32,
    /// 字节大小
    pub size_bytes: u32,
    /// 可见阶段
    pub stages: ShaderStageFlags,
}

/// 根签名布局
///
/// 管线装配期构建一次，此后不可变。描述符集与管线
/// 持有对它的引用（`Arc`），不拥有它。
#[derive(Debug)]
pub struct RootLayout {
    descriptors: Vec<DescriptorInfo>,
    name_to_index: HashMap<String, u32>,
    set_layouts: [SetLayout; UPDATE_FREQUENCY_COUNT],
    root_constants: Vec<RootConstantRange>,
    pipeline_kind: PipelineKind,
}

impl RootLayout {
    /// 从若干阶段的反射结果构建布局
    ///
    /// 同名资源冲突返回 `SignatureError::Conflict`，此时什么也不会构建。
    pub fn build(reflections: &[StageReflection]) -> Result<Self> {
        let mut descriptors: Vec<DescriptorInfo> = Vec::new();
        let mut name_to_index: HashMap<String, u32> = HashMap::new();
        let mut pipeline_kind = PipelineKind::Graphics;

        // 按名字合并所有阶段的资源
        for reflection in reflections {
            if reflection.stage.contains(ShaderStageFlags::COMPUTE) {
                pipeline_kind = PipelineKind::Compute;
            }

            for res in &reflection.resources {
                match name_to_index.get(&res.name) {
                    None => {
                        let mut merged = res.clone();
                        merged.stages |= reflection.stage;
                        name_to_index.insert(res.name.clone(), descriptors.len() as u32);
                        descriptors.push(DescriptorInfo {
                            resource: merged,
                            flat_base: 0,
                            index_in_table: None,
                        });
                    }
                    Some(&index) => {
                        let existing = &mut descriptors[index as usize].resource;
                        Self::check_merge(existing, res)?;
                        existing.stages |= res.stages | reflection.stage;
                        existing.array_size = existing.array_size.max(res.array_size);
                    }
                }
            }
        }

        if descriptors.is_empty() {
            return Err(SignatureError::Empty.into());
        }

        // 分桶并排序：图像类在前，同类按槽位降序
        let mut set_layouts: [SetLayout; UPDATE_FREQUENCY_COUNT] = Default::default();
        let mut root_constants = Vec::new();
        let mut constant_offset = 0u32;

        for set_index in 0..UPDATE_FREQUENCY_COUNT {
            let frequency = UpdateFrequency::from_set_index(set_index).unwrap();
            let mut members: Vec<u32> = descriptors
                .iter()
                .enumerate()
                .filter(|(_, d)| {
                    d.resource.kind != DescriptorKind::RootConstant
                        && d.resource.frequency == frequency
                })
                .map(|(i, _)| i as u32)
                .collect();

            members.sort_by(|&a, &b| {
                let da = &descriptors[a as usize].resource;
                let db = &descriptors[b as usize].resource;
                let class = |k: DescriptorKind| u8::from(k.is_buffer_like());
                class(da.kind)
                    .cmp(&class(db.kind))
                    .then(db.binding.cmp(&da.binding))
            });

            let layout = &mut set_layouts[set_index];
            for (table_pos, &desc_index) in members.iter().enumerate() {
                let info = &mut descriptors[desc_index as usize];
                let array_size = info.resource.array_size;
                info.index_in_table = Some(table_pos as u32);
                if info.resource.kind.is_buffer_like() {
                    info.flat_base = layout.buffer_handles;
                    layout.buffer_handles += array_size;
                } else {
                    info.flat_base = layout.image_handles;
                    layout.image_handles += array_size;
                }
                layout.total_handles += array_size;
            }
            layout.descriptor_indices = members;
        }

        // 缓冲类句柄整体排在图像类之后，补上基准偏移
        for layout in &set_layouts {
            for &desc_index in &layout.descriptor_indices {
                let info = &mut descriptors[desc_index as usize];
                if info.resource.kind.is_buffer_like() {
                    info.flat_base += layout.image_handles;
                }
            }
        }

        // 根常量单独记账，偏移按发现顺序累加
        for (i, info) in descriptors.iter().enumerate() {
            if info.resource.kind == DescriptorKind::RootConstant {
                root_constants.push(RootConstantRange {
                    descriptor_index: i as u32,
                    offset_bytes: constant_offset,
                    size_bytes: info.resource.size_bytes,
                    stages: info.resource.stages,
                });
                constant_offset += info.resource.size_bytes;
            }
        }

        Ok(Self {
            descriptors,
            name_to_index,
            set_layouts,
            root_constants,
            pipeline_kind,
        })
    }

    fn check_merge(existing: &ShaderResource, incoming: &ShaderResource) -> Result<()> {
        if existing.binding != incoming.binding {
            return Err(SignatureError::Conflict {
                name: existing.name.clone(),
                field: "binding",
            }
            .into());
        }
        if existing.frequency != incoming.frequency {
            return Err(SignatureError::Conflict {
                name: existing.name.clone(),
                field: "frequency",
            }
            .into());
        }
        if existing.kind != incoming.kind {
            return Err(SignatureError::Conflict {
                name: existing.name.clone(),
                field: "kind",
            }
            .into());
        }
        if existing.kind == DescriptorKind::RootConstant
            && existing.size_bytes != incoming.size_bytes
        {
            return Err(SignatureError::Conflict {
                name: existing.name.clone(),
                field: "size",
            }
            .into());
        }
        Ok(())
    }

    /// 按名字查找描述符
    pub fn descriptor(&self, name: &str) -> Option<(u32, &DescriptorInfo)> {
        self.name_to_index
            .get(name)
            .map(|&i| (i, &self.descriptors[i as usize]))
    }

    /// 按下标取描述符
    pub fn descriptor_by_index(&self, index: u32) -> &DescriptorInfo {
        &self.descriptors[index as usize]
    }

    /// 所有合并后的描述符
    pub fn descriptors(&self) -> &[DescriptorInfo] {
        &self.descriptors
    }

    /// 指定频率桶的绑定表布局
    pub fn set_layout(&self, frequency: UpdateFrequency) -> &SetLayout {
        &self.set_layouts[frequency.set_index()]
    }

    /// 全部根常量范围
    pub fn root_constants(&self) -> &[RootConstantRange] {
        &self.root_constants
    }

    /// 按名字查找根常量
    pub fn root_constant(&self, name: &str) -> Option<&RootConstantRange> {
        let (index, _) = self.descriptor(name)?;
        self.root_constants
            .iter()
            .find(|rc| rc.descriptor_index == index)
    }

    /// 管线种类
    pub fn pipeline_kind(&self) -> PipelineKind {
        self.pipeline_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PolyRenderError;

    fn sampled(name: &str, binding: u32, freq: UpdateFrequency) -> ShaderResource {
        ShaderResource::new(
            name,
            binding,
            freq,
            DescriptorKind::SampledImage,
            ShaderStageFlags::empty(),
        )
    }

    fn uniform(name: &str, binding: u32, freq: UpdateFrequency) -> ShaderResource {
        ShaderResource::new(
            name,
            binding,
            freq,
            DescriptorKind::UniformBuffer,
            ShaderStageFlags::empty(),
        )
    }

    #[test]
    fn test_merge_same_resource_across_stages() {
        // 两个阶段都声明 albedo：槽位 2、频率 PerFrame、采样纹理
        let vs = StageReflection::new(
            ShaderStageFlags::VERTEX,
            vec![sampled("albedo", 2, UpdateFrequency::PerFrame)],
        );
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![sampled("albedo", 2, UpdateFrequency::PerFrame)],
        );

        let layout = RootLayout::build(&[vs, fs]).unwrap();
        let (_, info) = layout.descriptor("albedo").unwrap();
        // 阶段掩码取并集
        assert!(info.resource.stages.contains(ShaderStageFlags::VERTEX));
        assert!(info.resource.stages.contains(ShaderStageFlags::FRAGMENT));
        assert_eq!(layout.descriptors().len(), 1);
    }

    #[test]
    fn test_conflicting_binding_fails() {
        let vs = StageReflection::new(
            ShaderStageFlags::VERTEX,
            vec![sampled("albedo", 2, UpdateFrequency::PerFrame)],
        );
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![sampled("albedo", 3, UpdateFrequency::PerFrame)],
        );

        match RootLayout::build(&[vs, fs]) {
            Err(PolyRenderError::Signature(SignatureError::Conflict { name, field })) => {
                assert_eq!(name, "albedo");
                assert_eq!(field, "binding");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_kind_fails() {
        let vs = StageReflection::new(
            ShaderStageFlags::VERTEX,
            vec![sampled("data", 0, UpdateFrequency::PerFrame)],
        );
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![uniform("data", 0, UpdateFrequency::PerFrame)],
        );
        assert!(RootLayout::build(&[vs, fs]).is_err());
    }

    #[test]
    fn test_table_ordering_images_before_buffers() {
        // 同一频率桶：两个缓冲、两个纹理，槽位交错
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![
                uniform("cb_low", 0, UpdateFrequency::PerDraw),
                sampled("tex_low", 1, UpdateFrequency::PerDraw),
                uniform("cb_high", 2, UpdateFrequency::PerDraw),
                sampled("tex_high", 3, UpdateFrequency::PerDraw),
            ],
        );

        let layout = RootLayout::build(&[fs]).unwrap();
        let table = layout.set_layout(UpdateFrequency::PerDraw);
        let names: Vec<&str> = table
            .descriptor_indices
            .iter()
            .map(|&i| layout.descriptor_by_index(i).resource.name.as_str())
            .collect();
        // 图像类在前、槽位降序；缓冲类在后、槽位降序
        assert_eq!(names, vec!["tex_high", "tex_low", "cb_high", "cb_low"]);
        assert_eq!(table.image_handles, 2);
        assert_eq!(table.buffer_handles, 2);
        assert_eq!(table.total_handles, 4);
    }

    #[test]
    fn test_flat_indices_split_by_class() {
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![
                uniform("cb", 0, UpdateFrequency::PerFrame),
                sampled("tex_a", 1, UpdateFrequency::PerFrame).with_array_size(3),
                sampled("tex_b", 2, UpdateFrequency::PerFrame),
            ],
        );

        let layout = RootLayout::build(&[fs]).unwrap();
        let (_, tex_b) = layout.descriptor("tex_b").unwrap();
        let (_, tex_a) = layout.descriptor("tex_a").unwrap();
        let (_, cb) = layout.descriptor("cb").unwrap();

        // tex_b 槽位更高排在最前，tex_a 数组占 3 个句柄
        assert_eq!(tex_b.flat_base, 0);
        assert_eq!(tex_a.flat_base, 1);
        // 缓冲类句柄从图像句柄之后开始
        assert_eq!(cb.flat_base, 4);

        let table = layout.set_layout(UpdateFrequency::PerFrame);
        assert_eq!(table.total_handles, 5);
    }

    #[test]
    fn test_root_constants_tracked_separately() {
        let vs = StageReflection::new(
            ShaderStageFlags::VERTEX,
            vec![
                ShaderResource::root_constant("push_a", 16, ShaderStageFlags::VERTEX),
                uniform("cb", 0, UpdateFrequency::None),
            ],
        );
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![ShaderResource::root_constant("push_b", 8, ShaderStageFlags::FRAGMENT)],
        );

        let layout = RootLayout::build(&[vs, fs]).unwrap();
        assert_eq!(layout.root_constants().len(), 2);

        let a = layout.root_constant("push_a").unwrap();
        let b = layout.root_constant("push_b").unwrap();
        assert_eq!(a.offset_bytes, 0);
        assert_eq!(a.size_bytes, 16);
        assert_eq!(b.offset_bytes, 16);
        assert_eq!(b.size_bytes, 8);

        // 根常量不占绑定表句柄
        let table = layout.set_layout(UpdateFrequency::None);
        assert_eq!(table.total_handles, 1);
    }

    #[test]
    fn test_empty_reflection_fails() {
        let vs = StageReflection::new(ShaderStageFlags::VERTEX, vec![]);
        assert!(RootLayout::build(&[vs]).is_err());
    }

    #[test]
    fn test_compute_pipeline_kind() {
        let cs = StageReflection::new(
            ShaderStageFlags::COMPUTE,
            vec![uniform("params", 0, UpdateFrequency::PerFrame)],
        );
        let layout = RootLayout::build(&[cs]).unwrap();
        assert_eq!(layout.pipeline_kind(), PipelineKind::Compute);
    }
}
