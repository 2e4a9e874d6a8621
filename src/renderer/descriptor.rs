//! 描述符绑定模型
//!
//! 提供统一的描述符集与描述符池管理，把后端无关的资源视图
//! 映射到各后端的本机描述符机制上。
//!
//! # 设计原则
//!
//! - **池化分配**：描述符存储按块增长，耗尽时补一个块并重试一次，
//!   只增不减；分配由单把互斥锁串行化，更新与绑定完全无锁
//! - **环形槽位**：一个描述符集是 N 个本机槽位组成的环，
//!   每个槽位配一份影子数组记录最近写入的资源
//! - **脏检查**：绑定同一个资源不会触发本机写入——本机描述符
//!   写入相对昂贵，身份比较几乎免费
//! - **局部容错**：类型不匹配只跳过出错的那一条绑定，
//!   同批次其余绑定照常生效

use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::core::error::{DescriptorError, PolyRenderError, Result};
use crate::renderer::backend_trait::GpuBackend;
use crate::renderer::resource::{BufferId, SamplerId, TextureId};
use crate::renderer::root_signature::{RootConstantRange, RootLayout};
use crate::renderer::shader::{DescriptorKind, UpdateFrequency};

/// 绑定到描述符上的资源引用
///
/// 身份 ID 参与脏检查：两次写入相同的 ID（及相同的视图参数）
/// 不会产生本机描述符写入。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    /// 缓冲区段
    Buffer {
        id: BufferId,
        offset: u64,
        range: u64,
    },
    /// 纹理视图；`mip` 为 None 表示完整 mip 链视图
    Texture { id: TextureId, mip: Option<u32> },
    /// 采样器
    Sampler { id: SamplerId },
}

impl BoundResource {
    /// 资源种类名称，用于错误信息
    pub fn kind_name(&self) -> &'static str {
        match self {
            BoundResource::Buffer { .. } => "buffer",
            BoundResource::Texture { .. } => "texture",
            BoundResource::Sampler { .. } => "sampler",
        }
    }

    /// 该资源是否能写入声明为 `kind` 的描述符
    pub fn matches_kind(&self, kind: DescriptorKind) -> bool {
        match self {
            BoundResource::Buffer { .. } => kind.is_buffer_like(),
            BoundResource::Texture { .. } => {
                matches!(kind, DescriptorKind::SampledImage | DescriptorKind::StorageImage)
            }
            BoundResource::Sampler { .. } => kind == DescriptorKind::Sampler,
        }
    }
}

/// 一条变化记录，交给后端执行本机写入
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite {
    /// 指向 `RootLayout::descriptors` 的下标
    pub descriptor_index: u32,
    /// 影子数组中的扁平下标
    pub flat_index: u32,
    /// 写入的资源
    pub resource: BoundResource,
}

/// 一条用户侧的绑定请求
///
/// 以资源名为键；数组资源一次给出全部元素。
#[derive(Debug, Clone)]
pub struct DescriptorBinding<'a> {
    /// 描述符名
    pub name: &'a str,
    /// 绑定的资源（数组资源按下标顺序排列）
    pub resources: Vec<BoundResource>,
    /// 整条 mip 链模式：把一张纹理展开成逐 mip 的绑定
    pub bind_mip_chain: bool,
    /// mip 链模式下的 mip 层数
    pub mip_count: u32,
}

impl<'a> DescriptorBinding<'a> {
    /// 绑定单个纹理（完整视图）
    pub fn texture(name: &'a str, id: TextureId) -> Self {
        Self {
            name,
            resources: vec![BoundResource::Texture { id, mip: None }],
            bind_mip_chain: false,
            mip_count: 0,
        }
    }

    /// 绑定纹理数组
    pub fn textures(name: &'a str, ids: &[TextureId]) -> Self {
        Self {
            name,
            resources: ids
                .iter()
                .map(|&id| BoundResource::Texture { id, mip: None })
                .collect(),
            bind_mip_chain: false,
            mip_count: 0,
        }
    }

    /// 把一张纹理按 mip 链展开绑定到数组描述符
    pub fn mip_chain(name: &'a str, id: TextureId, mip_count: u32) -> Self {
        Self {
            name,
            resources: vec![BoundResource::Texture { id, mip: None }],
            bind_mip_chain: true,
            mip_count,
        }
    }

    /// 绑定整个缓冲
    pub fn buffer(name: &'a str, id: BufferId) -> Self {
        Self {
            name,
            resources: vec![BoundResource::Buffer {
                id,
                offset: 0,
                range: u64::MAX,
            }],
            bind_mip_chain: false,
            mip_count: 0,
        }
    }

    /// 绑定缓冲区段
    pub fn buffer_range(name: &'a str, id: BufferId, offset: u64, range: u64) -> Self {
        Self {
            name,
            resources: vec![BoundResource::Buffer { id, offset, range }],
            bind_mip_chain: false,
            mip_count: 0,
        }
    }

    /// 绑定采样器
    pub fn sampler(name: &'a str, id: SamplerId) -> Self {
        Self {
            name,
            resources: vec![BoundResource::Sampler { id }],
            bind_mip_chain: false,
            mip_count: 0,
        }
    }
}

/// 根签名
///
/// 共享布局加上后端本机对象。构建一次、不可变、`Arc` 共享；
/// 描述符集和管线引用它而不拥有它。
pub struct RootSignature<B: GpuBackend> {
    /// 合并后的布局
    pub layout: Arc<RootLayout>,
    /// 本机对象
    pub native: B::Signature,
}

impl<B: GpuBackend> RootSignature<B> {
    /// 由布局创建本机根签名
    pub fn new(backend: &B, layout: Arc<RootLayout>) -> Result<Self> {
        let native = backend.prepare_signature(&layout)?;
        Ok(Self { layout, native })
    }

    /// 写入内联根常量
    ///
    /// `data` 的长度必须与声明的字节大小一致。
    pub fn push_constants(
        &self,
        backend: &B,
        cmd: &mut B::CommandList,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        let range = self
            .layout
            .root_constant(name)
            .ok_or_else(|| DescriptorError::UnknownResource(name.to_string()))?;
        if data.len() != range.size_bytes as usize {
            return Err(PolyRenderError::Runtime(format!(
                "Root constant '{}' expects {} bytes, got {}",
                name,
                range.size_bytes,
                data.len()
            )));
        }
        backend.push_root_constants(cmd, &self.native, range, data);
        Ok(())
    }

    /// 按名字查找根常量范围
    pub fn root_constant(&self, name: &str) -> Option<&RootConstantRange> {
        self.layout.root_constant(name)
    }
}

/// 描述符池
///
/// 拥有一个或多个后端描述符存储块；块耗尽时补一个新块
/// （同样的尺寸比例），从不收缩。同一设备的所有描述符集
/// 共享一个池；只有分配路径持锁。
pub struct DescriptorPool<B: GpuBackend> {
    sets_per_block: u32,
    blocks: Mutex<Vec<B::DescriptorBlock>>,
}

impl<B: GpuBackend> DescriptorPool<B> {
    /// 创建空池
    ///
    /// 第一个块在首次分配时才会创建。
    pub fn new(sets_per_block: u32) -> Self {
        Self {
            sets_per_block,
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// 当前块数（调试用）
    pub fn block_count(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// 分配一个带 `slot_count` 个槽位的描述符集
    ///
    /// 先在最新的块上尝试；失败则补一个新块并重试恰好一次，
    /// 仍然失败视为描述符内存耗尽（致命）。
    pub fn allocate(
        &self,
        backend: &B,
        signature: &Arc<RootSignature<B>>,
        frequency: UpdateFrequency,
        slot_count: u32,
    ) -> Result<DescriptorSet<B>> {
        let set_layout = signature.layout.set_layout(frequency);
        if set_layout.is_empty() {
            return Err(PolyRenderError::Runtime(format!(
                "Root signature has no descriptors at frequency {:?}",
                frequency
            )));
        }

        let mut blocks = self
            .blocks
            .lock()
            .map_err(|_| PolyRenderError::Runtime("descriptor pool mutex poisoned".into()))?;

        // 先在最新的块上尝试
        if let Some(block) = blocks.last_mut() {
            if let Ok(slots) =
                backend.allocate_descriptor_slots(block, &signature.native, frequency, slot_count)
            {
                return Ok(DescriptorSet::from_slots(signature.clone(), frequency, slots));
            }
        }

        // 扩容一个块，重试恰好一次（首个块也走这条路径）
        if !blocks.is_empty() {
            warn!(
                target: "polyrender::descriptor",
                sets_per_block = self.sets_per_block,
                "Descriptor pool exhausted, growing by one block"
            );
        }
        let mut block = backend.create_descriptor_block(self.sets_per_block)?;
        match backend.allocate_descriptor_slots(&mut block, &signature.native, frequency, slot_count)
        {
            Ok(slots) => {
                blocks.push(block);
                Ok(DescriptorSet::from_slots(signature.clone(), frequency, slots))
            }
            Err(_) => Err(DescriptorError::OutOfDescriptorMemory {
                requested: slot_count,
            }
            .into()),
        }
    }
}

/// 一次更新的结果统计
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOutcome {
    /// 实际写入的条目数
    pub written: usize,
    /// 因类型不匹配等原因跳过的绑定数
    pub skipped: usize,
    /// 本次是否发生了本机描述符写入
    pub wrote_native: bool,
}

struct SlotState<B: GpuBackend> {
    native: B::DescriptorSlot,
    shadow: Vec<Option<BoundResource>>,
}

/// 描述符集
///
/// N 个本机槽位组成的环，每个槽位对应一次 `update` 调用的目标。
/// 只能通过 `update` 修改；同一个集不允许并发更新。
pub struct DescriptorSet<B: GpuBackend> {
    signature: Arc<RootSignature<B>>,
    frequency: UpdateFrequency,
    slots: Vec<SlotState<B>>,
    native_writes: u64,
}

impl<B: GpuBackend> std::fmt::Debug for DescriptorSet<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("frequency", &self.frequency)
            .field("slot_count", &self.slots.len())
            .field("native_writes", &self.native_writes)
            .finish()
    }
}

impl<B: GpuBackend> DescriptorSet<B> {
    fn from_slots(
        signature: Arc<RootSignature<B>>,
        frequency: UpdateFrequency,
        natives: Vec<B::DescriptorSlot>,
    ) -> Self {
        let handle_count = signature.layout.set_layout(frequency).total_handles as usize;
        let slots = natives
            .into_iter()
            .map(|native| SlotState {
                native,
                shadow: vec![None; handle_count],
            })
            .collect();
        Self {
            signature,
            frequency,
            slots,
            native_writes: 0,
        }
    }

    /// 槽位数量
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// 所属的更新频率桶
    pub fn frequency(&self) -> UpdateFrequency {
        self.frequency
    }

    /// 累计发生的本机描述符写入次数
    pub fn native_write_count(&self) -> u64 {
        self.native_writes
    }

    /// 指定槽位最近写入的绑定内容（按扁平下标排列）
    ///
    /// 调试 / 校验用。
    pub fn written_bindings(&self, slot_index: u32) -> Option<&[Option<BoundResource>]> {
        self.slots.get(slot_index as usize).map(|s| s.shadow.as_slice())
    }

    /// 更新一个槽位的绑定
    ///
    /// 逐条校验绑定的资源种类与根签名声明是否一致；不一致的绑定
    /// 记一条错误日志后跳过，批次继续。只有与影子数组不同的条目
    /// 才会进入本机写入；整个槽位没有任何变化时不触碰本机描述符。
    pub fn update(
        &mut self,
        backend: &B,
        slot_index: u32,
        bindings: &[DescriptorBinding<'_>],
    ) -> Result<UpdateOutcome> {
        let slot_count = self.slots.len() as u32;
        if slot_index >= slot_count {
            return Err(DescriptorError::InvalidSlot {
                index: slot_index,
                count: slot_count,
            }
            .into());
        }

        let layout = self.signature.layout.clone();
        let slot = &mut self.slots[slot_index as usize];
        let mut changed: Vec<DescriptorWrite> = Vec::new();
        let mut skipped = 0usize;

        for binding in bindings {
            let (descriptor_index, info) = match layout.descriptor(binding.name) {
                Some(found) => found,
                None => {
                    error!(
                        target: "polyrender::descriptor",
                        name = binding.name,
                        "Unknown descriptor name, binding skipped"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let kind = info.resource.kind;
            if kind == DescriptorKind::RootConstant {
                error!(
                    target: "polyrender::descriptor",
                    name = binding.name,
                    "Root constants are pushed at bind time, not via descriptor update"
                );
                skipped += 1;
                continue;
            }
            if info.resource.frequency != self.frequency {
                error!(
                    target: "polyrender::descriptor",
                    name = binding.name,
                    expected = ?info.resource.frequency,
                    actual = ?self.frequency,
                    "Descriptor belongs to a different update frequency, binding skipped"
                );
                skipped += 1;
                continue;
            }

            // mip 链模式：一张纹理展开成逐 mip 的条目
            let expanded: Vec<BoundResource> = if binding.bind_mip_chain {
                match binding.resources.first() {
                    Some(&BoundResource::Texture { id, .. }) => (0..binding.mip_count)
                        .map(|m| BoundResource::Texture { id, mip: Some(m) })
                        .collect(),
                    _ => {
                        error!(
                            target: "polyrender::descriptor",
                            name = binding.name,
                            "Mip chain binding requires a texture resource"
                        );
                        skipped += 1;
                        continue;
                    }
                }
            } else {
                binding.resources.clone()
            };

            // 类型校验：整条绑定要么全部合法要么整条跳过
            if let Some(bad) = expanded.iter().find(|r| !r.matches_kind(kind)) {
                let mismatch = DescriptorError::TypeMismatch {
                    name: binding.name.to_string(),
                    expected: kind.name(),
                    actual: bad.kind_name(),
                };
                error!(target: "polyrender::descriptor", "{}", mismatch);
                skipped += 1;
                continue;
            }

            if expanded.len() as u32 > info.resource.array_size {
                error!(
                    target: "polyrender::descriptor",
                    name = binding.name,
                    array_size = info.resource.array_size,
                    provided = expanded.len(),
                    "Too many array elements, binding skipped"
                );
                skipped += 1;
                continue;
            }

            // 脏检查：只有身份变化的条目进入本机写入
            for (i, resource) in expanded.into_iter().enumerate() {
                let flat = (info.flat_base + i as u32) as usize;
                if slot.shadow[flat] != Some(resource) {
                    slot.shadow[flat] = Some(resource);
                    changed.push(DescriptorWrite {
                        descriptor_index,
                        flat_index: flat as u32,
                        resource,
                    });
                }
            }
        }

        let wrote_native = !changed.is_empty();
        if wrote_native {
            backend.write_descriptor_slot(
                &self.signature.native,
                &layout,
                self.frequency,
                slot.native,
                &slot.shadow,
                &changed,
            )?;
            self.native_writes += 1;
        }

        Ok(UpdateOutcome {
            written: changed.len(),
            skipped,
            wrote_native,
        })
    }

    /// 把指定槽位绑定到命令流
    pub fn bind(&self, backend: &B, cmd: &mut B::CommandList, slot_index: u32) -> Result<()> {
        let slot = self
            .slots
            .get(slot_index as usize)
            .ok_or(DescriptorError::InvalidSlot {
                index: slot_index,
                count: self.slots.len() as u32,
            })?;
        backend.bind_descriptor_slot(
            cmd,
            &self.signature.native,
            self.signature.layout.pipeline_kind(),
            self.frequency,
            slot.native,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::shader::{
        DescriptorKind, ShaderResource, ShaderStageFlags, StageReflection, UpdateFrequency,
    };
    use crate::renderer::testing::TestBackend;

    fn test_signature(backend: &TestBackend) -> Arc<RootSignature<TestBackend>> {
        let fs = StageReflection::new(
            ShaderStageFlags::FRAGMENT,
            vec![
                ShaderResource::new(
                    "albedo",
                    0,
                    UpdateFrequency::PerFrame,
                    DescriptorKind::SampledImage,
                    ShaderStageFlags::FRAGMENT,
                ),
                ShaderResource::new(
                    "mips",
                    1,
                    UpdateFrequency::PerFrame,
                    DescriptorKind::SampledImage,
                    ShaderStageFlags::FRAGMENT,
                )
                .with_array_size(8),
                ShaderResource::new(
                    "params",
                    2,
                    UpdateFrequency::PerFrame,
                    DescriptorKind::UniformBuffer,
                    ShaderStageFlags::FRAGMENT,
                ),
            ],
        );
        let layout = Arc::new(RootLayout::build(&[fs]).unwrap());
        Arc::new(RootSignature::new(backend, layout).unwrap())
    }

    #[test]
    fn test_pool_grows_on_exhaustion() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        // 每块 8 个集
        let pool = DescriptorPool::new(8);

        let set = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 8)
            .unwrap();
        assert_eq!(set.slot_count(), 8);
        assert_eq!(pool.block_count(), 1);

        // 第 9 个槽位触发扩容，一个新块，没有错误
        let set2 = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 1)
            .unwrap();
        assert_eq!(set2.slot_count(), 1);
        assert_eq!(pool.block_count(), 2);
    }

    #[test]
    fn test_pool_fatal_when_request_exceeds_block() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        let pool = DescriptorPool::new(4);

        // 单次请求超过块容量：扩容重试一次之后仍然失败
        let err = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 16)
            .unwrap_err();
        match err {
            PolyRenderError::Descriptor(DescriptorError::OutOfDescriptorMemory {
                requested,
            }) => assert_eq!(requested, 16),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_update_roundtrip_and_dirty_tracking() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        let pool = DescriptorPool::new(8);
        let mut set = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 2)
            .unwrap();

        let tex = TextureId::generate();
        let buf = BufferId::generate();

        let outcome = set
            .update(
                &backend,
                0,
                &[
                    DescriptorBinding::texture("albedo", tex),
                    DescriptorBinding::buffer("params", buf),
                ],
            )
            .unwrap();
        assert!(outcome.wrote_native);
        assert_eq!(outcome.written, 2);
        assert_eq!(set.native_write_count(), 1);

        // 回读最近写入的内容
        let shadow = set.written_bindings(0).unwrap();
        assert!(shadow
            .iter()
            .any(|r| *r == Some(BoundResource::Texture { id: tex, mip: None })));

        // 同样的资源再绑一次：没有本机写入
        let outcome = set
            .update(&backend, 0, &[DescriptorBinding::texture("albedo", tex)])
            .unwrap();
        assert!(!outcome.wrote_native);
        assert_eq!(set.native_write_count(), 1);

        // 换一张纹理：重新写入
        let tex2 = TextureId::generate();
        let outcome = set
            .update(&backend, 0, &[DescriptorBinding::texture("albedo", tex2)])
            .unwrap();
        assert!(outcome.wrote_native);
        assert_eq!(set.native_write_count(), 2);

        // 不同槽位互不影响
        let outcome = set
            .update(&backend, 1, &[DescriptorBinding::texture("albedo", tex2)])
            .unwrap();
        assert!(outcome.wrote_native);
    }

    #[test]
    fn test_type_mismatch_skips_only_offender() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        let pool = DescriptorPool::new(8);
        let mut set = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 1)
            .unwrap();

        let tex = TextureId::generate();
        let buf = BufferId::generate();

        // albedo 期望纹理却给了缓冲：只跳过这一条
        let outcome = set
            .update(
                &backend,
                0,
                &[
                    DescriptorBinding::buffer("albedo", buf),
                    DescriptorBinding::buffer("params", buf),
                    DescriptorBinding::texture("unknown_name", tex),
                ],
            )
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.written, 1);
        assert!(outcome.wrote_native);

        // albedo 没有被写入
        let shadow = set.written_bindings(0).unwrap();
        assert!(!shadow
            .iter()
            .any(|r| matches!(r, Some(BoundResource::Texture { .. }))));
    }

    #[test]
    fn test_mip_chain_expansion() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        let pool = DescriptorPool::new(8);
        let mut set = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 1)
            .unwrap();

        let tex = TextureId::generate();
        let outcome = set
            .update(&backend, 0, &[DescriptorBinding::mip_chain("mips", tex, 5)])
            .unwrap();
        assert_eq!(outcome.written, 5);

        let shadow = set.written_bindings(0).unwrap();
        for m in 0..5u32 {
            assert!(shadow
                .iter()
                .any(|r| *r == Some(BoundResource::Texture { id: tex, mip: Some(m) })));
        }
    }

    #[test]
    fn test_invalid_slot_index() {
        let backend = TestBackend::new();
        let signature = test_signature(&backend);
        let pool = DescriptorPool::new(8);
        let mut set = pool
            .allocate(&backend, &signature, UpdateFrequency::PerFrame, 2)
            .unwrap();

        let tex = TextureId::generate();
        let err = set
            .update(&backend, 5, &[DescriptorBinding::texture("albedo", tex)])
            .unwrap_err();
        assert!(matches!(
            err,
            PolyRenderError::Descriptor(DescriptorError::InvalidSlot { index: 5, count: 2 })
        ));
    }
}
