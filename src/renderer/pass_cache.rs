//! 渲染通道 / 帧缓冲缓存
//!
//! 两层缓存：渲染通道按抽象的附件形状（格式、采样数、装载行为）记忆化，
//! 帧缓冲按具体的附件身份（纹理 ID + mip / 切片选择）记忆化——
//! 多个帧缓冲可以共享同一个通道对象。
//!
//! 缓存属于各自的录制上下文（`RenderContext`），一个录制线程一个
//! 上下文，稳态查找完全无锁；代价是同一个逻辑通道可能在每个上下文
//! 各构建一份，这是刻意的内存换时间。上下文只在创建时经过设备注册表
//! 的一次加锁。
//!
//! 通道 / 帧缓冲对象一经创建即不可变，由 `Arc` 引用计数，
//! 生命周期与设备相同；跨上下文不保证引用同一性。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::core::error::{PolyRenderError, Result};
use crate::renderer::backend_trait::GpuBackend;
use crate::renderer::resource::{Extent3, LoadAction, PixelFormat, SampleCount, TextureId};

/// 颜色附件的形状键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorAttachmentKey {
    pub format: PixelFormat,
    pub sample_count: SampleCount,
    pub load_action: LoadAction,
}

/// 深度模板附件的形状键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthAttachmentKey {
    pub format: PixelFormat,
    pub sample_count: SampleCount,
    pub depth_load: LoadAction,
    pub stencil_load: LoadAction,
}

/// 渲染通道键：附件形状的全量描述
///
/// 查找按内容哈希进行，哈希碰撞由键的相等比较兜底
/// （标准哈希表语义）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderPassKey {
    pub color: Vec<ColorAttachmentKey>,
    pub depth: Option<DepthAttachmentKey>,
}

impl RenderPassKey {
    /// 由具体附件与装载行为推导形状键
    pub fn from_attachments(desc: &FrameBufferDesc, load: &LoadActions) -> Self {
        let color = desc
            .color
            .iter()
            .enumerate()
            .map(|(i, view)| ColorAttachmentKey {
                format: view.format,
                sample_count: view.sample_count,
                load_action: load.color_action(i),
            })
            .collect();
        let depth = desc.depth.as_ref().map(|view| DepthAttachmentKey {
            format: view.format,
            sample_count: view.sample_count,
            depth_load: load.depth_action,
            stencil_load: load.stencil_action,
        });
        Self { color, depth }
    }

    /// 附件总数（含深度）
    pub fn attachment_count(&self) -> usize {
        self.color.len() + usize::from(self.depth.is_some())
    }
}

/// 一个具体的附件视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentView {
    /// 附件纹理的身份
    pub texture: TextureId,
    pub format: PixelFormat,
    pub sample_count: SampleCount,
    /// 渲染到哪一层 mip
    pub mip: u32,
    /// 渲染到哪一个数组切片
    pub slice: u32,
}

impl AttachmentView {
    pub fn new(texture: TextureId, format: PixelFormat) -> Self {
        Self {
            texture,
            format,
            sample_count: SampleCount::X1,
            mip: 0,
            slice: 0,
        }
    }

    pub fn with_mip(mut self, mip: u32) -> Self {
        self.mip = mip;
        self
    }

    pub fn with_slice(mut self, slice: u32) -> Self {
        self.slice = slice;
        self
    }
}

/// 帧缓冲描述：具体的附件组合
#[derive(Debug, Clone, Default)]
pub struct FrameBufferDesc {
    pub color: Vec<AttachmentView>,
    pub depth: Option<AttachmentView>,
    pub extent: Extent3,
}

/// 帧缓冲键：附件身份（不是格式）加 mip / 切片选择
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameBufferKey {
    color: Vec<(TextureId, u32, u32)>,
    depth: Option<(TextureId, u32, u32)>,
}

impl FrameBufferKey {
    /// 由帧缓冲描述提取身份键
    pub fn from_desc(desc: &FrameBufferDesc) -> Self {
        Self {
            color: desc
                .color
                .iter()
                .map(|v| (v.texture, v.mip, v.slice))
                .collect(),
            depth: desc.depth.as_ref().map(|v| (v.texture, v.mip, v.slice)),
        }
    }
}

/// 单个颜色附件的装载行为与清空值
#[derive(Debug, Clone, Copy)]
pub struct ColorLoad {
    pub action: LoadAction,
    pub clear: [f32; 4],
}

/// 一次 begin_rendering 的装载行为集合
#[derive(Debug, Clone)]
pub struct LoadActions {
    pub color: Vec<ColorLoad>,
    pub depth_action: LoadAction,
    pub stencil_action: LoadAction,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl Default for LoadActions {
    fn default() -> Self {
        Self {
            color: Vec::new(),
            depth_action: LoadAction::DontCare,
            stencil_action: LoadAction::DontCare,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

impl LoadActions {
    /// 所有颜色附件都清空为给定颜色
    pub fn clear_all(count: usize, clear: [f32; 4]) -> Self {
        Self {
            color: vec![
                ColorLoad {
                    action: LoadAction::Clear,
                    clear,
                };
                count
            ],
            ..Default::default()
        }
    }

    /// 第 `index` 个颜色附件的装载行为（未指定时为 DontCare）
    pub fn color_action(&self, index: usize) -> LoadAction {
        self.color
            .get(index)
            .map(|c| c.action)
            .unwrap_or(LoadAction::DontCare)
    }
}

/// 录制上下文注册表
///
/// 设备持有；上下文在创建时经过这里的一次加锁，
/// 之后所有缓存查找都发生在上下文私有的映射里。
pub struct ContextRegistry {
    next_id: Mutex<u32>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
        }
    }

    fn register(&self) -> Result<u32> {
        let mut next = self
            .next_id
            .lock()
            .map_err(|_| PolyRenderError::Runtime("context registry mutex poisoned".into()))?;
        let id = *next;
        *next += 1;
        Ok(id)
    }

    /// 已创建的上下文数量
    pub fn context_count(&self) -> u32 {
        self.next_id.lock().map(|n| *n).unwrap_or(0)
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 录制上下文
///
/// 每个录制线程一个；拥有该线程的通道 / 帧缓冲缓存。
pub struct RenderContext<B: GpuBackend> {
    id: u32,
    passes: HashMap<RenderPassKey, Arc<B::RenderPass>>,
    frame_buffers: HashMap<FrameBufferKey, Arc<B::FrameBuffer>>,
}

impl<B: GpuBackend> RenderContext<B> {
    /// 通过注册表物化一个新的上下文（唯一一次加锁）
    pub fn new(registry: &ContextRegistry) -> Result<Self> {
        let id = registry.register()?;
        Ok(Self {
            id,
            passes: HashMap::new(),
            frame_buffers: HashMap::new(),
        })
    }

    /// 上下文序号
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 已缓存的通道数量
    pub fn render_pass_count(&self) -> usize {
        self.passes.len()
    }

    /// 已缓存的帧缓冲数量
    pub fn frame_buffer_count(&self) -> usize {
        self.frame_buffers.len()
    }

    /// 查找或创建给定形状的渲染通道
    ///
    /// 命中时直接返回缓存的对象；未命中时创建后插入本上下文的
    /// 私有映射，无需加锁。
    pub fn get_or_create_render_pass(
        &mut self,
        backend: &B,
        key: &RenderPassKey,
    ) -> Result<Arc<B::RenderPass>> {
        if let Some(pass) = self.passes.get(key) {
            return Ok(pass.clone());
        }
        debug!(
            target: "polyrender::pass_cache",
            context = self.id,
            attachments = key.attachment_count(),
            "Creating render pass"
        );
        let pass = Arc::new(backend.create_render_pass(key)?);
        self.passes.insert(key.clone(), pass.clone());
        Ok(pass)
    }

    /// 查找或创建给定附件组合的帧缓冲
    pub fn get_or_create_frame_buffer(
        &mut self,
        backend: &B,
        desc: &FrameBufferDesc,
        load: &LoadActions,
    ) -> Result<(Arc<B::RenderPass>, Arc<B::FrameBuffer>)> {
        let pass_key = RenderPassKey::from_attachments(desc, load);
        let pass = self.get_or_create_render_pass(backend, &pass_key)?;

        let fb_key = FrameBufferKey::from_desc(desc);
        if let Some(fb) = self.frame_buffers.get(&fb_key) {
            return Ok((pass, fb.clone()));
        }
        debug!(
            target: "polyrender::pass_cache",
            context = self.id,
            "Creating frame buffer"
        );
        let fb = Arc::new(backend.create_frame_buffer(&pass, desc)?);
        self.frame_buffers.insert(fb_key, fb.clone());
        Ok((pass, fb))
    }

    /// 开始向给定附件渲染
    ///
    /// 隐式完成两级缓存查找并开启通道。
    pub fn begin_rendering(
        &mut self,
        backend: &B,
        cmd: &mut B::CommandList,
        desc: &FrameBufferDesc,
        load: &LoadActions,
    ) -> Result<()> {
        let (pass, fb) = self.get_or_create_frame_buffer(backend, desc, load)?;
        backend.cmd_begin_pass(cmd, &pass, &fb, load);
        Ok(())
    }

    /// 结束当前通道
    pub fn end_rendering(&self, backend: &B, cmd: &mut B::CommandList) {
        backend.cmd_end_pass(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::TestBackend;

    fn color_target(format: PixelFormat) -> AttachmentView {
        AttachmentView::new(TextureId::generate(), format)
    }

    fn simple_desc(view: AttachmentView) -> FrameBufferDesc {
        FrameBufferDesc {
            color: vec![view],
            depth: None,
            extent: Extent3::new(128, 128, 1),
        }
    }

    #[test]
    fn test_same_key_same_object() {
        let backend = TestBackend::new();
        let registry = ContextRegistry::new();
        let mut ctx = RenderContext::<TestBackend>::new(&registry).unwrap();

        let key = RenderPassKey {
            color: vec![ColorAttachmentKey {
                format: PixelFormat::Rgba8Unorm,
                sample_count: SampleCount::X1,
                load_action: LoadAction::Clear,
            }],
            depth: None,
        };

        let a = ctx.get_or_create_render_pass(&backend, &key).unwrap();
        let b = ctx.get_or_create_render_pass(&backend, &key).unwrap();
        // 同一个上下文内：同键同对象
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ctx.render_pass_count(), 1);
    }

    #[test]
    fn test_contexts_build_independent_objects_with_equal_shape() {
        let backend = TestBackend::new();
        let registry = ContextRegistry::new();
        let mut ctx1 = RenderContext::<TestBackend>::new(&registry).unwrap();
        let mut ctx2 = RenderContext::<TestBackend>::new(&registry).unwrap();
        assert_eq!(registry.context_count(), 2);

        let key = RenderPassKey {
            color: vec![ColorAttachmentKey {
                format: PixelFormat::Rgba16Float,
                sample_count: SampleCount::X4,
                load_action: LoadAction::Load,
            }],
            depth: None,
        };

        let a = ctx1.get_or_create_render_pass(&backend, &key).unwrap();
        let b = ctx2.get_or_create_render_pass(&backend, &key).unwrap();
        // 不同上下文可以各持一份，但附件形状必须一致
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_load_action_is_part_of_pass_key() {
        let backend = TestBackend::new();
        let registry = ContextRegistry::new();
        let mut ctx = RenderContext::<TestBackend>::new(&registry).unwrap();

        let view = color_target(PixelFormat::Rgba8Unorm);
        let desc = simple_desc(view);

        let clear = LoadActions::clear_all(1, [0.0; 4]);
        let keep = LoadActions {
            color: vec![ColorLoad {
                action: LoadAction::Load,
                clear: [0.0; 4],
            }],
            ..Default::default()
        };

        ctx.get_or_create_frame_buffer(&backend, &desc, &clear)
            .unwrap();
        ctx.get_or_create_frame_buffer(&backend, &desc, &keep)
            .unwrap();
        // 装载行为不同 -> 两个通道；附件身份相同 -> 一个帧缓冲
        assert_eq!(ctx.render_pass_count(), 2);
        assert_eq!(ctx.frame_buffer_count(), 1);
    }

    #[test]
    fn test_frame_buffer_keyed_by_identity_not_format() {
        let backend = TestBackend::new();
        let registry = ContextRegistry::new();
        let mut ctx = RenderContext::<TestBackend>::new(&registry).unwrap();
        let load = LoadActions::clear_all(1, [0.0; 4]);

        // 两张同格式的纹理：共享通道，但各有一个帧缓冲
        let desc_a = simple_desc(color_target(PixelFormat::Rgba8Unorm));
        let desc_b = simple_desc(color_target(PixelFormat::Rgba8Unorm));

        ctx.get_or_create_frame_buffer(&backend, &desc_a, &load)
            .unwrap();
        ctx.get_or_create_frame_buffer(&backend, &desc_b, &load)
            .unwrap();
        assert_eq!(ctx.render_pass_count(), 1);
        assert_eq!(ctx.frame_buffer_count(), 2);

        // 同一张纹理的不同 mip 也是不同的帧缓冲
        let desc_mip = FrameBufferDesc {
            color: vec![desc_a.color[0].with_mip(1)],
            depth: None,
            extent: Extent3::new(64, 64, 1),
        };
        ctx.get_or_create_frame_buffer(&backend, &desc_mip, &load)
            .unwrap();
        assert_eq!(ctx.frame_buffer_count(), 3);
    }

    #[test]
    fn test_begin_rendering_records_pass() {
        let backend = TestBackend::new();
        let registry = ContextRegistry::new();
        let mut ctx = RenderContext::<TestBackend>::new(&registry).unwrap();
        let mut cmd = backend.new_command_list();

        let desc = simple_desc(color_target(PixelFormat::Bgra8Unorm));
        let load = LoadActions::clear_all(1, [0.2, 0.2, 0.2, 1.0]);

        ctx.begin_rendering(&backend, &mut cmd, &desc, &load).unwrap();
        ctx.end_rendering(&backend, &mut cmd);
        assert_eq!(cmd.passes_begun, 1);
        assert_eq!(cmd.passes_ended, 1);
    }
}
