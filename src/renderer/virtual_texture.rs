//! 虚拟纹理驻留管理
//!
//! 管理稀疏驻留纹理的逐页 GPU 内存绑定。每帧一次的 tick 读取
//! 由 GPU 回读写入的可见性列表，决定哪些页需要绑定、哪些需要换出；
//! 被替换下来的内存和瞬态上传缓冲不会立即释放，而是记入当前帧槽的
//! 延迟删除列表——等该帧槽被环绕复用时（引用它们的 GPU 工作必然
//! 已经完成）才真正释放。
//!
//! 最粗的一级 tiled mip 永远保持驻留，作为采样兜底：
//! 因此单页分配失败不致命，页保持未绑定、下个 tick 重试即可。
//! 调用方应把 mip 选择钳制到已驻留的层级，这不是本层的职责。

use tracing::{debug, warn};

use crate::core::error::{GraphicsError, PolyRenderError, Result};
use crate::renderer::backend_trait::{GpuBackend, MemoryUsage, PageAllocator, PageBinding};
use crate::renderer::resource::{Extent3, Offset3, PixelFormat, TextureId};

/// 虚拟纹理的一页
///
/// 页表在纹理创建时构建一次，随纹理存活；
/// 绑定的内存句柄随换入换出置空 / 重设。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualTexturePage {
    /// 页表下标
    pub index: u32,
    /// 在所属 mip 中的纹素偏移
    pub offset: Offset3,
    /// 页覆盖的纹素范围（边缘页会被裁剪）
    pub extent: Extent3,
    /// 页的字节大小（所有页统一）
    pub size_bytes: u64,
    /// 所属 mip 层
    pub mip_level: u32,
    /// 所属数组层
    pub array_layer: u32,
}

/// 页的驻留状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageResidency {
    /// 未绑定内存
    Unbound,
    /// 已绑定并完成上传
    Resident,
}

/// 虚拟纹理创建描述
#[derive(Debug, Clone)]
pub struct VirtualTextureDesc {
    /// 稀疏纹理的身份
    pub texture: TextureId,
    /// 像素格式
    pub format: PixelFormat,
    /// mip 0 的纹素范围
    pub extent: Extent3,
    /// 单页的纹素形状
    pub page_extent: Extent3,
    /// 按页平铺的 mip 层数；最后一层是常驻的兜底层
    pub tiled_mip_count: u32,
}

/// 一个帧槽的可见性列表
///
/// 由上一轮 GPU 回读填写：`alive` 是应当驻留的页，
/// `release` 是可以换出的页。
#[derive(Debug, Clone, Default)]
pub struct VisibilityList {
    pub alive: Vec<u32>,
    pub release: Vec<u32>,
}

impl VisibilityList {
    /// 从映射好的回读缓冲解析可见性列表
    ///
    /// 缓冲布局（u32 数组）：`[alive 数, release 数, alive 页下标..., release 页下标...]`。
    /// 数据不完整时按空列表处理（回读尚未就绪的帧）。
    pub fn from_readback_bytes(bytes: &[u8]) -> Self {
        // 回读映射不保证 4 字节对齐，拷贝成对齐的 u32 序列
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[..bytes.len() & !3]);
        if words.len() < 2 {
            return Self::default();
        }
        let alive_count = words[0] as usize;
        let release_count = words[1] as usize;
        if 2 + alive_count + release_count > words.len() {
            return Self::default();
        }
        Self {
            alive: words[2..2 + alive_count].to_vec(),
            release: words[2 + alive_count..2 + alive_count + release_count].to_vec(),
        }
    }
}

/// 一次 tick 的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// 本次新绑定并上传的页数
    pub bound: u32,
    /// 本次换出的页数
    pub released: u32,
    /// 因分配失败而推迟到下个 tick 的页数
    pub deferred: u32,
}

struct PageSlot<B: GpuBackend> {
    page: VirtualTexturePage,
    memory: Option<B::PageMemory>,
    residency: PageResidency,
}

/// 帧槽的延迟删除列表
///
/// 固定长度的环（每个帧槽一个可增长的列表），
/// 帧槽复用时清空重置，不缩容。
struct PendingDeletion<B: GpuBackend> {
    memory: Vec<B::PageMemory>,
    staging: Vec<B::StagingBuffer>,
}

impl<B: GpuBackend> Default for PendingDeletion<B> {
    fn default() -> Self {
        Self {
            memory: Vec::new(),
            staging: Vec::new(),
        }
    }
}

/// 稀疏驻留纹理及其驻留管理
///
/// 每个纹理每帧恰好一次 `tick`；同一纹理不允许并发调用。
pub struct VirtualTexture<B: GpuBackend> {
    texture: TextureId,
    format: PixelFormat,
    page_extent: Extent3,
    page_size_bytes: u64,
    tiled_mip_count: u32,
    pages: Vec<PageSlot<B>>,
    /// CPU 侧源图像，按 页下标 * 页字节数 布局
    source_data: Vec<u8>,
    visibility: Vec<VisibilityList>,
    pending: Vec<PendingDeletion<B>>,
    alive_count: u32,
}

fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

impl<B: GpuBackend> VirtualTexture<B> {
    /// 构建页表并接管 CPU 侧源数据
    ///
    /// `source_data` 的长度必须恰好是 页数 * 页字节数。
    pub fn new(
        desc: &VirtualTextureDesc,
        source_data: Vec<u8>,
        frames_in_flight: usize,
    ) -> Result<Self> {
        if desc.tiled_mip_count == 0 {
            return Err(PolyRenderError::Runtime(
                "virtual texture needs at least one tiled mip".into(),
            ));
        }
        if desc.page_extent.width == 0 || desc.page_extent.height == 0 || desc.page_extent.depth == 0
        {
            return Err(PolyRenderError::Runtime("page extent must be non-zero".into()));
        }

        let page_size_bytes = desc.page_extent.width as u64
            * desc.page_extent.height as u64
            * desc.page_extent.depth as u64
            * desc.format.bytes_per_pixel() as u64;

        // 逐 mip 铺页，边缘页裁剪到 mip 范围内
        let mut pages = Vec::new();
        for mip in 0..desc.tiled_mip_count {
            let mip_extent = Extent3::new(
                (desc.extent.width >> mip).max(1),
                (desc.extent.height >> mip).max(1),
                (desc.extent.depth >> mip).max(1),
            );
            let pages_x = div_ceil(mip_extent.width, desc.page_extent.width);
            let pages_y = div_ceil(mip_extent.height, desc.page_extent.height);
            let pages_z = div_ceil(mip_extent.depth, desc.page_extent.depth);

            for z in 0..pages_z {
                for y in 0..pages_y {
                    for x in 0..pages_x {
                        let offset = Offset3::new(
                            x * desc.page_extent.width,
                            y * desc.page_extent.height,
                            z * desc.page_extent.depth,
                        );
                        let extent = Extent3::new(
                            desc.page_extent.width.min(mip_extent.width - offset.x),
                            desc.page_extent.height.min(mip_extent.height - offset.y),
                            desc.page_extent.depth.min(mip_extent.depth - offset.z),
                        );
                        pages.push(PageSlot {
                            page: VirtualTexturePage {
                                index: pages.len() as u32,
                                offset,
                                extent,
                                size_bytes: page_size_bytes,
                                mip_level: mip,
                                array_layer: 0,
                            },
                            memory: None,
                            residency: PageResidency::Unbound,
                        });
                    }
                }
            }
        }

        let expected = pages.len() as u64 * page_size_bytes;
        if source_data.len() as u64 != expected {
            return Err(PolyRenderError::Runtime(format!(
                "virtual texture source data is {} bytes, expected {}",
                source_data.len(),
                expected
            )));
        }

        Ok(Self {
            texture: desc.texture,
            format: desc.format,
            page_extent: desc.page_extent,
            page_size_bytes,
            tiled_mip_count: desc.tiled_mip_count,
            pages,
            source_data,
            visibility: (0..frames_in_flight).map(|_| VisibilityList::default()).collect(),
            pending: (0..frames_in_flight).map(|_| PendingDeletion::default()).collect(),
            alive_count: 0,
        })
    }

    /// 纹理身份
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// 像素格式
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// 页总数
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// 当前驻留的页数
    pub fn alive_page_count(&self) -> u32 {
        self.alive_count
    }

    /// 常驻兜底层的 mip 序号
    pub fn coarsest_mip(&self) -> u32 {
        self.tiled_mip_count - 1
    }

    /// 按下标取页描述
    pub fn page(&self, index: u32) -> Option<&VirtualTexturePage> {
        self.pages.get(index as usize).map(|s| &s.page)
    }

    /// 页的驻留状态
    pub fn residency(&self, index: u32) -> Option<PageResidency> {
        self.pages.get(index as usize).map(|s| s.residency)
    }

    /// 指定帧槽的可见性列表（由回读方填写）
    pub fn visibility_mut(&mut self, frame_slot: usize) -> &mut VisibilityList {
        &mut self.visibility[frame_slot]
    }

    /// 把最粗一级 mip 的所有页全部上传并绑定
    ///
    /// 在纹理创建后调用一次。兜底层的分配失败是致命错误：
    /// 没有常驻层，采样就可能落进未绑定的内存。
    pub fn prime_coarsest_mip<A: PageAllocator<B>>(
        &mut self,
        backend: &B,
        allocator: &mut A,
        cmd: &mut B::CommandList,
        frame_slot: usize,
    ) -> Result<()> {
        let coarsest = self.coarsest_mip();
        let mut touched = Vec::new();

        for i in 0..self.pages.len() {
            if self.pages[i].page.mip_level != coarsest || self.pages[i].memory.is_some() {
                continue;
            }
            let memory = allocator
                .allocate(self.page_size_bytes, self.page_size_bytes, MemoryUsage::GpuOnly)
                .map_err(|_| {
                    GraphicsError::OutOfMemory(format!(
                        "failed to allocate fallback mip page {}",
                        self.pages[i].page.index
                    ))
                })?;
            self.pages[i].memory = Some(memory);
            self.upload_page(backend, cmd, i, frame_slot)?;
            self.pages[i].residency = PageResidency::Resident;
            self.alive_count += 1;
            touched.push(i as u32);
        }

        self.submit_bindings(backend, &touched)?;
        debug!(
            target: "polyrender::virtual_texture",
            pages = touched.len(),
            mip = coarsest,
            "Fallback mip resident"
        );
        Ok(())
    }

    /// 每帧一次的驻留更新
    ///
    /// 步骤：复用帧槽前先执行它的延迟删除列表；按可见性列表换出 /
    /// 换入页；最后把本次触碰的全部页绑定变更合成一次提交。
    pub fn tick<A: PageAllocator<B>>(
        &mut self,
        backend: &B,
        allocator: &mut A,
        cmd: &mut B::CommandList,
        frame_slot: usize,
    ) -> Result<TickStats> {
        if frame_slot >= self.pending.len() {
            return Err(PolyRenderError::Runtime(format!(
                "frame slot {} out of range ({} frames in flight)",
                frame_slot,
                self.pending.len()
            )));
        }

        // 帧槽环绕：上一轮记在该槽上的内存与上传缓冲此刻可以安全释放
        self.flush_pending(backend, allocator, frame_slot);

        let visibility = std::mem::take(&mut self.visibility[frame_slot]);
        let mut stats = TickStats::default();
        let mut touched: Vec<u32> = Vec::new();

        // 换出：兜底层永不释放；实际 free 推迟到帧槽复用
        for &index in &visibility.release {
            if index as usize >= self.pages.len() {
                warn!(
                    target: "polyrender::virtual_texture",
                    page = index,
                    "Release request for unknown page"
                );
                continue;
            }
            if self.pages[index as usize].page.mip_level >= self.tiled_mip_count - 1 {
                continue;
            }
            if let Some(memory) = self.pages[index as usize].memory.take() {
                self.pages[index as usize].residency = PageResidency::Unbound;
                self.pending[frame_slot].memory.push(memory);
                self.alive_count -= 1;
                stats.released += 1;
                touched.push(index);
            }
        }

        // 换入：逐页分配 + 经由瞬态上传缓冲拷贝进稀疏纹理
        for &index in &visibility.alive {
            let Some(slot) = self.pages.get(index as usize) else {
                warn!(
                    target: "polyrender::virtual_texture",
                    page = index,
                    "Alive request for unknown page"
                );
                continue;
            };
            if slot.memory.is_some() {
                continue;
            }
            let memory = match allocator.allocate(
                self.page_size_bytes,
                self.page_size_bytes,
                MemoryUsage::GpuOnly,
            ) {
                Ok(memory) => memory,
                Err(_) => {
                    // 非致命：页保持未绑定，下个 tick 重试；兜底层保证采样安全
                    debug!(
                        target: "polyrender::virtual_texture",
                        page = index,
                        "Page allocation deferred"
                    );
                    stats.deferred += 1;
                    continue;
                }
            };
            self.pages[index as usize].memory = Some(memory);
            self.upload_page(backend, cmd, index as usize, frame_slot)?;
            self.pages[index as usize].residency = PageResidency::Resident;
            self.alive_count += 1;
            stats.bound += 1;
            touched.push(index);
        }

        // 本次触碰的所有页合成一次绑定更新
        self.submit_bindings(backend, &touched)?;
        Ok(stats)
    }

    /// 把页的源数据经瞬态上传缓冲拷入稀疏纹理
    fn upload_page(
        &mut self,
        backend: &B,
        cmd: &mut B::CommandList,
        page_index: usize,
        frame_slot: usize,
    ) -> Result<()> {
        let page = self.pages[page_index].page;
        let begin = page.index as u64 * self.page_size_bytes;
        let bytes = &self.source_data[begin as usize..(begin + self.page_size_bytes) as usize];

        let staging = backend.create_staging_buffer(bytes)?;
        backend.cmd_copy_to_page(cmd, &staging, self.texture, &page);
        self.pending[frame_slot].staging.push(staging);
        Ok(())
    }

    fn submit_bindings(&self, backend: &B, touched: &[u32]) -> Result<()> {
        if touched.is_empty() {
            return Ok(());
        }
        let bindings: Vec<PageBinding<'_, B>> = touched
            .iter()
            .map(|&index| {
                let slot = &self.pages[index as usize];
                PageBinding {
                    page_index: index,
                    page: &slot.page,
                    memory: slot.memory.as_ref(),
                }
            })
            .collect();
        backend.update_page_bindings(self.texture, &bindings)
    }

    fn flush_pending<A: PageAllocator<B>>(
        &mut self,
        backend: &B,
        allocator: &mut A,
        frame_slot: usize,
    ) {
        let pending = &mut self.pending[frame_slot];
        for memory in pending.memory.drain(..) {
            allocator.free(memory);
        }
        for staging in pending.staging.drain(..) {
            backend.destroy_staging_buffer(staging);
        }
    }

    /// 销毁前清空所有帧槽的延迟删除列表并释放驻留内存
    pub fn destroy<A: PageAllocator<B>>(&mut self, backend: &B, allocator: &mut A) {
        for slot in 0..self.pending.len() {
            self.flush_pending(backend, allocator, slot);
        }
        for page in &mut self.pages {
            if let Some(memory) = page.memory.take() {
                allocator.free(memory);
            }
            page.residency = PageResidency::Unbound;
        }
        self.alive_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::{TestAllocator, TestBackend};

    const FRAMES: usize = 3;

    // 64x64 的纹理、32x32 的页、两级 tiled mip：
    // mip 0 有 4 页，mip 1（兜底层）有 1 页
    fn make_texture() -> VirtualTexture<TestBackend> {
        let desc = VirtualTextureDesc {
            texture: TextureId::generate(),
            format: PixelFormat::Rgba8Unorm,
            extent: Extent3::new(64, 64, 1),
            page_extent: Extent3::new(32, 32, 1),
            tiled_mip_count: 2,
        };
        let page_bytes = 32 * 32 * 4;
        let source = vec![0u8; page_bytes * 5];
        VirtualTexture::new(&desc, source, FRAMES).unwrap()
    }

    #[test]
    fn test_page_table_layout() {
        let vt = make_texture();
        assert_eq!(vt.page_count(), 5);
        assert_eq!(vt.coarsest_mip(), 1);

        // mip 0 的第二页偏移在 x 方向上
        let page = vt.page(1).unwrap();
        assert_eq!(page.mip_level, 0);
        assert_eq!(page.offset, Offset3::new(32, 0, 0));
        assert_eq!(page.extent, Extent3::new(32, 32, 1));

        // 最后一页是兜底层
        let last = vt.page(4).unwrap();
        assert_eq!(last.mip_level, 1);
    }

    #[test]
    fn test_prime_coarsest_mip() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();

        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();
        assert_eq!(vt.alive_page_count(), 1);
        assert_eq!(vt.residency(4), Some(PageResidency::Resident));
        // 一次绑定提交、一次页拷贝
        assert_eq!(backend.page_binding_submissions(), 1);
        assert_eq!(cmd.page_copies.len(), 1);
    }

    #[test]
    fn test_prime_failure_is_fatal() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::with_budget(0);
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();

        let err = vt
            .prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            PolyRenderError::Graphics(GraphicsError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_tick_binds_and_releases() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();
        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();

        // tick 0：页 0 和页 1 变为可见
        vt.visibility_mut(0).alive = vec![0, 1];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        assert_eq!(stats, TickStats { bound: 2, released: 0, deferred: 0 });
        assert_eq!(vt.alive_page_count(), 3);
        assert_eq!(vt.residency(0), Some(PageResidency::Resident));

        // tick 1：页 0 换出
        vt.visibility_mut(1).release = vec![0];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 1).unwrap();
        assert_eq!(stats.released, 1);
        assert_eq!(vt.residency(0), Some(PageResidency::Unbound));
        // 内存尚未归还给分配器（延迟到帧槽 1 复用时）
        assert_eq!(allocator.free_count(), 0);
    }

    #[test]
    fn test_coarsest_mip_never_released() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();
        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();

        vt.visibility_mut(0).release = vec![4];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        assert_eq!(stats.released, 0);
        assert_eq!(vt.residency(4), Some(PageResidency::Resident));
    }

    #[test]
    fn test_allocation_failure_defers_page() {
        let backend = TestBackend::new();
        // 预算正好够兜底层
        let mut allocator = TestAllocator::with_budget(1);
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();
        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();

        vt.visibility_mut(0).alive = vec![0];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        assert_eq!(stats, TickStats { bound: 0, released: 0, deferred: 1 });
        assert_eq!(vt.residency(0), Some(PageResidency::Unbound));

        // 预算恢复后下个 tick 重试成功
        allocator.set_budget(2);
        vt.visibility_mut(1).alive = vec![0];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 1).unwrap();
        assert_eq!(stats.bound, 1);
    }

    #[test]
    fn test_released_memory_not_reused_before_ring_wraps() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();
        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();

        // tick 0（槽 0）：绑定页 0
        vt.visibility_mut(0).alive = vec![0];
        vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        let released_id = allocator.last_allocated_id();

        // tick 1（槽 1）：换出页 0
        vt.visibility_mut(1).release = vec![0];
        vt.tick(&backend, &mut allocator, &mut cmd, 1).unwrap();

        // tick 2（槽 2）、tick 3（槽 0）之前：分配新页不得拿到被换出的内存
        vt.visibility_mut(2).alive = vec![1];
        vt.tick(&backend, &mut allocator, &mut cmd, 2).unwrap();
        assert_ne!(allocator.last_allocated_id(), released_id);
        assert_eq!(allocator.free_count(), 0);

        // tick 4：帧槽 1 复用，此刻被换出的内存才回到分配器
        vt.visibility_mut(0).alive = vec![];
        vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        assert_eq!(allocator.free_count(), 0);
        vt.visibility_mut(1).alive = vec![];
        vt.tick(&backend, &mut allocator, &mut cmd, 1).unwrap();
        assert_eq!(allocator.free_count(), 1);

        // 归还之后的分配可以复用该内存
        vt.visibility_mut(2).alive = vec![2];
        vt.tick(&backend, &mut allocator, &mut cmd, 2).unwrap();
        assert_eq!(allocator.last_allocated_id(), released_id);
    }

    #[test]
    fn test_batched_binding_submission() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();

        // 一个 tick 绑 4 页：只有一次绑定提交
        vt.visibility_mut(0).alive = vec![0, 1, 2, 3];
        let stats = vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();
        assert_eq!(stats.bound, 4);
        assert_eq!(backend.page_binding_submissions(), 1);
        assert_eq!(backend.last_page_binding_count(), 4);
    }

    #[test]
    fn test_visibility_list_from_readback() {
        // [alive 数, release 数, alive..., release...]
        let words: [u32; 7] = [3, 2, 0, 1, 4, 2, 3];
        let bytes = bytemuck::bytes_of(&words);
        let list = VisibilityList::from_readback_bytes(bytes);
        assert_eq!(list.alive, vec![0, 1, 4]);
        assert_eq!(list.release, vec![2, 3]);

        // 数据不完整按空列表处理
        let truncated = VisibilityList::from_readback_bytes(&bytes[..8]);
        assert!(truncated.alive.is_empty());
        let empty = VisibilityList::from_readback_bytes(&[]);
        assert!(empty.alive.is_empty() && empty.release.is_empty());
    }

    #[test]
    fn test_destroy_frees_everything() {
        let backend = TestBackend::new();
        let mut allocator = TestAllocator::new();
        let mut cmd = backend.new_command_list();
        let mut vt = make_texture();
        vt.prime_coarsest_mip(&backend, &mut allocator, &mut cmd, 0)
            .unwrap();
        vt.visibility_mut(0).alive = vec![0, 1];
        vt.tick(&backend, &mut allocator, &mut cmd, 0).unwrap();

        vt.destroy(&backend, &mut allocator);
        assert_eq!(vt.alive_page_count(), 0);
        assert_eq!(allocator.live_allocations(), 0);
    }
}
