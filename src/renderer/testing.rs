//! 测试用后端替身
//!
//! 一个不接触任何真实驱动的 `GpuBackend` 实现，
//! 把每次本机调用记录成可断言的计数与日志，
//! 用于在没有 GPU 的环境里验证状态化层的行为。

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::core::error::{PolyRenderError, Result};
use crate::renderer::backend_trait::{GpuBackend, MemoryUsage, PageAllocator, PageBinding};
use crate::renderer::barrier::ResourceBarrier;
use crate::renderer::descriptor::{BoundResource, DescriptorWrite};
use crate::renderer::pass_cache::{FrameBufferDesc, LoadActions, RenderPassKey};
use crate::renderer::resource::{QueueKind, TextureId};
use crate::renderer::root_signature::{PipelineKind, RootConstantRange, RootLayout};
use crate::renderer::shader::UpdateFrequency;
use crate::renderer::virtual_texture::VirtualTexturePage;

/// 替身根签名
#[derive(Debug)]
pub struct TestSignature;

/// 替身渲染通道：记住创建它的形状键
#[derive(Debug)]
pub struct TestRenderPass {
    pub key: RenderPassKey,
    pub serial: u32,
}

/// 替身帧缓冲
#[derive(Debug)]
pub struct TestFrameBuffer {
    pub serial: u32,
}

/// 替身描述符存储块
#[derive(Debug)]
pub struct TestBlock {
    pub capacity: u32,
    pub used: u32,
}

/// 替身命令流：逐调用记录
#[derive(Debug, Default)]
pub struct TestCommandList {
    pub barrier_batches: Vec<(QueueKind, Vec<ResourceBarrier>)>,
    pub page_copies: Vec<u32>,
    pub passes_begun: u32,
    pub passes_ended: u32,
    pub bound_slots: Vec<u32>,
    pub root_constant_pushes: u32,
}

/// 替身页内存
#[derive(Debug, PartialEq, Eq)]
pub struct TestMemory {
    pub id: u64,
    pub size: u64,
}

/// 替身上传缓冲
#[derive(Debug)]
pub struct TestStaging {
    pub bytes: usize,
}

/// 记录型测试后端
pub struct TestBackend {
    pass_serial: AtomicU32,
    slot_serial: AtomicU32,
    descriptor_writes: AtomicU64,
    staging_created: AtomicUsize,
    staging_destroyed: AtomicUsize,
    binding_submissions: AtomicUsize,
    last_binding_count: AtomicUsize,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            pass_serial: AtomicU32::new(0),
            slot_serial: AtomicU32::new(0),
            descriptor_writes: AtomicU64::new(0),
            staging_created: AtomicUsize::new(0),
            staging_destroyed: AtomicUsize::new(0),
            binding_submissions: AtomicUsize::new(0),
            last_binding_count: AtomicUsize::new(0),
        }
    }

    pub fn new_command_list(&self) -> TestCommandList {
        TestCommandList::default()
    }

    /// 本机描述符写入的总次数
    pub fn descriptor_write_count(&self) -> u64 {
        self.descriptor_writes.load(Ordering::Relaxed)
    }

    /// 页绑定提交的次数
    pub fn page_binding_submissions(&self) -> usize {
        self.binding_submissions.load(Ordering::Relaxed)
    }

    /// 最近一次页绑定提交覆盖的页数
    pub fn last_page_binding_count(&self) -> usize {
        self.last_binding_count.load(Ordering::Relaxed)
    }

    /// 尚未销毁的上传缓冲数量
    pub fn live_staging_buffers(&self) -> usize {
        self.staging_created.load(Ordering::Relaxed)
            - self.staging_destroyed.load(Ordering::Relaxed)
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for TestBackend {
    type Signature = TestSignature;
    type RenderPass = TestRenderPass;
    type FrameBuffer = TestFrameBuffer;
    type DescriptorBlock = TestBlock;
    type DescriptorSlot = u32;
    type CommandList = TestCommandList;
    type PageMemory = TestMemory;
    type StagingBuffer = TestStaging;

    fn name(&self) -> &'static str {
        "test"
    }

    fn prepare_signature(&self, _layout: &RootLayout) -> Result<Self::Signature> {
        Ok(TestSignature)
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<Self::RenderPass> {
        Ok(TestRenderPass {
            key: key.clone(),
            serial: self.pass_serial.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn create_frame_buffer(
        &self,
        _pass: &Self::RenderPass,
        _desc: &FrameBufferDesc,
    ) -> Result<Self::FrameBuffer> {
        Ok(TestFrameBuffer {
            serial: self.pass_serial.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn create_descriptor_block(&self, capacity_sets: u32) -> Result<Self::DescriptorBlock> {
        Ok(TestBlock {
            capacity: capacity_sets,
            used: 0,
        })
    }

    fn allocate_descriptor_slots(
        &self,
        block: &mut Self::DescriptorBlock,
        _signature: &Self::Signature,
        _frequency: UpdateFrequency,
        count: u32,
    ) -> Result<Vec<Self::DescriptorSlot>> {
        if block.used + count > block.capacity {
            return Err(PolyRenderError::Runtime("test block exhausted".into()));
        }
        block.used += count;
        Ok((0..count)
            .map(|_| self.slot_serial.fetch_add(1, Ordering::Relaxed))
            .collect())
    }

    fn write_descriptor_slot(
        &self,
        _signature: &Self::Signature,
        _layout: &RootLayout,
        _frequency: UpdateFrequency,
        _slot: Self::DescriptorSlot,
        _bindings: &[Option<BoundResource>],
        changed: &[DescriptorWrite],
    ) -> Result<()> {
        assert!(!changed.is_empty(), "native write with no changed entries");
        self.descriptor_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn bind_descriptor_slot(
        &self,
        cmd: &mut Self::CommandList,
        _signature: &Self::Signature,
        _pipeline_kind: PipelineKind,
        _frequency: UpdateFrequency,
        slot: Self::DescriptorSlot,
    ) {
        cmd.bound_slots.push(slot);
    }

    fn push_root_constants(
        &self,
        cmd: &mut Self::CommandList,
        _signature: &Self::Signature,
        _range: &RootConstantRange,
        _data: &[u8],
    ) {
        cmd.root_constant_pushes += 1;
    }

    fn cmd_begin_pass(
        &self,
        cmd: &mut Self::CommandList,
        _pass: &Self::RenderPass,
        _frame_buffer: &Self::FrameBuffer,
        _load_actions: &LoadActions,
    ) {
        cmd.passes_begun += 1;
    }

    fn cmd_end_pass(&self, cmd: &mut Self::CommandList) {
        cmd.passes_ended += 1;
    }

    fn cmd_resource_barriers(
        &self,
        cmd: &mut Self::CommandList,
        queue: QueueKind,
        barriers: &[ResourceBarrier],
    ) {
        cmd.barrier_batches.push((queue, barriers.to_vec()));
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<Self::StagingBuffer> {
        self.staging_created.fetch_add(1, Ordering::Relaxed);
        Ok(TestStaging { bytes: data.len() })
    }

    fn destroy_staging_buffer(&self, _staging: Self::StagingBuffer) {
        self.staging_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn cmd_copy_to_page(
        &self,
        cmd: &mut Self::CommandList,
        _staging: &Self::StagingBuffer,
        _texture: TextureId,
        page: &VirtualTexturePage,
    ) {
        cmd.page_copies.push(page.index);
    }

    fn update_page_bindings(
        &self,
        _texture: TextureId,
        bindings: &[PageBinding<'_, Self>],
    ) -> Result<()> {
        self.binding_submissions.fetch_add(1, Ordering::Relaxed);
        self.last_binding_count.store(bindings.len(), Ordering::Relaxed);
        Ok(())
    }
}

/// 记账型测试分配器
///
/// 回收过的内存 ID 会被优先复用——借此可以观察
/// "换出的页内存在帧槽环绕之前不得被重新分到" 这一性质。
pub struct TestAllocator {
    next_id: u64,
    free_list: Vec<u64>,
    live: usize,
    budget: usize,
    free_calls: usize,
    last_allocated: u64,
}

impl TestAllocator {
    /// 无预算限制
    pub fn new() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// 最多允许 `budget` 个存活分配
    pub fn with_budget(budget: usize) -> Self {
        Self {
            next_id: 1,
            free_list: Vec::new(),
            live: 0,
            budget,
            free_calls: 0,
            last_allocated: 0,
        }
    }

    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// 已执行的 free 次数
    pub fn free_count(&self) -> usize {
        self.free_calls
    }

    /// 当前存活的分配数
    pub fn live_allocations(&self) -> usize {
        self.live
    }

    /// 最近一次分配返回的内存 ID
    pub fn last_allocated_id(&self) -> u64 {
        self.last_allocated
    }
}

impl Default for TestAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator<TestBackend> for TestAllocator {
    fn allocate(&mut self, size: u64, _alignment: u64, _usage: MemoryUsage) -> Result<TestMemory> {
        if self.live >= self.budget {
            return Err(PolyRenderError::Runtime("test allocator budget exceeded".into()));
        }
        let id = self.free_list.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        self.live += 1;
        self.last_allocated = id;
        Ok(TestMemory { id, size })
    }

    fn free(&mut self, memory: TestMemory) {
        self.free_list.push(memory.id);
        self.live -= 1;
        self.free_calls += 1;
    }
}
