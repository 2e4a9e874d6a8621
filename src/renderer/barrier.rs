//! 资源状态追踪与屏障批处理
//!
//! 调用方以 "资源从状态 A 迁移到状态 B" 的声明式请求描述同步需求，
//! 追踪器负责去重、聚合，并在 flush 时把整批请求交给后端翻译成
//! 一次本机屏障调用（管线阶段取整批的并集，而不是逐资源各发一次）。
//!
//! 特例：UNORDERED_ACCESS -> UNORDERED_ACCESS 不是空操作——
//! 并发的着色器写仍然要用写后写屏障隔开。
//!
//! 屏障请求是瞬态值对象，flush 之后即被消费，从不持久化。

use std::collections::HashMap;
use tracing::trace;

use crate::renderer::backend_trait::GpuBackend;
use crate::renderer::resource::{
    BufferId, QueueKind, ResourceState, SubresourceRange, TextureId,
};

/// 屏障作用的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierResource {
    Buffer(BufferId),
    Texture(TextureId),
}

/// 队列族所有权转移
///
/// 资源跨队列族使用时（例如上传队列 -> 图形队列），
/// 释放端与获取端各发一条显式指明两端队列的屏障，
/// 而不是 "不关心"。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipTransfer {
    /// 无所有权转移
    None,
    /// 获取端：资源从 `from` 队列转来
    Acquire { from: QueueKind },
    /// 释放端：资源转给 `to` 队列
    Release { to: QueueKind },
}

/// 一条资源屏障请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// 目标资源
    pub resource: BarrierResource,
    /// 迁移前状态
    pub src_state: ResourceState,
    /// 迁移后状态
    pub dst_state: ResourceState,
    /// 只作用于纹理的一部分时给出选择器
    pub subresource: Option<SubresourceRange>,
    /// 队列族所有权转移
    pub transfer: OwnershipTransfer,
}

impl ResourceBarrier {
    /// 普通的全资源迁移
    pub fn transition(
        resource: BarrierResource,
        src_state: ResourceState,
        dst_state: ResourceState,
    ) -> Self {
        Self {
            resource,
            src_state,
            dst_state,
            subresource: None,
            transfer: OwnershipTransfer::None,
        }
    }

    /// 限定子资源范围
    pub fn with_subresource(mut self, range: SubresourceRange) -> Self {
        self.subresource = Some(range);
        self
    }

    /// 标记所有权转移
    pub fn with_transfer(mut self, transfer: OwnershipTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    /// 是否为写后写冒险屏障（UAV -> UAV）
    pub fn is_waw_hazard(&self) -> bool {
        self.src_state == ResourceState::UNORDERED_ACCESS
            && self.dst_state == ResourceState::UNORDERED_ACCESS
    }
}

/// 资源状态追踪器
///
/// 记录每个资源当前所处的状态，把声明式的迁移请求转成
/// 待翻译的屏障批次。一个命令流配一个追踪器，不跨线程共享。
pub struct ResourceStateTracker {
    states: HashMap<BarrierResource, ResourceState>,
    pending: Vec<ResourceBarrier>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// 登记资源的初始状态
    pub fn register(&mut self, resource: BarrierResource, state: ResourceState) {
        self.states.insert(resource, state);
    }

    /// 资源当前被追踪到的状态
    pub fn current_state(&self, resource: BarrierResource) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    /// 请求迁移到 `new_state`
    ///
    /// 旧状态取自追踪记录（未登记时视为 UNDEFINED）。状态不变时
    /// 不产生屏障，除非两端都是 UNORDERED_ACCESS——那种情况下
    /// 仍需要一条写后写屏障隔开两次着色器写。
    ///
    /// 返回是否排入了屏障。
    pub fn transition(&mut self, resource: BarrierResource, new_state: ResourceState) -> bool {
        self.transition_subresource(resource, new_state, None)
    }

    /// 同 `transition`，但只作用于给定的子资源范围
    pub fn transition_subresource(
        &mut self,
        resource: BarrierResource,
        new_state: ResourceState,
        subresource: Option<SubresourceRange>,
    ) -> bool {
        let old_state = self
            .states
            .get(&resource)
            .copied()
            .unwrap_or(ResourceState::UNDEFINED);

        if old_state == new_state && new_state != ResourceState::UNORDERED_ACCESS {
            return false;
        }

        self.states.insert(resource, new_state);
        self.pending.push(ResourceBarrier {
            resource,
            src_state: old_state,
            dst_state: new_state,
            subresource,
            transfer: OwnershipTransfer::None,
        });
        true
    }

    /// 排入一条调用方完整给出的屏障（含所有权转移）
    ///
    /// 追踪状态同步更新到 `dst_state`。
    pub fn barrier(&mut self, barrier: ResourceBarrier) {
        self.states.insert(barrier.resource, barrier.dst_state);
        self.pending.push(barrier);
    }

    /// 待翻译的屏障批次
    pub fn pending(&self) -> &[ResourceBarrier] {
        &self.pending
    }

    /// 把整批屏障翻译并录制为一次本机调用
    ///
    /// 批次为空时什么也不做。
    pub fn flush<B: GpuBackend>(
        &mut self,
        backend: &B,
        cmd: &mut B::CommandList,
        queue: QueueKind,
    ) {
        if self.pending.is_empty() {
            return;
        }
        trace!(
            target: "polyrender::barrier",
            count = self.pending.len(),
            queue = ?queue,
            "Flushing barrier batch"
        );
        backend.cmd_resource_barriers(cmd, queue, &self.pending);
        self.pending.clear();
    }
}

impl Default for ResourceStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::TestBackend;

    fn texture() -> BarrierResource {
        BarrierResource::Texture(TextureId::generate())
    }

    #[test]
    fn test_transition_emits_barrier_on_change() {
        let mut tracker = ResourceStateTracker::new();
        let res = texture();
        tracker.register(res, ResourceState::SHADER_RESOURCE);

        assert!(tracker.transition(res, ResourceState::RENDER_TARGET));
        assert_eq!(tracker.pending().len(), 1);
        let barrier = tracker.pending()[0];
        assert_eq!(barrier.src_state, ResourceState::SHADER_RESOURCE);
        assert_eq!(barrier.dst_state, ResourceState::RENDER_TARGET);
        assert_eq!(
            tracker.current_state(res),
            Some(ResourceState::RENDER_TARGET)
        );
    }

    #[test]
    fn test_same_state_transition_is_noop_except_uav() {
        let mut tracker = ResourceStateTracker::new();
        let res = texture();
        tracker.register(res, ResourceState::SHADER_RESOURCE);

        // A -> B -> B：第二次迁移到相同的只读状态不产生任何屏障
        assert!(tracker.transition(res, ResourceState::RENDER_TARGET));
        assert!(!tracker.transition(res, ResourceState::RENDER_TARGET));
        assert_eq!(tracker.pending().len(), 1);

        // UAV -> UAV：仍然要发写后写屏障
        assert!(tracker.transition(res, ResourceState::UNORDERED_ACCESS));
        assert!(tracker.transition(res, ResourceState::UNORDERED_ACCESS));
        assert_eq!(tracker.pending().len(), 3);
        let waw = tracker.pending()[2];
        assert!(waw.is_waw_hazard());
    }

    #[test]
    fn test_unregistered_resource_starts_undefined() {
        let mut tracker = ResourceStateTracker::new();
        let res = BarrierResource::Buffer(BufferId::generate());

        assert!(tracker.transition(res, ResourceState::COPY_DEST));
        assert_eq!(tracker.pending()[0].src_state, ResourceState::UNDEFINED);
    }

    #[test]
    fn test_ownership_transfer_passthrough() {
        let mut tracker = ResourceStateTracker::new();
        let res = texture();

        tracker.barrier(
            ResourceBarrier::transition(
                res,
                ResourceState::COPY_DEST,
                ResourceState::SHADER_RESOURCE,
            )
            .with_transfer(OwnershipTransfer::Acquire {
                from: QueueKind::Transfer,
            }),
        );
        assert_eq!(
            tracker.pending()[0].transfer,
            OwnershipTransfer::Acquire {
                from: QueueKind::Transfer
            }
        );
        assert_eq!(
            tracker.current_state(res),
            Some(ResourceState::SHADER_RESOURCE)
        );
    }

    #[test]
    fn test_flush_batches_into_single_native_call() {
        let backend = TestBackend::new();
        let mut cmd = backend.new_command_list();
        let mut tracker = ResourceStateTracker::new();

        let a = texture();
        let b = texture();
        tracker.transition(a, ResourceState::RENDER_TARGET);
        tracker.transition(b, ResourceState::COPY_DEST);

        tracker.flush(&backend, &mut cmd, QueueKind::Graphics);
        // 两条屏障，一次本机调用
        assert_eq!(cmd.barrier_batches.len(), 1);
        assert_eq!(cmd.barrier_batches[0].1.len(), 2);
        assert!(tracker.pending().is_empty());

        // 空批次不产生调用
        tracker.flush(&backend, &mut cmd, QueueKind::Graphics);
        assert_eq!(cmd.barrier_batches.len(), 1);
    }
}
