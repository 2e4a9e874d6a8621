//! 帧同步模块
//!
//! 提供多帧在飞（frames-in-flight）纪律所需的最小原语：
//! 单调递增的 Fence 值、CPU / GPU 两端的完成度计数，
//! 以及把帧号折算成帧槽的环。
//!
//! 实际的 fence / semaphore 对象由队列提交层提供，不在本层范围内；
//! 这里只做纪律层面的记账。

use std::sync::atomic::{AtomicU64, Ordering};

/// Fence 值
///
/// 用于 CPU-GPU 同步的单调递增值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个 Fence 值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 时间线
///
/// 跟踪 CPU 已提交与 GPU 已完成的 Fence 值。
pub struct FenceTimeline {
    /// 当前 Fence 值（CPU 侧）
    current_value: AtomicU64,
    /// 已完成的 Fence 值（GPU 侧）
    completed_value: AtomicU64,
}

impl FenceTimeline {
    pub fn new() -> Self {
        Self {
            current_value: AtomicU64::new(0),
            completed_value: AtomicU64::new(0),
        }
    }

    /// 获取当前 Fence 值
    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    /// 获取已完成的 Fence 值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.completed_value.load(Ordering::Acquire))
    }

    /// 取下一个 Fence 值并递增计数器
    pub fn next_value(&self) -> FenceValue {
        let value = self.current_value.fetch_add(1, Ordering::AcqRel);
        FenceValue::new(value + 1)
    }

    /// 更新已完成的 Fence 值
    ///
    /// 由观察到 GPU 完成信号的提交层调用。
    pub fn update_completed_value(&self, value: FenceValue) {
        self.completed_value.store(value.value(), Ordering::Release);
    }

    /// 特定 Fence 值是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }
}

impl Default for FenceTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// 帧槽环
///
/// 把单调递增的帧号折算成 `frame % frames_in_flight` 的槽位。
/// 槽位被复用意味着该槽上一轮的 GPU 工作已经完成——
/// 延迟释放列表以此为安全依据。
pub struct FrameRing {
    slot_count: usize,
    frame_index: u64,
    /// 每个槽位最后一次提交对应的 Fence 值
    slot_fences: Vec<FenceValue>,
}

impl FrameRing {
    /// 创建帧槽环；槽数至少为 2
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count >= 2, "at least 2 frame slots required");
        Self {
            slot_count,
            frame_index: 0,
            slot_fences: vec![FenceValue::new(0); slot_count],
        }
    }

    /// 槽位数量
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// 当前帧号
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// 当前帧槽
    pub fn current_slot(&self) -> usize {
        (self.frame_index % self.slot_count as u64) as usize
    }

    /// 复用当前槽之前需要等到的 Fence 值
    pub fn slot_fence(&self, slot: usize) -> FenceValue {
        self.slot_fences[slot]
    }

    /// 结束当前帧：记录该槽的 Fence 值并前进到下一帧
    ///
    /// 返回新一帧的槽位。
    pub fn advance(&mut self, submitted: FenceValue) -> usize {
        let slot = self.current_slot();
        self.slot_fences[slot] = submitted;
        self.frame_index += 1;
        self.current_slot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_timeline() {
        let timeline = FenceTimeline::new();
        assert_eq!(timeline.current_value().value(), 0);

        let v1 = timeline.next_value();
        let v2 = timeline.next_value();
        assert_eq!(v1.value(), 1);
        assert_eq!(v2.value(), 2);

        timeline.update_completed_value(v1);
        assert!(timeline.is_completed(v1));
        assert!(!timeline.is_completed(v2));
    }

    #[test]
    fn test_frame_ring_wraps() {
        let mut ring = FrameRing::new(3);
        assert_eq!(ring.current_slot(), 0);

        let s1 = ring.advance(FenceValue::new(1));
        assert_eq!(s1, 1);
        let s2 = ring.advance(FenceValue::new(2));
        assert_eq!(s2, 2);
        let s0 = ring.advance(FenceValue::new(3));
        // 回到槽 0，其上一轮提交的 Fence 值仍可查询
        assert_eq!(s0, 0);
        assert_eq!(ring.slot_fence(0).value(), 1);
        assert_eq!(ring.frame_index(), 3);
    }
}
