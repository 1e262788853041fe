//! GPU 同步机制模块
//!
//! 帧槽环形缓冲与 fence 时间线。CPU 最多领先 GPU `N` 帧（N = 帧槽数量），
//! 每个帧槽持有自己的命令分配器与上传内存，只有当该帧槽上一次提交对应的
//! fence 值已经完成时，CPU 才能再次写入这些资源。
//!
//! # 状态机
//!
//! ```text
//! Signaled --begin_frame (等待 fence)--> Recording --submit--> Submitted
//!    ^                                       |                     |
//!    +-------- 租约被丢弃（未提交）----------+                     |
//!    +----------------------- poll / 等待完成 ---------------------+
//! ```
//!
//! fence 值只由 `FenceTimeline` 分配，单调递增；其他模块只做比较。
//! 需要 GPU 完全空闲的操作（交换链调整大小、描述符堆重建）必须出示
//! `GpuIdle` 凭证，而该凭证只能由 `wait_for_gpu` / `drain` 产生。

use std::marker::PhantomData;

use crate::core::error::{EngineError, Result};
use crate::gfx::{Backend, CommandQueue};

/// Fence 值
///
/// 用于 CPU-GPU 同步的单调递增值。0 表示“从未提交”。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 时间线：唯一的 fence 值分配者
#[derive(Debug, Default)]
struct FenceTimeline {
    last_issued: FenceValue,
}

impl FenceTimeline {
    fn issue(&mut self) -> FenceValue {
        self.last_issued = self.last_issued.next();
        self.last_issued
    }
}

/// 帧槽状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// CPU 正在录制
    Recording,
    /// 已提交，GPU 可能仍在使用
    Submitted,
    /// GPU 已完成，可以复用
    Signaled,
}

/// 一个帧槽：状态、最后一次提交的 fence 值以及它独占的资源
#[derive(Debug)]
pub struct FrameSlot<R> {
    index: usize,
    state: SlotState,
    fence: FenceValue,
    resources: R,
}

impl<R> FrameSlot<R> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// 该帧槽最后一次提交时 signal 的值
    pub fn fence(&self) -> FenceValue {
        self.fence
    }

    pub fn resources(&self) -> &R {
        &self.resources
    }
}

/// GPU 空闲凭证
///
/// 只能由 `FrameSync::wait_for_gpu` 或 `FrameSync::drain` 构造。
#[derive(Debug)]
pub struct GpuIdle {
    fence: FenceValue,
}

impl GpuIdle {
    /// 空闲时已完成的 fence 值
    pub fn fence(&self) -> FenceValue {
        self.fence
    }
}

/// 同步统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_submitted: u64,
    /// CPU 因 fence 未完成而阻塞的次数
    pub cpu_waits: u64,
    pub last_signaled: FenceValue,
    pub last_completed: FenceValue,
}

/// 帧同步器
pub struct FrameSync<B: Backend, R> {
    slots: Vec<FrameSlot<R>>,
    current: usize,
    timeline: FenceTimeline,
    stats: SyncStats,
    /// 已执行但 signal 失败的提交；下一次等待前必须用新值覆盖
    unfenced: Option<FenceValue>,
    _backend: PhantomData<fn() -> B>,
}

impl<B: Backend, R> FrameSync<B, R> {
    /// 用每个帧槽的资源创建同步器；帧槽数量即 `resources.len()`
    pub fn new(resources: Vec<R>) -> Result<Self> {
        if resources.len() < 2 {
            return Err(EngineError::Initialization(format!(
                "frame sync needs at least 2 slots, got {}",
                resources.len()
            )));
        }

        let slots = resources
            .into_iter()
            .enumerate()
            .map(|(index, resources)| FrameSlot {
                index,
                state: SlotState::Signaled,
                fence: FenceValue::ZERO,
                resources,
            })
            .collect();

        Ok(Self {
            slots,
            current: 0,
            timeline: FenceTimeline::default(),
            stats: SyncStats::default(),
            unfenced: None,
            _backend: PhantomData,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    /// 下一帧将要使用的帧槽
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> &[FrameSlot<R>] {
        &self.slots
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// 最后分配的 fence 值，覆盖目前为止执行过的全部工作
    pub fn last_issued(&self) -> FenceValue {
        self.timeline.last_issued
    }

    /// 获取当前帧槽的租约
    ///
    /// 如果该帧槽上一次提交的 fence 尚未完成，则阻塞等待。
    pub fn begin_frame(&mut self, queue: &B::Queue) -> Result<SlotLease<'_, B, R>> {
        self.cover_unfenced(queue)?;
        let index = self.current;
        let fence = self.slots[index].fence;

        if queue.completed_value() < fence {
            tracing::trace!(slot = index, fence = fence.value(), "Waiting for frame slot");
            queue.wait_for(fence)?;
            self.stats.cpu_waits += 1;
        }
        self.stats.last_completed = queue.completed_value();

        let slot = &mut self.slots[index];
        debug_assert_ne!(slot.state, SlotState::Recording);
        slot.state = SlotState::Recording;

        Ok(SlotLease {
            sync: self,
            index,
            submitted: false,
        })
    }

    /// 把已完成的帧槽标记为 `Signaled`，不阻塞
    pub fn poll(&mut self, queue: &B::Queue) {
        let completed = queue.completed_value();
        self.mark_completed(completed);
    }

    /// 完全刷新：signal 一个新值并等待它完成
    pub fn wait_for_gpu(&mut self, queue: &B::Queue) -> Result<GpuIdle> {
        let value = self.timeline.issue();
        queue.signal(value)?;
        self.stats.last_signaled = value;
        self.unfenced = None;
        queue.wait_for(value)?;
        self.stats.cpu_waits += 1;
        self.mark_completed(value);
        tracing::debug!(fence = value.value(), "GPU flushed");
        Ok(GpuIdle { fence: value })
    }

    /// 等待所有帧槽中最大的 fence 值，用于关闭前排空队列
    pub fn drain(&mut self, queue: &B::Queue) -> Result<GpuIdle> {
        self.cover_unfenced(queue)?;
        let max = self
            .slots
            .iter()
            .map(|slot| slot.fence)
            .max()
            .unwrap_or(FenceValue::ZERO)
            .max(self.stats.last_signaled);

        if queue.completed_value() < max {
            queue.wait_for(max)?;
            self.stats.cpu_waits += 1;
        }
        self.mark_completed(max);
        tracing::debug!(fence = max.value(), "Frame slots drained");
        Ok(GpuIdle { fence: max })
    }

    /// 在 GPU 空闲时重建每个帧槽的资源（例如对象容量增长）
    pub fn rebuild_resources<F>(&mut self, _idle: &GpuIdle, mut rebuild: F) -> Result<()>
    where
        F: FnMut(usize, &mut R) -> Result<()>,
    {
        for slot in &mut self.slots {
            rebuild(slot.index, &mut slot.resources)?;
        }
        Ok(())
    }

    /// 队列按顺序执行，后来的 signal 同样覆盖之前未被 signal 的工作
    fn cover_unfenced(&mut self, queue: &B::Queue) -> Result<()> {
        let Some(lost) = self.unfenced else {
            return Ok(());
        };
        let value = self.timeline.issue();
        queue.signal(value)?;
        self.stats.last_signaled = value;
        self.unfenced = None;
        tracing::warn!(lost = lost.value(), fence = value.value(), "Unsignaled submission covered by a new fence");
        Ok(())
    }

    fn mark_completed(&mut self, completed: FenceValue) {
        self.stats.last_completed = self.stats.last_completed.max(completed);
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted && slot.fence <= completed {
                slot.state = SlotState::Signaled;
            }
        }
    }
}

/// 帧槽租约
///
/// 构造时已经完成等待；`submit` 消费租约并推进环形缓冲。
/// 未提交就被丢弃的租约会把帧槽恢复为 `Signaled`。
pub struct SlotLease<'a, B: Backend, R> {
    sync: &'a mut FrameSync<B, R>,
    index: usize,
    submitted: bool,
}

impl<'a, B: Backend, R> SlotLease<'a, B, R> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn resources(&self) -> &R {
        &self.sync.slots[self.index].resources
    }

    pub fn resources_mut(&mut self) -> &mut R {
        &mut self.sync.slots[self.index].resources
    }

    /// 执行命令列表、呈现并 signal 新的 fence 值
    ///
    /// 呈现失败时仍然 signal，保证帧槽的 fence 覆盖已经执行的命令。
    /// 执行成功后帧槽即视为 `Submitted`；signal 失败时记录下来，
    /// 由下一次 `begin_frame` / `drain` 先 signal 一个更大的值再等待。
    pub fn submit<P>(mut self, queue: &B::Queue, list: &B::CommandList, present: P) -> Result<FenceValue>
    where
        P: FnOnce() -> Result<()>,
    {
        queue.execute(list)?;
        let present_result = present();

        let sync = &mut *self.sync;
        let value = sync.timeline.issue();
        let slot = &mut sync.slots[self.index];
        slot.fence = value;
        slot.state = SlotState::Submitted;
        self.submitted = true;
        sync.stats.frames_submitted += 1;
        sync.current = (sync.current + 1) % sync.slots.len();

        if let Err(e) = queue.signal(value) {
            tracing::error!(slot = self.index, fence = value.value(), error = %e, "Signal failed after execute");
            sync.unfenced = Some(value);
            return Err(e);
        }
        sync.stats.last_signaled = value;

        present_result.map(|()| value)
    }
}

impl<'a, B: Backend, R> Drop for SlotLease<'a, B, R> {
    fn drop(&mut self) {
        if !self.submitted {
            let slot = &mut self.sync.slots[self.index];
            if slot.state == SlotState::Recording {
                slot.state = SlotState::Signaled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{CompletionMode, GpuEvent, HeadlessBackend, HeadlessInstance};
    use crate::gfx::{Device, FeatureLevel, Instance};
    use std::time::Duration;

    type Sync3 = FrameSync<HeadlessBackend, u32>;

    fn setup(mode: CompletionMode) -> (
        <HeadlessBackend as Backend>::Device,
        <HeadlessBackend as Backend>::Queue,
        <HeadlessBackend as Backend>::CommandList,
    ) {
        let instance = HeadlessInstance::with_mode(mode);
        let device = instance.create_device(0, FeatureLevel::Level12_0).unwrap();
        let queue = device.create_queue().unwrap();
        let allocator = device.create_command_allocator("test").unwrap();
        let list = device.create_command_list(&allocator).unwrap();
        (device, queue, list)
    }

    #[test]
    fn test_fence_value_ordering() {
        let f1 = FenceValue::new(1);
        let f2 = FenceValue::new(2);
        assert!(f1 < f2);
        assert_eq!(f1.next(), f2);
        assert_eq!(FenceValue::ZERO.value(), 0);
    }

    #[test]
    fn test_timeline_is_monotonic() {
        let mut timeline = FenceTimeline::default();
        let a = timeline.issue();
        let b = timeline.issue();
        assert!(b > a);
        assert_eq!(a.value(), 1);
    }

    #[test]
    fn test_requires_two_slots() {
        assert!(Sync3::new(vec![0]).is_err());
        assert!(Sync3::new(vec![0, 1]).is_ok());
    }

    #[test]
    fn test_ring_advances_without_waiting_until_full() {
        let (_device, queue, list) = setup(CompletionMode::OnWait);
        let mut sync = Sync3::new(vec![0, 1, 2]).unwrap();

        for expected in 1..=3u64 {
            let lease = sync.begin_frame(&queue).unwrap();
            let value = lease.submit(&queue, &list, || Ok(())).unwrap();
            assert_eq!(value.value(), expected);
        }
        assert_eq!(sync.stats().cpu_waits, 0);
        assert!(sync.slots().iter().all(|s| s.state() == SlotState::Submitted));

        // 第四帧复用帧槽 0，必须等待 fence 1
        let lease = sync.begin_frame(&queue).unwrap();
        assert_eq!(lease.index(), 0);
        drop(lease);
        assert_eq!(sync.stats().cpu_waits, 1);
        assert!(queue.completed_value() >= FenceValue::new(1));
    }

    #[test]
    fn test_dropped_lease_returns_slot() {
        let (_device, queue, _list) = setup(CompletionMode::Immediate);
        let mut sync = Sync3::new(vec![0, 1]).unwrap();
        {
            let mut lease = sync.begin_frame(&queue).unwrap();
            *lease.resources_mut() = 42;
        }
        assert_eq!(sync.slots()[0].state(), SlotState::Signaled);
        assert_eq!(sync.current_index(), 0);
        assert_eq!(*sync.slots()[0].resources(), 42);
    }

    #[test]
    fn test_begin_frame_blocks_until_gpu_completes() {
        let (device, queue, list) = setup(CompletionMode::Manual);
        let timeline = device.timeline();
        let mut sync = Sync3::new(vec![0, 1]).unwrap();

        for _ in 0..2 {
            let lease = sync.begin_frame(&queue).unwrap();
            lease.submit(&queue, &list, || Ok(())).unwrap();
        }
        assert_eq!(queue.completed_value(), FenceValue::ZERO);

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            timeline.complete_up_to(1);
        });

        let lease = sync.begin_frame(&queue).unwrap();
        assert_eq!(lease.index(), 0);
        drop(lease);
        worker.join().unwrap();

        assert!(queue.completed_value() >= FenceValue::new(1));
        assert_eq!(sync.slots()[1].state(), SlotState::Submitted);
    }

    #[test]
    fn test_poll_marks_completed_slots() {
        let (device, queue, list) = setup(CompletionMode::Manual);
        let mut sync = Sync3::new(vec![0, 1, 2]).unwrap();
        for _ in 0..2 {
            let lease = sync.begin_frame(&queue).unwrap();
            lease.submit(&queue, &list, || Ok(())).unwrap();
        }
        device.timeline().complete_up_to(1);
        sync.poll(&queue);
        assert_eq!(sync.slots()[0].state(), SlotState::Signaled);
        assert_eq!(sync.slots()[1].state(), SlotState::Submitted);
    }

    #[test]
    fn test_wait_for_gpu_and_drain() {
        let (_device, queue, list) = setup(CompletionMode::OnWait);
        let mut sync = Sync3::new(vec![0, 1, 2]).unwrap();
        for _ in 0..2 {
            let lease = sync.begin_frame(&queue).unwrap();
            lease.submit(&queue, &list, || Ok(())).unwrap();
        }

        let idle = sync.wait_for_gpu(&queue).unwrap();
        assert_eq!(idle.fence().value(), 3);
        assert_eq!(queue.completed_value().value(), 3);
        assert!(sync.slots().iter().all(|s| s.state() == SlotState::Signaled));

        let lease = sync.begin_frame(&queue).unwrap();
        lease.submit(&queue, &list, || Ok(())).unwrap();
        let idle = sync.drain(&queue).unwrap();
        assert_eq!(idle.fence().value(), 4);
        assert_eq!(queue.completed_value().value(), 4);
    }

    #[test]
    fn test_present_failure_still_signals() {
        let (_device, queue, list) = setup(CompletionMode::OnWait);
        let mut sync = Sync3::new(vec![0, 1]).unwrap();
        let lease = sync.begin_frame(&queue).unwrap();
        let result = lease.submit(&queue, &list, || {
            Err(EngineError::Runtime("present failed".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(sync.stats().last_signaled.value(), 1);
        assert_eq!(sync.slots()[0].state(), SlotState::Submitted);
    }

    #[test]
    fn test_failed_signal_keeps_slot_busy() {
        let (device, queue, list) = setup(CompletionMode::OnWait);
        let mut sync = Sync3::new(vec![0, 1]).unwrap();
        // 队列已经越过帧同步分配的值，下一次 signal 会被拒绝
        queue.signal(FenceValue::new(5)).unwrap();

        let lease = sync.begin_frame(&queue).unwrap();
        assert!(lease.submit(&queue, &list, || Ok(())).is_err());
        assert_eq!(sync.slots()[0].state(), SlotState::Submitted);
        assert_eq!(sync.slots()[0].fence().value(), 1);

        // 覆盖用的 signal 同样失败，帧槽不能被当作空闲复用
        assert!(sync.begin_frame(&queue).is_err());
        assert!(sync.drain(&queue).is_err());
        assert_eq!(sync.slots()[0].state(), SlotState::Submitted);
        assert_eq!(device.events().count(|e| *e == GpuEvent::Signaled(1)), 0);
    }

    #[test]
    fn test_unsignaled_submission_is_covered_before_reuse() {
        let (_device, queue, list) = setup(CompletionMode::OnWait);
        let mut sync = Sync3::new(vec![0, 1]).unwrap();
        let lease = sync.begin_frame(&queue).unwrap();
        lease.submit(&queue, &list, || Ok(())).unwrap();

        // 帧 1 已执行但 fence 1 的 signal 丢失
        sync.unfenced = Some(FenceValue::new(1));

        let lease = sync.begin_frame(&queue).unwrap();
        assert_eq!(lease.index(), 1);
        drop(lease);
        assert_eq!(sync.stats().last_signaled.value(), 2);
        assert!(sync.unfenced.is_none());
        let idle = sync.drain(&queue).unwrap();
        assert_eq!(idle.fence().value(), 2);
        assert!(sync.slots().iter().all(|s| s.state() == SlotState::Signaled));
    }
}
