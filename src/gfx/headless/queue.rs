//! 模拟时间线与命令队列

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{CompletionMode, EventLog, GpuEvent, HeadlessBackend, HeadlessCommandList};
use crate::core::error::{GraphicsError, Result};
use crate::gfx::{CommandQueue, GpuAddress};
use crate::renderer::sync::FenceValue;

/// 被 GPU 读取的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tracked {
    Allocator(u64),
    Buffer(u64),
    Texture(u64),
}

/// 写入描述符槽的视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    Cbv(GpuAddress),
    Srv(u64),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TextureInfo {
    pub width: u32,
    pub height: u32,
    /// 是否已有拷贝写入；没有内容的纹理不能被采样
    pub written: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapRange {
    pub cpu_start: usize,
    pub gpu_start: u64,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferRange {
    pub id: u64,
    pub base: GpuAddress,
    pub size: u64,
}

#[derive(Debug)]
pub(crate) struct TimelineState {
    pub mode: CompletionMode,
    pub completed: u64,
    pub signaled: u64,
    /// 已执行但尚未被 signal 覆盖的引用
    pub unsignaled: Vec<Tracked>,
    /// 每个对象最后一次被哪个 fence 值覆盖
    pub guarded_by: HashMap<Tracked, u64>,
    /// CPU 句柄 → 描述符内容
    pub views: HashMap<usize, View>,
    pub textures: HashMap<u64, TextureInfo>,
    pub shader_heaps: HashMap<u64, HeapRange>,
    pub buffers: HashMap<u64, BufferRange>,
    next_id: u64,
    next_address: GpuAddress,
    next_cpu_handle: usize,
    next_gpu_handle: u64,
}

impl TimelineState {
    /// 对象是否仍被 GPU 使用；返回守护它的 fence 值
    pub fn in_use(&self, object: Tracked) -> Option<u64> {
        if self.unsignaled.contains(&object) {
            return Some(self.signaled + 1);
        }
        self.guarded_by
            .get(&object)
            .copied()
            .filter(|&fence| fence > self.completed)
    }

    pub fn allocate_address(&mut self, size: u64) -> GpuAddress {
        let address = self.next_address;
        // 64 KiB 对齐，与 D3D12 资源放置对齐一致
        self.next_address += size.div_ceil(0x1_0000).max(1) * 0x1_0000;
        address
    }

    pub fn allocate_handles(&mut self, capacity: u32, shader_visible: bool) -> (usize, Option<u64>) {
        let span = capacity as usize * super::DESCRIPTOR_INCREMENT as usize;
        let cpu = self.next_cpu_handle;
        self.next_cpu_handle += span + 0x1000;
        let gpu = shader_visible.then(|| {
            let gpu = self.next_gpu_handle;
            self.next_gpu_handle += span as u64 + 0x1000;
            gpu
        });
        (cpu, gpu)
    }

    /// 根据 GPU 地址找到所属缓冲区
    pub fn buffer_at(&self, address: GpuAddress) -> Option<u64> {
        self.buffers
            .values()
            .find(|b| address >= b.base && address < b.base + b.size)
            .map(|b| b.id)
    }

    /// 根据着色器可见描述符的 GPU 句柄找到其中的视图
    pub fn view_at(&self, gpu_handle: u64) -> Option<View> {
        let span = |h: &HeapRange| h.capacity as u64 * super::DESCRIPTOR_INCREMENT as u64;
        let heap = self
            .shader_heaps
            .values()
            .find(|h| gpu_handle >= h.gpu_start && gpu_handle < h.gpu_start + span(h))?;
        let cpu = heap.cpu_start + (gpu_handle - heap.gpu_start) as usize;
        self.views.get(&cpu).copied()
    }
}

pub(crate) struct Shared {
    pub state: Mutex<TimelineState>,
    pub progressed: Condvar,
    pub events: EventLog,
}

impl Shared {
    pub fn new(mode: CompletionMode, events: EventLog) -> Self {
        Self {
            state: Mutex::new(TimelineState {
                mode,
                completed: 0,
                signaled: 0,
                unsignaled: Vec::new(),
                guarded_by: HashMap::new(),
                views: HashMap::new(),
                textures: HashMap::new(),
                shader_heaps: HashMap::new(),
                buffers: HashMap::new(),
                next_id: 1,
                next_address: 0x1_0000_0000,
                next_cpu_handle: 0x10_0000,
                next_gpu_handle: 0x2000_0000_0000,
            }),
            progressed: Condvar::new(),
            events,
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn complete_locked(&self, state: &mut TimelineState, value: u64) {
        let value = value.min(state.signaled);
        if value > state.completed {
            state.completed = value;
            self.events.push(GpuEvent::Completed(value));
            self.progressed.notify_all();
        }
    }
}

/// 时间线句柄
///
/// `Manual` 模式下由测试（或模拟 GPU 的线程）推进。
#[derive(Clone)]
pub struct HeadlessTimeline {
    shared: Arc<Shared>,
}

impl HeadlessTimeline {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// 让 GPU 完成到 `value`（不超过已 signal 的值）
    pub fn complete_up_to(&self, value: u64) {
        let mut state = self.shared.state.lock();
        self.shared.complete_locked(&mut state, value);
    }

    /// 完成所有已 signal 的工作
    pub fn complete_all(&self) {
        let mut state = self.shared.state.lock();
        let signaled = state.signaled;
        self.shared.complete_locked(&mut state, signaled);
    }

    pub fn completed(&self) -> u64 {
        self.shared.state.lock().completed
    }

    pub fn last_signaled(&self) -> u64 {
        self.shared.state.lock().signaled
    }

    pub fn events(&self) -> EventLog {
        self.shared.events.clone()
    }
}

/// 直接命令队列
pub struct HeadlessQueue {
    shared: Arc<Shared>,
}

impl HeadlessQueue {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl CommandQueue<HeadlessBackend> for HeadlessQueue {
    fn execute(&self, list: &HeadlessCommandList) -> Result<()> {
        if list.is_recording() {
            return Err(GraphicsError::Validation(
                "ExecuteCommandLists called with a command list that is not closed".to_string(),
            )
            .into());
        }

        let mut state = self.shared.state.lock();
        state.unsignaled.extend(list.references().iter().copied());
        self.shared.events.push(GpuEvent::Executed {
            list: list.id(),
            draws: list.draw_count(),
        });
        Ok(())
    }

    fn signal(&self, value: FenceValue) -> Result<()> {
        let mut state = self.shared.state.lock();
        let value = value.value();
        if value <= state.signaled {
            return Err(GraphicsError::Validation(format!(
                "fence signaled with {value}, which is not greater than {}",
                state.signaled
            ))
            .into());
        }

        state.signaled = value;
        let pending = std::mem::take(&mut state.unsignaled);
        for object in pending {
            state.guarded_by.insert(object, value);
        }
        self.shared.events.push(GpuEvent::Signaled(value));

        if state.mode == CompletionMode::Immediate {
            self.shared.complete_locked(&mut state, value);
        }
        Ok(())
    }

    fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.shared.state.lock().completed)
    }

    fn wait_for(&self, value: FenceValue) -> Result<()> {
        let value = value.value();
        let mut state = self.shared.state.lock();
        if state.completed >= value {
            return Ok(());
        }
        if value > state.signaled {
            return Err(GraphicsError::Validation(format!(
                "waiting for fence {value}, which was never signaled (last {})",
                state.signaled
            ))
            .into());
        }

        self.shared.events.push(GpuEvent::CpuWait(value));
        match state.mode {
            CompletionMode::Manual => {
                while state.completed < value {
                    self.shared.progressed.wait(&mut state);
                }
            }
            CompletionMode::OnWait | CompletionMode::Immediate => {
                self.shared.complete_locked(&mut state, value);
            }
        }
        Ok(())
    }
}
