//! 渲染统计
//!
//! `FrameTimer` 记录帧间隔并每秒刷新一次 FPS；`FrameStats` 是渲染器每帧
//! 对外发布的快照，编辑器的统计面板直接显示它。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::renderer::descriptor::DescriptorHeapStats;

/// 帧计时器（帧率、帧时间、最近若干帧的历史）
#[derive(Debug, Clone)]
pub struct FrameTimer {
    frame_count: u32,
    last_update: Instant,
    last_frame: Option<Instant>,
    fps: f32,
    frame_time_ms: f32,
    history: VecDeque<f32>,
    capacity: usize,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(120)
    }
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frame_count: 0,
            last_update: Instant::now(),
            last_frame: None,
            fps: 0.0,
            frame_time_ms: 0.0,
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// 记录一帧
    pub fn record_frame(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_frame.replace(now) {
            self.push_sample(now.duration_since(last));
        }

        self.frame_count += 1;
        let elapsed = now.duration_since(self.last_update);
        // 每秒更新一次 FPS
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.last_update = now;
        }
    }

    /// 直接追加一个帧间隔
    pub fn push_sample(&mut self, frame_time: Duration) {
        let ms = frame_time.as_secs_f32() * 1000.0;
        self.frame_time_ms = ms;
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(ms);
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// 最近一帧的帧时间（毫秒）
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn max_ms(&self) -> f32 {
        self.history.iter().copied().fold(0.0, f32::max)
    }
}

/// 渲染器统计快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub backend: &'static str,
    pub adapter: String,
    /// 已提交的帧数
    pub frame_number: u64,
    pub frames_in_flight: usize,
    pub last_signaled: u64,
    pub last_completed: u64,
    /// CPU 因 fence 阻塞的次数
    pub cpu_waits: u64,
    /// 窗口最小化时跳过的帧数
    pub skipped_frames: u64,
    pub draw_calls: u32,
    pub object_capacity: u32,
    pub extent: (u32, u32),
    pub fps: f32,
    pub frame_time_ms: f32,
    pub heaps: Vec<DescriptorHeapStats>,
}

impl FrameStats {
    /// 仍在 GPU 上执行的帧数
    pub fn frames_pending(&self) -> u64 {
        self.last_signaled.saturating_sub(self.last_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut timer = FrameTimer::new(3);
        for ms in [10, 20, 30, 40] {
            timer.push_sample(Duration::from_millis(ms));
        }
        let history: Vec<_> = timer.history().map(|v| v.round() as u32).collect();
        assert_eq!(history, vec![20, 30, 40]);
        assert_eq!(timer.max_ms().round() as u32, 40);
        assert_eq!(timer.frame_time_ms().round() as u32, 40);
    }

    #[test]
    fn test_frames_pending() {
        let stats = FrameStats {
            last_signaled: 7,
            last_completed: 5,
            ..Default::default()
        };
        assert_eq!(stats.frames_pending(), 2);
    }
}
