//! 帧时间柱状图
//!
//! 在 UI 通道绘制，位于屏幕左下角。每次 `paint` 视为一帧。

use std::time::Duration;

use crate::core::math::Color;
use crate::renderer::pass::{OverlayMesh, OverlayPainter, RenderPass};
use crate::renderer::stats::FrameTimer;

const BAR_WIDTH: f32 = 3.0;
const GRAPH_HEIGHT: f32 = 60.0;
const MARGIN: f32 = 8.0;
/// 超过该帧时间的柱子画成红色
const BUDGET_MS: f32 = 1000.0 / 60.0;

pub struct FrameTimeGraph {
    timer: FrameTimer,
    background: u32,
    normal: u32,
    over_budget: u32,
}

impl Default for FrameTimeGraph {
    fn default() -> Self {
        Self::new(120)
    }
}

impl FrameTimeGraph {
    pub fn new(samples: usize) -> Self {
        Self {
            timer: FrameTimer::new(samples),
            background: Color::new(0.0, 0.0, 0.0, 0.5).to_rgba8(),
            normal: Color::new(0.3, 0.85, 0.4, 1.0).to_rgba8(),
            over_budget: Color::new(0.9, 0.25, 0.2, 1.0).to_rgba8(),
        }
    }

    /// 直接追加一个样本（测试与回放使用）
    pub fn push_sample(&mut self, frame_time: Duration) {
        self.timer.push_sample(frame_time);
    }

    fn build(&self, screen: (u32, u32)) -> OverlayMesh {
        let mut mesh = OverlayMesh::default();
        let samples = self.timer.history().len();
        if samples == 0 {
            return mesh;
        }

        let bottom = screen.1 as f32 - MARGIN;
        let width = samples as f32 * BAR_WIDTH;
        mesh.push_rect([MARGIN, bottom - GRAPH_HEIGHT], [MARGIN + width, bottom], self.background);

        // 纵轴至少覆盖两倍预算，避免柱子顶满
        let scale = GRAPH_HEIGHT / self.timer.max_ms().max(BUDGET_MS * 2.0);
        for (i, ms) in self.timer.history().enumerate() {
            let x = MARGIN + i as f32 * BAR_WIDTH;
            let height = (ms * scale).min(GRAPH_HEIGHT);
            let color = if ms > BUDGET_MS { self.over_budget } else { self.normal };
            mesh.push_rect([x, bottom - height], [x + BAR_WIDTH - 1.0, bottom], color);
        }
        mesh
    }
}

impl OverlayPainter for FrameTimeGraph {
    fn pass(&self) -> RenderPass {
        RenderPass::Ui
    }

    fn paint(&mut self, screen: (u32, u32)) -> Vec<OverlayMesh> {
        self.timer.record_frame();
        let mesh = self.build(screen);
        if mesh.is_empty() {
            Vec::new()
        } else {
            vec![mesh]
        }
    }
}
