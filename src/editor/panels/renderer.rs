//! 渲染器统计与后处理面板

use egui;

use crate::renderer::constant_buffer::PostFxConstants;
use crate::renderer::stats::FrameStats;

pub fn render(ui: &mut egui::Ui, stats: &FrameStats) {
    ui.label(format!("Backend: {} ({})", stats.backend, stats.adapter));
    ui.label(format!("Extent: {} x {}", stats.extent.0, stats.extent.1));
    ui.label(format!("FPS: {:.1}", stats.fps));
    ui.label(format!("Frame time: {:.2} ms", stats.frame_time_ms));

    ui.collapsing("Frame sync", |ui| {
        ui.label(format!("Frames submitted: {}", stats.frame_number));
        ui.label(format!("Frames in flight: {}", stats.frames_in_flight));
        ui.label(format!(
            "Fence: signaled {} / completed {} ({} pending)",
            stats.last_signaled,
            stats.last_completed,
            stats.frames_pending()
        ));
        ui.label(format!("CPU waits: {}", stats.cpu_waits));
        ui.label(format!("Skipped (minimized): {}", stats.skipped_frames));
        ui.label(format!("Draw calls: {}", stats.draw_calls));
        ui.label(format!("Object capacity: {}", stats.object_capacity));
    });

    ui.collapsing("Descriptor heaps", |ui| {
        for heap in &stats.heaps {
            ui.add(
                egui::ProgressBar::new(heap.usage_ratio).text(format!(
                    "{} [{}] {}/{}",
                    heap.name,
                    heap.heap_type.name(),
                    heap.used,
                    heap.capacity
                )),
            );
        }
    });
}

fn toggle(ui: &mut egui::Ui, flag: &mut i32, label: &str) {
    let mut enabled = *flag != 0;
    ui.checkbox(&mut enabled, label);
    *flag = enabled as i32;
}

pub fn post_processing(ui: &mut egui::Ui, post_fx: &mut PostFxConstants) {
    ui.collapsing("Post processing", |ui| {
        toggle(ui, &mut post_fx.vignette_enabled, "Vignette");
        ui.add(egui::Slider::new(&mut post_fx.vignette_inner_radius, 0.0..=1.0).text("inner radius"));
        ui.add(egui::Slider::new(&mut post_fx.vignette_outer_radius, 0.0..=2.0).text("outer radius"));
        ui.add(egui::Slider::new(&mut post_fx.vignette_opacity, 0.0..=1.0).text("opacity"));

        toggle(ui, &mut post_fx.grain_enabled, "Film grain");
        ui.add(egui::Slider::new(&mut post_fx.grain_strength, 0.0..=64.0).text("strength"));

        toggle(ui, &mut post_fx.aberration_enabled, "Chromatic aberration");
        ui.add(egui::Slider::new(&mut post_fx.aberration_intensity, 0.0..=4.0).text("intensity"));
    });
}
