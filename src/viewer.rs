/// 渲染器 (macroquad + egui)
///
/// Blits whatever the pipeline last published and draws the status panel.
use std::time::Instant;

use egui_macroquad::egui;
use image::RgbImage;
use macroquad::prelude::*;

use crate::input::ConnectionState;
use crate::pipeline::{PipelineStats, RenderSurface};

/// What the user asked for this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UiAction {
    pub toggle_pause: bool,
    pub exit: bool,
}

pub struct Viewer {
    texture: Option<Texture2D>,
    rgba: Vec<u8>,
    shown_sequence: u64,
    render_count: u64,
    render_last: Instant,
    render_fps: f64,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            texture: None,
            rgba: Vec::new(),
            shown_sequence: 0,
            render_count: 0,
            render_last: Instant::now(),
            render_fps: 0.0,
        }
    }

    /// Upload the latest published image if it changed since last frame.
    pub fn update(&mut self, surface: &RenderSurface) {
        let Some(latest) = surface.latest() else {
            return;
        };
        if latest.sequence == self.shown_sequence {
            return;
        }
        self.shown_sequence = latest.sequence;

        let (w, h) = latest.image.dimensions();
        rgb_to_rgba(&latest.image, &mut self.rgba);

        // 只在分辨率变化时重建纹理
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != w as f32 || tex.height() != h as f32,
            None => true,
        };
        if needs_rebuild {
            let texture = Texture2D::from_rgba8(w as u16, h as u16, &self.rgba);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            tex.update(&Image {
                bytes: self.rgba.clone(),
                width: w as u16,
                height: h as u16,
            });
        }
    }

    pub fn draw(&mut self) {
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            let (x, y, w, h) = fit_rect(
                texture.width(),
                texture.height(),
                screen_width(),
                screen_height(),
            );
            draw_texture_ex(
                texture,
                x,
                y,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }

        self.render_count += 1;
        let elapsed = self.render_last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.render_fps = self.render_count as f64 / elapsed;
            self.render_count = 0;
            self.render_last = Instant::now();
        }
    }

    /// Status panel plus keyboard: Space toggles pause, Escape exits.
    pub fn draw_ui(&mut self, stats: &PipelineStats) -> UiAction {
        let mut action = UiAction {
            toggle_pause: is_key_pressed(KeyCode::Space),
            exit: is_key_pressed(KeyCode::Escape),
        };
        let render_fps = self.render_fps;

        egui_macroquad::ui(|egui_ctx| {
            egui::Window::new("状态")
                .default_pos(egui::pos2(10.0, 10.0))
                .resizable(false)
                .show(egui_ctx, |ui| {
                    ui.horizontal(|ui| {
                        ui.label("连接:");
                        ui.colored_label(
                            state_color(stats.connection),
                            stats.connection.label(),
                        );
                    });
                    ui.label(format!(
                        "ticks {} | frames {} | render {:.1} fps",
                        stats.ticks, stats.frames, render_fps
                    ));
                    ui.label(format!(
                        "detection {} | runs {} | boxes {}",
                        stats.detection, stats.inferences, stats.detections
                    ));
                    if stats.skipped > 0 {
                        ui.label(format!("skipped {}", stats.skipped));
                    }
                    if let Some(err) = &stats.last_error {
                        ui.colored_label(egui::Color32::LIGHT_RED, err.as_str());
                    }

                    ui.separator();
                    let text = if stats.paused { "▶ 继续" } else { "⏸ 暂停" };
                    if ui.button(text).clicked() {
                        action.toggle_pause = true;
                    }
                });
        });
        egui_macroquad::draw();

        action
    }
}

fn state_color(state: ConnectionState) -> egui::Color32 {
    match state {
        ConnectionState::Streaming => egui::Color32::GREEN,
        ConnectionState::Connecting | ConnectionState::Reconnecting => egui::Color32::YELLOW,
        ConnectionState::Failed => egui::Color32::RED,
        ConnectionState::Closed => egui::Color32::GRAY,
    }
}

/// Interleaved RGB → RGBA with opaque alpha, reusing `out`.
pub fn rgb_to_rgba(image: &RgbImage, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(image.as_raw().len() / 3 * 4);
    for px in image.as_raw().chunks_exact(3) {
        out.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
}

/// Largest rect with the texture's aspect ratio centred in the screen.
pub fn fit_rect(tex_w: f32, tex_h: f32, screen_w: f32, screen_h: f32) -> (f32, f32, f32, f32) {
    if tex_w <= 0.0 || tex_h <= 0.0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let scale = (screen_w / tex_w).min(screen_h / tex_h);
    let (w, h) = (tex_w * scale, tex_h * scale);
    ((screen_w - w) / 2.0, (screen_h - h) / 2.0, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_has_opaque_alpha() {
        let image = RgbImage::from_pixel(2, 1, image::Rgb([1, 2, 3]));
        let mut out = vec![9; 100];
        rgb_to_rgba(&image, &mut out);
        assert_eq!(out, vec![1, 2, 3, 255, 1, 2, 3, 255]);
    }

    #[test]
    fn wide_texture_is_letterboxed() {
        let (x, y, w, h) = fit_rect(1920.0, 1080.0, 960.0, 1000.0);
        assert_eq!((x, w), (0.0, 960.0));
        assert_eq!((y, h), (230.0, 540.0));
    }

    #[test]
    fn tall_texture_is_pillarboxed() {
        let (x, y, w, h) = fit_rect(480.0, 640.0, 1280.0, 640.0);
        assert_eq!((y, h), (0.0, 640.0));
        assert_eq!((x, w), (400.0, 480.0));
    }
}
