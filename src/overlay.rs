/// 检测框绘制 (Detection overlay)
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::RgbImage;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::detection::Detection;

const LABEL_SCALE: f32 = 18.0;

pub struct Overlay {
    font: Option<FontArc>,
    scale: PxScale,
    show_confidence: bool,
}

impl Overlay {
    /// Without a usable font only rectangles are drawn.
    pub fn load(font_path: Option<&str>, show_confidence: bool) -> Self {
        let font = font_path.and_then(|path| match load_font(Path::new(path)) {
            Ok(font) => {
                info!("label font loaded from {}", path);
                Some(font)
            }
            Err(e) => {
                warn!("no label font ({}): {}", path, e);
                None
            }
        });
        Self {
            font,
            scale: PxScale::from(LABEL_SCALE),
            show_confidence,
        }
    }

    pub fn without_labels() -> Self {
        Self {
            font: None,
            scale: PxScale::from(LABEL_SCALE),
            show_confidence: false,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn label(&self, detection: &Detection) -> String {
        if self.show_confidence {
            format!("{} {:.2}", detection.class.name(), detection.confidence)
        } else {
            detection.class.name().to_string()
        }
    }

    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            let color = detection.class.color();

            let x = detection.left.round() as i32;
            let y = detection.top.round() as i32;
            let width = detection.width.round() as u32;
            let height = detection.height.round() as u32;
            if width == 0 || height == 0 {
                continue;
            }

            // 2px border
            draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
            if width > 2 && height > 2 {
                let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
                draw_hollow_rect_mut(image, inner, color);
            }

            if let Some(font) = &self.font {
                let label = self.label(detection);
                let text_y = (y - self.scale.y as i32 - 2).max(0);
                draw_text_mut(image, color, x, text_y, self.scale, font, &label);
            }
        }
    }
}

fn load_font(path: &Path) -> Result<FontArc, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    FontArc::try_from_vec(data).map_err(|e| e.to_string())
}
