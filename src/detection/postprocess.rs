/// 后处理: 原始张量 → 检测框
///
/// Decodes (1, C, P) YOLO-style tensors into image-space rectangles, filters by
/// per-class thresholds and runs NMS over the candidates of every role.
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::nms::{non_max_suppression, non_max_suppression_per_class};
use super::types::{Detection, DetectionTensor, DetectorRole, ObjectClass, RoleTensor};
use crate::config::{AppConfig, ConfidenceThresholds};

/// How a proposal row with several classes above threshold is labelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassPolicy {
    /// First tracked class, in priority order, that clears its threshold.
    #[default]
    FirstMatch,
    /// The clearing class with the highest score.
    HighestConfidence,
    /// One candidate per clearing class.
    All,
}

/// A class channel and the threshold it must exceed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassChannel {
    pub channel: usize,
    pub class: ObjectClass,
    pub threshold: f32,
}

/// Decoder for one role's tensor layout.
#[derive(Clone, Debug)]
pub struct TensorDecoder {
    channels: Vec<ClassChannel>,
    policy: ClassPolicy,
}

impl TensorDecoder {
    pub fn new(channels: Vec<ClassChannel>, policy: ClassPolicy) -> Self {
        Self { channels, policy }
    }

    /// Default channel map for `role` with thresholds taken from config.
    pub fn for_role(
        role: DetectorRole,
        thresholds: &ConfidenceThresholds,
        policy: ClassPolicy,
    ) -> Self {
        let channels = role
            .default_channels()
            .iter()
            .map(|&(channel, class)| ClassChannel {
                channel,
                class,
                threshold: thresholds.get(class),
            })
            .collect();
        Self::new(channels, policy)
    }

    /// Candidates in image pixels, before NMS.
    pub fn decode(
        &self,
        tensor: &DetectionTensor,
        image_width: u32,
        image_height: u32,
    ) -> Vec<Detection> {
        let data = &tensor.data;
        let channels = tensor.channels();
        if channels < 4 || tensor.input_width == 0 || tensor.input_height == 0 {
            return Vec::new();
        }
        let sx = image_width as f32 / tensor.input_width as f32;
        let sy = image_height as f32 / tensor.input_height as f32;

        let tracked: Vec<ClassChannel> = self
            .channels
            .iter()
            .copied()
            .filter(|c| c.channel < channels)
            .collect();

        let mut out = Vec::new();
        let mut hits: Vec<(ObjectClass, f32)> = Vec::with_capacity(tracked.len());
        for i in 0..tensor.proposals() {
            hits.clear();
            for c in &tracked {
                let score = data[[0, c.channel, i]];
                if score > c.threshold {
                    hits.push((c.class, score));
                    if self.policy == ClassPolicy::FirstMatch {
                        break;
                    }
                }
            }
            if hits.is_empty() {
                continue;
            }

            let (cx, cy, w, h) = (
                data[[0, 0, i]],
                data[[0, 1, i]],
                data[[0, 2, i]],
                data[[0, 3, i]],
            );
            let Some((left, top, width, height)) =
                rescale_and_clamp(cx, cy, w, h, sx, sy, image_width, image_height)
            else {
                continue;
            };

            let mut push = |class: ObjectClass, confidence: f32| {
                out.push(Detection {
                    left,
                    top,
                    width,
                    height,
                    class,
                    confidence,
                })
            };
            match self.policy {
                ClassPolicy::FirstMatch => push(hits[0].0, hits[0].1),
                ClassPolicy::HighestConfidence => {
                    // earliest class wins a tie
                    let mut best = hits[0];
                    for &hit in &hits[1..] {
                        if hit.1 > best.1 {
                            best = hit;
                        }
                    }
                    push(best.0, best.1)
                }
                ClassPolicy::All => {
                    for &(class, confidence) in &hits {
                        push(class, confidence)
                    }
                }
            }
        }
        out
    }
}

/// Center-size in network pixels → left/top/width/height in image pixels,
/// clamped to the image. `None` when nothing is left after clamping.
#[allow(clippy::too_many_arguments)]
fn rescale_and_clamp(
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    sx: f32,
    sy: f32,
    image_width: u32,
    image_height: u32,
) -> Option<(f32, f32, f32, f32)> {
    let left = ((cx - w / 2.0) * sx).max(0.0);
    let top = ((cy - h / 2.0) * sy).max(0.0);
    let right = ((cx + w / 2.0) * sx).min(image_width as f32);
    let bottom = ((cy + h / 2.0) * sy).min(image_height as f32);
    let (width, height) = (right - left, bottom - top);
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    Some((left, top, width, height))
}

/// All roles' tensors → final detection list.
#[derive(Clone, Debug)]
pub struct PostProcessor {
    decoders: Vec<(DetectorRole, TensorDecoder)>,
    iou_threshold: f32,
    /// Suppress only within a class, so `ClassPolicy::All` rows keep every class.
    per_class: bool,
}

impl PostProcessor {
    pub fn new(
        decoders: Vec<(DetectorRole, TensorDecoder)>,
        iou_threshold: f32,
        per_class: bool,
    ) -> Self {
        Self {
            decoders,
            iou_threshold,
            per_class,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let decoders = DetectorRole::ALL
            .into_iter()
            .map(|role| {
                (
                    role,
                    TensorDecoder::for_role(role, &config.confidence_threshold, config.class_policy),
                )
            })
            .collect();
        Self::new(
            decoders,
            config.nms_iou_threshold,
            config.class_policy == ClassPolicy::All,
        )
    }

    fn decoder(&self, role: DetectorRole) -> Option<&TensorDecoder> {
        self.decoders
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, d)| d)
    }

    pub fn process(
        &self,
        tensors: &[RoleTensor],
        image_width: u32,
        image_height: u32,
    ) -> Vec<Detection> {
        let mut candidates = Vec::new();
        for rt in tensors {
            let Some(decoder) = self.decoder(rt.role) else {
                continue;
            };
            let found = decoder.decode(&rt.tensor, image_width, image_height);
            trace!("{}: {} candidates", rt.role.name(), found.len());
            candidates.extend(found);
        }
        if self.per_class {
            non_max_suppression_per_class(candidates, self.iou_threshold)
        } else {
            non_max_suppression(candidates, self.iou_threshold)
        }
    }
}
