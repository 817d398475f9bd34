use super::types::Detection;

/// Greedy class-agnostic NMS.
///
/// Sorts by confidence descending (stable, so ties keep input order) and keeps
/// a box only if its IoU with every already-kept box is at most `iou_threshold`.
pub fn non_max_suppression(xs: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    suppress(xs, iou_threshold, false)
}

/// Same as [`non_max_suppression`], but a box only suppresses boxes of its own class.
pub fn non_max_suppression_per_class(xs: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    suppress(xs, iou_threshold, true)
}

fn suppress(mut xs: Vec<Detection>, iou_threshold: f32, per_class: bool) -> Vec<Detection> {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if per_class && xs[prev_index].class != xs[index].class {
                continue;
            }
            if xs[prev_index].iou(&xs[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
    xs
}
