/// 检测系统数据结构定义
/// Data structures shared by inference, post-processing and drawing
use image::Rgb;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// 检测类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Person,
    Car,
    LicensePlate,
    Face,
    Vehicle,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 5] = [
        ObjectClass::Person,
        ObjectClass::Car,
        ObjectClass::LicensePlate,
        ObjectClass::Face,
        ObjectClass::Vehicle,
    ];

    /// Label text drawn next to the box.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectClass::Person => "Man",
            ObjectClass::Car => "Car",
            ObjectClass::LicensePlate => "License",
            ObjectClass::Face => "Face",
            ObjectClass::Vehicle => "Vehicle",
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            ObjectClass::Person => Rgb([255, 0, 0]),       // 红色
            ObjectClass::Car => Rgb([0, 255, 0]),          // 绿色
            ObjectClass::LicensePlate => Rgb([0, 0, 255]), // 蓝色
            ObjectClass::Face => Rgb([255, 255, 0]),       // 黄色
            ObjectClass::Vehicle => Rgb([0, 255, 255]),    // 青色
        }
    }
}

/// Which network a tensor came from. Decides how its class channels read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorRole {
    GeneralObject,
    LicensePlate,
    Face,
    Vehicle,
}

impl DetectorRole {
    pub const ALL: [DetectorRole; 4] = [
        DetectorRole::GeneralObject,
        DetectorRole::LicensePlate,
        DetectorRole::Face,
        DetectorRole::Vehicle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectorRole::GeneralObject => "general_object",
            DetectorRole::LicensePlate => "license_plate",
            DetectorRole::Face => "face",
            DetectorRole::Vehicle => "vehicle",
        }
    }

    /// Tracked (channel, class) pairs in priority order.
    pub fn default_channels(&self) -> &'static [(usize, ObjectClass)] {
        match self {
            // COCO: 4 = person (class 0), 6 = car (class 2)
            DetectorRole::GeneralObject => &[(4, ObjectClass::Person), (6, ObjectClass::Car)],
            DetectorRole::LicensePlate => &[(4, ObjectClass::LicensePlate)],
            DetectorRole::Face => &[(4, ObjectClass::Face)],
            DetectorRole::Vehicle => &[(4, ObjectClass::Vehicle)],
        }
    }
}

/// 检测框 (image pixels, clamped to the image)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub class: ObjectClass,
    pub confidence: f32,
}

impl Detection {
    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn intersection_area(&self, other: &Detection) -> f32 {
        let l = self.left.max(other.left);
        let t = self.top.max(other.top);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn union(&self, other: &Detection) -> f32 {
        self.area() + other.area() - self.intersection_area(other)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let union = self.union(other);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / union
    }
}

/// Raw network output: (1, channels, proposals).
///
/// Channels 0..4 are cx, cy, w, h in network-input pixels; the rest are
/// per-class scores.
#[derive(Clone, Debug)]
pub struct DetectionTensor {
    pub data: Array3<f32>,
    pub input_width: u32,
    pub input_height: u32,
}

impl DetectionTensor {
    pub fn channels(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn proposals(&self) -> usize {
        self.data.shape()[2]
    }
}

/// One network's output tagged with the role it was run for.
#[derive(Clone, Debug)]
pub struct RoleTensor {
    pub role: DetectorRole,
    pub tensor: DetectionTensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(left: f32, top: f32, width: f32, height: f32) -> Detection {
        Detection {
            left,
            top,
            width,
            height,
            class: ObjectClass::Person,
            confidence: 0.9,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = det(10.0, 10.0, 20.0, 20.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = det(0.0, 0.0, 10.0, 10.0);
        let b = det(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        // overlap 50, union 150
        let a = det(0.0, 0.0, 10.0, 10.0);
        let b = det(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_boxes_do_not_divide_by_zero() {
        let a = det(5.0, 5.0, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn general_object_prefers_person_over_car() {
        let channels = DetectorRole::GeneralObject.default_channels();
        assert_eq!(channels[0], (4, ObjectClass::Person));
        assert_eq!(channels[1], (6, ObjectClass::Car));
    }
}
