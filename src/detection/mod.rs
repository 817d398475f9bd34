/// 检测系统 (Detection System)
///
/// - onnx:        ONNX Runtime 推理 (每个角色一个网络)
/// - postprocess: 张量解码 + 阈值过滤
/// - nms:         非极大值抑制
/// - schedule:    每N帧推理一次,其余帧复用缓存
/// - worker:      可选的后台推理线程
pub mod nms;
pub mod onnx;
pub mod postprocess;
pub mod schedule;
pub mod types;
pub mod worker;

pub use nms::{non_max_suppression, non_max_suppression_per_class};
pub use onnx::{Inference, OnnxEnsemble, OnnxNetwork};
pub use postprocess::{ClassChannel, ClassPolicy, PostProcessor, TensorDecoder};
pub use schedule::{DetectionCache, DetectionSchedule};
pub use types::{Detection, DetectionTensor, DetectorRole, ObjectClass, RoleTensor};
pub use worker::DetectionWorker;
