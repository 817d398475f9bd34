//! RTSP 实时监看 + 周期性 ONNX 目标检测
//!
//! Decode thread → tick (convert, detect every N frames, draw) → render surface
//! → macroquad viewer.
pub mod config; // 运行配置
pub mod detection; // 推理与后处理
pub mod error;
pub mod input; // RTSP 拉流与像素转换
pub mod overlay; // 检测框绘制
pub mod pipeline; // tick 流水线
pub mod viewer; // macroquad 渲染

pub use crate::config::AppConfig;
