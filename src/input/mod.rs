/// 视频输入系统 (Video Input System)
///
/// 独立解码线程,负责RTSP拉流、断线重连与像素格式转换
/// - RtspSource: 解码线程 + 重连循环
/// - DecodeFilter: AVFrame → Frame
/// - convert: Frame → RGB
pub mod backoff;
pub mod convert;
pub mod decode_filter;
pub mod decoder;
pub mod frame;

pub use convert::to_rgb;
pub use decode_filter::DecodeFilter;
pub use decoder::{ConnectionState, FrameSource, RtspSource, SourceControl, StreamOptions};
pub use frame::{Frame, PixelFormat, Plane};
