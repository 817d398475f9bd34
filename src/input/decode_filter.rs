/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: decoded YUV420P AVFrame → owned `Frame` → channel
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use tracing::{debug, info, warn};

use super::decoder::{ConnectionState, SourceControl};
use super::frame::{chroma_size, Frame, PixelFormat, Plane};

/// Largest side we accept from the stream.
const MAX_DIMENSION: u32 = 8192;

#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<Frame>,
    control: Arc<SourceControl>,
    count: usize,
    last: Instant,
    dropped_frames: usize,
    total_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<Frame>, control: Arc<SourceControl>) -> Self {
        Self {
            tx,
            control,
            count: 0,
            last: Instant::now(),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, reason: &str) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            warn!("dropping frame #{}: {}", self.total_frames, reason);
        }
    }

    /// Per-frame bookkeeping before any copy. `Ok(false)` means skip this frame.
    fn accept(&mut self) -> Result<bool, String> {
        if self.control.is_shutdown() {
            return Err("stream source closed".to_string());
        }

        self.total_frames += 1;
        if self.total_frames == 1 {
            self.control.set_state(ConnectionState::Streaming);
        }
        self.control.note_frame();

        // 暂停时直接丢弃
        Ok(!self.control.is_paused())
    }

    /// Queue an owned frame. A full queue drops it; the reader keeps only the
    /// newest frame anyway.
    fn hand_off(&mut self, owned: Frame) -> Result<(), String> {
        self.count += 1;
        self.report();

        match self.tx.try_send(owned) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err("frame receiver dropped".to_string()),
        }
    }

    fn report(&mut self) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }
        let fps = self.count as f64 / elapsed;
        let drop_rate = if self.total_frames == 0 {
            0.0
        } else {
            self.dropped_frames as f64 / self.total_frames as f64 * 100.0
        };
        debug!(
            "decode: {} frames | {:.1} fps | total {} | dropped {} ({:.1}%)",
            self.count, fps, self.total_frames, self.dropped_frames, drop_rate
        );
        self.last = Instant::now();
        self.count = 0;
    }
}

/// Copy `rows` rows of a plane out of FFmpeg-owned memory.
///
/// # Safety
/// `ptr` must point at a plane of at least `stride * rows` readable bytes.
unsafe fn copy_plane(ptr: *const u8, stride: usize, rows: usize) -> Plane {
    let data = std::slice::from_raw_parts(ptr, stride * rows).to_vec();
    Plane { data, stride }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("decode filter started");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        if !self.accept()? {
            return Ok(Some(frame));
        }

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame("empty or corrupt");
                return Ok(None);
            }
            let av = &*frame.as_ptr();

            let (w, h) = (av.width, av.height);
            if w <= 0 || h <= 0 || w as u32 > MAX_DIMENSION || h as u32 > MAX_DIMENSION {
                self.drop_frame(&format!("bad resolution {}x{}", w, h));
                return Ok(None);
            }
            let (w, h) = (w as u32, h as u32);

            // missing reference / invalid bitstream
            if av.decode_error_flags & 0x03 != 0 {
                self.drop_frame(&format!("decode error flags 0x{:02x}", av.decode_error_flags));
                return Ok(None);
            }

            let (cw, ch) = chroma_size(w, h);
            let strides = [av.linesize[0], av.linesize[1], av.linesize[2]];
            if av.data[0].is_null() || av.data[1].is_null() || av.data[2].is_null() {
                self.drop_frame("null plane");
                return Ok(None);
            }
            if strides[0] < w as i32 || strides[1] < cw as i32 || strides[2] < cw as i32 {
                self.drop_frame(&format!("bad strides {:?}", strides));
                return Ok(None);
            }

            let planes = vec![
                copy_plane(av.data[0], strides[0] as usize, h as usize),
                copy_plane(av.data[1], strides[1] as usize, ch),
                copy_plane(av.data[2], strides[2] as usize, ch),
            ];
            self.hand_off(Frame::new(w, h, PixelFormat::Yuv420p, planes))?;
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "decode filter stopped after {} frames ({} dropped)",
            self.total_frames, self.dropped_frames
        );
    }
}
