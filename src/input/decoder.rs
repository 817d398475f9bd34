/// RTSP主动拉流解码器
/// RTSP source: decode thread + reconnect loop, frames handed over a bounded channel
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::decode_filter::DecodeFilter;
use super::frame::Frame;
use crate::config::{AppConfig, ReconnectConfig};
use crate::error::StreamError;

/// Decoded frames buffered between the decode thread and the tick.
const FRAME_QUEUE: usize = 2;

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Streaming = 1,
    Reconnecting = 2,
    Failed = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Streaming,
            2 => ConnectionState::Reconnecting,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Closed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Flags shared between the tick loop and the decode thread.
#[derive(Debug)]
pub struct SourceControl {
    paused: AtomicBool,
    shutdown: AtomicBool,
    state: AtomicU8,
    frames: AtomicU64,
}

impl Default for SourceControl {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            frames: AtomicU64::new(0),
        }
    }
}

impl SourceControl {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn note_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Anything the tick loop can pull decoded frames from.
pub trait FrameSource {
    /// Newest decoded frame since the last call, if any.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Stop or resume accepting frames from the decoder.
    fn set_paused(&mut self, paused: bool);

    /// Discard frames buffered before a resume. Returns how many were dropped.
    fn flush(&mut self) -> usize;

    fn connection_state(&self) -> ConnectionState;
}

/// Stream options derived from `AppConfig`.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub url: String,
    pub transport: String,
    pub read_timeout: Duration,
    pub buffer_size: u64,
    pub reconnect: ReconnectConfig,
}

impl From<&AppConfig> for StreamOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.source_url.clone(),
            transport: config.rtsp_transport.clone(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            buffer_size: config.buffer_size,
            reconnect: config.reconnect.clone(),
        }
    }
}

/// RTSP解码器
pub struct RtspSource {
    rx: Receiver<Frame>,
    control: Arc<SourceControl>,
    _handle: Option<JoinHandle<()>>,
}

impl RtspSource {
    /// Start the decode thread. Connection failures after this point never
    /// surface here; they show up in `connection_state`.
    pub fn spawn(options: StreamOptions) -> Result<Self, StreamError> {
        let (tx, rx) = bounded::<Frame>(FRAME_QUEUE);
        let control = Arc::new(SourceControl::default());

        let url = options.url.clone();
        let thread_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name("rtsp-decode".to_string())
            .spawn(move || run_stream(options, tx, thread_control))
            .map_err(|e| StreamError::Open {
                url,
                reason: format!("failed to spawn decode thread: {}", e),
            })?;

        Ok(Self {
            rx,
            control,
            _handle: Some(handle),
        })
    }

    /// Source fed by the test instead of a decode thread.
    #[cfg(test)]
    fn from_channel(rx: Receiver<Frame>, control: Arc<SourceControl>) -> Self {
        Self {
            rx,
            control,
            _handle: None,
        }
    }
}

impl FrameSource for RtspSource {
    fn read_frame(&mut self) -> Option<Frame> {
        self.rx.try_iter().last()
    }

    fn set_paused(&mut self, paused: bool) {
        self.control.set_paused(paused);
    }

    fn flush(&mut self) -> usize {
        self.rx.try_iter().count()
    }

    fn connection_state(&self) -> ConnectionState {
        self.control.state()
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        // the filter bails out on its next frame; a stalled read ends on timeout
        self.control.shutdown();
    }
}

/// Reconnect loop run on the decode thread.
fn run_stream(options: StreamOptions, tx: Sender<Frame>, control: Arc<SourceControl>) {
    info!("decode thread started for {}", options.url);
    let mut backoff = Backoff::new(&options.reconnect);
    let mut first = true;

    loop {
        if control.is_shutdown() {
            break;
        }
        control.set_state(if first {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        first = false;

        let frames_before = control.frames();
        let filter = DecodeFilter::new(tx.clone(), Arc::clone(&control));
        match open_and_decode(&options, filter) {
            Ok(()) => info!("stream {} ended", options.url),
            Err(e) => warn!("{}", e),
        }

        if control.is_shutdown() {
            break;
        }
        if control.frames() > frames_before {
            backoff.reset();
        }

        match backoff.next_delay() {
            Some(delay) => {
                info!(
                    "reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    backoff.failures() + 1,
                    options.reconnect.max_attempts
                );
                control.set_state(ConnectionState::Reconnecting);
                sleep_unless_shutdown(delay, &control);
            }
            None => {
                let err = StreamError::RetriesExhausted {
                    url: options.url.clone(),
                    attempts: backoff.failures(),
                };
                error!("{}", err);
                control.set_state(ConnectionState::Failed);
                return;
            }
        }
    }

    control.set_state(ConnectionState::Closed);
    info!("decode thread exited");
}

fn sleep_unless_shutdown(delay: Duration, control: &SourceControl) {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if control.is_shutdown() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Open the stream and block until it ends.
fn open_and_decode(options: &StreamOptions, filter: DecodeFilter) -> Result<(), StreamError> {
    let open_err = |reason: String| StreamError::Open {
        url: options.url.clone(),
        reason,
    };

    // FFmpeg takes the socket timeout in microseconds
    let timeout_us = (options.read_timeout.as_micros() as u64).to_string();
    let buffer_size = options.buffer_size.to_string();

    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = Input::new(options.url.as_str()).set_input_opts(
        [
            ("rtsp_transport", options.transport.as_str()),
            ("buffer_size", buffer_size.as_str()),
            ("timeout", timeout_us.as_str()),
        ]
        .into(),
    );

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| open_err(format!("build failed: {}", e)))?;

    let sch = ctx
        .start()
        .map_err(|e| open_err(format!("start failed: {}", e)))?;
    debug!("ffmpeg scheduler running for {}", options.url);

    sch.wait().map_err(|e| StreamError::Ended {
        url: options.url.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_atomic() {
        let control = SourceControl::default();
        assert_eq!(control.state(), ConnectionState::Connecting);
        for state in [
            ConnectionState::Streaming,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            control.set_state(state);
            assert_eq!(control.state(), state);
        }
    }

    #[test]
    fn options_follow_config() {
        let config = AppConfig {
            source_url: "rtsp://cam/1".to_string(),
            read_timeout_ms: 2500,
            ..AppConfig::default()
        };
        let options = StreamOptions::from(&config);
        assert_eq!(options.url, "rtsp://cam/1");
        assert_eq!(options.read_timeout, Duration::from_millis(2500));
        assert_eq!(options.transport, "tcp");
    }

    fn queued_source() -> (RtspSource, Sender<Frame>, Arc<SourceControl>) {
        let (tx, rx) = bounded::<Frame>(FRAME_QUEUE);
        let control = Arc::new(SourceControl::default());
        (RtspSource::from_channel(rx, Arc::clone(&control)), tx, control)
    }

    fn luma(frame: &Frame) -> u8 {
        frame.planes[0].data[0]
    }

    #[test]
    fn read_frame_returns_newest_queued() {
        let (mut source, tx, _control) = queued_source();
        assert!(source.read_frame().is_none());

        tx.send(Frame::solid_yuv420p(4, 4, 10, 128, 128)).unwrap();
        tx.send(Frame::solid_yuv420p(4, 4, 20, 128, 128)).unwrap();
        assert!(tx.try_send(Frame::solid_yuv420p(4, 4, 30, 128, 128)).is_err());

        assert_eq!(source.read_frame().map(|f| luma(&f)), Some(20));
        // older frame was consumed along the way
        assert!(source.read_frame().is_none());
    }

    #[test]
    fn flush_counts_and_drains() {
        let (mut source, tx, _control) = queued_source();
        tx.send(Frame::solid_yuv420p(4, 4, 1, 128, 128)).unwrap();
        tx.send(Frame::solid_yuv420p(4, 4, 2, 128, 128)).unwrap();
        assert_eq!(source.flush(), 2);
        assert_eq!(source.flush(), 0);
        assert!(source.read_frame().is_none());
    }

    #[test]
    fn pause_and_drop_reach_the_decode_side() {
        let (mut source, _tx, control) = queued_source();
        source.set_paused(true);
        assert!(control.is_paused());
        source.set_paused(false);
        assert!(!control.is_paused());

        control.set_state(ConnectionState::Streaming);
        assert_eq!(source.connection_state(), ConnectionState::Streaming);

        drop(source);
        assert!(control.is_shutdown());
    }

    #[test]
    fn shutdown_cuts_backoff_sleep_short() {
        let control = SourceControl::default();
        control.shutdown();
        let start = Instant::now();
        sleep_unless_shutdown(Duration::from_secs(5), &control);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
