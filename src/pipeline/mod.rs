/// 视频处理流水线 (Video Processing Pipeline)
///
/// One tick = take newest frame → RGB → (maybe) infer → post-process cached
/// tensors → draw → publish. Runs on the thread that owns the window.
pub mod surface;
pub mod timer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{AppConfig, DetectionMode};
use crate::detection::{
    Detection, DetectionCache, DetectionSchedule, DetectionWorker, Inference, PostProcessor,
};
use crate::error::DetectError;
use crate::input::{to_rgb, ConnectionState, FrameSource};
use crate::overlay::Overlay;

pub use surface::{DisplayImage, RenderSurface};
pub use timer::TickTimer;

/// Where inference happens, if anywhere.
enum Engine<D> {
    Disabled,
    Inline(D),
    Background(DetectionWorker),
}

impl<D> Engine<D> {
    fn label(&self) -> &'static str {
        match self {
            Engine::Disabled => "off",
            Engine::Inline(_) => "inline",
            Engine::Background(_) => "background",
        }
    }
}

/// What a single tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Paused,
    NoFrame,
    /// A frame arrived but could not be converted.
    Skipped,
    Presented {
        sequence: u64,
        /// Inference ran (inline) or was handed to the worker this tick.
        inferred: bool,
        boxes: usize,
    },
}

/// Snapshot for the status line.
#[derive(Clone, Debug)]
pub struct PipelineStats {
    pub ticks: u64,
    pub frames: u64,
    pub inferences: u64,
    pub detections: usize,
    pub skipped: u64,
    pub paused: bool,
    pub connection: ConnectionState,
    pub detection: &'static str,
    pub last_error: Option<String>,
}

pub struct Pipeline<S, D>
where
    S: FrameSource,
    D: Inference + Send + 'static,
{
    source: S,
    engine: Engine<D>,
    post: PostProcessor,
    overlay: Overlay,
    schedule: DetectionSchedule,
    cache: DetectionCache,
    surface: Arc<RenderSurface>,
    timer: TickTimer,
    paused: bool,
    ticks: u64,
    inferences: u64,
    skipped: u64,
    last_detections: Vec<Detection>,
    last_error: Option<String>,
}

impl<S, D> Pipeline<S, D>
where
    S: FrameSource,
    D: Inference + Send + 'static,
{
    /// `detector = None` (or `detection_enabled = false`) shows plain video.
    pub fn new(config: &AppConfig, source: S, detector: Option<D>, overlay: Overlay) -> Self {
        let engine = match detector {
            Some(_) if !config.detection_enabled => {
                info!("detection disabled by config");
                Engine::Disabled
            }
            Some(d) => match config.detection_mode {
                DetectionMode::Inline => Engine::Inline(d),
                DetectionMode::Background => match DetectionWorker::spawn(d) {
                    Ok(worker) => Engine::Background(worker),
                    Err(e) => {
                        warn!("{}, detection disabled", e);
                        Engine::Disabled
                    }
                },
            },
            None => Engine::Disabled,
        };
        info!(
            "pipeline: detection {} | every {} frames | tick {}ms",
            engine.label(),
            config.detect_every_n_ticks,
            config.tick_interval_ms
        );

        Self {
            source,
            engine,
            post: PostProcessor::from_config(config),
            overlay,
            schedule: DetectionSchedule::new(config.detect_every_n_ticks),
            cache: DetectionCache::default(),
            surface: Arc::new(RenderSurface::new()),
            timer: TickTimer::new(Duration::from_millis(config.tick_interval_ms)),
            paused: false,
            ticks: 0,
            inferences: 0,
            skipped: 0,
            last_detections: Vec::new(),
            last_error: None,
        }
    }

    pub fn surface(&self) -> Arc<RenderSurface> {
        Arc::clone(&self.surface)
    }

    pub fn start(&mut self, now: Instant) {
        self.timer.start(now);
    }

    /// Run a tick if the timer says one is due.
    pub fn poll(&mut self, now: Instant) -> Option<TickOutcome> {
        if self.timer.poll(now) {
            Some(self.tick())
        } else {
            None
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.paused {
            return TickOutcome::Paused;
        }
        self.ticks += 1;

        let Some(frame) = self.source.read_frame() else {
            return TickOutcome::NoFrame;
        };
        let mut image = match to_rgb(&frame) {
            Ok(image) => image,
            Err(e) => {
                warn!("frame skipped: {}", e);
                self.skipped += 1;
                self.last_error = Some(e.to_string());
                return TickOutcome::Skipped;
            }
        };
        drop(frame);

        let due = self.schedule.advance();
        let inferred = self.run_detection(&image, due);

        let (w, h) = image.dimensions();
        let detections = match self.cache.get() {
            Some(tensors) => self.post.process(tensors, w, h),
            None => Vec::new(),
        };
        self.overlay.draw(&mut image, &detections);
        let boxes = detections.len();
        self.last_detections = detections;

        let sequence = self.surface.publish(image);
        TickOutcome::Presented {
            sequence,
            inferred,
            boxes,
        }
    }

    /// Update the tensor cache. Returns whether inference ran or was queued.
    fn run_detection(&mut self, image: &image::RgbImage, due: bool) -> bool {
        let mut inferred = false;
        let mut worker_gone = false;

        match &mut self.engine {
            Engine::Disabled => {}
            Engine::Inline(detector) => {
                if due {
                    match detector.infer(image) {
                        Ok(tensors) => {
                            self.cache.replace(tensors);
                            self.inferences += 1;
                            inferred = true;
                        }
                        Err(e) => {
                            warn!("detection failed: {}", e);
                            self.last_error = Some(e.to_string());
                        }
                    }
                }
            }
            Engine::Background(worker) => {
                match worker.poll() {
                    Some(Ok(tensors)) => {
                        self.cache.replace(tensors);
                        self.inferences += 1;
                    }
                    Some(Err(DetectError::WorkerGone)) => worker_gone = true,
                    Some(Err(e)) => {
                        warn!("detection failed: {}", e);
                        self.last_error = Some(e.to_string());
                    }
                    None => {}
                }
                if due && !worker_gone {
                    match worker.submit(image.clone()) {
                        Ok(true) => inferred = true,
                        Ok(false) => debug!("detection worker busy, frame not submitted"),
                        Err(_) => worker_gone = true,
                    }
                }
            }
        }

        if worker_gone {
            warn!("detection worker stopped, detection disabled");
            self.last_error = Some(DetectError::WorkerGone.to_string());
            self.engine = Engine::Disabled;
        }
        inferred
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop ticking and let the source drop frames. The detection cache stays.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.timer.stop();
        self.source.set_paused(true);
        info!("paused");
    }

    /// Drop frames queued while paused and restart the timer.
    pub fn resume(&mut self, now: Instant) {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.source.set_paused(false);
        let flushed = self.source.flush();
        self.timer.start(now);
        info!("resumed ({} stale frames flushed)", flushed);
    }

    pub fn toggle_pause(&mut self, now: Instant) {
        if self.paused {
            self.resume(now);
        } else {
            self.pause();
        }
    }

    pub fn last_detections(&self) -> &[Detection] {
        &self.last_detections
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ticks: self.ticks,
            frames: self.schedule.frames(),
            inferences: self.inferences,
            detections: self.last_detections.len(),
            skipped: self.skipped,
            paused: self.paused,
            connection: self.source.connection_state(),
            detection: self.engine.label(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionTensor, DetectorRole, ObjectClass, RoleTensor};
    use crate::input::{Frame, PixelFormat};
    use image::RgbImage;
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endless source of one solid frame.
    struct FakeSource {
        width: u32,
        height: u32,
        paused: bool,
        reads: usize,
        flushes: usize,
        broken: bool,
    }

    impl FakeSource {
        fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                paused: false,
                reads: 0,
                flushes: 0,
                broken: false,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn read_frame(&mut self) -> Option<Frame> {
            self.reads += 1;
            if self.broken {
                return Some(Frame::packed(self.width, self.height, PixelFormat::Rgb24, vec![]));
            }
            Some(Frame::solid_yuv420p(self.width, self.height, 128, 128, 128))
        }

        fn set_paused(&mut self, paused: bool) {
            self.paused = paused;
        }

        fn flush(&mut self) -> usize {
            self.flushes += 1;
            0
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Streaming
        }
    }

    /// Always reports one person at (320, 320) size 64 on a 640x640 input.
    #[derive(Clone)]
    struct FakeDetector {
        calls: Arc<AtomicUsize>,
    }

    impl FakeDetector {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Inference for FakeDetector {
        fn infer(&mut self, _image: &RgbImage) -> Result<Vec<RoleTensor>, DetectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut data = Array3::<f32>::zeros((1, 84, 1));
            for (c, v) in [320.0, 320.0, 64.0, 64.0, 0.9].into_iter().enumerate() {
                data[[0, c, 0]] = v;
            }
            Ok(vec![RoleTensor {
                role: DetectorRole::GeneralObject,
                tensor: DetectionTensor {
                    data,
                    input_width: 640,
                    input_height: 640,
                },
            }])
        }
    }

    fn config(every_n: u32) -> AppConfig {
        AppConfig {
            detect_every_n_ticks: every_n,
            ..AppConfig::default()
        }
    }

    #[test]
    fn boxes_are_rescaled_to_the_stream_resolution() {
        let (detector, _) = FakeDetector::new();
        let mut pipeline = Pipeline::new(
            &config(1),
            FakeSource::new(1280, 960),
            Some(detector),
            Overlay::without_labels(),
        );
        let outcome = pipeline.tick();
        assert_eq!(
            outcome,
            TickOutcome::Presented {
                sequence: 1,
                inferred: true,
                boxes: 1
            }
        );
        let d = pipeline.last_detections()[0];
        assert_eq!(d.class, ObjectClass::Person);
        assert_eq!((d.left, d.top, d.width, d.height), (576.0, 432.0, 128.0, 96.0));

        let shown = pipeline.surface().latest().unwrap();
        assert_eq!(shown.image.dimensions(), (1280, 960));
        assert_eq!(shown.image.get_pixel(576, 432).0, [255, 0, 0]);
    }

    #[test]
    fn cached_tensors_are_reused_between_runs() {
        let (detector, calls) = FakeDetector::new();
        let mut pipeline = Pipeline::new(
            &config(3),
            FakeSource::new(64, 48),
            Some(detector),
            Overlay::without_labels(),
        );

        let mut outcomes = Vec::new();
        let mut drawn = Vec::new();
        for _ in 0..4 {
            outcomes.push(pipeline.tick());
            drawn.push(pipeline.last_detections().to_vec());
        }
        let inferred: Vec<bool> = outcomes
            .iter()
            .map(|o| matches!(o, TickOutcome::Presented { inferred: true, .. }))
            .collect();
        assert_eq!(inferred, vec![true, false, false, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // cached ticks draw exactly what the inferring tick drew
        assert_eq!(drawn[0].len(), 1);
        assert_eq!(drawn[0][0].class, ObjectClass::Person);
        for boxes in &drawn[1..] {
            assert_eq!(boxes, &drawn[0]);
        }
    }

    #[test]
    fn no_boxes_without_detector() {
        let mut pipeline: Pipeline<FakeSource, FakeDetector> = Pipeline::new(
            &config(1),
            FakeSource::new(8, 8),
            None,
            Overlay::without_labels(),
        );
        assert!(matches!(
            pipeline.tick(),
            TickOutcome::Presented {
                inferred: false,
                boxes: 0,
                ..
            }
        ));
        assert_eq!(pipeline.stats().detection, "off");
    }

    #[test]
    fn disabled_by_config() {
        let (detector, calls) = FakeDetector::new();
        let config = AppConfig {
            detection_enabled: false,
            ..config(1)
        };
        let mut pipeline = Pipeline::new(
            &config,
            FakeSource::new(8, 8),
            Some(detector),
            Overlay::without_labels(),
        );
        pipeline.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nothing_is_published_while_paused() {
        let (detector, _) = FakeDetector::new();
        let mut pipeline = Pipeline::new(
            &config(1),
            FakeSource::new(16, 16),
            Some(detector),
            Overlay::without_labels(),
        );
        let t0 = Instant::now();
        pipeline.start(t0);
        assert!(pipeline.poll(t0).is_some());
        let before = pipeline.surface().sequence();

        pipeline.toggle_pause(t0);
        assert!(pipeline.is_paused());
        assert!(pipeline.source.paused);
        assert_eq!(pipeline.poll(t0 + Duration::from_secs(1)), None);
        assert_eq!(pipeline.tick(), TickOutcome::Paused);
        assert_eq!(pipeline.surface().sequence(), before);
        assert_eq!(pipeline.stats().detections, 1);

        let t1 = t0 + Duration::from_secs(2);
        pipeline.toggle_pause(t1);
        assert!(!pipeline.source.paused);
        assert_eq!(pipeline.source.flushes, 1);
        assert!(matches!(
            pipeline.poll(t1),
            Some(TickOutcome::Presented { .. })
        ));
        assert_eq!(pipeline.surface().sequence(), before + 1);
    }

    #[test]
    fn conversion_failure_skips_tick() {
        let mut source = FakeSource::new(4, 4);
        source.broken = true;
        let mut pipeline: Pipeline<FakeSource, FakeDetector> =
            Pipeline::new(&config(1), source, None, Overlay::without_labels());
        assert_eq!(pipeline.tick(), TickOutcome::Skipped);
        assert_eq!(pipeline.surface().sequence(), 0);
        let stats = pipeline.stats();
        assert_eq!(stats.skipped, 1);
        assert!(stats.last_error.is_some());
    }

    #[test]
    fn background_worker_fills_cache() {
        let (detector, calls) = FakeDetector::new();
        let config = AppConfig {
            detection_mode: DetectionMode::Background,
            ..config(1)
        };
        let mut pipeline = Pipeline::new(
            &config,
            FakeSource::new(32, 32),
            Some(detector),
            Overlay::without_labels(),
        );
        assert_eq!(pipeline.stats().detection, "background");

        // the first tick only submits, so nothing is drawn yet
        assert!(matches!(
            pipeline.tick(),
            TickOutcome::Presented { boxes: 0, .. }
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut boxes = 0;
        while boxes == 0 {
            assert!(Instant::now() < deadline, "worker result never arrived");
            std::thread::sleep(Duration::from_millis(5));
            if let TickOutcome::Presented { boxes: b, .. } = pipeline.tick() {
                boxes = b;
            }
        }
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert!(pipeline.stats().inferences >= 1);
    }
}
