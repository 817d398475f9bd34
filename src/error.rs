/// 错误类型 (Error types)
///
/// One enum per layer; the viewer binary folds them into `anyhow`.
use thiserror::Error;

/// Configuration load/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Stream open/read errors. Open failures are retried by the reconnect loop.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open stream {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("stream {url} ended: {reason}")]
    Ended { url: String, reason: String },

    #[error("gave up on {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },
}

/// Pixel-format conversion errors. A failed conversion skips the tick.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("frame has zero size {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },

    #[error("plane {plane} too small: need {needed} bytes, have {actual}")]
    PlaneTooSmall {
        plane: usize,
        needed: usize,
        actual: usize,
    },

    #[error("plane {plane} stride {stride} shorter than row of {row} bytes")]
    StrideTooShort {
        plane: usize,
        stride: usize,
        row: usize,
    },

    #[error("expected {expected} planes, got {actual}")]
    PlaneCount { expected: usize, actual: usize },
}

/// Model load and inference errors.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("inference failed for {role}: {reason}")]
    Inference { role: &'static str, reason: String },

    #[error("unexpected output shape {shape:?} from {role}")]
    OutputShape { role: &'static str, shape: Vec<i64> },

    #[error("failed to resize frame for inference: {0}")]
    Resize(String),

    #[error("no detector models configured")]
    NoModels,

    #[error("detection worker is gone")]
    WorkerGone,
}
