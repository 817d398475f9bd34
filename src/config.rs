//! 运行配置 - 通过JSON文件调整参数
//!
//! Everything that used to be a compiled-in constant (stream URL, model
//! paths, thresholds, cadence) lives here and is passed down at construction.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{ClassPolicy, DetectorRole, ObjectClass};
use crate::error::ConfigError;

/// Where inference runs relative to the tick loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Inference runs inside the scheduled tick.
    Inline,
    /// Inference runs on a worker thread fed through bounded channels.
    Background,
}

/// ONNX Runtime execution provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

/// Per-class confidence thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub person: f32,
    pub car: f32,
    pub license_plate: f32,
    pub face: f32,
    pub vehicle: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            person: 0.6,
            car: 0.3,
            license_plate: 0.1,
            face: 0.5,
            vehicle: 0.3,
        }
    }
}

impl ConfidenceThresholds {
    pub fn get(&self, class: ObjectClass) -> f32 {
        match class {
            ObjectClass::Person => self.person,
            ObjectClass::Car => self.car,
            ObjectClass::LicensePlate => self.license_plate,
            ObjectClass::Face => self.face,
            ObjectClass::Vehicle => self.vehicle,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (ObjectClass, f32)> + '_ {
        ObjectClass::ALL.iter().map(move |&c| (c, self.get(c)))
    }
}

/// Network input resolution the models were exported at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInput {
    pub width: u32,
    pub height: u32,
}

impl Default for NetworkInput {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
        }
    }
}

/// Bounded reconnect-with-backoff for the stream source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Viewer window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "RTSP Watch".to_string(),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // === 输入 ===
    pub source_url: String,
    pub rtsp_transport: String,
    pub read_timeout_ms: u64,
    pub buffer_size: u64,
    pub reconnect: ReconnectConfig,

    // === 模型 ===
    pub model_path_general_object: Option<String>,
    pub model_path_license_plate: Option<String>,
    pub model_path_face: Option<String>,
    pub model_path_vehicle: Option<String>,
    pub network_input: NetworkInput,
    pub execution_provider: ExecutionProvider,

    // === 检测 ===
    pub detection_enabled: bool,
    pub detection_mode: DetectionMode,
    pub confidence_threshold: ConfidenceThresholds,
    pub nms_iou_threshold: f32,
    pub class_policy: ClassPolicy,
    pub detect_every_n_ticks: u32,

    // === 显示 ===
    pub tick_interval_ms: u64,
    pub show_confidence: bool,
    pub font_path: Option<String>,
    pub window: WindowConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_url: "rtsp://192.168.1.26:554/stream0".to_string(),
            rtsp_transport: "tcp".to_string(),
            read_timeout_ms: 5000,
            buffer_size: 3_048_576,
            reconnect: ReconnectConfig::default(),

            model_path_general_object: Some("models/yolov8n.onnx".to_string()),
            model_path_license_plate: Some("models/LP-detection.onnx".to_string()),
            model_path_face: None,
            model_path_vehicle: None,
            network_input: NetworkInput::default(),
            execution_provider: ExecutionProvider::Cpu,

            detection_enabled: true,
            detection_mode: DetectionMode::Inline,
            confidence_threshold: ConfidenceThresholds::default(),
            nms_iou_threshold: 0.4,
            class_policy: ClassPolicy::FirstMatch,
            detect_every_n_ticks: 10,

            tick_interval_ms: 33,
            show_confidence: true,
            font_path: Some("assets/font/DejaVuSans.ttf".to_string()),
            window: WindowConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. A missing file is created with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self =
                    serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                        path: shown.clone(),
                        source,
                    })?;
                info!("config loaded from {}", shown);
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("config {} not found, writing defaults", shown);
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("could not write default config: {}", e);
                }
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: shown,
                source,
            }),
        }
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: shown.clone(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        info!("config saved to {}", shown);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.source_url.trim().is_empty() {
            return Err(invalid("source_url", "must not be empty"));
        }
        if self.detect_every_n_ticks == 0 {
            return Err(invalid("detect_every_n_ticks", "must be at least 1"));
        }
        if self.read_timeout_ms == 0 {
            return Err(invalid("read_timeout_ms", "must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be at least 1"));
        }
        if self.network_input.width == 0 || self.network_input.height == 0 {
            return Err(invalid("network_input", "width and height must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.nms_iou_threshold) {
            return Err(invalid(
                "nms_iou_threshold",
                format!("{} is outside [0, 1]", self.nms_iou_threshold),
            ));
        }
        for (class, threshold) in self.confidence_threshold.iter() {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(invalid(
                    "confidence_threshold",
                    format!("{} = {} is outside [0, 1]", class.name(), threshold),
                ));
            }
        }
        if self.reconnect.max_attempts == 0 {
            return Err(invalid("reconnect.max_attempts", "must be at least 1"));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(invalid(
                "reconnect",
                "initial_backoff_ms exceeds max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Configured model path for a detector role, if any.
    pub fn model_path(&self, role: DetectorRole) -> Option<&str> {
        let path = match role {
            DetectorRole::GeneralObject => &self.model_path_general_object,
            DetectorRole::LicensePlate => &self.model_path_license_plate,
            DetectorRole::Face => &self.model_path_face,
            DetectorRole::Vehicle => &self.model_path_vehicle,
        };
        path.as_deref().filter(|p| !p.is_empty())
    }

    /// Roles that have a model configured, in a fixed order.
    pub fn configured_roles(&self) -> Vec<DetectorRole> {
        DetectorRole::ALL
            .into_iter()
            .filter(|&role| self.model_path(role).is_some())
            .collect()
    }

    pub fn print_summary(&self) {
        info!("source: {}", self.source_url);
        for role in self.configured_roles() {
            info!(
                "model[{}]: {}",
                role.name(),
                self.model_path(role).unwrap_or_default()
            );
        }
        info!(
            "detection: enabled={} mode={:?} every {} frames | nms iou {:.2} | policy {:?}",
            self.detection_enabled,
            self.detection_mode,
            self.detect_every_n_ticks,
            self.nms_iou_threshold,
            self.class_policy
        );
        info!(
            "tick {}ms | read timeout {}ms | reconnect {}x",
            self.tick_interval_ms, self.read_timeout_ms, self.reconnect.max_attempts
        );
    }
}
