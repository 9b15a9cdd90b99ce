use image::RgbImage;
use serde::Serialize;
use std::fmt;

/// Outcome of one predict call, rendered as the UI status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictStatus {
    Success,
    NoImage,
    /// The model failed to load at startup; carries the captured error.
    ModelUnavailable(String),
    /// The pipeline failed for this request.
    Error(String),
}

impl PredictStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PredictStatus::Success)
    }
}

impl fmt::Display for PredictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictStatus::Success => write!(f, "success"),
            PredictStatus::NoImage => write!(f, "no image provided"),
            PredictStatus::ModelUnavailable(reason) => write!(f, "model load failed: {}", reason),
            PredictStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// 各阶段耗时
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    pub preprocess_ms: u64,
    pub inference_ms: u64,
    pub postprocess_ms: u64,
}

/// Result of a predict call: the overlay (on success) plus a status line.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub overlay: Option<RgbImage>,
    pub status: PredictStatus,
    pub timings: Option<StageTimings>,
}

impl Prediction {
    pub fn success(overlay: RgbImage, timings: StageTimings) -> Self {
        Self {
            overlay: Some(overlay),
            status: PredictStatus::Success,
            timings: Some(timings),
        }
    }

    pub fn failure(status: PredictStatus) -> Self {
        Self {
            overlay: None,
            status,
            timings: None,
        }
    }

    pub fn status_message(&self) -> String {
        self.status.to_string()
    }
}
