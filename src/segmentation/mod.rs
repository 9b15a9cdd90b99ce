pub mod pipeline;
pub mod types;

pub use pipeline::{run_inference, SegmentationService};
pub use types::{PredictStatus, Prediction, StageTimings};
