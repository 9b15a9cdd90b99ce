pub mod config;
pub mod image;
pub mod mocks;
pub mod models;
pub mod segmentation;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use segmentation::{PredictStatus, Prediction, SegmentationService};
pub use utils::error::SegError;

pub type Result<T> = std::result::Result<T, SegError>;
