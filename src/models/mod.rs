pub mod device;
pub mod manager;
pub mod segmenter;
pub mod traits;

pub use device::{Device, DeviceSelector};
pub use manager::{ModelManager, ModelState, ModelStats};
pub use segmenter::Segmenter;
pub use traits::SegmentationModel;
