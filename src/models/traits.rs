use crate::models::Device;
use crate::Result;
use ndarray::{ArrayD, ArrayView4};

/// A loaded segmentation network.
///
/// The application only ever talks to the network through this trait, so a
/// mock can stand in for the ONNX session in tests.
pub trait SegmentationModel: Send + Sync {
    /// Fixed input resolution as (width, height).
    fn input_size(&self) -> (u32, u32);

    /// Device the model runs on.
    fn device(&self) -> Device;

    /// Run a forward pass on an NCHW batch.
    ///
    /// Returns every supervision head in graph order; the deepest head is last.
    fn forward(&self, batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>>;
}
