use crate::config::{ModelConfig, OnnxConfig};
use crate::models::{Device, SegmentationModel};
use crate::utils::error::SegError;
use crate::Result;
use ndarray::{Array4, ArrayD, ArrayView4};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;

/// Number of classes the UNet++ checkpoint predicts.
pub const NUM_CLASSES: usize = 1;

/// Number of input channels the UNet++ checkpoint expects.
pub const INPUT_CHANNELS: usize = 3;

/// UNet++ (deep supervision) exported to ONNX and run through ONNX Runtime.
pub struct Segmenter {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>, // 动态发现的输出名称, graph order
    input_size: (u32, u32),    // (width, height)
    device: Device,
}

impl Segmenter {
    pub fn load(model: &ModelConfig, onnx: &OnnxConfig) -> Result<Self> {
        let model_path = &model.model_path;

        if !model_path.exists() {
            return Err(SegError::ModelLoad(format!(
                "checkpoint not found: {}",
                model_path.display()
            )));
        }

        let device = model.device.resolve();
        tracing::info!(
            "Loading segmentation model from: {} (device: {})",
            model_path.display(),
            device
        );

        let provider = match device {
            Device::Cpu => CPUExecutionProvider::default().build(),
            Device::Cuda { device_id } => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build()
                .error_on_failure(),
        };

        let session = Session::builder()?
            .with_optimization_level(optimization_level(onnx.optimization_level))?
            .with_intra_threads(onnx.intra_threads)?
            .with_execution_providers([provider])?
            .commit_from_file(model_path)
            .map_err(|e| {
                SegError::ModelLoad(format!("failed to read {}: {}", model_path.display(), e))
            })?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| SegError::ModelLoad("model has no inputs".to_string()))?;
        let input_name = input.name.clone();

        if let Some(shape) = input.input_type.tensor_shape() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            check_input_shape(&dims, model.input_width, model.input_height)?;
        }

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(SegError::ModelLoad("model has no outputs".to_string()));
        }
        for (i, name) in output_names.iter().enumerate() {
            tracing::debug!("Segmentation output[{}]: '{}'", i, name);
        }
        if output_names.len() == 1 {
            tracing::warn!("Model exposes a single output; expected deep supervision heads");
        }

        let segmenter = Self {
            session: Mutex::new(session),
            input_name,
            output_names,
            input_size: (model.input_width, model.input_height),
            device,
        };

        // 预热, also proves the graph accepts our input layout
        let (width, height) = segmenter.input_size;
        let dummy = Array4::<f32>::zeros((1, INPUT_CHANNELS, height as usize, width as usize));
        segmenter
            .forward(dummy.view())
            .map_err(|e| SegError::ModelLoad(format!("warm-up inference failed: {}", e)))?;

        tracing::info!(
            "Segmentation model ready: input '{}', {} heads, {}x{}",
            segmenter.input_name,
            segmenter.output_names.len(),
            width,
            height
        );

        Ok(segmenter)
    }
}

impl SegmentationModel for Segmenter {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn device(&self) -> Device {
        self.device
    }

    fn forward(&self, batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let input_tensor = Tensor::from_array(batch.as_standard_layout().into_owned())?;

        let mut session = self.session.lock();
        let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

        let heads = self
            .output_names
            .iter()
            .map(|name| match outputs.get(name.as_str()) {
                Some(output) => Ok(output.try_extract_array::<f32>()?.into_owned()),
                None => Err(SegError::Inference(format!(
                    "Output '{}' missing from session results",
                    name
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(heads)
    }
}

fn optimization_level(level: u8) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

/// Validate a graph input shape against the configured resolution.
///
/// Dynamic dimensions (reported as non-positive) are accepted.
fn check_input_shape(dims: &[i64], width: u32, height: u32) -> Result<()> {
    if dims.len() != 4 {
        return Err(SegError::ModelLoad(format!(
            "expected NCHW input, got shape {:?}",
            dims
        )));
    }

    let expect = |actual: i64, wanted: usize, what: &str| -> Result<()> {
        if actual > 0 && actual as usize != wanted {
            return Err(SegError::ModelLoad(format!(
                "model {} is {}, configuration expects {}",
                what, actual, wanted
            )));
        }
        Ok(())
    };

    expect(dims[1], INPUT_CHANNELS, "input channel count")?;
    expect(dims[2], height as usize, "input height")?;
    expect(dims[3], width as usize, "input width")?;
    Ok(())
}
