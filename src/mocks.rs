//! Test doubles for [`SegmentationModel`].

use crate::config::{
    ModelConfig, OnnxConfig, ServerConfig, DEFAULT_MASK_THRESHOLD, DEFAULT_OVERLAY_ALPHA,
};
use crate::models::{Device, DeviceSelector, SegmentationModel};
use crate::utils::error::SegError;
use crate::{Config, Result};
use ndarray::prelude::*;

/// Deep-supervision heads the shipped UNet++ exposes.
const MOCK_HEADS: usize = 4;

fn mask_shape(batch: &ArrayView4<f32>, channels: usize) -> (usize, usize, usize, usize) {
    let (n, _, h, w) = batch.dim();
    (n, channels, h, w)
}

/// Emits one constant-valued logit map per head.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    pub image_size: u32,
    pub heads: Vec<f32>,
}

impl ConstantModel {
    /// All heads produce `value`.
    pub fn new(image_size: u32, value: f32) -> Self {
        Self::with_heads(image_size, vec![value; MOCK_HEADS])
    }

    pub fn with_heads(image_size: u32, heads: Vec<f32>) -> Self {
        Self { image_size, heads }
    }
}

impl SegmentationModel for ConstantModel {
    fn input_size(&self) -> (u32, u32) {
        (self.image_size, self.image_size)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn forward(&self, batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let shape = mask_shape(&batch, 1);
        Ok(self
            .heads
            .iter()
            .map(|&value| Array4::from_elem(shape, value).into_dyn())
            .collect())
    }
}

/// Logits that depend on pixel position and input, for determinism checks.
#[derive(Debug, Clone)]
pub struct GradientModel {
    pub image_size: u32,
}

impl GradientModel {
    pub const fn new(image_size: u32) -> Self {
        Self { image_size }
    }
}

impl SegmentationModel for GradientModel {
    fn input_size(&self) -> (u32, u32) {
        (self.image_size, self.image_size)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn forward(&self, batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let shape = mask_shape(&batch, 1);
        let head = Array4::from_shape_fn(shape, |(n, _, y, x)| {
            (x as f32 - y as f32) / 16.0 + batch[[n, 1, y, x]] * 100.0
        });
        Ok(vec![head.into_dyn()])
    }
}

/// Always fails the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct FailingModel;

impl SegmentationModel for FailingModel {
    fn input_size(&self) -> (u32, u32) {
        (256, 256)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn forward(&self, _batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        Err(SegError::Inference("device lost".to_string()))
    }
}

/// Panics inside the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct PanickingModel;

impl SegmentationModel for PanickingModel {
    fn input_size(&self) -> (u32, u32) {
        (64, 64)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn forward(&self, _batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        panic!("forward pass exploded")
    }
}

/// Returns no heads at all.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessModel;

impl SegmentationModel for HeadlessModel {
    fn input_size(&self) -> (u32, u32) {
        (256, 256)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn forward(&self, _batch: ArrayView4<f32>) -> Result<Vec<ArrayD<f32>>> {
        Ok(Vec::new())
    }
}

/// CPU config pointing at a checkpoint that does not exist.
pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        workers: 1,
        model: ModelConfig {
            model_path: "missing/unetpp.onnx".into(),
            input_width: 256,
            input_height: 256,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            overlay_alpha: DEFAULT_OVERLAY_ALPHA,
            device: DeviceSelector::Cpu,
        },
        examples: Vec::new(),
        onnx_config: OnnxConfig {
            intra_threads: 1,
            optimization_level: 3,
        },
        server_config: ServerConfig {
            max_request_size: 50 * 1024 * 1024,
        },
    }
}
