use crate::models::{Device, SegmentationModel, Segmenter};
use crate::utils::error::SegError;
use crate::{Config, Result};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of the single model load attempted at startup.
#[derive(Clone)]
pub enum ModelState {
    Ready(Arc<dyn SegmentationModel>),
    Failed(String),
}

impl ModelState {
    /// Load the configured checkpoint. Failure is captured, never retried.
    pub fn load(config: &Config) -> Self {
        match Segmenter::load(&config.model, &config.onnx_config) {
            Ok(segmenter) => {
                tracing::info!("Model loaded on {}", segmenter.device());
                ModelState::Ready(Arc::new(segmenter))
            }
            Err(e) => {
                tracing::error!("Model load failed: {}", e);
                ModelState::Failed(e.to_string())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready(_))
    }
}

/// Process-wide model context, built once and shared read-only.
pub struct ModelManager {
    state: ModelState,
    config: Config,
}

impl ModelManager {
    /// 初始化模型管理器
    pub fn init(config: Config) -> Self {
        tracing::info!("Initializing model manager...");
        let state = ModelState::load(&config);
        Self { state, config }
    }

    /// Build a manager around an already constructed model.
    pub fn with_model(config: Config, model: Arc<dyn SegmentationModel>) -> Self {
        Self {
            state: ModelState::Ready(model),
            config,
        }
    }

    pub fn with_state(config: Config, state: ModelState) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// 获取配置引用
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The loaded model, or the captured load failure.
    pub fn model(&self) -> Result<Arc<dyn SegmentationModel>> {
        match &self.state {
            ModelState::Ready(model) => Ok(Arc::clone(model)),
            ModelState::Failed(reason) => Err(SegError::ModelLoad(reason.clone())),
        }
    }

    /// 模型健康检查
    pub fn health_check(&self) -> Result<()> {
        self.model().map(|_| ())
    }

    /// 获取模型统计信息
    pub fn get_stats(&self) -> ModelStats {
        let (loaded, device, load_error) = match &self.state {
            ModelState::Ready(model) => (true, Some(model.device()), None),
            ModelState::Failed(reason) => (false, None, Some(reason.clone())),
        };

        ModelStats {
            loaded,
            load_error,
            device,
            model_path: self.config.model.model_path.display().to_string(),
            input_width: self.config.model.input_width,
            input_height: self.config.model.input_height,
            mask_threshold: self.config.model.mask_threshold,
            overlay_alpha: self.config.model.overlay_alpha,
            intra_threads: self.config.onnx_config.intra_threads,
        }
    }
}

/// 模型统计信息
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    pub model_path: String,
    pub input_width: u32,
    pub input_height: u32,
    pub mask_threshold: f32,
    pub overlay_alpha: f32,
    pub intra_threads: usize,
}
