use crate::models::DeviceSelector;
use crate::utils::error::SegError;
use crate::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Logit threshold the shipped UNet++ checkpoint was calibrated against.
pub const DEFAULT_MASK_THRESHOLD: f32 = -2.5;

/// Weight of the green mask layer when blending it over the input image.
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.4;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// Tokio worker threads
    pub workers: usize,

    pub model: ModelConfig,

    /// Example images offered by the UI
    pub examples: Vec<PathBuf>,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub mask_threshold: f32,
    pub overlay_alpha: f32,
    pub device: DeviceSelector,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别 (0-3)
    pub optimization_level: u8,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

/// On-disk YAML configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub model_path: PathBuf,
    pub im_width: u32,
    pub im_height: u32,

    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: f32,

    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,

    #[serde(default)]
    pub device: DeviceSelector,

    #[serde(default = "default_examples")]
    pub examples: Vec<PathBuf>,
}

fn default_mask_threshold() -> f32 {
    DEFAULT_MASK_THRESHOLD
}

fn default_overlay_alpha() -> f32 {
    DEFAULT_OVERLAY_ALPHA
}

fn default_examples() -> Vec<PathBuf> {
    ["1.png", "50.png", "100.png"]
        .iter()
        .map(|name| Path::new("../input/PNG/Original").join(name))
        .collect()
}

impl ConfigFile {
    /// Read and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            SegError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
            .map_err(|e| SegError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(raw)
            .map_err(|e| SegError::Config(format!("Malformed configuration: {}", e)))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<()> {
        if self.im_width == 0 || self.im_height == 0 {
            return Err(SegError::Config(format!(
                "Model input size must be non-zero, got {}x{}",
                self.im_width, self.im_height
            )));
        }
        if !self.mask_threshold.is_finite() {
            return Err(SegError::Config("mask_threshold must be finite".to_string()));
        }
        if !(0.0..=1.0).contains(&self.overlay_alpha) {
            return Err(SegError::Config(format!(
                "overlay_alpha must be within [0, 1], got {}",
                self.overlay_alpha
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn new(
        bind_addr: String,
        file: ConfigFile,
        workers: Option<usize>,
        device: Option<DeviceSelector>,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores).max(1);

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1), // 使用75%的CPU核心
            optimization_level: 3,
        };

        let server_config = ServerConfig {
            max_request_size: 50 * 1024 * 1024, // 50MB
        };

        let model = ModelConfig {
            model_path: file.model_path,
            input_width: file.im_width,
            input_height: file.im_height,
            mask_threshold: file.mask_threshold,
            overlay_alpha: file.overlay_alpha,
            device: device.unwrap_or(file.device),
        };

        Ok(Self {
            bind_addr,
            workers,
            model,
            examples: file.examples,
            onnx_config,
            server_config,
        })
    }

    /// Build a config straight from a YAML file with default server settings.
    pub fn from_file(path: &Path, bind_addr: impl Into<String>) -> Result<Self> {
        let file = ConfigFile::load(path)?;
        Self::new(bind_addr.into(), file, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_keys_and_fills_defaults() {
        let file = ConfigFile::parse(
            "model_path: models/unetpp.onnx\nim_width: 256\nim_height: 256\n",
        )
        .unwrap();

        assert_eq!(file.model_path, PathBuf::from("models/unetpp.onnx"));
        assert_eq!((file.im_width, file.im_height), (256, 256));
        assert_eq!(file.mask_threshold, DEFAULT_MASK_THRESHOLD);
        assert_eq!(file.overlay_alpha, DEFAULT_OVERLAY_ALPHA);
        assert_eq!(file.device, DeviceSelector::Auto);
        assert_eq!(file.examples.len(), 3);
    }

    #[test]
    fn optional_keys_override_defaults() {
        let file = ConfigFile::parse(
            "model_path: m.onnx\nim_width: 128\nim_height: 64\nmask_threshold: 0.0\ndevice: cpu\nexamples: [a.png]\n",
        )
        .unwrap();

        assert_eq!(file.mask_threshold, 0.0);
        assert_eq!(file.device, DeviceSelector::Cpu);
        assert_eq!(file.examples, vec![PathBuf::from("a.png")]);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let err = ConfigFile::parse("model_path: m.onnx\nim_width: 256\n").unwrap_err();
        assert!(matches!(err, SegError::Config(_)));
    }

    #[test]
    fn zero_input_size_is_rejected() {
        let err = ConfigFile::parse("model_path: m.onnx\nim_width: 0\nim_height: 256\n")
            .unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ConfigFile::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, SegError::Config(_)));
    }

    #[test]
    fn cli_device_overrides_file() {
        let file = ConfigFile::parse("model_path: m.onnx\nim_width: 256\nim_height: 256\ndevice: cuda\n")
            .unwrap();
        let config = Config::new(
            "127.0.0.1:0".to_string(),
            file,
            Some(2),
            Some(DeviceSelector::Cpu),
        )
        .unwrap();

        assert_eq!(config.model.device, DeviceSelector::Cpu);
        assert_eq!(config.workers, 2);
        assert!(config.onnx_config.intra_threads >= 1);
    }
}
