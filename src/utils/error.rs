use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl SegError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SegError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            SegError::Base64(_) => StatusCode::BAD_REQUEST,
            SegError::Json(_) => StatusCode::BAD_REQUEST,
            SegError::ImageDecode(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            SegError::NotFound(_) => StatusCode::NOT_FOUND,
            SegError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SegError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            SegError::InvalidImage(_) => "INVALID_IMAGE",
            SegError::Inference(_) => "INFERENCE_ERROR",
            SegError::ImageProcessing(_) => "IMAGE_PROCESSING_ERROR",
            SegError::Config(_) => "CONFIG_ERROR",
            SegError::NotFound(_) => "NOT_FOUND",
            SegError::Io(_) => "IO_ERROR",
            SegError::Json(_) => "JSON_ERROR",
            SegError::Base64(_) => "BASE64_DECODE_ERROR",
            SegError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            SegError::Ort(_) => "ORT_ERROR",
            SegError::Shape(_) => "TENSOR_SHAPE_ERROR",
            SegError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for SegError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });

        tracing::error!("Request failed: {} ({})", self, status);

        (status, axum::Json(error_response)).into_response()
    }
}
