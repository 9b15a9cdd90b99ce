use crate::{
    image::ImageLoader,
    segmentation::{PredictStatus, Prediction, SegmentationService, StageTimings},
    utils::error::SegError,
    web::{extractors::RequestId, AppState},
    Result,
};
use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// JSON请求体（base64模式）
#[derive(Debug, Deserialize)]
pub struct PredictJsonRequest {
    /// Base64编码的图像数据, optionally as a data URL
    #[serde(default)]
    pub image: Option<String>,
}

/// Response for every predict call. Failures are reported through `status`.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub status: String,
    /// Overlay as a `data:image/png;base64,...` URL
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<StageTimings>,
    pub processing_time: f32,
    pub timestamp: String,
    pub request_id: String,
}

impl PredictResponse {
    fn render(prediction: Prediction, request_id: String, start_time: Instant) -> Self {
        let encoded = prediction
            .overlay
            .as_ref()
            .map(|overlay| (ImageLoader::to_png_data_url(overlay), overlay.dimensions()));

        let (status, image, dimensions) = match encoded {
            Some((Ok(url), dims)) => (prediction.status, Some(url), Some(dims)),
            Some((Err(e), _)) => (PredictStatus::Error(e.to_string()), None, None),
            None => (prediction.status, None, None),
        };

        Self {
            success: status.is_success(),
            status: status.to_string(),
            image,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            timings: prediction.timings.filter(|_| status.is_success()),
            processing_time: start_time.elapsed().as_secs_f32(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

/// Example image entry shown by the UI.
#[derive(Debug, Serialize)]
pub struct ExampleInfo {
    pub index: usize,
    pub name: String,
    pub url: String,
    pub available: bool,
}

/// Run a predict closure on the blocking pool and render the response.
async fn run_prediction<F>(
    service: Arc<SegmentationService>,
    request_id: String,
    predict: F,
) -> PredictResponse
where
    F: FnOnce(&SegmentationService) -> Prediction + Send + 'static,
{
    let start_time = Instant::now();
    let task_request_id = request_id.clone();

    let response = tokio::task::spawn_blocking(move || {
        let prediction = predict(&service);
        PredictResponse::render(prediction, task_request_id, start_time)
    })
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Prediction task failed: request_id={}, {}", request_id, e);
        PredictResponse::render(
            Prediction::failure(PredictStatus::Error(e.to_string())),
            request_id.clone(),
            start_time,
        )
    });

    tracing::info!(
        "Prediction finished: request_id={}, status={:?}, time={:.3}s",
        response.request_id,
        response.status,
        response.processing_time
    );

    response
}

/// Multipart文件上传处理器
///
/// Always answers 200; a body that cannot be read becomes an error status.
pub async fn predict_upload_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    multipart: Multipart,
) -> Json<PredictResponse> {
    tracing::info!("Processing multipart predict request: request_id={}", request_id);

    let upload = read_upload(multipart).await;

    let response = run_prediction(state.service, request_id, move |service| match upload {
        Ok(image_data) => service.predict_encoded(image_data.as_deref()),
        Err(e) => service.predict_unreadable(e),
    })
    .await;

    Json(response)
}

/// Collect the image bytes from the `file` field (`image` is accepted too).
async fn read_upload(mut multipart: Multipart) -> Result<Option<Bytes>> {
    let mut image_data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        SegError::InvalidImage(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "file" | "image" => {
                let data = field.bytes().await.map_err(|e| {
                    SegError::InvalidImage(format!("Failed to read file data: {}", e))
                })?;
                tracing::debug!("Received file: {} bytes", data.len());
                image_data = Some(data);
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    Ok(image_data)
}

/// JSON base64上传处理器
pub async fn predict_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    Json(request): Json<PredictJsonRequest>,
) -> Json<PredictResponse> {
    tracing::info!("Processing JSON predict request: request_id={}", request_id);

    let response = run_prediction(state.service, request_id, move |service| {
        service.predict_base64(request.image.as_deref())
    })
    .await;

    Json(response)
}

/// List the example images from the configuration.
pub async fn examples_handler(State(state): State<AppState>) -> Json<Vec<ExampleInfo>> {
    let examples = state
        .service
        .manager()
        .config()
        .examples
        .iter()
        .enumerate()
        .map(|(index, path)| ExampleInfo {
            index,
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            url: format!("/api/examples/{}", index),
            available: path.is_file(),
        })
        .collect();

    Json(examples)
}

/// Serve the raw bytes of one example image.
pub async fn example_image_handler(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse> {
    let path = state
        .service
        .manager()
        .config()
        .examples
        .get(index)
        .cloned()
        .ok_or_else(|| SegError::NotFound(format!("example {}", index)))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| SegError::NotFound(format!("{}: {}", path.display(), e)))?;

    let content_type = ImageLoader::detect_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}
