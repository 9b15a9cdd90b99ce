use crate::{
    image::{ImageLoader, ImagePreprocessor, MaskPostprocessor},
    models::{segmenter::NUM_CLASSES, ModelManager, ModelState, SegmentationModel},
    segmentation::{PredictStatus, Prediction, StageTimings},
    utils::error::SegError,
    Result,
};
use image::RgbImage;
use ndarray::{Array3, Axis, Ix4};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Run the network on a preprocessed (3, H, W) tensor.
///
/// Adds the batch axis, keeps only the deepest supervision head and returns
/// it without the batch axis, i.e. shape (1, H, W).
pub fn run_inference(model: &dyn SegmentationModel, input: &Array3<f32>) -> Result<Array3<f32>> {
    let batch = input.view().insert_axis(Axis(0));
    let heads = model.forward(batch)?;
    let head_count = heads.len();

    let last = heads
        .into_iter()
        .last()
        .ok_or_else(|| SegError::Inference("model produced no outputs".to_string()))?;

    let last = last.into_dimensionality::<Ix4>().map_err(|e| {
        SegError::Inference(format!("expected NCHW output from the final head: {}", e))
    })?;

    let (batch_size, channels, _, _) = last.dim();
    if batch_size != 1 || channels != NUM_CLASSES {
        return Err(SegError::Inference(format!(
            "expected output shape (1, {}, H, W), got {:?}",
            NUM_CLASSES,
            last.shape()
        )));
    }

    tracing::debug!(
        "Using final head of {}, shape {:?}",
        head_count,
        last.shape()
    );

    Ok(last.index_axis_move(Axis(0), 0))
}

/// 分割服务: the single predict entry point behind the UI.
pub struct SegmentationService {
    manager: ModelManager,
}

impl SegmentationService {
    pub fn new(manager: ModelManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    /// Segment `image` and blend the mask over it.
    ///
    /// Never panics and never returns an error: every failure becomes a
    /// status line and the service stays usable for the next call.
    pub fn predict(&self, image: Option<RgbImage>) -> Prediction {
        let model = match self.ready_model() {
            Ok(model) => model,
            Err(prediction) => return prediction,
        };

        let Some(image) = image else {
            return Prediction::failure(PredictStatus::NoImage);
        };

        self.guarded(|| self.run_pipeline(model.as_ref(), &image))
    }

    /// Same as [`predict`](Self::predict) for still-encoded upload bytes.
    ///
    /// The model state is checked before anything is decoded.
    pub fn predict_encoded(&self, bytes: Option<&[u8]>) -> Prediction {
        let model = match self.ready_model() {
            Ok(model) => model,
            Err(prediction) => return prediction,
        };

        let bytes = match bytes {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Prediction::failure(PredictStatus::NoImage),
        };

        self.guarded(|| {
            let image = ImageLoader::from_bytes(bytes)?;
            self.run_pipeline(model.as_ref(), &image)
        })
    }

    /// Same as [`predict`](Self::predict) for a base64 (or data URL) payload.
    pub fn predict_base64(&self, payload: Option<&str>) -> Prediction {
        let model = match self.ready_model() {
            Ok(model) => model,
            Err(prediction) => return prediction,
        };

        let payload = match payload {
            Some(payload) if !payload.trim().is_empty() => payload,
            _ => return Prediction::failure(PredictStatus::NoImage),
        };

        self.guarded(|| {
            let image = ImageLoader::from_base64(payload)?;
            self.run_pipeline(model.as_ref(), &image)
        })
    }

    /// Report an upload that could not even be read off the wire.
    ///
    /// A failed model load still takes precedence over the upload error.
    pub fn predict_unreadable(&self, error: SegError) -> Prediction {
        if let Err(prediction) = self.ready_model() {
            return prediction;
        }

        tracing::error!("Prediction failed: {}", error);
        Prediction::failure(PredictStatus::Error(error.to_string()))
    }

    fn ready_model(&self) -> std::result::Result<Arc<dyn SegmentationModel>, Prediction> {
        match self.manager.state() {
            ModelState::Ready(model) => Ok(Arc::clone(model)),
            ModelState::Failed(reason) => Err(Prediction::failure(
                PredictStatus::ModelUnavailable(reason.clone()),
            )),
        }
    }

    /// Error boundary: converts errors and panics into a failed prediction.
    fn guarded<F>(&self, f: F) -> Prediction
    where
        F: FnOnce() -> Result<(RgbImage, StageTimings)>,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok((overlay, timings))) => Prediction::success(overlay, timings),
            Ok(Err(e)) => {
                tracing::error!("Prediction failed: {}", e);
                Prediction::failure(PredictStatus::Error(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Prediction panicked: {}", message);
                Prediction::failure(PredictStatus::Error(message))
            }
        }
    }

    /// 核心处理流水线
    fn run_pipeline(
        &self,
        model: &dyn SegmentationModel,
        image: &RgbImage,
    ) -> Result<(RgbImage, StageTimings)> {
        let settings = &self.manager.config().model;
        let (width, height) = model.input_size();

        let start = Instant::now();
        let input = ImagePreprocessor::preprocess(image, width, height)?;
        let preprocess_time = start.elapsed();

        let inference_start = Instant::now();
        let logits = run_inference(model, &input)?;
        let inference_time = inference_start.elapsed();

        let postprocess_start = Instant::now();
        let overlay = MaskPostprocessor::postprocess(
            logits,
            image,
            settings.mask_threshold,
            settings.overlay_alpha,
        )?;
        let postprocess_time = postprocess_start.elapsed();

        let timings = StageTimings {
            preprocess_ms: preprocess_time.as_millis() as u64,
            inference_ms: inference_time.as_millis() as u64,
            postprocess_ms: postprocess_time.as_millis() as u64,
        };

        tracing::info!(
            "Segmentation completed: {}x{}, device={}, total_time={:.3}s",
            image.width(),
            image.height(),
            model.device(),
            start.elapsed().as_secs_f32()
        );

        Ok((overlay, timings))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "pipeline panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{
        test_config, ConstantModel, FailingModel, GradientModel, HeadlessModel, PanickingModel,
    };
    use image::Rgb;

    fn service(model: Arc<dyn SegmentationModel>) -> SegmentationService {
        SegmentationService::new(ModelManager::with_model(test_config(), model))
    }

    #[test]
    fn runner_selects_the_last_head() {
        // Earlier heads say "foreground", the deepest says "background".
        let model = ConstantModel::with_heads(256, vec![5.0, 5.0, 5.0, -7.0]);
        let input = Array3::<f32>::zeros((3, 256, 256));

        let output = run_inference(&model, &input).unwrap();

        assert_eq!(output.shape(), &[1, 256, 256]);
        assert!(output.iter().all(|&v| v == -7.0));
    }

    #[test]
    fn runner_rejects_empty_output() {
        let input = Array3::<f32>::zeros((3, 256, 256));
        let err = run_inference(&HeadlessModel, &input).unwrap_err();
        assert!(matches!(err, SegError::Inference(_)));
    }

    #[test]
    fn overlay_keeps_input_dimensions() {
        let service = service(Arc::new(ConstantModel::new(256, 1.0)));

        for (w, h) in [(1, 1), (17, 300), (640, 480), (256, 256)] {
            let image = RgbImage::from_pixel(w, h, Rgb([30, 40, 50]));
            let prediction = service.predict(Some(image));

            assert_eq!(prediction.status, PredictStatus::Success);
            assert_eq!(prediction.overlay.unwrap().dimensions(), (w, h));
        }
    }

    #[test]
    fn images_wider_than_8192_are_segmented() {
        let service = service(Arc::new(ConstantModel::new(64, 1.0)));
        let image = RgbImage::from_pixel(8193, 2, Rgb([10, 10, 10]));

        let prediction = service.predict(Some(image));

        assert_eq!(prediction.status, PredictStatus::Success);
        let overlay = prediction.overlay.unwrap();
        assert_eq!(overlay.dimensions(), (8193, 2));
        assert_eq!(overlay.get_pixel(8192, 1), &Rgb([10, 112, 10]));
    }

    #[test]
    fn runner_rejects_multi_class_output() {
        struct TwoClassModel;

        impl SegmentationModel for TwoClassModel {
            fn input_size(&self) -> (u32, u32) {
                (32, 32)
            }

            fn device(&self) -> crate::models::Device {
                crate::models::Device::Cpu
            }

            fn forward(&self, batch: ndarray::ArrayView4<f32>) -> Result<Vec<ndarray::ArrayD<f32>>> {
                let (n, _, h, w) = batch.dim();
                Ok(vec![ndarray::Array4::<f32>::zeros((n, NUM_CLASSES + 1, h, w)).into_dyn()])
            }
        }

        let input = Array3::<f32>::zeros((3, 32, 32));
        let err = run_inference(&TwoClassModel, &input).unwrap_err();
        assert!(err.to_string().contains("expected output shape (1, 1, H, W)"));
    }

    #[test]
    fn unreadable_upload_is_an_error_status() {
        let ready = service(Arc::new(ConstantModel::new(256, 1.0)));
        let prediction = ready.predict_unreadable(SegError::InvalidImage("truncated body".into()));
        assert_eq!(
            prediction.status_message(),
            "error: Invalid image: truncated body"
        );
        assert!(prediction.overlay.is_none());

        let failed = SegmentationService::new(ModelManager::with_state(
            test_config(),
            ModelState::Failed("checkpoint not found: x.onnx".to_string()),
        ));
        let prediction = failed.predict_unreadable(SegError::InvalidImage("truncated body".into()));
        assert_eq!(
            prediction.status_message(),
            "model load failed: checkpoint not found: x.onnx"
        );
    }

    #[test]
    fn black_image_with_background_logits_is_unchanged() {
        let service = service(Arc::new(ConstantModel::new(256, -2.5)));
        let image = RgbImage::new(256, 256);

        let prediction = service.predict(Some(image.clone()));

        assert_eq!(prediction.overlay.unwrap(), image);
    }

    #[test]
    fn missing_image_reports_status() {
        let service = service(Arc::new(ConstantModel::new(256, 1.0)));
        let prediction = service.predict(None);

        assert!(prediction.overlay.is_none());
        assert_eq!(prediction.status_message(), "no image provided");
        assert_eq!(
            service.predict_encoded(Some(&[][..])).status,
            PredictStatus::NoImage
        );
    }

    #[test]
    fn failed_load_is_reported_without_touching_the_image() {
        let service = SegmentationService::new(ModelManager::with_state(
            test_config(),
            ModelState::Failed("checkpoint not found: m.onnx".to_string()),
        ));

        for _ in 0..2 {
            let prediction = service.predict(Some(RgbImage::new(8, 8)));
            assert!(prediction.overlay.is_none());
            assert_eq!(
                prediction.status_message(),
                "model load failed: checkpoint not found: m.onnx"
            );
        }

        // Undecodable bytes must not mask the load failure.
        let prediction = service.predict_encoded(Some(&b"garbage"[..]));
        assert!(matches!(prediction.status, PredictStatus::ModelUnavailable(_)));
    }

    #[test]
    fn inference_errors_become_status_text() {
        let service = service(Arc::new(FailingModel));
        let prediction = service.predict(Some(RgbImage::new(32, 32)));

        assert!(prediction.overlay.is_none());
        assert!(prediction.status_message().starts_with("error: "));
    }

    #[test]
    fn panics_are_contained_and_service_survives() {
        let panicking = service(Arc::new(PanickingModel));
        let prediction = panicking.predict(Some(RgbImage::new(32, 32)));
        assert!(prediction.status_message().starts_with("error: "));
        assert!(prediction.status_message().contains("forward pass exploded"));

        let healthy = service(Arc::new(ConstantModel::new(256, 1.0)));
        assert!(healthy.predict(Some(RgbImage::new(32, 32))).status.is_success());
    }

    #[test]
    fn base64_payloads_follow_the_same_rules() {
        let service = service(Arc::new(ConstantModel::new(256, 1.0)));
        let png = ImageLoader::to_png_data_url(&RgbImage::new(12, 9)).unwrap();

        let prediction = service.predict_base64(Some(&png));
        assert!(prediction.status.is_success());
        assert_eq!(prediction.overlay.unwrap().dimensions(), (12, 9));

        assert_eq!(service.predict_base64(Some("  ")).status, PredictStatus::NoImage);
        assert!(service
            .predict_base64(Some("%%%"))
            .status_message()
            .starts_with("error: "));
    }

    #[test]
    fn undecodable_upload_is_an_error_status() {
        let service = service(Arc::new(ConstantModel::new(256, 1.0)));
        let prediction = service.predict_encoded(Some(&b"not an image"[..]));
        assert!(prediction.status_message().starts_with("error: "));
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let service = service(Arc::new(GradientModel::new(256)));
        let image = RgbImage::from_fn(120, 90, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]));

        let first = service.predict(Some(image.clone())).overlay.unwrap();
        let second = service.predict(Some(image)).overlay.unwrap();

        assert_eq!(first, second);
    }
}
