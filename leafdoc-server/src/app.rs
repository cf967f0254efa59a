use std::{ffi::OsStr, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use leafdoc_core::{
    classifier::{Classifier, ModelHandle},
    format::format,
    label::class_info,
    recommend::{needs_recommendation, Recommender},
};
use leafdoc_types::prelude::*;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::AppError;

pub const UPLOAD_FIELD: &str = "file";
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];
/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub top_k: usize,
    pub max_upload_bytes: usize,
    pub recommendation_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_upload_bytes: 10 * MIB,
            recommendation_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub model: ModelHandle,
    pub recommender: Option<Arc<dyn Recommender>>,
    pub settings: Settings,
}

impl AppState {
    /// The loaded model, or a 503 saying whether it is still loading or failed.
    fn classifier(&self, loading_message: &str) -> Result<Arc<dyn Classifier>, AppError> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        Err(match self.model.failure() {
            Some(reason) => AppError::unavailable(format!("Model failed to load: {reason}")),
            None => AppError::unavailable(loading_message),
        })
    }

    /// Advice for the top prediction, or `None` if it is unavailable for any reason.
    async fn recommendation_for(&self, prediction: &PredictionEntry) -> Option<Recommendation> {
        let recommender = self.recommender.as_ref()?;
        if !needs_recommendation(&prediction.disease) {
            return None;
        }
        let request = recommender.recommend(&prediction.crop, &prediction.disease);
        match tokio::time::timeout(self.settings.recommendation_timeout, request).await {
            Ok(Ok(recommendation)) => Some(recommendation),
            Ok(Err(err)) => {
                tracing::warn!("Recommendation failed, answering without it: {err:#}");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.settings.recommendation_timeout,
                    "Recommendation timed out, answering without it"
                );
                None
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(root))
        .route("/predict", post(predict_image))
        .route("/health", get(health))
        .route("/classes", get(classes))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> String {
    format!("leafdoc is running! {:?}", state.model)
}

async fn not_found() -> AppError {
    AppError::not_found("Endpoint not found")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub prediction: PredictionEntry,
    pub top_3_predictions: Vec<PredictionEntry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recommendations: Option<Recommendation>,
}

struct Upload {
    file_name: String,
    bytes: Bytes,
}

fn validate_extension(file_name: &str) -> Result<(), AppError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase);
    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => {
            let allowed: Vec<_> = ALLOWED_EXTENSIONS.iter().map(|ext| format!(".{ext}")).collect();
            Err(AppError::bad_request(format!(
                "Invalid file type. Allowed types: {}",
                allowed.join(", ")
            )))
        }
    }
}

fn size_limit_message(max_bytes: usize) -> String {
    match max_bytes {
        n if n >= MIB && n % MIB == 0 => format!("File size exceeds {}MB limit", n / MIB),
        n => format!("File size exceeds {n} byte limit"),
    }
}

/// Bodies over the router's limit surface as multipart errors, not as a long field.
fn multipart_error(err: MultipartError, what: &str, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::bad_request(size_limit_message(max_bytes))
    } else {
        AppError::bad_request(format!("{what}: {err}"))
    }
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, "Invalid multipart body", max_bytes))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_owned();
        validate_extension(&file_name)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, "Failed to read upload", max_bytes))?;
        if bytes.len() > max_bytes {
            return Err(AppError::bad_request(size_limit_message(max_bytes)));
        }
        return Ok(Upload { file_name, bytes });
    }
    Err(AppError::bad_request("No file uploaded"))
}

async fn predict_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, AppError> {
    let model = state.classifier("Model not loaded. Please try again later.")?;
    let Upload { file_name, bytes } = read_upload(multipart, state.settings.max_upload_bytes).await?;
    tracing::debug!(file_name = %file_name, size = bytes.len(), "received upload");

    let top_k = state.settings.top_k;
    let raw_predictions = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes)
            .map_err(|err| AppError::bad_request(format!("Failed to process image: {err}")))?;
        model
            .classify(&image, top_k)
            .context("Prediction failed")
            .map_err(AppError::internal)
    })
    .await
    .context("Inference task panicked")??;

    let predictions = format(raw_predictions);
    let prediction = predictions
        .first()
        .cloned()
        .context("Prediction failed: model returned no classes")?;
    tracing::info!(
        crop = %prediction.crop,
        disease = %prediction.disease,
        confidence = %prediction.confidence,
        "prediction"
    );
    let recommendations = state.recommendation_for(&prediction).await;

    Ok(Json(PredictResponse {
        success: true,
        prediction,
        top_3_predictions: predictions,
        recommendations,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub num_classes: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_error: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let num_classes = state.model.get().map_or(0, |model| model.classes().len());
    let model_error = state.model.failure().map(str::to_owned);
    Json(HealthResponse {
        status: if model_error.is_some() { "unhealthy" } else { "healthy" }.to_owned(),
        model_loaded: state.model.is_loaded(),
        num_classes,
        model_error,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassesResponse {
    pub total_classes: usize,
    pub classes: Vec<ClassInfo>,
}

async fn classes(State(state): State<AppState>) -> Result<Json<ClassesResponse>, AppError> {
    let model = state.classifier("Model not loaded")?;
    let classes: Vec<_> = model.classes().iter().map(class_info).collect();
    Ok(Json(ClassesResponse {
        total_classes: classes.len(),
        classes,
    }))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use leafdoc_core::classifier::Classifier;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    use super::*;

    const BOUNDARY: &str = "leafdoc-test-boundary";

    struct StubClassifier {
        classes: Vec<ClassLabel>,
        scores: Vec<f64>,
    }

    impl StubClassifier {
        fn tomato() -> Self {
            Self {
                classes: ["Tomato___Early_blight", "Tomato___Late_blight", "Tomato___healthy", "Potato___healthy"]
                    .into_iter()
                    .map(ClassLabel::from)
                    .collect(),
                scores: vec![0.9567, 0.0321, 0.0100, 0.0012],
            }
        }
    }

    impl Classifier for StubClassifier {
        fn classes(&self) -> &[ClassLabel] {
            &self.classes
        }

        fn classify(&self, _: &DynamicImage, top_k: usize) -> anyhow::Result<Vec<(ClassLabel, f64)>> {
            Ok(self
                .classes
                .iter()
                .cloned()
                .zip(self.scores.iter().copied())
                .take(top_k.max(1))
                .collect())
        }
    }

    struct FixedAdvice;

    #[async_trait]
    impl Recommender for FixedAdvice {
        async fn recommend(&self, crop: &str, disease: &str) -> anyhow::Result<Recommendation> {
            Ok(Recommendation {
                severity: format!("{disease} on {crop} is moderate"),
                treatment: "Apply copper fungicide.".to_owned(),
                prevention: "Avoid overhead watering.".to_owned(),
            })
        }
    }

    struct BrokenAdvice;

    #[async_trait]
    impl Recommender for BrokenAdvice {
        async fn recommend(&self, _: &str, _: &str) -> anyhow::Result<Recommendation> {
            anyhow::bail!("quota exceeded")
        }
    }

    struct SlowAdvice;

    #[async_trait]
    impl Recommender for SlowAdvice {
        async fn recommend(&self, crop: &str, disease: &str) -> anyhow::Result<Recommendation> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            FixedAdvice.recommend(crop, disease).await
        }
    }

    fn state(model: ModelHandle, recommender: Option<Arc<dyn Recommender>>) -> AppState {
        AppState {
            model,
            recommender,
            settings: Settings {
                recommendation_timeout: Duration::from_millis(50),
                ..Settings::default()
            },
        }
    }

    fn loaded() -> ModelHandle {
        ModelHandle::loaded(StubClassifier::tomato())
    }

    fn png() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([30, 140, 40])));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn upload(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .expect("valid request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request")
    }

    async fn json<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[rstest]
    #[case("leaf.jpg", true)]
    #[case("leaf.JPEG", true)]
    #[case("photos/leaf.png", true)]
    #[case("leaf.gif", true)]
    #[case("leaf.bmp", true)]
    #[case("leaf.txt", false)]
    #[case("leaf", false)]
    #[case("", false)]
    fn checks_extension(#[case] file_name: &str, #[case] allowed: bool) {
        assert_eq!(validate_extension(file_name).is_ok(), allowed);
    }

    #[rstest]
    #[case(10 * MIB, "File size exceeds 10MB limit")]
    #[case(1500, "File size exceeds 1500 byte limit")]
    fn size_message(#[case] max: usize, #[case] expected: &str) {
        assert_eq!(size_limit_message(max), expected);
    }

    #[tokio::test]
    async fn predicts_top_three() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = json(response).await?;
        assert_eq!(body["success"], true);
        assert_eq!(
            body["prediction"],
            serde_json::json!({
                "crop": "Tomato",
                "disease": "Early blight",
                "confidence": 95.67,
                "class": "Tomato___Early_blight"
            })
        );
        let confidences: Vec<f64> = body["top_3_predictions"]
            .as_array()
            .expect("list of predictions")
            .iter()
            .filter_map(|entry| entry["confidence"].as_f64())
            .collect();
        assert_eq!(confidences, vec![95.67, 3.21, 1.0]);
        assert!(body.get("recommendations").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn attaches_recommendations() -> anyhow::Result<()> {
        let app = router(state(loaded(), Some(Arc::new(FixedAdvice))));
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.jpg", &png())).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: PredictResponse = json(response).await?;
        let advice = body.recommendations.expect("recommendations attached");
        assert_eq!(advice.severity, "Early blight on Tomato is moderate");
        Ok(())
    }

    #[rstest]
    #[case(Arc::new(BrokenAdvice) as Arc<dyn Recommender>)]
    #[case(Arc::new(SlowAdvice) as Arc<dyn Recommender>)]
    #[tokio::test]
    async fn advice_failure_still_answers(#[case] recommender: Arc<dyn Recommender>) -> anyhow::Result<()> {
        let app = router(state(loaded(), Some(recommender)));
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: PredictResponse = json(response).await?;
        assert!(body.recommendations.is_none());
        assert_eq!(body.prediction.disease, "Early blight");
        Ok(())
    }

    #[tokio::test]
    async fn healthy_leaf_gets_no_advice() -> anyhow::Result<()> {
        let healthy = StubClassifier {
            classes: vec!["Apple___healthy".into()],
            scores: vec![0.99],
        };
        let app = router(state(ModelHandle::loaded(healthy), Some(Arc::new(FixedAdvice))));
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        let body: PredictResponse = json(response).await?;
        assert!(body.recommendations.is_none());
        assert_eq!(body.top_3_predictions.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_wrong_extension() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(upload(UPLOAD_FIELD, "notes.txt", b"hello")).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = json(response).await?;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap_or_default().starts_with("Invalid file type"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_undecodable_image() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", b"not a png")).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_oversized_upload() -> anyhow::Result<()> {
        let mut state = state(loaded(), None);
        state.settings.max_upload_bytes = 16;
        let app = router(state);
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = json(response).await?;
        assert_eq!(body["error"], "File size exceeds 16 byte limit");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_upload_beyond_body_limit() -> anyhow::Result<()> {
        let mut state = state(loaded(), None);
        state.settings.max_upload_bytes = 1024;
        let app = router(state);
        let response = app
            .oneshot(upload(UPLOAD_FIELD, "leaf.png", &vec![0u8; 200 * 1024]))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = json(response).await?;
        assert_eq!(body["error"], "File size exceeds 1024 byte limit");
        Ok(())
    }

    #[tokio::test]
    async fn requires_file_field() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(upload("image", "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = json(response).await?;
        assert_eq!(body["error"], "No file uploaded");
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_until_model_loads() -> anyhow::Result<()> {
        let model = ModelHandle::empty();
        let app = router(state(model.clone(), None));

        let response = app.clone().oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = app.clone().oneshot(get("/classes")).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let health: HealthResponse = json(app.clone().oneshot(get("/health")).await?).await?;
        assert!(!health.model_loaded);
        assert_eq!(health.num_classes, 0);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.model_error, None);

        model.install(StubClassifier::tomato());
        let response = app.oneshot(upload(UPLOAD_FIELD, "leaf.png", &png())).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn reports_failed_model_load() -> anyhow::Result<()> {
        let model = ModelHandle::empty();
        model.fail("Failed to read model file ./train-data/model.bin");
        let app = router(state(model, None));

        for request in [upload(UPLOAD_FIELD, "leaf.png", &png()), get("/classes")] {
            let response = app.clone().oneshot(request).await?;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body: serde_json::Value = json(response).await?;
            assert_eq!(
                body["error"],
                "Model failed to load: Failed to read model file ./train-data/model.bin"
            );
        }

        let health: serde_json::Value = json(app.oneshot(get("/health")).await?).await?;
        assert_eq!(
            health,
            serde_json::json!({
                "status": "unhealthy",
                "model_loaded": false,
                "num_classes": 0,
                "model_error": "Failed to read model file ./train-data/model.bin"
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn lists_classes() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(get("/classes")).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body: ClassesResponse = json(response).await?;
        assert_eq!(body.total_classes, 4);
        assert_eq!(body.classes[1].disease, "Late blight");
        assert_eq!(body.classes[3].crop, "Potato");
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_model() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let health: HealthResponse = json(app.oneshot(get("/health")).await?).await?;
        assert_eq!(health.status, "healthy");
        assert!(health.model_loaded);
        assert_eq!(health.num_classes, 4);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() -> anyhow::Result<()> {
        let app = router(state(loaded(), None));
        let response = app.oneshot(get("/nope")).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = json(response).await?;
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "error": "Endpoint not found" })
        );
        Ok(())
    }
}
