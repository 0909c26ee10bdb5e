use crate::config::{ApiConfig, IntakeConfig};
use crate::image_store::ImageId;
use crate::intake::{IntakeError, IntakeService};
use crate::rotation::{DisplayImage, EngineError, RotationEngine};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RotationEngine>,
    pub intake: Arc<IntakeService>,
}

/// Image in the display batch response
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub id: ImageId,
    pub file_url: String,
    pub is_new: bool,
    /// Formatted `YYYY-MM-DD HH:MM:SS`
    pub created_at: String,
}

impl From<DisplayImage> for ImageResponse {
    fn from(image: DisplayImage) -> Self {
        Self {
            id: image.id,
            file_url: image.file_url,
            is_new: image.is_new,
            created_at: image.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Acknowledgment request body
#[derive(Debug, Deserialize)]
pub struct MarkDisplayedRequest {
    pub id: ImageId,
}

/// Query parameters for intake
#[derive(Debug, Deserialize)]
pub struct IntakeParams {
    /// Suggested name for the blob key
    pub name: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, api: &ApiConfig, intake: &IntakeConfig) -> Router {
    let cors = if api.cors_enabled {
        if api.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = api
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/images", get(list_images).fallback(method_not_allowed))
        .route(
            "/images/displayed",
            post(mark_displayed).fallback(method_not_allowed),
        )
        .route("/intake", post(intake_image).fallback(method_not_allowed))
        .route("/health", get(health_check).fallback(method_not_allowed))
        // Everything else is the slideshow frontend
        .fallback_service(ServeDir::new(&api.static_dir))
        .layer(DefaultBodyLimit::max(intake.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Shared JSON error body
fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn method_not_allowed() -> Response {
    error_body(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Next display batch
#[instrument(skip(state))]
async fn list_images(State(state): State<AppState>) -> Response {
    match state.engine.next_batch().await {
        Ok(batch) => {
            let images: Vec<ImageResponse> = batch.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(images)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to compute next display batch");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "database error")
        }
    }
}

/// Acknowledge one image as displayed
#[instrument(skip(state, body))]
async fn mark_displayed(
    State(state): State<AppState>,
    body: Result<Json<MarkDisplayedRequest>, JsonRejection>,
) -> Response {
    // Malformed bodies never touch the store
    let Ok(Json(request)) = body else {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    };

    match state.engine.acknowledge(request.id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok" })),
        )
            .into_response(),
        Err(EngineError::RecordNotFound(id)) => {
            info!(id, "Acknowledgment for unknown image id");
            error_body(StatusCode::NOT_FOUND, "image not found")
        }
        Err(e) => {
            error!(error = %e, id = request.id, "Failed to acknowledge image");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "database error")
        }
    }
}

/// Intake one image blob
#[instrument(skip(state, headers, body))]
async fn intake_image(
    State(state): State<AppState>,
    Query(params): Query<IntakeParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !content_type.starts_with("image/") {
        return error_body(StatusCode::BAD_REQUEST, "unsupported content type");
    }

    if body.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "invalid request body");
    }

    match state
        .intake
        .intake(content_type, body.to_vec(), params.name.as_deref())
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "id": record.id })),
        )
            .into_response(),
        Err(e @ IntakeError::Upload(_)) => {
            error!(error = %e, "Image upload failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "upload failed")
        }
        Err(e @ IntakeError::OrphanedBlob { .. }) => {
            error!(error = %e, "Image record creation failed after upload");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "record creation failed")
        }
    }
}

/// Start the API server
pub async fn start_api_server(
    state: AppState,
    api: &ApiConfig,
    intake: &IntakeConfig,
) -> Result<()> {
    let router = create_router(state, api, intake);
    let addr = format!("{}:{}", api.host, api.port);

    info!(address = %addr, "Starting rotation API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{BlobStore, MockBlobStore, StoredBlob};
    use crate::image_store::{ImageRecordStore, RotationState};
    use crate::test_support::{record, t0, FailingStore, MemoryStore};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_api_config() -> ApiConfig {
        ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_enabled: false,
            cors_origins: vec![],
            static_dir: "static".to_string(),
        }
    }

    fn test_intake_config() -> IntakeConfig {
        IntakeConfig {
            max_upload_bytes: 1024 * 1024,
            blob_prefix: "images".to_string(),
        }
    }

    fn presigning_blobs() -> Arc<MockBlobStore> {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_presign_get()
            .returning(|key| Ok(format!("https://blobs.test/{key}?sig=deadbeef")));
        blobs.expect_put().returning(|key, _content_type, _data| {
            Ok(StoredBlob {
                key: key.to_string(),
                uploaded_at: t0(),
            })
        });
        Arc::new(blobs)
    }

    fn app(store: Arc<dyn ImageRecordStore>, blobs: Arc<dyn BlobStore>) -> Router {
        let engine = Arc::new(RotationEngine::new(store.clone(), blobs.clone()));
        let intake = Arc::new(IntakeService::new(store, blobs, "images".to_string()));
        create_router(
            AppState { engine, intake },
            &test_api_config(),
            &test_intake_config(),
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_images_returns_display_batch() {
        let store = Arc::new(MemoryStore::seeded(vec![record(
            1,
            0,
            RotationState::Pending,
        )]));
        let app = app(store, presigning_blobs());

        let response = app
            .oneshot(Request::get("/images").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json[0]["id"], 1);
        assert_eq!(json[0]["is_new"], false);
        assert_eq!(json[0]["created_at"], "2026-08-01 12:00:00");
        assert!(json[0]["file_url"]
            .as_str()
            .unwrap()
            .starts_with("https://blobs.test/images/"));
    }

    #[tokio::test]
    async fn test_get_images_rejects_other_methods() {
        let app = app(Arc::new(MemoryStore::default()), presigning_blobs());

        let response = app
            .oneshot(Request::post("/images").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_body(response).await["error"], "method not allowed");
    }

    #[tokio::test]
    async fn test_get_images_store_failure_is_opaque() {
        let app = app(Arc::new(FailingStore), presigning_blobs());

        let response = app
            .oneshot(Request::get("/images").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "database error");
    }

    #[tokio::test]
    async fn test_mark_displayed_acknowledges_image() {
        let store = Arc::new(MemoryStore::seeded(vec![record(
            1,
            0,
            RotationState::Fresh,
        )]));
        let app = app(store.clone(), presigning_blobs());

        let response = app
            .oneshot(
                Request::post("/images/displayed")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"id": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
        assert_eq!(
            store.snapshot()[0].rotation_state(),
            RotationState::Shown
        );
    }

    #[tokio::test]
    async fn test_mark_displayed_malformed_body() {
        let app = app(Arc::new(MemoryStore::default()), presigning_blobs());

        let response = app
            .oneshot(
                Request::post("/images/displayed")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid request body");
    }

    #[tokio::test]
    async fn test_mark_displayed_unknown_id() {
        let app = app(Arc::new(MemoryStore::default()), presigning_blobs());

        let response = app
            .oneshot(
                Request::post("/images/displayed")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"id": 42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "image not found");
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app(Arc::new(MemoryStore::default()), presigning_blobs());

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");

        let response = app
            .oneshot(Request::post("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_intake_accepts_image_upload() {
        let store = Arc::new(MemoryStore::default());
        let app = app(store.clone(), presigning_blobs());

        let response = app
            .oneshot(
                Request::post("/intake?name=sunset")
                    .header(header::CONTENT_TYPE, "image/jpeg")
                    .body(Body::from(vec![0xff, 0xd8, 0xff]))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["id"], 1);

        let rows = store.snapshot();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].blob_key.contains("sunset"));
    }

    #[tokio::test]
    async fn test_intake_rejects_non_image_content() {
        let store = Arc::new(MemoryStore::default());
        let app = app(store.clone(), presigning_blobs());

        let response = app
            .oneshot(
                Request::post("/intake")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.snapshot().is_empty());
    }
}
