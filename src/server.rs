//! HTTP service: multipart analysis, chat passthrough and health.
//!
//! | Route            | Body                          | Response |
//! |------------------|-------------------------------|----------|
//! | `POST /api/analyze` | multipart, `file` + text fields | analysis response body |
//! | `POST /api/chat`    | raw chat-completion JSON      | upstream JSON verbatim |
//! | `GET /health`       | -                             | `{status, model}` |
//!
//! Errors are `{"error": "..."}` with the status chosen by
//! [`PipelineError::class`]. An unparsable aggregation also carries `raw`.

use crate::analyze::{analyze, passthrough};
use crate::config::PipelineConfig;
use crate::error::{ErrorClass, PipelineError};
use crate::pipeline::input::SourcePdf;
use crate::request::AnalysisForm;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;

type AppState = Arc<PipelineConfig>;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    /// The request body could not be read as multipart or JSON.
    BadBody(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadBody(e.body_text())
    }
}

/// HTTP status for an error class.
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Environment | ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorClass::Upstream | ErrorClass::UnparsableAggregation => StatusCode::BAD_GATEWAY,
        ErrorClass::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadBody(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Pipeline(e) => {
                let status = status_for(e.class());
                let mut body = json!({ "error": e.to_string() });
                if let Some(raw) = e.raw_output() {
                    body["raw"] = json!(raw);
                }
                (status, body)
            }
        };
        if status.is_server_error() {
            tracing::error!("{} {}", status, body["error"]);
        } else {
            tracing::warn!("{} {}", status, body["error"]);
        }
        (status, Json(body)).into_response()
    }
}

/// Build the service router.
pub fn router(config: Arc<PipelineConfig>) -> Router {
    let limit = config.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze_upload))
        .route("/api/chat", post(chat))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(config)
}

/// Bind `addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: PipelineConfig, addr: SocketAddr) -> std::io::Result<()> {
    let model = config.model.clone();
    let app = router(Arc::new(config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("pdfvision listening on {} (model {})", listener.local_addr()?, model);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn health(State(config): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "model": config.model }))
}

async fn analyze_upload(
    State(config): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = AnalysisForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            tracing::debug!(
                "Received file field: filename={:?}, content_type={:?}",
                field.file_name(),
                field.content_type()
            );
            let data = field.bytes().await?;
            form.pdf = Some(SourcePdf::persist_upload(&config.work_dir, &data).await?);
        } else {
            let value = field.text().await?;
            if !form.set_field(&name, value) {
                tracing::debug!("Ignoring unknown form field '{}'", name);
            }
        }
    }

    let output = analyze(form, &config).await?;
    Ok(Json(output.to_response(config.debug)))
}

async fn chat(
    State(config): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadBody(e.body_text()))?;
    let reply = passthrough(body, &config).await?;
    Ok(Json(reply))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
