use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use boleta_core::ReceiptResponse;
use boleta_ocr::{OcrBackend, PipelineError, ReceiptPipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const UNDECODABLE_MESSAGE: &str = "No pude abrir la imagen. Usa jpg/png/tif/webp.";
const UPLOAD_FIELD: &str = "file";

pub type SharedPipeline = Arc<ReceiptPipeline<Box<dyn OcrBackend>>>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SharedPipeline,
    /// Wall-clock budget for one receipt; slower runs are abandoned.
    pub timeout: Option<Duration>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ocr", post(ocr_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Accepts one multipart upload in the `file` field and returns the
/// extracted fields together with the recognized text.
async fn ocr_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let (filename, data) = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(UPLOAD_FIELD) => {
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => break (filename, bytes),
                    Err(e) => {
                        warn!(error = %e, "failed to read upload");
                        return error_response(e.status(), e.body_text());
                    }
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Falta el campo '{UPLOAD_FIELD}' con la imagen."),
                );
            }
            Err(e) => {
                warn!(error = %e, "malformed multipart request");
                return error_response(e.status(), e.body_text());
            }
        }
    };

    info!(%filename, bytes = data.len(), "receipt upload received");

    let pipeline = Arc::clone(&state.pipeline);
    let job = tokio::task::spawn_blocking(move || {
        let result = pipeline.process_bytes(&filename, &data);
        (filename, result)
    });

    let joined = match state.timeout {
        Some(budget) => match tokio::time::timeout(budget, job).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "receipt processing timed out");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "El procesamiento de la imagen excedió el tiempo límite.",
                );
            }
        },
        None => job.await,
    };

    match joined {
        Ok((_, Ok(record))) => (StatusCode::OK, Json(ReceiptResponse::from(record))).into_response(),
        Ok((filename, Err(e))) => pipeline_error_response(&filename, e),
        Err(e) => {
            error!(error = %e, "receipt worker panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error interno al procesar la imagen.")
        }
    }
}

fn pipeline_error_response(filename: &str, err: PipelineError) -> Response {
    if err.is_client_error() {
        return error_response(StatusCode::BAD_REQUEST, UNDECODABLE_MESSAGE);
    }
    error!(%filename, error = %err, "receipt processing failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
