//! HTTP surface of the yt-dlp gateway
//!
//! Three JSON endpoints (health, info, download) plus Prometheus metrics.
//! Handlers talk to the extraction binary only through the `MediaResolver`
//! trait, so tests can swap in a mock.

use axum::{
    body::Body,
    extract::rejection::JsonRejection,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tempfile::TempDir;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::auth::AuthConfig;
use crate::metrics::{record_bytes_served, MetricsGuard};
use crate::resolver::{MediaMetadata, MediaResolver, ResolverError, RetrieveOptions};

/// Application state shared across handlers
pub struct AppState {
    pub auth: AuthConfig,
    pub resolver: Arc<dyn MediaResolver>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Build the service router. Middleware layers are attached by the caller.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/info", post(info_handler))
        .route("/download", post(download_handler))
        .with_state(state)
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub features: Vec<&'static str>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_convert_wav")]
    pub convert_wav: bool,
}

fn default_format() -> String {
    "bestaudio".to_string()
}

fn default_convert_wav() -> bool {
    true
}

/// Fixed metadata projection returned by `/info`
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    pub formats_available: usize,
}

impl From<MediaMetadata> for InfoResponse {
    fn from(meta: MediaMetadata) -> Self {
        Self {
            formats_available: meta.formats_available(),
            id: meta.id,
            title: meta.title,
            duration: meta.duration,
            uploader: meta.uploader,
            view_count: meta.view_count,
            upload_date: meta.upload_date,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            suggestion: None,
        }),
    )
        .into_response()
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "ytdlp-gateway",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        features: vec!["audio_download", "wav_conversion", "speech_ready"],
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let metrics = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
        .into_response()
}

async fn info_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<InfoRequest>, JsonRejection>,
) -> Response {
    if !state.auth.authorize(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API key");
    }

    let Ok(Json(request)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "URL required in JSON body");
    };

    match state.resolver.resolve_metadata(&request.url).await {
        Ok(metadata) => (StatusCode::OK, Json(InfoResponse::from(metadata))).into_response(),
        Err(e) => {
            error!("Info extraction error: {}", e.detail());
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get info: {}", e.detail()),
            )
        }
    }
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    if !state.auth.authorize(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API key");
    }

    let Ok(Json(request)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "URL required in JSON body");
    };

    let guard = MetricsGuard::new();
    info!("Processing download request for: {}", request.url);
    info!("Convert to WAV: {}", request.convert_wav);

    match run_download(&state, &request).await {
        Ok(response) => {
            guard.success();
            response
        }
        Err(failure) => {
            guard.error();
            failure_response(failure)
        }
    }
}

enum DownloadFailure {
    Resolver(ResolverError),
    NoFiles,
    Internal(std::io::Error),
}

fn failure_response(failure: DownloadFailure) -> Response {
    match failure {
        DownloadFailure::Resolver(ResolverError::BotDetected(detail)) => {
            warn!("yt-dlp bot detection: {detail}");
            (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse {
                    error: "YouTube bot detection triggered".to_string(),
                    suggestion: Some("Try again later or use a different method".to_string()),
                }),
            )
                .into_response()
        }
        DownloadFailure::Resolver(ResolverError::Unavailable(detail)) => {
            warn!("yt-dlp unavailable content: {detail}");
            error_response(StatusCode::NOT_FOUND, "Video is private or unavailable")
        }
        DownloadFailure::Resolver(ResolverError::Extraction(detail)) => {
            error!("yt-dlp download error: {detail}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Download failed: {detail}"),
            )
        }
        DownloadFailure::Resolver(ResolverError::Io(e)) => {
            error!("yt-dlp invocation failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        DownloadFailure::NoFiles => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Download failed - no files created",
        ),
        DownloadFailure::Internal(e) => {
            error!("Unexpected error: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn run_download(
    state: &AppState,
    request: &DownloadRequest,
) -> Result<Response, DownloadFailure> {
    let temp_dir = tempfile::tempdir().map_err(DownloadFailure::Internal)?;

    // Metadata first, without fetching bytes. Only the identifier feeds the
    // attachment filename; nothing else reaches the caller.
    let metadata = state
        .resolver
        .resolve_metadata(&request.url)
        .await
        .map_err(DownloadFailure::Resolver)?;
    let media_id = metadata.id.clone().unwrap_or_else(|| "unknown".to_string());
    info!(
        "Video info: {} ({}s)",
        metadata.title.as_deref().unwrap_or("Unknown"),
        metadata.duration.unwrap_or(0.0)
    );

    let options = RetrieveOptions {
        format: request.format.clone(),
        convert_wav: request.convert_wav,
        output_dir: temp_dir.path().to_path_buf(),
    };
    let files = state
        .resolver
        .retrieve(&request.url, &options)
        .await
        .map_err(DownloadFailure::Resolver)?;

    let artifact = select_artifact(&files, request.convert_wav)
        .ok_or(DownloadFailure::NoFiles)?
        .clone();

    serve_artifact(temp_dir, &artifact, &media_id)
        .await
        .map_err(DownloadFailure::Internal)
}

/// Pick the artifact to return: the converted WAV when conversion was
/// requested, else the lexicographically first file.
fn select_artifact(files: &[PathBuf], convert_wav: bool) -> Option<&PathBuf> {
    if convert_wav {
        if let Some(wav) = files
            .iter()
            .find(|p| p.extension().is_some_and(|e| e == "wav"))
        {
            return Some(wav);
        }
    }
    files.first()
}

fn content_type_for(extension: &str) -> &'static str {
    if extension == "wav" {
        "audio/wav"
    } else {
        "audio/webm"
    }
}

async fn serve_artifact(
    temp_dir: TempDir,
    path: &Path,
    media_id: &str,
) -> Result<Response, std::io::Error> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("webm")
        .to_string();
    let file_size = tokio::fs::metadata(path).await?.len();
    let file = tokio::fs::File::open(path).await?;

    info!("Download successful: {} bytes, format: {}", file_size, extension);
    record_bytes_served(file_size);

    let headers = [
        (
            header::CONTENT_TYPE,
            content_type_for(&extension).to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{media_id}.{extension}\""),
        ),
    ];

    let stream = ArtifactStream::new(temp_dir, file);
    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}

/// Wrapper that keeps the request's temp directory alive while streaming.
/// The directory (and the artifact inside it) is removed when the stream is
/// dropped, i.e. after the response body has fully been sent.
struct ArtifactStream {
    _temp_dir: TempDir,
    stream: ReaderStream<tokio::fs::File>,
}

impl ArtifactStream {
    fn new(temp_dir: TempDir, file: tokio::fs::File) -> Self {
        Self {
            _temp_dir: temp_dir,
            stream: ReaderStream::new(file),
        }
    }
}

impl Stream for ArtifactStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}
