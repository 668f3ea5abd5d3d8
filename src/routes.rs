use std::{any::Any, path::Path, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as UrlPath, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyHeader, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    error::{ApiError, PipelineError, UNEXPECTED_ERROR_MESSAGE},
    pipeline::Pipeline,
};

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Debug, Deserialize)]
struct ConvertRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConvertResponse {
    download_url: String,
    title: String,
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    status: String,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/convert", post(convert))
        .route("/download/{filename}", get(download))
        .route("/cleanup", get(cleanup))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http());

    match build_cors_layer(allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn build_cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }

    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(AnyHeader)
            .expose_headers([CONTENT_DISPOSITION]),
    )
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!("Request handler panicked: {detail}");
    ApiError::internal(UNEXPECTED_ERROR_MESSAGE).into_response()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let url = match payload {
        Ok(Json(request)) => request.url.unwrap_or_default(),
        Err(rejection) => {
            info!("Rejected convert body: {rejection}");
            String::new()
        }
    };

    let conversion = state.pipeline.run(&url).await?;
    Ok(Json(ConvertResponse {
        download_url: conversion.download_url(),
        title: conversion.title,
    }))
}

async fn download(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    let (path, size) = state.pipeline.storage().locate(&filename).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => PipelineError::FileNotFound(filename.clone()),
            _ => PipelineError::internal("opening stored file", error),
        })?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    Ok((StatusCode::OK, headers, body).into_response())
}

async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = state.pipeline.storage().sweep_expired().await.inspect_err(|error| {
        error!("Cleanup failed: {error}");
    })?;
    Ok(Json(CleanupResponse {
        status: format!("Cleanup completed. Removed {removed} files."),
    }))
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "webm" => "audio/webm",
        "weba" => "audio/webm",
        "ogg" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback_filename(filename),
        urlencoding::encode(filename)
    )
}

fn ascii_fallback_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, time::{Duration, SystemTime}};

    use axum::{body::to_bytes, http::Request};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{config::Config, transcoder::FfmpegTranscoder};

    struct TestApp {
        server: MockServer,
        download: TempDir,
        _scratch: TempDir,
        router: Router,
    }

    async fn test_app() -> TestApp {
        let server = MockServer::start().await;
        let download = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let env = [
            ("RAPIDAPI_KEY", "secret".to_string()),
            ("MEDIA_API_BASE_URL", server.uri()),
            ("DOWNLOAD_DIR", download.path().display().to_string()),
            ("SCRATCH_DIR", scratch.path().display().to_string()),
            ("OUTPUT_FORMAT", "native".to_string()),
        ];
        let config = Config::from_lookup(|name| {
            env.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
        })
        .unwrap();

        // Native mode never reaches the transcoder; the candidates make sure of it.
        let transcoder = Arc::new(FfmpegTranscoder::with_candidates(Vec::new(), Vec::new()));
        let pipeline = Pipeline::new(&config, reqwest::Client::new(), transcoder).unwrap();
        let router = build_router(
            AppState {
                pipeline: Arc::new(pipeline),
            },
            &config.allowed_origins,
        );

        TestApp {
            server,
            download,
            _scratch: scratch,
            router,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn post_convert(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/convert")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn convert_then_download_round_trip() {
        let app = test_app().await;
        Mock::given(method("GET"))
            .and(path("/v2/video/details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "title": "Never Gonna Give You Up",
                "audios": {"items": [{
                    "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"",
                    "extension": "m4a",
                    "size": 11,
                    "sizeText": "11 B",
                    "url": format!("{}/cdn/140", app.server.uri()),
                }]}
            })))
            .mount(&app.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/140"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio-bytes".to_vec()))
            .mount(&app.server)
            .await;

        let (status, _, body) = send(
            &app.router,
            post_convert(r#"{"url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["title"], "Never Gonna Give You Up");
        let download_url = body["download_url"].as_str().unwrap().to_string();
        assert_eq!(download_url, "/download/Never%20Gonna%20Give%20You%20Up.m4a");

        let (status, headers, bytes) = send(&app.router, get(&download_url)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"audio-bytes");
        assert_eq!(headers[CONTENT_TYPE], "audio/mp4");
        assert_eq!(headers[CONTENT_LENGTH], "11");
        let disposition = headers[CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"Never Gonna Give You Up.m4a\""));

        // Files stay available after being downloaded.
        assert!(app.download.path().join("Never Gonna Give You Up.m4a").exists());
    }

    #[tokio::test]
    async fn convert_rejects_missing_and_invalid_urls() {
        let app = test_app().await;

        for body in ["{}", r#"{"url": ""}"#, "not json"] {
            let (status, _, response) = send(&app.router, post_convert(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(json_body(&response)["error"], "No URL provided");
        }

        let (status, _, response) =
            send(&app.router, post_convert(r#"{"url": "https://example.com"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&response)["error"], "Invalid YouTube URL");

        assert!(app.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn convert_maps_upstream_failures() {
        let app = test_app().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "quota exceeded"})))
            .up_to_n_times(1)
            .mount(&app.server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("just a string")))
            .mount(&app.server)
            .await;

        let request = r#"{"url": "https://youtu.be/dQw4w9WgXcQ"}"#;
        let (status, _, response) = send(&app.router, post_convert(request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&response)["error"], "Video service error: quota exceeded");

        let (status, _, response) = send(&app.router, post_convert(request)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(&response)["error"].as_str().unwrap().contains("Invalid response"));
    }

    #[tokio::test]
    async fn download_of_unknown_file_is_404() {
        let app = test_app().await;
        for uri in ["/download/missing.mp3", "/download/..%2Fsecret.mp3"] {
            let (status, _, body) = send(&app.router, get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "uri: {uri}");
            assert_eq!(json_body(&body)["error"], "File not found");
        }
    }

    #[tokio::test]
    async fn cleanup_reports_removed_files() {
        let app = test_app().await;
        let old = app.download.path().join("old.mp3");
        std::fs::write(&old, b"x").unwrap();
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(2 * 3600))
            .unwrap();
        std::fs::write(app.download.path().join("new.mp3"), b"x").unwrap();

        let (status, _, body) = send(&app.router, get("/cleanup")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "Cleanup completed. Removed 1 files.");

        let (_, _, body) = send(&app.router, get("/cleanup")).await;
        assert_eq!(json_body(&body)["status"], "Cleanup completed. Removed 0 files.");
    }

    #[tokio::test]
    async fn index_and_health_respond() {
        let app = test_app().await;
        let (status, headers, _) = send(&app.router, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));

        let (status, _, body) = send(&app.router, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "ok");
    }

    #[test]
    fn content_disposition_has_ascii_fallback() {
        assert_eq!(
            build_content_disposition("Café del Mar.mp3"),
            "attachment; filename=\"Caf_ del Mar.mp3\"; filename*=UTF-8''Caf%C3%A9%20del%20Mar.mp3"
        );
    }
}
