use super::error::TransportError;
use super::registry::UploadBatch;
use super::schema::{ErrorBody, HealthStatus, SessionData, ServerVerdict, UploadResponse};
use super::transport::{Backend, ProgressSink, ProgressTracker};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bytes handed to the HTTP body per progress tick.
const CHUNK_SIZE: usize = 64 * 1024;

const CONNECTIVITY_MESSAGE: &str = "Network error. Please check your connection.";
const UPLOAD_CONNECTIVITY_MESSAGE: &str = "Network error during upload";
const PARSE_FAILURE_MESSAGE: &str = "Failed to parse response";

/// HTTP client for the analysis backend.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<HealthStatus, TransportError> {
        self.fetch_json(self.http.get(self.url("/health"))).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionData, TransportError> {
        let path = format!("/api/session/{}", urlencoding::encode(session_id));
        self.fetch_json(self.http.get(self.url(&path))).await
    }

    pub async fn file_analysis(&self, file_id: &str) -> Result<ServerVerdict, TransportError> {
        let path = format!("/api/analysis/file/{}", urlencoding::encode(file_id));
        self.fetch_json(self.http.get(self.url(&path))).await
    }

    /// Send a JSON request and decode a JSON response.
    async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        let response = request.send().await.map_err(|e| connectivity(CONNECTIVITY_MESSAGE, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| connectivity(CONNECTIVITY_MESSAGE, e))?;

        if !status.is_success() {
            let detail = ErrorBody::parse(&body);
            let message = detail.clone().unwrap_or_else(|| {
                format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
            });
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
                detail,
            });
        }

        parse_body(status, &body)
    }

    async fn send_upload(
        &self,
        session_id: &str,
        batch: &UploadBatch,
        progress: ProgressSink,
    ) -> Result<Vec<ServerVerdict>, TransportError> {
        let tracker = Arc::new(Mutex::new(ProgressTracker::new(batch.total_bytes(), progress)));

        let mut form = Form::new().text("session_id", session_id.to_string());
        for entry in &batch.entries {
            let part = Part::stream_with_length(
                tracked_body(entry.file.data.clone(), Arc::clone(&tracker)),
                entry.file.size(),
            )
            .file_name(entry.file.name.clone())
            .mime_str(&entry.file.mime_type)
            .map_err(|e| TransportError::Malformed {
                status: 0,
                message: format!("Invalid content type for {}", entry.file.name),
                detail: Some(e.to_string()),
            })?;
            form = form.part("files", part);
        }

        info!(files = batch.len(), bytes = batch.total_bytes(), "Uploading batch");
        let response = self
            .http
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| connectivity(UPLOAD_CONNECTIVITY_MESSAGE, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| connectivity(UPLOAD_CONNECTIVITY_MESSAGE, e))?;

        if !status.is_success() {
            let detail = ErrorBody::parse(&body);
            let message = detail
                .clone()
                .unwrap_or_else(|| format!("Upload failed with status {}", status.as_u16()));
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
                detail,
            });
        }

        let parsed: UploadResponse = parse_body(status, &body)?;
        tracker.lock().finish();
        debug!(verdicts = parsed.files.len(), message = %parsed.message, "Upload accepted");
        Ok(parsed.files)
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn upload(
        &self,
        session_id: &str,
        batch: &UploadBatch,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Vec<ServerVerdict>, TransportError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.send_upload(session_id, batch, progress) => result,
        }
    }

    async fn create_session(&self, session_id: &str) -> Result<SessionData, TransportError> {
        let request = self
            .http
            .post(self.url("/api/session"))
            .json(&serde_json::json!({ "session_id": session_id }));
        self.fetch_json(request).await
    }

    async fn analysis_results(&self, session_id: &str) -> Result<Vec<ServerVerdict>, TransportError> {
        let path = format!("/api/analysis/{}", urlencoding::encode(session_id));
        self.fetch_json(self.http.get(self.url(&path))).await
    }
}

/// Body that reports each chunk to the tracker as the HTTP stack pulls it.
fn tracked_body(data: Vec<u8>, tracker: Arc<Mutex<ProgressTracker>>) -> reqwest::Body {
    let chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        tracker.lock().advance(chunk.len() as u64);
        Ok::<_, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(stream)
}

fn connectivity(message: &str, e: reqwest::Error) -> TransportError {
    TransportError::Connectivity {
        message: message.to_string(),
        detail: Some(e.to_string()),
    }
}

fn parse_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, TransportError> {
    serde_json::from_str(body).map_err(|e| TransportError::Malformed {
        status: status.as_u16(),
        message: PARSE_FAILURE_MESSAGE.to_string(),
        detail: Some(e.to_string()),
    })
}
