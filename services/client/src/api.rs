//! Document Ingestion
//!
//! HTTP side of the backend: PDF uploads, typed questions (`/chat`) and the
//! small maintenance endpoints (`/health`, `/stats`, `/clear`). Upload results
//! are always reported as an [`UploadOutcome`] the user can read; the other
//! calls return typed bodies or an [`ApiError`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{info, warn};

/// Reported when the backend rejects an upload without saying why.
pub const UPLOAD_FAILED: &str = "Upload failed";
/// Reported when the backend could not be reached or answered with garbage.
pub const UPLOAD_UNREACHABLE: &str = "Failed to upload file. Please try again.";
/// Files above this size are probably going to be refused by the backend.
pub const LARGE_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
/// Upper bound on any single backend request, including PDF processing.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Backend returned {status}: {detail}")]
    Rejected { status: u16, detail: String },
}

/// What the backend reported about an indexed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub filename: String,
    pub pages: u64,
    pub chunks: u64,
}

/// What the user is told after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    /// Present only on success.
    pub document: Option<IndexedDocument>,
}

impl UploadOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            document: None,
        }
    }
}

/// Body of a successful `POST /upload`.
#[derive(Debug, Deserialize)]
struct UploadReceipt {
    filename: Option<String>,
    #[serde(default)]
    pages: u64,
    #[serde(default)]
    chunks: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComponentHealth {
    pub vector_store: bool,
    pub ai_agent: bool,
    pub pdf_processor: bool,
}

/// Body of `GET /health`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: Option<String>,
    pub components: ComponentHealth,
}

/// Body of `GET /stats`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BackendStats {
    pub active_connections: u64,
    pub documents_count: u64,
    pub timestamp: Option<String>,
}

/// Body of `POST /chat`.
#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    message: &'a str,
    conversation_id: Option<&'a str>,
}

/// Answer to a typed question.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
    pub timestamp: Option<String>,
}

/// Body of `DELETE /clear`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClearReceipt {
    pub success: bool,
    pub message: String,
}

/// The backend's document service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentIngest: Send + Sync {
    /// Uploads one PDF. Never fails; problems are described in the outcome.
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> UploadOutcome;

    /// Asks a question over plain HTTP, continuing `conversation_id` if given.
    async fn ask(
        &self,
        message: &str,
        conversation_id: Option<String>,
    ) -> Result<ChatReply, ApiError>;

    async fn health(&self) -> Result<HealthReport, ApiError>;

    async fn stats(&self) -> Result<BackendStats, ApiError>;

    /// Removes every indexed document.
    async fn clear_documents(&self) -> Result<ClearReceipt, ApiError>;
}

/// Reads `path` from disk and uploads it through `ingest`.
///
/// Names without a `.pdf` extension and files over [`LARGE_UPLOAD_BYTES`]
/// are sent anyway; the backend decides whether to accept them.
pub async fn upload_file(
    ingest: &dyn DocumentIngest,
    path: &Path,
) -> Result<UploadOutcome, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let is_pdf = Path::new(&filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        warn!(%filename, "File does not look like a PDF; the backend may reject it");
    }
    if bytes.len() as u64 > LARGE_UPLOAD_BYTES {
        warn!(%filename, bytes = bytes.len(), "File is larger than 10MB; the backend may reject it");
    }

    Ok(ingest.upload(&filename, bytes).await)
}

/// Client for the backend's HTTP endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    /// Every request, uploads included, is abandoned after `timeout`.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[async_trait]
impl DocumentIngest for ApiClient {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> UploadOutcome {
        info!(%filename, bytes = bytes.len(), "Uploading document");
        let part = match Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
        {
            Ok(part) => part,
            Err(e) => {
                warn!(error = %e, "Failed to build upload form");
                return UploadOutcome::failed(UPLOAD_UNREACHABLE);
            }
        };
        let form = Form::new().part("file", part);

        let response = match self.http.post(self.url("/upload")).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Upload request failed");
                return UploadOutcome::failed(UPLOAD_UNREACHABLE);
            }
        };
        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, %status, "Upload response was not JSON");
                return UploadOutcome::failed(UPLOAD_UNREACHABLE);
            }
        };

        if !status.is_success() {
            let message = detail_of(&body).unwrap_or_else(|| UPLOAD_FAILED.to_string());
            warn!(%status, %message, "Backend rejected upload");
            return UploadOutcome::failed(message);
        }

        match serde_json::from_value::<UploadReceipt>(body) {
            Ok(receipt) => {
                let document = IndexedDocument {
                    filename: receipt.filename.unwrap_or_else(|| filename.to_string()),
                    pages: receipt.pages,
                    chunks: receipt.chunks,
                };
                info!(filename = %document.filename, pages = document.pages, chunks = document.chunks, "Upload processed");
                UploadOutcome {
                    success: true,
                    message: format!(
                        "Successfully processed {} ({} pages, {} chunks)",
                        document.filename, document.pages, document.chunks
                    ),
                    document: Some(document),
                }
            }
            Err(e) => {
                warn!(error = %e, "Unexpected upload response shape");
                UploadOutcome::failed(UPLOAD_UNREACHABLE)
            }
        }
    }

    async fn ask(
        &self,
        message: &str,
        conversation_id: Option<String>,
    ) -> Result<ChatReply, ApiError> {
        info!(chars = message.len(), ?conversation_id, "Asking over HTTP");
        let request = ChatRequest {
            message,
            conversation_id: conversation_id.as_deref(),
        };
        let response = self.http.post(self.url("/chat")).json(&request).send().await?;
        read_json(response).await
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        let response = self.http.get(self.url("/health")).send().await?;
        read_json(response).await
    }

    async fn stats(&self) -> Result<BackendStats, ApiError> {
        let response = self.http.get(self.url("/stats")).send().await?;
        read_json(response).await
    }

    async fn clear_documents(&self) -> Result<ClearReceipt, ApiError> {
        let response = self.http.delete(self.url("/clear")).send().await?;
        read_json(response).await
    }
}

/// The backend's `detail` field as display text. Strings are taken verbatim.
fn detail_of(body: &Value) -> Option<String> {
    match body.get("detail")? {
        Value::Null => None,
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let detail = match response.json::<Value>().await {
        Ok(body) => detail_of(&body),
        Err(_) => None,
    }
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(ApiError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detail_is_taken_verbatim() {
        let body = json!({ "detail": "Only PDF files are allowed" });
        assert_eq!(detail_of(&body).as_deref(), Some("Only PDF files are allowed"));
    }

    #[test]
    fn test_missing_or_null_detail() {
        assert_eq!(detail_of(&json!({})), None);
        assert_eq!(detail_of(&json!({ "detail": null })), None);
        assert_eq!(detail_of(&json!(["not", "an", "object"])), None);
    }

    #[test]
    fn test_structured_detail_is_rendered_as_json() {
        let body = json!({ "detail": [{ "loc": ["body", "file"], "msg": "field required" }] });
        let detail = detail_of(&body).unwrap();
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.url("/upload"), "http://localhost:8000/upload");
    }

    #[test]
    fn test_receipt_tolerates_missing_counts() {
        let receipt: UploadReceipt =
            serde_json::from_value(json!({ "success": true, "filename": "a.pdf" })).unwrap();
        assert_eq!(receipt.filename.as_deref(), Some("a.pdf"));
        assert_eq!(receipt.pages, 0);
        assert_eq!(receipt.chunks, 0);
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            message: "what is on page two?",
            conversation_id: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "message": "what is on page two?", "conversation_id": null })
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Rejected {
            status: 500,
            detail: "Error clearing vector store: disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend returned 500: Error clearing vector store: disk full"
        );
    }

    #[tokio::test]
    async fn test_upload_file_reports_missing_file() {
        // Nothing is uploaded when the file cannot be read.
        let client = ApiClient::new("http://127.0.0.1:9", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let result = upload_file(&client, Path::new("/definitely/not/here.pdf")).await;
        assert!(matches!(result, Err(ApiError::Io { .. })));
    }
}
