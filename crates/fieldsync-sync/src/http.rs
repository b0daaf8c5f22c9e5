//! # HTTP Remote Store
//!
//! `reqwest` adapter implementing the three network capabilities against
//! the remote document store's REST surface.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  upload    PUT  {base}/files/{collection}/{documentId}/{field}          │
//! │                 body = file bytes, Content-Type from the extension     │
//! │                                                                         │
//! │  create    POST {base}/collections/{entityType}/documents              │
//! │                 { "clientId", "deviceId", "data" }                     │
//! │                 Idempotency-Key: {clientId}                            │
//! │                                                                         │
//! │  download  GET  {url}   (relative URLs resolve under {base}/)          │
//! │                                                                         │
//! │  2xx → ok    408 / 429 / 5xx → transient    other 4xx → permanent      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use fieldsync_core::{mime, EntityType, RemoteTarget};
use fieldsync_db::DbError;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{
    DocumentDownloader, DownloadMeta, DownloadProgress, RemoteWriter, UploadTransport,
};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    client_id: &'a str,
    device_id: &'a str,
    data: &'a Value,
}

/// Remote store client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    device_id: String,
    request_timeout: Duration,
}

impl HttpRemoteStore {
    /// Creates a client.
    ///
    /// ## Arguments
    /// * `base_url` - Root of the remote API, e.g. `https://sync.example.com/api`
    /// * `api_key` - Sent as a Bearer token when present
    /// * `device_id` - Sent with every remote create
    /// * `request_timeout` - Deadline for uploads and creates; downloads are
    ///   bounded by the document cache instead
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        device_id: impl Into<String>,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpRemoteStore {
            client,
            base_url,
            api_key: api_key.filter(|key| !key.is_empty()),
            device_id: device_id.into(),
            request_timeout,
        })
    }

    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Self::new(
            &config.remote.base_url,
            config.remote.api_key.clone(),
            config.device.id.clone(),
            Duration::from_secs(config.remote.request_timeout_secs),
        )
    }

    /// `{base}/{segments...}` with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Absolute URLs pass through; anything else resolves under the base.
    fn resolve(&self, url: &str) -> SyncResult<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut base = self.base_url.clone();
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                Ok(base.join(url.trim_start_matches('/'))?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> SyncResult<RequestBuilder> {
        match &self.api_key {
            Some(key) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| SyncError::InvalidConfig(format!("invalid API key: {}", e)))?;
                Ok(request.header(AUTHORIZATION, value))
            }
            None => Ok(request),
        }
    }
}

/// Passes 2xx responses through and classifies the rest.
async fn check(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };

    Err(SyncError::from_status(status.as_u16(), message))
}

fn sink_error(err: std::io::Error) -> SyncError {
    SyncError::LocalStorage(DbError::Internal(format!("failed to write download: {}", err)))
}

#[async_trait]
impl UploadTransport for HttpRemoteStore {
    async fn upload(&self, local_path: &Path, target: &RemoteTarget) -> SyncResult<()> {
        let body = tokio::fs::read(local_path)
            .await
            .map_err(|e| SyncError::LocalStorage(DbError::io(local_path, e)))?;

        let content_type = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(mime::from_file_name)
            .unwrap_or(mime::OCTET_STREAM);

        let url = self.endpoint(&[
            "files",
            target.collection.as_str(),
            target.document_id.as_str(),
            target.field.as_str(),
        ])?;
        debug!(url = %url, bytes = body.len(), "PUT upload");

        let request = self
            .client
            .put(url)
            .timeout(self.request_timeout)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        let response = self.authorize(request)?.send().await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteWriter for HttpRemoteStore {
    async fn create_remote(
        &self,
        entity_type: EntityType,
        payload: &Value,
        client_id: &str,
    ) -> SyncResult<()> {
        let url = self.endpoint(&["collections", entity_type.as_str(), "documents"])?;
        debug!(url = %url, client_id, "POST create");

        let request = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(IDEMPOTENCY_KEY, client_id)
            .json(&CreateRequest {
                client_id,
                device_id: &self.device_id,
                data: payload,
            });
        let response = self.authorize(request)?.send().await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentDownloader for HttpRemoteStore {
    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> SyncResult<DownloadMeta> {
        let url = self.resolve(url)?;
        debug!(url = %url, "GET download");

        let response = self.authorize(self.client.get(url))?.send().await?;
        let response = check(response).await?;

        let total_bytes = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes_written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await.map_err(sink_error)?;
            bytes_written += chunk.len() as u64;
            progress(DownloadProgress {
                bytes_written,
                total_bytes,
            });
        }
        sink.flush().await.map_err(sink_error)?;

        Ok(DownloadMeta {
            bytes_written,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer, api_key: Option<&str>) -> HttpRemoteStore {
        HttpRemoteStore::new(
            &format!("{}/api", server.uri()),
            api_key.map(str::to_string),
            "device-1",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let store = HttpRemoteStore::new(
            "https://sync.example.com/api/",
            None,
            "d",
            Duration::from_secs(5),
        )
        .unwrap();
        let url = store.endpoint(&["files", "visits", "v 1", "photo"]).unwrap();
        assert_eq!(url.as_str(), "https://sync.example.com/api/files/visits/v%201/photo");
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let store =
            HttpRemoteStore::new("https://sync.example.com/api", None, "d", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            store.resolve("/documents/42/content").unwrap().as_str(),
            "https://sync.example.com/api/documents/42/content"
        );
        assert_eq!(
            store.resolve("https://cdn.example.com/a.pdf").unwrap().as_str(),
            "https://cdn.example.com/a.pdf"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(HttpRemoteStore::new("not a url", None, "d", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_upload_puts_file_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/files/visits/v1/photo"))
            .and(header("content-type", "image/jpeg"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, b"jpeg-bytes").unwrap();

        let store = store_for(&server, Some("secret"));
        store
            .upload(&file, &RemoteTarget::new("visits", "v1", "photo"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_local_error() {
        let server = MockServer::start().await;
        let store = store_for(&server, None);
        let err = store
            .upload(
                Path::new("/nonexistent/photo.jpg"),
                &RemoteTarget::new("visits", "v1", "photo"),
            )
            .await
            .unwrap_err();
        assert!(err.is_local_storage());
    }

    #[tokio::test]
    async fn test_create_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/expense/documents"))
            .and(header("idempotency-key", "item-1"))
            .and(body_json(json!({
                "clientId": "item-1",
                "deviceId": "device-1",
                "data": { "amount": 500 }
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        store
            .create_remote(EntityType::Expense, &json!({ "amount": 500 }), "item-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/visit/documents"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/collections/sheets/documents"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad sheet"))
            .mount(&server)
            .await;

        let store = store_for(&server, None);

        let err = store
            .create_remote(EntityType::Visit, &json!({}), "a")
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let err = store
            .create_remote(EntityType::Sheets, &json!({}), "b")
            .await
            .unwrap_err();
        match err {
            SyncError::PermanentRemote { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad sheet");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_streams_with_progress() {
        let server = MockServer::start().await;
        let body = vec![5u8; 100_000];
        Mock::given(method("GET"))
            .and(path("/api/documents/42/content"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body.clone())
                    .insert_header("content-type", "application/octet-stream"),
            )
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        let mut sink: Vec<u8> = Vec::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let meta = store
            .download("documents/42/content", &mut sink, &move |p: DownloadProgress| {
                recorder.lock().unwrap().push(p)
            })
            .await
            .unwrap();

        assert_eq!(sink, body);
        assert_eq!(meta.bytes_written, 100_000);
        assert_eq!(meta.content_type.as_deref(), Some("application/octet-stream"));

        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last.bytes_written, 100_000);
        assert_eq!(last.total_bytes, Some(100_000));
    }

    #[tokio::test]
    async fn test_download_not_found_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = store_for(&server, None);
        let mut sink: Vec<u8> = Vec::new();
        let err = store
            .download("/missing.pdf", &mut sink, &|_: DownloadProgress| {})
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(sink.is_empty());
    }
}
