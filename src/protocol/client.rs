use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::transport::{ChunkTransport, TransportError};

use super::error::{ProtocolError, ProtocolResult};
use super::types::{
    ChunkPlan, CompletedAsset, FileDescriptor, PartTarget, UploadContext, UploadedPart,
};

/// The storage backend's multipart-upload surface, as the pipeline
/// sees it: obtain a chunk plan, push part bytes, report bookkeeping,
/// finalize. Implemented over HTTP in production and in memory in
/// tests.
#[async_trait]
pub trait StorageApi: Send + Sync + 'static {
    /// Obtain a chunk plan for a new upload. `total_size` must be
    /// positive; the context identifies the destination project and
    /// category.
    async fn init(
        &self,
        file: &FileDescriptor,
        ctx: &UploadContext,
    ) -> ProtocolResult<ChunkPlan>;

    /// Transfer one part slice to its pre-signed target, returning
    /// the integrity token.
    async fn upload_part(
        &self,
        target: &PartTarget,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> ProtocolResult<String>;

    /// Tell the backend's bookkeeping layer a part landed. Failures
    /// here are retried independently of the transfer having
    /// succeeded, since a missed report can stall completion accounting.
    async fn report_chunk(
        &self,
        upload_id: &str,
        part_number: u32,
        etag: &str,
        bytes: u64,
    ) -> ProtocolResult<()>;

    /// Finalize the multipart object. Callers must hold all
    /// `total_chunks` parts in their ledger before issuing this.
    async fn complete(
        &self,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> ProtocolResult<CompletedAsset>;
}

// Wire types. Field names are camelCase on the wire to match the
// backend's JSON contract.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
    total_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    upload_id: String,
    r2_upload_id: String,
    r2_path: String,
    chunk_size: u64,
    total_chunks: u32,
    chunk_urls: Vec<ChunkUrl>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkUrl {
    part_number: u32,
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRequest<'a> {
    upload_id: &'a str,
    part_number: u32,
    etag: &'a str,
    bytes_uploaded: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    upload_id: &'a str,
    parts: &'a [UploadedPart],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    asset_id: String,
    r2_path: String,
}

/// Production `StorageApi` over the backend's HTTP/JSON protocol:
/// `POST /uploads/init`, raw-body `PUT` per pre-signed part URL,
/// `PATCH /uploads/report`, `POST /uploads/complete`.
pub struct HttpStorageClient {
    base_url: String,
    http: reqwest::Client,
    transport: ChunkTransport,
    bearer_token: Option<String>,
}

impl HttpStorageClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            transport: ChunkTransport::new(),
            bearer_token: None,
        }
    }

    /// Attach the authenticated identity all control-plane calls
    /// ride on.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_transport(mut self, transport: ChunkTransport) -> Self {
        self.transport = transport;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(ref token) = self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(body) if !body.is_empty() => format!("{status}: {body}"),
            _ => status.to_string(),
        }
    }
}

#[async_trait]
impl StorageApi for HttpStorageClient {
    async fn init(
        &self,
        file: &FileDescriptor,
        ctx: &UploadContext,
    ) -> ProtocolResult<ChunkPlan> {
        if file.total_size == 0 {
            return Err(ProtocolError::Init("file is empty".into()));
        }

        let request = InitRequest {
            filename: &file.file_name,
            content_type: &file.content_type,
            total_size: file.total_size,
            project_id: ctx.project_id.as_deref(),
            category: ctx.category.as_deref(),
        };

        let response = self
            .request(reqwest::Method::POST, "/uploads/init")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProtocolError::Init(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProtocolError::Init(Self::error_body(response).await));
        }

        let body: InitResponse = response
            .json()
            .await
            .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))?;

        Ok(ChunkPlan {
            upload_id: body.upload_id,
            storage_upload_id: body.r2_upload_id,
            storage_path: body.r2_path,
            chunk_size: body.chunk_size,
            total_chunks: body.total_chunks,
            part_targets: body
                .chunk_urls
                .into_iter()
                .map(|c| PartTarget {
                    part_number: c.part_number,
                    url: c.url,
                })
                .collect(),
            expires_at: body.expires_at,
        })
    }

    async fn upload_part(
        &self,
        target: &PartTarget,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> ProtocolResult<String> {
        self.transport
            .put_part(target, bytes, cancel)
            .await
            .map_err(|e| match e {
                TransportError::Cancelled => ProtocolError::Cancelled,
                TransportError::Expired(_) => ProtocolError::Expired,
                other => ProtocolError::Chunk(other.to_string()),
            })
    }

    async fn report_chunk(
        &self,
        upload_id: &str,
        part_number: u32,
        etag: &str,
        bytes: u64,
    ) -> ProtocolResult<()> {
        let request = ReportRequest {
            upload_id,
            part_number,
            etag,
            bytes_uploaded: bytes,
        };

        let response = self
            .request(reqwest::Method::PATCH, "/uploads/report")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProtocolError::Report(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProtocolError::Report(Self::error_body(response).await));
        }

        Ok(())
    }

    async fn complete(
        &self,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> ProtocolResult<CompletedAsset> {
        let request = CompleteRequest { upload_id, parts };

        let response = self
            .request(reqwest::Method::POST, "/uploads/complete")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProtocolError::Complete(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProtocolError::Complete(Self::error_body(response).await));
        }

        let body: CompleteResponse = response
            .json()
            .await
            .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))?;

        Ok(CompletedAsset {
            asset_id: body.asset_id,
            storage_path: body.r2_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_size_rejected_before_wire() {
        let client = HttpStorageClient::new("http://backend.invalid");
        let file = FileDescriptor {
            file_name: "empty.bin".into(),
            content_type: "application/octet-stream".into(),
            total_size: 0,
        };

        let result = client.init(&file, &UploadContext::default()).await;
        assert!(matches!(result, Err(ProtocolError::Init(_))));
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let request = InitRequest {
            filename: "reel.mov",
            content_type: "video/quicktime",
            total_size: 42,
            project_id: Some("p1"),
            category: Some("raw"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("contentType").is_some());
        assert!(json.get("totalSize").is_some());
        assert!(json.get("projectId").is_some());

        let parts = vec![UploadedPart {
            part_number: 2,
            etag: "abc".into(),
        }];
        let complete = CompleteRequest {
            upload_id: "up-1",
            parts: &parts,
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["parts"][0]["partNumber"], 2);
        assert_eq!(json["uploadId"], "up-1");
    }

    #[test]
    fn test_init_response_parses_backend_shape() {
        let raw = serde_json::json!({
            "uploadId": "up-9",
            "r2UploadId": "r2-internal",
            "r2Path": "projects/p1/raw/reel.mov",
            "chunkSize": 5242880u64,
            "totalChunks": 3,
            "chunkUrls": [
                {"partNumber": 1, "url": "https://r2.test/1"},
                {"partNumber": 2, "url": "https://r2.test/2"},
                {"partNumber": 3, "url": "https://r2.test/3"}
            ],
            "expiresAt": "2026-08-06T12:00:00Z"
        });

        let parsed: InitResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.total_chunks, 3);
        assert_eq!(parsed.chunk_urls[2].part_number, 3);
    }
}
