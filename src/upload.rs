//! Resumable uploads through upload sessions.
//!
//! Payloads up to [`UPLOAD_CHUNK_SIZE`] go up in one PUT. Larger payloads
//! get a session and are streamed in byte ranges straight to the session
//! URL, each range with its own retry budget.

use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    header::{CONTENT_LENGTH, CONTENT_RANGE},
};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{ApiRequest, GraphClient, GraphResponse};
use crate::error::{GraphError, GraphResult};
use crate::rest_types::{
    AttachmentItem, CreateMailUploadSessionRequest, CreateUploadSessionRequest,
    UploadSessionResponse,
};
use crate::retry::send_with_retry;

/// Ranges must be multiples of 320 KiB.
pub const CHUNK_ALIGNMENT: usize = 320 * 1024;
/// 15 x 320 KiB = 4,915,200 bytes.
pub const UPLOAD_CHUNK_SIZE: usize = 15 * CHUNK_ALIGNMENT;
pub const CHUNK_MAX_RETRIES: u32 = 3;
pub const DEFAULT_ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSessionHandle {
    pub upload_url: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl TryFrom<UploadSessionResponse> for UploadSessionHandle {
    type Error = GraphError;

    fn try_from(response: UploadSessionResponse) -> GraphResult<Self> {
        let upload_url = response
            .upload_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GraphError::protocol("upload session response has no uploadUrl"))?;
        Ok(Self {
            upload_url,
            expiration: response.expiration_date_time,
        })
    }
}

/// Half-open byte range `[start, end)` of a payload of `total_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteChunk {
    pub start: usize,
    pub end: usize,
    pub total_size: usize,
}

impl ByteChunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, self.total_size)
    }
}

/// Consecutive ranges of [`UPLOAD_CHUNK_SIZE`] covering `[0, total_size)`; the last may be shorter.
pub fn byte_chunks(total_size: usize) -> impl Iterator<Item = ByteChunk> {
    (0..total_size)
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(move |start| ByteChunk {
            start,
            end: (start + UPLOAD_CHUNK_SIZE).min(total_size),
            total_size,
        })
}

impl GraphClient {
    /// Upload `data` to the drive item at `path`, through a session when it
    /// does not fit in one chunk. Returns the final item metadata.
    pub async fn upload_large(
        &self,
        path: &str,
        data: &[u8],
        account_id: Option<&str>,
        item_properties: Option<Value>,
    ) -> GraphResult<Value> {
        if data.len() <= UPLOAD_CHUNK_SIZE {
            let request = ApiRequest::put_bytes(format!("{path}/content"), data.to_vec());
            return match self.execute(request, account_id).await? {
                GraphResponse::Content(item) => Ok(item),
                GraphResponse::NoContent => Err(GraphError::protocol(
                    "direct upload returned no item metadata",
                )),
            };
        }

        let session = self
            .create_upload_session(path, account_id, item_properties)
            .await?;
        self.upload_chunks(session, data, account_id).await
    }

    pub async fn create_upload_session(
        &self,
        path: &str,
        account_id: Option<&str>,
        item_properties: Option<Value>,
    ) -> GraphResult<UploadSessionHandle> {
        let body = serde_json::to_value(CreateUploadSessionRequest {
            item: item_properties.unwrap_or_else(|| json!({})),
        })?;
        let route = format!("{path}/createUploadSession");
        self.open_session(ApiRequest::post_json(route, body), account_id)
            .await
    }

    pub async fn create_mail_upload_session(
        &self,
        message_id: &str,
        attachment: &AttachmentItem,
        account_id: Option<&str>,
    ) -> GraphResult<UploadSessionHandle> {
        let body = serde_json::to_value(CreateMailUploadSessionRequest {
            attachment_item: attachment,
        })?;
        let route = format!("/me/messages/{message_id}/attachments/createUploadSession");
        self.open_session(ApiRequest::post_json(route, body), account_id)
            .await
    }

    /// Attach `data` to a draft message. Attachments always go through a session.
    pub async fn upload_large_mail_attachment(
        &self,
        message_id: &str,
        name: &str,
        data: &[u8],
        account_id: Option<&str>,
        content_type: Option<&str>,
    ) -> GraphResult<Value> {
        let attachment = AttachmentItem::file(
            name,
            data.len() as u64,
            content_type.unwrap_or(DEFAULT_ATTACHMENT_CONTENT_TYPE),
        );
        let session = self
            .create_mail_upload_session(message_id, &attachment, account_id)
            .await?;
        self.upload_chunks(session, data, account_id).await
    }

    async fn open_session(
        &self,
        request: ApiRequest,
        account_id: Option<&str>,
    ) -> GraphResult<UploadSessionHandle> {
        let response = match self.execute(request, account_id).await? {
            GraphResponse::Content(value) => value,
            GraphResponse::NoContent => {
                return Err(GraphError::protocol(
                    "upload session creation returned no content",
                ));
            }
        };
        let session =
            UploadSessionHandle::try_from(serde_json::from_value::<UploadSessionResponse>(response)?)?;
        info!(expires = ?session.expiration, "upload session created");
        Ok(session)
    }

    /// Stream `data` to the session URL. The first 200/201 with a body is
    /// the final item and ends the upload, even before the last range.
    async fn upload_chunks(
        &self,
        session: UploadSessionHandle,
        data: &[u8],
        account_id: Option<&str>,
    ) -> GraphResult<Value> {
        let token = self.bearer(account_id)?;
        let policy = self.policy(Some(CHUNK_MAX_RETRIES));
        let request_id = Uuid::new_v4().to_string();

        for chunk in byte_chunks(data.len()) {
            let bytes = &data[chunk.start..chunk.end];
            let content_range = chunk.content_range();
            debug!(%content_range, "uploading range");

            let response = send_with_retry(
                || {
                    self.http
                        .put(&session.upload_url)
                        .bearer_auth(&token)
                        .header("client-request-id", &request_id)
                        .header(CONTENT_LENGTH, chunk.len())
                        .header(CONTENT_RANGE, &content_range)
                        .body(bytes.to_vec())
                },
                &policy,
                self.sleeper.as_ref(),
            )
            .await?;

            let status = response.status();
            let body = response.bytes().await?;
            if matches!(status, StatusCode::OK | StatusCode::CREATED) && !body.is_empty() {
                info!(size = data.len(), "upload complete");
                return Ok(serde_json::from_slice(&body)?);
            }
        }

        Err(GraphError::protocol(
            "upload finished without a final item response",
        ))
    }
}
