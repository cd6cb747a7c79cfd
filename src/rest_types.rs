use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::{BatchItemResponse, BatchRequest};
use crate::serde_utils::null_as_default;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload<'a> {
    pub requests: &'a [BatchRequest],
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponseEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub responses: Vec<BatchItemResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPayload<'a> {
    pub requests: [&'a SearchRequest; 1],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub entity_types: Vec<String>,
    pub query: SearchQueryString,
    pub size: usize,
    pub from: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQueryString {
    pub query_string: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponsePage {
    pub value: Option<Vec<SearchResponse>>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hits_containers: Vec<HitsContainer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitsContainer {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hits: Vec<SearchHit>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub more_results_available: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub resource: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateUploadSessionRequest {
    pub item: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMailUploadSessionRequest<'a> {
    #[serde(rename = "AttachmentItem")]
    pub attachment_item: &'a AttachmentItem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentItem {
    pub attachment_type: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

impl AttachmentItem {
    pub fn file(name: impl Into<String>, size: u64, content_type: impl Into<String>) -> Self {
        Self {
            attachment_type: "file".to_string(),
            name: name.into(),
            size,
            content_type: content_type.into(),
        }
    }
}

/// Session creation reply before the upload URL is checked for presence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    pub upload_url: Option<String>,
    pub expiration_date_time: Option<DateTime<Utc>>,
}
