use std::{collections::BTreeMap, sync::Arc, time::Duration};

use reqwest::{
    Client,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde_json::Value;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::auth::{DEFAULT_ACCOUNT, TokenProvider};
use crate::error::{GraphError, GraphResult};
use crate::rest_types::HttpMethod;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, send_with_retry};

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PREFER: &str = "prefer";
const PREFER_TEXT_BODY: &str = "outlook.body-content-type=\"text\"";
const CONSISTENCY_LEVEL: &str = "consistencylevel";
const CLIENT_REQUEST_ID: &str = "client-request-id";

pub type QueryParams = BTreeMap<String, String>;

/// Request body: structured JSON or raw bytes, never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Option<QueryParams>,
    pub body: RequestBody,
    /// Overrides the client's retry budget for this call.
    pub max_retries: Option<u32>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: None,
            body: RequestBody::Empty,
            max_retries: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_json(body)
    }

    pub fn put_bytes(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(HttpMethod::Put, path).with_bytes(data)
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_bytes(mut self, data: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(data);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Successful outcome of a single call.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphResponse {
    Content(Value),
    /// 2xx with an empty body (typically 204).
    NoContent,
}

impl GraphResponse {
    pub fn into_content(self) -> Option<Value> {
        match self {
            GraphResponse::Content(value) => Some(value),
            GraphResponse::NoContent => None,
        }
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self, GraphResponse::NoContent)
    }
}

/// Request executor for the Graph API.
///
/// Built once and shared: the underlying `reqwest::Client` pools
/// connections and is safe to use from concurrent tasks. Cloning is cheap.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(base_url: &Url, tokens: Arc<dyn TokenProvider>) -> GraphResult<Self> {
        Self::with_timeout(base_url, tokens, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &Url,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> GraphResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            tokens,
            sleeper: Arc::new(TokioSleeper),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Absolute URL for an API path. Absolute URLs (continuation links,
    /// upload sessions) pass through untouched.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub(crate) fn bearer(&self, account_id: Option<&str>) -> GraphResult<String> {
        self.tokens
            .token(account_id)
            .map_err(|source| GraphError::Auth {
                account: account_id.unwrap_or(DEFAULT_ACCOUNT).to_string(),
                source: source.into(),
            })
    }

    pub(crate) fn policy(&self, max_retries: Option<u32>) -> RetryPolicy {
        match max_retries {
            Some(max_retries) => self.retry.clone().with_max_retries(max_retries),
            None => self.retry.clone(),
        }
    }

    /// Execute one logical call with the header policy and retry state machine applied.
    pub async fn execute(
        &self,
        request: ApiRequest,
        account_id: Option<&str>,
    ) -> GraphResult<GraphResponse> {
        let ApiRequest {
            method,
            path,
            mut params,
            body,
            max_retries,
        } = request;

        let token = self.bearer(account_id)?;
        let url = self.url(&path);
        let headers = policy_headers(method, &mut params, &body);
        let payload = match body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(serde_json::to_vec(&value)?),
            RequestBody::Bytes(data) => Some(data),
        };
        let policy = self.policy(max_retries);
        let request_id = Uuid::new_v4().to_string();

        debug!(%method, %url, %request_id, "graph request");

        let response = send_with_retry(
            || {
                let mut builder = self
                    .http
                    .request(method.into(), &url)
                    .bearer_auth(&token)
                    .headers(headers.clone())
                    .header(CLIENT_REQUEST_ID, &request_id);
                if let Some(params) = &params {
                    builder = builder.query(params);
                }
                if let Some(payload) = &payload {
                    builder = builder.body(payload.clone());
                }
                builder
            },
            &policy,
            self.sleeper.as_ref(),
        )
        .await?;

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(GraphResponse::NoContent);
        }
        Ok(GraphResponse::Content(serde_json::from_slice(&bytes)?))
    }

    pub async fn get(
        &self,
        path: &str,
        account_id: Option<&str>,
        params: Option<QueryParams>,
    ) -> GraphResult<GraphResponse> {
        let mut request = ApiRequest::get(path);
        request.params = params;
        self.execute(request, account_id).await
    }

    /// GET raw bytes (file content, MIME exports).
    pub async fn download_raw(
        &self,
        path: &str,
        account_id: Option<&str>,
        max_retries: Option<u32>,
    ) -> GraphResult<Vec<u8>> {
        let token = self.bearer(account_id)?;
        let url = self.url(path);
        let policy = self.policy(max_retries);
        let request_id = Uuid::new_v4().to_string();

        debug!(%url, %request_id, "graph download");

        let response = send_with_retry(
            || {
                self.http
                    .get(&url)
                    .bearer_auth(&token)
                    .header(CLIENT_REQUEST_ID, &request_id)
            },
            &policy,
            self.sleeper.as_ref(),
        )
        .await?;

        Ok(response.bytes().await?.to_vec())
    }
}

/// Headers derived from the shape of a request. May add `$count=true` to `params`.
pub(crate) fn policy_headers(
    method: HttpMethod,
    params: &mut Option<QueryParams>,
    body: &RequestBody,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let searching = params
        .as_ref()
        .is_some_and(|params| params.contains_key("$search"));

    if method == HttpMethod::Get {
        let selects_body = params
            .as_ref()
            .and_then(|params| params.get("$select"))
            .is_some_and(|select| select.contains("body"));
        if searching || selects_body {
            headers.insert(PREFER, HeaderValue::from_static(PREFER_TEXT_BODY));
        }
    } else {
        let content_type = match body {
            RequestBody::Json(_) => "application/json",
            RequestBody::Bytes(_) | RequestBody::Empty => "application/octet-stream",
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    if let Some(params) = params.as_mut() {
        let fuzzy_filter = params
            .get("$filter")
            .is_some_and(|filter| filter.contains("contains(") || filter.contains("/any("));
        if searching || fuzzy_filter {
            headers.insert(CONSISTENCY_LEVEL, HeaderValue::from_static("eventual"));
            params
                .entry("$count".to_string())
                .or_insert_with(|| "true".to_string());
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Option<QueryParams> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_url_building() {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap();
        let client = GraphClient::new(&base, Arc::new(StaticTokenProvider::new("tok"))).unwrap();
        assert_eq!(
            client.url("/me/messages"),
            "https://graph.microsoft.com/v1.0/me/messages"
        );
        assert_eq!(
            client.url("me/messages"),
            "https://graph.microsoft.com/v1.0/me/messages"
        );
        assert_eq!(
            client.url("https://graph.microsoft.com/v1.0/me/messages?$skiptoken=abc"),
            "https://graph.microsoft.com/v1.0/me/messages?$skiptoken=abc"
        );
    }

    #[test]
    fn test_get_with_search_prefers_text_and_eventual_consistency() {
        let mut p = params(&[("$search", "\"budget\"")]);
        let headers = policy_headers(HttpMethod::Get, &mut p, &RequestBody::Empty);
        assert_eq!(headers[PREFER], PREFER_TEXT_BODY);
        assert_eq!(headers[CONSISTENCY_LEVEL], "eventual");
        assert!(!headers.contains_key(CONTENT_TYPE));
        assert_eq!(p.unwrap()["$count"], "true");
    }

    #[test]
    fn test_get_selecting_body_prefers_text_only() {
        let mut p = params(&[("$select", "subject,body")]);
        let headers = policy_headers(HttpMethod::Get, &mut p, &RequestBody::Empty);
        assert_eq!(headers[PREFER], PREFER_TEXT_BODY);
        assert!(!headers.contains_key(CONSISTENCY_LEVEL));
        assert!(!p.unwrap().contains_key("$count"));
    }

    #[test]
    fn test_fuzzy_filters_need_eventual_consistency() {
        for filter in [
            "contains(subject, 'invoice')",
            "toRecipients/any(r: r/emailAddress/address eq 'a@b.c')",
        ] {
            let mut p = params(&[("$filter", filter)]);
            let headers = policy_headers(HttpMethod::Get, &mut p, &RequestBody::Empty);
            assert_eq!(headers[CONSISTENCY_LEVEL], "eventual");
            assert!(!headers.contains_key(PREFER));
            assert_eq!(p.unwrap()["$count"], "true");
        }
    }

    #[test]
    fn test_explicit_count_is_kept() {
        let mut p = params(&[("$search", "x"), ("$count", "false")]);
        policy_headers(HttpMethod::Get, &mut p, &RequestBody::Empty);
        assert_eq!(p.unwrap()["$count"], "false");
    }

    #[test]
    fn test_plain_filter_adds_nothing() {
        let mut p = params(&[("$filter", "isRead eq false")]);
        let headers = policy_headers(HttpMethod::Get, &mut p, &RequestBody::Empty);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_content_type_follows_body() {
        let mut none = None;
        let headers = policy_headers(
            HttpMethod::Post,
            &mut none,
            &RequestBody::Json(json!({"a": 1})),
        );
        assert_eq!(headers[CONTENT_TYPE], "application/json");

        let headers = policy_headers(HttpMethod::Put, &mut none, &RequestBody::Bytes(vec![1]));
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
    }

    #[test]
    fn test_api_request_builders() {
        let request = ApiRequest::put_bytes("/me/drive/root:/a.txt:/content", vec![1, 2])
            .with_max_retries(1);
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.body, RequestBody::Bytes(vec![1, 2]));
        assert_eq!(request.max_retries, Some(1));
    }
}
