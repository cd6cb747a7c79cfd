//! JSON batching through `POST /$batch`.
//!
//! The service runs at most four requests per mailbox concurrently, so
//! envelopes longer than four are chained with `dependsOn` links before
//! submission. The chaining reproduces the established link construction:
//! every item after the first ends up depending on its immediate
//! predecessor, which serialises the whole envelope rather than running
//! four-wide lanes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::{ApiRequest, GraphClient, GraphResponse};
use crate::error::{GraphError, GraphResult};
use crate::rest_types::{BatchPayload, BatchResponseEnvelope, HttpMethod};

pub const MAX_BATCH_SIZE: usize = 20;
pub const MAILBOX_CONCURRENCY: usize = 4;

const BATCH_ROUTE: &str = "/$batch";

/// One sub-request of a batch envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub id: String,
    pub method: HttpMethod,
    /// Relative to the API root, e.g. `/me/messages/{id}`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl BatchRequest {
    pub fn new(id: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            url: url.into(),
            body: None,
            headers: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, HttpMethod::Get, url)
    }

    /// Attach a JSON body. The batch endpoint requires each body to declare its content type.
    pub fn with_body(mut self, body: Value) -> Self {
        self.headers
            .insert("Content-Type".to_string(), Value::from("application/json"));
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResponse {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl BatchItemResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Per-item responses keyed by request id. Holds exactly one entry per submitted request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    responses: HashMap<String, BatchItemResponse>,
}

impl BatchResult {
    pub fn get(&self, id: &str) -> Option<&BatchItemResponse> {
        self.responses.get(id)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchItemResponse> {
        self.responses.values()
    }

    pub fn into_inner(self) -> HashMap<String, BatchItemResponse> {
        self.responses
    }
}

/// Reject envelopes the service would refuse, before anything is sent.
pub fn validate_envelope(requests: &[BatchRequest]) -> GraphResult<()> {
    if requests.len() > MAX_BATCH_SIZE {
        return Err(GraphError::validation(format!(
            "batch has {} requests; at most {} are allowed",
            requests.len(),
            MAX_BATCH_SIZE
        )));
    }

    let mut seen = HashSet::new();
    for request in requests {
        for dependency in &request.depends_on {
            if !seen.contains(dependency.as_str()) {
                return Err(GraphError::validation(format!(
                    "request '{}' depends on '{}', which does not appear earlier in the batch",
                    request.id, dependency
                )));
            }
        }
        if !seen.insert(request.id.as_str()) {
            return Err(GraphError::validation(format!(
                "duplicate batch request id '{}'",
                request.id
            )));
        }
    }

    Ok(())
}

/// Inject `dependsOn` links for envelopes longer than [`MAILBOX_CONCURRENCY`].
///
/// The envelope is split into runs of four. Inside a run each item depends
/// on the one before it, and the first item of every later run depends on
/// the last item of the previous run.
pub fn chain_dependencies(requests: &[BatchRequest]) -> Vec<BatchRequest> {
    if requests.len() <= MAILBOX_CONCURRENCY {
        return requests.to_vec();
    }

    let mut chained = Vec::with_capacity(requests.len());
    for (run_index, run) in requests.chunks(MAILBOX_CONCURRENCY).enumerate() {
        for (offset, request) in run.iter().enumerate() {
            let mut request = request.clone();
            if offset > 0 {
                request.depends_on = vec![run[offset - 1].id.clone()];
            } else if run_index > 0 {
                let previous_run_last = &requests[run_index * MAILBOX_CONCURRENCY - 1];
                request.depends_on = vec![previous_run_last.id.clone()];
            }
            chained.push(request);
        }
    }
    chained
}

fn collect_responses(
    requests: &[BatchRequest],
    envelope: BatchResponseEnvelope,
) -> GraphResult<BatchResult> {
    let expected: HashSet<&str> = requests.iter().map(|r| r.id.as_str()).collect();
    let mut responses = HashMap::with_capacity(requests.len());

    for response in envelope.responses {
        if !expected.contains(response.id.as_str()) {
            return Err(GraphError::protocol(format!(
                "batch response for unknown request id '{}'",
                response.id
            )));
        }
        if responses.contains_key(&response.id) {
            return Err(GraphError::protocol(format!(
                "batch response repeats request id '{}'",
                response.id
            )));
        }
        responses.insert(response.id.clone(), response);
    }

    let missing: Vec<&str> = requests
        .iter()
        .map(|r| r.id.as_str())
        .filter(|id| !responses.contains_key(*id))
        .collect();
    if !missing.is_empty() {
        return Err(GraphError::protocol(format!(
            "batch response is missing request ids: {}",
            missing.join(", ")
        )));
    }

    Ok(BatchResult { responses })
}

impl GraphClient {
    /// Submit up to 20 requests as one call.
    ///
    /// Failures of individual sub-requests are reported in the result, not raised.
    pub async fn submit_batch(
        &self,
        requests: &[BatchRequest],
        account_id: Option<&str>,
    ) -> GraphResult<BatchResult> {
        self.submit_batch_with_retries(requests, account_id, None)
            .await
    }

    pub async fn submit_batch_with_retries(
        &self,
        requests: &[BatchRequest],
        account_id: Option<&str>,
        max_retries: Option<u32>,
    ) -> GraphResult<BatchResult> {
        if requests.is_empty() {
            return Ok(BatchResult::default());
        }
        validate_envelope(requests)?;

        let chained = chain_dependencies(requests);
        let payload = serde_json::to_value(BatchPayload {
            requests: &chained,
        })?;

        let mut request = ApiRequest::post_json(BATCH_ROUTE, payload);
        request.max_retries = max_retries;

        debug!(count = requests.len(), "submitting batch");
        let envelope = match self.execute(request, account_id).await? {
            GraphResponse::Content(value) => {
                serde_json::from_value::<BatchResponseEnvelope>(value)?
            }
            GraphResponse::NoContent => {
                return Err(GraphError::protocol("batch endpoint returned no content"));
            }
        };

        collect_responses(requests, envelope)
    }
}
