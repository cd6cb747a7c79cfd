//! # graphreq
//!
//! Request orchestration in front of the Microsoft Graph REST API.
//!
//! - [`GraphClient::execute`] runs one call with the header policy and the
//!   429 / 5xx retry state machine from [`retry`].
//! - [`GraphClient::submit_batch`] sends up to 20 sub-requests through
//!   `$batch`, chaining them to respect the per-mailbox concurrency limit.
//! - [`GraphClient::paginate`] and [`GraphClient::search`] are lazy streams
//!   over `@odata.nextLink` collections and `/search/query` results.
//! - [`GraphClient::upload_large`] and
//!   [`GraphClient::upload_large_mail_attachment`] stream payloads through
//!   upload sessions in 320 KiB-aligned ranges.
//!
//! One client is built per process and shared; tokens come from a
//! [`TokenProvider`].

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod paginate;
pub mod rest_types;
pub mod retry;
pub mod search;
mod serde_utils;
pub mod upload;

pub use auth::{KeyringTokenProvider, StaticTokenProvider, TokenProvider};
pub use batch::{BatchItemResponse, BatchRequest, BatchResult};
pub use client::{ApiRequest, GraphClient, GraphResponse, QueryParams, RequestBody};
pub use error::{GraphError, GraphResult};
pub use rest_types::{AttachmentItem, HttpMethod};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use upload::{ByteChunk, UPLOAD_CHUNK_SIZE, UploadSessionHandle};
