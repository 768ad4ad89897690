//! `mediacdn-http` is an async HTTP client for a media CDN origin.
//!
//! The fetch path is built on [`RetryingFetcher`], a bounded-retry executor
//! that can also wrap any other transport:
//! - [`CdnClient::fetch_asset`] retries transient failures with exponential backoff
//! - [`CdnClient::upload_asset`] is a single attempt, errors wrapped with the path
//! - [`CdnClient::purge_cache`] is a single attempt, errors returned as-is

mod classify;
mod client;
mod error;
mod event;
mod fetcher;
mod options;
mod policy;
mod types;

pub use classify::{is_service_unavailable, retry_on_statuses, RetryPredicate};
pub use client::{asset_url, CdnClient};
pub use error::{CdnError, TransportError};
pub use event::{AttemptEvent, AttemptOutcome, AttemptSink};
pub use fetcher::RetryingFetcher;
pub use options::ClientOptions;
pub use policy::RetryPolicy;
pub use types::UploadReceipt;

pub type Result<T> = std::result::Result<T, CdnError>;
