use serde::Deserialize;

use crate::{CdnError, Result, RetryPolicy};

/// Configures HTTP timeouts, user agent and the fetch retry policy.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-attempt timeout for asset fetches, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Timeout for a single upload request, in milliseconds.
    pub upload_timeout_ms: u64,
    /// Value of the `User-Agent` header sent on fetches.
    pub user_agent: String,
    /// Retry policy applied to fetches only.
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5_000,
            upload_timeout_ms: 30_000,
            user_agent: concat!("mediacdn-http/", env!("CARGO_PKG_VERSION")).to_owned(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Parses options from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|err| CdnError::Config(format!("invalid client options JSON: {err}")))?;
        options.retry.validate()?;
        Ok(options)
    }
}
